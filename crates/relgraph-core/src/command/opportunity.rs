use chrono::{DateTime, Utc};
use tracing::instrument;

use super::{CommandMeta, IdResponse, Load, handle, id_or_new, require};
use crate::aggregate::AggregateStore;
use crate::aggregate::opportunity::{
    Opportunity, OpportunityEvent, RenewalClosed, RenewalCreated, RenewalUpdated,
};
use crate::context::Ctx;
use crate::error::Result;
use crate::model::opportunity::RenewalFields;
use crate::model::source::Source;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateRenewalRequest {
    /// Generated when empty.
    pub id: String,
    pub contract_id: String,
    pub fields: RenewalFields,
    pub source: Source,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateRenewalRequest {
    pub id: String,
    pub fields: RenewalFields,
    pub source: String,
    pub overwrite: bool,
}

#[derive(Debug, Clone)]
pub struct OpportunityService {
    store: AggregateStore,
}

impl OpportunityService {
    #[must_use]
    pub const fn new(store: AggregateStore) -> Self {
        Self { store }
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "create_renewal_opportunity", contract_id = %request.contract_id))]
    pub fn create_renewal_opportunity(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        request: &CreateRenewalRequest,
    ) -> Result<IdResponse> {
        require(&request.contract_id, "contractId")?;
        let id = id_or_new(&request.id);
        handle::<Opportunity>(
            &self.store,
            ctx,
            meta,
            &id,
            Load::OrNew,
            |opportunity| Ok(opportunity.is_created()),
            |_| {
                Ok(OpportunityEvent::CreateRenewal(RenewalCreated {
                    contract_id: request.contract_id.clone(),
                    fields: request.fields.clone(),
                    source: request.source.clone(),
                    created_at: request.created_at,
                }))
            },
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "update_renewal_opportunity", id = %request.id))]
    pub fn update_renewal_opportunity(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        request: &UpdateRenewalRequest,
    ) -> Result<IdResponse> {
        let id = require(&request.id, "opportunityId")?;
        handle::<Opportunity>(
            &self.store,
            ctx,
            meta,
            id,
            Load::Existing,
            |opportunity| Ok(opportunity.is_closed()),
            |_| {
                Ok(OpportunityEvent::UpdateRenewal(RenewalUpdated {
                    fields: request.fields.clone(),
                    source: request.source.clone(),
                    overwrite: request.overwrite,
                }))
            },
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "close_renewal_opportunity", id = %opportunity_id))]
    pub fn close_renewal_opportunity(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        opportunity_id: &str,
        won: bool,
    ) -> Result<IdResponse> {
        let opportunity_id = require(opportunity_id, "opportunityId")?;
        handle::<Opportunity>(
            &self.store,
            ctx,
            meta,
            opportunity_id,
            Load::OrNew,
            |opportunity| Ok(opportunity.is_closed()),
            |_| {
                Ok(OpportunityEvent::CloseRenewal(RenewalClosed {
                    won,
                    closed_at: None,
                }))
            },
        )
    }
}
