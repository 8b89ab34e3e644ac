use chrono::{DateTime, Utc};
use tracing::instrument;

use super::{CommandMeta, IdResponse, Load, handle, id_or_new, require};
use crate::aggregate::AggregateStore;
use crate::aggregate::contract::{Contract, ContractCreated, ContractEvent, ContractUpdated};
use crate::aggregate::payload::Marker;
use crate::context::Ctx;
use crate::error::Result;
use crate::model::contract::ContractFields;
use crate::model::satellite::ExternalSystem;
use crate::model::source::Source;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateContractRequest {
    /// Generated when empty.
    pub id: String,
    pub organization_id: String,
    pub created_by_user_id: String,
    pub fields: ContractFields,
    pub source: Source,
    pub external_system: Option<ExternalSystem>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateContractRequest {
    pub id: String,
    pub fields: ContractFields,
    pub source: String,
    pub overwrite: bool,
    pub external_system: Option<ExternalSystem>,
}

#[derive(Debug, Clone)]
pub struct ContractService {
    store: AggregateStore,
}

impl ContractService {
    #[must_use]
    pub const fn new(store: AggregateStore) -> Self {
        Self { store }
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "create_contract"))]
    pub fn create_contract(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        request: &CreateContractRequest,
    ) -> Result<IdResponse> {
        require(&request.organization_id, "organizationId")?;
        let id = id_or_new(&request.id);
        handle::<Contract>(
            &self.store,
            ctx,
            meta,
            &id,
            Load::OrNew,
            |contract| Ok(contract.is_created()),
            |_| {
                Ok(ContractEvent::Create(ContractCreated {
                    organization_id: request.organization_id.clone(),
                    created_by_user_id: if request.created_by_user_id.is_empty() {
                        meta.logged_in_user_id.clone()
                    } else {
                        request.created_by_user_id.clone()
                    },
                    fields: request.fields.clone(),
                    source: request.source.clone(),
                    external_system: request.external_system.clone(),
                    created_at: request.created_at,
                }))
            },
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "update_contract", id = %request.id))]
    pub fn update_contract(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        request: &UpdateContractRequest,
    ) -> Result<IdResponse> {
        let id = require(&request.id, "contractId")?;
        handle::<Contract>(
            &self.store,
            ctx,
            meta,
            id,
            Load::Existing,
            |contract| {
                let system_known = request.external_system.as_ref().is_none_or(|system| {
                    contract
                        .external_systems
                        .iter()
                        .any(|existing| existing == system)
                });
                Ok(system_known && contract.is_repeated_update(&request.fields, &request.source)?)
            },
            |_| {
                Ok(ContractEvent::Update(ContractUpdated {
                    fields: request.fields.clone(),
                    source: request.source.clone(),
                    overwrite: request.overwrite,
                    external_system: request.external_system.clone(),
                }))
            },
        )
    }

    /// Close the active renewal when it is due and open the next one.
    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "rollout_renewal_opportunity_on_expiration", id = %contract_id))]
    pub fn rollout_renewal_opportunity_on_expiration(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        contract_id: &str,
    ) -> Result<IdResponse> {
        let contract_id = require(contract_id, "contractId")?;
        handle::<Contract>(
            &self.store,
            ctx,
            meta,
            contract_id,
            Load::Existing,
            |contract| Ok(contract.deleted),
            |_| Ok(ContractEvent::RolloutRenewalRequested(Marker {})),
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "refresh_contract_status", id = %contract_id))]
    pub fn refresh_contract_status(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        contract_id: &str,
    ) -> Result<IdResponse> {
        let contract_id = require(contract_id, "contractId")?;
        handle::<Contract>(
            &self.store,
            ctx,
            meta,
            contract_id,
            Load::Existing,
            |_| Ok(false),
            |_| Ok(ContractEvent::RefreshStatus(Marker {})),
        )
    }

    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "refresh_contract_ltv", id = %contract_id))]
    pub fn refresh_contract_ltv(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        contract_id: &str,
    ) -> Result<IdResponse> {
        let contract_id = require(contract_id, "contractId")?;
        handle::<Contract>(
            &self.store,
            ctx,
            meta,
            contract_id,
            Load::Existing,
            |_| Ok(false),
            |_| Ok(ContractEvent::RefreshLtv(Marker {})),
        )
    }

    /// Soft-delete a contract; the graph keeps it under the deleted labels.
    #[instrument(skip_all, fields(tenant = %meta.tenant, user_id = %meta.logged_in_user_id, command = "soft_delete_contract", id = %contract_id))]
    pub fn soft_delete_contract(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        contract_id: &str,
    ) -> Result<()> {
        let contract_id = require(contract_id, "contractId")?;
        handle::<Contract>(
            &self.store,
            ctx,
            meta,
            contract_id,
            Load::Existing,
            |contract| Ok(contract.deleted),
            |_| Ok(ContractEvent::SoftDelete(Marker {})),
        )
        .map(drop)
    }
}
