//! Command services.
//!
//! Every command follows the same shape: open a span tagged with tenant,
//! user and command name; load the aggregate (or start a new one); when
//! the request carries no logged-in user, skip it if the aggregate already
//! reflects it; otherwise build the typed event, enrich its metadata, fold
//! it and append it under the loaded version; finally return the id.

pub mod contact;
pub mod contract;
pub mod email;
pub mod opportunity;
pub mod organization;

pub use contact::{ContactService, CreateContactRequest, UpdateContactRequest};
pub use contract::{ContractService, CreateContractRequest, UpdateContractRequest};
pub use email::{EmailService, UpsertEmailRequest};
pub use opportunity::{CreateRenewalRequest, OpportunityService, UpdateRenewalRequest};
pub use organization::{
    CreateOrganizationRequest, OrganizationService, UpdateOrganizationRequest,
};

use tracing::{debug, info, instrument};

use crate::aggregate::{Aggregate, AggregateStore, EventMetadata};
use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::eventstore::{DEFAULT_STREAM_TTL_MINUTES, StreamMetadata};
use crate::model::now;
use crate::model::opportunity::RenewalFields;
use crate::model::organization::OnboardingStatus;
use crate::model::source::DEFAULT_APP_SOURCE;

/// Caller identity carried by every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandMeta {
    pub tenant: String,
    pub logged_in_user_id: String,
    pub app_source: String,
}

impl CommandMeta {
    #[must_use]
    pub fn new(tenant: &str, logged_in_user_id: &str, app_source: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            logged_in_user_id: logged_in_user_id.to_string(),
            app_source: app_source.to_string(),
        }
    }

    /// Metadata for commands issued by the platform itself.
    #[must_use]
    pub fn system(tenant: &str) -> Self {
        Self::new(tenant, "", DEFAULT_APP_SOURCE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tenant.trim().is_empty() {
            return Err(Error::MissingField("tenant"));
        }
        Ok(())
    }

    /// Redundant requests are only skipped when no user asked for them.
    #[must_use]
    pub fn skips_redundant(&self) -> bool {
        self.logged_in_user_id.is_empty()
    }

    fn event_metadata(&self) -> EventMetadata {
        EventMetadata {
            tenant: self.tenant.clone(),
            user_id: self.logged_in_user_id.clone(),
            app: if self.app_source.is_empty() {
                DEFAULT_APP_SOURCE.to_string()
            } else {
                self.app_source.clone()
            },
        }
    }
}

/// Response of every id-returning command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdResponse {
    pub id: String,
    pub redundant_event_skipped: bool,
}

impl IdResponse {
    fn applied(id: &str) -> Self {
        Self {
            id: id.to_string(),
            redundant_event_skipped: false,
        }
    }

    fn skipped(id: &str) -> Self {
        Self {
            id: id.to_string(),
            redundant_event_skipped: true,
        }
    }
}

/// How a command obtains its aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Load {
    /// Fail with `AggregateNotFound` when the stream is empty.
    Existing,
    /// Start from an empty aggregate when the stream is empty.
    OrNew,
}

/// Steps two to six of every command.
pub(crate) fn handle<A: Aggregate>(
    store: &AggregateStore,
    ctx: &Ctx,
    meta: &CommandMeta,
    object_id: &str,
    load: Load,
    is_redundant: impl FnOnce(&A) -> Result<bool>,
    build: impl FnOnce(&A) -> Result<A::Event>,
) -> Result<IdResponse> {
    meta.validate()?;
    let mut root = match load {
        Load::Existing => store.load::<A>(ctx, &meta.tenant, object_id)?,
        Load::OrNew => store.load_or_new::<A>(ctx, &meta.tenant, object_id)?,
    };
    if meta.skips_redundant() && is_redundant(root.state())? {
        debug!(aggregate_id = %root.id(), "redundant event skipped");
        return Ok(IdResponse::skipped(object_id));
    }
    let event = build(root.state())?;
    root.apply(&event, meta.event_metadata(), now())?;
    store.save(ctx, &mut root)?;
    Ok(IdResponse::applied(object_id))
}

/// Use the requested id or generate one.
pub(crate) fn id_or_new(id: &str) -> String {
    if id.trim().is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        id.trim().to_string()
    }
}

pub(crate) fn require<'a>(value: &'a str, field: &'static str) -> Result<&'a str> {
    if value.trim().is_empty() {
        Err(Error::MissingField(field))
    } else {
        Ok(value)
    }
}

/// Refresh and follow-up requests projectors send to other aggregates.
pub trait Commands: Send + Sync + std::fmt::Debug {
    fn refresh_arr(&self, ctx: &Ctx, meta: &CommandMeta, organization_id: &str) -> Result<()>;

    fn refresh_renewal_summary(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        organization_id: &str,
    ) -> Result<()>;

    fn refresh_last_touchpoint(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        organization_id: &str,
    ) -> Result<()>;

    fn update_onboarding_status(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        organization_id: &str,
        status: OnboardingStatus,
        comments: &str,
        caused_by_contract_id: Option<&str>,
    ) -> Result<()>;

    fn create_renewal_opportunity(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        contract_id: &str,
        fields: &RenewalFields,
    ) -> Result<String>;

    fn close_renewal_opportunity(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        opportunity_id: &str,
        won: bool,
    ) -> Result<()>;

    fn refresh_contract_status(&self, ctx: &Ctx, meta: &CommandMeta, contract_id: &str)
    -> Result<()>;

    fn refresh_contract_ltv(&self, ctx: &Ctx, meta: &CommandMeta, contract_id: &str) -> Result<()>;
}

/// Every command service over one aggregate store.
#[derive(Debug, Clone)]
pub struct CommandGateway {
    pub contacts: ContactService,
    pub organizations: OrganizationService,
    pub contracts: ContractService,
    pub opportunities: OpportunityService,
    pub emails: EmailService,
    store: AggregateStore,
    default_stream_ttl_minutes: i64,
}

impl CommandGateway {
    #[must_use]
    pub fn new(store: AggregateStore) -> Self {
        Self {
            contacts: ContactService::new(store.clone()),
            organizations: OrganizationService::new(store.clone()),
            contracts: ContractService::new(store.clone()),
            opportunities: OpportunityService::new(store.clone()),
            emails: EmailService::new(store.clone()),
            store,
            default_stream_ttl_minutes: DEFAULT_STREAM_TTL_MINUTES,
        }
    }

    #[must_use]
    pub const fn with_stream_ttl(mut self, minutes: i64) -> Self {
        self.default_stream_ttl_minutes = minutes;
        self
    }

    /// Schedule a stream for deletion by giving it a maximum age.
    ///
    /// The stream is not removed synchronously; its events stop loading once
    /// they are older than the TTL.
    #[instrument(skip(self, ctx))]
    pub fn delete_stream(&self, ctx: &Ctx, stream: &str, ttl_minutes: Option<i64>) -> Result<()> {
        require(stream, "streamId")?;
        let minutes = ttl_minutes.unwrap_or(self.default_stream_ttl_minutes);
        if minutes <= 0 {
            return Err(Error::InvalidArgument(format!(
                "stream TTL must be positive, got {minutes} minutes"
            )));
        }
        self.store.event_store().set_stream_metadata(
            ctx,
            stream,
            &StreamMetadata {
                max_age_minutes: Some(minutes),
            },
        )?;
        info!(stream, minutes, "stream scheduled for deletion");
        Ok(())
    }
}

impl Commands for CommandGateway {
    fn refresh_arr(&self, ctx: &Ctx, meta: &CommandMeta, organization_id: &str) -> Result<()> {
        self.organizations
            .refresh_arr(ctx, meta, organization_id)
            .map(drop)
    }

    fn refresh_renewal_summary(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        organization_id: &str,
    ) -> Result<()> {
        self.organizations
            .refresh_renewal_summary(ctx, meta, organization_id)
            .map(drop)
    }

    fn refresh_last_touchpoint(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        organization_id: &str,
    ) -> Result<()> {
        self.organizations
            .refresh_last_touchpoint(ctx, meta, organization_id)
            .map(drop)
    }

    fn update_onboarding_status(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        organization_id: &str,
        status: OnboardingStatus,
        comments: &str,
        caused_by_contract_id: Option<&str>,
    ) -> Result<()> {
        self.organizations
            .update_onboarding_status(
                ctx,
                meta,
                organization_id,
                status,
                comments,
                caused_by_contract_id,
            )
            .map(drop)
    }

    fn create_renewal_opportunity(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        contract_id: &str,
        fields: &RenewalFields,
    ) -> Result<String> {
        let request = CreateRenewalRequest {
            contract_id: contract_id.to_string(),
            fields: fields.clone(),
            ..CreateRenewalRequest::default()
        };
        self.opportunities
            .create_renewal_opportunity(ctx, meta, &request)
            .map(|response| response.id)
    }

    fn close_renewal_opportunity(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        opportunity_id: &str,
        won: bool,
    ) -> Result<()> {
        self.opportunities
            .close_renewal_opportunity(ctx, meta, opportunity_id, won)
            .map(drop)
    }

    fn refresh_contract_status(
        &self,
        ctx: &Ctx,
        meta: &CommandMeta,
        contract_id: &str,
    ) -> Result<()> {
        self.contracts
            .refresh_contract_status(ctx, meta, contract_id)
            .map(drop)
    }

    fn refresh_contract_ltv(&self, ctx: &Ctx, meta: &CommandMeta, contract_id: &str) -> Result<()> {
        self.contracts
            .refresh_contract_ltv(ctx, meta, contract_id)
            .map(drop)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use super::*;
    use crate::eventstore::{EventStore, SqliteEventStore};

    pub fn gateway() -> (CommandGateway, Arc<SqliteEventStore>) {
        let events = Arc::new(SqliteEventStore::open_in_memory().expect("event store"));
        let store = AggregateStore::new(Arc::clone(&events) as Arc<dyn EventStore>);
        (CommandGateway::new(store), events)
    }

    pub fn event_types(events: &SqliteEventStore, stream: &str) -> Vec<String> {
        events
            .load(&Ctx::background(), stream)
            .expect("load")
            .into_iter()
            .map(|event| event.event_type)
            .collect()
    }
}
