//! Event handlers that reconcile aggregate events into the graph.
//!
//! Each projector decodes the payload, resolves the in-tenant object id,
//! performs its graph writes (one transaction when several statements must
//! land together), notifies the completion sink and finally asks other
//! aggregates to refresh derived state. Refresh failures are logged and
//! swallowed; primary write failures propagate.

pub mod contact;
pub mod contract;
pub mod email;
pub mod opportunity;
pub mod organization;
pub mod subscription;

pub use contact::ContactProjector;
pub use contract::ContractProjector;
pub use email::EmailProjector;
pub use opportunity::OpportunityProjector;
pub use organization::OrganizationProjector;
pub use subscription::Subscription;

use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, instrument, warn};

use crate::aggregate::contact::Contact;
use crate::aggregate::contract::Contract;
use crate::aggregate::email::Email;
use crate::aggregate::opportunity::Opportunity;
use crate::aggregate::organization::Organization;
use crate::aggregate::{Aggregate, Event};
use crate::command::{CommandMeta, Commands};
use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::graph::{GraphDriver, GraphTx};
use crate::model::satellite::ExternalSystem;
use crate::repository::{ExternalSystemRepository, LinkedEntity, Repositories};

/// Result of projecting one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Applied,
    /// Nothing changed: stale version, missing target or a no-op.
    Skipped,
}

impl HandleOutcome {
    #[must_use]
    pub const fn from_applied(applied: bool) -> Self {
        if applied { Self::Applied } else { Self::Skipped }
    }
}

/// Kind of change announced to upstream listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Create,
    Update,
    Delete,
}

/// Announcement that a projected entity changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCompleted {
    pub tenant: String,
    pub entity: &'static str,
    pub entity_id: String,
    pub change: Change,
}

/// Receives a notice after every applied projection so UIs can refresh.
pub trait EventCompletionSink: Send + Sync + Debug {
    fn completed(&self, notice: &EventCompleted);
}

/// Sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCompletionSink;

impl EventCompletionSink for LoggingCompletionSink {
    fn completed(&self, notice: &EventCompleted) {
        info!(
            tenant = %notice.tenant,
            entity = notice.entity,
            entity_id = %notice.entity_id,
            change = ?notice.change,
            "event completed"
        );
    }
}

/// Sink that keeps notices in memory.
#[derive(Debug, Default)]
pub struct RecordingCompletionSink {
    notices: Mutex<Vec<EventCompleted>>,
}

impl RecordingCompletionSink {
    /// Drain the recorded notices.
    #[must_use]
    pub fn take(&self) -> Vec<EventCompleted> {
        std::mem::take(&mut *self.notices.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl EventCompletionSink for RecordingCompletionSink {
    fn completed(&self, notice: &EventCompleted) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice.clone());
    }
}

/// Collaborators every projector shares.
#[derive(Debug, Clone)]
pub(crate) struct Deps {
    pub driver: GraphDriver,
    pub repos: Arc<Repositories>,
    pub commands: Arc<dyn Commands>,
    pub sink: Arc<dyn EventCompletionSink>,
}

impl Deps {
    pub fn notify(&self, event: &Event, entity: &'static str, change: Change) {
        self.sink.completed(&EventCompleted {
            tenant: event.tenant().to_string(),
            entity,
            entity_id: event.object_id().to_string(),
            change,
        });
    }

    /// Link an external system when the event carries a usable one.
    pub fn link_external_system(
        &self,
        ctx: &Ctx,
        tx: &GraphTx<'_>,
        event: &Event,
        owner: LinkedEntity,
        system: Option<&ExternalSystem>,
    ) -> Result<()> {
        if let Some(system) = system.filter(|system| system.is_available()) {
            self.external_systems().link_with_entity(
                ctx,
                Some(tx),
                event.tenant(),
                owner,
                event.object_id(),
                system,
            )?;
        }
        Ok(())
    }

    fn external_systems(&self) -> &ExternalSystemRepository {
        &self.repos.external_systems
    }
}

/// Identity used for follow-up requests issued by projectors.
pub(crate) fn follow_up_meta(event: &Event) -> CommandMeta {
    CommandMeta::new(event.tenant(), "", &event.metadata.app)
}

/// Derived-state refreshes never fail the primary write.
pub(crate) fn swallow(result: Result<()>, request: &'static str, target_id: &str) {
    if let Err(err) = result {
        warn!(error = %err, request, target_id, "refresh request failed");
    }
}

/// Routes events to the projector of their aggregate type.
#[derive(Debug, Clone)]
pub struct EventHandler {
    contacts: ContactProjector,
    organizations: OrganizationProjector,
    contracts: ContractProjector,
    opportunities: OpportunityProjector,
    emails: EmailProjector,
}

impl EventHandler {
    #[must_use]
    pub fn new(
        driver: &GraphDriver,
        commands: Arc<dyn Commands>,
        sink: Arc<dyn EventCompletionSink>,
    ) -> Self {
        let deps = Deps {
            driver: driver.clone(),
            repos: Arc::new(Repositories::new(driver)),
            commands,
            sink,
        };
        Self {
            contacts: ContactProjector::new(deps.clone()),
            organizations: OrganizationProjector::new(deps.clone()),
            contracts: ContractProjector::new(deps.clone()),
            opportunities: OpportunityProjector::new(deps.clone()),
            emails: EmailProjector::new(deps),
        }
    }

    #[instrument(skip_all, fields(aggregate_id = %event.aggregate_id, event_type = %event.event_type, version = event.version))]
    pub fn handle(&self, ctx: &Ctx, event: &Event) -> Result<HandleOutcome> {
        ctx.check()?;
        if event.tenant().is_empty() {
            return Err(Error::MissingField("tenant"));
        }
        match event.aggregate_type.as_str() {
            Contact::TYPE => self.contacts.handle(ctx, event),
            Organization::TYPE => self.organizations.handle(ctx, event),
            Contract::TYPE => self.contracts.handle(ctx, event),
            Opportunity::TYPE => self.opportunities.handle(ctx, event),
            Email::TYPE => self.emails.handle(ctx, event),
            other => Err(Error::UnknownAggregateType(other.to_string())),
        }
    }
}
