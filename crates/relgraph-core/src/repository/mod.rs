//! One repository per entity type.
//!
//! Every operation takes the request context, an optional outer
//! transaction and the tenant. When the caller passes a transaction the
//! work joins it; otherwise it runs in its own session. Mutations stamp
//! `updatedAt`, except the contract technical marks, which write only their
//! own timestamp. Tenant-scoped nodes are always matched through their
//! `<Type>_<tenant>` label.

pub mod contact;
pub mod contract;
pub mod email;
pub mod flow;
pub mod flow_execution;
pub mod opportunity;
pub mod organization;
pub mod organization_filter;
pub mod satellite;
pub mod tenant;
pub mod user;

pub use contact::{ContactReadRepository, ContactSaveData, ContactWriteRepository};
pub use contract::{
    ContractCreateFields, ContractReadRepository, ContractUpdateFields, ContractWriteRepository,
};
pub use email::EmailWriteRepository;
pub use flow::{FlowExecutionSettingsRepository, FlowParticipantRepository, FlowRepository};
pub use flow_execution::{
    ExecutionFields, FlowActionExecutionReadRepository, FlowActionExecutionWriteRepository,
};
pub use opportunity::{OpportunityRepository, RenewalCreateFields, RenewalUpdateFields};
pub use organization::{
    OrganizationReadRepository, OrganizationSaveData, OrganizationWriteRepository,
};
pub use organization_filter::{OrganizationSort, OrganizationWithFiltersReadRepository};
pub use satellite::{
    ActionRecord, ActionRepository, ExternalSystemRepository, LocationRepository,
    PhoneNumberRepository, SocialRepository,
};
pub use tenant::TenantRepository;
pub use user::UserRepository;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::graph::labels::{CONTACT, CONTRACT, ORGANIZATION, USER, scoped_labels, tenant_label};
use crate::graph::props::{Props, ts};
use crate::graph::{GraphDriver, GraphTx, Node, PropertyPatch};

/// Every repository over one driver.
#[derive(Debug, Clone)]
pub struct Repositories {
    pub tenants: TenantRepository,
    pub organizations: OrganizationWriteRepository,
    pub organization_reads: OrganizationReadRepository,
    pub organization_filters: OrganizationWithFiltersReadRepository,
    pub contracts: ContractWriteRepository,
    pub contract_reads: ContractReadRepository,
    pub opportunities: OpportunityRepository,
    pub contacts: ContactWriteRepository,
    pub contact_reads: ContactReadRepository,
    pub emails: EmailWriteRepository,
    pub phone_numbers: PhoneNumberRepository,
    pub locations: LocationRepository,
    pub socials: SocialRepository,
    pub external_systems: ExternalSystemRepository,
    pub actions: ActionRepository,
    pub users: UserRepository,
    pub flows: FlowRepository,
    pub flow_participants: FlowParticipantRepository,
    pub flow_execution_settings: FlowExecutionSettingsRepository,
    pub executions: FlowActionExecutionWriteRepository,
    pub execution_reads: FlowActionExecutionReadRepository,
}

impl Repositories {
    #[must_use]
    pub fn new(driver: &GraphDriver) -> Self {
        Self {
            tenants: TenantRepository::new(driver.clone()),
            organizations: OrganizationWriteRepository::new(driver.clone()),
            organization_reads: OrganizationReadRepository::new(driver.clone()),
            organization_filters: OrganizationWithFiltersReadRepository::new(driver.clone()),
            contracts: ContractWriteRepository::new(driver.clone()),
            contract_reads: ContractReadRepository::new(driver.clone()),
            opportunities: OpportunityRepository::new(driver.clone()),
            contacts: ContactWriteRepository::new(driver.clone()),
            contact_reads: ContactReadRepository::new(driver.clone()),
            emails: EmailWriteRepository::new(driver.clone()),
            phone_numbers: PhoneNumberRepository::new(driver.clone()),
            locations: LocationRepository::new(driver.clone()),
            socials: SocialRepository::new(driver.clone()),
            external_systems: ExternalSystemRepository::new(driver.clone()),
            actions: ActionRepository::new(driver.clone()),
            users: UserRepository::new(driver.clone()),
            flows: FlowRepository::new(driver.clone()),
            flow_participants: FlowParticipantRepository::new(driver.clone()),
            flow_execution_settings: FlowExecutionSettingsRepository::new(driver.clone()),
            executions: FlowActionExecutionWriteRepository::new(driver.clone()),
            execution_reads: FlowActionExecutionReadRepository::new(driver.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Entity types that own satellites (emails, phone numbers, socials,
/// external system links, timeline actions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkedEntity {
    Contact,
    Organization,
    User,
    Contract,
}

impl LinkedEntity {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Contact => CONTACT,
            Self::Organization => ORGANIZATION,
            Self::User => USER,
            Self::Contract => CONTRACT,
        }
    }
}

/// Node id of the tenant-scoped entity `label`/`id`.
pub(crate) fn scoped_node_id(
    tx: &GraphTx<'_>,
    label: &str,
    tenant: &str,
    id: &str,
) -> Result<Option<i64>> {
    tx.find_node_id(&tenant_label(label, tenant), id)
}

pub(crate) fn scoped_node(
    tx: &GraphTx<'_>,
    label: &str,
    tenant: &str,
    id: &str,
) -> Result<Option<Node>> {
    tx.find_node(&tenant_label(label, tenant), id)
}

/// Outcome of [`ensure_scoped_node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ensured {
    pub node_id: i64,
    pub created: bool,
}

/// Find or create a tenant-scoped node carrying both labels and, on
/// creation, exactly one `belongs_rel` edge to the tenant.
///
/// Returns `None` when the tenant does not exist.
pub(crate) fn ensure_scoped_node(
    tx: &GraphTx<'_>,
    tenant: &str,
    label: &str,
    id: &str,
    belongs_rel: &str,
    on_create: &Props,
) -> Result<Option<Ensured>> {
    let Some(tenant_node) = tx.tenant_node_id(tenant)? else {
        return Ok(None);
    };
    let [generic, scoped] = scoped_labels(label, tenant);
    let (node_id, created) = tx.merge_node(&scoped, id, &[generic], on_create)?;
    if created {
        tx.create_edge(node_id, belongs_rel, tenant_node, &Props::new())?;
    }
    Ok(Some(Ensured { node_id, created }))
}

/// Patch stamping `updatedAt`.
pub(crate) fn touched(at: DateTime<Utc>) -> PropertyPatch {
    PropertyPatch::new().set("updatedAt", ts(at))
}

/// Build a property map from `(key, value)` pairs.
pub(crate) fn props<const N: usize>(pairs: [(&str, serde_json::Value); N]) -> Props {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
