use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use super::{ensure_scoped_node, props, scoped_node, scoped_node_id, touched};
use crate::context::Ctx;
use crate::error::Result;
use crate::graph::extract;
use crate::graph::labels::{
    CONTRACT, DELETED_CONTRACT, ORGANIZATION, USER, rel, scoped_labels, tenant_label,
};
use crate::graph::props::{SOURCE_OF_TRUTH, to_props, ts};
use crate::graph::{GraphDriver, GraphTx, Node, PropertyPatch};
use crate::model::contract::{ContractFields, ContractStatus, DEFAULT_CURRENCY};
use crate::model::now;
use crate::model::opportunity::InternalStage;
use crate::model::source::{Source, SourceRule};

/// Input of [`ContractWriteRepository::create_for_organization`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractCreateFields {
    pub organization_id: String,
    pub created_by_user_id: String,
    pub fields: ContractFields,
    pub source: Source,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub aggregate_version: i64,
}

/// Input of [`ContractWriteRepository::update_contract`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractUpdateFields {
    pub fields: ContractFields,
    pub source: String,
    pub overwrite: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub aggregate_version: i64,
}

/// Technical timestamps marking work requested from downstream workers.
pub mod tech {
    pub const INVOICING_STARTED_AT: &str = "techInvoicingStartedAt";
    pub const OFF_CYCLE_INVOICING_STARTED_AT: &str = "techOffCycleInvoicingStartedAt";
    pub const NEXT_PREVIEW_INVOICE_REQUESTED_AT: &str = "techNextPreviewInvoiceRequestedAt";
    pub const STATUS_RENEWAL_REQUESTED_AT: &str = "techStatusRenewalRequestedAt";
    pub const ROLLOUT_RENEWAL_REQUESTED_AT: &str = "techRolloutRenewalRequestedAt";
}

// ---------------------------------------------------------------------------
// Write repository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ContractWriteRepository {
    driver: GraphDriver,
}

impl ContractWriteRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Create a contract under an organization.
    ///
    /// The currency defaults to USD. A `CREATED_BY` edge is added only when
    /// the user exists in the same tenant. Returns `false` when the
    /// organization is missing or the version is stale.
    #[instrument(level = "debug", skip(self, ctx, tx, data), fields(organization_id = %data.organization_id))]
    pub fn create_for_organization(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
        data: &ContractCreateFields,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(org) = scoped_node_id(tx, ORGANIZATION, tenant, &data.organization_id)? else {
                debug!("organization not found, contract create skipped");
                return Ok(false);
            };
            let created_at = data.created_at.unwrap_or_else(now);
            let updated_at = data.updated_at.unwrap_or(created_at);
            let mut source = data.source.clone();
            source.normalize();

            let on_create = props([
                ("source", source.source.clone().into()),
                (SOURCE_OF_TRUTH, source.source_of_truth.clone().into()),
                ("appSource", source.app_source.clone().into()),
                ("createdAt", ts(created_at)),
                ("updatedAt", ts(updated_at)),
            ]);
            let Some(contract) = ensure_scoped_node(
                tx,
                tenant,
                CONTRACT,
                contract_id,
                rel::CONTRACT_BELONGS_TO_TENANT,
                &on_create,
            )?
            else {
                return Ok(false);
            };

            let currency = data
                .fields
                .currency
                .clone()
                .filter(|currency| !currency.is_empty())
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
            let patch = PropertyPatch::new()
                .merge_props(to_props(&data.fields)?)
                .set("currency", currency)
                .set("updatedAt", ts(updated_at));
            let applied = tx.patch_node_versioned(contract.node_id, &patch, data.aggregate_version)?;

            tx.merge_edge(org, rel::HAS_CONTRACT, contract.node_id, &props([]))?;
            if !data.created_by_user_id.is_empty() {
                match scoped_node_id(tx, USER, tenant, &data.created_by_user_id)? {
                    Some(user) => {
                        tx.merge_edge(contract.node_id, rel::CREATED_BY, user, &props([]))?;
                    }
                    None => debug!(user_id = %data.created_by_user_id, "creator not found in tenant"),
                }
            }
            Ok(applied)
        })
    }

    /// Sparse update under the source-of-truth rule and the version guard.
    #[instrument(level = "debug", skip(self, ctx, tx, data))]
    pub fn update_contract(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
        data: &ContractUpdateFields,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(contract) = scoped_node_id(tx, CONTRACT, tenant, contract_id)? else {
                return Ok(false);
            };
            let rule = SourceRule::for_source(&data.source, data.overwrite);
            let patch = PropertyPatch::with_rule(rule)
                .merge_props(to_props(&data.fields)?)
                .set("updatedAt", ts(data.updated_at.unwrap_or_else(now)))
                .stamp_source_of_truth();
            tx.patch_node_versioned(contract, &patch, data.aggregate_version)
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn update_status(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
        status: ContractStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let patch = touched(updated_at).set("status", status.as_str());
        self.patch(ctx, tx, tenant, contract_id, &patch)
    }

    /// Move every active renewal to the suspended edge.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn suspend_active_renewal_opportunity(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
    ) -> Result<()> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(contract) = scoped_node_id(tx, CONTRACT, tenant, contract_id)? else {
                return Ok(());
            };
            let at = now();
            for edge in tx.out_edges(contract, rel::ACTIVE_RENEWAL)? {
                tx.delete_edges(contract, rel::ACTIVE_RENEWAL, Some(edge.dst))?;
                tx.merge_edge(contract, rel::SUSPENDED_RENEWAL, edge.dst, &props([]))?;
                tx.patch_node(
                    edge.dst,
                    &touched(at).set("internalStage", InternalStage::Suspended.as_str()),
                )?;
            }
            Ok(())
        })
    }

    /// Reactivate the most recently suspended renewal unless the contract
    /// already has an active one.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn activate_suspended_renewal_opportunity(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
    ) -> Result<()> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(contract) = scoped_node_id(tx, CONTRACT, tenant, contract_id)? else {
                return Ok(());
            };
            if !tx.out_edges(contract, rel::ACTIVE_RENEWAL)?.is_empty() {
                debug!("contract already has an active renewal");
                return Ok(());
            }
            let Some(edge) = tx.out_edges(contract, rel::SUSPENDED_RENEWAL)?.pop() else {
                return Ok(());
            };
            tx.delete_edges(contract, rel::SUSPENDED_RENEWAL, Some(edge.dst))?;
            tx.merge_edge(contract, rel::ACTIVE_RENEWAL, edge.dst, &props([]))?;
            tx.patch_node(
                edge.dst,
                &touched(now()).set("internalStage", InternalStage::Open.as_str()),
            )?;
            Ok(())
        })
    }

    pub fn mark_cycle_invoicing_requested(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.mark(ctx, tx, tenant, contract_id, tech::INVOICING_STARTED_AT, at)
    }

    pub fn mark_off_cycle_invoicing_requested(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.mark(ctx, tx, tenant, contract_id, tech::OFF_CYCLE_INVOICING_STARTED_AT, at)
    }

    pub fn mark_next_preview_invoicing_requested(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.mark(ctx, tx, tenant, contract_id, tech::NEXT_PREVIEW_INVOICE_REQUESTED_AT, at)
    }

    pub fn mark_status_renewal_requested(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.mark(ctx, tx, tenant, contract_id, tech::STATUS_RENEWAL_REQUESTED_AT, at)
    }

    pub fn mark_rollout_renewal_requested(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.mark(ctx, tx, tenant, contract_id, tech::ROLLOUT_RENEWAL_REQUESTED_AT, at)
    }

    /// Swap `Contract[_tenant]` for `DeletedContract[_tenant]`.
    ///
    /// Returns `false` when no active contract matched.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn soft_delete(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(contract) = scoped_node_id(tx, CONTRACT, tenant, contract_id)? else {
                return Ok(false);
            };
            tx.remove_labels(contract, &scoped_labels(CONTRACT, tenant))?;
            tx.add_labels(contract, &scoped_labels(DELETED_CONTRACT, tenant))?;
            tx.patch_node(contract, &touched(deleted_at))?;
            Ok(true)
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn set_ltv(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
        ltv: f64,
    ) -> Result<()> {
        let patch = touched(now()).set("ltv", ltv);
        self.patch(ctx, tx, tenant, contract_id, &patch)
    }

    /// Record that the first transition to LIVE already notified the
    /// organization.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn set_triggered_onboarding_status_change(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
    ) -> Result<()> {
        let patch = touched(now()).set("triggeredOnboardingStatusChange", true);
        self.patch(ctx, tx, tenant, contract_id, &patch)
    }

    /// Single technical timestamp write; `updatedAt` is left alone.
    fn mark(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
        key: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        debug!(contract_id, key, "technical timestamp requested");
        self.patch(ctx, tx, tenant, contract_id, &PropertyPatch::new().set(key, ts(at)))
    }

    fn patch(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
        patch: &PropertyPatch,
    ) -> Result<()> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            if let Some(contract) = scoped_node_id(tx, CONTRACT, tenant, contract_id)? {
                tx.patch_node(contract, patch)?;
            }
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Read repository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ContractReadRepository {
    driver: GraphDriver,
}

impl ContractReadRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Active (not soft-deleted) contract.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_by_id(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
    ) -> Result<Option<Node>> {
        self.driver
            .execute_read_in_transaction(ctx, tx, |tx| scoped_node(tx, CONTRACT, tenant, contract_id))
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_for_organization(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        organization_id: &str,
    ) -> Result<Vec<Node>> {
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let Some(org) = scoped_node_id(tx, ORGANIZATION, tenant, organization_id)? else {
                return Ok(Vec::new());
            };
            let contract_label = tenant_label(CONTRACT, tenant);
            tx.out_neighbors(org, rel::HAS_CONTRACT, Some(&contract_label))
        })
    }

    /// Number of the organization's LIVE contracts.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn count_active_for_organization(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        organization_id: &str,
    ) -> Result<i64> {
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let Some(org) = scoped_node_id(tx, ORGANIZATION, tenant, organization_id)? else {
                return Ok(0);
            };
            let contract_label = tenant_label(CONTRACT, tenant);
            let live = ContractStatus::Live.as_str();
            let records = tx.query(
                "SELECT COUNT(*) FROM edges e
                 JOIN node_labels l ON l.node_id = e.dst AND l.label = :contract_label
                 JOIN nodes c ON c.node_id = e.dst
                 WHERE e.src = :org AND e.rel_type = :has_contract
                   AND json_extract(c.props, '$.status') = :live",
                &[
                    (":contract_label", &contract_label),
                    (":org", &org),
                    (":has_contract", &rel::HAS_CONTRACT),
                    (":live", &live),
                ],
            )?;
            Ok(extract::single_record_first_value_as(&records)?.unwrap_or(0))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::contract::BillingCycle;
    use crate::repository::{
        OrganizationSaveData, OrganizationWriteRepository, TenantRepository, UserRepository,
    };

    fn setup() -> (GraphDriver, ContractWriteRepository, ContractReadRepository, Ctx) {
        let driver = GraphDriver::open_in_memory().expect("open graph");
        let ctx = Ctx::background();
        TenantRepository::new(driver.clone()).create(&ctx, None, "ziggy").expect("tenant");
        OrganizationWriteRepository::new(driver.clone())
            .save(&ctx, None, "ziggy", "o1", &OrganizationSaveData::default())
            .expect("org");
        let write = ContractWriteRepository::new(driver.clone());
        let read = ContractReadRepository::new(driver.clone());
        (driver, write, read, ctx)
    }

    fn create(write: &ContractWriteRepository, ctx: &Ctx, id: &str, user: &str) -> bool {
        let data = ContractCreateFields {
            organization_id: "o1".into(),
            created_by_user_id: user.into(),
            fields: ContractFields {
                name: Some("Annual".into()),
                billing_cycle: Some(BillingCycle::Annually),
                ..ContractFields::default()
            },
            aggregate_version: 1,
            ..ContractCreateFields::default()
        };
        write.create_for_organization(ctx, None, "ziggy", id, &data).expect("create")
    }

    #[test]
    fn create_defaults_currency_and_links_organization() {
        let (driver, write, read, ctx) = setup();
        assert!(create(&write, &ctx, "c1", ""));

        let contract = read.get_by_id(&ctx, None, "ziggy", "c1").expect("get").expect("contract");
        assert_eq!(contract.str("currency"), Some("USD"));
        assert_eq!(contract.str("billingCycle"), Some("ANNUALLY"));
        assert_eq!(contract.i64("aggregateVersion"), Some(1));
        let (has_contract, created_by) = driver
            .execute_read_in_transaction(&ctx, None, |tx| {
                Ok((tx.count_edges(rel::HAS_CONTRACT)?, tx.count_edges(rel::CREATED_BY)?))
            })
            .expect("counts");
        assert_eq!((has_contract, created_by), (1, 0));
    }

    #[test]
    fn created_by_requires_user_in_tenant() {
        let (driver, write, _, ctx) = setup();
        UserRepository::new(driver.clone())
            .create(&ctx, None, "ziggy", "u1", "Jane", now())
            .expect("user");
        create(&write, &ctx, "c1", "u1");
        create(&write, &ctx, "c2", "ghost");
        let created_by = driver
            .execute_read_in_transaction(&ctx, None, |tx| tx.count_edges(rel::CREATED_BY))
            .expect("count");
        assert_eq!(created_by, 1);
    }

    #[test]
    fn create_without_organization_is_skipped() {
        let (_, write, read, ctx) = setup();
        let data = ContractCreateFields {
            organization_id: "missing".into(),
            ..ContractCreateFields::default()
        };
        assert!(!write.create_for_organization(&ctx, None, "ziggy", "c1", &data).expect("create"));
        assert!(read.get_by_id(&ctx, None, "ziggy", "c1").expect("get").is_none());
    }

    #[test]
    fn update_is_sparse_and_version_guarded() {
        let (_, write, read, ctx) = setup();
        create(&write, &ctx, "c1", "");
        let update = |version: i64, name: &str| ContractUpdateFields {
            fields: ContractFields {
                name: Some(name.into()),
                ..ContractFields::default()
            },
            aggregate_version: version,
            ..ContractUpdateFields::default()
        };
        assert!(write.update_contract(&ctx, None, "ziggy", "c1", &update(3, "Renamed")).expect("update"));
        assert!(!write.update_contract(&ctx, None, "ziggy", "c1", &update(2, "Stale")).expect("update"));

        let contract = read.get_by_id(&ctx, None, "ziggy", "c1").expect("get").expect("contract");
        assert_eq!(contract.str("name"), Some("Renamed"));
        assert_eq!(contract.str("billingCycle"), Some("ANNUALLY"));
        assert_eq!(contract.i64("aggregateVersion"), Some(3));
    }

    #[test]
    fn soft_delete_swaps_labels() {
        let (driver, write, read, ctx) = setup();
        create(&write, &ctx, "c1", "");
        create(&write, &ctx, "c2", "");
        assert!(write.soft_delete(&ctx, None, "ziggy", "c1", now()).expect("delete"));
        assert!(!write.soft_delete(&ctx, None, "ziggy", "c1", now()).expect("again"));

        assert!(read.get_by_id(&ctx, None, "ziggy", "c1").expect("get").is_none());
        let counts = driver
            .execute_read_in_transaction(&ctx, None, |tx| {
                Ok([
                    tx.count_label("Contract")?,
                    tx.count_label("Contract_ziggy")?,
                    tx.count_label("DeletedContract")?,
                    tx.count_label("DeletedContract_ziggy")?,
                ])
            })
            .expect("counts");
        assert_eq!(counts, [1, 1, 1, 1]);
    }

    #[test]
    fn technical_marks_do_not_touch_updated_at() {
        let (_, write, read, ctx) = setup();
        create(&write, &ctx, "c1", "");
        let before = read.get_by_id(&ctx, None, "ziggy", "c1").expect("get").expect("contract");
        write
            .mark_rollout_renewal_requested(&ctx, None, "ziggy", "c1", now())
            .expect("mark");
        let after = read.get_by_id(&ctx, None, "ziggy", "c1").expect("get").expect("contract");
        assert!(after.i64(tech::ROLLOUT_RENEWAL_REQUESTED_AT).is_some());
        assert_eq!(after.i64("updatedAt"), before.i64("updatedAt"));
    }

    #[test]
    fn live_contracts_are_counted() {
        let (_, write, read, ctx) = setup();
        create(&write, &ctx, "c1", "");
        create(&write, &ctx, "c2", "");
        write
            .update_status(&ctx, None, "ziggy", "c1", ContractStatus::Live, now())
            .expect("status");
        assert_eq!(read.count_active_for_organization(&ctx, None, "ziggy", "o1").expect("count"), 1);
        assert_eq!(read.get_for_organization(&ctx, None, "ziggy", "o1").expect("list").len(), 2);
    }
}
