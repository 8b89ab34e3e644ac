use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use super::{ensure_scoped_node, props, scoped_node, scoped_node_id};
use crate::context::Ctx;
use crate::error::Result;
use crate::graph::extract;
use crate::graph::labels::{CONTRACT, OPPORTUNITY, RENEWAL_OPPORTUNITY, rel, tenant_label};
use crate::graph::props::{SOURCE_OF_TRUTH, to_props, ts};
use crate::graph::{GraphDriver, GraphTx, Node, PropertyPatch};
use crate::model::now;
use crate::model::opportunity::{InternalStage, InternalType, RenewalFields};
use crate::model::source::{Source, SourceRule};

/// Input of [`OpportunityRepository::create_renewal`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenewalCreateFields {
    pub contract_id: String,
    pub fields: RenewalFields,
    pub source: Source,
    pub created_at: Option<DateTime<Utc>>,
    pub aggregate_version: i64,
}

/// Input of [`OpportunityRepository::update_renewal`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenewalUpdateFields {
    pub fields: RenewalFields,
    pub source: String,
    pub overwrite: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub aggregate_version: i64,
}

#[derive(Debug, Clone)]
pub struct OpportunityRepository {
    driver: GraphDriver,
}

impl OpportunityRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Create a renewal opportunity and make it the contract's active
    /// renewal.
    ///
    /// Refused (`false`) when the contract is missing or already has a
    /// different active renewal.
    #[instrument(level = "debug", skip(self, ctx, tx, data), fields(contract_id = %data.contract_id))]
    pub fn create_renewal(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        opportunity_id: &str,
        data: &RenewalCreateFields,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(contract) = scoped_node_id(tx, CONTRACT, tenant, &data.contract_id)? else {
                debug!("contract not found, renewal create skipped");
                return Ok(false);
            };
            let existing = scoped_node_id(tx, OPPORTUNITY, tenant, opportunity_id)?;
            let other_active = tx
                .out_edges(contract, rel::ACTIVE_RENEWAL)?
                .iter()
                .any(|edge| Some(edge.dst) != existing);
            if other_active {
                debug!("contract already has an active renewal");
                return Ok(false);
            }

            let created_at = data.created_at.unwrap_or_else(now);
            let mut source = data.source.clone();
            source.normalize();
            let on_create = props([
                ("source", source.source.clone().into()),
                (SOURCE_OF_TRUTH, source.source_of_truth.clone().into()),
                ("appSource", source.app_source.clone().into()),
                ("createdAt", ts(created_at)),
                ("updatedAt", ts(created_at)),
                ("internalType", InternalType::Renewal.as_str().into()),
                ("internalStage", InternalStage::Open.as_str().into()),
            ]);
            let Some(opportunity) = ensure_scoped_node(
                tx,
                tenant,
                OPPORTUNITY,
                opportunity_id,
                rel::BELONGS_TO_TENANT,
                &on_create,
            )?
            else {
                return Ok(false);
            };
            tx.add_labels(opportunity.node_id, &[RENEWAL_OPPORTUNITY])?;

            let patch = PropertyPatch::new().merge_props(to_props(&data.fields)?);
            let applied =
                tx.patch_node_versioned(opportunity.node_id, &patch, data.aggregate_version)?;
            tx.merge_edge(contract, rel::HAS_OPPORTUNITY, opportunity.node_id, &props([]))?;
            tx.merge_edge(contract, rel::ACTIVE_RENEWAL, opportunity.node_id, &props([]))?;
            Ok(applied)
        })
    }

    /// Sparse update under the source-of-truth rule and the version guard.
    #[instrument(level = "debug", skip(self, ctx, tx, data))]
    pub fn update_renewal(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        opportunity_id: &str,
        data: &RenewalUpdateFields,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(opportunity) = scoped_node_id(tx, OPPORTUNITY, tenant, opportunity_id)? else {
                return Ok(false);
            };
            let rule = SourceRule::for_source(&data.source, data.overwrite);
            let patch = PropertyPatch::with_rule(rule)
                .merge_props(to_props(&data.fields)?)
                .set("updatedAt", ts(data.updated_at.unwrap_or_else(now)))
                .stamp_source_of_truth();
            tx.patch_node_versioned(opportunity, &patch, data.aggregate_version)
        })
    }

    /// Close the renewal as won or lost and drop its active edge.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn close_renewal(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        opportunity_id: &str,
        won: bool,
        closed_at: DateTime<Utc>,
        aggregate_version: i64,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(opportunity) = scoped_node_id(tx, OPPORTUNITY, tenant, opportunity_id)? else {
                return Ok(false);
            };
            let stage = if won {
                InternalStage::ClosedWon
            } else {
                InternalStage::ClosedLost
            };
            let patch = PropertyPatch::new()
                .set("internalStage", stage.as_str())
                .set("closedAt", ts(closed_at))
                .set("updatedAt", ts(closed_at));
            if !tx.patch_node_versioned(opportunity, &patch, aggregate_version)? {
                return Ok(false);
            }
            for edge in tx.in_edges(opportunity, rel::ACTIVE_RENEWAL)? {
                tx.delete_edges(edge.src, rel::ACTIVE_RENEWAL, Some(opportunity))?;
            }
            Ok(true)
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_by_id(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        opportunity_id: &str,
    ) -> Result<Option<Node>> {
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            scoped_node(tx, OPPORTUNITY, tenant, opportunity_id)
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_active_renewal_for_contract(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
    ) -> Result<Option<Node>> {
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let Some(contract) = scoped_node_id(tx, CONTRACT, tenant, contract_id)? else {
                return Ok(None);
            };
            let label = tenant_label(OPPORTUNITY, tenant);
            Ok(tx
                .out_neighbors(contract, rel::ACTIVE_RENEWAL, Some(&label))?
                .into_iter()
                .next())
        })
    }

    /// Contract owning the opportunity, active or soft-deleted.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_contract_for_opportunity(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        opportunity_id: &str,
    ) -> Result<Option<Node>> {
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let Some(opportunity) = scoped_node_id(tx, OPPORTUNITY, tenant, opportunity_id)? else {
                return Ok(None);
            };
            Ok(tx
                .in_neighbors(opportunity, rel::HAS_OPPORTUNITY, None)?
                .into_iter()
                .next())
        })
    }

    /// Sum of `amount` over the contract's renewals closed as won.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn closed_won_amount_for_contract(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
    ) -> Result<f64> {
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let Some(contract) = scoped_node_id(tx, CONTRACT, tenant, contract_id)? else {
                return Ok(0.0);
            };
            let won = InternalStage::ClosedWon.as_str();
            let records = tx.query(
                "SELECT COALESCE(SUM(json_extract(op.props, '$.amount')), 0.0)
                 FROM edges e JOIN nodes op ON op.node_id = e.dst
                 WHERE e.src = :contract AND e.rel_type = :has_opportunity
                   AND json_extract(op.props, '$.internalStage') = :won",
                &[
                    (":contract", &contract),
                    (":has_opportunity", &rel::HAS_OPPORTUNITY),
                    (":won", &won),
                ],
            )?;
            Ok(extract::single_record_first_value_as(&records)?.unwrap_or(0.0))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::opportunity::RenewalLikelihood;
    use crate::repository::{
        ContractCreateFields, ContractWriteRepository, OrganizationSaveData,
        OrganizationWriteRepository, TenantRepository,
    };

    fn setup() -> (GraphDriver, OpportunityRepository, Ctx) {
        let driver = GraphDriver::open_in_memory().expect("open graph");
        let ctx = Ctx::background();
        TenantRepository::new(driver.clone()).create(&ctx, None, "ziggy").expect("tenant");
        OrganizationWriteRepository::new(driver.clone())
            .save(&ctx, None, "ziggy", "o1", &OrganizationSaveData::default())
            .expect("org");
        let data = ContractCreateFields {
            organization_id: "o1".into(),
            ..ContractCreateFields::default()
        };
        ContractWriteRepository::new(driver.clone())
            .create_for_organization(&ctx, None, "ziggy", "c1", &data)
            .expect("contract");
        (driver.clone(), OpportunityRepository::new(driver), ctx)
    }

    fn renewal(amount: f64) -> RenewalCreateFields {
        RenewalCreateFields {
            contract_id: "c1".into(),
            fields: RenewalFields {
                amount: Some(amount),
                max_amount: Some(amount * 2.0),
                renewal_likelihood: Some(RenewalLikelihood::High),
                ..RenewalFields::default()
            },
            aggregate_version: 1,
            ..RenewalCreateFields::default()
        }
    }

    #[test]
    fn only_one_active_renewal_per_contract() {
        let (driver, repo, ctx) = setup();
        assert!(repo.create_renewal(&ctx, None, "ziggy", "op1", &renewal(100.0)).expect("create"));
        assert!(!repo.create_renewal(&ctx, None, "ziggy", "op2", &renewal(50.0)).expect("create"));

        let active = repo
            .get_active_renewal_for_contract(&ctx, None, "ziggy", "c1")
            .expect("get")
            .expect("active");
        assert_eq!(active.id(), "op1");
        assert!(active.has_label(RENEWAL_OPPORTUNITY));
        assert_eq!(active.str("internalStage"), Some("OPEN"));
        assert_eq!(active.str("renewalLikelihood"), Some("HIGH"));
        let edges = driver
            .execute_read_in_transaction(&ctx, None, |tx| tx.count_edges(rel::ACTIVE_RENEWAL))
            .expect("count");
        assert_eq!(edges, 1);
    }

    #[test]
    fn closing_drops_active_edge_and_counts_won_amount() {
        let (_, repo, ctx) = setup();
        repo.create_renewal(&ctx, None, "ziggy", "op1", &renewal(100.0)).expect("create");
        assert!(repo.close_renewal(&ctx, None, "ziggy", "op1", true, now(), 2).expect("close"));
        assert!(repo.get_active_renewal_for_contract(&ctx, None, "ziggy", "c1").expect("get").is_none());
        let won = repo.closed_won_amount_for_contract(&ctx, None, "ziggy", "c1").expect("sum");
        assert!((won - 100.0).abs() < f64::EPSILON);

        assert!(repo.create_renewal(&ctx, None, "ziggy", "op2", &renewal(120.0)).expect("next"));
        let contract = repo
            .get_contract_for_opportunity(&ctx, None, "ziggy", "op2")
            .expect("get")
            .expect("contract");
        assert_eq!(contract.id(), "c1");
    }

    #[test]
    fn foreign_update_keeps_owned_values() {
        let (_, repo, ctx) = setup();
        repo.create_renewal(&ctx, None, "ziggy", "op1", &renewal(100.0)).expect("create");
        let update = RenewalUpdateFields {
            fields: RenewalFields {
                amount: Some(1.0),
                comments: Some("from crm".into()),
                ..RenewalFields::default()
            },
            source: "hubspot".into(),
            aggregate_version: 2,
            ..RenewalUpdateFields::default()
        };
        assert!(repo.update_renewal(&ctx, None, "ziggy", "op1", &update).expect("update"));
        let op = repo.get_by_id(&ctx, None, "ziggy", "op1").expect("get").expect("op");
        assert!(op.f64("amount").is_some_and(|amount| (amount - 100.0).abs() < f64::EPSILON));
        assert_eq!(op.str("comments"), Some("from crm"));
    }
}
