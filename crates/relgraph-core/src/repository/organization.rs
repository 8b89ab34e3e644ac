use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{Ensured, ensure_scoped_node, props, scoped_node, scoped_node_id, touched};
use crate::context::Ctx;
use crate::error::Result;
use crate::graph::extract;
use crate::graph::labels::{
    ACTION, ARCHIVED_ORGANIZATION, CONTRACT, DELETED_CONTRACT, DOMAIN, LOCATION, ORGANIZATION,
    TAG, rel, tenant_label,
};
use crate::graph::props::{SOURCE_OF_TRUTH, is_empty_value, ts, ts_opt};
use crate::graph::tx::node_json;
use crate::graph::{GraphDriver, GraphTx, Node, PropertyPatch, Props};
use crate::model::contract::ContractStatus;
use crate::model::now;
use crate::model::opportunity::RenewalLikelihood;
use crate::model::organization::{
    OnboardingStatus, OrganizationFields, RenewalSummary, Touchpoint,
};
use crate::model::source::{Source, SourceRule};

/// Input of [`OrganizationWriteRepository::save`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrganizationSaveData {
    pub fields: OrganizationFields,
    pub source: Source,
    pub overwrite: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub aggregate_version: i64,
}

// ---------------------------------------------------------------------------
// Write repository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrganizationWriteRepository {
    driver: GraphDriver,
}

impl OrganizationWriteRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Ensure the organization exists, then apply the marked fields under
    /// the source-of-truth rule and the aggregate version guard.
    ///
    /// Returns `false` when the tenant is missing or the version is stale.
    #[instrument(level = "debug", skip(self, ctx, tx, data))]
    pub fn save(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        organization_id: &str,
        data: &OrganizationSaveData,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let created_at = data.created_at.unwrap_or_else(now);
            let updated_at = data.updated_at.unwrap_or(created_at);
            let mut source = data.source.clone();
            source.normalize();

            let on_create = props([
                ("source", source.source.clone().into()),
                (SOURCE_OF_TRUTH, source.source_of_truth.clone().into()),
                ("appSource", source.app_source.clone().into()),
                ("hide", false.into()),
                ("createdAt", ts(created_at)),
                ("updatedAt", ts(updated_at)),
                ("onboardingStatus", OnboardingStatus::NotApplicable.as_str().into()),
                ("onboardingStatusOrder", OnboardingStatus::NotApplicable.order().into()),
            ]);
            let Some(Ensured { node_id, .. }) = ensure_scoped_node(
                tx,
                tenant,
                ORGANIZATION,
                organization_id,
                rel::ORGANIZATION_BELONGS_TO_TENANT,
                &on_create,
            )?
            else {
                debug!("tenant not found, organization save skipped");
                return Ok(false);
            };

            let current = tx.node(node_id)?.map(|node| node.props).unwrap_or_default();
            let rule = SourceRule::for_source(&source.source, data.overwrite);
            let patch = save_patch(&current, &data.fields, rule, updated_at);
            tx.patch_node_versioned(node_id, &patch, data.aggregate_version)
        })
    }

    /// Attach a domain when no other organization of the tenant owns it.
    ///
    /// Returns whether the organization is linked with the domain.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn link_with_domain(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        organization_id: &str,
        domain: &str,
    ) -> Result<bool> {
        let domain = domain.trim().to_ascii_lowercase();
        if domain.is_empty() {
            return Ok(false);
        }
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(org) = scoped_node_id(tx, ORGANIZATION, tenant, organization_id)? else {
                return Ok(false);
            };
            let at = now();
            let (domain_node, _) = tx.merge_node::<&str>(
                DOMAIN,
                &domain,
                &[],
                &props([("domain", domain.clone().into()), ("createdAt", ts(at))]),
            )?;

            let org_label = tenant_label(ORGANIZATION, tenant);
            let records = tx.query(
                "SELECT COUNT(*) FROM edges e
                 JOIN node_labels l ON l.node_id = e.src AND l.label = :org_label
                 WHERE e.rel_type = :rel AND e.dst = :domain AND e.src <> :org",
                &[
                    (":org_label", &org_label),
                    (":rel", &rel::HAS_DOMAIN),
                    (":domain", &domain_node),
                    (":org", &org),
                ],
            )?;
            let owned_elsewhere: i64 =
                extract::single_record_first_value_as(&records)?.unwrap_or(0);
            if owned_elsewhere > 0 {
                debug!(domain = %domain, "domain already owned by another organization");
                return Ok(false);
            }

            let (_, created) = tx.merge_edge(org, rel::HAS_DOMAIN, domain_node, &Props::new())?;
            if created {
                tx.patch_node(org, &touched(at))?;
            }
            Ok(true)
        })
    }

    /// Move the organization out of the active tenant partition.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn archive(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        organization_id: &str,
        archived_at: DateTime<Utc>,
    ) -> Result<()> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(org) = scoped_node_id(tx, ORGANIZATION, tenant, organization_id)? else {
                return Ok(());
            };
            let Some(tenant_node) = tx.tenant_node_id(tenant)? else {
                return Ok(());
            };
            tx.remove_labels(org, &[tenant_label(ORGANIZATION, tenant)])?;
            tx.add_labels(org, &[tenant_label(ARCHIVED_ORGANIZATION, tenant)])?;
            tx.delete_edges(org, rel::ORGANIZATION_BELONGS_TO_TENANT, Some(tenant_node))?;
            tx.merge_edge(org, rel::ARCHIVED, tenant_node, &Props::new())?;
            tx.patch_node(
                org,
                &touched(archived_at)
                    .set("archived", true)
                    .set("archivedAt", ts(archived_at)),
            )?;
            Ok(())
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn update_onboarding_status(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        organization_id: &str,
        status: OnboardingStatus,
        comments: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let patch = touched(updated_at)
            .set("onboardingStatus", status.as_str())
            .set("onboardingStatusOrder", status.order())
            .set("onboardingComments", comments)
            .set("onboardingUpdatedAt", ts(updated_at));
        self.patch(ctx, tx, tenant, organization_id, &patch)
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn update_arr(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        organization_id: &str,
        arr: f64,
        max_arr: f64,
    ) -> Result<()> {
        let patch = touched(now())
            .set("renewalForecastArr", arr)
            .set("renewalForecastMaxArr", max_arr);
        self.patch(ctx, tx, tenant, organization_id, &patch)
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn update_renewal_summary(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        organization_id: &str,
        summary: &RenewalSummary,
    ) -> Result<()> {
        let patch = touched(now())
            .set("derivedNextRenewalAt", ts_opt(summary.next_renewal_at))
            .set(
                "derivedRenewalLikelihood",
                summary.lowest_likelihood.clone().map_or(Value::Null, Value::from),
            )
            .set(
                "derivedRenewalLikelihoodOrder",
                summary.likelihood_order.map_or(Value::Null, Value::from),
            );
        self.patch(ctx, tx, tenant, organization_id, &patch)
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn update_last_touchpoint(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        organization_id: &str,
        touchpoint: &Touchpoint,
    ) -> Result<()> {
        let patch = PropertyPatch::new()
            .set("lastTouchpointAt", ts(touchpoint.at))
            .set("lastTouchpointId", touchpoint.id.as_str())
            .set("lastTouchpointType", touchpoint.kind.as_str());
        self.patch(ctx, tx, tenant, organization_id, &patch)
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn link_with_location(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        organization_id: &str,
        location_id: &str,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let org = scoped_node_id(tx, ORGANIZATION, tenant, organization_id)?;
            let location = scoped_node_id(tx, LOCATION, tenant, location_id)?;
            let (Some(org), Some(location)) = (org, location) else {
                return Ok(false);
            };
            tx.merge_edge(org, rel::ASSOCIATED_WITH, location, &Props::new())?;
            tx.patch_node(org, &touched(now()))?;
            Ok(true)
        })
    }

    /// Tag the organization, creating the tenant tag when needed.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn add_tag(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        organization_id: &str,
        tag_id: &str,
        tag_name: &str,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(org) = scoped_node_id(tx, ORGANIZATION, tenant, organization_id)? else {
                return Ok(false);
            };
            let at = now();
            let on_create = props([("name", tag_name.into()), ("createdAt", ts(at))]);
            let Some(tag) =
                ensure_scoped_node(tx, tenant, TAG, tag_id, rel::BELONGS_TO_TENANT, &on_create)?
            else {
                return Ok(false);
            };
            tx.merge_edge(org, rel::TAGGED, tag.node_id, &props([("taggedAt", ts(at))]))?;
            tx.patch_node(org, &touched(at))?;
            Ok(true)
        })
    }

    fn patch(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        organization_id: &str,
        patch: &PropertyPatch,
    ) -> Result<()> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            if let Some(org) = scoped_node_id(tx, ORGANIZATION, tenant, organization_id)? {
                tx.patch_node(org, patch)?;
            }
            Ok(())
        })
    }
}

/// Build the field patch of [`OrganizationWriteRepository::save`].
fn save_patch(
    current: &Props,
    fields: &OrganizationFields,
    rule: SourceRule,
    updated_at: DateTime<Utc>,
) -> PropertyPatch {
    let current_sot = current
        .get(SOURCE_OF_TRUTH)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let stage_changes = fields.stage.as_ref().is_some_and(|stage| {
        rule.permits(is_empty_value(current.get("stage")), &current_sot)
            && current.get("stage").and_then(Value::as_str) != Some(stage.as_str())
    });

    let mut patch = PropertyPatch::with_rule(rule);
    for (key, value) in fields.text_fields() {
        patch = patch.merge_opt(key, value.cloned());
    }
    patch = patch
        .merge_opt("employees", fields.employees)
        .merge_opt("yearFounded", fields.year_founded)
        .merge_opt("isPublic", fields.is_public)
        .merge_opt("isCustomer", fields.is_customer)
        .merge_opt("icpFit", fields.icp_fit);

    if stage_changes {
        patch = patch.set("stageUpdatedAt", ts(updated_at));
    }
    match fields.hide {
        Some(true) => patch = patch.set("hide", true).set("hiddenAt", ts(updated_at)),
        Some(false) => patch = patch.set("hide", false).remove("hiddenAt"),
        None => {}
    }
    if let (Some(domain), Some(source)) = (&fields.enrich_domain, &fields.enrich_source) {
        patch = patch
            .set("enrichDomain", domain.as_str())
            .set("enrichSource", source.as_str())
            .set("enrichedAt", ts(updated_at));
    }
    patch.set("updatedAt", ts(updated_at)).stamp_source_of_truth()
}

// ---------------------------------------------------------------------------
// Read repository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrganizationReadRepository {
    driver: GraphDriver,
}

impl OrganizationReadRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_by_id(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        organization_id: &str,
    ) -> Result<Option<Node>> {
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            scoped_node(tx, ORGANIZATION, tenant, organization_id)
        })
    }

    /// Parent organization of a contract, active or soft-deleted.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_for_contract(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        contract_id: &str,
    ) -> Result<Option<Node>> {
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let contract = match scoped_node_id(tx, CONTRACT, tenant, contract_id)? {
                Some(node) => Some(node),
                None => scoped_node_id(tx, DELETED_CONTRACT, tenant, contract_id)?,
            };
            let Some(contract) = contract else {
                return Ok(None);
            };
            let org_label = tenant_label(ORGANIZATION, tenant);
            Ok(tx
                .in_neighbors(contract, rel::HAS_CONTRACT, Some(&org_label))?
                .into_iter()
                .next())
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_by_domain(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        domain: &str,
    ) -> Result<Option<Node>> {
        let domain = domain.trim().to_ascii_lowercase();
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let Some(domain_node) = tx.find_node_id(DOMAIN, &domain)? else {
                return Ok(None);
            };
            let org_label = tenant_label(ORGANIZATION, tenant);
            Ok(tx
                .in_neighbors(domain_node, rel::HAS_DOMAIN, Some(&org_label))?
                .into_iter()
                .next())
        })
    }

    /// Sum of `amount` and `maxAmount` over the active renewals of the
    /// organization's non-draft, non-deleted contracts.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn calculate_arr(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        organization_id: &str,
    ) -> Result<(f64, f64)> {
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let Some(org) = scoped_node_id(tx, ORGANIZATION, tenant, organization_id)? else {
                return Ok((0.0, 0.0));
            };
            let contract_label = tenant_label(CONTRACT, tenant);
            let draft = ContractStatus::Draft.as_str();
            let records = tx.query(
                "SELECT COALESCE(SUM(json_extract(op.props, '$.amount')), 0.0),
                        COALESCE(SUM(json_extract(op.props, '$.maxAmount')), 0.0)
                 FROM edges hc
                 JOIN node_labels cl ON cl.node_id = hc.dst AND cl.label = :contract_label
                 JOIN nodes c ON c.node_id = hc.dst
                 JOIN edges ar ON ar.src = c.node_id AND ar.rel_type = :active_renewal
                 JOIN nodes op ON op.node_id = ar.dst
                 WHERE hc.src = :org AND hc.rel_type = :has_contract
                   AND COALESCE(json_extract(c.props, '$.status'), :draft) <> :draft",
                &[
                    (":contract_label", &contract_label),
                    (":active_renewal", &rel::ACTIVE_RENEWAL),
                    (":org", &org),
                    (":has_contract", &rel::HAS_CONTRACT),
                    (":draft", &draft),
                ],
            )?;
            let Some(record) = records.first() else {
                return Ok((0.0, 0.0));
            };
            Ok((record.get(0)?, record.get(1)?))
        })
    }

    /// Earliest renewal date and lowest likelihood among the active
    /// renewals of the organization's live contracts.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn renewal_summary(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        organization_id: &str,
    ) -> Result<RenewalSummary> {
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let Some(org) = scoped_node_id(tx, ORGANIZATION, tenant, organization_id)? else {
                return Ok(RenewalSummary::default());
            };
            let contract_label = tenant_label(CONTRACT, tenant);
            let live = ContractStatus::Live.as_str();
            let records = tx.query(
                concat!(
                    "SELECT ",
                    node_json!("op"),
                    " FROM edges hc
                     JOIN node_labels cl ON cl.node_id = hc.dst AND cl.label = :contract_label
                     JOIN nodes c ON c.node_id = hc.dst
                     JOIN edges ar ON ar.src = c.node_id AND ar.rel_type = :active_renewal
                     JOIN nodes op ON op.node_id = ar.dst
                     WHERE hc.src = :org AND hc.rel_type = :has_contract
                       AND json_extract(c.props, '$.status') = :live
                     ORDER BY op.node_id"
                ),
                &[
                    (":contract_label", &contract_label),
                    (":active_renewal", &rel::ACTIVE_RENEWAL),
                    (":org", &org),
                    (":has_contract", &rel::HAS_CONTRACT),
                    (":live", &live),
                ],
            )?;
            let renewals = extract::all_records_first_value_as_node_list(&records)?;
            Ok(summarize_renewals(&renewals))
        })
    }

    /// Most recent timeline action on the organization.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn last_touchpoint(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        organization_id: &str,
    ) -> Result<Option<Touchpoint>> {
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let Some(org) = scoped_node_id(tx, ORGANIZATION, tenant, organization_id)? else {
                return Ok(None);
            };
            let action_label = tenant_label(ACTION, tenant);
            let records = tx.query(
                concat!(
                    "SELECT ",
                    node_json!("a"),
                    " FROM edges e
                     JOIN nodes a ON a.node_id = e.src
                     JOIN node_labels l ON l.node_id = a.node_id AND l.label = :action_label
                     WHERE e.dst = :org AND e.rel_type = :action_on
                     ORDER BY json_extract(a.props, '$.createdAt') DESC, a.node_id DESC
                     LIMIT 1"
                ),
                &[
                    (":action_label", &action_label),
                    (":org", &org),
                    (":action_on", &rel::ACTION_ON),
                ],
            )?;
            let action = extract::first_record_first_value_as_node_or_none(&records)?;
            Ok(action.and_then(|action| {
                Some(Touchpoint {
                    at: action.time("createdAt")?,
                    id: action.id().to_string(),
                    kind: action.string("actionType"),
                })
            }))
        })
    }
}

fn summarize_renewals(renewals: &[Node]) -> RenewalSummary {
    let next_renewal_at = renewals
        .iter()
        .filter_map(|op| op.time("renewedAt"))
        .min();
    let lowest = renewals
        .iter()
        .filter_map(|op| op.str("renewalLikelihood")?.parse::<RenewalLikelihood>().ok())
        .min_by_key(|likelihood| likelihood.rank());
    RenewalSummary {
        next_renewal_at,
        lowest_likelihood: lowest.map(|l| l.as_str().to_string()),
        likelihood_order: lowest.map(RenewalLikelihood::rank),
    }
}
