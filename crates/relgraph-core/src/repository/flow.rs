use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use super::{ensure_scoped_node, props, scoped_node, scoped_node_id, touched};
use crate::context::Ctx;
use crate::error::Result;
use crate::graph::extract;
use crate::graph::labels::{
    FLOW, FLOW_ACTION, FLOW_EXECUTION_SETTINGS, FLOW_PARTICIPANT, rel, tenant_label,
};
use crate::graph::props::ts;
use crate::graph::tx::node_json;
use crate::graph::{GraphDriver, GraphTx, Node, Props};
use crate::model::flow::{FlowActionType, FlowParticipantStatus, FlowStatus};

/// Node with `label` whose `(flowId, entityId, entityType)` properties match.
fn find_keyed(
    tx: &GraphTx<'_>,
    label: &str,
    flow_id: &str,
    entity_id: &str,
    entity_type: &str,
) -> Result<Option<Node>> {
    let records = tx.query(
        concat!(
            "SELECT ",
            node_json!("n"),
            " FROM nodes n JOIN node_labels l ON l.node_id = n.node_id AND l.label = :label
             WHERE json_extract(n.props, '$.flowId') = :flow_id
               AND json_extract(n.props, '$.entityId') = :entity_id
               AND json_extract(n.props, '$.entityType') = :entity_type
             ORDER BY n.node_id LIMIT 1"
        ),
        &[
            (":label", &label),
            (":flow_id", &flow_id),
            (":entity_id", &entity_id),
            (":entity_type", &entity_type),
        ],
    )?;
    extract::first_record_first_value_as_node_or_none(&records)
}

// ---------------------------------------------------------------------------
// Flows and actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FlowRepository {
    driver: GraphDriver,
}

impl FlowRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Ensure the flow exists; an existing flow keeps its status.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn merge(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        flow_id: &str,
        name: &str,
        status: FlowStatus,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let on_create = props([
                ("name", name.into()),
                ("status", status.as_str().into()),
                ("createdAt", ts(created_at)),
                ("updatedAt", ts(created_at)),
            ]);
            let ensured =
                ensure_scoped_node(tx, tenant, FLOW, flow_id, rel::BELONGS_TO_TENANT, &on_create)?;
            Ok(ensured.is_some_and(|ensured| ensured.created))
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn update_status(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        flow_id: &str,
        status: FlowStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(flow) = scoped_node_id(tx, FLOW, tenant, flow_id)? else {
                return Ok(false);
            };
            tx.patch_node(flow, &touched(updated_at).set("status", status.as_str()))?;
            Ok(true)
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_by_id(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        flow_id: &str,
    ) -> Result<Option<Node>> {
        self.driver
            .execute_read_in_transaction(ctx, tx, |tx| scoped_node(tx, FLOW, tenant, flow_id))
    }

    /// Ensure the action exists under the flow.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn merge_action(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        flow_id: &str,
        action_id: &str,
        action_type: FlowActionType,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(flow) = scoped_node_id(tx, FLOW, tenant, flow_id)? else {
                debug!("flow not found, action merge skipped");
                return Ok(false);
            };
            let on_create = props([
                ("action", action_type.as_str().into()),
                ("createdAt", ts(created_at)),
                ("updatedAt", ts(created_at)),
            ]);
            let Some(action) = ensure_scoped_node(
                tx,
                tenant,
                FLOW_ACTION,
                action_id,
                rel::BELONGS_TO_TENANT,
                &on_create,
            )?
            else {
                return Ok(false);
            };
            tx.merge_edge(flow, rel::HAS, action.node_id, &Props::new())?;
            Ok(action.created)
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_actions(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        flow_id: &str,
    ) -> Result<Vec<Node>> {
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let Some(flow) = scoped_node_id(tx, FLOW, tenant, flow_id)? else {
                return Ok(Vec::new());
            };
            let label = tenant_label(FLOW_ACTION, tenant);
            tx.out_neighbors(flow, rel::HAS, Some(&label))
        })
    }
}

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FlowParticipantRepository {
    driver: GraphDriver,
}

impl FlowParticipantRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Enroll the entity in the flow. An entity is enrolled at most once
    /// per flow; the id of the existing participant is returned then.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn merge(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        flow_id: &str,
        participant_id: &str,
        entity_id: &str,
        entity_type: &str,
        status: FlowParticipantStatus,
        created_at: DateTime<Utc>,
    ) -> Result<Option<String>> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(flow) = scoped_node_id(tx, FLOW, tenant, flow_id)? else {
                return Ok(None);
            };
            let label = tenant_label(FLOW_PARTICIPANT, tenant);
            if let Some(existing) = find_keyed(tx, &label, flow_id, entity_id, entity_type)? {
                return Ok(Some(existing.id().to_string()));
            }
            let on_create = props([
                ("flowId", flow_id.into()),
                ("entityId", entity_id.into()),
                ("entityType", entity_type.into()),
                ("status", status.as_str().into()),
                ("createdAt", ts(created_at)),
                ("updatedAt", ts(created_at)),
            ]);
            let Some(participant) = ensure_scoped_node(
                tx,
                tenant,
                FLOW_PARTICIPANT,
                participant_id,
                rel::BELONGS_TO_TENANT,
                &on_create,
            )?
            else {
                return Ok(None);
            };
            tx.merge_edge(flow, rel::HAS, participant.node_id, &Props::new())?;
            Ok(Some(participant_id.to_string()))
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_by_entity(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        flow_id: &str,
        entity_id: &str,
        entity_type: &str,
    ) -> Result<Option<Node>> {
        let label = tenant_label(FLOW_PARTICIPANT, tenant);
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            find_keyed(tx, &label, flow_id, entity_id, entity_type)
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn update_status(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        participant_id: &str,
        status: FlowParticipantStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(participant) = scoped_node_id(tx, FLOW_PARTICIPANT, tenant, participant_id)?
            else {
                return Ok(false);
            };
            tx.patch_node(participant, &touched(updated_at).set("status", status.as_str()))?;
            Ok(true)
        })
    }
}

// ---------------------------------------------------------------------------
// Execution settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FlowExecutionSettingsRepository {
    driver: GraphDriver,
}

impl FlowExecutionSettingsRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Record the mailbox the flow sends from for one entity.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn merge(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        flow_id: &str,
        entity_id: &str,
        entity_type: &str,
        mailbox: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let label = tenant_label(FLOW_EXECUTION_SETTINGS, tenant);
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            if let Some(existing) = find_keyed(tx, &label, flow_id, entity_id, entity_type)? {
                tx.patch_node(existing.node_id, &touched(updated_at).set("mailbox", mailbox))?;
                return Ok(true);
            }
            let on_create = props([
                ("flowId", flow_id.into()),
                ("entityId", entity_id.into()),
                ("entityType", entity_type.into()),
                ("mailbox", mailbox.into()),
                ("createdAt", ts(updated_at)),
                ("updatedAt", ts(updated_at)),
            ]);
            let id = uuid::Uuid::new_v4().to_string();
            let ensured = ensure_scoped_node(
                tx,
                tenant,
                FLOW_EXECUTION_SETTINGS,
                &id,
                rel::BELONGS_TO_TENANT,
                &on_create,
            )?;
            Ok(ensured.is_some())
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        flow_id: &str,
        entity_id: &str,
        entity_type: &str,
    ) -> Result<Option<Node>> {
        let label = tenant_label(FLOW_EXECUTION_SETTINGS, tenant);
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            find_keyed(tx, &label, flow_id, entity_id, entity_type)
        })
    }
}
