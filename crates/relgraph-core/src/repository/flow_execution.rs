//! Flow action executions and the queries the flow scheduler plans with.
//!
//! `scheduledAt` is stored in microseconds, so every interval bound is
//! bound as an integer and compared numerically.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::instrument;

use super::{ensure_scoped_node, props, scoped_node_id, touched};
use crate::context::Ctx;
use crate::error::Result;
use crate::graph::extract::{self, NodeAndId};
use crate::graph::labels::{FLOW, FLOW_ACTION_EXECUTION, rel, tenant_label};
use crate::graph::props::{from_micros, ts};
use crate::graph::tx::node_json;
use crate::graph::{GraphDriver, GraphTx, Node, Props};
use crate::model::flow::{ExecutionStatus, FlowActionType, FlowStatus};

/// Upper bound of one due-executions batch.
pub const SCHEDULED_BEFORE_BATCH: i64 = 100;

/// One scheduled action for one flow participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFields {
    pub flow_id: String,
    pub action_id: String,
    pub entity_id: String,
    pub entity_type: String,
    pub mailbox: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub action_type: FlowActionType,
}

#[derive(Debug, Clone)]
pub struct FlowActionExecutionWriteRepository {
    driver: GraphDriver,
}

impl FlowActionExecutionWriteRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Create or reschedule an execution and attach it to its flow.
    #[instrument(level = "debug", skip(self, ctx, tx, fields), fields(flow_id = %fields.flow_id))]
    pub fn merge(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        execution_id: &str,
        fields: &ExecutionFields,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let mailbox = fields.mailbox.clone().map_or(Value::Null, Value::from);
            let at = crate::model::now();
            let on_create = props([
                ("flowId", fields.flow_id.clone().into()),
                ("actionId", fields.action_id.clone().into()),
                ("entityId", fields.entity_id.clone().into()),
                ("entityType", fields.entity_type.clone().into()),
                ("actionType", fields.action_type.as_str().into()),
                ("createdAt", ts(at)),
            ]);
            let Some(execution) = ensure_scoped_node(
                tx,
                tenant,
                FLOW_ACTION_EXECUTION,
                execution_id,
                rel::BELONGS_TO_TENANT,
                &on_create,
            )?
            else {
                return Ok(false);
            };
            tx.patch_node(
                execution.node_id,
                &touched(at)
                    .set("mailbox", mailbox)
                    .set("scheduledAt", ts(fields.scheduled_at))
                    .set("status", fields.status.as_str()),
            )?;
            if let Some(flow) = scoped_node_id(tx, FLOW, tenant, &fields.flow_id)? {
                tx.merge_edge(flow, rel::HAS_EXECUTION, execution.node_id, &Props::new())?;
            }
            Ok(true)
        })
    }

    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn update_status(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        execution_id: &str,
        status: ExecutionStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.driver.execute_write_in_transaction(ctx, tx, |tx| {
            let Some(execution) = scoped_node_id(tx, FLOW_ACTION_EXECUTION, tenant, execution_id)?
            else {
                return Ok(false);
            };
            tx.patch_node(execution, &touched(updated_at).set("status", status.as_str()))?;
            Ok(true)
        })
    }
}

#[derive(Debug, Clone)]
pub struct FlowActionExecutionReadRepository {
    driver: GraphDriver,
}

impl FlowActionExecutionReadRepository {
    #[must_use]
    pub const fn new(driver: GraphDriver) -> Self {
        Self { driver }
    }

    /// Latest `scheduledAt` among the mailbox's scheduled executions.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_first_slot_for_mailbox(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        mailbox: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let label = tenant_label(FLOW_ACTION_EXECUTION, tenant);
        let scheduled = ExecutionStatus::Scheduled.as_str();
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let records = tx.query(
                "SELECT MAX(json_extract(e.props, '$.scheduledAt'))
                 FROM nodes e JOIN node_labels l ON l.node_id = e.node_id AND l.label = :label
                 WHERE json_extract(e.props, '$.mailbox') = :mailbox
                   AND json_extract(e.props, '$.status') = :status",
                &[(":label", &label), (":mailbox", &mailbox), (":status", &scheduled)],
            )?;
            let micros: Option<i64> = extract::single_record_first_value_as(&records)?;
            Ok(micros.and_then(from_micros))
        })
    }

    /// The mailbox's execution with the highest `scheduledAt`.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_last_scheduled_for_mailbox(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        mailbox: &str,
    ) -> Result<Option<Node>> {
        let label = tenant_label(FLOW_ACTION_EXECUTION, tenant);
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let records = tx.query(
                concat!(
                    "SELECT ",
                    node_json!("e"),
                    " FROM nodes e JOIN node_labels l ON l.node_id = e.node_id AND l.label = :label
                     WHERE json_extract(e.props, '$.mailbox') = :mailbox
                     ORDER BY json_extract(e.props, '$.scheduledAt') DESC, e.node_id DESC
                     LIMIT 1"
                ),
                &[(":label", &label), (":mailbox", &mailbox)],
            )?;
            extract::single_record_first_value_as_node(&records)
        })
    }

    /// Most recent execution of the mailbox scheduled in `[start, end)`.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_by_mailbox_and_time_interval(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        mailbox: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<Node>> {
        let label = tenant_label(FLOW_ACTION_EXECUTION, tenant);
        let (start, end) = (start.timestamp_micros(), end.timestamp_micros());
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let records = tx.query(
                concat!(
                    "SELECT ",
                    node_json!("e"),
                    " FROM nodes e JOIN node_labels l ON l.node_id = e.node_id AND l.label = :label
                     WHERE json_extract(e.props, '$.mailbox') = :mailbox
                       AND json_extract(e.props, '$.scheduledAt') >= :start
                       AND json_extract(e.props, '$.scheduledAt') < :end
                     ORDER BY json_extract(e.props, '$.scheduledAt') DESC, e.node_id DESC
                     LIMIT 1"
                ),
                &[(":label", &label), (":mailbox", &mailbox), (":start", &start), (":end", &end)],
            )?;
            extract::single_record_first_value_as_node(&records)
        })
    }

    /// Executions of the mailbox scheduled within `[start, end]`.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn count_emails_per_mailbox_per_day(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        mailbox: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64> {
        let label = tenant_label(FLOW_ACTION_EXECUTION, tenant);
        let (start, end) = (start.timestamp_micros(), end.timestamp_micros());
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let records = tx.query(
                "SELECT COUNT(*)
                 FROM nodes e JOIN node_labels l ON l.node_id = e.node_id AND l.label = :label
                 WHERE json_extract(e.props, '$.mailbox') = :mailbox
                   AND json_extract(e.props, '$.scheduledAt') >= :start
                   AND json_extract(e.props, '$.scheduledAt') <= :end",
                &[(":label", &label), (":mailbox", &mailbox), (":start", &start), (":end", &end)],
            )?;
            Ok(extract::single_record_first_value_as(&records)?.unwrap_or(0))
        })
    }

    /// Scheduled executions of active flows due before `before`, across
    /// tenants, oldest first. Each node is paired with its tenant.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_scheduled_before(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        before: DateTime<Utc>,
    ) -> Result<Vec<NodeAndId>> {
        let before = before.timestamp_micros();
        let scheduled = ExecutionStatus::Scheduled.as_str();
        let active = FlowStatus::Active.as_str();
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let records = tx.query(
                concat!(
                    "SELECT ",
                    node_json!("e"),
                    ", t.entity_id
                     FROM nodes e
                     JOIN node_labels l ON l.node_id = e.node_id AND l.label = :label
                     JOIN edges he ON he.dst = e.node_id AND he.rel_type = :has_execution
                     JOIN nodes f ON f.node_id = he.src
                     JOIN edges bt ON bt.src = e.node_id AND bt.rel_type = :belongs
                     JOIN nodes t ON t.node_id = bt.dst
                     WHERE json_extract(e.props, '$.status') = :scheduled
                       AND json_extract(e.props, '$.scheduledAt') < :before
                       AND json_extract(f.props, '$.status') = :active
                     ORDER BY json_extract(e.props, '$.scheduledAt') ASC, e.node_id ASC
                     LIMIT :batch"
                ),
                &[
                    (":label", &FLOW_ACTION_EXECUTION),
                    (":has_execution", &rel::HAS_EXECUTION),
                    (":belongs", &rel::BELONGS_TO_TENANT),
                    (":scheduled", &scheduled),
                    (":before", &before),
                    (":active", &active),
                    (":batch", &SCHEDULED_BEFORE_BATCH),
                ],
            )?;
            extract::all_records_as_node_and_id(&records)
        })
    }

    /// Pending executions of one action type for one entity.
    #[instrument(level = "debug", skip(self, ctx, tx))]
    pub fn get_for_entity_with_action_type(
        &self,
        ctx: &Ctx,
        tx: Option<&GraphTx<'_>>,
        tenant: &str,
        entity_id: &str,
        entity_type: &str,
        action_type: FlowActionType,
    ) -> Result<Vec<Node>> {
        let label = tenant_label(FLOW_ACTION_EXECUTION, tenant);
        let action_type = action_type.as_str();
        let scheduled = ExecutionStatus::Scheduled.as_str();
        let in_progress = ExecutionStatus::InProgress.as_str();
        self.driver.execute_read_in_transaction(ctx, tx, |tx| {
            let records = tx.query(
                concat!(
                    "SELECT ",
                    node_json!("e"),
                    " FROM nodes e JOIN node_labels l ON l.node_id = e.node_id AND l.label = :label
                     WHERE json_extract(e.props, '$.entityId') = :entity_id
                       AND json_extract(e.props, '$.entityType') = :entity_type
                       AND json_extract(e.props, '$.actionType') = :action_type
                       AND json_extract(e.props, '$.status') IN (:scheduled, :in_progress)
                     ORDER BY json_extract(e.props, '$.scheduledAt') ASC, e.node_id ASC"
                ),
                &[
                    (":label", &label),
                    (":entity_id", &entity_id),
                    (":entity_type", &entity_type),
                    (":action_type", &action_type),
                    (":scheduled", &scheduled),
                    (":in_progress", &in_progress),
                ],
            )?;
            extract::all_records_first_value_as_node_list(&records)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{FlowRepository, TenantRepository};
    use chrono::{Duration, TimeZone};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid time")
    }

    fn execution(mailbox: &str, minutes: i64, status: ExecutionStatus) -> ExecutionFields {
        ExecutionFields {
            flow_id: "f1".into(),
            action_id: "a1".into(),
            entity_id: format!("c{minutes}"),
            entity_type: "CONTACT".into(),
            mailbox: Some(mailbox.into()),
            scheduled_at: base() + Duration::minutes(minutes),
            status,
            action_type: FlowActionType::EmailNew,
        }
    }

    fn setup() -> (GraphDriver, Ctx) {
        let driver = GraphDriver::open_in_memory().expect("open graph");
        let ctx = Ctx::background();
        for tenant in ["ziggy", "other"] {
            TenantRepository::new(driver.clone()).create(&ctx, None, tenant).expect("tenant");
            FlowRepository::new(driver.clone())
                .merge(&ctx, None, tenant, "f1", "Outreach", FlowStatus::Active, base())
                .expect("flow");
        }
        let writes = FlowActionExecutionWriteRepository::new(driver.clone());
        let seed = [
            ("x1", execution("a@acme.com", 0, ExecutionStatus::Success)),
            ("x2", execution("a@acme.com", 10, ExecutionStatus::Scheduled)),
            ("x3", execution("a@acme.com", 20, ExecutionStatus::Scheduled)),
            ("x4", execution("b@acme.com", 5, ExecutionStatus::Scheduled)),
        ];
        for (id, fields) in &seed {
            writes.merge(&ctx, None, "ziggy", id, fields).expect("execution");
        }
        writes
            .merge(&ctx, None, "other", "y1", &execution("c@other.com", 1, ExecutionStatus::Scheduled))
            .expect("execution");
        (driver, ctx)
    }

    #[test]
    fn mailbox_slot_queries() {
        let (driver, ctx) = setup();
        let reads = FlowActionExecutionReadRepository::new(driver);

        let first = reads.get_first_slot_for_mailbox(&ctx, None, "ziggy", "a@acme.com").expect("slot");
        assert_eq!(first, Some(base() + Duration::minutes(20)));
        assert!(reads.get_first_slot_for_mailbox(&ctx, None, "ziggy", "none@acme.com").expect("slot").is_none());

        let last = reads
            .get_last_scheduled_for_mailbox(&ctx, None, "ziggy", "a@acme.com")
            .expect("last")
            .expect("node");
        assert_eq!(last.id(), "x3");

        let within = reads
            .get_by_mailbox_and_time_interval(&ctx, None, "ziggy", "a@acme.com", base(), base() + Duration::minutes(20))
            .expect("interval")
            .expect("node");
        assert_eq!(within.id(), "x2");

        let count = reads
            .count_emails_per_mailbox_per_day(&ctx, None, "ziggy", "a@acme.com", base(), base() + Duration::minutes(20))
            .expect("count");
        assert_eq!(count, 3);
    }

    #[test]
    fn due_executions_span_tenants_and_skip_inactive_flows() {
        let (driver, ctx) = setup();
        let reads = FlowActionExecutionReadRepository::new(driver.clone());
        let due = reads
            .get_scheduled_before(&ctx, None, base() + Duration::minutes(15))
            .expect("due");
        let ids: Vec<(&str, &str)> =
            due.iter().map(|pair| (pair.node.id(), pair.linked_id.as_str())).collect();
        assert_eq!(ids, vec![("y1", "other"), ("x4", "ziggy"), ("x2", "ziggy")]);

        FlowRepository::new(driver)
            .update_status(&ctx, None, "other", "f1", FlowStatus::Paused, base())
            .expect("pause");
        let due = reads
            .get_scheduled_before(&ctx, None, base() + Duration::minutes(15))
            .expect("due");
        assert_eq!(due.len(), 2);
    }

    #[test]
    fn pending_executions_for_entity() {
        let (driver, ctx) = setup();
        let writes = FlowActionExecutionWriteRepository::new(driver.clone());
        let reads = FlowActionExecutionReadRepository::new(driver);

        let pending = reads
            .get_for_entity_with_action_type(&ctx, None, "ziggy", "c10", "CONTACT", FlowActionType::EmailNew)
            .expect("pending");
        assert_eq!(pending.len(), 1);

        writes
            .update_status(&ctx, None, "ziggy", "x2", ExecutionStatus::Success, base())
            .expect("status");
        let pending = reads
            .get_for_entity_with_action_type(&ctx, None, "ziggy", "c10", "CONTACT", FlowActionType::EmailNew)
            .expect("pending");
        assert!(pending.is_empty());
    }
}
