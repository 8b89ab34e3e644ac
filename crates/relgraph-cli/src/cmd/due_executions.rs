use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use relgraph_core::Ctx;
use serde_json::{Value, json};

use crate::app::App;

#[derive(Args, Debug)]
pub struct DueExecutionsArgs {
    /// RFC 3339 cut-off. Defaults to now.
    #[arg(long)]
    pub before: Option<DateTime<Utc>>,
}

pub fn run(app: &App, ctx: &Ctx, args: &DueExecutionsArgs, json: bool) -> Result<()> {
    let before = args.before.unwrap_or_else(Utc::now);
    let due = app
        .repositories()
        .execution_reads
        .get_scheduled_before(ctx, None, before)?;

    let rows: Vec<Value> = due
        .iter()
        .map(|entry| {
            json!({
                "tenant": entry.linked_id,
                "id": entry.node.id(),
                "flowId": entry.node.str("flowId"),
                "actionType": entry.node.str("actionType"),
                "mailbox": entry.node.str("mailbox"),
                "scheduledAt": entry.node.time("scheduledAt").map(|at| at.to_rfc3339()),
            })
        })
        .collect();
    super::emit(json, &Value::Array(rows), || {
        if due.is_empty() {
            return format!("no executions due before {}", before.to_rfc3339());
        }
        due.iter()
            .map(|entry| {
                format!(
                    "{}  {}  {}  {}",
                    entry
                        .node
                        .time("scheduledAt")
                        .map_or_else(|| "-".to_string(), |at| at.to_rfc3339()),
                    entry.linked_id,
                    entry.node.id(),
                    entry.node.str("actionType").unwrap_or("-"),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}
