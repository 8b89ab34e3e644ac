use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use relgraph_core::Ctx;
use relgraph_core::scheduler::MailboxPlanner;
use serde_json::json;

use crate::app::App;

#[derive(Args, Debug)]
pub struct NextSlotArgs {
    pub tenant: String,
    pub mailbox: String,

    /// RFC 3339 earliest acceptable slot. Defaults to now.
    #[arg(long)]
    pub not_before: Option<DateTime<Utc>>,
}

pub fn run(app: &App, ctx: &Ctx, args: &NextSlotArgs, json: bool) -> Result<()> {
    let planner = MailboxPlanner::new(&app.driver, app.config.scheduler);
    let not_before = args.not_before.unwrap_or_else(Utc::now);
    let slot = planner.next_slot(ctx, &args.tenant, &args.mailbox, not_before)?;

    let value = json!({
        "tenant": args.tenant,
        "mailbox": args.mailbox,
        "slot": slot.to_rfc3339(),
    });
    super::emit(json, &value, || slot.to_rfc3339())
}
