use anyhow::{Context, Result};
use clap::Args;
use relgraph_core::Ctx;
use serde_json::json;

use crate::app::App;

#[derive(Args, Debug)]
pub struct DeleteStreamArgs {
    /// Stream id, e.g. organization-acme-o1.
    pub stream: String,

    /// Maximum event age. Defaults to the configured stream TTL.
    #[arg(long)]
    pub ttl_minutes: Option<i64>,
}

pub fn run(app: &App, ctx: &Ctx, args: &DeleteStreamArgs, json: bool) -> Result<()> {
    let ttl = args
        .ttl_minutes
        .unwrap_or(app.config.event_store.default_stream_ttl_minutes);
    app.gateway()
        .delete_stream(ctx, &args.stream, Some(ttl))
        .with_context(|| format!("Failed to schedule deletion of {}", args.stream))?;

    let value = json!({ "stream": args.stream, "ttlMinutes": ttl });
    super::emit(json, &value, || {
        format!("{} scheduled for deletion (ttl {ttl} minutes)", args.stream)
    })
}
