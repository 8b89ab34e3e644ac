use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use relgraph_core::Ctx;
use relgraph_core::projection::{EventHandler, LoggingCompletionSink, Subscription};
use serde_json::json;

use crate::app::App;

#[derive(Args, Debug)]
pub struct ProjectArgs {
    /// Checkpoint name of the subscription.
    #[arg(long, default_value = "graph")]
    pub subscription: String,

    /// Events read per poll. Defaults to the configured batch size.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Handle one batch instead of draining the log.
    #[arg(long)]
    pub once: bool,
}

pub fn run(app: &App, ctx: &Ctx, args: &ProjectArgs, json: bool) -> Result<()> {
    let handler = EventHandler::new(
        &app.driver,
        Arc::new(app.gateway()),
        Arc::new(LoggingCompletionSink),
    );
    let subscription = Subscription::new(
        &args.subscription,
        app.event_store(),
        handler,
        app.driver.clone(),
    )?
    .with_batch_size(args.batch_size.unwrap_or(app.config.projection.batch_size));

    let stats = if args.once {
        subscription.poll(ctx)
    } else {
        subscription.run_until_idle(ctx)
    }
    .with_context(|| format!("Subscription {} stopped", subscription.name()))?;
    let checkpoint = subscription.checkpoint(ctx)?;

    let value = json!({
        "subscription": subscription.name(),
        "applied": stats.applied,
        "skipped": stats.skipped,
        "rejected": stats.rejected,
        "checkpoint": checkpoint,
    });
    super::emit(json, &value, || {
        format!(
            "{}: applied {}, skipped {}, rejected {}, checkpoint {checkpoint}",
            subscription.name(),
            stats.applied,
            stats.skipped,
            stats.rejected
        )
    })
}
