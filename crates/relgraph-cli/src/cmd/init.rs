use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use relgraph_core::Ctx;
use relgraph_core::config::CONFIG_FILE_NAME;
use serde_json::json;
use tracing::info;

use crate::app::App;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Tenant to register. Repeat for several.
    #[arg(long = "tenant")]
    pub tenants: Vec<String>,

    /// Write the effective configuration to ./relgraph.toml when missing.
    #[arg(long)]
    pub write_config: bool,
}

pub fn run(app: &App, ctx: &Ctx, args: &InitArgs, json: bool) -> Result<()> {
    let repos = app.repositories();
    let mut created = Vec::new();
    for tenant in &args.tenants {
        if repos
            .tenants
            .create(ctx, None, tenant)
            .with_context(|| format!("Failed to register tenant {tenant}"))?
        {
            created.push(tenant.clone());
        }
    }

    let config_path = Path::new(CONFIG_FILE_NAME);
    let wrote_config = args.write_config && !config_path.exists();
    if wrote_config {
        std::fs::write(config_path, app.config.to_toml()?)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
    }
    info!(tenants = created.len(), wrote_config, "relgraph initialized");

    let value = json!({
        "graph": app.config.graph.path.display().to_string(),
        "eventStore": app.config.event_store.path.display().to_string(),
        "tenantsCreated": created,
        "configWritten": wrote_config,
    });
    super::emit(json, &value, || {
        let mut out = format!(
            "graph:       {}\nevent store: {}",
            app.config.graph.path.display(),
            app.config.event_store.path.display()
        );
        for tenant in &created {
            out.push_str(&format!("\ntenant:      {tenant} (created)"));
        }
        if wrote_config {
            out.push_str(&format!("\nconfig:      {CONFIG_FILE_NAME} (written)"));
        }
        out
    })
}
