use anyhow::Result;
use clap::Args;
use relgraph_core::Ctx;
use relgraph_core::command::{CommandMeta, Commands};
use serde_json::json;

use crate::app::App;

#[derive(Args, Debug)]
pub struct RefreshContractArgs {
    pub tenant: String,
    pub contract_id: String,

    /// Recompute the lifetime value instead of the status.
    #[arg(long)]
    pub ltv: bool,

    /// User recorded on the emitted event.
    #[arg(long, default_value = "")]
    pub user: String,
}

pub fn run(app: &App, ctx: &Ctx, args: &RefreshContractArgs, json: bool) -> Result<()> {
    let gateway = app.gateway();
    let meta = CommandMeta::new(&args.tenant, &args.user, "");
    if args.ltv {
        gateway.refresh_contract_ltv(ctx, &meta, &args.contract_id)?;
    } else {
        gateway.refresh_contract_status(ctx, &meta, &args.contract_id)?;
    }

    let requested = if args.ltv { "ltv" } else { "status" };
    let value = json!({
        "tenant": args.tenant,
        "contractId": args.contract_id,
        "requested": requested,
    });
    super::emit(json, &value, || {
        format!(
            "{requested} refresh requested for contract {}; run `relgraph project` to apply it",
            args.contract_id
        )
    })
}
