#![forbid(unsafe_code)]

mod app;
mod cmd;

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use relgraph_core::{Ctx, RelgraphConfig};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::app::App;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "relgraph: event-sourced customer relationship graph",
    long_about = None
)]
struct Cli {
    /// Config file. Defaults to ./relgraph.toml, then the user config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Give up after this many seconds.
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn ctx(&self) -> Ctx {
        self.timeout_secs
            .map_or_else(Ctx::background, |secs| Ctx::with_timeout(Duration::from_secs(secs)))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Create the databases and register tenants",
        after_help = "EXAMPLES:\n    # Create both databases with one tenant\n    relgraph init --tenant acme\n\n    # Also write the effective config to ./relgraph.toml\n    relgraph init --tenant acme --write-config"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        about = "Project the event log into the graph",
        after_help = "EXAMPLES:\n    # Drain the log, including follow-up events\n    relgraph project\n\n    # Handle a single batch\n    relgraph project --once --batch-size 50"
    )]
    Project(cmd::project::ProjectArgs),

    #[command(
        about = "Search organizations with a filter",
        after_help = "EXAMPLES:\n    # First page sorted by name\n    relgraph search-orgs acme --sort name\n\n    # Filter on industry\n    relgraph search-orgs acme --filter '{\"Filter\":{\"Property\":\"INDUSTRY\",\"Operation\":\"EQ\",\"Value\":\"Software\"}}'"
    )]
    SearchOrgs(cmd::search_orgs::SearchOrgsArgs),

    #[command(
        about = "List scheduled flow executions that are due",
        after_help = "EXAMPLES:\n    # Executions due now\n    relgraph due-executions\n\n    # Executions due before a point in time\n    relgraph due-executions --before 2024-05-06T09:00:00Z"
    )]
    DueExecutions(cmd::due_executions::DueExecutionsArgs),

    #[command(
        about = "Plan the next free sending slot of a mailbox",
        after_help = "EXAMPLES:\n    relgraph next-slot acme sales@acme.com --not-before 2024-05-06T09:00:00Z"
    )]
    NextSlot(cmd::next_slot::NextSlotArgs),

    #[command(
        about = "Schedule an event stream for deletion",
        after_help = "EXAMPLES:\n    # Use the configured TTL\n    relgraph delete-stream organization-acme-o1\n\n    # Expire events older than one hour\n    relgraph delete-stream organization-acme-o1 --ttl-minutes 60"
    )]
    DeleteStream(cmd::delete_stream::DeleteStreamArgs),

    #[command(
        about = "Request a contract status or LTV refresh",
        after_help = "EXAMPLES:\n    relgraph refresh-contract acme k1\n    relgraph refresh-contract acme k1 --ltv"
    )]
    RefreshContract(cmd::refresh_contract::RefreshContractArgs),
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("RELGRAPH_LOG").unwrap_or_else(|_| EnvFilter::new("relgraph=info,warn"));
    let format = env::var("RELGRAPH_LOG_FORMAT").unwrap_or_default();
    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let ctx = cli.ctx();
    let config = RelgraphConfig::load(cli.config.as_deref())?;
    debug!(
        graph = %config.graph.path.display(),
        events = %config.event_store.path.display(),
        "configuration resolved"
    );
    let app = App::open(config)?;

    match &cli.command {
        Commands::Init(args) => cmd::init::run(&app, &ctx, args, cli.json),
        Commands::Project(args) => cmd::project::run(&app, &ctx, args, cli.json),
        Commands::SearchOrgs(args) => cmd::search_orgs::run(&app, &ctx, args, cli.json),
        Commands::DueExecutions(args) => cmd::due_executions::run(&app, &ctx, args, cli.json),
        Commands::NextSlot(args) => cmd::next_slot::run(&app, &ctx, args, cli.json),
        Commands::DeleteStream(args) => cmd::delete_stream::run(&app, &ctx, args, cli.json),
        Commands::RefreshContract(args) => cmd::refresh_contract::run(&app, &ctx, args, cli.json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from(["relgraph", "project", "--once", "--json", "--timeout-secs", "3"]);
        assert!(cli.json);
        assert_eq!(cli.timeout_secs, Some(3));
        assert!(matches!(cli.command, Commands::Project(ref args) if args.once));
    }

    #[test]
    fn search_sort_parses_kebab_case() {
        let cli = Cli::parse_from(["relgraph", "search-orgs", "acme", "--sort", "renewal-date", "--desc"]);
        let Commands::SearchOrgs(args) = cli.command else {
            panic!("expected search-orgs");
        };
        assert_eq!(args.tenant, "acme");
        assert!(args.desc);
        assert!(args.sort.is_some());
    }
}
