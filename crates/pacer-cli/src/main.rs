mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, ledger::LedgerSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pacer",
    about = "Action governor for social-media automation: dedup, rate windows, pacing and arbitration",
    version,
    propagate_version = true
)]
struct Cli {
    /// Governor root (default: auto-detect from .pacer/)
    #[arg(long, global = true, env = "PACER_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .pacer/ with a default config and an empty store
    Init {
        /// Overwrite an existing config with defaults
        #[arg(long)]
        force: bool,
    },

    /// Inspect and validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Show per-class usage, cooldowns and pause state
    Status,

    /// Propose one candidate and decide it in a single tick
    Propose {
        /// Action class (original_post, reply, breaking_post, follow, unfollow, direct_message)
        #[arg(long)]
        class: String,
        /// Deduplication key: post id, user handle, tweet id
        #[arg(long)]
        target: String,
        #[arg(long, default_value_t = 0.0)]
        urgency: f64,
        /// Opaque JSON handed back to the executor
        #[arg(long)]
        payload: Option<String>,
    },

    /// Propose every candidate in a JSONL file, then run one tick
    Evaluate {
        file: PathBuf,
    },

    /// Report a successful execution
    Commit {
        /// Ledger entry id
        id: String,
    },

    /// Report a failed execution, freeing the target
    Abandon {
        /// Ledger entry id
        id: String,
        #[arg(long, default_value = "executor failed")]
        reason: String,
    },

    /// Abandon stale pending entries and prune old ones
    Reconcile,

    /// Inspect the admission ledger
    Ledger {
        #[command(subcommand)]
        subcommand: LedgerSubcommand,
    },

    /// Score a trend signal, optionally proposing it as a breaking post
    Spike {
        #[arg(long)]
        name: String,
        #[arg(long)]
        volume: u64,
        /// Window the volume was observed over, in minutes
        #[arg(long)]
        window: u32,
        #[arg(long)]
        growth: f64,
        /// Propose the signal as a breaking post if it spikes
        #[arg(long)]
        propose: bool,
    },

    /// Drive ticks and reconciliation on an interval
    Run {
        #[arg(long, default_value_t = 30)]
        interval_secs: u64,
        /// Stop after this many ticks (default: run until interrupted)
        #[arg(long)]
        ticks: Option<u64>,
        /// Emit a status heartbeat every N ticks
        #[arg(long, default_value_t = 10)]
        heartbeat_every: u64,
        /// JSONL file of candidates to submit as concurrent producers
        #[arg(long)]
        inbox: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { force } => cmd::init::run(&root, force),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Status => cmd::status::run(&root, cli.json),
        Commands::Propose {
            class,
            target,
            urgency,
            payload,
        } => cmd::propose::run(&root, &class, &target, urgency, payload.as_deref(), cli.json),
        Commands::Evaluate { file } => cmd::evaluate::run(&root, &file, cli.json),
        Commands::Commit { id } => cmd::outcome::commit(&root, &id, cli.json),
        Commands::Abandon { id, reason } => cmd::outcome::abandon(&root, &id, &reason, cli.json),
        Commands::Reconcile => cmd::reconcile::run(&root, cli.json),
        Commands::Ledger { subcommand } => cmd::ledger::run(&root, subcommand, cli.json),
        Commands::Spike {
            name,
            volume,
            window,
            growth,
            propose,
        } => cmd::spike::run(&root, name, volume, window, growth, propose, cli.json),
        Commands::Run {
            interval_secs,
            ticks,
            heartbeat_every,
            inbox,
        } => cmd::run::run(&root, interval_secs, ticks, heartbeat_every, inbox.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
