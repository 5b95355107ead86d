mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "warden",
    about = "Governance core for AI-proposed actions — policy, approvals, playbooks, evidence",
    version,
    propagate_version = true
)]
struct Cli {
    /// Data root (default: auto-detect from warden.yaml / warden.db or .git/)
    #[arg(long, global = true, env = "WARDEN_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "3100")]
        port: u16,
    },

    /// Run the async job worker
    Worker {
        /// Seconds to sleep when the queue is idle
        #[arg(long, default_value = "2")]
        interval_secs: u64,

        /// Drain the queue once and exit
        #[arg(long)]
        once: bool,
    },

    /// Archive stale records and delete stale evidence partitions
    Retention {
        /// Report what would happen without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Verify evidence hash chains
    Verify {
        /// Partition to verify (default: all)
        partition: Option<String>,
    },

    /// Export a partition's evidence with PII redaction
    Export {
        partition: String,

        /// Output format: json or csv
        #[arg(long, default_value = "json")]
        format: String,

        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Validate configuration and policy rules
    Check,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } | Commands::Worker { .. } => tracing::Level::INFO,
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
        Commands::Serve { port } => cmd::serve::run(&root, port),
        Commands::Worker {
            interval_secs,
            once,
        } => cmd::worker::run(&root, interval_secs, once),
        Commands::Retention { dry_run } => cmd::retention::run(&root, dry_run, cli.json),
        Commands::Verify { partition } => cmd::verify::run(&root, partition.as_deref(), cli.json),
        Commands::Export {
            partition,
            format,
            out,
        } => cmd::export::run(&root, &partition, &format, out.as_ref()),
        Commands::Check => cmd::check::run(&root, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
