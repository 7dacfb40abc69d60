//! FieldSync CLI
//!
//! Operator tools for FieldSync store snapshots.
//!
//! # Commands
//!
//! - `inspect` - Show per-type record, dirty and cursor state plus outbox counts
//! - `outbox` - List outbox entries
//! - `retry` - Re-arm a failed outbox entry or a rejected record
//! - `purge` - Drop synced tombstones and old completed outbox entries
//! - `resync` - Reset a pull cursor so the next sync re-pulls everything
//! - `simulate` - Run a local store against the reference server

mod commands;
mod error;

use clap::{Parser, Subcommand};
use commands::Format;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// FieldSync command-line tools.
#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store snapshot file
    #[arg(global = true, short, long)]
    store: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show per-type sync state and outbox counts
    Inspect {
        /// List every record
        #[arg(short, long)]
        records: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List outbox entries
    Outbox {
        /// Only entries in this status (pending, in_flight, completed, failed)
        #[arg(long)]
        status: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Re-arm a failed outbox entry or a rejected record
    Retry {
        /// Outbox entry id to move back to PENDING
        #[arg(long, conflicts_with = "record")]
        entry: Option<String>,

        /// Rejected record to make push-eligible again, as `type:id`
        #[arg(long)]
        record: Option<String>,
    },

    /// Drop synced tombstones and completed outbox entries
    Purge {
        /// Keep completed outbox entries younger than this many hours
        #[arg(long, default_value = "168")]
        retention_hours: u64,

        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Reset the pull cursor of an entity type
    Resync {
        /// Entity type to re-pull from scratch
        entity_type: String,
    },

    /// Sync a local store against an in-process reference server
    Simulate {
        /// Local records to write before syncing
        #[arg(long, default_value = "10")]
        records: usize,

        /// Records another device already pushed to the server
        #[arg(long, default_value = "5")]
        remote: usize,

        /// Outbox operations to enqueue
        #[arg(long, default_value = "3")]
        operations: usize,

        /// Start with the server unreachable for the first round
        #[arg(long)]
        offline: bool,

        /// Apply this many dispatches but lose their acknowledgements
        #[arg(long, default_value = "0")]
        lose_acks: u32,

        /// Maximum sync rounds
        #[arg(long, default_value = "5")]
        rounds: u32,

        /// Simulated network latency in milliseconds
        #[arg(long, default_value = "0")]
        latency_ms: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { records, format } => {
            let path = cli.store.ok_or(error::CliError::MissingStore("inspect"))?;
            commands::inspect::run(&path, records, Format::parse(&format)?)?;
        }
        Commands::Outbox { status, format } => {
            let path = cli.store.ok_or(error::CliError::MissingStore("outbox"))?;
            let status = status
                .as_deref()
                .map(commands::parse_status)
                .transpose()?;
            commands::outbox::run(&path, status, Format::parse(&format)?)?;
        }
        Commands::Retry { entry, record } => {
            let path = cli.store.ok_or(error::CliError::MissingStore("retry"))?;
            commands::retry::run(&path, entry.as_deref(), record.as_deref())?;
        }
        Commands::Purge {
            retention_hours,
            dry_run,
        } => {
            let path = cli.store.ok_or(error::CliError::MissingStore("purge"))?;
            let retention = Duration::from_secs(retention_hours.saturating_mul(3600));
            commands::purge::run(&path, retention, dry_run)?;
        }
        Commands::Resync { entity_type } => {
            let path = cli.store.ok_or(error::CliError::MissingStore("resync"))?;
            commands::resync::run(&path, &entity_type)?;
        }
        Commands::Simulate {
            records,
            remote,
            operations,
            offline,
            lose_acks,
            rounds,
            latency_ms,
            format,
        } => {
            let options = commands::simulate::SimulateOptions {
                local_records: records,
                remote_records: remote,
                operations,
                start_offline: offline,
                lost_acks: lose_acks,
                max_rounds: rounds.max(1),
                latency: Duration::from_millis(latency_ms),
            };
            commands::simulate::run(cli.store.as_deref(), options, Format::parse(&format)?)?;
        }
        Commands::Version => {
            println!("FieldSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
