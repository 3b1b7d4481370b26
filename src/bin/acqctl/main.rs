//! acqctl - operator CLI for the acquisition storage engine
//!
//! # Commands
//!
//! - `check-config` - Validate configuration and print it
//! - `status` - Capacity, streams and performance snapshot
//! - `optimize` - Run one retention/optimization pass
//! - `query` - Query a stream's readings in a time range
//! - `stats` - Per-channel statistics of a stream in a time range
//! - `delete` - Delete a stream's shards before a time
//! - `run` - Keep the engine open with the background sweeper until Ctrl-C
//!
//! # Configuration
//!
//! Options come from `--config <file>` (TOML) when given, defaults otherwise;
//! `ACQ_STORE_*` environment variables override both, and `--data-dir`
//! overrides the base path last. Results are printed as JSON on stdout,
//! logs go to stderr.

use acq_store::{ChannelId, StorageEngine, StorageOptions, StreamId};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(name = "acqctl")]
#[command(version)]
#[command(about = "Operate a time-sharded acquisition store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true, env = "ACQ_STORE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the storage base path
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration and print it
    CheckConfig,

    /// Show capacity, streams and performance
    Status,

    /// Run one retention/optimization pass
    Optimize {
        /// Only this stream (all streams when omitted)
        #[arg(long)]
        stream: Option<StreamId>,
    },

    /// Query readings in a time range
    Query {
        /// Stream id
        #[arg(long)]
        stream: StreamId,

        /// Range start (RFC 3339)
        #[arg(long, value_parser = parse_time)]
        start: DateTime<Utc>,

        /// Range end (RFC 3339)
        #[arg(long, value_parser = parse_time)]
        end: DateTime<Utc>,

        /// Channels to include (repeatable; all when omitted)
        #[arg(long = "channel")]
        channels: Vec<ChannelId>,

        /// Point budget before LTTB downsampling
        #[arg(long, default_value_t = 10_000)]
        max_points: usize,
    },

    /// Per-channel statistics in a time range
    Stats {
        /// Stream id
        #[arg(long)]
        stream: StreamId,

        /// Range start (RFC 3339)
        #[arg(long, value_parser = parse_time)]
        start: DateTime<Utc>,

        /// Range end (RFC 3339)
        #[arg(long, value_parser = parse_time)]
        end: DateTime<Utc>,
    },

    /// Delete shards older than a time
    Delete {
        /// Stream id
        #[arg(long)]
        stream: StreamId,

        /// Shards whose hour precedes this are removed (RFC 3339)
        #[arg(long, value_parser = parse_time)]
        before: DateTime<Utc>,
    },

    /// Keep the engine open with the background sweeper until Ctrl-C
    Run,
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 time '{}': {}", raw, e))
}

// =============================================================================
// Helpers
// =============================================================================

fn load_options(cli: &Cli) -> Result<StorageOptions, Box<dyn std::error::Error>> {
    let mut options = match &cli.config {
        Some(path) => StorageOptions::from_file_with_env(&path.to_string_lossy())?,
        None => StorageOptions::from_env(),
    };
    if let Some(data_dir) = &cli.data_dir {
        options.base_path = data_dir.clone();
    }
    options.validate()?;
    Ok(options)
}

fn init_tracing(options: &StorageOptions) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&options.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn cmd_run(engine: StorageEngine) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Arc::new(engine);
    let mut sweeper = engine.start_background();
    info!(
        streams = engine.list_streams().len(),
        interval_mins = engine.options().optimization_interval_minutes,
        "Engine running, press Ctrl-C to stop"
    );

    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    sweeper.shutdown(Duration::from_secs(30)).await?;
    engine.close();
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let options = load_options(&cli)?;
    init_tracing(&options);

    if let Commands::CheckConfig = cli.command {
        return print_json(&options);
    }

    let engine = StorageEngine::open_default(options).await?;

    match cli.command {
        Commands::CheckConfig => Ok(()),
        Commands::Status => print_json(&engine.status().await),
        Commands::Optimize { stream } => print_json(&engine.optimize(stream).await),
        Commands::Query {
            stream,
            start,
            end,
            channels,
            max_points,
        } => {
            let filter = (!channels.is_empty()).then_some(channels.as_slice());
            print_json(&engine.query(stream, start, end, filter, max_points).await)
        },
        Commands::Stats { stream, start, end } => {
            print_json(&engine.statistics(stream, start, end).await?)
        },
        Commands::Delete { stream, before } => print_json(&engine.delete(stream, before).await),
        Commands::Run => cmd_run(engine).await,
    }
}
