//! HabitSync CLI
//!
//! Thin wrapper around habitsync-core for inspecting and driving the local
//! sync queue from a terminal.
//!
//! ## Usage
//!
//! ```bash
//! # Show queue and sync status
//! habitsync status
//!
//! # Queue a local mutation
//! habitsync enqueue task t1 update --payload '{"id":"t1","streakCount":6}'
//!
//! # List pending operations
//! habitsync pending
//!
//! # Probe connectivity
//! habitsync check
//!
//! # Run one full reconciliation pass
//! habitsync --remote https://api.example.com --user u1 sync
//!
//! # Keep syncing in the background until Ctrl+C
//! habitsync --remote https://api.example.com --user u1 run
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use habitsync_core::{
    Enqueued, HttpProbe, HttpRemoteStore, OperationKind, OptimisticUpdateTracker,
    ReachabilityProbe, Snapshot, StaticProbe, SyncConfig, SyncEngine, SyncEvent, SyncReport,
    SyncScheduler,
};
use tokio::sync::broadcast;
use tracing::info;

/// HabitSync - local-first sync for habit tracking
#[derive(Parser)]
#[command(name = "habitsync")]
#[command(version = "0.1.0")]
#[command(about = "HabitSync - local-first sync for habit tracking")]
#[command(
    long_about = "Inspect and drive the HabitSync operation queue: queue local mutations, probe connectivity, and reconcile with the remote document store."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.habitsync/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Base URL of the remote document store
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    remote: String,

    /// User whose collections are synced
    #[arg(long, global = true, default_value = "local")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue and sync status
    Status,

    /// Queue a local mutation for upload
    Enqueue {
        /// Entity type (task, avatar, achievement, progress, ...)
        entity_type: String,

        /// Entity id
        entity_id: String,

        /// Operation kind: create, update or delete
        kind: OperationKind,

        /// Entity snapshot as a JSON object
        #[arg(short, long, default_value = "{}")]
        payload: String,
    },

    /// List pending operations
    Pending {
        /// Print the raw records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Drop every pending operation
    Clear,

    /// Probe connectivity
    Check,

    /// Run one full reconciliation pass
    Sync {
        /// Treat the remote as reachable without probing
        #[arg(long)]
        no_probe: bool,
    },

    /// Keep syncing in the background until Ctrl+C
    Run {
        /// Treat the remote as reachable without probing
        #[arg(long)]
        no_probe: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let config = SyncConfig::load_or_default(&data_dir)?;

    let no_probe = matches!(
        cli.command,
        Commands::Sync { no_probe: true } | Commands::Run { no_probe: true }
    );
    let engine = open_engine(&data_dir, &config, &cli.remote, &cli.user, no_probe)?;

    match cli.command {
        Commands::Status => {
            let status = engine.sync_status();
            println!("HabitSync v0.1.0");
            println!();
            println!("Pending operations: {}", status.pending_count);
            match status.last_sync_at {
                Some(at) => println!("Last sync: {}", at.to_rfc3339()),
                None => println!("Last sync: never"),
            }
            println!("Connection: {}", status.connection);
            println!("Phase: {}", status.phase);
            println!();
            println!("Data directory: {}", data_dir.display());
        }

        Commands::Enqueue {
            entity_type,
            entity_id,
            kind,
            payload,
        } => {
            let snapshot = parse_payload(&payload)?;
            let outcome = engine.enqueue(entity_type.as_str(), entity_id.as_str(), kind, snapshot);
            let verb = match outcome {
                Enqueued::Appended => "Queued",
                Enqueued::Replaced => "Replaced pending",
            };
            println!("{} {} for {}/{}", verb, kind, entity_type, entity_id);
        }

        Commands::Pending { json } => {
            let records = engine.queue().snapshot();
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No pending operations.");
            } else {
                println!("Pending operations ({}):", records.len());
                for record in records {
                    print!(
                        "  {} {}/{} (attempt {})",
                        record.kind, record.entity_type, record.entity_id, record.attempt
                    );
                    if let Some(err) = &record.last_error {
                        print!(" last error: {}", err);
                    }
                    println!();
                    println!("    ID: {}", record.id);
                }
            }
        }

        Commands::Clear => {
            let cleared = engine.queue().clear();
            println!("Cleared {} pending operation(s)", cleared);
        }

        Commands::Check => {
            let state = engine.connectivity().check_now().await;
            println!("Connection: {}", state);
        }

        Commands::Sync { .. } => {
            let state = engine.connectivity().check_now().await;
            if !state.is_online() {
                anyhow::bail!("Cannot sync: connection is {}", state);
            }

            let report = engine.sync_all().await?;
            print_report(&report);
            if !report.is_success() {
                anyhow::bail!("Sync pass incomplete ({} error(s))", report.errors.len());
            }
        }

        Commands::Run { .. } => {
            let engine = Arc::new(engine);
            let tracker = Arc::new(OptimisticUpdateTracker::new(config.optimistic_max_age()));
            let events = engine.subscribe();
            let scheduler = SyncScheduler::start(engine.clone(), Some(tracker), &config);

            println!("Syncing {} as '{}'", cli.remote, cli.user);
            println!("Data directory: {}", data_dir.display());
            println!();
            println!("Running. Press Ctrl+C to stop.");

            tokio::select! {
                _ = print_events(events) => {}
                result = tokio::signal::ctrl_c() => {
                    result.context("failed to listen for Ctrl+C")?;
                    println!();
                    println!("Shutting down...");
                }
            }
            scheduler.shutdown();
        }
    }

    Ok(())
}

fn open_engine(
    data_dir: &Path,
    config: &SyncConfig,
    remote_url: &str,
    user: &str,
    no_probe: bool,
) -> Result<SyncEngine> {
    let remote = Arc::new(HttpRemoteStore::new(remote_url, user)?);
    let probe: Arc<dyn ReachabilityProbe> = if no_probe {
        Arc::new(StaticProbe::new(true))
    } else {
        Arc::new(HttpProbe::from_config(config)?)
    };
    info!(remote = remote_url, user, no_probe, "Opening sync engine");
    Ok(SyncEngine::open(data_dir, config, remote, probe)?)
}

fn parse_payload(payload: &str) -> Result<Snapshot> {
    let value: serde_json::Value =
        serde_json::from_str(payload).with_context(|| format!("Invalid JSON payload: {}", payload))?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => anyhow::bail!("Payload must be a JSON object, got: {}", other),
    }
}

fn print_report(report: &SyncReport) {
    println!("Sync pass:");
    println!("  Uploaded: {}", report.drain.uploaded);
    println!("  Retrying: {}", report.drain.retrying);
    println!("  Dropped: {}", report.drain.dropped.len());
    println!("  Pulled: {}", report.pulled_new);
    println!("  Unchanged: {}", report.unchanged);
    println!("  Conflicts resolved: {}", report.conflicts_resolved);
    println!("  Re-uploaded: {}", report.reuploaded);
    for error in &report.errors {
        println!("  Error: {}", error);
    }
}

async fn print_events(mut events: broadcast::Receiver<SyncEvent>) {
    loop {
        match events.recv().await {
            Ok(SyncEvent::OperationUploaded { key, .. }) => println!("↑ {}", key),
            Ok(SyncEvent::OperationDropped(dropped)) => {
                println!("✗ {} dropped after {} attempt(s): {}", dropped.key, dropped.attempts, dropped.error)
            }
            Ok(SyncEvent::ConflictResolved { key, disposition, .. }) => {
                println!("⇄ {} resolved ({})", key, disposition)
            }
            Ok(SyncEvent::ConnectivityChanged(state)) => println!("Connection: {}", state),
            Ok(SyncEvent::PassCompleted(report)) => print_report(&report),
            Ok(SyncEvent::PhaseChanged(_)) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Get the default data directory (~/.habitsync/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".habitsync")
        .join("data")
}
