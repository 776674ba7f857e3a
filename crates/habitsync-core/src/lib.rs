//! HabitSync Core Library
//!
//! Local-first reconciliation for a gamified habit tracker.
//!
//! ## Overview
//!
//! Tasks, avatars, achievements and progress entries are mutated on the
//! device first. Every mutation becomes an [`OperationRecord`] in a durable,
//! coalescing [`SyncQueue`]; a background [`SyncScheduler`] uploads the queue
//! whenever the [`ConnectivityMonitor`] reports the remote store reachable,
//! and [`SyncEngine::sync_all`] pulls remote changes, detecting and resolving
//! conflicts per entity type.
//!
//! ## Core Principles
//!
//! - **Local-first**: every write succeeds locally; the network is optional
//! - **Last intent wins**: one pending operation per entity
//! - **Progress never regresses**: merges keep streaks, XP and unlocks
//!
//! ## Quick Start
//!
//! ```ignore
//! use habitsync_core::{HttpProbe, HttpRemoteStore, OperationKind, SyncConfig, SyncEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::load_or_default("~/.habitsync/data")?;
//!     let remote = Arc::new(HttpRemoteStore::new("https://api.example.com", "user-1")?);
//!     let probe = Arc::new(HttpProbe::from_config(&config)?);
//!     let engine = SyncEngine::open("~/.habitsync/data", &config, remote, probe)?;
//!
//!     engine.enqueue("task", "t1", OperationKind::Update, snapshot);
//!     engine.connectivity().check_now().await;
//!     let report = engine.sync_all().await?;
//!     println!("uploaded {}", report.drain.uploaded);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod entity;
pub mod error;
pub mod optimistic;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod types;

// Re-exports
pub use config::SyncConfig;
pub use entity::EntitySnapshot;
pub use error::{SyncError, SyncResult};
pub use optimistic::{OptimisticUpdate, OptimisticUpdateTracker, RevertReason};
pub use remote::{HttpRemoteStore, RemoteDocument, RemoteStore};
pub use storage::{LocalStore, QueueStore, Storage};
pub use sync::{
    ConflictDetector, ConflictResolution, ConflictResolver, ConnectionState, ConnectivityMonitor,
    DataConflict, Disposition, Enqueued, HttpProbe, LinkStatus, ReachabilityProbe, ResolutionStrategy,
    StaticProbe, SyncEngine, SyncEvent, SyncPhase, SyncQueue, SyncReport, SyncScheduler,
    SyncStatus,
};
pub use types::*;
