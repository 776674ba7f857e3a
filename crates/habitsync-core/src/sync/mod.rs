//! Queue-and-reconcile synchronization layer
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncEngine (single logical worker, busy-flag guarded)          │
//! │  ├── SyncQueue: one pending OperationRecord per entity          │
//! │  │   └── drain → RemoteStore (bounded concurrency, retries)     │
//! │  ├── pull: RemoteStore::fetch_modified_since(last sync)         │
//! │  │   ├── ConflictDetector: genuine conflict?                    │
//! │  │   └── ConflictResolver: per-type strategy → resolution       │
//! │  └── SyncEvent broadcast                                        │
//! │                                                                 │
//! │  ConnectivityMonitor (link status + reachability probe)         │
//! │  SyncScheduler (periodic drain, enqueue wake-ups, reconnects)   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let engine = Arc::new(SyncEngine::open(&data_dir, config.clone(), remote, probe)?);
//! let scheduler = SyncScheduler::start(engine.clone(), Some(tracker), &config);
//!
//! engine.enqueue("task", "t1", OperationKind::Update, snapshot);
//! let report = engine.sync_all().await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{SyncError, SyncResult};

pub mod connectivity;
pub mod detector;
pub mod engine;
pub mod events;
pub mod merge;
pub mod queue;
pub mod resolver;
pub mod retry;
pub mod scheduler;

pub use connectivity::{
    ConnectionState, ConnectivityMonitor, HttpProbe, LinkStatus, ReachabilityProbe, StaticProbe,
};
pub use detector::{deep_equal, same_content, ConflictDetector, DataConflict};
pub use engine::SyncEngine;
pub use events::{DrainReport, DroppedOperation, SyncEvent, SyncPhase, SyncReport, SyncStatus};
pub use queue::{Enqueued, SyncQueue};
pub use resolver::{
    ConflictResolution, ConflictResolver, Disposition, ResolutionStrategy, UserChoice,
    UserChoiceHandler,
};
pub use retry::{FailureKind, RetryPolicy};
pub use scheduler::SyncScheduler;

/// Holds a busy flag for its lifetime. A second acquire while held fails
/// with `SyncError::SyncInProgress`.
pub(crate) struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    pub(crate) fn acquire(flag: &'a AtomicBool) -> SyncResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::SyncInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
