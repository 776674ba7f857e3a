//! Sync event types and status tracking
//!
//! ## Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncPhase: state of the current/last sync cycle                │
//! │  ├── Idle: nothing has run yet                                  │
//! │  ├── Syncing: a pass or drain is in progress                    │
//! │  ├── Completed: last pass succeeded for every entity type       │
//! │  └── Error: last pass failed (message)                          │
//! │                                                                 │
//! │  SyncEvent: notifications for UI / repositories                 │
//! │  ├── PhaseChanged                                               │
//! │  ├── OperationUploaded / OperationDropped                       │
//! │  ├── ConflictResolved                                           │
//! │  ├── ConnectivityChanged                                        │
//! │  └── PassCompleted (with SyncReport)                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sync::connectivity::ConnectionState;
use crate::sync::resolver::Disposition;
use crate::types::{EntityKey, OperationRecord};

/// State of the sync cycle
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "message")]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    Completed,
    Error(String),
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Idle => write!(f, "Idle"),
            SyncPhase::Syncing => write!(f, "Syncing"),
            SyncPhase::Completed => write!(f, "Completed"),
            SyncPhase::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// Outcome of one drain of the queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Records acknowledged by the remote store
    pub uploaded: usize,
    /// Records that failed and stay queued for another attempt
    pub retrying: usize,
    /// Records removed without being uploaded (retries exhausted or
    /// permanent failure)
    pub dropped: Vec<DroppedOperation>,
    /// The drain stopped early because the remote was unreachable
    pub aborted: bool,
}

impl DrainReport {
    pub fn failure_count(&self) -> usize {
        self.retrying + self.dropped.len()
    }

    pub(crate) fn absorb(&mut self, other: DrainReport) {
        self.uploaded += other.uploaded;
        self.retrying += other.retrying;
        self.dropped.extend(other.dropped);
        self.aborted |= other.aborted;
    }
}

/// A record removed from the queue without remote acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedOperation {
    pub id: String,
    pub key: EntityKey,
    pub attempts: u32,
    pub error: String,
}

impl DroppedOperation {
    pub(crate) fn from_record(record: &OperationRecord, error: String) -> Self {
        Self {
            id: record.id.clone(),
            key: record.key(),
            attempts: record.attempt,
            error,
        }
    }
}

/// Outcome of one full `sync_all` pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub drain: DrainReport,
    /// Remote records written locally because no local copy existed
    pub pulled_new: usize,
    /// Remote records identical (by content) to the local copy
    pub unchanged: usize,
    pub conflicts_resolved: usize,
    /// Resolved snapshots pushed back to the remote store
    pub reuploaded: usize,
    /// Per-entity-type failures that left the last-sync timestamp unchanged
    pub errors: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncReport {
    /// A pass is successful when every entity type reconciled and the drain
    /// was not aborted
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && !self.drain.aborted
    }
}

/// Status snapshot for repositories and UI (`syncStatus()`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub online: bool,
    pub connection: ConnectionState,
    pub pending_count: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub phase: SyncPhase,
    /// Failures (retrying + dropped) in the most recent drain
    pub last_failure_count: usize,
}

/// Events emitted by the sync subsystem
#[derive(Debug, Clone)]
pub enum SyncEvent {
    PhaseChanged(SyncPhase),
    /// The remote store acknowledged an operation
    OperationUploaded { id: String, key: EntityKey },
    /// An operation was removed from the queue without being uploaded
    OperationDropped(DroppedOperation),
    ConflictResolved {
        key: EntityKey,
        disposition: Disposition,
        reason: String,
    },
    ConnectivityChanged(ConnectionState),
    PassCompleted(SyncReport),
}

impl SyncEvent {
    /// Get the entity key associated with this event, if any
    pub fn entity_key(&self) -> Option<&EntityKey> {
        match self {
            SyncEvent::OperationUploaded { key, .. } => Some(key),
            SyncEvent::OperationDropped(dropped) => Some(&dropped.key),
            SyncEvent::ConflictResolved { key, .. } => Some(key),
            SyncEvent::PhaseChanged(_)
            | SyncEvent::ConnectivityChanged(_)
            | SyncEvent::PassCompleted(_) => None,
        }
    }
}
