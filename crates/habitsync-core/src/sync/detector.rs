//! Conflict detection between a local and a remote snapshot
//!
//! A conflict exists only when the two sides disagree on content. Timestamps
//! are extracted (`updatedAt` → `createdAt` → epoch) so callers can log which
//! side moved, but they never turn identical content into a conflict:
//!
//! | timestamps | content    | conflict |
//! |------------|------------|----------|
//! | equal      | equal      | no       |
//! | equal      | different  | yes (clock skew / concurrent edit) |
//! | different  | equal      | no (nothing to resolve)            |
//! | different  | different  | yes                                |

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, trace};

use crate::types::{snapshot_timestamp, EntityKey, Snapshot, CREATED_AT_FIELD, UPDATED_AT_FIELD};

/// A local and a remote snapshot of the same entity
#[derive(Debug, Clone, PartialEq)]
pub struct DataConflict {
    pub key: EntityKey,
    pub local: Snapshot,
    pub remote: Snapshot,
}

impl DataConflict {
    pub fn new(key: EntityKey, local: Snapshot, remote: Snapshot) -> Self {
        Self { key, local, remote }
    }

    pub fn local_timestamp(&self) -> DateTime<Utc> {
        snapshot_timestamp(&self.local)
    }

    pub fn remote_timestamp(&self) -> DateTime<Utc> {
        snapshot_timestamp(&self.remote)
    }

    /// Whether the local side is strictly newer than the remote side
    pub fn local_is_newer(&self) -> bool {
        self.local_timestamp() > self.remote_timestamp()
    }
}

/// Stateless conflict detector
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    /// Decide whether `local` and `remote` genuinely conflict
    pub fn has_conflict(&self, local: &Snapshot, remote: &Snapshot) -> bool {
        if same_content(local, remote) {
            // A newer timestamp over identical content is churn, not a conflict
            return false;
        }

        let local_ts = snapshot_timestamp(local);
        let remote_ts = snapshot_timestamp(remote);
        if local_ts == remote_ts {
            debug!(%local_ts, "Diverging content under identical timestamps");
        } else {
            trace!(%local_ts, %remote_ts, "Both sides changed");
        }
        true
    }

    /// Build a [`DataConflict`] if the pair conflicts
    pub fn detect(&self, key: &EntityKey, local: &Snapshot, remote: &Snapshot) -> Option<DataConflict> {
        if self.has_conflict(local, remote) {
            Some(DataConflict::new(key.clone(), local.clone(), remote.clone()))
        } else {
            None
        }
    }
}

/// Deep equality over JSON values.
///
/// Maps compare key-by-key recursively, lists element-wise in order, and
/// numbers by numeric value so that `1` and `1.0` are equal.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => maps_equal(a, b),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => match (a.as_u64(), b.as_u64()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_f64() == b.as_f64(),
            },
        },
        _ => a == b,
    }
}

fn maps_equal(a: &Snapshot, b: &Snapshot) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .all(|(key, value)| b.get(key).is_some_and(|other| deep_equal(value, other)))
}

/// Content equality of two snapshots, ignoring the timestamp fields.
///
/// Either stamp can be the comparable timestamp (`createdAt` stands in when
/// `updatedAt` is absent), so neither counts as content.
pub fn same_content(local: &Snapshot, remote: &Snapshot) -> bool {
    let strip = |s: &Snapshot| {
        let mut s = s.clone();
        s.remove(UPDATED_AT_FIELD);
        s.remove(CREATED_AT_FIELD);
        s
    };
    maps_equal(&strip(local), &strip(remote))
}
