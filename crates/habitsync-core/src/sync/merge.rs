//! Entity-specific merge rules
//!
//! Every merge starts from the newer side's snapshot (so descriptive fields
//! like titles follow recency) and then applies the rules that keep
//! progression monotonic:
//!
//! - task: completion follows the strictly newer side, streaks never regress
//! - avatar: numeric progression takes the max, unlocks are unioned
//! - achievement: unlocked is sticky, earliest unlock time wins
//! - progress: additive counters are summed
//! - generic: newer local overwrites remote except `id` / `createdAt`

use std::cmp::max;

use chrono::{DateTime, Utc};

use crate::entity::{
    AchievementSnapshot, AvatarSnapshot, EntitySnapshot, ProgressSnapshot, TaskSnapshot,
};
use crate::error::{SyncError, SyncResult};
use crate::sync::detector::DataConflict;
use crate::types::{Snapshot, CREATED_AT_FIELD};

/// Fields that are never overwritten once set
const IMMUTABLE_FIELDS: [&str; 2] = ["id", CREATED_AT_FIELD];

/// Merge both sides of `conflict` according to its entity type.
///
/// # Errors
///
/// Returns `SyncError::MalformedPayload` when either side cannot be decoded
/// into its typed snapshot; callers downgrade to last-write-wins.
pub fn merge_conflict(conflict: &DataConflict) -> SyncResult<Snapshot> {
    let entity_type = &conflict.key.entity_type;
    let local_newer = conflict.local_is_newer();
    let latest = max(conflict.local_timestamp(), conflict.remote_timestamp());

    let local = EntitySnapshot::decode(entity_type, &conflict.local)?;
    let remote = EntitySnapshot::decode(entity_type, &conflict.remote)?;

    let merged = match (local, remote) {
        (EntitySnapshot::Task(l), EntitySnapshot::Task(r)) => {
            EntitySnapshot::Task(merge_task(&l, &r, local_newer, latest))
        }
        (EntitySnapshot::Avatar(l), EntitySnapshot::Avatar(r)) => {
            EntitySnapshot::Avatar(merge_avatar(&l, &r, local_newer, latest))
        }
        (EntitySnapshot::Achievement(l), EntitySnapshot::Achievement(r)) => {
            EntitySnapshot::Achievement(merge_achievement(&l, &r, local_newer, latest))
        }
        (EntitySnapshot::Progress(l), EntitySnapshot::Progress(r)) => {
            EntitySnapshot::Progress(merge_progress(&l, &r, local_newer, latest))
        }
        (EntitySnapshot::Generic { entity_type, fields: l }, EntitySnapshot::Generic { fields: r, .. }) => {
            EntitySnapshot::Generic {
                entity_type,
                fields: merge_generic(&l, &r, local_newer),
            }
        }
        (l, r) => {
            return Err(SyncError::InvalidOperation(format!(
                "cannot merge {} with {}",
                l.entity_type(),
                r.entity_type()
            )))
        }
    };

    merged.encode()
}

fn newer<'a, T>(local: &'a T, remote: &'a T, local_newer: bool) -> &'a T {
    if local_newer {
        local
    } else {
        remote
    }
}

/// Merge two task snapshots.
///
/// Completion state (flag, timestamp, streak fields) comes from the local
/// side only when it is strictly newer; the resulting streak counters are
/// the maximum of both sides regardless.
pub fn merge_task(
    local: &TaskSnapshot,
    remote: &TaskSnapshot,
    local_newer: bool,
    latest: DateTime<Utc>,
) -> TaskSnapshot {
    // The newer side's clone carries its completion flag and timestamp
    let mut merged = newer(local, remote, local_newer).clone();

    merged.streak_count = max(local.streak_count, remote.streak_count);
    merged.longest_streak = match (local.longest_streak, remote.longest_streak) {
        (Some(l), Some(r)) => Some(max(l, r)),
        (l, r) => l.or(r),
    }
    .map(|longest| max(longest, merged.streak_count));
    merged.created_at = earliest(local.created_at, remote.created_at);
    merged.updated_at = Some(latest);
    merged
}

/// Merge two avatar snapshots: progression only ever moves forward.
pub fn merge_avatar(
    local: &AvatarSnapshot,
    remote: &AvatarSnapshot,
    local_newer: bool,
    latest: DateTime<Utc>,
) -> AvatarSnapshot {
    let mut merged = newer(local, remote, local_newer).clone();

    merged.level = max(local.level, remote.level);
    merged.total_xp = max(local.total_xp, remote.total_xp);
    merged.current_xp = max(local.current_xp, remote.current_xp);

    merged.attributes = local.attributes.clone();
    for (name, value) in &remote.attributes {
        merged
            .attributes
            .entry(name.clone())
            .and_modify(|v| *v = max(*v, *value))
            .or_insert(*value);
    }

    merged.unlocked_items = local
        .unlocked_items
        .union(&remote.unlocked_items)
        .cloned()
        .collect();
    merged.created_at = earliest(local.created_at, remote.created_at);
    merged.updated_at = Some(latest);
    merged
}

/// Merge two achievement snapshots: an unlock on either side sticks.
pub fn merge_achievement(
    local: &AchievementSnapshot,
    remote: &AchievementSnapshot,
    local_newer: bool,
    latest: DateTime<Utc>,
) -> AchievementSnapshot {
    let mut merged = newer(local, remote, local_newer).clone();

    merged.is_unlocked = local.is_unlocked || remote.is_unlocked;
    merged.unlocked_at = match (local.is_unlocked, remote.is_unlocked) {
        (true, true) => earliest(local.unlocked_at, remote.unlocked_at),
        (true, false) => local.unlocked_at,
        (false, true) => remote.unlocked_at,
        (false, false) => None,
    };
    merged.progress = max(local.progress, remote.progress);
    merged.created_at = earliest(local.created_at, remote.created_at);
    merged.updated_at = Some(latest);
    merged
}

/// Merge two progress entries: both sessions' contributions are kept.
pub fn merge_progress(
    local: &ProgressSnapshot,
    remote: &ProgressSnapshot,
    local_newer: bool,
    latest: DateTime<Utc>,
) -> ProgressSnapshot {
    let mut merged = newer(local, remote, local_newer).clone();

    merged.xp_gained = local.xp_gained.saturating_add(remote.xp_gained);
    merged.tasks_completed = local.tasks_completed.saturating_add(remote.tasks_completed);
    merged.created_at = earliest(local.created_at, remote.created_at);
    merged.updated_at = Some(latest);
    merged
}

/// Field-level merge for entity types without dedicated rules
pub fn merge_generic(local: &Snapshot, remote: &Snapshot, local_newer: bool) -> Snapshot {
    if !local_newer {
        return remote.clone();
    }

    let mut merged = remote.clone();
    for (key, value) in local {
        if IMMUTABLE_FIELDS.contains(&key.as_str()) && merged.contains_key(key) {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    merged
}

fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
