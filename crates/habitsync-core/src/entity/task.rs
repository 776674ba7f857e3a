//! Habit task snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Snapshot;

/// A recurring habit task with completion and streak bookkeeping
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(
        default,
        with = "super::timestamp_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,
    /// Current streak (consecutive completions)
    #[serde(default, alias = "streak")]
    pub streak_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longest_streak: Option<i64>,
    #[serde(
        default,
        with = "super::timestamp_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "super::timestamp_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
    /// Title, description, schedule and any other fields
    #[serde(flatten)]
    pub extra: Snapshot,
}
