//! Progress entry snapshot
//!
//! A progress entry records additive contributions (XP gained, tasks
//! completed) for one period, typically a day.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Snapshot;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "xpEarned")]
    pub xp_gained: i64,
    #[serde(default)]
    pub tasks_completed: i64,
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
    #[serde(flatten)]
    pub extra: Snapshot,
}
