//! Achievement snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Snapshot;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementSnapshot {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub is_unlocked: bool,
    #[serde(
        default,
        with = "super::timestamp_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub unlocked_at: Option<DateTime<Utc>>,
    /// Progress toward the unlock threshold
    #[serde(default)]
    pub progress: i64,
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
