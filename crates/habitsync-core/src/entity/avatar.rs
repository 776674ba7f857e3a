//! Avatar (character progression) snapshot

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Snapshot;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarSnapshot {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub level: i64,
    #[serde(default, alias = "totalXP")]
    pub total_xp: i64,
    #[serde(default, alias = "currentXP")]
    pub current_xp: i64,
    /// Per-attribute progression values (strength, focus, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, i64>,
    #[serde(default)]
    pub unlocked_items: BTreeSet<String>,
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
