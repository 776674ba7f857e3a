//! Typed entity snapshots
//!
//! Repositories and the remote store exchange entities as untyped
//! [`Snapshot`] maps. Reconciliation decodes them once, at this boundary,
//! into an [`EntitySnapshot`] so merge rules operate on typed fields.
//!
//! Fields the typed structs don't model are preserved in each struct's
//! `extra` map and written back unchanged on encode.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use crate::types::{EntityType, Snapshot};

pub mod achievement;
pub mod avatar;
pub mod progress;
pub mod task;

pub use achievement::AchievementSnapshot;
pub use avatar::AvatarSnapshot;
pub use progress::ProgressSnapshot;
pub use task::TaskSnapshot;

/// A decoded entity snapshot, tagged by entity type
#[derive(Debug, Clone, PartialEq)]
pub enum EntitySnapshot {
    Task(TaskSnapshot),
    Avatar(AvatarSnapshot),
    Achievement(AchievementSnapshot),
    Progress(ProgressSnapshot),
    /// Entity types without dedicated merge rules
    Generic {
        entity_type: EntityType,
        fields: Snapshot,
    },
}

impl EntitySnapshot {
    /// Decode a boundary map into its typed variant.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::MalformedPayload` when a field of a typed entity
    /// has the wrong shape (e.g. a string where a count is expected).
    pub fn decode(entity_type: &EntityType, snapshot: &Snapshot) -> SyncResult<Self> {
        Ok(match entity_type {
            EntityType::Task => EntitySnapshot::Task(decode_typed(entity_type, snapshot)?),
            EntityType::Avatar => EntitySnapshot::Avatar(decode_typed(entity_type, snapshot)?),
            EntityType::Achievement => {
                EntitySnapshot::Achievement(decode_typed(entity_type, snapshot)?)
            }
            EntityType::Progress => EntitySnapshot::Progress(decode_typed(entity_type, snapshot)?),
            EntityType::Other(_) => EntitySnapshot::Generic {
                entity_type: entity_type.clone(),
                fields: snapshot.clone(),
            },
        })
    }

    /// Encode back into the boundary map format
    pub fn encode(&self) -> SyncResult<Snapshot> {
        match self {
            EntitySnapshot::Task(task) => encode_typed(task),
            EntitySnapshot::Avatar(avatar) => encode_typed(avatar),
            EntitySnapshot::Achievement(achievement) => encode_typed(achievement),
            EntitySnapshot::Progress(progress) => encode_typed(progress),
            EntitySnapshot::Generic { fields, .. } => Ok(fields.clone()),
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            EntitySnapshot::Task(_) => EntityType::Task,
            EntitySnapshot::Avatar(_) => EntityType::Avatar,
            EntitySnapshot::Achievement(_) => EntityType::Achievement,
            EntitySnapshot::Progress(_) => EntityType::Progress,
            EntitySnapshot::Generic { entity_type, .. } => entity_type.clone(),
        }
    }
}

fn decode_typed<T: DeserializeOwned>(entity_type: &EntityType, snapshot: &Snapshot) -> SyncResult<T> {
    serde_json::from_value(Value::Object(snapshot.clone())).map_err(|e| {
        SyncError::MalformedPayload {
            entity_type: entity_type.to_string(),
            message: e.to_string(),
        }
    })
}

fn encode_typed<T: Serialize>(value: &T) -> SyncResult<Snapshot> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(SyncError::Serialization(format!(
            "entity encoded to non-object value: {}",
            other
        ))),
    }
}

/// Serde adapter for optional timestamps that may arrive as ISO-8601
/// strings or epoch millis. Always written back as RFC 3339 (millis, `Z`).
pub(crate) mod timestamp_opt {
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    use crate::types::{format_timestamp, parse_timestamp};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => match format_timestamp(*ts) {
                Value::String(s) => serializer.serialize_str(&s),
                _ => serializer.serialize_none(),
            },
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(v) => parse_timestamp(&v)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", v))),
        }
    }
}
