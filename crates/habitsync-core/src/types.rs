//! Core types for HabitSync

use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Serializable state of an entity as a key→value map.
///
/// This is the boundary format shared with repositories and the remote
/// store. Merge logic decodes it into typed snapshots (see [`crate::entity`]).
pub type Snapshot = Map<String, Value>;

/// Entity type tag
///
/// The four gamification entities have dedicated merge rules; any other tag
/// is carried through as [`EntityType::Other`] and resolved generically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityType {
    Task,
    Avatar,
    Achievement,
    Progress,
    Other(String),
}

impl EntityType {
    /// The entity types the engine reconciles by default
    pub const BUILT_IN: [EntityType; 4] = [
        EntityType::Task,
        EntityType::Avatar,
        EntityType::Achievement,
        EntityType::Progress,
    ];

    /// String tag used in storage keys and remote collection names
    pub fn as_str(&self) -> &str {
        match self {
            EntityType::Task => "task",
            EntityType::Avatar => "avatar",
            EntityType::Achievement => "achievement",
            EntityType::Progress => "progress",
            EntityType::Other(tag) => tag.as_str(),
        }
    }
}

impl From<String> for EntityType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "task" => EntityType::Task,
            "avatar" => EntityType::Avatar,
            "achievement" => EntityType::Achievement,
            "progress" => EntityType::Progress,
            _ => EntityType::Other(tag),
        }
    }
}

impl From<&str> for EntityType {
    fn from(tag: &str) -> Self {
        EntityType::from(tag.to_string())
    }
}

impl From<EntityType> for String {
    fn from(entity_type: EntityType) -> Self {
        entity_type.as_str().to_string()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a pending mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(format!(
                "Invalid operation kind '{}'. Must be one of: create, update, delete",
                other
            )),
        }
    }
}

/// Identity of an entity across local and remote stores
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl EntityKey {
    pub fn new(entity_type: impl Into<EntityType>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }

    /// Key used in the local entity table (`type/id`)
    pub fn storage_key(&self) -> String {
        format!("{}/{}", self.entity_type, self.entity_id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// A single pending local mutation awaiting remote confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    /// `{entityId}_{kind}_{enqueuedAtMillis}`
    pub id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub kind: OperationKind,
    /// Entity state at enqueue time
    pub payload: Snapshot,
    pub enqueued_at: DateTime<Utc>,
    /// Failed upload attempts so far
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Bumped every time a newer intent replaces this record in place
    #[serde(default)]
    pub revision: u64,
}

impl OperationRecord {
    /// Create a record stamped with the current time
    pub fn new(
        entity_type: impl Into<EntityType>,
        entity_id: impl Into<String>,
        kind: OperationKind,
        payload: Snapshot,
    ) -> Self {
        Self::at(entity_type, entity_id, kind, payload, Utc::now())
    }

    /// Create a record with an explicit enqueue time
    pub fn at(
        entity_type: impl Into<EntityType>,
        entity_id: impl Into<String>,
        kind: OperationKind,
        payload: Snapshot,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        let entity_id = entity_id.into();
        let id = format!(
            "{}_{}_{}",
            entity_id,
            kind,
            enqueued_at.timestamp_millis()
        );
        Self {
            id,
            entity_type: entity_type.into(),
            entity_id,
            kind,
            payload,
            enqueued_at,
            attempt: 0,
            last_error: None,
            revision: 0,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.entity_id.clone())
    }

    pub fn is_same_entity(&self, other: &OperationRecord) -> bool {
        self.entity_type == other.entity_type && self.entity_id == other.entity_id
    }
}

/// Field names carrying the comparable timestamp, in preference order
pub const UPDATED_AT_FIELD: &str = "updatedAt";
pub const CREATED_AT_FIELD: &str = "createdAt";

/// Extract the comparable timestamp of a snapshot.
///
/// Prefers `updatedAt`, falls back to `createdAt`, and defaults to the Unix
/// epoch when neither is present or parseable.
pub fn snapshot_timestamp(snapshot: &Snapshot) -> DateTime<Utc> {
    snapshot
        .get(UPDATED_AT_FIELD)
        .and_then(parse_timestamp)
        .or_else(|| snapshot.get(CREATED_AT_FIELD).and_then(parse_timestamp))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Parse a timestamp value: RFC 3339 / ISO-8601 strings or epoch millis.
///
/// ISO-8601 strings without an offset are read as UTC.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

/// Format a timestamp the way snapshots carry it
pub fn format_timestamp(ts: DateTime<Utc>) -> Value {
    Value::String(ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}
