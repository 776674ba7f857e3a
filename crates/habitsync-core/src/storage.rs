//! Persistent storage using redb.
//!
//! This module provides ACID-compliant storage for:
//! - The pending operation queue (one slot holding the JSON array of records)
//! - Sync metadata (last successful sync timestamp)
//! - Local entity snapshots used as the "local side" during reconciliation
//!
//! The engine talks to persistence through two traits so tests and host
//! applications can substitute their own backends:
//! - [`QueueStore`]: queue slot + last-sync slot
//! - [`LocalStore`]: entity snapshots keyed by `type/id`

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

use crate::error::SyncError;
use crate::types::{EntityKey, OperationRecord, Snapshot};

// Table definitions
const QUEUE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sync_queue");
const META_TABLE: TableDefinition<&str, &str> = TableDefinition::new("sync_meta");
const ENTITIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("entities");

/// Durable slots backing the sync queue
pub trait QueueStore: Send + Sync {
    /// Replace the persisted queue with `records`
    fn save_queue(&self, records: &[OperationRecord]) -> Result<(), SyncError>;

    /// Load the persisted queue (empty if never saved)
    fn load_queue(&self) -> Result<Vec<OperationRecord>, SyncError>;

    fn save_last_sync(&self, at: DateTime<Utc>) -> Result<(), SyncError>;

    fn load_last_sync(&self) -> Result<Option<DateTime<Utc>>, SyncError>;
}

/// Local entity snapshots, as seen by the engine during reconciliation
pub trait LocalStore: Send + Sync {
    fn load_entity(&self, key: &EntityKey) -> Result<Option<Snapshot>, SyncError>;

    /// Insert or overwrite the snapshot for `key`
    fn save_entity(&self, key: &EntityKey, snapshot: &Snapshot) -> Result<(), SyncError>;

    fn delete_entity(&self, key: &EntityKey) -> Result<(), SyncError>;
}

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl Storage {
    /// Queue slot key (the whole queue lives in one value)
    const QUEUE_KEY: &'static str = "pending_operations";

    /// Last successful sync timestamp key
    const LAST_SYNC_KEY: &'static str = "last_sync_at";

    /// Create a new storage instance at the given path.
    ///
    /// This will:
    /// - Create the database directory if it doesn't exist
    /// - Initialize the database file
    /// - Create all required tables
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(QUEUE_TABLE)?;
            let _ = write_txn.open_table(META_TABLE)?;
            let _ = write_txn.open_table(ENTITIES_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }
}

impl QueueStore for Storage {
    fn save_queue(&self, records: &[OperationRecord]) -> Result<(), SyncError> {
        let data = serde_json::to_vec(records)?;
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(QUEUE_TABLE)?;
            table.insert(Self::QUEUE_KEY, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn load_queue(&self) -> Result<Vec<OperationRecord>, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(QUEUE_TABLE)?;

        match table.get(Self::QUEUE_KEY)? {
            Some(v) => Ok(serde_json::from_slice(v.value())?),
            None => Ok(Vec::new()),
        }
    }

    fn save_last_sync(&self, at: DateTime<Utc>) -> Result<(), SyncError> {
        let value = at.to_rfc3339();
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(META_TABLE)?;
            table.insert(Self::LAST_SYNC_KEY, value.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn load_last_sync(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(META_TABLE)?;

        match table.get(Self::LAST_SYNC_KEY)? {
            Some(v) => {
                let parsed = DateTime::parse_from_rfc3339(v.value())
                    .map_err(|e| SyncError::Serialization(e.to_string()))?;
                Ok(Some(parsed.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }
}

impl LocalStore for Storage {
    fn load_entity(&self, key: &EntityKey) -> Result<Option<Snapshot>, SyncError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ENTITIES_TABLE)?;
        let storage_key = key.storage_key();

        match table.get(storage_key.as_str())? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    fn save_entity(&self, key: &EntityKey, snapshot: &Snapshot) -> Result<(), SyncError> {
        let data = serde_json::to_vec(snapshot)?;
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTITIES_TABLE)?;
            let storage_key = key.storage_key();
            table.insert(storage_key.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete_entity(&self, key: &EntityKey) -> Result<(), SyncError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTITIES_TABLE)?;
            let storage_key = key.storage_key();
            table.remove(storage_key.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
