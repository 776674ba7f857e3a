//! Shared helpers for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use habitsync_core::{
    EntityKey, EntityType, RemoteDocument, RemoteStore, Snapshot, StaticProbe, SyncConfig,
    SyncEngine, SyncError, SyncResult,
};
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;

/// In-memory remote document store with failure injection
#[derive(Default)]
pub struct MemoryRemoteStore {
    documents: Mutex<HashMap<EntityKey, Snapshot>>,
    /// Server-side modification time per document
    modified: Mutex<HashMap<EntityKey, DateTime<Utc>>>,
    uploads: Mutex<Vec<(EntityKey, Snapshot)>>,
    attempts: Mutex<HashMap<EntityKey, usize>>,
    failures: Mutex<VecDeque<SyncError>>,
    fetch_failures: Mutex<HashMap<EntityType, SyncError>>,
    unreachable: AtomicBool,
}

impl MemoryRemoteStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed a document as if another device had written it
    pub fn put(&self, entity_type: &str, fields: Value) {
        let fields = snapshot(fields);
        let id = fields
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let key = EntityKey::new(entity_type, id);
        self.modified.lock().insert(key.clone(), Utc::now());
        self.documents.lock().insert(key, fields);
    }

    pub fn get(&self, entity_type: &str, id: &str) -> Option<Snapshot> {
        self.documents
            .lock()
            .get(&EntityKey::new(entity_type, id))
            .cloned()
    }

    /// Fail the next upserts with these errors, in order
    pub fn fail_uploads(&self, errors: impl IntoIterator<Item = SyncError>) {
        self.failures.lock().extend(errors);
    }

    pub fn fail_fetch(&self, entity_type: EntityType, error: SyncError) {
        self.fetch_failures.lock().insert(entity_type, error);
    }

    pub fn clear_fetch_failures(&self) {
        self.fetch_failures.lock().clear();
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Successful uploads, in order
    pub fn uploads(&self) -> Vec<(EntityKey, Snapshot)> {
        self.uploads.lock().clone()
    }

    /// Upload attempts (successful or not) for one entity
    pub fn attempts(&self, entity_type: &str, id: &str) -> usize {
        self.attempts
            .lock()
            .get(&EntityKey::new(entity_type, id))
            .copied()
            .unwrap_or(0)
    }

    fn check_reachable(&self) -> SyncResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(SyncError::Unreachable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn fetch_modified_since(
        &self,
        entity_type: &EntityType,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemoteDocument>> {
        self.check_reachable()?;
        if let Some(err) = self.fetch_failures.lock().remove(entity_type) {
            return Err(err);
        }

        let modified = self.modified.lock().clone();
        let documents: Vec<(Snapshot, DateTime<Utc>)> = self
            .documents
            .lock()
            .iter()
            .filter(|(key, _)| &key.entity_type == entity_type)
            .filter_map(|(key, fields)| {
                let modified_at = modified.get(key).copied().unwrap_or_default();
                since
                    .map_or(true, |since| modified_at > since)
                    .then(|| (fields.clone(), modified_at))
            })
            .collect();

        documents
            .into_iter()
            .map(|(fields, modified_at)| {
                let mut doc = RemoteDocument::from_fields(fields)?;
                doc.modified_at = modified_at;
                Ok(doc)
            })
            .collect()
    }

    async fn upsert(&self, key: &EntityKey, fields: &Snapshot) -> SyncResult<()> {
        self.check_reachable()?;
        *self.attempts.lock().entry(key.clone()).or_default() += 1;
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }

        self.modified.lock().insert(key.clone(), Utc::now());
        let mut documents = self.documents.lock();
        let document = documents.entry(key.clone()).or_default();
        for (field, value) in fields {
            document.insert(field.clone(), value.clone());
        }
        self.uploads.lock().push((key.clone(), fields.clone()));
        Ok(())
    }

    async fn delete(&self, key: &EntityKey) -> SyncResult<()> {
        self.check_reachable()?;
        self.documents.lock().remove(key);
        Ok(())
    }
}

pub fn snapshot(value: Value) -> Snapshot {
    value.as_object().cloned().expect("snapshot must be a JSON object")
}

/// Engine on a temporary data directory, already online
pub async fn online_engine(remote: Arc<MemoryRemoteStore>) -> (SyncEngine, TempDir) {
    let data_dir = TempDir::new().unwrap();
    let engine = open_engine(&data_dir, remote).await;
    (engine, data_dir)
}

pub async fn open_engine(data_dir: &TempDir, remote: Arc<MemoryRemoteStore>) -> SyncEngine {
    let engine = SyncEngine::open(
        data_dir.path(),
        &SyncConfig::default(),
        remote,
        Arc::new(StaticProbe::new(true)),
    )
    .unwrap();
    engine.connectivity().check_now().await;
    engine
}

pub fn transient_error() -> SyncError {
    SyncError::Remote {
        status: 503,
        message: "service unavailable".into(),
    }
}
