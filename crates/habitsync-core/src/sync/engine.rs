//! Sync engine
//!
//! Orchestrates one reconciliation pass per call to [`SyncEngine::sync_all`]:
//!
//! ```text
//! for each entity type:
//!   (a) drain queued local operations of that type
//!   (b) fetch remote documents modified after the last successful sync
//!   (c) per document:
//!         no local copy      → save remote locally
//!         same content       → nothing to do
//!         conflict           → resolve, save locally,
//!                              re-upload if local data survived
//! ```
//!
//! The last-sync timestamp only advances after a pass in which every entity
//! type reconciled; otherwise the next pass re-reads the same window.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::connectivity::{ConnectivityMonitor, ReachabilityProbe};
use super::detector::ConflictDetector;
use super::events::{DrainReport, SyncEvent, SyncPhase, SyncReport, SyncStatus};
use super::queue::{Enqueued, SyncQueue};
use super::resolver::ConflictResolver;
use super::retry::{FailureKind, RetryPolicy};
use super::BusyGuard;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteDocument, RemoteStore};
use crate::storage::{LocalStore, QueueStore, Storage};
use crate::types::{EntityKey, EntityType, OperationKind, OperationRecord, Snapshot};

/// Capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Database file name inside the data directory
pub const DATABASE_FILE_NAME: &str = "habitsync.redb";

pub struct SyncEngine {
    queue: Arc<SyncQueue>,
    remote: Arc<dyn RemoteStore>,
    local: Arc<dyn LocalStore>,
    meta: Arc<dyn QueueStore>,
    connectivity: Arc<ConnectivityMonitor>,
    detector: ConflictDetector,
    resolver: ConflictResolver,
    entity_types: Vec<EntityType>,
    /// Set while a pass or a drain runs
    busy: AtomicBool,
    phase: RwLock<SyncPhase>,
    last_sync_at: RwLock<Option<DateTime<Utc>>>,
    last_failure_count: AtomicUsize,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
    /// Build an engine from its collaborators
    pub fn new(
        config: &SyncConfig,
        queue_store: Arc<dyn QueueStore>,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let queue = SyncQueue::load(
            queue_store.clone(),
            RetryPolicy::from_config(config),
            config.upload_concurrency,
        )
        .with_events(event_tx.clone());

        let last_sync_at = queue_store.load_last_sync().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load last sync time, starting from scratch");
            None
        });

        Self {
            queue: Arc::new(queue),
            remote,
            local,
            meta: queue_store,
            connectivity,
            detector: ConflictDetector::new(),
            resolver: ConflictResolver::from_config(config),
            entity_types: config.entity_types.clone(),
            busy: AtomicBool::new(false),
            phase: RwLock::new(SyncPhase::Idle),
            last_sync_at: RwLock::new(last_sync_at),
            last_failure_count: AtomicUsize::new(0),
            event_tx,
        }
    }

    /// Open the redb database in `data_dir` and build an engine on it
    pub fn open(
        data_dir: impl AsRef<Path>,
        config: &SyncConfig,
        remote: Arc<dyn RemoteStore>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let storage = Arc::new(Storage::new(data_dir.as_ref().join(DATABASE_FILE_NAME))?);
        let connectivity = Arc::new(ConnectivityMonitor::from_config(probe, config));
        info!(data_dir = %data_dir.as_ref().display(), "Sync engine opened");
        Ok(Self::new(config, storage.clone(), storage, remote, connectivity))
    }

    /// Replace the conflict resolver (e.g. to install a user-choice handler)
    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Repository API
    // ═══════════════════════════════════════════════════════════════════════

    /// Queue a local mutation for upload.
    ///
    /// The mutation is applied to the local snapshot the same way the remote
    /// applies an upsert (fields merged over the previous copy, or removed
    /// for a delete), so the next pass compares the remote against what this
    /// device actually wrote. The queue is persisted before this returns. A
    /// running [`SyncScheduler`](super::SyncScheduler) drains right away when
    /// online.
    pub fn enqueue(
        &self,
        entity_type: impl Into<EntityType>,
        entity_id: impl Into<String>,
        kind: OperationKind,
        snapshot: Snapshot,
    ) -> Enqueued {
        let record = OperationRecord::new(entity_type, entity_id, kind, snapshot);
        if let Err(e) = self.apply_locally(&record) {
            warn!(
                entity_type = %record.entity_type,
                entity_id = %record.entity_id,
                error = %e,
                "Failed to apply mutation to local store"
            );
        }
        self.queue.enqueue(record)
    }

    fn apply_locally(&self, record: &OperationRecord) -> SyncResult<()> {
        let key = record.key();
        match record.kind {
            OperationKind::Delete => self.local.delete_entity(&key),
            OperationKind::Create | OperationKind::Update => {
                let mut merged = self.local.load_entity(&key)?.unwrap_or_default();
                merged.extend(record.payload.clone());
                self.local.save_entity(&key, &merged)
            }
        }
    }

    pub fn has_pending(&self, entity_type: impl Into<EntityType>, entity_id: impl Into<String>) -> bool {
        self.queue.has_pending(&EntityKey::new(entity_type, entity_id))
    }

    pub fn sync_status(&self) -> SyncStatus {
        let connection = self.connectivity.current_state();
        SyncStatus {
            online: connection.is_online(),
            connection,
            pending_count: self.queue.len(),
            last_sync_at: *self.last_sync_at.read(),
            phase: self.phase(),
            last_failure_count: self.last_failure_count.load(Ordering::Relaxed),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase.read().clone()
    }

    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        *self.last_sync_at.read()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn set_phase(&self, phase: SyncPhase) {
        {
            let mut current = self.phase.write();
            if *current == phase {
                return;
            }
            *current = phase.clone();
        }
        self.emit(SyncEvent::PhaseChanged(phase));
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sync entry points
    // ═══════════════════════════════════════════════════════════════════════

    fn ensure_online(&self) -> SyncResult<()> {
        let state = self.connectivity.current_state();
        if state.is_online() {
            Ok(())
        } else {
            Err(SyncError::Offline(format!("connection is {}", state)))
        }
    }

    /// Upload every queued operation without pulling.
    ///
    /// # Errors
    ///
    /// `SyncInProgress` if a pass or drain is already running, `Offline`
    /// when the connectivity monitor does not report online.
    pub async fn drain_now(&self) -> SyncResult<DrainReport> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        self.ensure_online()?;

        self.set_phase(SyncPhase::Syncing);
        let result = self.queue.drain(self.remote.as_ref(), None).await;
        match &result {
            Ok(report) => {
                self.last_failure_count
                    .store(report.failure_count(), Ordering::Relaxed);
                if report.aborted {
                    self.set_phase(SyncPhase::Error("remote unreachable".to_string()));
                } else {
                    self.set_phase(SyncPhase::Completed);
                }
            }
            Err(e) => self.set_phase(SyncPhase::Error(e.to_string())),
        }
        result
    }

    /// Run a full reconciliation pass over every configured entity type.
    ///
    /// A second call while a pass (or drain) runs is rejected with
    /// `SyncInProgress` rather than queued. Per-type failures are collected
    /// in the report; the pass itself only errors when it cannot start.
    pub async fn sync_all(&self) -> SyncResult<SyncReport> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        self.ensure_online()?;

        self.set_phase(SyncPhase::Syncing);
        let started_at = Utc::now();
        let since = self.last_sync_at();
        info!(since = ?since, "Starting sync pass");

        let mut report = SyncReport {
            started_at: Some(started_at),
            ..Default::default()
        };

        for entity_type in &self.entity_types {
            if let Err(e) = self.sync_entity_type(entity_type, since, &mut report).await {
                warn!(entity_type = %entity_type, error = %e, "Entity type failed to sync");
                report.errors.push(format!("{}: {}", entity_type, e));
                if e.failure_kind() == FailureKind::Abort {
                    break;
                }
            }
        }

        report.finished_at = Some(Utc::now());
        self.last_failure_count
            .store(report.drain.failure_count(), Ordering::Relaxed);

        if report.is_success() {
            if let Err(e) = self.meta.save_last_sync(started_at) {
                warn!(error = %e, "Failed to persist last sync time");
            }
            *self.last_sync_at.write() = Some(started_at);
            info!(
                uploaded = report.drain.uploaded,
                pulled = report.pulled_new,
                conflicts = report.conflicts_resolved,
                "Sync pass completed"
            );
            self.set_phase(SyncPhase::Completed);
        } else {
            let summary = if report.drain.aborted && report.errors.is_empty() {
                "remote unreachable".to_string()
            } else {
                report.errors.join("; ")
            };
            error!(errors = report.errors.len(), "Sync pass incomplete: {}", summary);
            self.set_phase(SyncPhase::Error(summary));
        }

        self.emit(SyncEvent::PassCompleted(report.clone()));
        Ok(report)
    }

    async fn sync_entity_type(
        &self,
        entity_type: &EntityType,
        since: Option<DateTime<Utc>>,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let drained = self
            .queue
            .drain(self.remote.as_ref(), Some(entity_type))
            .await?;
        let aborted = drained.aborted;
        report.drain.absorb(drained);
        if aborted {
            return Err(SyncError::Unreachable(
                "remote became unreachable during upload".to_string(),
            ));
        }

        let documents = self
            .remote
            .fetch_modified_since(entity_type, since)
            .await?;
        debug!(entity_type = %entity_type, count = documents.len(), "Reconciling remote changes");

        let mut failed = 0usize;
        for document in documents {
            let id = document.id.clone();
            if let Err(e) = self.reconcile(entity_type, document, report).await {
                warn!(entity_type = %entity_type, entity_id = %id, error = %e, "Failed to reconcile");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(SyncError::Storage(format!(
                "{} document(s) could not be reconciled",
                failed
            )));
        }
        Ok(())
    }

    async fn reconcile(
        &self,
        entity_type: &EntityType,
        document: RemoteDocument,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let key = EntityKey::new(entity_type.clone(), document.id);
        let pending = self.queue.get(&key).map(|record| record.kind);

        if pending == Some(OperationKind::Delete) {
            debug!(entity = %key, "Local delete still pending, ignoring remote copy");
            report.unchanged += 1;
            return Ok(());
        }

        let Some(local) = self.local.load_entity(&key)? else {
            self.local.save_entity(&key, &document.fields)?;
            debug!(entity = %key, "Pulled new remote entity");
            report.pulled_new += 1;
            return Ok(());
        };

        let Some(conflict) = self.detector.detect(&key, &local, &document.fields) else {
            report.unchanged += 1;
            return Ok(());
        };

        let resolution = self.resolver.resolve(&conflict);
        self.local.save_entity(&key, &resolution.resolved)?;
        report.conflicts_resolved += 1;
        debug!(
            entity = %key,
            disposition = %resolution.disposition,
            reason = %resolution.reason,
            "Conflict resolved"
        );

        match (resolution.requires_upload(), pending.is_some()) {
            (true, true) => {
                // The queued intent is superseded by the resolved snapshot
                self.queue.enqueue(OperationRecord::new(
                    key.entity_type.clone(),
                    key.entity_id.clone(),
                    OperationKind::Update,
                    resolution.resolved.clone(),
                ));
            }
            (true, false) => match self.remote.upsert(&key, &resolution.resolved).await {
                Ok(()) => report.reuploaded += 1,
                Err(e) => {
                    // Hand the result to the queue so it gets the usual retries
                    warn!(entity = %key, error = %e, "Re-upload failed, queueing");
                    self.queue.enqueue(OperationRecord::new(
                        key.entity_type.clone(),
                        key.entity_id.clone(),
                        OperationKind::Update,
                        resolution.resolved.clone(),
                    ));
                }
            },
            (false, true) => {
                debug!(entity = %key, "Remote copy kept, discarding pending local edit");
                self.queue.discard(&key);
            }
            (false, false) => {}
        }

        self.emit(SyncEvent::ConflictResolved {
            key,
            disposition: resolution.disposition,
            reason: resolution.reason,
        });
        Ok(())
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("queue", &self.queue)
            .field("connectivity", &self.connectivity)
            .field("entity_types", &self.entity_types)
            .field("phase", &self.phase())
            .field("busy", &self.is_busy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::connectivity::StaticProbe;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MapRemote {
        documents: Mutex<HashMap<EntityKey, Snapshot>>,
        upserts: Mutex<Vec<EntityKey>>,
        fail_fetch: AtomicBool,
    }

    #[async_trait]
    impl RemoteStore for MapRemote {
        async fn fetch_modified_since(
            &self,
            entity_type: &EntityType,
            _since: Option<DateTime<Utc>>,
        ) -> SyncResult<Vec<RemoteDocument>> {
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(SyncError::Remote {
                    status: 500,
                    message: "boom".into(),
                });
            }
            self.documents
                .lock()
                .iter()
                .filter(|(key, _)| &key.entity_type == entity_type)
                .map(|(_, fields)| RemoteDocument::from_fields(fields.clone()))
                .collect()
        }

        async fn upsert(&self, key: &EntityKey, fields: &Snapshot) -> SyncResult<()> {
            self.upserts.lock().push(key.clone());
            self.documents.lock().insert(key.clone(), fields.clone());
            Ok(())
        }

        async fn delete(&self, key: &EntityKey) -> SyncResult<()> {
            self.documents.lock().remove(key);
            Ok(())
        }
    }

    fn snapshot(value: Value) -> Snapshot {
        value.as_object().cloned().unwrap()
    }

    async fn create_test_engine() -> (SyncEngine, Arc<MapRemote>, Arc<Storage>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path().join("test.redb")).unwrap());
        let remote = Arc::new(MapRemote::default());
        let monitor = Arc::new(ConnectivityMonitor::new(
            Arc::new(StaticProbe::new(true)),
            Duration::from_secs(5),
            Duration::from_secs(30),
        ));
        monitor.check_now().await;

        let engine = SyncEngine::new(
            &SyncConfig::default(),
            storage.clone(),
            storage.clone(),
            remote.clone(),
            monitor,
        );
        (engine, remote, storage, temp_dir)
    }

    #[tokio::test]
    async fn test_repository_api() {
        let (engine, _remote, _storage, _dir) = create_test_engine().await;

        engine.enqueue("task", "t1", OperationKind::Create, snapshot(json!({ "id": "t1" })));
        assert!(engine.has_pending("task", "t1"));
        assert!(!engine.has_pending("task", "t2"));

        let status = engine.sync_status();
        assert!(status.online);
        assert_eq!(status.pending_count, 1);
        assert_eq!(status.last_sync_at, None);
        assert_eq!(status.phase, SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_pulls_new_remote_entities() {
        let (engine, remote, storage, _dir) = create_test_engine().await;
        remote.documents.lock().insert(
            EntityKey::new("avatar", "a1"),
            snapshot(json!({ "id": "a1", "level": 4, "updatedAt": "2024-01-01T00:00:00Z" })),
        );

        let report = engine.sync_all().await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.pulled_new, 1);

        let local = storage.load_entity(&EntityKey::new("avatar", "a1")).unwrap().unwrap();
        assert_eq!(local["level"], json!(4));
        assert_eq!(engine.phase(), SyncPhase::Completed);
        assert_eq!(engine.last_sync_at(), report.started_at);
    }

    #[tokio::test]
    async fn test_merged_conflict_is_saved_and_reuploaded() {
        let (engine, remote, storage, _dir) = create_test_engine().await;
        let key = EntityKey::new("task", "t1");
        storage
            .save_entity(
                &key,
                &snapshot(json!({
                    "id": "t1", "updatedAt": "2024-01-01T00:00:00Z",
                    "isCompleted": false, "streakCount": 3
                })),
            )
            .unwrap();
        remote.documents.lock().insert(
            key.clone(),
            snapshot(json!({
                "id": "t1", "updatedAt": "2024-01-02T00:00:00Z",
                "isCompleted": true, "streakCount": 2
            })),
        );

        let report = engine.sync_all().await.unwrap();
        assert_eq!(report.conflicts_resolved, 1);
        assert_eq!(report.reuploaded, 1);

        let local = storage.load_entity(&key).unwrap().unwrap();
        assert_eq!(local["isCompleted"], json!(true));
        assert_eq!(local["streakCount"], json!(3));
        assert_eq!(remote.documents.lock()[&key]["streakCount"], json!(3));
    }

    #[tokio::test]
    async fn test_remote_wins_is_not_reuploaded() {
        let (engine, remote, storage, _dir) = create_test_engine().await;
        let key = EntityKey::new("note", "n1");
        storage
            .save_entity(&key, &snapshot(json!({ "id": "n1", "body": "old", "updatedAt": 1_000 })))
            .unwrap();
        remote.documents.lock().insert(
            key.clone(),
            snapshot(json!({ "id": "n1", "body": "new", "updatedAt": 2_000 })),
        );

        let engine = SyncEngine {
            entity_types: vec![EntityType::from("note")],
            ..engine
        };
        let report = engine.sync_all().await.unwrap();
        assert_eq!(report.conflicts_resolved, 1);
        assert_eq!(report.reuploaded, 0);
        assert!(remote.upserts.lock().is_empty());
        assert_eq!(storage.load_entity(&key).unwrap().unwrap()["body"], json!("new"));
    }

    #[tokio::test]
    async fn test_enqueue_applies_mutation_locally() {
        let (engine, _remote, storage, _dir) = create_test_engine().await;
        let key = EntityKey::new("task", "t1");
        storage
            .save_entity(&key, &snapshot(json!({ "id": "t1", "title": "Run", "streakCount": 3 })))
            .unwrap();

        engine.enqueue("task", "t1", OperationKind::Update, snapshot(json!({ "id": "t1", "streakCount": 0 })));
        let local = storage.load_entity(&key).unwrap().unwrap();
        assert_eq!(local["streakCount"], json!(0));
        assert_eq!(local["title"], json!("Run"));

        engine.enqueue("task", "t1", OperationKind::Delete, Snapshot::new());
        assert!(storage.load_entity(&key).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_delete_ignores_remote_copy() {
        let (engine, _remote, storage, _dir) = create_test_engine().await;
        engine.enqueue("task", "t1", OperationKind::Delete, Snapshot::new());

        let mut report = SyncReport::default();
        let document = RemoteDocument::from_fields(snapshot(json!({ "id": "t1", "streakCount": 4 }))).unwrap();
        engine
            .reconcile(&EntityType::from("task"), document, &mut report)
            .await
            .unwrap();

        assert_eq!(report.pulled_new, 0);
        assert!(storage.load_entity(&EntityKey::new("task", "t1")).unwrap().is_none());
        assert!(engine.has_pending("task", "t1"));
    }

    #[tokio::test]
    async fn test_resolution_replaces_pending_edit() {
        let (engine, remote, _storage, _dir) = create_test_engine().await;
        engine.enqueue(
            "task",
            "t1",
            OperationKind::Update,
            snapshot(json!({
                "id": "t1", "updatedAt": "2024-01-01T00:00:00Z",
                "isCompleted": false, "streakCount": 3
            })),
        );

        let mut report = SyncReport::default();
        let document = RemoteDocument::from_fields(snapshot(json!({
            "id": "t1", "updatedAt": "2024-01-02T00:00:00Z",
            "isCompleted": true, "streakCount": 2
        })))
        .unwrap();
        engine
            .reconcile(&EntityType::from("task"), document, &mut report)
            .await
            .unwrap();

        assert_eq!(report.conflicts_resolved, 1);
        assert!(remote.upserts.lock().is_empty());
        assert_eq!(engine.queue().len(), 1);
        let pending = engine.queue().get(&EntityKey::new("task", "t1")).unwrap();
        assert_eq!(pending.payload["isCompleted"], json!(true));
        assert_eq!(pending.payload["streakCount"], json!(3));
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_last_sync() {
        let (engine, remote, _storage, _dir) = create_test_engine().await;
        remote.fail_fetch.store(true, Ordering::SeqCst);

        let report = engine.sync_all().await.unwrap();
        assert!(!report.is_success());
        assert_eq!(report.errors.len(), 4);
        assert_eq!(engine.last_sync_at(), None);
        assert!(matches!(engine.phase(), SyncPhase::Error(_)));
    }

    #[tokio::test]
    async fn test_reentrant_sync_is_rejected() {
        let (engine, _remote, _storage, _dir) = create_test_engine().await;
        let _busy = BusyGuard::acquire(&engine.busy).unwrap();

        assert!(matches!(engine.sync_all().await, Err(SyncError::SyncInProgress)));
        assert!(matches!(engine.drain_now().await, Err(SyncError::SyncInProgress)));
    }

    #[tokio::test]
    async fn test_offline_sync_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path().join("test.redb")).unwrap());
        let monitor = Arc::new(ConnectivityMonitor::new(
            Arc::new(StaticProbe::new(false)),
            Duration::from_secs(5),
            Duration::from_secs(30),
        ));
        monitor.check_now().await;
        let engine = SyncEngine::new(
            &SyncConfig::default(),
            storage.clone(),
            storage,
            Arc::new(MapRemote::default()),
            monitor,
        );

        assert!(matches!(engine.sync_all().await, Err(SyncError::Offline(_))));
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let (engine, _remote, _storage, _dir) = create_test_engine().await;
        let mut rx = engine.subscribe();

        engine.enqueue("task", "t1", OperationKind::Update, snapshot(json!({ "id": "t1" })));
        engine.drain_now().await.unwrap();

        let mut saw_upload = false;
        while let Ok(event) = rx.try_recv() {
            if let SyncEvent::OperationUploaded { key, .. } = event {
                assert_eq!(key, EntityKey::new("task", "t1"));
                saw_upload = true;
            }
        }
        assert!(saw_upload);
    }
}
