//! Durable, coalescing operation queue
//!
//! One pending [`OperationRecord`] per entity. A new intent for an entity
//! that already has a pending record replaces that record in place, so rapid
//! local edits upload once with the latest state.
//!
//! Every mutation persists the whole queue through the [`QueueStore`] while
//! holding the queue lock. Persist failures are logged and the in-memory
//! queue stays authoritative until the next successful write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

use super::events::{DrainReport, DroppedOperation, SyncEvent};
use super::retry::{FailureKind, RetryPolicy};
use super::BusyGuard;
use crate::entity::EntitySnapshot;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use crate::storage::QueueStore;
use crate::types::{EntityKey, EntityType, OperationKind, OperationRecord};

/// Result of an enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Appended as a new record at the back of the queue
    Appended,
    /// Replaced the pending record for the same entity
    Replaced,
}

pub struct SyncQueue {
    records: Mutex<Vec<OperationRecord>>,
    store: Arc<dyn QueueStore>,
    policy: RetryPolicy,
    concurrency: usize,
    draining: AtomicBool,
    enqueued: Notify,
    events: Option<broadcast::Sender<SyncEvent>>,
}

impl SyncQueue {
    /// Create a queue, restoring any records persisted by a previous run
    pub fn load(store: Arc<dyn QueueStore>, policy: RetryPolicy, concurrency: usize) -> Self {
        let records = match store.load_queue() {
            Ok(records) => {
                if !records.is_empty() {
                    info!(count = records.len(), "Restored pending operations");
                }
                records
            }
            Err(e) => {
                warn!(error = %e, "Failed to load persisted queue, starting empty");
                Vec::new()
            }
        };

        Self {
            records: Mutex::new(records),
            store,
            policy,
            concurrency: concurrency.max(1),
            draining: AtomicBool::new(false),
            enqueued: Notify::new(),
            events: None,
        }
    }

    /// Publish upload/drop events on `tx`
    pub fn with_events(mut self, tx: broadcast::Sender<SyncEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Add or coalesce an operation and persist the queue.
    ///
    /// Wakes whoever waits on [`SyncQueue::enqueued`] so an online scheduler
    /// can drain right away.
    pub fn enqueue(&self, record: OperationRecord) -> Enqueued {
        let outcome = {
            let mut records = self.records.lock();
            let outcome = match records.iter_mut().find(|r| r.is_same_entity(&record)) {
                Some(pending) => {
                    // Still unknown remotely until the create lands
                    let kind = match (pending.kind, record.kind) {
                        (OperationKind::Create, OperationKind::Update) => OperationKind::Create,
                        (_, kind) => kind,
                    };
                    pending.id = record.id;
                    pending.kind = kind;
                    pending.payload = record.payload;
                    pending.attempt = 0;
                    pending.last_error = None;
                    pending.revision += 1;
                    debug!(
                        entity_type = %pending.entity_type,
                        entity_id = %pending.entity_id,
                        revision = pending.revision,
                        "Coalesced pending operation"
                    );
                    Enqueued::Replaced
                }
                None => {
                    debug!(
                        entity_type = %record.entity_type,
                        entity_id = %record.entity_id,
                        kind = %record.kind,
                        "Queued operation"
                    );
                    records.push(record);
                    Enqueued::Appended
                }
            };
            self.persist(&records);
            outcome
        };

        self.enqueued.notify_one();
        outcome
    }

    /// Wait until something is enqueued
    pub async fn enqueued(&self) {
        self.enqueued.notified().await
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn has_pending(&self, key: &EntityKey) -> bool {
        self.records
            .lock()
            .iter()
            .any(|r| r.entity_type == key.entity_type && r.entity_id == key.entity_id)
    }

    pub fn get(&self, key: &EntityKey) -> Option<OperationRecord> {
        self.records
            .lock()
            .iter()
            .find(|r| r.entity_type == key.entity_type && r.entity_id == key.entity_id)
            .cloned()
    }

    /// Remove the pending record for `key`, if any
    pub fn discard(&self, key: &EntityKey) -> Option<OperationRecord> {
        let mut records = self.records.lock();
        let index = records
            .iter()
            .position(|r| r.entity_type == key.entity_type && r.entity_id == key.entity_id)?;
        let removed = records.remove(index);
        self.persist(&records);
        Some(removed)
    }

    /// Copy of the queue in insertion order
    pub fn snapshot(&self) -> Vec<OperationRecord> {
        self.records.lock().clone()
    }

    /// Drop every pending record
    pub fn clear(&self) -> usize {
        let mut records = self.records.lock();
        let count = records.len();
        records.clear();
        self.persist(&records);
        count
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Upload pending records, oldest first.
    ///
    /// With `entity_type` set only records of that type are considered.
    /// Records are independent: a failure for one entity never blocks the
    /// others. An unreachable remote stops the drain; records not yet
    /// attempted keep their state and uploads already in flight finish.
    ///
    /// # Errors
    ///
    /// `SyncError::SyncInProgress` if another drain is running.
    pub async fn drain(
        &self,
        remote: &dyn RemoteStore,
        entity_type: Option<&EntityType>,
    ) -> SyncResult<DrainReport> {
        let _guard = BusyGuard::acquire(&self.draining)?;

        let batch: Vec<OperationRecord> = self
            .records
            .lock()
            .iter()
            .filter(|r| entity_type.map_or(true, |t| &r.entity_type == t))
            .cloned()
            .collect();

        let mut report = DrainReport::default();
        if batch.is_empty() {
            return Ok(report);
        }
        debug!(count = batch.len(), "Draining queue");

        let abort = AtomicBool::new(false);
        let abort = &abort;
        let mut results = stream::iter(batch)
            .map(|record| async move {
                if abort.load(Ordering::Acquire) {
                    return (record, None);
                }
                let result = upload(remote, &record).await;
                if matches!(&result, Err(e) if e.failure_kind() == FailureKind::Abort) {
                    abort.store(true, Ordering::Release);
                }
                (record, Some(result))
            })
            .buffered(self.concurrency);

        while let Some((record, result)) = results.next().await {
            match result {
                None => {}
                Some(Ok(())) => {
                    report.uploaded += 1;
                    self.complete(&record);
                }
                Some(Err(e)) => match e.failure_kind() {
                    FailureKind::Abort => {
                        if !report.aborted {
                            warn!(error = %e, "Remote unreachable, aborting drain");
                        }
                        report.aborted = true;
                    }
                    FailureKind::Transient => self.fail(&record, &e, false, &mut report),
                    FailureKind::Permanent => self.fail(&record, &e, true, &mut report),
                },
            }
        }

        if report.uploaded > 0 || report.failure_count() > 0 {
            info!(
                uploaded = report.uploaded,
                retrying = report.retrying,
                dropped = report.dropped.len(),
                aborted = report.aborted,
                "Drain finished"
            );
        }
        Ok(report)
    }

    fn complete(&self, uploaded: &OperationRecord) {
        {
            let mut records = self.records.lock();
            match records.iter().position(|r| r.id == uploaded.id && r.revision == uploaded.revision) {
                Some(index) => {
                    records.remove(index);
                    self.persist(&records);
                }
                None => {
                    // The newer intent is still unconfirmed, so no event either
                    debug!(
                        entity_id = %uploaded.entity_id,
                        "Operation replaced during upload, keeping newer intent"
                    );
                    return;
                }
            }
        }

        self.emit(SyncEvent::OperationUploaded {
            id: uploaded.id.clone(),
            key: uploaded.key(),
        });
    }

    fn fail(&self, failed: &OperationRecord, error: &SyncError, permanent: bool, report: &mut DrainReport) {
        let dropped = {
            let mut records = self.records.lock();
            let Some(index) = records
                .iter()
                .position(|r| r.id == failed.id && r.revision == failed.revision)
            else {
                // A newer intent replaced it and starts with a clean slate
                return;
            };

            let record = &mut records[index];
            record.attempt += 1;
            record.last_error = Some(error.to_string());

            let dropped = if permanent || self.policy.is_exhausted(record.attempt) {
                let dropped = DroppedOperation::from_record(record, error.to_string());
                records.remove(index);
                Some(dropped)
            } else {
                debug!(
                    entity_type = %record.entity_type,
                    entity_id = %record.entity_id,
                    attempt = record.attempt,
                    error = %error,
                    "Upload failed, will retry"
                );
                report.retrying += 1;
                None
            };
            self.persist(&records);
            dropped
        };

        if let Some(dropped) = dropped {
            warn!(
                entity = %dropped.key,
                attempts = dropped.attempts,
                permanent,
                error = %dropped.error,
                "Dropping operation"
            );
            self.emit(SyncEvent::OperationDropped(dropped.clone()));
            report.dropped.push(dropped);
        }
    }

    fn persist(&self, records: &[OperationRecord]) {
        if let Err(e) = self.store.save_queue(records) {
            warn!(error = %e, count = records.len(), "Failed to persist queue, keeping in-memory state");
        }
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Upload one record. Create/update payloads are decoded first so a
/// malformed entity fails permanently instead of burning retries.
pub(crate) async fn upload(remote: &dyn RemoteStore, record: &OperationRecord) -> SyncResult<()> {
    let key = record.key();
    match record.kind {
        OperationKind::Delete => remote.delete(&key).await,
        OperationKind::Create | OperationKind::Update => {
            EntitySnapshot::decode(&record.entity_type, &record.payload)?;
            remote.upsert(&key, &record.payload).await
        }
    }
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue")
            .field("len", &self.len())
            .field("policy", &self.policy)
            .field("concurrency", &self.concurrency)
            .field("draining", &self.is_draining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::types::Snapshot;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use tempfile::TempDir;

    use crate::remote::RemoteDocument;

    /// Remote that records uploads and replays scripted failures
    #[derive(Default)]
    struct ScriptedRemote {
        uploads: Mutex<Vec<(EntityKey, Snapshot)>>,
        deletes: Mutex<Vec<EntityKey>>,
        failures: Mutex<VecDeque<SyncError>>,
        started: Option<Arc<Notify>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedRemote {
        fn failing(errors: Vec<SyncError>) -> Self {
            Self {
                failures: Mutex::new(errors.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl RemoteStore for ScriptedRemote {
        async fn fetch_modified_since(
            &self,
            _entity_type: &EntityType,
            _since: Option<DateTime<Utc>>,
        ) -> SyncResult<Vec<RemoteDocument>> {
            Ok(Vec::new())
        }

        async fn upsert(&self, key: &EntityKey, fields: &Snapshot) -> SyncResult<()> {
            if let Some(started) = &self.started {
                started.notify_one();
            }
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(err) = self.failures.lock().pop_front() {
                return Err(err);
            }
            self.uploads.lock().push((key.clone(), fields.clone()));
            Ok(())
        }

        async fn delete(&self, key: &EntityKey) -> SyncResult<()> {
            self.deletes.lock().push(key.clone());
            Ok(())
        }
    }

    /// Queue store whose writes always fail
    struct BrokenStore;

    impl QueueStore for BrokenStore {
        fn save_queue(&self, _records: &[OperationRecord]) -> SyncResult<()> {
            Err(SyncError::Storage("disk full".into()))
        }
        fn load_queue(&self) -> SyncResult<Vec<OperationRecord>> {
            Err(SyncError::Storage("unreadable".into()))
        }
        fn save_last_sync(&self, _at: DateTime<Utc>) -> SyncResult<()> {
            Ok(())
        }
        fn load_last_sync(&self) -> SyncResult<Option<DateTime<Utc>>> {
            Ok(None)
        }
    }

    fn create_test_queue() -> (SyncQueue, Arc<Storage>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path().join("test.redb")).unwrap());
        let queue = SyncQueue::load(storage.clone(), RetryPolicy::default(), 4);
        (queue, storage, temp_dir)
    }

    fn task_update(id: &str, streak: i64) -> OperationRecord {
        let payload = json!({ "id": id, "streakCount": streak, "isCompleted": true });
        OperationRecord::new(
            "task",
            id,
            OperationKind::Update,
            payload.as_object().cloned().unwrap(),
        )
    }

    fn transient() -> SyncError {
        SyncError::Remote {
            status: 503,
            message: "unavailable".into(),
        }
    }

    #[test]
    fn test_enqueue_coalesces_same_entity() {
        let (queue, _storage, _dir) = create_test_queue();

        assert_eq!(queue.enqueue(task_update("t1", 5)), Enqueued::Appended);
        assert_eq!(queue.enqueue(task_update("t1", 6)), Enqueued::Replaced);

        let records = queue.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload["streakCount"], json!(6));
        assert_eq!(records[0].attempt, 0);
        assert_eq!(records[0].revision, 1);
    }

    #[test]
    fn test_replace_keeps_position_and_resets_attempts() {
        let (queue, _storage, _dir) = create_test_queue();
        queue.enqueue(task_update("t1", 1));
        queue.enqueue(task_update("t2", 1));
        {
            let mut records = queue.records.lock();
            records[0].attempt = 2;
            records[0].last_error = Some("timeout".into());
        }

        queue.enqueue(task_update("t1", 2));

        let records = queue.snapshot();
        assert_eq!(records[0].entity_id, "t1");
        assert_eq!(records[0].attempt, 0);
        assert!(records[0].last_error.is_none());
        assert_eq!(records[1].entity_id, "t2");
    }

    #[test]
    fn test_create_then_update_stays_create() {
        let (queue, _storage, _dir) = create_test_queue();
        let mut create = task_update("t1", 0);
        create.kind = OperationKind::Create;
        queue.enqueue(create);
        queue.enqueue(task_update("t1", 1));

        assert_eq!(queue.snapshot()[0].kind, OperationKind::Create);
    }

    #[test]
    fn test_queue_survives_restart() {
        let (queue, storage, _dir) = create_test_queue();
        queue.enqueue(task_update("t1", 5));
        queue.enqueue(task_update("t2", 1));
        drop(queue);

        let restored = SyncQueue::load(storage, RetryPolicy::default(), 4);
        assert_eq!(restored.len(), 2);
        assert!(restored.has_pending(&EntityKey::new("task", "t2")));
    }

    #[test]
    fn test_persist_failure_is_not_fatal() {
        let queue = SyncQueue::load(Arc::new(BrokenStore), RetryPolicy::default(), 1);
        queue.enqueue(task_update("t1", 1));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_drain_uploads_latest_intent_once() {
        let (queue, storage, _dir) = create_test_queue();
        let remote = ScriptedRemote::default();

        queue.enqueue(task_update("t1", 5));
        queue.enqueue(task_update("t1", 6));
        let report = queue.drain(&remote, None).await.unwrap();

        assert_eq!(report.uploaded, 1);
        let uploads = remote.uploads.lock();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].1["streakCount"], json!(6));
        assert!(queue.is_empty());
        assert!(storage.load_queue().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_drop_after_three_attempts() {
        let (queue, _storage, _dir) = create_test_queue();
        let remote = ScriptedRemote::failing(vec![transient(), transient(), transient(), transient()]);
        queue.enqueue(task_update("t1", 1));

        for attempt in 1..=2 {
            let report = queue.drain(&remote, None).await.unwrap();
            assert_eq!(report.retrying, 1);
            assert_eq!(queue.snapshot()[0].attempt, attempt);
        }

        let report = queue.drain(&remote, None).await.unwrap();
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].attempts, 3);
        assert!(queue.is_empty());

        // No fourth attempt: the last scripted failure is still unused
        let report = queue.drain(&remote, None).await.unwrap();
        assert_eq!(report, DrainReport::default());
        assert_eq!(remote.failures.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_drops_immediately() {
        let (queue, _storage, _dir) = create_test_queue();
        let remote = ScriptedRemote::failing(vec![SyncError::Remote {
            status: 400,
            message: "bad request".into(),
        }]);
        queue.enqueue(task_update("t1", 1));

        let report = queue.drain(&remote, None).await.unwrap();
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].attempts, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_never_sent() {
        let (queue, _storage, _dir) = create_test_queue();
        let remote = ScriptedRemote::default();
        let payload = json!({ "id": "t1", "streakCount": "lots" });
        queue.enqueue(OperationRecord::new(
            "task",
            "t1",
            OperationKind::Update,
            payload.as_object().cloned().unwrap(),
        ));

        let report = queue.drain(&remote, None).await.unwrap();
        assert_eq!(report.dropped.len(), 1);
        assert!(remote.uploads.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_block_other_entities() {
        let (queue, _storage, _dir) = create_test_queue();
        let remote = ScriptedRemote::failing(vec![transient()]);
        queue.enqueue(task_update("t1", 1));
        queue.enqueue(task_update("t2", 1));

        let report = queue.drain(&remote, None).await.unwrap();
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.retrying, 1);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_aborts_without_charging_attempts() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path().join("test.redb")).unwrap());
        let queue = SyncQueue::load(storage, RetryPolicy::default(), 1);
        let remote = ScriptedRemote::failing(vec![SyncError::Unreachable("dns".into())]);
        queue.enqueue(task_update("t1", 1));
        queue.enqueue(task_update("t2", 1));

        let report = queue.drain(&remote, None).await.unwrap();
        assert!(report.aborted);
        assert_eq!(report.uploaded, 0);
        assert!(queue.snapshot().iter().all(|r| r.attempt == 0));
    }

    #[tokio::test]
    async fn test_drain_filters_by_entity_type() {
        let (queue, _storage, _dir) = create_test_queue();
        let remote = ScriptedRemote::default();
        queue.enqueue(task_update("t1", 1));
        queue.enqueue(OperationRecord::new(
            "avatar",
            "a1",
            OperationKind::Delete,
            Snapshot::new(),
        ));

        let report = queue.drain(&remote, Some(&EntityType::Avatar)).await.unwrap();
        assert_eq!(report.uploaded, 1);
        assert_eq!(remote.deletes.lock().len(), 1);
        assert!(queue.has_pending(&EntityKey::new("task", "t1")));
    }

    #[tokio::test]
    async fn test_record_replaced_during_upload_stays_queued() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path().join("test.redb")).unwrap());
        let queue = Arc::new(SyncQueue::load(storage, RetryPolicy::default(), 1));
        let started = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let remote = Arc::new(ScriptedRemote {
            started: Some(started.clone()),
            gate: Some(gate.clone()),
            ..Default::default()
        });

        queue.enqueue(task_update("t1", 5));
        let drain = {
            let queue = queue.clone();
            let remote = remote.clone();
            tokio::spawn(async move { queue.drain(remote.as_ref(), None).await })
        };
        started.notified().await;

        queue.enqueue(task_update("t1", 6));
        gate.notify_one();
        let report = drain.await.unwrap().unwrap();

        assert_eq!(report.uploaded, 1);
        let pending = queue.get(&EntityKey::new("task", "t1")).unwrap();
        assert_eq!(pending.payload["streakCount"], Value::from(6));
    }

    #[tokio::test]
    async fn test_replaced_upload_does_not_confirm_newer_optimistic_update() {
        use crate::optimistic::{OptimisticUpdate, OptimisticUpdateTracker};
        use std::time::Duration;

        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path().join("test.redb")).unwrap());
        let (tx, mut events) = broadcast::channel(16);
        let queue = Arc::new(SyncQueue::load(storage, RetryPolicy::default(), 1).with_events(tx.clone()));
        let tracker = Arc::new(OptimisticUpdateTracker::new(Duration::from_secs(3600)));
        let _listener = tracker.clone().spawn_event_listener(tx.subscribe());
        let started = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let remote = Arc::new(ScriptedRemote {
            started: Some(started.clone()),
            gate: Some(gate.clone()),
            ..Default::default()
        });

        queue.enqueue(task_update("t1", 5));
        let drain = {
            let queue = queue.clone();
            let remote = remote.clone();
            tokio::spawn(async move { queue.drain(remote.as_ref(), None).await })
        };
        started.notified().await;

        let newer = task_update("t1", 6);
        tracker.add(OptimisticUpdate::new("task", "t1", OperationKind::Update, newer.payload.clone()));
        queue.enqueue(newer);
        gate.notify_one();
        drain.await.unwrap().unwrap();

        // Stale upload finished, newer write still unconfirmed
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert_eq!(tracker.len(), 1);

        // Uploading the newer write confirms it
        gate.notify_one();
        let report = queue.drain(remote.as_ref(), None).await.unwrap();
        assert_eq!(report.uploaded, 1);
        assert!(matches!(events.recv().await, Ok(SyncEvent::OperationUploaded { .. })));
        for _ in 0..100 {
            if tracker.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_drain_is_rejected() {
        let (queue, _storage, _dir) = create_test_queue();
        let _busy = BusyGuard::acquire(&queue.draining).unwrap();
        let remote = ScriptedRemote::default();

        assert!(matches!(
            queue.drain(&remote, None).await,
            Err(SyncError::SyncInProgress)
        ));
    }
}
