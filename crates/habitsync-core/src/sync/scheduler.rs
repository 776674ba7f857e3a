//! Background scheduling of drains and sync passes
//!
//! One loop selects over:
//!
//! - the periodic drain tick (drains while online with a non-empty queue)
//! - enqueue notifications (drain right away while online)
//! - connectivity changes (offline → online runs a full `sync_all`)
//! - the retry timer, armed with exponential backoff after a drain that left
//!   records waiting on transient failures
//!
//! Alongside it run the connectivity monitor loop and, when a tracker is
//! given, the optimistic sweep and event listener. Everything stops on
//! [`SyncScheduler::shutdown`] (or drop).

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::connectivity::ConnectionState;
use super::engine::SyncEngine;
use super::events::{DrainReport, SyncEvent};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::optimistic::OptimisticUpdateTracker;

/// Delay before retrying a drain that found another pass running
const BUSY_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(500);

pub struct SyncScheduler {
    handles: Vec<JoinHandle<()>>,
}

impl SyncScheduler {
    pub fn start(
        engine: Arc<SyncEngine>,
        tracker: Option<Arc<OptimisticUpdateTracker>>,
        config: &SyncConfig,
    ) -> Self {
        let mut handles = vec![engine.connectivity().clone().spawn()];

        if let Some(tracker) = tracker {
            handles.push(tracker.clone().spawn_sweep(config.optimistic_sweep_interval()));
            handles.push(tracker.spawn_event_listener(engine.subscribe()));
        }

        let connectivity = engine.connectivity().subscribe();
        let drain_interval = config.drain_interval();
        handles.push(tokio::spawn(run_loop(engine, connectivity, drain_interval)));

        info!("Sync scheduler started");
        Self { handles }
    }

    pub fn shutdown(mut self) {
        self.abort_all();
        info!("Sync scheduler stopped");
    }

    fn abort_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.abort_all();
    }
}

async fn run_loop(
    engine: Arc<SyncEngine>,
    mut connectivity: watch::Receiver<ConnectionState>,
    drain_interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(drain_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut was_online = connectivity.borrow_and_update().is_online();
    let mut consecutive_failures: u32 = 0;
    let mut retry_at: Option<Instant> = None;

    loop {
        let outcome = tokio::select! {
            _ = ticker.tick() => {
                if engine.connectivity().is_online() && !engine.queue().is_empty() {
                    debug!("Periodic drain");
                    Some(engine.drain_now().await)
                } else {
                    None
                }
            }
            _ = engine.queue().enqueued() => {
                if engine.connectivity().is_online() {
                    Some(engine.drain_now().await)
                } else {
                    None
                }
            }
            changed = connectivity.changed() => {
                if changed.is_err() {
                    debug!("Connectivity monitor gone, stopping scheduler");
                    break;
                }
                let state = *connectivity.borrow_and_update();
                engine.emit(SyncEvent::ConnectivityChanged(state));

                let reconnected = state.is_online() && !was_online;
                if state != ConnectionState::Checking {
                    was_online = state.is_online();
                }
                if reconnected {
                    info!("Back online, running full sync");
                    Some(engine.sync_all().await.map(|report| report.drain))
                } else {
                    None
                }
            }
            _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                retry_at = None;
                if engine.connectivity().is_online() {
                    debug!(consecutive_failures, "Retrying drain after backoff");
                    Some(engine.drain_now().await)
                } else {
                    None
                }
            }
        };

        if let Some(result) = outcome {
            match next_retry(&engine, result, &mut consecutive_failures) {
                Some(delay) => retry_at = Some(Instant::now() + delay),
                None => retry_at = None,
            }
        }
    }
}

/// Backoff delay before the next drain, if one is needed
fn next_retry(
    engine: &SyncEngine,
    result: SyncResult<DrainReport>,
    consecutive_failures: &mut u32,
) -> Option<std::time::Duration> {
    match result {
        Ok(report) if report.retrying > 0 => {
            *consecutive_failures += 1;
            let delay = engine.queue().policy().delay_for(*consecutive_failures);
            debug!(retrying = report.retrying, delay_secs = delay.as_secs(), "Scheduling retry");
            Some(delay)
        }
        Ok(_) => {
            *consecutive_failures = 0;
            None
        }
        // The running pass may have already passed over newly queued records
        Err(SyncError::SyncInProgress) if !engine.queue().is_empty() => {
            debug!("Sync already running, retrying drain shortly");
            Some(BUSY_RETRY_DELAY)
        }
        Err(SyncError::SyncInProgress) => None,
        Err(SyncError::Offline(_)) => None,
        Err(e) => {
            warn!(error = %e, "Scheduled sync failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RemoteDocument, RemoteStore};
    use crate::storage::Storage;
    use crate::sync::connectivity::{ConnectivityMonitor, LinkStatus, StaticProbe};
    use crate::types::{EntityKey, EntityType, OperationKind, Snapshot};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingRemote {
        upserts: Mutex<Vec<EntityKey>>,
    }

    #[async_trait]
    impl RemoteStore for RecordingRemote {
        async fn fetch_modified_since(
            &self,
            _entity_type: &EntityType,
            _since: Option<DateTime<Utc>>,
        ) -> SyncResult<Vec<RemoteDocument>> {
            Ok(Vec::new())
        }

        async fn upsert(&self, key: &EntityKey, _fields: &Snapshot) -> SyncResult<()> {
            self.upserts.lock().push(key.clone());
            Ok(())
        }

        async fn delete(&self, _key: &EntityKey) -> SyncResult<()> {
            Ok(())
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_reconnect_drains_queue() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path().join("test.redb")).unwrap());
        let remote = Arc::new(RecordingRemote::default());
        let monitor = Arc::new(ConnectivityMonitor::new(
            Arc::new(StaticProbe::new(true)),
            Duration::from_secs(5),
            Duration::from_secs(30),
        ));
        monitor.notify_link_change(LinkStatus::None).await;

        let config = SyncConfig::default();
        let engine = Arc::new(SyncEngine::new(
            &config,
            storage.clone(),
            storage,
            remote.clone(),
            monitor.clone(),
        ));
        let scheduler = SyncScheduler::start(engine.clone(), None, &config);

        engine.enqueue(
            "task",
            "t1",
            OperationKind::Update,
            json!({ "id": "t1" }).as_object().cloned().unwrap(),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(remote.upserts.lock().is_empty());

        monitor.notify_link_change(LinkStatus::Wifi).await;
        wait_until(|| engine.queue().is_empty()).await;
        assert_eq!(remote.upserts.lock().len(), 1);

        scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_enqueue_while_online_drains_immediately() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path().join("test.redb")).unwrap());
        let remote = Arc::new(RecordingRemote::default());
        let monitor = Arc::new(ConnectivityMonitor::new(
            Arc::new(StaticProbe::new(true)),
            Duration::from_secs(5),
            Duration::from_secs(30),
        ));
        monitor.check_now().await;

        let config = SyncConfig::default();
        let engine = Arc::new(SyncEngine::new(&config, storage.clone(), storage, remote.clone(), monitor));
        let _scheduler = SyncScheduler::start(engine.clone(), None, &config);

        engine.enqueue(
            "avatar",
            "a1",
            OperationKind::Update,
            json!({ "id": "a1", "level": 2 }).as_object().cloned().unwrap(),
        );
        wait_until(|| !remote.upserts.lock().is_empty()).await;
        assert_eq!(remote.upserts.lock()[0], EntityKey::new("avatar", "a1"));
    }

    #[tokio::test]
    async fn test_busy_drain_is_retried_while_records_wait() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path().join("test.redb")).unwrap());
        let monitor = Arc::new(ConnectivityMonitor::new(
            Arc::new(StaticProbe::new(true)),
            Duration::from_secs(5),
            Duration::from_secs(30),
        ));
        let config = SyncConfig::default();
        let engine = SyncEngine::new(
            &config,
            storage.clone(),
            storage,
            Arc::new(RecordingRemote::default()),
            monitor,
        );
        let mut failures = 2;

        assert_eq!(next_retry(&engine, Err(SyncError::SyncInProgress), &mut failures), None);

        engine.enqueue(
            "task",
            "t1",
            OperationKind::Update,
            json!({ "id": "t1" }).as_object().cloned().unwrap(),
        );
        assert_eq!(
            next_retry(&engine, Err(SyncError::SyncInProgress), &mut failures),
            Some(BUSY_RETRY_DELAY)
        );
        assert_eq!(failures, 2);
    }
}
