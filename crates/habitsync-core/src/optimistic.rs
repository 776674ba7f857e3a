//! Optimistic update tracking
//!
//! Repositories apply local writes to the UI before the remote store has
//! confirmed them. Each such write is registered here; it leaves the tracker
//! when its upload is confirmed, when it is reverted, or when it outlives the
//! age ceiling (abandoned, e.g. by a restart before confirmation arrived).
//!
//! Every change publishes the full pending list on a `watch` channel so UI
//! layers can re-render without polling.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::sync::events::SyncEvent;
use crate::types::{EntityKey, EntityType, OperationKind, Snapshot};

/// Default age after which an unconfirmed update is reverted
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Called once when an update is reverted
pub type RevertCallback = Arc<dyn Fn(&OptimisticUpdate, &RevertReason) + Send + Sync>;

/// Why an optimistic update was rolled back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertReason {
    /// The upload was dropped (retries exhausted or rejected)
    SyncFailed(String),
    /// The repository discarded the write
    Invalidated,
    /// No confirmation arrived within the age ceiling
    TimedOut,
}

impl fmt::Display for RevertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevertReason::SyncFailed(msg) => write!(f, "sync failed: {}", msg),
            RevertReason::Invalidated => write!(f, "invalidated"),
            RevertReason::TimedOut => write!(f, "timed out"),
        }
    }
}

/// A local write shown to the user before remote confirmation
#[derive(Clone)]
pub struct OptimisticUpdate {
    pub id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: OperationKind,
    /// Snapshot at the time of the optimistic write
    pub data: Snapshot,
    pub timestamp: DateTime<Utc>,
    pub on_revert: Option<RevertCallback>,
}

impl OptimisticUpdate {
    pub fn new(
        entity_type: impl Into<EntityType>,
        entity_id: impl Into<String>,
        operation: OperationKind,
        data: Snapshot,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            operation,
            data,
            timestamp: Utc::now(),
            on_revert: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn on_revert(
        mut self,
        callback: impl Fn(&OptimisticUpdate, &RevertReason) + Send + Sync + 'static,
    ) -> Self {
        self.on_revert = Some(Arc::new(callback));
        self
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.entity_id.clone())
    }

    fn is_for(&self, entity_type: &EntityType, entity_id: &str) -> bool {
        &self.entity_type == entity_type && self.entity_id == entity_id
    }

    fn fire_revert(&self, reason: &RevertReason) {
        debug!(id = %self.id, entity_id = %self.entity_id, %reason, "Reverting optimistic update");
        if let Some(callback) = &self.on_revert {
            callback(self, reason);
        }
    }
}

impl fmt::Debug for OptimisticUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticUpdate")
            .field("id", &self.id)
            .field("entity_type", &self.entity_type)
            .field("entity_id", &self.entity_id)
            .field("operation", &self.operation)
            .field("timestamp", &self.timestamp)
            .field("on_revert", &self.on_revert.is_some())
            .finish()
    }
}

pub struct OptimisticUpdateTracker {
    updates: Mutex<Vec<OptimisticUpdate>>,
    list_tx: watch::Sender<Vec<OptimisticUpdate>>,
    max_age: Duration,
}

impl Default for OptimisticUpdateTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE)
    }
}

impl OptimisticUpdateTracker {
    pub fn new(max_age: Duration) -> Self {
        let (list_tx, _) = watch::channel(Vec::new());
        Self {
            updates: Mutex::new(Vec::new()),
            list_tx,
            max_age,
        }
    }

    /// Receiver of the full pending list, re-sent on every change
    pub fn subscribe(&self) -> watch::Receiver<Vec<OptimisticUpdate>> {
        self.list_tx.subscribe()
    }

    /// Register an update and return its id
    pub fn add(&self, update: OptimisticUpdate) -> String {
        let id = update.id.clone();
        let mut updates = self.updates.lock();
        updates.push(update);
        self.publish(&updates);
        id
    }

    /// The update was confirmed by the remote store. Returns whether it was
    /// still pending.
    pub fn confirm(&self, id: &str) -> bool {
        self.confirm_many(&[id]) == 1
    }

    /// Roll an update back, invoking its `on_revert` callback
    pub fn revert(&self, id: &str, reason: RevertReason) -> bool {
        self.revert_many(&[id], reason) == 1
    }

    pub fn confirm_many(&self, ids: &[&str]) -> usize {
        let removed = self.remove_where(|u| ids.contains(&u.id.as_str()));
        if !removed.is_empty() {
            debug!(count = removed.len(), "Confirmed optimistic updates");
        }
        removed.len()
    }

    pub fn revert_many(&self, ids: &[&str], reason: RevertReason) -> usize {
        let removed = self.remove_where(|u| ids.contains(&u.id.as_str()));
        for update in &removed {
            update.fire_revert(&reason);
        }
        removed.len()
    }

    /// Confirm every pending update for one entity
    pub fn confirm_entity(&self, key: &EntityKey) -> usize {
        self.remove_where(|u| u.is_for(&key.entity_type, &key.entity_id))
            .len()
    }

    /// Revert every pending update for one entity
    pub fn revert_entity(&self, key: &EntityKey, reason: RevertReason) -> usize {
        let removed = self.remove_where(|u| u.is_for(&key.entity_type, &key.entity_id));
        for update in &removed {
            update.fire_revert(&reason);
        }
        removed.len()
    }

    /// Pending updates for one entity, oldest first
    pub fn get_for_entity(
        &self,
        entity_type: impl Into<EntityType>,
        entity_id: &str,
    ) -> Vec<OptimisticUpdate> {
        let entity_type = entity_type.into();
        self.updates
            .lock()
            .iter()
            .filter(|u| u.is_for(&entity_type, entity_id))
            .cloned()
            .collect()
    }

    pub fn pending(&self) -> Vec<OptimisticUpdate> {
        self.updates.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.updates.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.lock().is_empty()
    }

    /// Revert updates older than the age ceiling as of `now`
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let max_age = chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::MAX);
        let removed = self.remove_where(|u| now.signed_duration_since(u.timestamp) > max_age);
        if !removed.is_empty() {
            warn!(count = removed.len(), "Reverting abandoned optimistic updates");
        }
        for update in &removed {
            update.fire_revert(&RevertReason::TimedOut);
        }
        removed.len()
    }

    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    /// Removes matching updates under the lock and publishes the new list.
    /// Callbacks run after the lock is released.
    fn remove_where(&self, predicate: impl Fn(&OptimisticUpdate) -> bool) -> Vec<OptimisticUpdate> {
        let mut updates = self.updates.lock();
        let (removed, kept): (Vec<_>, Vec<_>) = updates.drain(..).partition(|u| predicate(u));
        *updates = kept;
        if !removed.is_empty() {
            self.publish(&updates);
        }
        removed
    }

    fn publish(&self, updates: &[OptimisticUpdate]) {
        self.list_tx.send_replace(updates.to_vec());
    }

    /// Periodically revert expired updates
    pub fn spawn_sweep(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep_expired();
            }
        })
    }

    /// Follow engine events: uploads confirm an entity's pending updates,
    /// dropped operations revert them.
    pub fn spawn_event_listener(
        self: Arc<Self>,
        mut events: broadcast::Receiver<SyncEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SyncEvent::OperationUploaded { key, .. }) => {
                        self.confirm_entity(&key);
                    }
                    Ok(SyncEvent::OperationDropped(dropped)) => {
                        self.revert_entity(&dropped.key, RevertReason::SyncFailed(dropped.error));
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Optimistic tracker lagged behind sync events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Sync event channel closed, stopping optimistic listener");
                        break;
                    }
                }
            }
        })
    }
}

impl fmt::Debug for OptimisticUpdateTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticUpdateTracker")
            .field("pending", &self.len())
            .field("max_age", &self.max_age)
            .finish()
    }
}
