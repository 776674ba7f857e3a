//! Connectivity monitoring
//!
//! Two-stage check:
//!
//! 1. The link layer (reported by the host through
//!    [`ConnectivityMonitor::notify_link_change`]) says there is no interface
//!    up → `Offline` immediately, the probe is not even attempted.
//! 2. Otherwise a timeout-bounded [`ReachabilityProbe`] runs against a
//!    well-known endpoint. Only a successful probe yields `Online`; a failed
//!    or timed-out probe yields `Offline` (captive portals, dead carriers).
//!
//! While offline the monitor re-probes periodically so recovery is noticed
//! without waiting for a link-layer event. State is published on a
//! `tokio::sync::watch` channel and identical consecutive states are never
//! re-emitted.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// Process-wide view of remote reachability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Unknown,
    /// First probe in flight; always resolves to `Online` or `Offline`
    Checking,
    Online,
    Offline,
}

impl ConnectionState {
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectionState::Online)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Unknown => "unknown",
            ConnectionState::Checking => "checking",
            ConnectionState::Online => "online",
            ConnectionState::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// What the platform reports about the network interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    None,
    Wifi,
    Mobile,
    Ethernet,
    Other,
}

impl LinkStatus {
    pub fn is_connected(&self) -> bool {
        !matches!(self, LinkStatus::None)
    }
}

/// Active check that the remote side is actually reachable
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> SyncResult<()>;
}

/// Probe that issues a `HEAD` request and only looks at the status code
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build probe client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        Self::new(config.probe_url.clone(), config.probe_timeout())
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self) -> SyncResult<()> {
        let response = self
            .client
            .head(&self.url)
            .send()
            .await
            .map_err(|e| SyncError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SyncError::Remote {
                status: status.as_u16(),
                message: format!("probe {} answered {}", self.url, status),
            })
        }
    }
}

/// Observes reachability and publishes [`ConnectionState`] changes
pub struct ConnectivityMonitor {
    probe: Arc<dyn ReachabilityProbe>,
    link: Mutex<LinkStatus>,
    state_tx: watch::Sender<ConnectionState>,
    probe_timeout: Duration,
    recheck_interval: Duration,
    /// Set while a check runs; overlapping checks return the current state
    checking: AtomicBool,
}

impl ConnectivityMonitor {
    pub fn new(
        probe: Arc<dyn ReachabilityProbe>,
        probe_timeout: Duration,
        recheck_interval: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Unknown);
        Self {
            probe,
            // Hosts without link-layer reporting rely on the probe alone
            link: Mutex::new(LinkStatus::Other),
            state_tx,
            probe_timeout,
            recheck_interval,
            checking: AtomicBool::new(false),
        }
    }

    pub fn from_config(probe: Arc<dyn ReachabilityProbe>, config: &SyncConfig) -> Self {
        Self::new(probe, config.probe_timeout(), config.offline_recheck_interval())
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current_state().is_online()
    }

    /// Subscribe to state changes. The receiver starts at the current state.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn link_status(&self) -> LinkStatus {
        *self.link.lock()
    }

    /// Record a link-layer change and re-check reachability.
    ///
    /// Losing the link goes offline at once, even while a probe is in flight.
    pub async fn notify_link_change(&self, status: LinkStatus) -> ConnectionState {
        {
            let mut link = self.link.lock();
            if *link != status {
                debug!(from = ?*link, to = ?status, "Link status changed");
            }
            *link = status;
        }
        if !status.is_connected() {
            self.publish(ConnectionState::Offline);
            return ConnectionState::Offline;
        }
        self.check_now().await
    }

    /// Run the two-stage check and publish the result
    pub async fn check_now(&self) -> ConnectionState {
        if self.checking.swap(true, Ordering::AcqRel) {
            debug!("Connectivity check already in flight");
            return self.current_state();
        }

        let state = self.evaluate().await;
        self.publish(state);
        self.checking.store(false, Ordering::Release);
        state
    }

    async fn evaluate(&self) -> ConnectionState {
        let link = self.link_status();
        if !link.is_connected() {
            debug!("No network interface, skipping probe");
            return ConnectionState::Offline;
        }

        if self.current_state() == ConnectionState::Unknown {
            self.publish(ConnectionState::Checking);
        }

        match tokio::time::timeout(self.probe_timeout, self.probe.probe()).await {
            // The link may have dropped while the probe ran
            Ok(Ok(())) if !self.link_status().is_connected() => ConnectionState::Offline,
            Ok(Ok(())) => ConnectionState::Online,
            Ok(Err(e)) => {
                debug!(?link, error = %e, "Reachability probe failed");
                ConnectionState::Offline
            }
            Err(_) => {
                debug!(?link, timeout_secs = self.probe_timeout.as_secs(), "Reachability probe timed out");
                ConnectionState::Offline
            }
        }
    }

    fn publish(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed && state != ConnectionState::Checking {
            info!(%state, "Connectivity changed");
        }
    }

    /// Spawn the monitor loop: an initial check, then a re-probe every
    /// `recheck_interval` while offline.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.check_now().await;

            let mut interval = tokio::time::interval(self.recheck_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                if self.current_state() == ConnectionState::Offline {
                    let state = self.check_now().await;
                    if state.is_online() {
                        info!("Connectivity recovered on periodic re-check");
                    }
                }
            }
        })
    }
}

impl fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("state", &self.current_state())
            .field("link", &self.link_status())
            .field("probe_timeout", &self.probe_timeout)
            .field("recheck_interval", &self.recheck_interval)
            .finish()
    }
}

/// Probe with a fixed answer, for hosts that manage reachability themselves
#[derive(Debug)]
pub struct StaticProbe {
    reachable: AtomicBool,
}

impl StaticProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }
}

#[async_trait]
impl ReachabilityProbe for StaticProbe {
    async fn probe(&self) -> SyncResult<()> {
        if self.reachable.load(Ordering::Acquire) {
            Ok(())
        } else {
            warn!("Static probe reports the remote as unreachable");
            Err(SyncError::Unreachable("marked unreachable".to_string()))
        }
    }
}
