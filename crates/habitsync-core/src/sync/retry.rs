//! Retry classification and backoff
//!
//! Upload failures fall into three buckets:
//!
//! - **Transient**: the request failed but the network works (timeouts on a
//!   single request, 5xx, 408, 429). Counted against the record's attempts.
//! - **Permanent**: retrying cannot help (unserializable payload, 4xx
//!   rejection). The record is dropped immediately.
//! - **Abort**: the remote store is unreachable as a whole. The drain stops
//!   without charging an attempt to any record; the next drain retries.

use std::time::Duration;

use rand::Rng;

use crate::config::SyncConfig;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
    Abort,
}

impl SyncError {
    /// Classify an upload error for retry decisions
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SyncError::Unreachable(_) | SyncError::Offline(_) => FailureKind::Abort,
            SyncError::Network(_) | SyncError::SyncInProgress => FailureKind::Transient,
            SyncError::Remote { status, .. } => match *status {
                408 | 429 => FailureKind::Transient,
                s if s >= 500 => FailureKind::Transient,
                _ => FailureKind::Permanent,
            },
            SyncError::Serialization(_)
            | SyncError::MalformedPayload { .. }
            | SyncError::InvalidOperation(_)
            | SyncError::Config(_) => FailureKind::Permanent,
            // Local storage trouble says nothing about the record itself
            SyncError::Storage(_)
            | SyncError::Database(_)
            | SyncError::Transaction(_)
            | SyncError::Table(_)
            | SyncError::StorageOp(_)
            | SyncError::Commit(_)
            | SyncError::Io(_) => FailureKind::Transient,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.failure_kind() == FailureKind::Transient
    }
}

/// Bounded attempts with exponential, jittered backoff between drains
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after which a record is dropped
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay added as random jitter (0.0 disables)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_secs(config.retry_base_delay_secs),
            max_delay: Duration::from_secs(config.retry_max_delay_secs),
            ..Self::default()
        }
    }

    /// Whether a record that has failed `attempt` times is out of retries
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Backoff before the next drain after `failures` consecutive drains with
    /// transient failures (1-based). Doubles from `base_delay`, capped at
    /// `max_delay`, then jittered upward.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let extra = delay.as_secs_f64() * self.jitter * rand::rng().random_range(0.0..1.0);
        (delay + Duration::from_secs_f64(extra)).min(self.max_delay)
    }
}
