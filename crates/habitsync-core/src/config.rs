//! Sync configuration
//!
//! All intervals and thresholds the subsystem uses, with defaults matching
//! the mobile client's behaviour. Hosts can override any subset through a
//! `config.json` in the data directory.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};
use crate::sync::resolver::ResolutionStrategy;
use crate::types::EntityType;

/// Name of the optional configuration file inside the data directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Default endpoint used to verify actual internet reachability
pub const DEFAULT_PROBE_URL: &str = "https://www.gstatic.com/generate_204";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Periodic drain interval while online with a non-empty queue
    pub drain_interval_secs: u64,
    /// Upload attempts before an operation is dropped
    pub max_attempts: u32,
    /// Uploads in flight at once during a drain (distinct entities only)
    pub upload_concurrency: usize,
    /// First retry delay after a drain with transient failures
    pub retry_base_delay_secs: u64,
    /// Upper bound for the retry delay
    pub retry_max_delay_secs: u64,
    /// Reachability probe target (only the status code matters)
    pub probe_url: String,
    pub probe_timeout_secs: u64,
    /// Re-probe interval while offline
    pub offline_recheck_secs: u64,
    /// Optimistic updates older than this are reverted by the sweep
    pub optimistic_max_age_secs: u64,
    pub optimistic_sweep_secs: u64,
    /// Entity types reconciled by a full sync pass, in order
    pub entity_types: Vec<EntityType>,
    /// Per-entity-type strategy overrides (keyed by type tag)
    pub strategies: BTreeMap<String, ResolutionStrategy>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drain_interval_secs: 300,
            max_attempts: 3,
            upload_concurrency: 4,
            retry_base_delay_secs: 5,
            retry_max_delay_secs: 300,
            probe_url: DEFAULT_PROBE_URL.to_string(),
            probe_timeout_secs: 5,
            offline_recheck_secs: 30,
            optimistic_max_age_secs: 3600,
            optimistic_sweep_secs: 300,
            entity_types: EntityType::BUILT_IN.to_vec(),
            strategies: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    /// Load `config.json` from `data_dir`, falling back to defaults when the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` if the file exists but cannot be parsed.
    pub fn load_or_default(data_dir: impl AsRef<Path>) -> SyncResult<Self> {
        let path = data_dir.as_ref().join(CONFIG_FILE_NAME);
        if !path.exists() {
            debug!(?path, "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)?;
        let config: SyncConfig = serde_json::from_str(&raw)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        info!(?path, "Loaded sync configuration");
        Ok(config)
    }

    /// Reject values that would stall or spin the scheduler
    pub fn validate(&self) -> SyncResult<()> {
        if self.max_attempts == 0 {
            return Err(SyncError::Config("max_attempts must be at least 1".into()));
        }
        if self.upload_concurrency == 0 {
            return Err(SyncError::Config(
                "upload_concurrency must be at least 1".into(),
            ));
        }
        if self.drain_interval_secs == 0 || self.offline_recheck_secs == 0 {
            return Err(SyncError::Config("intervals must be non-zero".into()));
        }
        Ok(())
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn offline_recheck_interval(&self) -> Duration {
        Duration::from_secs(self.offline_recheck_secs)
    }

    pub fn optimistic_max_age(&self) -> Duration {
        Duration::from_secs(self.optimistic_max_age_secs)
    }

    pub fn optimistic_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.optimistic_sweep_secs)
    }
}
