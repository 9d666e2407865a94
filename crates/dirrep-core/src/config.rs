//! Repository handle options
//!
//! Options are plain data so they can live in a TOML, JSON or YAML file next
//! to an application's other settings. Durations are stored as milliseconds.

use crate::Result;
use dirrep_fs::{ConfigStore, DEFAULT_LOCK_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tuning knobs for the transaction protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryOptions {
    /// Attempts per transaction before giving up with `ConcurrentModification`
    pub n_trials: u32,
    /// Upper bound for every single lock acquisition
    #[serde(rename = "lock_timeout_ms", with = "millis")]
    pub lock_timeout: Duration,
    /// First delay between two attempts
    #[serde(rename = "retry_initial_interval_ms", with = "millis")]
    pub retry_initial_interval: Duration,
    /// Delay cap between two attempts
    #[serde(rename = "retry_max_interval_ms", with = "millis")]
    pub retry_max_interval: Duration,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            n_trials: 3,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            retry_initial_interval: Duration::from_millis(10),
            retry_max_interval: Duration::from_millis(200),
        }
    }
}

impl RepositoryOptions {
    /// Load options from a config file; the format follows the extension.
    ///
    /// Missing keys fall back to their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(ConfigStore::new().load(path)?)
    }

    /// Save options to a config file; the format follows the extension.
    pub fn save(&self, path: &Path) -> Result<()> {
        Ok(ConfigStore::new().save(path, self)?)
    }

    pub fn with_n_trials(mut self, n_trials: u32) -> Self {
        self.n_trials = n_trials;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_retry_intervals(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_initial_interval = initial;
        self.retry_max_interval = max;
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
