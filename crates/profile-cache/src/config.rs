//! Cache configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Profile cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding the snapshot, its backup and the staging file.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Minimum time between two rate-limited flushes, in milliseconds.
    #[serde(default = "default_flush_interval_ms")]
    pub min_flush_interval_ms: u64,

    /// Upstream directory lookup timeout, in milliseconds.
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("config").join("tournaments")
}

fn default_flush_interval_ms() -> u64 {
    10_000
}

fn default_upstream_timeout_ms() -> u64 {
    5_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            min_flush_interval_ms: default_flush_interval_ms(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
        }
    }
}

impl CacheConfig {
    /// Create config from environment variables, falling back to defaults
    /// for anything unset or unparseable.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `PROFILE_CACHE_DIR` | Snapshot directory |
    /// | `PROFILE_CACHE_FLUSH_INTERVAL_MS` | Minimum interval between flushes |
    /// | `PROFILE_CACHE_UPSTREAM_TIMEOUT_MS` | Upstream lookup timeout |
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("PROFILE_CACHE_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
            min_flush_interval_ms: std::env::var("PROFILE_CACHE_FLUSH_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_flush_interval_ms),
            upstream_timeout_ms: std::env::var("PROFILE_CACHE_UPSTREAM_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_upstream_timeout_ms),
        }
    }

    /// Strict variant of [`CacheConfig::from_env`]: a set but unparseable
    /// variable is an error instead of a silent default.
    pub fn try_from_env() -> CacheResult<Self> {
        let mut config = Self::from_env();
        if let Some(ms) = parse_env_u64("PROFILE_CACHE_FLUSH_INTERVAL_MS")? {
            config.min_flush_interval_ms = ms;
        }
        if let Some(ms) = parse_env_u64("PROFILE_CACHE_UPSTREAM_TIMEOUT_MS")? {
            config.upstream_timeout_ms = ms;
        }
        Ok(config)
    }

    /// Set the snapshot directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Set the minimum flush interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.min_flush_interval_ms = saturating_millis(interval);
        self
    }

    /// Set the upstream lookup timeout.
    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout_ms = saturating_millis(timeout);
        self
    }

    /// Minimum flush interval as a [`Duration`].
    pub fn min_flush_interval(&self) -> Duration {
        Duration::from_millis(self.min_flush_interval_ms)
    }

    /// Upstream timeout as a [`Duration`].
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_env_u64(key: &str) -> CacheResult<Option<u64>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| CacheError::Config {
                message: format!("{} must be an unsigned integer, got {:?}: {}", key, raw, e),
            }),
        Err(_) => Ok(None),
    }
}
