//! Engine configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration
///
/// Controls how the orchestrator terminates processes, how long it waits for
/// trailing output, and where per-run scratch directories are created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Time between the graceful terminate signal and the unconditional kill
    #[serde(with = "millis")]
    pub grace_period: Duration,

    /// Delay before the kill that follows a forced stop's terminate signal
    #[serde(with = "millis")]
    pub force_kill_delay: Duration,

    /// How long to keep reading samples after the output streams close
    #[serde(with = "millis")]
    pub late_sample_wait: Duration,

    /// Minimum free space required on the scratch filesystem (bytes)
    pub min_free_disk_bytes: u64,

    /// Parent directory for per-run scratch directories; the system temp dir when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_root: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
            force_kill_delay: Duration::from_millis(500),
            late_sample_wait: Duration::from_millis(200),
            min_free_disk_bytes: 100 * 1024 * 1024,
            scratch_root: None,
        }
    }
}

impl EngineConfig {
    /// Set the termination grace period
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Set the forced-kill delay
    pub fn with_force_kill_delay(mut self, delay: Duration) -> Self {
        self.force_kill_delay = delay;
        self
    }

    /// Set the late-sample wait
    pub fn with_late_sample_wait(mut self, wait: Duration) -> Self {
        self.late_sample_wait = wait;
        self
    }

    /// Set the free disk space requirement (0 disables the check)
    pub fn with_min_free_disk_bytes(mut self, bytes: u64) -> Self {
        self.min_free_disk_bytes = bytes;
        self
    }

    /// Set the scratch root
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    /// Resolved scratch root
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grace_period.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "grace period must be positive".into(),
            ));
        }

        if self.force_kill_delay > self.grace_period {
            return Err(ConfigError::InvalidDuration(
                "forced-kill delay must not exceed the grace period".into(),
            ));
        }

        if let Some(root) = &self.scratch_root {
            if root.as_os_str().is_empty() {
                return Err(ConfigError::InvalidScratchRoot(
                    "scratch root must not be empty".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Serialize durations as whole milliseconds
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid timing value
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// Invalid scratch root
    #[error("Invalid scratch root: {0}")]
    InvalidScratchRoot(String),
}

impl From<ConfigError> for crate::error::BenchError {
    fn from(err: ConfigError) -> Self {
        crate::error::BenchError::config(err.to_string())
    }
}
