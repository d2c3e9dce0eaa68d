//! Configuration for the delegation core.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the delegation core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationConfig {
    /// Upper bound on simultaneously running sub-tasks within one DAG.
    /// Values `<= 0` are clamped to `1` at the point of use in `scheduler::run_dag`,
    /// not here, so a programmatic override of `0` behaves the same as a config one.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Wall-clock budget for a single sub-task attempt.
    #[serde(with = "humantime_serde", default = "default_subtask_timeout")]
    pub subtask_timeout: Duration,

    /// Maximum attempts the Sub-Task Runner makes before giving up on a task
    /// node that keeps producing no steps.
    #[serde(default = "default_subtask_max_attempts")]
    pub subtask_max_attempts: usize,

    /// Idle grace period the event bus consumer waits after seeing
    /// `message_end` before concluding the producer is actually done.
    #[serde(with = "humantime_serde", default = "default_drain_grace")]
    pub drain_grace: Duration,
}

fn default_max_concurrency() -> usize {
    6
}

fn default_subtask_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_subtask_max_attempts() -> usize {
    5
}

fn default_drain_grace() -> Duration {
    Duration::from_millis(250)
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            subtask_timeout: default_subtask_timeout(),
            subtask_max_attempts: default_subtask_max_attempts(),
            drain_grace: default_drain_grace(),
        }
    }
}

impl DelegationConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `delegation.toml` in the current directory, or the file named by
    ///    `DELEGATION_CONFIG_PATH`
    /// 3. `DELEGATION_`-prefixed environment variable overrides
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file or an env override fails to parse.
    pub fn load() -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Toml},
        };

        let mut figment = Figment::from(figment::providers::Serialized::defaults(
            DelegationConfig::default(),
        ))
        .merge(Toml::file("delegation.toml"))
        .merge(Env::prefixed("DELEGATION_").split("_"));

        if let Ok(path) = std::env::var("DELEGATION_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: DelegationConfig = figment
            .extract()
            .map_err(|e| crate::error::DelegationError::Internal(format!("failed to load configuration: {e}")))?;

        Ok(config)
    }

    /// Load configuration from a specific file path, ignoring the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Toml},
        };

        let config: DelegationConfig = Figment::from(figment::providers::Serialized::defaults(
            DelegationConfig::default(),
        ))
        .merge(Toml::file(path))
        .extract()
        .map_err(|e| {
            crate::error::DelegationError::Internal(format!("failed to load configuration file: {e}"))
        })?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = DelegationConfig::default();
        assert_eq!(cfg.max_concurrency, 6);
        assert_eq!(cfg.subtask_timeout, Duration::from_secs(120));
        assert_eq!(cfg.subtask_max_attempts, 5);
        assert_eq!(cfg.drain_grace, Duration::from_millis(250));
    }

    #[test]
    fn from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("delegation.toml");
        std::fs::write(&path, "max_concurrency = 2\nsubtask_max_attempts = 3\n").unwrap();

        let cfg = DelegationConfig::from_file(&path).unwrap();
        assert_eq!(cfg.max_concurrency, 2);
        assert_eq!(cfg.subtask_max_attempts, 3);
        assert_eq!(cfg.drain_grace, Duration::from_millis(250));
    }
}
