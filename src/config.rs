//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Identity used for publish calls when none is configured.
pub const DEFAULT_TARGET_USER: &str = "planninguser";

/// Task assigner configuration.
#[derive(Debug, Clone)]
pub struct AssignerConfig {
    /// Period between two synchronizer ticks.
    pub sync_interval: Duration,
    /// Lookback subtracted from the last read start for incremental queries.
    pub sync_queries_shift: Duration,
    /// Period between two full roster (and full snapshot) refreshes.
    pub users_sync_interval: Duration,
    /// Maximum number of visible assignments per worker. Must be > 0.
    pub publish_window_size: usize,
    /// Identity used as the "on behalf of" user when publishing.
    pub target_user: String,
    /// Period between two optimizer improvement rounds while idle.
    pub improve_interval: Duration,
    /// How long `destroy()` waits for the background contexts.
    pub shutdown_timeout: Duration,
}

impl Default for AssignerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(2),
            sync_queries_shift: Duration::from_secs(600), // 10 minutes
            users_sync_interval: Duration::from_secs(7200), // 2 hours
            publish_window_size: 2,
            target_user: DEFAULT_TARGET_USER.to_string(),
            improve_interval: Duration::from_millis(200),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl AssignerConfig {
    /// Load configuration from `TASK_ASSIGNER_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let sync_interval = env_parse::<u64>("TASK_ASSIGNER_SYNC_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.sync_interval);

        let sync_queries_shift = env_parse::<u64>("TASK_ASSIGNER_SYNC_QUERIES_SHIFT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.sync_queries_shift);

        let users_sync_interval = env_parse::<u64>("TASK_ASSIGNER_USERS_SYNC_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.users_sync_interval);

        let publish_window_size = env_parse::<usize>("TASK_ASSIGNER_PUBLISH_WINDOW_SIZE")?
            .unwrap_or(defaults.publish_window_size);

        let target_user =
            std::env::var("TASK_ASSIGNER_TARGET_USER").unwrap_or(defaults.target_user);

        let improve_interval = env_parse::<u64>("TASK_ASSIGNER_IMPROVE_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.improve_interval);

        let shutdown_timeout = env_parse::<u64>("TASK_ASSIGNER_SHUTDOWN_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.shutdown_timeout);

        let config = Self {
            sync_interval,
            sync_queries_shift,
            users_sync_interval,
            publish_window_size,
            target_user,
            improve_interval,
            shutdown_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.publish_window_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "publish_window_size".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if self.sync_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "sync_interval".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if self.improve_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "improve_interval".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if self.target_user.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "target_user".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Read and parse an optional environment variable.
fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("cannot parse '{raw}'"),
            }),
        Err(_) => Ok(None),
    }
}
