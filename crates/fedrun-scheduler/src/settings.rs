use std::path::PathBuf;
use std::time::Duration;

use fedrun_core::FedrunConfig;

/// Retry cadence shared by every client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after failures, denials and at startup.
    pub default_window: Duration,
    /// Lower bound for server-provided delays.
    pub min_floor: Duration,
}

impl RetryPolicy {
    /// Delay to use after a round that carried a server hint.
    pub fn clamp(&self, hinted: Duration) -> Duration {
        hinted.max(self.min_floor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            default_window: Duration::from_secs(fedrun_core::config::DEFAULT_RETRY_SECS),
            min_floor: Duration::from_secs(fedrun_core::config::MIN_RETRY_SECS),
        }
    }
}

/// Everything a round needs besides the session and its examples.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub retry: RetryPolicy,
    pub service_uri: String,
    pub api_key: String,
    /// Parent of the per-client working directories.
    pub work_root: PathBuf,
}

impl SchedulerSettings {
    pub fn from_config(config: &FedrunConfig) -> Self {
        Self {
            retry: RetryPolicy {
                default_window: Duration::from_secs(config.scheduler.default_retry_secs),
                min_floor: Duration::from_secs(config.scheduler.min_retry_secs),
            },
            service_uri: config.plugin.service_uri.clone(),
            api_key: config.plugin.api_key.clone(),
            work_root: PathBuf::from(&config.plugin.work_root),
        }
    }

    /// Working directory handed to the plugin for `client_name`.
    pub fn work_dir(&self, client_name: &str) -> PathBuf {
        self.work_root.join(client_name)
    }
}
