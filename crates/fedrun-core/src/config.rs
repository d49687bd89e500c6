use std::collections::HashSet;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{FedrunError, Result};
use crate::types::{is_valid_identifier, ClientConfig};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_RETENTION_DAYS: u64 = 30;
pub const DEFAULT_RETRY_SECS: u64 = 30 * 60; // fallback window after failures
pub const MIN_RETRY_SECS: u64 = 60; // floor applied to server-provided delays
pub const DEFAULT_STORE_FILE: &str = "examples.db";

const SECS_PER_DAY: u64 = 24 * 60 * 60;
/// Upper bound for any day count in the config.
const MAX_DAYS: u64 = 100 * 365;

/// Top-level config (fedrun.toml + FEDRUN_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FedrunConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub plugin: PluginConfig,
    #[serde(default)]
    pub clients: Vec<ClientEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one sub-directory per storage namespace.
    #[serde(default = "default_store_root")]
    pub root: String,
    #[serde(default = "default_store_file")]
    pub file_name: String,
    /// Examples older than this are removed every time a store is opened.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
            file_name: default_store_file(),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl StorageConfig {
    pub fn retention(&self) -> Duration {
        days(self.retention_days)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_retry_secs")]
    pub default_retry_secs: u64,
    #[serde(default = "min_retry_secs")]
    pub min_retry_secs: u64,
    /// Namespace to open at boot, before any session event arrives.
    pub initial_namespace: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_retry_secs: DEFAULT_RETRY_SECS,
            min_retry_secs: MIN_RETRY_SECS,
            initial_namespace: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Shared library exporting `run_plan` and `free_run_plan_result`.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub service_uri: String,
    #[serde(default)]
    pub api_key: String,
    /// Parent of the per-client working directories.
    #[serde(default = "default_work_root")]
    pub work_root: String,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            service_uri: String::new(),
            api_key: String::new(),
            work_root: default_work_root(),
        }
    }
}

/// A `[[clients]]` entry as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEntry {
    pub name: String,
    #[serde(default)]
    pub launch_stage: String,
    /// Defaults to `name`.
    pub table_name: Option<String>,
    #[serde(default = "default_min_examples")]
    pub min_example_count: u64,
    /// Defaults to `storage.retention_days`.
    pub example_window_days: Option<u64>,
    #[serde(default)]
    pub delete_after_contribution: bool,
}

impl FedrunConfig {
    /// Load config from a TOML file with FEDRUN_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g. `FEDRUN_STORAGE__RETENTION_DAYS=7`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: FedrunConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("FEDRUN_").split("__"))
            .extract()
            .map_err(|e| FedrunError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject client lists that would produce unusable table names or
    /// ambiguous ingestion routing.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut tables = HashSet::new();
        for entry in &self.clients {
            if !is_valid_identifier(&entry.name) {
                return Err(invalid(&entry.name, "name must be [A-Za-z0-9_]+"));
            }
            let table = entry.table_name.as_deref().unwrap_or(&entry.name);
            if !is_valid_identifier(table) {
                return Err(invalid(&entry.name, "table_name must be [A-Za-z0-9_]+"));
            }
            if entry.example_window_days.is_some_and(|d| d > MAX_DAYS) {
                return Err(invalid(&entry.name, "example_window_days is too large"));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(invalid(&entry.name, "duplicate client name"));
            }
            if !tables.insert(table) {
                return Err(invalid(&entry.name, "duplicate table_name"));
            }
        }
        if self.storage.retention_days > MAX_DAYS {
            return Err(FedrunError::Config(format!(
                "storage.retention_days exceeds {MAX_DAYS}"
            )));
        }
        if self.scheduler.min_retry_secs > self.scheduler.default_retry_secs {
            return Err(FedrunError::Config(
                "scheduler.min_retry_secs exceeds scheduler.default_retry_secs".into(),
            ));
        }
        Ok(())
    }

    /// Runtime client definitions, in declaration order.
    pub fn client_configs(&self) -> Vec<ClientConfig> {
        self.clients
            .iter()
            .map(|entry| {
                let window_days = entry
                    .example_window_days
                    .unwrap_or(self.storage.retention_days);
                ClientConfig {
                    name: entry.name.clone(),
                    retry_token: String::new(),
                    launch_stage: entry.launch_stage.clone(),
                    table_name: entry
                        .table_name
                        .clone()
                        .unwrap_or_else(|| entry.name.clone()),
                    min_example_count: entry.min_example_count,
                    example_window: days(window_days),
                    delete_after_contribution: entry.delete_after_contribution,
                }
            })
            .collect()
    }
}

fn invalid(name: &str, reason: &str) -> FedrunError {
    FedrunError::InvalidClient {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn days(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(SECS_PER_DAY))
}
fn default_retention_days() -> u64 {
    DEFAULT_RETENTION_DAYS
}
fn default_retry_secs() -> u64 {
    DEFAULT_RETRY_SECS
}
fn min_retry_secs() -> u64 {
    MIN_RETRY_SECS
}
fn default_min_examples() -> u64 {
    1
}
fn default_store_file() -> String {
    DEFAULT_STORE_FILE.to_string()
}
fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
}
fn default_store_root() -> String {
    format!("{}/.fedrun/store", home_dir())
}
fn default_work_root() -> String {
    format!("{}/.fedrun/work", home_dir())
}
fn default_config_path() -> String {
    format!("{}/.fedrun/fedrun.toml", home_dir())
}
