use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime definition of one recurring job ("client").
///
/// Built once when scheduling starts. Only `retry_token` changes afterwards,
/// and only the owning client session writes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Stable identifier. Also the name of the client's example table.
    pub name: String,
    /// Opaque server-issued continuation token. Empty until the first round.
    #[serde(default)]
    pub retry_token: String,
    #[serde(default)]
    pub launch_stage: String,
    /// External name producers use when reporting examples for this client.
    pub table_name: String,
    /// Fewest examples a round may start with.
    pub min_example_count: u64,
    /// How far back the scheduler looks for examples when starting a round.
    pub example_window: Duration,
    /// Delete the examples handed to the plugin after a contributed round.
    #[serde(default)]
    pub delete_after_contribution: bool,
}

impl ClientConfig {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table_name: name.clone(),
            name,
            retry_token: String::new(),
            launch_stage: String::new(),
            min_example_count: 1,
            example_window: Duration::from_secs(30 * 24 * 60 * 60),
            delete_after_contribution: false,
        }
    }

    /// Population the plugin reports under: `name` or `name/launch_stage`.
    pub fn population_name(&self) -> String {
        if self.launch_stage.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.name, self.launch_stage)
        }
    }
}

/// True when `s` is usable as a client or table identifier.
///
/// Client names end up as SQLite table names and directory names, so only
/// ASCII alphanumerics and underscores are accepted.
pub fn is_valid_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
