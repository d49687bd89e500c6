use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

/// Outcome reported by the plugin for one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// The round ran and its result was accepted.
    Contributed,
    /// The server turned the client away; its retry hint still applies.
    RejectedByServer,
    Failed,
    /// A status code this build does not know.
    Other(i32),
}

impl PlanStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Contributed,
            1 => Self::RejectedByServer,
            2 => Self::Failed,
            other => Self::Other(other),
        }
    }

    /// True for outcomes that carry a trustworthy retry token and delay.
    pub fn carries_retry_hint(self) -> bool {
        matches!(self, Self::Contributed | Self::RejectedByServer)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contributed => write!(f, "contributed"),
            Self::RejectedByServer => write!(f, "rejected_by_server"),
            Self::Failed => write!(f, "failed"),
            Self::Other(code) => write!(f, "status_{code}"),
        }
    }
}

/// Per-round arguments passed to the plugin.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    /// Client-specific working directory.
    pub base_dir: &'a Path,
    pub service_uri: &'a str,
    pub api_key: &'a str,
    pub population_name: &'a str,
    pub retry_token: &'a str,
}

/// Owned copy of the plugin's result record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanResult {
    pub status: PlanStatus,
    pub retry_token: String,
    /// Server-suggested wait before the next round.
    pub delay: Duration,
}

impl PlanResult {
    pub fn failed() -> Self {
        Self {
            status: PlanStatus::Failed,
            retry_token: String::new(),
            delay: Duration::ZERO,
        }
    }
}
