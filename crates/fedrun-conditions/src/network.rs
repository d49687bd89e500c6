use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::condition::TrainingCondition;
use crate::error::ConditionError;

/// Point query against the network service for the current default path.
pub trait NetworkProbe {
    fn default_path_metered(&self) -> Result<bool, ConditionError>;
}

/// Satisfied only on an unmetered default connection.
///
/// Starts metered, and falls back to metered whenever the network service
/// cannot be queried.
pub struct NetworkCondition {
    metered: AtomicBool,
}

impl NetworkCondition {
    pub fn new() -> Self {
        Self {
            metered: AtomicBool::new(true),
        }
    }

    /// "Default network path changed" notification: re-query the new path.
    pub fn on_default_path_changed(&self, probe: &dyn NetworkProbe) {
        match probe.default_path_metered() {
            Ok(metered) => self.set_metered(metered),
            Err(e) => {
                warn!(error = %e, "network query failed, assuming metered");
                self.set_metered(true);
            }
        }
    }

    pub fn set_metered(&self, metered: bool) {
        self.metered.store(metered, Ordering::Release);
        debug!(metered, "default network updated");
    }

    pub fn is_metered(&self) -> bool {
        self.metered.load(Ordering::Acquire)
    }
}

impl Default for NetworkCondition {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingCondition for NetworkCondition {
    fn name(&self) -> &'static str {
        "network"
    }

    fn satisfied_to_start(&self) -> bool {
        !self.is_metered()
    }

    fn satisfied_to_continue(&self) -> bool {
        !self.is_metered()
    }
}
