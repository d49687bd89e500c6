//! Composite admission gate over every registered [`TrainingCondition`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::debug;

use crate::condition::TrainingCondition;

/// Which decision point an admission check was made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Start,
    Continue,
}

/// Public snapshot of admission outcomes since startup.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AdmissionSnapshot {
    pub start_allowed: u64,
    pub start_denied: u64,
    pub continue_allowed: u64,
    pub continue_denied: u64,
    /// Name of the condition behind the most recent denial.
    pub last_denied_by: Option<&'static str>,
}

#[derive(Default)]
struct AdmissionStats {
    start_allowed: AtomicU64,
    start_denied: AtomicU64,
    continue_allowed: AtomicU64,
    continue_denied: AtomicU64,
    last_denied_by: Mutex<Option<&'static str>>,
}

impl AdmissionStats {
    fn record(&self, decision: Decision, denied_by: Option<&'static str>) {
        let counter = match (decision, denied_by.is_some()) {
            (Decision::Start, false) => &self.start_allowed,
            (Decision::Start, true) => &self.start_denied,
            (Decision::Continue, false) => &self.continue_allowed,
            (Decision::Continue, true) => &self.continue_denied,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if denied_by.is_some() {
            if let Ok(mut last) = self.last_denied_by.lock() {
                *last = denied_by;
            }
        }
    }

    fn snapshot(&self) -> AdmissionSnapshot {
        AdmissionSnapshot {
            start_allowed: self.start_allowed.load(Ordering::Relaxed),
            start_denied: self.start_denied.load(Ordering::Relaxed),
            continue_allowed: self.continue_allowed.load(Ordering::Relaxed),
            continue_denied: self.continue_denied.load(Ordering::Relaxed),
            last_denied_by: self.last_denied_by.lock().map(|l| *l).unwrap_or(None),
        }
    }
}

/// ANDs all registered conditions for both decision points.
///
/// Evaluation stops at the first unsatisfied condition, in registration order.
pub struct DeviceStatusMonitor {
    conditions: Vec<Arc<dyn TrainingCondition>>,
    stats: AdmissionStats,
}

impl DeviceStatusMonitor {
    pub fn new(conditions: Vec<Arc<dyn TrainingCondition>>) -> Self {
        Self {
            conditions,
            stats: AdmissionStats::default(),
        }
    }

    pub fn satisfied_to_start(&self) -> bool {
        self.evaluate(Decision::Start)
    }

    pub fn satisfied_to_continue(&self) -> bool {
        self.evaluate(Decision::Continue)
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        self.stats.snapshot()
    }

    /// Names of the registered conditions, in evaluation order.
    pub fn condition_names(&self) -> Vec<&'static str> {
        self.conditions.iter().map(|c| c.name()).collect()
    }

    fn evaluate(&self, decision: Decision) -> bool {
        let denied_by = self
            .conditions
            .iter()
            .find(|c| match decision {
                Decision::Start => !c.satisfied_to_start(),
                Decision::Continue => !c.satisfied_to_continue(),
            })
            .map(|c| c.name());

        if let Some(name) = denied_by {
            debug!(condition = name, ?decision, "admission denied");
        }
        self.stats.record(decision, denied_by);
        denied_by.is_none()
    }
}
