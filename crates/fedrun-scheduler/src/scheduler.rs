use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fedrun_conditions::DeviceStatusMonitor;
use fedrun_core::ClientConfig;
use fedrun_plugin::{ComputationPlugin, PlanStatus, PluginSlot};
use fedrun_store::StorageManager;
use futures_util::StreamExt;
use serde::Serialize;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, info, warn};

use crate::session::{ClientSession, RoundOutcome};
use crate::settings::SchedulerSettings;

/// Counters describing what the scheduler has done since startup.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    attempts: AtomicU64,
    gate_denied: AtomicU64,
    data_denied: AtomicU64,
    rounds: AtomicU64,
    contributed: AtomicU64,
}

/// Serializable copy of [`SchedulerStats`].
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    pub attempts: u64,
    pub gate_denied: u64,
    pub data_denied: u64,
    pub rounds: u64,
    pub contributed: u64,
}

impl SchedulerStats {
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            gate_denied: self.gate_denied.load(Ordering::Relaxed),
            data_denied: self.data_denied.load(Ordering::Relaxed),
            rounds: self.rounds.load(Ordering::Relaxed),
            contributed: self.contributed.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Drives every client's retry loop.
///
/// Each session has at most one pending attempt in the delay queue. An attempt
/// always ends by posting the next one, so once started the loop never ends.
/// All methods run on the engine's single execution sequence.
pub struct Scheduler {
    monitor: Arc<DeviceStatusMonitor>,
    storage: StorageManager,
    plugin_slot: PluginSlot,
    plugin: Option<Arc<dyn ComputationPlugin>>,
    settings: SchedulerSettings,
    sessions: Vec<ClientSession>,
    pending: DelayQueue<usize>,
    keys: Vec<Option<delay_queue::Key>>,
    started: bool,
    stats: Arc<SchedulerStats>,
}

impl Scheduler {
    pub fn new(
        monitor: Arc<DeviceStatusMonitor>,
        storage: StorageManager,
        plugin: PluginSlot,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            monitor,
            storage,
            plugin_slot: plugin,
            plugin: None,
            settings,
            sessions: Vec::new(),
            pending: DelayQueue::new(),
            keys: Vec::new(),
            started: false,
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    /// Start the retry loop for `clients`. Only the first call has any effect.
    ///
    /// Loads the computation plugin first; if that fails nothing is scheduled.
    /// Must run inside a Tokio runtime.
    pub fn schedule(&mut self, clients: Vec<ClientConfig>) {
        if self.started {
            debug!("scheduling already started");
            return;
        }
        self.started = true;

        let Some(plugin) = self.plugin_slot.get_or_load() else {
            return;
        };
        self.plugin = Some(plugin);

        for config in clients {
            let session = ClientSession::new(config, self.settings.retry);
            let delay = session.next_retry_delay();
            info!(client = %session.name(), first_attempt_secs = delay.as_secs(), "client scheduled");
            self.sessions.push(session);
            self.keys.push(None);
            self.post(self.sessions.len() - 1, delay);
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn sessions(&self) -> &[ClientSession] {
        &self.sessions
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut StorageManager {
        &mut self.storage
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        Arc::clone(&self.stats)
    }

    /// Number of attempts waiting in the delay queue.
    pub fn pending_attempts(&self) -> usize {
        self.pending.len()
    }

    /// Wait for the next due attempt. Returns `None` at once when nothing is
    /// pending.
    pub async fn next_due(&mut self) -> Option<usize> {
        let expired = self.pending.next().await?;
        let index = expired.into_inner();
        if let Some(key) = self.keys.get_mut(index) {
            *key = None;
        }
        Some(index)
    }

    /// One scheduled attempt for the session at `index`.
    pub fn attempt(&mut self, index: usize) -> Option<RoundOutcome> {
        let outcome = self.try_round(index);
        let delay = self.sessions.get(index)?.next_retry_delay();
        self.post(index, delay);
        outcome
    }

    fn try_round(&mut self, index: usize) -> Option<RoundOutcome> {
        let plugin = self.plugin.clone()?;
        let session = self.sessions.get_mut(index)?;
        SchedulerStats::bump(&self.stats.attempts);
        session.reset_retry_delay();

        if !self.monitor.satisfied_to_start() {
            debug!(client = %session.name(), "device not ready, deferring round");
            SchedulerStats::bump(&self.stats.gate_denied);
            return None;
        }

        let config = session.config();
        let end = Utc::now();
        let window = chrono::Duration::from_std(config.example_window)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let start = end - window;
        let Some(cursor) =
            self.storage
                .get_training_cursor(&config.name, start, end, config.min_example_count)
        else {
            debug!(client = %config.name, "no usable examples, deferring round");
            SchedulerStats::bump(&self.stats.data_denied);
            return None;
        };

        let work_dir = self.settings.work_dir(&config.name);
        if let Err(e) = std::fs::create_dir_all(&work_dir) {
            warn!(client = %config.name, dir = %work_dir.display(), error = %e, "cannot create working directory");
            return None;
        }

        SchedulerStats::bump(&self.stats.rounds);
        let outcome = session.run_round(
            cursor,
            &self.monitor,
            plugin.as_ref(),
            &self.settings,
            &work_dir,
        );

        if outcome.status == PlanStatus::Contributed {
            SchedulerStats::bump(&self.stats.contributed);
            if session.config().delete_after_contribution {
                consume(&self.storage, session.name(), outcome.last_example_id);
            }
        }
        Some(outcome)
    }

    /// Post the session's single outstanding attempt `delay` from now.
    fn post(&mut self, index: usize, delay: Duration) {
        let Some(slot) = self.keys.get_mut(index) else {
            return;
        };
        match slot {
            Some(key) => self.pending.reset(key, delay),
            None => *slot = Some(self.pending.insert(index, delay)),
        }
    }
}

/// Remove the examples a contributed round consumed.
fn consume(storage: &StorageManager, client: &str, last_id: Option<i64>) {
    let Some(last_id) = last_id else {
        return;
    };
    if storage.delete_up_to_id(client, last_id) {
        debug!(client = %client, up_to = last_id, "consumed examples removed");
    } else {
        debug!(client = %client, "nothing to clean");
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("sessions", &self.sessions.len())
            .field("pending", &self.pending.len())
            .field("started", &self.started)
            .finish()
    }
}
