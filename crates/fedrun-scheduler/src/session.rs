use std::path::Path;
use std::time::Duration;

use fedrun_conditions::DeviceStatusMonitor;
use fedrun_core::ClientConfig;
use fedrun_plugin::{
    ComputationPlugin, ExampleSourceError, PlanRequest, PlanResult, PlanStatus, TaskEnvironment,
};
use fedrun_store::{Cursor, CursorError};
use tracing::{debug, info, warn};

use crate::settings::{RetryPolicy, SchedulerSettings};

/// What happened during one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    pub status: PlanStatus,
    /// Examples handed to the plugin.
    pub examples_served: usize,
    /// Greatest example id handed to the plugin, if any.
    pub last_example_id: Option<i64>,
    pub events_published: usize,
}

/// Retry state of one client plus the logic to run a single round.
#[derive(Debug)]
pub struct ClientSession {
    config: ClientConfig,
    next_retry_delay: Duration,
    policy: RetryPolicy,
}

impl ClientSession {
    pub fn new(config: ClientConfig, policy: RetryPolicy) -> Self {
        Self {
            config,
            next_retry_delay: policy.default_window,
            policy,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn retry_token(&self) -> &str {
        &self.config.retry_token
    }

    pub fn next_retry_delay(&self) -> Duration {
        self.next_retry_delay
    }

    /// Drop any delay left over from the previous cycle.
    pub fn reset_retry_delay(&mut self) {
        self.next_retry_delay = self.policy.default_window;
    }

    /// Run one round over `examples`, blocking until the plugin returns.
    ///
    /// The cursor is closed before this returns, whatever the outcome.
    pub fn run_round(
        &mut self,
        mut examples: Cursor<'_>,
        monitor: &DeviceStatusMonitor,
        plugin: &dyn ComputationPlugin,
        settings: &SchedulerSettings,
        work_dir: &Path,
    ) -> RoundOutcome {
        let population = self.config.population_name();
        let request = PlanRequest {
            base_dir: work_dir,
            service_uri: &settings.service_uri,
            api_key: &settings.api_key,
            population_name: &population,
            retry_token: &self.config.retry_token,
        };

        let mut env = RoundEnvironment::new(&mut examples, monitor);
        let result = match plugin.run_plan(&mut env, &request) {
            Ok(result) => result,
            Err(e) => {
                warn!(client = %self.config.name, error = %e, "plugin call failed");
                PlanResult::failed()
            }
        };
        let served = env.served;
        let events = env.events;
        drop(env);

        let outcome = RoundOutcome {
            status: result.status,
            examples_served: served,
            last_example_id: examples.last_returned_id(),
            events_published: events,
        };
        examples.close();

        self.apply_result(result);
        info!(
            client = %self.config.name,
            status = %outcome.status,
            examples = outcome.examples_served,
            next_retry_secs = self.next_retry_delay.as_secs(),
            "round finished"
        );
        outcome
    }

    /// Fold a plugin result into the retry state.
    pub(crate) fn apply_result(&mut self, result: PlanResult) {
        if result.status.carries_retry_hint() {
            self.config.retry_token = result.retry_token;
            self.next_retry_delay = self.policy.clamp(result.delay);
        } else {
            self.next_retry_delay = self.policy.default_window;
        }
    }
}

/// [`TaskEnvironment`] backed by one cursor and the admission monitor.
struct RoundEnvironment<'c, 'a> {
    cursor: &'c mut Cursor<'a>,
    monitor: &'c DeviceStatusMonitor,
    served: usize,
    events: usize,
}

impl<'c, 'a> RoundEnvironment<'c, 'a> {
    fn new(cursor: &'c mut Cursor<'a>, monitor: &'c DeviceStatusMonitor) -> Self {
        Self {
            cursor,
            monitor,
            served: 0,
            events: 0,
        }
    }
}

impl TaskEnvironment for RoundEnvironment<'_, '_> {
    fn next_example(&mut self) -> Result<Option<Vec<u8>>, ExampleSourceError> {
        match self.cursor.next() {
            Ok(example) => {
                self.served += 1;
                Ok(Some(example.payload))
            }
            Err(CursorError::Exhausted) => Ok(None),
            Err(CursorError::Corrupt(reason)) => Err(ExampleSourceError(reason)),
        }
    }

    fn conditions_satisfied(&mut self) -> bool {
        self.monitor.satisfied_to_continue()
    }

    fn publish_event(&mut self, event: &[u8]) {
        self.events += 1;
        debug!(client = %self.cursor.client_name(), bytes = event.len(), "plugin event");
    }
}
