use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fedrun_conditions::{DeviceStatusMonitor, TrainingCondition};
use fedrun_core::ClientConfig;
use fedrun_plugin::{
    ComputationPlugin, PlanRequest, PlanResult, PlanStatus, PluginError, PluginSlot,
    TaskEnvironment,
};
use fedrun_scheduler::{RetryPolicy, Scheduler, SchedulerEngine, SchedulerSettings};
use fedrun_store::{NamespaceProvider, StorageManager};
use tempfile::TempDir;
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FixedNamespace(&'static str);

impl NamespaceProvider for FixedNamespace {
    fn current_namespace(&self) -> String {
        self.0.to_string()
    }
}

/// Condition flipped by the test.
struct Switch {
    on: AtomicBool,
}

impl Switch {
    fn new(on: bool) -> Arc<Self> {
        Arc::new(Self {
            on: AtomicBool::new(on),
        })
    }
}

impl TrainingCondition for Switch {
    fn name(&self) -> &'static str {
        "switch"
    }
    fn satisfied_to_start(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
    fn satisfied_to_continue(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct Call {
    population: String,
    retry_token: String,
    base_dir: PathBuf,
    payloads: Vec<Vec<u8>>,
    continue_ok: bool,
}

/// Plugin that drains every example and answers from a script.
#[derive(Default)]
struct ScriptedPlugin {
    results: Mutex<VecDeque<PlanResult>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedPlugin {
    fn with(results: Vec<PlanResult>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl ComputationPlugin for ScriptedPlugin {
    fn run_plan(
        &self,
        env: &mut dyn TaskEnvironment,
        request: &PlanRequest<'_>,
    ) -> Result<PlanResult, PluginError> {
        let mut payloads = Vec::new();
        while let Ok(Some(payload)) = env.next_example() {
            payloads.push(payload);
        }
        let continue_ok = env.conditions_satisfied();
        env.publish_event(b"done");
        self.calls.lock().unwrap().push(Call {
            population: request.population_name.to_string(),
            retry_token: request.retry_token.to_string(),
            base_dir: request.base_dir.to_path_buf(),
            payloads,
            continue_ok,
        });
        Ok(self
            .results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(PlanResult::failed))
    }
}

fn contributed(token: &str, delay_secs: u64) -> PlanResult {
    PlanResult {
        status: PlanStatus::Contributed,
        retry_token: token.into(),
        delay: Duration::from_secs(delay_secs),
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    _dir: TempDir,
    work_root: PathBuf,
    scheduler: Scheduler,
    gate: Arc<Switch>,
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        default_window: Duration::from_secs(1800),
        min_floor: Duration::from_secs(60),
    }
}

fn harness(clients: &[ClientConfig], plugin: PluginSlot, gate_on: bool) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut storage = StorageManager::new(
        dir.path().join("store"),
        "examples.db",
        Duration::from_secs(30 * 24 * 3600),
        clients.iter().map(|c| c.name.clone()).collect(),
        Arc::new(FixedNamespace("alice")),
    );
    storage.on_session_started();
    assert!(storage.is_open());

    let gate = Switch::new(gate_on);
    let conditions: Vec<Arc<dyn TrainingCondition>> = vec![gate.clone()];
    let monitor = Arc::new(DeviceStatusMonitor::new(conditions));
    let work_root = dir.path().join("work");
    let settings = SchedulerSettings {
        retry: policy(),
        service_uri: "https://fl.example.test".into(),
        api_key: "key".into(),
        work_root: work_root.clone(),
    };
    Harness {
        _dir: dir,
        work_root,
        scheduler: Scheduler::new(monitor, storage, plugin, settings),
        gate,
    }
}

fn client(name: &str) -> ClientConfig {
    let mut config = ClientConfig::new(name);
    config.example_window = Duration::from_secs(3600);
    config
}

fn ingest(h: &Harness, client: &str, n: usize) {
    for i in 0..n {
        assert!(h
            .scheduler
            .storage()
            .ingest(client, format!("{client}-{i}").as_bytes()));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn schedule_is_idempotent() {
    let plugin = ScriptedPlugin::with(vec![]);
    let mut h = harness(&[client("c1")], PluginSlot::ready(plugin), true);
    h.scheduler.schedule(vec![client("c1")]);
    h.scheduler.schedule(vec![client("c1"), client("c2")]);
    assert!(h.scheduler.is_started());
    assert_eq!(h.scheduler.sessions().len(), 1);
    assert_eq!(h.scheduler.pending_attempts(), 1);
}

#[tokio::test]
async fn plugin_load_failure_schedules_nothing() {
    let mut h = harness(
        &[client("c1")],
        PluginSlot::from_path("/nonexistent/libplan.so"),
        true,
    );
    h.scheduler.schedule(vec![client("c1")]);
    assert!(h.scheduler.is_started());
    assert_eq!(h.scheduler.pending_attempts(), 0);
    assert!(h.scheduler.sessions().is_empty());
}

#[tokio::test]
async fn closed_gate_defers_without_touching_the_plugin() {
    let plugin = ScriptedPlugin::with(vec![contributed("t", 600)]);
    let mut h = harness(&[client("c1")], PluginSlot::ready(plugin.clone()), false);
    ingest(&h, "c1", 5);
    h.scheduler.schedule(vec![client("c1")]);

    assert!(h.scheduler.attempt(0).is_none());
    assert!(plugin.calls().is_empty());
    assert_eq!(h.scheduler.sessions()[0].next_retry_delay(), Duration::from_secs(1800));
    assert_eq!(h.scheduler.pending_attempts(), 1);

    let stats = h.scheduler.stats().snapshot();
    assert_eq!(stats.attempts, 1);
    assert_eq!(stats.gate_denied, 1);
    assert_eq!(stats.rounds, 0);
}

#[tokio::test]
async fn too_few_examples_defers_the_round() {
    let plugin = ScriptedPlugin::with(vec![contributed("t", 600)]);
    let mut config = client("c1");
    config.min_example_count = 5;
    let mut h = harness(&[config.clone()], PluginSlot::ready(plugin.clone()), true);
    ingest(&h, "c1", 2);
    h.scheduler.schedule(vec![config]);

    assert!(h.scheduler.attempt(0).is_none());
    assert!(plugin.calls().is_empty());
    assert_eq!(h.scheduler.stats().snapshot().data_denied, 1);
    assert_eq!(h.scheduler.pending_attempts(), 1);
}

#[tokio::test]
async fn closed_store_defers_the_round() {
    let plugin = ScriptedPlugin::with(vec![]);
    let mut h = harness(&[client("c1")], PluginSlot::ready(plugin.clone()), true);
    ingest(&h, "c1", 3);
    h.scheduler.storage_mut().on_session_stopped();
    h.scheduler.schedule(vec![client("c1")]);

    assert!(h.scheduler.attempt(0).is_none());
    assert!(plugin.calls().is_empty());
}

#[tokio::test]
async fn contributed_round_updates_token_and_floors_delay() {
    let plugin = ScriptedPlugin::with(vec![contributed("tok-1", 5), contributed("tok-2", 7200)]);
    let mut config = client("c1");
    config.launch_stage = "beta".into();
    let mut h = harness(&[config.clone()], PluginSlot::ready(plugin.clone()), true);
    ingest(&h, "c1", 3);
    h.scheduler.schedule(vec![config]);

    let outcome = h.scheduler.attempt(0).expect("round should run");
    assert_eq!(outcome.status, PlanStatus::Contributed);
    assert_eq!(outcome.examples_served, 3);
    assert_eq!(outcome.events_published, 1);
    assert_eq!(h.scheduler.sessions()[0].retry_token(), "tok-1");
    assert_eq!(h.scheduler.sessions()[0].next_retry_delay(), Duration::from_secs(60));

    h.scheduler.attempt(0).expect("second round should run");
    assert_eq!(h.scheduler.sessions()[0].next_retry_delay(), Duration::from_secs(7200));

    let calls = plugin.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].population, "c1/beta");
    assert_eq!(calls[0].retry_token, "");
    assert_eq!(calls[1].retry_token, "tok-1");
    assert_eq!(
        calls[0].payloads,
        vec![b"c1-0".to_vec(), b"c1-1".to_vec(), b"c1-2".to_vec()]
    );
    assert!(calls[0].continue_ok);
    assert_eq!(calls[0].base_dir, h.work_root.join("c1"));
    assert!(h.work_root.join("c1").is_dir());
    assert_eq!(h.scheduler.pending_attempts(), 1);
}

#[tokio::test]
async fn failed_round_uses_default_window() {
    let plugin = ScriptedPlugin::with(vec![PlanResult {
        status: PlanStatus::Failed,
        retry_token: "ignored".into(),
        delay: Duration::from_secs(1),
    }]);
    let mut h = harness(&[client("c1")], PluginSlot::ready(plugin.clone()), true);
    ingest(&h, "c1", 1);
    h.scheduler.schedule(vec![client("c1")]);

    let outcome = h.scheduler.attempt(0).unwrap();
    assert_eq!(outcome.status, PlanStatus::Failed);
    assert_eq!(h.scheduler.sessions()[0].next_retry_delay(), Duration::from_secs(1800));
    assert_eq!(h.scheduler.sessions()[0].retry_token(), "");
}

#[tokio::test]
async fn contribution_consumes_examples_when_enabled() {
    let plugin = ScriptedPlugin::with(vec![contributed("t", 600), contributed("t", 600)]);
    let mut consuming = client("c1");
    consuming.delete_after_contribution = true;
    let keeping = client("c2");
    let mut h = harness(
        &[consuming.clone(), keeping.clone()],
        PluginSlot::ready(plugin.clone()),
        true,
    );
    ingest(&h, "c1", 4);
    ingest(&h, "c2", 4);
    h.scheduler.schedule(vec![consuming, keeping]);

    h.scheduler.attempt(0).unwrap();
    h.scheduler.attempt(1).unwrap();

    let store = h.scheduler.storage().store().unwrap();
    let epoch = chrono::DateTime::from_timestamp(0, 0).unwrap();
    let now = chrono::Utc::now();
    assert_eq!(store.count_in_range("c1", epoch, now).unwrap(), 0);
    assert_eq!(store.count_in_range("c2", epoch, now).unwrap(), 4);
}

#[tokio::test]
async fn cursor_is_released_after_each_round() {
    let plugin = ScriptedPlugin::with(vec![contributed("a", 600), contributed("b", 600)]);
    let mut h = harness(
        &[client("c1"), client("c2")],
        PluginSlot::ready(plugin.clone()),
        true,
    );
    ingest(&h, "c1", 2);
    ingest(&h, "c2", 2);
    h.scheduler.schedule(vec![client("c1"), client("c2")]);

    assert!(h.scheduler.attempt(0).is_some());
    assert!(h.scheduler.attempt(1).is_some());
    assert_eq!(plugin.calls().len(), 2);
}

#[tokio::test]
async fn reopening_the_gate_lets_the_next_attempt_run() {
    let plugin = ScriptedPlugin::with(vec![contributed("t", 600)]);
    let mut h = harness(&[client("c1")], PluginSlot::ready(plugin.clone()), false);
    ingest(&h, "c1", 1);
    h.scheduler.schedule(vec![client("c1")]);

    assert!(h.scheduler.attempt(0).is_none());
    h.gate.on.store(true, Ordering::SeqCst);
    assert!(h.scheduler.attempt(0).is_some());
    assert_eq!(plugin.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn engine_runs_rounds_on_the_timer() {
    let plugin = ScriptedPlugin::with(vec![contributed("t1", 5), contributed("t2", 5)]);
    let mut config = client("c1");
    config.table_name = "c1_events".into();
    let h = harness(&[config.clone()], PluginSlot::ready(plugin.clone()), true);
    let Harness {
        _dir: dir,
        scheduler,
        ..
    } = h;

    let (engine, handle) = SchedulerEngine::new(scheduler, vec![config]);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(engine.run(shutdown_rx));

    handle.ingest("c1_events", b"one".to_vec()).await.unwrap();
    handle.ingest("c1_events", b"two".to_vec()).await.unwrap();
    handle.ingest("unknown_table", b"dropped".to_vec()).await.unwrap();

    // First attempt fires after the default window.
    tokio::time::sleep(Duration::from_secs(1799)).await;
    assert!(plugin.calls().is_empty());
    tokio::time::sleep(Duration::from_secs(2)).await;
    let calls = plugin.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].payloads, vec![b"one".to_vec(), b"two".to_vec()]);

    // Server asked for 5s; the floor makes it 60s.
    tokio::time::sleep(Duration::from_secs(57)).await;
    assert_eq!(plugin.calls().len(), 1);
    tokio::time::sleep(Duration::from_secs(3)).await;
    let calls = plugin.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].retry_token, "t1");

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
    drop(dir);
}
