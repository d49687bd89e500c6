use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use fedrun_conditions::{
    DeviceStatusMonitor, MemoryPressureCondition, NetworkCondition, PowerCondition,
    TrainingCondition,
};
use fedrun_core::FedrunConfig;
use fedrun_scheduler::{EngineHandle, SchedulerStats};

use crate::namespace::SessionNamespace;

/// The three device-health signal caches, written by the signal endpoints.
pub struct Conditions {
    pub power: Arc<PowerCondition>,
    pub network: Arc<NetworkCondition>,
    pub memory: Arc<MemoryPressureCondition>,
}

impl Conditions {
    pub fn new() -> Self {
        Self {
            power: Arc::new(PowerCondition::new()),
            network: Arc::new(NetworkCondition::new()),
            memory: Arc::new(MemoryPressureCondition::new()),
        }
    }

    /// Monitor over all three, evaluated power first.
    pub fn monitor(&self) -> DeviceStatusMonitor {
        let conditions: Vec<Arc<dyn TrainingCondition>> = vec![
            self.power.clone(),
            self.network.clone(),
            self.memory.clone(),
        ];
        DeviceStatusMonitor::new(conditions)
    }
}

impl Default for Conditions {
    fn default() -> Self {
        Self::new()
    }
}

/// Central shared state: passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: FedrunConfig,
    pub conditions: Conditions,
    pub monitor: Arc<DeviceStatusMonitor>,
    pub namespace: Arc<SessionNamespace>,
    pub engine: EngineHandle,
    pub scheduler_stats: Arc<SchedulerStats>,
}

impl AppState {
    pub fn new(
        config: FedrunConfig,
        conditions: Conditions,
        monitor: Arc<DeviceStatusMonitor>,
        namespace: Arc<SessionNamespace>,
        engine: EngineHandle,
        scheduler_stats: Arc<SchedulerStats>,
    ) -> Self {
        Self {
            config,
            conditions,
            monitor,
            namespace,
            engine,
            scheduler_stats,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ingest/{table}", post(crate::http::ingest::ingest_handler))
        .route(
            "/session/started",
            post(crate::http::session::session_started),
        )
        .route(
            "/session/stopped",
            post(crate::http::session::session_stopped),
        )
        .route("/signals/power", post(crate::http::signals::power))
        .route(
            "/signals/battery-saver",
            post(crate::http::signals::battery_saver),
        )
        .route("/signals/network", post(crate::http::signals::network))
        .route("/signals/memory", post(crate::http::signals::memory))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
