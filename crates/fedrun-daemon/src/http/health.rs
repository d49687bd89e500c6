use axum::{extract::State, Json};
use fedrun_conditions::TrainingCondition;
use fedrun_store::NamespaceProvider;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe plus the current device and scheduler view.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let c = &state.conditions;
    let ready_to_start = c.power.satisfied_to_start()
        && c.network.satisfied_to_start()
        && c.memory.satisfied_to_start();
    let battery = c.power.battery().map(|(percent, charge)| {
        json!({ "percent": percent, "state": charge })
    });

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "namespace": state.namespace.current_namespace(),
        "clients": state.config.clients.len(),
        "device": {
            "ready_to_start": ready_to_start,
            "battery": battery,
            "network_metered": c.network.is_metered(),
            "conditions": state.monitor.condition_names(),
        },
        "admission": state.monitor.snapshot(),
        "scheduler": state.scheduler_stats.snapshot(),
    }))
}
