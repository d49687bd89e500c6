//! Device-health feeds. Each handler updates one condition's cached signal
//! and answers with that condition's current verdict.

use axum::{extract::State, Json};
use fedrun_conditions::{
    ChargeState, ConditionError, NetworkProbe, PressureSource, TrainingCondition,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct BatteryStatus {
    pub percent: f64,
    pub state: ChargeState,
}

#[derive(Debug, Deserialize)]
pub struct BatterySaver {
    /// `None` reports a failed initial query.
    pub enabled: Option<bool>,
}

/// Default-path change notification, carrying the metered property read
/// from the new path. A missing value means the query failed.
#[derive(Debug, Deserialize)]
pub struct NetworkPath {
    pub metered: Option<bool>,
}

impl NetworkProbe for NetworkPath {
    fn default_path_metered(&self) -> Result<bool, ConditionError> {
        self.metered
            .ok_or_else(|| ConditionError::QueryFailed("metered property missing".into()))
    }
}

#[derive(Debug, Deserialize)]
pub struct MemoryPressure {
    pub source: PressureSource,
    pub level: u8,
}

fn verdict(condition: &dyn TrainingCondition) -> Json<Value> {
    Json(json!({
        "condition": condition.name(),
        "satisfied_to_start": condition.satisfied_to_start(),
        "satisfied_to_continue": condition.satisfied_to_continue(),
    }))
}

/// POST /signals/power
pub async fn power(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatteryStatus>,
) -> Json<Value> {
    let power = &state.conditions.power;
    power.on_battery_status(body.percent, body.state);
    verdict(power.as_ref())
}

/// POST /signals/battery-saver
pub async fn battery_saver(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatterySaver>,
) -> Json<Value> {
    let power = &state.conditions.power;
    power.on_saver_service_available(body.enabled);
    verdict(power.as_ref())
}

/// POST /signals/network
pub async fn network(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NetworkPath>,
) -> Json<Value> {
    let network = &state.conditions.network;
    network.on_default_path_changed(&body);
    verdict(network.as_ref())
}

/// POST /signals/memory
pub async fn memory(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MemoryPressure>,
) -> Json<Value> {
    let memory = &state.conditions.memory;
    memory.on_pressure(body.source, body.level);
    verdict(memory.as_ref())
}
