//! User-session lifecycle feed.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct SessionStarted {
    /// Storage namespace of the user who logged in.
    pub namespace: String,
}

/// POST /session/started
pub async fn session_started(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SessionStarted>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    info!(namespace = %body.namespace, "session started");
    state.namespace.set(&body.namespace);
    state.engine.session_started().await.map_err(unavailable)?;
    Ok(Json(json!({ "namespace": body.namespace })))
}

/// POST /session/stopped
pub async fn session_stopped(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    info!("session stopped");
    state.namespace.clear();
    state.engine.session_stopped().await.map_err(unavailable)?;
    Ok(Json(json!({ "namespace": "" })))
}

fn unavailable(e: fedrun_scheduler::SchedulerError) -> (StatusCode, Json<Value>) {
    warn!(error = %e, "session event not delivered");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": e.to_string() })),
    )
}
