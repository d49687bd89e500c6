//! Example ingestion: POST /ingest/{table}.
//!
//! The raw request body is the example payload. Producers never learn whether
//! an example was kept: unknown tables and a closed store both drop it.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::app::AppState;

pub async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    body: Bytes,
) -> StatusCode {
    debug!(table = %table, bytes = body.len(), "example received");
    if let Err(e) = state.engine.ingest(table, body.to_vec()).await {
        warn!(error = %e, "example dropped");
    }
    StatusCode::ACCEPTED
}
