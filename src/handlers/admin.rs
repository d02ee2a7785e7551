//! Administrative endpoints: optimize now, reset the icon cache, record an access.
//!
//! Optimization and clearing touch the filesystem synchronously, so they run on
//! the blocking pool.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::{debug, error, info, instrument};

use crate::state::SharedState;

#[instrument(skip(state))]
pub async fn optimize_handler(State(state): State<SharedState>) -> impl IntoResponse {
    info!("Optimization requested over HTTP");
    let optimizer = state.optimizer.clone();
    match tokio::task::spawn_blocking(move || optimizer.optimize()).await {
        Ok(result) => (StatusCode::OK, Json(serde_json::json!(result))),
        Err(e) => {
            error!("Optimization task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "optimization task failed" })),
            )
        }
    }
}

#[instrument(skip(state))]
pub async fn clear_cache_handler(State(state): State<SharedState>) -> impl IntoResponse {
    info!("Icon cache reset requested over HTTP");
    let optimizer = state.optimizer.clone();
    match tokio::task::spawn_blocking(move || optimizer.clear_icon_cache()).await {
        Ok(result) => (StatusCode::OK, Json(serde_json::json!(result))),
        Err(e) => {
            error!("Cache clear task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "cache clear task failed" })),
            )
        }
    }
}

#[instrument(skip(state))]
pub async fn access_handler(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> StatusCode {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        debug!("Rejected access record for invalid name {:?}", name);
        return StatusCode::BAD_REQUEST;
    }
    state.optimizer.record_icon_access(&name);
    StatusCode::NO_CONTENT
}
