//! `/stats` endpoint: the governor's unified stats surface as JSON.

use axum::{extract::State, http::StatusCode, Json};
use overlay_resource_governor::GovernorStats;
use tracing::{debug, instrument};

use crate::state::SharedState;

#[instrument(skip(state))]
pub async fn stats_handler(
    State(state): State<SharedState>,
) -> Result<Json<GovernorStats>, StatusCode> {
    debug!("Processing /stats request");
    let stats = state
        .stats()
        .await
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    state.metrics.observe_stats(&stats);
    Ok(Json(stats))
}
