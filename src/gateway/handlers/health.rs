use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::gateway::state::AdminState;
use crate::gateway::types::AdminError;
use crate::queue::QueueDepths;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub queue_depths: QueueDepths,
    pub queue_paused: bool,
}

/// GET /health
pub async fn health_check(
    State(state): State<AdminState>,
) -> Result<Json<HealthResponse>, AdminError> {
    let queue_depths = state.queue.queue_depths().await?;
    let queue_paused = state.queue.is_paused().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        queue_depths,
        queue_paused,
    }))
}
