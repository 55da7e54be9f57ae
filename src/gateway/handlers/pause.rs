//! Pause flag management
//!
//! `rebalance` and `ondemand` live in the operations store; `purchase`
//! lives beside the purchase cache so the event processor reads it without
//! a database round-trip.

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;

use crate::gateway::state::AdminState;
use crate::gateway::types::AdminError;
use crate::store::PauseKey;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseResponse {
    pub key: PauseKey,
    pub paused: bool,
}

/// POST /admin/pause/{flag}
pub async fn pause(
    State(state): State<AdminState>,
    Path(flag): Path<String>,
) -> Result<Json<PauseResponse>, AdminError> {
    set_flag(&state, &flag, true).await
}

/// POST /admin/unpause/{flag}
pub async fn unpause(
    State(state): State<AdminState>,
    Path(flag): Path<String>,
) -> Result<Json<PauseResponse>, AdminError> {
    set_flag(&state, &flag, false).await
}

async fn set_flag(
    state: &AdminState,
    flag: &str,
    paused: bool,
) -> Result<Json<PauseResponse>, AdminError> {
    let key: PauseKey = flag
        .parse()
        .map_err(|e: String| AdminError::BadRequest(e))?;

    match key {
        PauseKey::Purchase => state.cache.set_paused(paused).await?,
        PauseKey::Rebalance | PauseKey::Ondemand => state.pause.set_paused(key, paused).await?,
    }

    tracing::info!(flag = %key, paused, "Pause flag updated");
    Ok(Json(PauseResponse { key, paused }))
}
