use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use crate::gateway::state::AdminState;
use crate::gateway::types::AdminError;
use crate::store::{Earmark, EarmarkFilter, EarmarkStatus};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarmarkListQuery {
    pub status: Option<String>,
    pub chain_id: Option<u64>,
    pub invoice_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

/// GET /admin/earmarks
pub async fn list_earmarks(
    State(state): State<AdminState>,
    Query(query): Query<EarmarkListQuery>,
) -> Result<Json<Vec<Earmark>>, AdminError> {
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<EarmarkStatus>())
        .transpose()
        .map_err(AdminError::BadRequest)?;

    let earmarks = state
        .earmarks
        .list(&EarmarkFilter {
            status,
            chain_id: query.chain_id,
            invoice_id: query.invoice_id,
            limit: query.limit,
            offset: query.offset,
        })
        .await?;
    Ok(Json(earmarks))
}

/// GET /admin/earmarks/{id}
pub async fn get_earmark(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Earmark>, AdminError> {
    state
        .earmarks
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| AdminError::NotFound(format!("earmark {id} not found")))
}

/// POST /admin/earmarks/{id}/cancel
///
/// Cancels the earmark and orphans its live operations; the engine keeps
/// driving them to completion so bridged funds are not stranded.
pub async fn cancel_earmark(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Earmark>, AdminError> {
    let existing = state
        .earmarks
        .get(id)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("earmark {id} not found")))?;

    if !state.earmarks.cancel(id).await? {
        return Err(AdminError::Conflict(format!(
            "earmark {id} is {} and cannot be cancelled",
            existing.status
        )));
    }

    tracing::info!(earmark_id = %id, invoice_id = %existing.invoice_id, "Earmark cancelled by admin");
    let cancelled = state
        .earmarks
        .get(id)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("earmark {id} not found")))?;
    Ok(Json(cancelled))
}
