use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use crate::gateway::state::AdminState;
use crate::gateway::types::AdminError;
use crate::store::{OperationFilter, OperationStatus, RebalanceOperation};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationListQuery {
    pub status: Option<String>,
    pub chain_id: Option<u64>,
    pub earmark_id: Option<Uuid>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

/// GET /admin/operations
pub async fn list_operations(
    State(state): State<AdminState>,
    Query(query): Query<OperationListQuery>,
) -> Result<Json<Vec<RebalanceOperation>>, AdminError> {
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<OperationStatus>())
        .transpose()
        .map_err(AdminError::BadRequest)?;

    let operations = state
        .operations
        .list(&OperationFilter {
            status,
            chain_id: query.chain_id,
            earmark_id: query.earmark_id,
            limit: query.limit,
            offset: query.offset,
        })
        .await?;
    Ok(Json(operations))
}

/// GET /admin/operations/{id}
pub async fn get_operation(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RebalanceOperation>, AdminError> {
    state
        .operations
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| AdminError::NotFound(format!("operation {id} not found")))
}

/// POST /admin/operations/{id}/cancel
pub async fn cancel_operation(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RebalanceOperation>, AdminError> {
    let existing = state
        .operations
        .get(id)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("operation {id} not found")))?;

    if !state.operations.cancel(id).await? {
        return Err(AdminError::Conflict(format!(
            "operation {id} is {} and cannot be cancelled",
            existing.status
        )));
    }

    tracing::info!(operation_id = %id, "Operation cancelled by admin");
    let cancelled = state
        .operations
        .get(id)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("operation {id} not found")))?;
    Ok(Json(cancelled))
}
