//! Admin API types
//!
//! Every error body is `{"error": "<original message>"}` with a status
//! mapped from the underlying failure; success bodies are plain camelCase
//! JSON documents.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::cache::CacheError;
use crate::chain::ChainError;
use crate::queue::QueueError;
use crate::rebalance::RebalanceError;
use crate::store::StoreError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug)]
pub enum AdminError {
    Unauthorized(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Store(StoreError),
    Queue(QueueError),
    Cache(CacheError),
    Chain(ChainError),
    Rebalance(RebalanceError),
}

impl AdminError {
    fn status(&self) -> StatusCode {
        match self {
            AdminError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AdminError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
            AdminError::Conflict(_) => StatusCode::CONFLICT,
            AdminError::Store(StoreError::DuplicateEarmark(_)) => StatusCode::CONFLICT,
            AdminError::Store(StoreError::EarmarkNotFound(_))
            | AdminError::Store(StoreError::OperationNotFound(_)) => StatusCode::NOT_FOUND,
            AdminError::Rebalance(RebalanceError::SlippageRejected { .. })
            | AdminError::Rebalance(RebalanceError::BelowBridgeMinimum { .. })
            | AdminError::Rebalance(RebalanceError::NoRoute { .. })
            | AdminError::Rebalance(RebalanceError::UnknownAsset { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            AdminError::Unauthorized(m)
            | AdminError::BadRequest(m)
            | AdminError::NotFound(m)
            | AdminError::Conflict(m) => m.clone(),
            AdminError::Store(e) => e.to_string(),
            AdminError::Queue(e) => e.to_string(),
            AdminError::Cache(e) => e.to_string(),
            AdminError::Chain(e) => e.to_string(),
            AdminError::Rebalance(e) => e.to_string(),
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<StoreError> for AdminError {
    fn from(e: StoreError) -> Self {
        AdminError::Store(e)
    }
}

impl From<QueueError> for AdminError {
    fn from(e: QueueError) -> Self {
        AdminError::Queue(e)
    }
}

impl From<CacheError> for AdminError {
    fn from(e: CacheError) -> Self {
        AdminError::Cache(e)
    }
}

impl From<ChainError> for AdminError {
    fn from(e: ChainError) -> Self {
        AdminError::Chain(e)
    }
}

impl From<RebalanceError> for AdminError {
    fn from(e: RebalanceError) -> Self {
        AdminError::Rebalance(e)
    }
}
