//! Manual trigger endpoints
//!
//! Operator escape hatches: run a rebalance tick now, re-enqueue an invoice,
//! push a one-off bridge transfer, or swap assets on a CEX-backed chain.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::adapters::SupportedBridge;
use crate::amount::Amount;
use crate::gateway::state::AdminState;
use crate::gateway::types::AdminError;
use crate::queue::{EnqueueOutcome, EventType, Priority, QueuedEvent, now_ms};
use crate::store::RebalanceOperation;

fn default_slippage() -> u32 {
    300
}

/// POST /admin/trigger/rebalance — run one engine tick inline.
pub async fn trigger_rebalance(
    State(state): State<AdminState>,
) -> Result<Json<serde_json::Value>, AdminError> {
    state.engine.tick().await?;
    Ok(Json(serde_json::json!({ "status": "completed" })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerIntentRequest {
    pub invoice_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerIntentResponse {
    pub invoice_id: String,
    pub queued: bool,
}

/// POST /admin/trigger/intent — enqueue an invoice for processing now.
pub async fn trigger_intent(
    State(state): State<AdminState>,
    Json(request): Json<TriggerIntentRequest>,
) -> Result<(StatusCode, Json<TriggerIntentResponse>), AdminError> {
    let event = QueuedEvent::new(
        request.invoice_id.clone(),
        EventType::InvoiceEnqueued,
        serde_json::Value::Null,
        Priority::High,
        now_ms(),
    );
    let outcome = state.queue.enqueue(&event, true).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerIntentResponse {
            invoice_id: request.invoice_id,
            queued: outcome == EnqueueOutcome::Queued,
        }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSendRequest {
    pub origin: u64,
    pub destination: u64,
    pub ticker_hash: String,
    /// Canonical 18-decimal units, decimal string.
    pub amount: Amount,
    pub bridge: SupportedBridge,
    #[serde(default = "default_slippage")]
    pub slippage_dbps: u32,
}

/// POST /admin/trigger/send — one-off bridge transfer.
pub async fn trigger_send(
    State(state): State<AdminState>,
    Json(request): Json<TriggerSendRequest>,
) -> Result<Json<RebalanceOperation>, AdminError> {
    let operation = state
        .engine
        .manual_transfer(
            request.bridge,
            request.slippage_dbps,
            request.origin,
            request.destination,
            &request.ticker_hash,
            &request.amount,
        )
        .await?;
    Ok(Json(operation))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSwapRequest {
    pub chain_id: u64,
    pub from_ticker_hash: String,
    pub to_ticker_hash: String,
    pub amount: Amount,
    pub bridge: SupportedBridge,
    #[serde(default = "default_slippage")]
    pub slippage_dbps: u32,
}

/// POST /admin/trigger/swap — same-chain asset conversion.
pub async fn trigger_swap(
    State(state): State<AdminState>,
    Json(request): Json<TriggerSwapRequest>,
) -> Result<Json<RebalanceOperation>, AdminError> {
    let operation = state
        .engine
        .manual_swap(
            request.bridge,
            request.slippage_dbps,
            request.chain_id,
            &request.from_ticker_hash,
            &request.to_ticker_hash,
            &request.amount,
        )
        .await?;
    Ok(Json(operation))
}
