//! Webhook ingress
//!
//! The hub pushes invoice and settlement notifications here; each becomes a
//! HIGH-priority queue event. Enqueue is idempotent on the invoice id, so
//! webhook redelivery is harmless.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::gateway::state::AdminState;
use crate::gateway::types::AdminError;
use crate::queue::{EnqueueOutcome, EventType, Priority, QueuedEvent, now_ms};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub id: String,
    /// Whatever invoice payload the hub attached; stored with the event.
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub id: String,
    pub queued: bool,
}

/// POST /webhooks/invoice
pub async fn invoice_webhook(
    State(state): State<AdminState>,
    Json(body): Json<WebhookEvent>,
) -> Result<(StatusCode, Json<WebhookResponse>), AdminError> {
    enqueue(&state, EventType::InvoiceEnqueued, body).await
}

/// POST /webhooks/settlement
pub async fn settlement_webhook(
    State(state): State<AdminState>,
    Json(body): Json<WebhookEvent>,
) -> Result<(StatusCode, Json<WebhookResponse>), AdminError> {
    enqueue(&state, EventType::SettlementEnqueued, body).await
}

async fn enqueue(
    state: &AdminState,
    event_type: EventType,
    body: WebhookEvent,
) -> Result<(StatusCode, Json<WebhookResponse>), AdminError> {
    let event = QueuedEvent::new(body.id.clone(), event_type, body.data, Priority::High, now_ms());
    let outcome = state.queue.enqueue(&event, false).await?;

    tracing::debug!(
        event_id = %body.id,
        event_type = %event_type,
        queued = outcome == EnqueueOutcome::Queued,
        "Webhook received"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookResponse {
            id: body.id,
            queued: outcome == EnqueueOutcome::Queued,
        }),
    ))
}
