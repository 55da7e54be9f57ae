//! SettlementEnqueued handler
//!
//! Settlement clears the purchase fingerprint so the invoice can never be
//! double-purchased, and records how long the hub took to clear it. A
//! settlement for an invoice without a cached purchase is a no-op (the
//! fingerprint TTL may already have pruned it).

use tracing::{debug, info};

use super::{EventHandler, HandlerOutcome};
use crate::queue::QueuedEvent;

impl EventHandler {
    pub(super) async fn process_settlement_enqueued(&self, event: &QueuedEvent) -> HandlerOutcome {
        let invoice_id = event.id.as_str();

        let removed = match self.cache.remove(invoice_id).await {
            Ok(removed) => removed,
            Err(e) => return HandlerOutcome::failure_backoff(format!("purchase cache: {e}")),
        };

        match removed {
            Some(record) => {
                info!(
                    invoice_id,
                    clearance_ms = record.age_ms(),
                    metric = "purchase_clearance_duration",
                    "Settlement cleared purchase"
                );
            }
            None => {
                debug!(invoice_id, "Settlement with no cached purchase, nothing to clear");
            }
        }

        if let Err(e) = self.queue.add_settled_invoice(invoice_id).await {
            return HandlerOutcome::failure_backoff(format!("settled marker: {e}"));
        }

        HandlerOutcome::Success
    }
}
