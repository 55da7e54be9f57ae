//! Backfill Poller
//!
//! Reconciles the queue against the hub: invoices the webhook stream missed
//! are enqueued from the paginated hub feed, and purchases whose invoice has
//! vanished from the hub (settled and pruned) produce the settlement events
//! the webhook never delivered.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cache::PurchaseCache;
use crate::hub::{HubClient, HubError};
use crate::queue::{EventQueue, EventType, QueuedEvent, now_ms};

const PAGE_SIZE: usize = 100;

pub struct BackfillPoller {
    hub: Arc<dyn HubClient>,
    queue: Arc<EventQueue>,
    cache: Arc<PurchaseCache>,
    interval: Duration,
}

impl BackfillPoller {
    pub fn new(
        hub: Arc<dyn HubClient>,
        queue: Arc<EventQueue>,
        cache: Arc<PurchaseCache>,
        interval: Duration,
    ) -> Self {
        Self {
            hub,
            queue,
            cache,
            interval,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Starting backfill poller");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Backfill poller shutting down");
                        return;
                    }
                }
            }

            if let Err(e) = self.poll_once().await {
                error!(error = %e, "Backfill pass failed");
            }
        }
    }

    /// One reconciliation pass. Public so the admin trigger endpoint and
    /// tests can drive it directly.
    pub async fn poll_once(&self) -> Result<usize, anyhow::Error> {
        let mut enqueued = self.backfill_invoices().await?;
        enqueued += self.backfill_settlements().await?;
        Ok(enqueued)
    }

    async fn backfill_invoices(&self) -> Result<usize, anyhow::Error> {
        let cursor = self.queue.backfill_cursor().await?;
        let page = self
            .hub
            .fetch_invoices_by_tx_nonce(cursor.as_deref(), PAGE_SIZE)
            .await?;

        let mut enqueued = 0usize;
        for invoice in &page.invoices {
            if self
                .queue
                .has_event(EventType::InvoiceEnqueued, &invoice.id)
                .await?
            {
                continue;
            }
            if self.queue.is_invalid_invoice(&invoice.id).await?
                || self.queue.is_settled_invoice(&invoice.id).await?
            {
                continue;
            }

            let event = QueuedEvent::minimal_invoice(invoice.id.clone(), now_ms());
            self.queue.enqueue(&event, false).await?;
            debug!(invoice_id = %invoice.id, "Backfilled invoice event");
            enqueued += 1;
        }

        if let Some(next_cursor) = &page.next_cursor {
            self.queue.set_backfill_cursor(next_cursor).await?;
        }

        if enqueued > 0 {
            info!(count = enqueued, "Backfilled missed invoices");
        }
        Ok(enqueued)
    }

    /// A purchase whose invoice 404s on the hub has been settled and pruned;
    /// synthesise the settlement event the webhook never delivered.
    async fn backfill_settlements(&self) -> Result<usize, anyhow::Error> {
        let purchases = self.cache.all().await?;

        let mut enqueued = 0usize;
        for purchase in purchases {
            match self.hub.fetch_invoice(&purchase.invoice_id).await {
                Ok(_) => {}
                Err(HubError::NotFound(_)) => {
                    let event =
                        QueuedEvent::minimal_settlement(purchase.invoice_id.clone(), now_ms());
                    self.queue.enqueue(&event, false).await?;
                    info!(
                        invoice_id = %purchase.invoice_id,
                        "Invoice pruned from hub, settlement backfilled"
                    );
                    enqueued += 1;
                }
                Err(e) => {
                    warn!(
                        invoice_id = %purchase.invoice_id,
                        error = %e,
                        "Settlement backfill check failed"
                    );
                }
            }
        }
        Ok(enqueued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::canonical;
    use crate::cache::PurchaseRecord;
    use crate::hub::Invoice;
    use crate::hub::testing::MockHub;
    use uuid::Uuid;

    async fn redis_pair(prefix: &str) -> Option<(EventQueue, PurchaseCache)> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let client = redis::Client::open(url).ok()?;
        let conn = client.get_multiplexed_async_connection().await.ok()?;
        Some((
            EventQueue::with_prefix(conn.clone(), prefix.to_string()),
            PurchaseCache::with_prefix(conn, prefix.to_string(), 60),
        ))
    }

    fn invoice(id: &str, nonce: u64) -> Invoice {
        Invoice {
            id: id.to_string(),
            ticker_hash: "0xusdc".into(),
            amount: canonical(10),
            destinations: vec![10],
            origin: None,
            owner: "0xowner".into(),
            hub_invoice_enqueued_timestamp: 1_700_000_000,
            tx_nonce: nonce,
        }
    }

    #[tokio::test]
    async fn test_backfill_enqueues_missing_and_persists_cursor() {
        let prefix = format!("marktest:{}", Uuid::new_v4());
        let Some((queue, cache)) = redis_pair(&prefix).await else {
            eprintln!("Skipping test - redis not available");
            return;
        };

        let hub = Arc::new(MockHub::new());
        hub.insert_invoice(invoice("0xa", 1));
        hub.insert_invoice(invoice("0xb", 2));
        // already known to the queue
        queue
            .enqueue(&QueuedEvent::minimal_invoice("0xa", 1), false)
            .await
            .unwrap();
        // marked invalid earlier
        hub.insert_invoice(invoice("0xc", 3));
        queue.add_invalid_invoice("0xc").await.unwrap();

        let poller = BackfillPoller::new(
            hub,
            Arc::new(queue),
            Arc::new(cache),
            Duration::from_secs(60),
        );

        let enqueued = poller.poll_once().await.unwrap();
        assert_eq!(enqueued, 1);
        assert_eq!(
            poller.queue.backfill_cursor().await.unwrap().as_deref(),
            Some("3")
        );
        assert!(
            poller
                .queue
                .has_event(EventType::InvoiceEnqueued, "0xb")
                .await
                .unwrap()
        );
        assert!(
            !poller
                .queue
                .has_event(EventType::InvoiceEnqueued, "0xc")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_pruned_purchase_backfills_settlement() {
        let prefix = format!("marktest:{}", Uuid::new_v4());
        let Some((queue, cache)) = redis_pair(&prefix).await else {
            eprintln!("Skipping test - redis not available");
            return;
        };

        let hub = Arc::new(MockHub::new());
        // live invoice: no settlement
        hub.insert_invoice(invoice("0xlive", 1));
        cache
            .save(&PurchaseRecord {
                invoice_id: "0xlive".into(),
                target: 10,
                intent: serde_json::Value::Null,
                transaction_hash: "0x1".into(),
                cached_at: now_ms(),
            })
            .await
            .unwrap();
        // pruned invoice: settlement expected
        cache
            .save(&PurchaseRecord {
                invoice_id: "0xgone".into(),
                target: 10,
                intent: serde_json::Value::Null,
                transaction_hash: "0x2".into(),
                cached_at: now_ms(),
            })
            .await
            .unwrap();

        let poller = BackfillPoller::new(
            hub,
            Arc::new(queue),
            Arc::new(cache),
            Duration::from_secs(60),
        );

        poller.poll_once().await.unwrap();

        assert!(
            poller
                .queue
                .has_event(EventType::SettlementEnqueued, "0xgone")
                .await
                .unwrap()
        );
        assert!(
            !poller
                .queue
                .has_event(EventType::SettlementEnqueued, "0xlive")
                .await
                .unwrap()
        );
    }
}
