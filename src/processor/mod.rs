//! Event Processor
//!
//! A pool of K workers drains the event queue and dispatches each event to
//! its handler. Results drive the queue protocol: success acknowledges,
//! invalid marks and acknowledges, failure re-enqueues with backoff or moves
//! the event to the dead letter queue once its retry budget is spent.

pub mod invoice;
pub mod settlement;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cache::PurchaseCache;
use crate::chain::ChainService;
use crate::config::AppConfig;
use crate::hub::HubClient;
use crate::queue::{EventQueue, EventType, QueuedEvent, now_ms};
use crate::store::EarmarkStore;

/// Exponential backoff base and cap for failed events without an explicit
/// retry-after.
const BACKOFF_BASE: Duration = Duration::from_secs(5);
const BACKOFF_CAP: Duration = Duration::from_secs(600);

const DEQUEUE_BATCH: usize = 10;
const IDLE_SLEEP: Duration = Duration::from_millis(500);
const PAUSED_SLEEP: Duration = Duration::from_secs(1);

/// Handler verdict for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Success,
    /// Permanent validation failure; never retried.
    Invalid(String),
    /// Transient failure; retried after the given delay (or exponential
    /// backoff when None).
    Failure {
        error: String,
        retry_after: Option<Duration>,
    },
}

impl HandlerOutcome {
    pub fn failure(error: impl Into<String>, retry_after: Duration) -> Self {
        HandlerOutcome::Failure {
            error: error.into(),
            retry_after: Some(retry_after),
        }
    }

    pub fn failure_backoff(error: impl Into<String>) -> Self {
        HandlerOutcome::Failure {
            error: error.into(),
            retry_after: None,
        }
    }
}

/// Everything the handlers need. Shared verbatim across workers; all mutable
/// state lives behind the stores' atomic operations.
pub struct EventHandler {
    pub(crate) config: Arc<AppConfig>,
    pub(crate) queue: Arc<EventQueue>,
    pub(crate) cache: Arc<PurchaseCache>,
    pub(crate) earmarks: Arc<EarmarkStore>,
    pub(crate) chain: Arc<dyn ChainService>,
    pub(crate) hub: Arc<dyn HubClient>,
}

impl EventHandler {
    pub fn new(
        config: Arc<AppConfig>,
        queue: Arc<EventQueue>,
        cache: Arc<PurchaseCache>,
        earmarks: Arc<EarmarkStore>,
        chain: Arc<dyn ChainService>,
        hub: Arc<dyn HubClient>,
    ) -> Self {
        Self {
            config,
            queue,
            cache,
            earmarks,
            chain,
            hub,
        }
    }

    pub async fn handle(&self, event: &QueuedEvent) -> HandlerOutcome {
        match event.event_type {
            EventType::InvoiceEnqueued => self.process_invoice_enqueued(event).await,
            EventType::SettlementEnqueued => self.process_settlement_enqueued(event).await,
        }
    }
}

/// Consumer pool over the event queue.
pub struct ConsumerPool {
    handler: Arc<EventHandler>,
    queue: Arc<EventQueue>,
    workers: usize,
}

impl ConsumerPool {
    pub fn new(handler: Arc<EventHandler>, queue: Arc<EventQueue>, workers: usize) -> Self {
        Self {
            handler,
            queue,
            workers: workers.max(1),
        }
    }

    /// Spawn the workers; returns their join handles.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        info!(workers = self.workers, "Starting consumer pool");
        (0..self.workers)
            .map(|worker_id| {
                let handler = self.handler.clone();
                let queue = self.queue.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, handler, queue, shutdown).await;
                })
            })
            .collect()
    }
}

async fn worker_loop(
    worker_id: usize,
    handler: Arc<EventHandler>,
    queue: Arc<EventQueue>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id, "Consumer worker started");
    loop {
        if *shutdown.borrow() {
            debug!(worker_id, "Consumer worker shutting down");
            return;
        }

        match run_worker_pass(&handler, &queue).await {
            Ok(handled) if handled > 0 => continue,
            Ok(_) => {
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_SLEEP) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                error!(worker_id, error = %e, "Worker pass failed");
                tokio::select! {
                    _ = tokio::time::sleep(PAUSED_SLEEP) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
}

/// One dequeue-handle-settle pass. Returns how many events were handled.
async fn run_worker_pass(
    handler: &EventHandler,
    queue: &EventQueue,
) -> Result<usize, crate::queue::QueueError> {
    if queue.is_paused().await? {
        tokio::time::sleep(PAUSED_SLEEP).await;
        return Ok(0);
    }

    let mut batch = Vec::new();
    for event_type in EventType::ALL {
        batch.extend(queue.dequeue(event_type, DEQUEUE_BATCH).await?);
    }
    // Priority advises the pool: HIGH events in the batch are served first.
    batch.sort_by_key(|e| e.priority);

    let handled = batch.len();
    for event in batch {
        let outcome = handler.handle(&event).await;
        settle_event(queue, &event, outcome).await?;
    }
    Ok(handled)
}

/// Apply a handler outcome to the queue.
pub async fn settle_event(
    queue: &EventQueue,
    event: &QueuedEvent,
    outcome: HandlerOutcome,
) -> Result<(), crate::queue::QueueError> {
    match outcome {
        HandlerOutcome::Success => {
            debug!(event_id = %event.id, event_type = %event.event_type, "Event handled");
            queue.acknowledge(event).await
        }
        HandlerOutcome::Invalid(reason) => {
            info!(
                event_id = %event.id,
                reason = %reason,
                metric = "invalid_invoice",
                "Invoice permanently invalid"
            );
            queue.add_invalid_invoice(&event.id).await?;
            queue.acknowledge(event).await
        }
        HandlerOutcome::Failure { error, retry_after } => {
            let mut retry = event.clone();
            // Infinite-retry events never count attempts.
            if !retry.retries_forever() {
                retry.retry_count += 1;
            }

            if retry.retries_exhausted() {
                return queue.move_to_dead_letter(event, &error).await;
            }

            let delay = retry_after.unwrap_or_else(|| backoff_delay(retry.retry_count));
            retry.scheduled_at = now_ms() + delay.as_millis() as u64;
            warn!(
                event_id = %event.id,
                error = %error,
                retry_count = retry.retry_count,
                retry_in_ms = delay.as_millis() as u64,
                "Event failed, re-enqueued"
            );
            queue.enqueue(&retry, true).await.map(|_| ())
        }
    }
}

fn backoff_delay(retry_count: u32) -> Duration {
    let exp = retry_count.min(16);
    (BACKOFF_BASE * 2u32.saturating_pow(exp)).min(BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_secs(5));
        assert_eq!(backoff_delay(1), Duration::from_secs(10));
        assert_eq!(backoff_delay(3), Duration::from_secs(40));
        assert_eq!(backoff_delay(10), BACKOFF_CAP);
        assert_eq!(backoff_delay(u32::MAX), BACKOFF_CAP);
    }

    #[tokio::test]
    async fn test_settle_failure_requeues_with_backoff() {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let Ok(client) = redis::Client::open(url) else {
            eprintln!("Skipping test - redis not available");
            return;
        };
        let Ok(conn) = client.get_multiplexed_async_connection().await else {
            eprintln!("Skipping test - redis not available");
            return;
        };
        let queue = EventQueue::with_prefix(conn, format!("marktest:{}", uuid::Uuid::new_v4()));

        let event = QueuedEvent::minimal_invoice("0xretry", 1);
        queue.enqueue(&event, false).await.unwrap();
        let dequeued = queue.dequeue(EventType::InvoiceEnqueued, 1).await.unwrap();

        settle_event(
            &queue,
            &dequeued[0],
            HandlerOutcome::failure("hub down", Duration::from_secs(60)),
        )
        .await
        .unwrap();

        // back in pending, scheduled in the future
        assert!(queue.has_event(EventType::InvoiceEnqueued, "0xretry").await.unwrap());
        let next = queue
            .peek_next_scheduled(EventType::InvoiceEnqueued)
            .await
            .unwrap()
            .unwrap();
        assert!(next > now_ms() + 30_000);
        // infinite retries: count untouched
        assert!(
            queue
                .dequeue(EventType::InvoiceEnqueued, 1)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_settle_exhausted_goes_to_dead_letter() {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let Ok(client) = redis::Client::open(url) else {
            eprintln!("Skipping test - redis not available");
            return;
        };
        let Ok(conn) = client.get_multiplexed_async_connection().await else {
            eprintln!("Skipping test - redis not available");
            return;
        };
        let queue = EventQueue::with_prefix(conn, format!("marktest:{}", uuid::Uuid::new_v4()));

        let mut event = QueuedEvent::minimal_invoice("0xdoomed", 1);
        event.max_retries = 0;
        queue.enqueue(&event, false).await.unwrap();
        let dequeued = queue.dequeue(EventType::InvoiceEnqueued, 1).await.unwrap();

        settle_event(
            &queue,
            &dequeued[0],
            HandlerOutcome::failure_backoff("permanent-ish"),
        )
        .await
        .unwrap();

        let depths = queue.queue_depths().await.unwrap();
        assert_eq!(depths.dead_letter, 1);
        assert_eq!(depths.invoice_pending, 0);
    }
}
