//! Queued event types
//!
//! Events are identified by the invoice id for both event kinds, which is
//! what makes enqueue idempotent: a webhook and the backfill poller racing on
//! the same invoice collapse into one queue entry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    InvoiceEnqueued,
    SettlementEnqueued,
}

impl EventType {
    pub const ALL: [EventType; 2] = [EventType::InvoiceEnqueued, EventType::SettlementEnqueued];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::InvoiceEnqueued => "INVOICE_ENQUEUED",
            EventType::SettlementEnqueued => "SETTLEMENT_ENQUEUED",
        }
    }

    /// Key-safe lowercase segment for the per-type keyspaces.
    pub fn key_segment(&self) -> &'static str {
        match self {
            EventType::InvoiceEnqueued => "invoice",
            EventType::SettlementEnqueued => "settlement",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INVOICE_ENQUEUED" => Ok(EventType::InvoiceEnqueued),
            "SETTLEMENT_ENQUEUED" => Ok(EventType::SettlementEnqueued),
            _ => Err(format!("Unknown event type: {s}")),
        }
    }
}

/// Advisory to the consumer pool; queue order within a type stays FIFO by
/// scheduled_at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

/// Events whose processing is safe to retry forever (backfilled invoices)
/// carry this sentinel.
pub const INFINITE_RETRIES: i32 = -1;

fn default_max_retries() -> i32 {
    INFINITE_RETRIES
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedEvent {
    /// Invoice id for both event kinds.
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    /// Milliseconds since epoch; doubles as the FIFO score.
    pub scheduled_at: u64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl QueuedEvent {
    pub fn new(
        id: impl Into<String>,
        event_type: EventType,
        data: serde_json::Value,
        priority: Priority,
        scheduled_at: u64,
    ) -> Self {
        Self {
            id: id.into(),
            event_type,
            data,
            priority,
            retry_count: 0,
            max_retries: INFINITE_RETRIES,
            scheduled_at,
            metadata: serde_json::Value::Null,
        }
    }

    /// Minimal invoice event, the shape the backfill poller enqueues.
    pub fn minimal_invoice(invoice_id: impl Into<String>, scheduled_at: u64) -> Self {
        Self::new(
            invoice_id,
            EventType::InvoiceEnqueued,
            serde_json::Value::Null,
            Priority::Low,
            scheduled_at,
        )
    }

    pub fn minimal_settlement(invoice_id: impl Into<String>, scheduled_at: u64) -> Self {
        Self::new(
            invoice_id,
            EventType::SettlementEnqueued,
            serde_json::Value::Null,
            Priority::Low,
            scheduled_at,
        )
    }

    /// Whether this event may retry forever without counting attempts.
    #[inline]
    pub fn retries_forever(&self) -> bool {
        self.max_retries == INFINITE_RETRIES
    }

    /// Whether one more failure exhausts the retry budget.
    pub fn retries_exhausted(&self) -> bool {
        !self.retries_forever() && self.retry_count as i64 > self.max_retries as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_roundtrip() {
        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
        }
        assert!("ORDER_FILLED".parse::<EventType>().is_err());
    }

    #[test]
    fn test_serde_camel_case_payload() {
        let event = QueuedEvent::minimal_invoice("0xinvoice", 1_700_000_000_000);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "INVOICE_ENQUEUED");
        assert_eq!(json["priority"], "LOW");
        assert_eq!(json["maxRetries"], -1);
        assert_eq!(json["scheduledAt"], 1_700_000_000_000u64);

        let back: QueuedEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_deserialize_defaults() {
        let json = serde_json::json!({
            "id": "0xinvoice",
            "type": "SETTLEMENT_ENQUEUED",
            "scheduledAt": 5,
        });
        let event: QueuedEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.priority, Priority::Normal);
        assert_eq!(event.retry_count, 0);
        assert!(event.retries_forever());
    }

    #[test]
    fn test_retry_budget() {
        let mut event = QueuedEvent::minimal_invoice("0xinvoice", 0);
        event.max_retries = 2;
        event.retry_count = 2;
        assert!(!event.retries_exhausted());
        event.retry_count = 3;
        assert!(event.retries_exhausted());

        event.max_retries = INFINITE_RETRIES;
        event.retry_count = 10_000;
        assert!(!event.retries_exhausted());
    }
}
