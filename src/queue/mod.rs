//! Event Queue (Redis)
//!
//! Per-type sorted-set keyspaces (`pending:<type>`, `processing:<type>`),
//! one payload hash, and a single dead-letter set. Every multi-step keyspace
//! mutation runs as a Lua script so concurrent consumers see each id handed
//! to at most one of them, and no payload is lost before `acknowledge`.

pub mod event;

pub use event::{EventType, INFINITE_RETRIES, Priority, QueuedEvent};

use once_cell::sync::Lazy;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Invalid event: {0}")]
    Validation(String),

    #[error("Corrupt payload for event {0}")]
    Corrupt(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        QueueError::Redis(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// The id was already pending or processing and `force_update` was off.
    AlreadyPresent,
}

/// Depths snapshot for observability and the health endpoint.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepths {
    pub invoice_pending: u64,
    pub invoice_processing: u64,
    pub settlement_pending: u64,
    pub settlement_processing: u64,
    pub dead_letter: u64,
}

/// Default retention for dead-letter entries.
pub const DEAD_LETTER_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// TTL for the invalid/settled invoice marker keys.
const MARKER_TTL_SECS: u64 = 24 * 3600;

const MAX_DEQUEUE_COUNT: usize = 1000;

// KEYS[1]=pending KEYS[2]=processing KEYS[3]=events
// ARGV[1]=id ARGV[2]=payload ARGV[3]=score ARGV[4]=force
const ENQUEUE_LUA: &str = r#"
local in_pending = redis.call('ZSCORE', KEYS[1], ARGV[1])
local in_processing = redis.call('ZSCORE', KEYS[2], ARGV[1])
if (in_pending or in_processing) and ARGV[4] == '0' then
  return 0
end
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HSET', KEYS[3], ARGV[1], ARGV[2])
redis.call('ZADD', KEYS[1], ARGV[3], ARGV[1])
return 1
"#;

// Pops ready ids (score <= now) in FIFO order, moves them to processing and
// returns their payloads. Orphan ids (no payload) are dropped from both the
// queue and the hash.
// KEYS[1]=pending KEYS[2]=processing KEYS[3]=events
// ARGV[1]=count ARGV[2]=now
const DEQUEUE_LUA: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[2], 'LIMIT', 0, tonumber(ARGV[1]))
local out = {}
for _, id in ipairs(ids) do
  redis.call('ZREM', KEYS[1], id)
  local payload = redis.call('HGET', KEYS[3], id)
  if payload then
    redis.call('ZADD', KEYS[2], ARGV[2], id)
    table.insert(out, payload)
  else
    redis.call('HDEL', KEYS[3], id)
  end
end
return out
"#;

// KEYS[1]=processing KEYS[2]=events ARGV[1]=id
const ACK_LUA: &str = r#"
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
return 1
"#;

// KEYS[1]=processing KEYS[2]=dead-letter KEYS[3]=events
// ARGV[1]=id ARGV[2]=payload ARGV[3]=now
const DEAD_LETTER_LUA: &str = r#"
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[1])
redis.call('HSET', KEYS[3], ARGV[1], ARGV[2])
return 1
"#;

// Startup reclaim: restore every processing id to pending with its original
// scheduledAt. Corrupted payloads are deleted.
// KEYS[1]=processing KEYS[2]=pending KEYS[3]=events
const RECLAIM_LUA: &str = r#"
local ids = redis.call('ZRANGE', KEYS[1], 0, -1)
local restored = 0
for _, id in ipairs(ids) do
  redis.call('ZREM', KEYS[1], id)
  local payload = redis.call('HGET', KEYS[3], id)
  if payload then
    local ok, decoded = pcall(cjson.decode, payload)
    if ok and type(decoded) == 'table' and decoded['scheduledAt'] then
      redis.call('ZADD', KEYS[2], decoded['scheduledAt'], id)
      restored = restored + 1
    else
      redis.call('HDEL', KEYS[3], id)
    end
  end
end
return restored
"#;

// KEYS[1]=dead-letter KEYS[2]=events ARGV[1]=cutoff
const CLEANUP_LUA: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(ids) do
  redis.call('ZREM', KEYS[1], id)
  redis.call('HDEL', KEYS[2], id)
end
return #ids
"#;

// Remove a corrupted id from every keyspace it could be in.
// KEYS[1]=pending KEYS[2]=processing KEYS[3]=events ARGV[1]=id
const DISCARD_LUA: &str = r#"
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[3], ARGV[1])
return 1
"#;

static ENQUEUE_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(ENQUEUE_LUA));
static DEQUEUE_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(DEQUEUE_LUA));
static ACK_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(ACK_LUA));
static DEAD_LETTER_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(DEAD_LETTER_LUA));
static RECLAIM_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(RECLAIM_LUA));
static CLEANUP_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(CLEANUP_LUA));
static DISCARD_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(DISCARD_LUA));

pub struct EventQueue {
    conn: MultiplexedConnection,
    prefix: String,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl EventQueue {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self::with_prefix(conn, "mark")
    }

    /// Custom key prefix; tests use this for keyspace isolation.
    pub fn with_prefix(conn: MultiplexedConnection, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url).map_err(QueueError::from)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self::new(conn))
    }

    fn pending_key(&self, event_type: EventType) -> String {
        format!("{}:pending:{}", self.prefix, event_type.key_segment())
    }

    fn processing_key(&self, event_type: EventType) -> String {
        format!("{}:processing:{}", self.prefix, event_type.key_segment())
    }

    fn events_key(&self) -> String {
        format!("{}:events", self.prefix)
    }

    fn dead_letter_key(&self) -> String {
        format!("{}:dead-letter", self.prefix)
    }

    /// Idempotent enqueue. With `force_update = false`, a second call with
    /// the same id is indistinguishable from the first.
    pub async fn enqueue(
        &self,
        event: &QueuedEvent,
        force_update: bool,
    ) -> Result<EnqueueOutcome, QueueError> {
        if event.id.trim().is_empty() {
            return Err(QueueError::Validation("event id must not be empty".into()));
        }

        let payload = serde_json::to_string(event)
            .map_err(|e| QueueError::Validation(format!("unserialisable event: {e}")))?;

        let mut conn = self.conn.clone();
        let queued: i64 = ENQUEUE_SCRIPT
            .key(self.pending_key(event.event_type))
            .key(self.processing_key(event.event_type))
            .key(self.events_key())
            .arg(&event.id)
            .arg(payload)
            .arg(event.scheduled_at)
            .arg(if force_update { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;

        Ok(if queued == 1 {
            EnqueueOutcome::Queued
        } else {
            EnqueueOutcome::AlreadyPresent
        })
    }

    /// Pop up to `count` due events (scheduled_at <= now) in FIFO order and
    /// move them to the processing set. Count is clamped to [1, 1000].
    pub async fn dequeue(
        &self,
        event_type: EventType,
        count: usize,
    ) -> Result<Vec<QueuedEvent>, QueueError> {
        let count = count.clamp(1, MAX_DEQUEUE_COUNT);

        let mut conn = self.conn.clone();
        let payloads: Vec<String> = DEQUEUE_SCRIPT
            .key(self.pending_key(event_type))
            .key(self.processing_key(event_type))
            .key(self.events_key())
            .arg(count)
            .arg(now_ms())
            .invoke_async(&mut conn)
            .await?;

        let mut events = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match serde_json::from_str::<QueuedEvent>(&payload) {
                Ok(event) => events.push(event),
                Err(e) => {
                    // Corruption: drop the id from every keyspace.
                    error!(error = %e, payload = %payload, "Discarding corrupt event payload");
                    if let Some(id) = serde_json::from_str::<serde_json::Value>(&payload)
                        .ok()
                        .and_then(|v| v.get("id").and_then(|i| i.as_str().map(String::from)))
                    {
                        self.discard(event_type, &id).await?;
                    }
                }
            }
        }
        Ok(events)
    }

    /// Remove a processed event and its payload.
    pub async fn acknowledge(&self, event: &QueuedEvent) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = ACK_SCRIPT
            .key(self.processing_key(event.event_type))
            .key(self.events_key())
            .arg(&event.id)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn move_to_dead_letter(
        &self,
        event: &QueuedEvent,
        error_message: &str,
    ) -> Result<(), QueueError> {
        let now = now_ms();
        let mut payload = serde_json::to_value(event)
            .map_err(|e| QueueError::Validation(format!("unserialisable event: {e}")))?;
        payload["error"] = serde_json::Value::String(error_message.to_string());
        payload["movedAt"] = serde_json::Value::from(now);

        warn!(
            event_id = %event.id,
            event_type = %event.event_type,
            error = error_message,
            "Moving event to dead letter queue"
        );

        let mut conn = self.conn.clone();
        let _: i64 = DEAD_LETTER_SCRIPT
            .key(self.processing_key(event.event_type))
            .key(self.dead_letter_key())
            .key(self.events_key())
            .arg(&event.id)
            .arg(payload.to_string())
            .arg(now)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Startup reclaim: events a crashed consumer left in `processing:*` are
    /// restored to pending with their original scheduled_at.
    pub async fn move_processing_to_pending(&self) -> Result<u64, QueueError> {
        let mut restored = 0u64;
        let mut conn = self.conn.clone();
        for event_type in EventType::ALL {
            let n: i64 = RECLAIM_SCRIPT
                .key(self.processing_key(event_type))
                .key(self.pending_key(event_type))
                .key(self.events_key())
                .invoke_async(&mut conn)
                .await?;
            restored += n as u64;
        }
        Ok(restored)
    }

    /// Drop dead-letter entries older than the TTL; returns how many.
    pub async fn cleanup_expired_dead_letter(&self, ttl: Duration) -> Result<u64, QueueError> {
        let cutoff = now_ms().saturating_sub(ttl.as_millis() as u64);
        let mut conn = self.conn.clone();
        let removed: i64 = CLEANUP_SCRIPT
            .key(self.dead_letter_key())
            .key(self.events_key())
            .arg(cutoff)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed as u64)
    }

    async fn discard(&self, event_type: EventType, id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = DISCARD_SCRIPT
            .key(self.pending_key(event_type))
            .key(self.processing_key(event_type))
            .key(self.events_key())
            .arg(id)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Whether the id is currently pending or processing for the type.
    pub async fn has_event(&self, event_type: EventType, id: &str) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let pending: Option<f64> = conn.zscore(self.pending_key(event_type), id).await?;
        if pending.is_some() {
            return Ok(true);
        }
        let processing: Option<f64> = conn.zscore(self.processing_key(event_type), id).await?;
        Ok(processing.is_some())
    }

    /// Scheduled time of the next pending event, if any.
    pub async fn peek_next_scheduled(
        &self,
        event_type: EventType,
    ) -> Result<Option<u64>, QueueError> {
        let mut conn = self.conn.clone();
        let head: Vec<(String, f64)> = conn
            .zrange_withscores(self.pending_key(event_type), 0, 0)
            .await?;
        Ok(head.first().map(|(_, score)| *score as u64))
    }

    pub async fn queue_depths(&self) -> Result<QueueDepths, QueueError> {
        let mut conn = self.conn.clone();
        Ok(QueueDepths {
            invoice_pending: conn.zcard(self.pending_key(EventType::InvoiceEnqueued)).await?,
            invoice_processing: conn
                .zcard(self.processing_key(EventType::InvoiceEnqueued))
                .await?,
            settlement_pending: conn
                .zcard(self.pending_key(EventType::SettlementEnqueued))
                .await?,
            settlement_processing: conn
                .zcard(self.processing_key(EventType::SettlementEnqueued))
                .await?,
            dead_letter: conn.zcard(self.dead_letter_key()).await?,
        })
    }

    // === Consumer pause flag ===

    pub async fn set_paused(&self, paused: bool) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let key = format!("{}:paused", self.prefix);
        if paused {
            let _: () = conn.set(key, "1").await?;
        } else {
            let _: () = conn.del(key).await?;
        }
        Ok(())
    }

    pub async fn is_paused(&self) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(format!("{}:paused", self.prefix)).await?)
    }

    // === Backfill cursor ===

    pub async fn backfill_cursor(&self) -> Result<Option<String>, QueueError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(format!("{}:backfill-cursor", self.prefix)).await?)
    }

    pub async fn set_backfill_cursor(&self, cursor: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(format!("{}:backfill-cursor", self.prefix), cursor)
            .await?;
        Ok(())
    }

    // === TTL'd invoice markers ===

    pub async fn add_invalid_invoice(&self, invoice_id: &str) -> Result<(), QueueError> {
        self.set_marker("invalid", invoice_id).await
    }

    pub async fn is_invalid_invoice(&self, invoice_id: &str) -> Result<bool, QueueError> {
        self.has_marker("invalid", invoice_id).await
    }

    pub async fn add_settled_invoice(&self, invoice_id: &str) -> Result<(), QueueError> {
        self.set_marker("settled", invoice_id).await
    }

    pub async fn is_settled_invoice(&self, invoice_id: &str) -> Result<bool, QueueError> {
        self.has_marker("settled", invoice_id).await
    }

    async fn set_marker(&self, kind: &str, invoice_id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(
                format!("{}:{}:{}", self.prefix, kind, invoice_id),
                "1",
                MARKER_TTL_SECS,
            )
            .await?;
        Ok(())
    }

    async fn has_marker(&self, kind: &str, invoice_id: &str) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        Ok(conn
            .exists(format!("{}:{}:{}", self.prefix, kind, invoice_id))
            .await?)
    }
}
