//! Purchase Cache (Redis)
//!
//! Short-TTL fingerprint store: "invoice X has an outstanding purchase".
//! Suppresses duplicate purchases while the hub is still propagating
//! settlement events. Also owns the process-wide pause flag for the purchase
//! loop, re-read before every event.

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::now_ms;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Corrupt purchase record for invoice {0}")]
    Corrupt(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Redis(e.to_string())
    }
}

/// Default purchase fingerprint lifetime.
pub const PURCHASE_TTL_SECS: u64 = 30 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub invoice_id: String,
    /// Chain the purchase targets.
    pub target: u64,
    /// The submitted intent parameters, opaque to the cache.
    pub intent: serde_json::Value,
    pub transaction_hash: String,
    /// Milliseconds since epoch.
    pub cached_at: u64,
}

impl PurchaseRecord {
    /// Milliseconds between caching and now; the clearance-duration metric
    /// recorded when settlement removes the record.
    pub fn age_ms(&self) -> u64 {
        now_ms().saturating_sub(self.cached_at)
    }
}

pub struct PurchaseCache {
    conn: MultiplexedConnection,
    prefix: String,
    ttl_secs: u64,
}

impl PurchaseCache {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self::with_prefix(conn, "mark", PURCHASE_TTL_SECS)
    }

    pub fn with_prefix(
        conn: MultiplexedConnection,
        prefix: impl Into<String>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            ttl_secs,
        }
    }

    fn purchase_key(&self, invoice_id: &str) -> String {
        format!("{}:purchase:{}", self.prefix, invoice_id)
    }

    fn pause_key(&self) -> String {
        format!("{}:purchase-paused", self.prefix)
    }

    pub async fn save(&self, record: &PurchaseRecord) -> Result<(), CacheError> {
        let payload = serde_json::to_string(record)
            .map_err(|e| CacheError::Corrupt(format!("{}: {e}", record.invoice_id)))?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(self.purchase_key(&record.invoice_id), payload, self.ttl_secs)
            .await?;
        Ok(())
    }

    pub async fn get(&self, invoice_id: &str) -> Result<Option<PurchaseRecord>, CacheError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(self.purchase_key(invoice_id)).await?;
        match payload {
            Some(payload) => serde_json::from_str(&payload)
                .map(Some)
                .map_err(|_| CacheError::Corrupt(invoice_id.to_string())),
            None => Ok(None),
        }
    }

    /// Remove the fingerprint; returns the record that was present, if any.
    pub async fn remove(&self, invoice_id: &str) -> Result<Option<PurchaseRecord>, CacheError> {
        let record = self.get(invoice_id).await?;
        if record.is_some() {
            let mut conn = self.conn.clone();
            let _: () = conn.del(self.purchase_key(invoice_id)).await?;
        }
        Ok(record)
    }

    /// Every cached purchase. The backfill poller walks this to detect
    /// invoices the hub has settled and pruned.
    pub async fn all(&self) -> Result<Vec<PurchaseRecord>, CacheError> {
        let pattern = format!("{}:purchase:*", self.prefix);

        let mut scan_conn = self.conn.clone();
        let mut keys = Vec::new();
        {
            let mut iter = scan_conn.scan_match::<_, String>(pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }

        let mut conn = self.conn.clone();
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let payload: Option<String> = conn.get(&key).await?;
            if let Some(payload) = payload
                && let Ok(record) = serde_json::from_str::<PurchaseRecord>(&payload)
            {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub async fn set_paused(&self, paused: bool) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        if paused {
            let _: () = conn.set(self.pause_key(), "1").await?;
        } else {
            let _: () = conn.del(self.pause_key()).await?;
        }
        Ok(())
    }

    pub async fn is_paused(&self) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(self.pause_key()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    async fn create_test_cache() -> Option<PurchaseCache> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let client = redis::Client::open(url).ok()?;
        let conn = client.get_multiplexed_async_connection().await.ok()?;
        Some(PurchaseCache::with_prefix(
            conn,
            format!("marktest:{}", Uuid::new_v4()),
            60,
        ))
    }

    fn sample_record(invoice_id: &str) -> PurchaseRecord {
        PurchaseRecord {
            invoice_id: invoice_id.to_string(),
            target: 8453,
            intent: json!({"origin": "8453", "amount": "1000"}),
            transaction_hash: "0xpurchase".into(),
            cached_at: now_ms(),
        }
    }

    #[tokio::test]
    async fn test_save_get_remove() {
        let Some(cache) = create_test_cache().await else {
            eprintln!("Skipping test - redis not available");
            return;
        };

        let record = sample_record("0xinvoice1");
        cache.save(&record).await.unwrap();

        let fetched = cache.get("0xinvoice1").await.unwrap().unwrap();
        assert_eq!(fetched, record);

        let removed = cache.remove("0xinvoice1").await.unwrap().unwrap();
        assert_eq!(removed.transaction_hash, "0xpurchase");
        assert!(cache.get("0xinvoice1").await.unwrap().is_none());
        assert!(cache.remove("0xinvoice1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_all_enumerates_records() {
        let Some(cache) = create_test_cache().await else {
            eprintln!("Skipping test - redis not available");
            return;
        };

        cache.save(&sample_record("0xa")).await.unwrap();
        cache.save(&sample_record("0xb")).await.unwrap();

        let mut all = cache.all().await.unwrap();
        all.sort_by(|a, b| a.invoice_id.cmp(&b.invoice_id));
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].invoice_id, "0xa");
        assert_eq!(all[1].invoice_id, "0xb");
    }

    #[tokio::test]
    async fn test_purchase_pause_flag() {
        let Some(cache) = create_test_cache().await else {
            eprintln!("Skipping test - redis not available");
            return;
        };

        assert!(!cache.is_paused().await.unwrap());
        cache.set_paused(true).await.unwrap();
        assert!(cache.is_paused().await.unwrap());
        cache.set_paused(false).await.unwrap();
        assert!(!cache.is_paused().await.unwrap());
    }
}
