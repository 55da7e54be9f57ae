//! Earmark persistence
//!
//! The partial unique index on (invoice_id) for non-terminal statuses is the
//! authority for the one-active-earmark-per-invoice invariant; a concurrent
//! insert losing the race surfaces as `StoreError::DuplicateEarmark`.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::models::{Earmark, EarmarkStatus};
use super::{StoreError, is_unique_violation};

const SELECT_COLUMNS: &str = "id, invoice_id, designated_purchase_chain, ticker_hash, \
     min_amount, status, created_at, updated_at";

/// Query filter for the admin list endpoint.
#[derive(Debug, Default, Clone)]
pub struct EarmarkFilter {
    pub status: Option<EarmarkStatus>,
    pub chain_id: Option<u64>,
    pub invoice_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl EarmarkFilter {
    /// Pagination limit is clamped to [1, 1000].
    pub fn clamped_limit(&self) -> i64 {
        self.limit.clamp(1, 1000)
    }
}

pub struct EarmarkStore {
    pool: PgPool,
}

impl EarmarkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new earmark. Fails with `DuplicateEarmark` when a non-terminal
    /// earmark already exists for the invoice.
    pub async fn create(&self, earmark: &Earmark) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO earmarks
                (id, invoice_id, designated_purchase_chain, ticker_hash, min_amount, status,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            "#,
        )
        .bind(earmark.id)
        .bind(&earmark.invoice_id)
        .bind(earmark.designated_purchase_chain as i64)
        .bind(&earmark.ticker_hash)
        .bind(earmark.min_amount.to_string())
        .bind(earmark.status.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(StoreError::DuplicateEarmark(earmark.invoice_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Earmark>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM earmarks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_earmark(&r)).transpose()
    }

    /// The non-terminal earmark for an invoice, if one exists. At most one can
    /// exist by the unique index.
    pub async fn get_active_by_invoice(
        &self,
        invoice_id: &str,
    ) -> Result<Option<Earmark>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM earmarks
             WHERE invoice_id = $1 AND status IN ('pending','ready')"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_earmark(&r)).transpose()
    }

    /// Atomic CAS update: transition only if the current status matches.
    ///
    /// Returns false when the row was concurrently modified (or the requested
    /// transition is not in the lifecycle DAG).
    pub async fn update_status_if(
        &self,
        id: Uuid,
        expected: EarmarkStatus,
        new: EarmarkStatus,
    ) -> Result<bool, StoreError> {
        if !expected.can_transition_to(new) {
            return Ok(false);
        }

        let result = sqlx::query(
            "UPDATE earmarks SET status = $1, updated_at = NOW()
             WHERE id = $2 AND status = $3",
        )
        .bind(new.as_str())
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Admin cancel: flip the earmark to cancelled and orphan its live
    /// operations in one transaction. The operations keep their status so the
    /// engine can still drive them to completion.
    pub async fn cancel(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let cancelled = sqlx::query(
            "UPDATE earmarks SET status = 'cancelled', updated_at = NOW()
             WHERE id = $1 AND status IN ('pending','ready')",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if cancelled {
            sqlx::query(
                "UPDATE rebalance_operations SET is_orphaned = TRUE, updated_at = NOW()
                 WHERE earmark_id = $1 AND status IN ('pending','awaiting_callback')",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(cancelled)
    }

    /// Expire pending earmarks older than the TTL; returns the expired ids.
    /// Their live operations are orphaned so the engine keeps driving them.
    pub async fn expire_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "UPDATE earmarks SET status = 'expired', updated_at = NOW()
             WHERE status = 'pending' AND created_at < $1
             RETURNING id",
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.get("id")).collect();

        if !ids.is_empty() {
            sqlx::query(
                "UPDATE rebalance_operations SET is_orphaned = TRUE, updated_at = NOW()
                 WHERE earmark_id = ANY($1) AND status IN ('pending','awaiting_callback')",
            )
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(ids)
    }

    pub async fn list(&self, filter: &EarmarkFilter) -> Result<Vec<Earmark>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM earmarks
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::bigint IS NULL OR designated_purchase_chain = $2)
               AND ($3::text IS NULL OR invoice_id = $3)
             ORDER BY created_at DESC
             LIMIT $4 OFFSET $5"
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.chain_id.map(|c| c as i64))
        .bind(filter.invoice_id.as_deref())
        .bind(filter.clamped_limit())
        .bind(filter.offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_earmark).collect()
    }
}

fn row_to_earmark(row: &PgRow) -> Result<Earmark, StoreError> {
    let status_str: String = row.get("status");
    let status = status_str
        .parse::<EarmarkStatus>()
        .map_err(StoreError::Corrupt)?;

    let min_amount_str: String = row.get("min_amount");
    let min_amount = min_amount_str
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("Invalid min_amount: {min_amount_str}")))?;

    Ok(Earmark {
        id: row.get("id"),
        invoice_id: row.get("invoice_id"),
        designated_purchase_chain: row.get::<i64, _>("designated_purchase_chain") as u64,
        ticker_hash: row.get("ticker_hash"),
        min_amount,
        status,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::canonical;
    use sqlx::postgres::PgPoolOptions;

    async fn create_test_pool() -> Option<PgPool> {
        let database_url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&database_url)
            .await
            .ok()?;
        super::super::ensure_schema(&pool).await.ok()?;
        Some(pool)
    }

    #[test]
    fn test_filter_limit_clamped() {
        let mut filter = EarmarkFilter::default();
        assert_eq!(filter.clamped_limit(), 1);
        filter.limit = 50_000;
        assert_eq!(filter.clamped_limit(), 1000);
        filter.limit = 100;
        assert_eq!(filter.clamped_limit(), 100);
    }

    #[tokio::test]
    async fn test_duplicate_active_earmark_rejected() {
        let pool = match create_test_pool().await {
            Some(p) => p,
            None => {
                eprintln!("Skipping test - database not available");
                return;
            }
        };
        let store = EarmarkStore::new(pool);

        let invoice_id = format!("invoice-{}", Uuid::new_v4());
        let first = Earmark::new(invoice_id.clone(), 10, "0xusdc", canonical(5));
        store.create(&first).await.unwrap();

        let second = Earmark::new(invoice_id.clone(), 8453, "0xusdc", canonical(5));
        let err = store.create(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEarmark(_)));

        // terminal first earmark frees the slot
        store
            .update_status_if(first.id, EarmarkStatus::Pending, EarmarkStatus::Cancelled)
            .await
            .unwrap();
        store.create(&second).await.unwrap();
    }

    #[tokio::test]
    async fn test_cas_transitions() {
        let pool = match create_test_pool().await {
            Some(p) => p,
            None => {
                eprintln!("Skipping test - database not available");
                return;
            }
        };
        let store = EarmarkStore::new(pool);

        let earmark = Earmark::new(format!("invoice-{}", Uuid::new_v4()), 10, "0xusdc", canonical(1));
        store.create(&earmark).await.unwrap();

        // pending -> completed is not in the DAG
        assert!(
            !store
                .update_status_if(earmark.id, EarmarkStatus::Pending, EarmarkStatus::Completed)
                .await
                .unwrap()
        );

        assert!(
            store
                .update_status_if(earmark.id, EarmarkStatus::Pending, EarmarkStatus::Ready)
                .await
                .unwrap()
        );

        // stale expected status loses the CAS
        assert!(
            !store
                .update_status_if(earmark.id, EarmarkStatus::Pending, EarmarkStatus::Ready)
                .await
                .unwrap()
        );

        let fetched = store.get(earmark.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, EarmarkStatus::Ready);
    }
}
