//! Operations store schema bootstrap
//!
//! Idempotent DDL executed at startup. Status columns are CHECK-constrained
//! to the lifecycle enumerations; a partial unique index enforces "at most
//! one non-terminal earmark per invoice" at the storage level.

use sqlx::PgPool;

use super::StoreError;

const DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS earmarks (
        id UUID PRIMARY KEY,
        invoice_id TEXT NOT NULL,
        designated_purchase_chain BIGINT NOT NULL,
        ticker_hash TEXT NOT NULL,
        min_amount TEXT NOT NULL,
        status TEXT NOT NULL
            CHECK (status IN ('pending','ready','completed','cancelled','failed','expired')),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS earmarks_active_invoice_idx
        ON earmarks (invoice_id)
        WHERE status IN ('pending','ready')
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS earmarks_status_idx ON earmarks (status)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rebalance_operations (
        id UUID PRIMARY KEY,
        earmark_id UUID REFERENCES earmarks(id),
        origin_chain_id BIGINT NOT NULL,
        destination_chain_id BIGINT NOT NULL,
        ticker_hash TEXT NOT NULL,
        amount TEXT NOT NULL,
        slippage_dbps INTEGER NOT NULL,
        bridge TEXT NOT NULL,
        status TEXT NOT NULL
            CHECK (status IN ('pending','awaiting_callback','completed','expired','cancelled')),
        recipient TEXT NOT NULL,
        is_orphaned BOOLEAN NOT NULL DEFAULT FALSE,
        transactions JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS rebalance_operations_status_idx
        ON rebalance_operations (status)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS rebalance_operations_earmark_idx
        ON rebalance_operations (earmark_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pause_flags (
        key TEXT PRIMARY KEY
            CHECK (key IN ('rebalance','ondemand','purchase')),
        paused BOOLEAN NOT NULL DEFAULT FALSE,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Create all tables and indexes if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in DDL {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
