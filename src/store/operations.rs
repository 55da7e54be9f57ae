//! Rebalance operation persistence
//!
//! The transactions map (chain id -> submitted transaction) lives as JSONB on
//! the operation row; `record_transaction` merges entries server-side so
//! concurrent receipt recording cannot clobber the map.

use sqlx::{PgPool, Row, postgres::PgRow};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::StoreError;
use super::models::{OperationStatus, RebalanceOperation, TransactionEntry};
use crate::adapters::SupportedBridge;

const SELECT_COLUMNS: &str = "id, earmark_id, origin_chain_id, destination_chain_id, \
     ticker_hash, amount, slippage_dbps, bridge, status, recipient, is_orphaned, \
     transactions, created_at, updated_at";

/// Query filter for the admin list endpoint.
#[derive(Debug, Default, Clone)]
pub struct OperationFilter {
    pub status: Option<OperationStatus>,
    /// Matches either side of the transfer.
    pub chain_id: Option<u64>,
    pub earmark_id: Option<Uuid>,
    pub limit: i64,
    pub offset: i64,
}

impl OperationFilter {
    pub fn clamped_limit(&self) -> i64 {
        self.limit.clamp(1, 1000)
    }
}

pub struct OperationStore {
    pool: PgPool,
}

impl OperationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, op: &RebalanceOperation) -> Result<(), StoreError> {
        let transactions = serde_json::to_value(&op.transactions)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO rebalance_operations
                (id, earmark_id, origin_chain_id, destination_chain_id, ticker_hash, amount,
                 slippage_dbps, bridge, status, recipient, is_orphaned, transactions,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW(), NOW())
            "#,
        )
        .bind(op.id)
        .bind(op.earmark_id)
        .bind(op.origin_chain_id as i64)
        .bind(op.destination_chain_id as i64)
        .bind(&op.ticker_hash)
        .bind(op.amount.to_string())
        .bind(op.slippage_dbps as i32)
        .bind(op.bridge.as_str())
        .bind(op.status.as_str())
        .bind(&op.recipient)
        .bind(op.is_orphaned)
        .bind(transactions)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<RebalanceOperation>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM rebalance_operations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_operation(&r)).transpose()
    }

    /// Every operation the callback phase must drive: pending or
    /// awaiting_callback, oldest first.
    pub async fn live(&self) -> Result<Vec<RebalanceOperation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM rebalance_operations
             WHERE status IN ('pending','awaiting_callback')
             ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_operation).collect()
    }

    pub async fn list_by_earmark(
        &self,
        earmark_id: Uuid,
    ) -> Result<Vec<RebalanceOperation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM rebalance_operations
             WHERE earmark_id = $1 ORDER BY created_at ASC"
        ))
        .bind(earmark_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_operation).collect()
    }

    /// Atomic CAS update on operation status. Transitions outside the
    /// lifecycle DAG are refused without touching the database.
    pub async fn update_status_if(
        &self,
        id: Uuid,
        expected: OperationStatus,
        new: OperationStatus,
    ) -> Result<bool, StoreError> {
        if !expected.can_transition_to(new) {
            return Ok(false);
        }

        let result = sqlx::query(
            "UPDATE rebalance_operations SET status = $1, updated_at = NOW()
             WHERE id = $2 AND status = $3",
        )
        .bind(new.as_str())
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Admin cancel from any live status.
    pub async fn cancel(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE rebalance_operations SET status = 'cancelled', updated_at = NOW()
             WHERE id = $1 AND status IN ('pending','awaiting_callback')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Merge one transaction entry into the operation's transactions map.
    pub async fn record_transaction(
        &self,
        id: Uuid,
        chain_id: u64,
        entry: &TransactionEntry,
    ) -> Result<(), StoreError> {
        let mut patch = serde_json::Map::new();
        patch.insert(
            chain_id.to_string(),
            serde_json::to_value(entry).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        );
        let patch = serde_json::Value::Object(patch);

        sqlx::query(
            "UPDATE rebalance_operations
             SET transactions = transactions || $1::jsonb, updated_at = NOW()
             WHERE id = $2",
        )
        .bind(patch)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list(
        &self,
        filter: &OperationFilter,
    ) -> Result<Vec<RebalanceOperation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM rebalance_operations
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::bigint IS NULL
                    OR origin_chain_id = $2 OR destination_chain_id = $2)
               AND ($3::uuid IS NULL OR earmark_id = $3)
             ORDER BY created_at DESC
             LIMIT $4 OFFSET $5"
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.chain_id.map(|c| c as i64))
        .bind(filter.earmark_id)
        .bind(filter.clamped_limit())
        .bind(filter.offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_operation).collect()
    }
}

fn row_to_operation(row: &PgRow) -> Result<RebalanceOperation, StoreError> {
    let status_str: String = row.get("status");
    let status = status_str
        .parse::<OperationStatus>()
        .map_err(StoreError::Corrupt)?;

    let bridge_str: String = row.get("bridge");
    let bridge = bridge_str
        .parse::<SupportedBridge>()
        .map_err(StoreError::Corrupt)?;

    let amount_str: String = row.get("amount");
    let amount = amount_str
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("Invalid amount: {amount_str}")))?;

    let transactions_value: serde_json::Value = row.get("transactions");
    let transactions: BTreeMap<u64, TransactionEntry> =
        serde_json::from_value(transactions_value)
            .map_err(|e| StoreError::Corrupt(format!("Invalid transactions map: {e}")))?;

    Ok(RebalanceOperation {
        id: row.get("id"),
        earmark_id: row.get("earmark_id"),
        origin_chain_id: row.get::<i64, _>("origin_chain_id") as u64,
        destination_chain_id: row.get::<i64, _>("destination_chain_id") as u64,
        ticker_hash: row.get("ticker_hash"),
        amount,
        slippage_dbps: row.get::<i32, _>("slippage_dbps") as u32,
        bridge,
        status,
        recipient: row.get("recipient"),
        is_orphaned: row.get("is_orphaned"),
        transactions,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
