//! Operations Store (Postgres)
//!
//! Durable record of earmarks, rebalance operations and their embedded
//! transaction receipts, plus process-wide pause flags. All state updates use
//! atomic CAS (`UPDATE ... WHERE status = $expected`) so concurrent workers
//! never race a transition.

pub mod earmarks;
pub mod models;
pub mod operations;
pub mod pause;
pub mod schema;

pub use earmarks::{EarmarkFilter, EarmarkStore};
pub use models::{
    Earmark, EarmarkStatus, OperationStatus, PauseKey, RebalanceOperation, TransactionEntry,
};
pub use operations::{OperationFilter, OperationStore};
pub use pause::PauseStore;
pub use schema::ensure_schema;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Active earmark already exists for invoice {0}")]
    DuplicateEarmark(String),

    #[error("Earmark not found: {0}")]
    EarmarkNotFound(uuid::Uuid),

    #[error("Operation not found: {0}")]
    OperationNotFound(uuid::Uuid),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// True when the underlying database error is a unique-constraint violation
/// ("another worker won" in the concurrency model).
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}
