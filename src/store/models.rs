//! Operations Store Models
//!
//! Earmarks, rebalance operations, and their embedded transaction entries.
//! Status enums are stored as TEXT with CHECK constraints; transitions only
//! happen through the CAS updates in the store modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::adapters::{MemoType, SupportedBridge};
use crate::amount::Amount;

/// Earmark lifecycle
///
/// ```text
/// pending ──▶ ready ──▶ completed
///    │          │
///    └──────────┴──▶ cancelled | failed | expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EarmarkStatus {
    Pending,
    Ready,
    Completed,
    Cancelled,
    Failed,
    Expired,
}

impl EarmarkStatus {
    /// Terminal statuses never transition again; a new earmark may be created
    /// for the same invoice once the old one is terminal.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EarmarkStatus::Pending | EarmarkStatus::Ready)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EarmarkStatus::Pending => "pending",
            EarmarkStatus::Ready => "ready",
            EarmarkStatus::Completed => "completed",
            EarmarkStatus::Cancelled => "cancelled",
            EarmarkStatus::Failed => "failed",
            EarmarkStatus::Expired => "expired",
        }
    }

    /// Check a transition against the lifecycle DAG.
    pub fn can_transition_to(&self, next: EarmarkStatus) -> bool {
        match (self, next) {
            (EarmarkStatus::Pending, EarmarkStatus::Ready) => true,
            (EarmarkStatus::Ready, EarmarkStatus::Completed) => true,
            (
                EarmarkStatus::Pending | EarmarkStatus::Ready,
                EarmarkStatus::Cancelled | EarmarkStatus::Failed | EarmarkStatus::Expired,
            ) => true,
            _ => false,
        }
    }
}

impl fmt::Display for EarmarkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EarmarkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EarmarkStatus::Pending),
            "ready" => Ok(EarmarkStatus::Ready),
            "completed" => Ok(EarmarkStatus::Completed),
            "cancelled" => Ok(EarmarkStatus::Cancelled),
            "failed" => Ok(EarmarkStatus::Failed),
            "expired" => Ok(EarmarkStatus::Expired),
            _ => Err(format!("Invalid earmark status: {s}")),
        }
    }
}

/// Rebalance operation lifecycle
///
/// ```text
/// pending ──▶ awaiting_callback ──▶ completed
///    │               │
///    └───────────────┴──▶ cancelled | expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    AwaitingCallback,
    Completed,
    Expired,
    Cancelled,
}

impl OperationStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Expired | OperationStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::AwaitingCallback => "awaiting_callback",
            OperationStatus::Completed => "completed",
            OperationStatus::Expired => "expired",
            OperationStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        match (self, next) {
            (OperationStatus::Pending, OperationStatus::AwaitingCallback) => true,
            (OperationStatus::AwaitingCallback, OperationStatus::Completed) => true,
            (
                OperationStatus::Pending | OperationStatus::AwaitingCallback,
                OperationStatus::Cancelled | OperationStatus::Expired,
            ) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OperationStatus::Pending),
            "awaiting_callback" => Ok(OperationStatus::AwaitingCallback),
            "completed" => Ok(OperationStatus::Completed),
            "expired" => Ok(OperationStatus::Expired),
            "cancelled" => Ok(OperationStatus::Cancelled),
            _ => Err(format!("Invalid operation status: {s}")),
        }
    }
}

/// A reservation of yet-to-arrive bridged funds against a specific invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Earmark {
    pub id: Uuid,
    pub invoice_id: String,
    pub designated_purchase_chain: u64,
    pub ticker_hash: String,
    pub min_amount: Amount,
    pub status: EarmarkStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Earmark {
    pub fn new(
        invoice_id: impl Into<String>,
        designated_purchase_chain: u64,
        ticker_hash: impl Into<String>,
        min_amount: Amount,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            invoice_id: invoice_id.into(),
            designated_purchase_chain,
            ticker_hash: ticker_hash.into(),
            min_amount,
            status: EarmarkStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Receipt metadata for one submitted transaction, keyed by chain id in the
/// operation's transactions map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEntry {
    pub hash: String,
    pub from: String,
    #[serde(default)]
    pub to: String,
    pub memo: MemoType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_gas_price: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// One directional transfer of Mark's own liquidity (possibly one leg of a
/// multi-leg route).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceOperation {
    pub id: Uuid,
    /// None for standalone threshold-rebalance operations.
    pub earmark_id: Option<Uuid>,
    pub origin_chain_id: u64,
    pub destination_chain_id: u64,
    pub ticker_hash: String,
    pub amount: Amount,
    pub slippage_dbps: u32,
    pub bridge: SupportedBridge,
    pub status: OperationStatus,
    pub recipient: String,
    /// Live operation whose earmark has been cancelled; driven to completion
    /// but never marks the earmark ready.
    pub is_orphaned: bool,
    /// chain id -> submitted transaction, embedded in the operation row.
    pub transactions: BTreeMap<u64, TransactionEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RebalanceOperation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        earmark_id: Option<Uuid>,
        origin_chain_id: u64,
        destination_chain_id: u64,
        ticker_hash: impl Into<String>,
        amount: Amount,
        slippage_dbps: u32,
        bridge: SupportedBridge,
        recipient: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            earmark_id,
            origin_chain_id,
            destination_chain_id,
            ticker_hash: ticker_hash.into(),
            amount,
            slippage_dbps,
            bridge,
            status: OperationStatus::Pending,
            recipient: recipient.into(),
            is_orphaned: false,
            transactions: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The receipt recorded for the origin leg, if the bridge call has been
    /// submitted.
    pub fn origin_transaction(&self) -> Option<&TransactionEntry> {
        self.transactions.get(&self.origin_chain_id)
    }
}

/// Process-wide pause switches stored in the operations store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseKey {
    Rebalance,
    Ondemand,
    Purchase,
}

impl PauseKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            PauseKey::Rebalance => "rebalance",
            PauseKey::Ondemand => "ondemand",
            PauseKey::Purchase => "purchase",
        }
    }
}

impl fmt::Display for PauseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PauseKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rebalance" => Ok(PauseKey::Rebalance),
            "ondemand" => Ok(PauseKey::Ondemand),
            "purchase" => Ok(PauseKey::Purchase),
            _ => Err(format!("Invalid pause key: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::canonical;

    #[test]
    fn test_earmark_status_terminal() {
        assert!(!EarmarkStatus::Pending.is_terminal());
        assert!(!EarmarkStatus::Ready.is_terminal());
        assert!(EarmarkStatus::Completed.is_terminal());
        assert!(EarmarkStatus::Cancelled.is_terminal());
        assert!(EarmarkStatus::Failed.is_terminal());
        assert!(EarmarkStatus::Expired.is_terminal());
    }

    #[test]
    fn test_earmark_transition_dag() {
        assert!(EarmarkStatus::Pending.can_transition_to(EarmarkStatus::Ready));
        assert!(EarmarkStatus::Ready.can_transition_to(EarmarkStatus::Completed));
        assert!(EarmarkStatus::Pending.can_transition_to(EarmarkStatus::Expired));
        assert!(EarmarkStatus::Ready.can_transition_to(EarmarkStatus::Cancelled));

        assert!(!EarmarkStatus::Pending.can_transition_to(EarmarkStatus::Completed));
        assert!(!EarmarkStatus::Completed.can_transition_to(EarmarkStatus::Pending));
        assert!(!EarmarkStatus::Cancelled.can_transition_to(EarmarkStatus::Ready));
    }

    #[test]
    fn test_operation_transition_dag() {
        assert!(OperationStatus::Pending.can_transition_to(OperationStatus::AwaitingCallback));
        assert!(OperationStatus::AwaitingCallback.can_transition_to(OperationStatus::Completed));
        assert!(OperationStatus::Pending.can_transition_to(OperationStatus::Cancelled));
        assert!(OperationStatus::AwaitingCallback.can_transition_to(OperationStatus::Expired));

        assert!(!OperationStatus::Pending.can_transition_to(OperationStatus::Completed));
        assert!(!OperationStatus::Completed.can_transition_to(OperationStatus::Pending));
        assert!(!OperationStatus::Cancelled.can_transition_to(OperationStatus::Completed));
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            EarmarkStatus::Pending,
            EarmarkStatus::Ready,
            EarmarkStatus::Completed,
            EarmarkStatus::Cancelled,
            EarmarkStatus::Failed,
            EarmarkStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<EarmarkStatus>().unwrap(), status);
        }
        for status in [
            OperationStatus::Pending,
            OperationStatus::AwaitingCallback,
            OperationStatus::Completed,
            OperationStatus::Expired,
            OperationStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<OperationStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_operation_serializes_camel_case() {
        let op = RebalanceOperation::new(
            None,
            10,
            8453,
            "0xusdc",
            canonical(5),
            300,
            SupportedBridge::Mock,
            "0xmark",
        );
        let json = serde_json::to_value(&op).unwrap();
        assert!(json.get("originChainId").is_some());
        assert!(json.get("isOrphaned").is_some());
        assert_eq!(json["amount"], "5000000000000000000");
        assert_eq!(json["status"], "pending");
    }
}
