//! Rebalance Engine
//!
//! Threshold- and invoice-driven controller that selects bridge routes,
//! executes multi-leg transfers via the adapter registry, and drives each
//! operation through its state machine until funds arrive at the
//! destination. One tick runs three phases in order: callbacks (finish what
//! is in flight), on-demand (meet invoice demand), threshold (drain
//! overweight chains).

pub mod callbacks;
pub mod engine;
pub mod ondemand;
pub mod threshold;

pub use engine::RebalanceEngine;

use thiserror::Error;

use crate::adapters::AdapterError;
use crate::amount::{Amount, AmountError};
use crate::chain::ChainError;
use crate::hub::HubError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum RebalanceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error(transparent)]
    Amount(#[from] AmountError),

    #[error("Quote {quote} below slippage floor {floor}")]
    SlippageRejected { quote: Amount, floor: Amount },

    #[error("Amount {amount} below bridge minimum {minimum}")]
    BelowBridgeMinimum { amount: Amount, minimum: Amount },

    #[error("No route configured from {origin:?} to {destination} for {ticker_hash}")]
    NoRoute {
        origin: Option<u64>,
        destination: u64,
        ticker_hash: String,
    },

    #[error("Asset {ticker_hash} is not configured on chain {chain_id}")]
    UnknownAsset { chain_id: u64, ticker_hash: String },
}

impl RebalanceError {
    /// Permanent failures cancel the operation; everything else (including
    /// a config gap like an unknown asset, which must never strand funds
    /// mid-flight) is retried on the next tick.
    pub fn is_permanent(&self) -> bool {
        match self {
            RebalanceError::Adapter(e) => e.is_permanent(),
            _ => false,
        }
    }
}
