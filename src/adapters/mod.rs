//! Bridge Adapter Registry
//!
//! Every bridge/CEX back-end (onchain bridges, CEX withdrawal APIs, two-leg
//! bridges) implements one capability set and registers under its
//! `SupportedBridge` tag. The engine selects adapters from route preferences
//! and never dispatches on strings beyond registration.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::amount::Amount;
use crate::chain::TransactionRequest;
use crate::receipt::NormalizedReceipt;

#[cfg(any(test, feature = "mock-bridge"))]
pub mod mock;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("No adapter registered for bridge: {0}")]
    Unregistered(String),

    #[error("Unsupported asset or chain: {0}")]
    Unsupported(String),

    #[error("Quote unavailable: {0}")]
    Quote(String),

    #[error("Transient adapter error: {0}")]
    Transient(String),

    /// The back-end reported a terminal failure (e.g. the TAC SDK `FAILED`
    /// status); the operation must be cancelled, not retried.
    #[error("Permanent adapter failure: {0}")]
    Permanent(String),
}

impl AdapterError {
    #[inline]
    pub fn is_permanent(&self) -> bool {
        matches!(self, AdapterError::Permanent(_) | AdapterError::Unsupported(_))
    }
}

/// Registered bridge back-ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportedBridge {
    Across,
    #[serde(rename = "cctpv1")]
    CctpV1,
    #[serde(rename = "cctpv2")]
    CctpV2,
    Binance,
    Kraken,
    Near,
    Tac,
    Mock,
}

impl SupportedBridge {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupportedBridge::Across => "across",
            SupportedBridge::CctpV1 => "cctpv1",
            SupportedBridge::CctpV2 => "cctpv2",
            SupportedBridge::Binance => "binance",
            SupportedBridge::Kraken => "kraken",
            SupportedBridge::Near => "near",
            SupportedBridge::Tac => "tac",
            SupportedBridge::Mock => "mock",
        }
    }
}

impl fmt::Display for SupportedBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SupportedBridge {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "across" => Ok(SupportedBridge::Across),
            "cctpv1" => Ok(SupportedBridge::CctpV1),
            "cctpv2" => Ok(SupportedBridge::CctpV2),
            "binance" => Ok(SupportedBridge::Binance),
            "kraken" => Ok(SupportedBridge::Kraken),
            "near" => Ok(SupportedBridge::Near),
            "tac" => Ok(SupportedBridge::Tac),
            "mock" => Ok(SupportedBridge::Mock),
            _ => Err(format!("Unknown bridge: {s}")),
        }
    }
}

/// What a transaction in an adapter plan does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoType {
    Approval,
    Rebalance,
    Wrap,
    Mint,
}

/// One transaction in the ordered plan returned by `send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterTransaction {
    pub memo: MemoType,
    pub transaction: TransactionRequest,
}

/// One directional lane an adapter is asked to quote or transfer over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub origin_chain: u64,
    pub destination_chain: u64,
    pub ticker_hash: String,
    pub origin_asset: String,
    pub destination_asset: String,
}

/// Uniform capability set over heterogeneous bridge back-ends.
#[async_trait]
pub trait BridgeAdapter: Send + Sync + Debug {
    fn bridge_type(&self) -> SupportedBridge;

    /// Quote the amount delivered on the destination. No side effects.
    async fn received_amount(&self, amount: &Amount, route: &Route)
    -> Result<Amount, AdapterError>;

    /// Build the ordered transaction plan for a transfer (approvals before
    /// the bridge call). May refuse unsupported assets/chains.
    async fn send(
        &self,
        sender: &str,
        recipient: &str,
        amount: &Amount,
        route: &Route,
    ) -> Result<Vec<AdapterTransaction>, AdapterError>;

    /// Whether the origin transfer can be finalised on the destination.
    async fn ready_on_destination(
        &self,
        amount: &Amount,
        route: &Route,
        origin_receipt: &NormalizedReceipt,
    ) -> Result<bool, AdapterError>;

    /// Destination-side finaliser, if the bridge needs one.
    async fn destination_callback(
        &self,
        route: &Route,
        origin_receipt: &NormalizedReceipt,
    ) -> Result<Option<TransactionRequest>, AdapterError>;

    /// Lower bound some back-ends impose on transfer size.
    async fn minimum_amount(&self, _route: &Route) -> Result<Option<Amount>, AdapterError> {
        Ok(None)
    }
}

/// Adapter lookup by bridge tag. Built once at startup; registration order is
/// irrelevant because routes name bridges explicitly.
#[derive(Debug, Default)]
pub struct AdapterRegistry {
    adapters: FxHashMap<SupportedBridge, Arc<dyn BridgeAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the default back-ends for this build.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        // [SECURITY] The mock adapter quotes and "transfers" without moving
        // funds. Production builds MUST be compiled with
        // `--no-default-features` to exclude it.
        #[cfg(feature = "mock-bridge")]
        registry.register(Arc::new(mock::MockBridge::new()));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn BridgeAdapter>) {
        self.adapters.insert(adapter.bridge_type(), adapter);
    }

    pub fn get(&self, bridge: SupportedBridge) -> Result<Arc<dyn BridgeAdapter>, AdapterError> {
        self.adapters
            .get(&bridge)
            .cloned()
            .ok_or_else(|| AdapterError::Unregistered(bridge.to_string()))
    }

    pub fn registered(&self) -> Vec<SupportedBridge> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_tag_roundtrip() {
        for bridge in [
            SupportedBridge::Across,
            SupportedBridge::CctpV1,
            SupportedBridge::CctpV2,
            SupportedBridge::Binance,
            SupportedBridge::Kraken,
            SupportedBridge::Near,
            SupportedBridge::Tac,
            SupportedBridge::Mock,
        ] {
            assert_eq!(bridge.as_str().parse::<SupportedBridge>().unwrap(), bridge);
        }
        assert!("hyperlane".parse::<SupportedBridge>().is_err());
    }

    #[test]
    fn test_serde_tags_match_config_strings() {
        let bridge: SupportedBridge = serde_json::from_str("\"cctpv2\"").unwrap();
        assert_eq!(bridge, SupportedBridge::CctpV2);
        assert_eq!(
            serde_json::to_string(&SupportedBridge::Across).unwrap(),
            "\"across\""
        );
    }

    #[test]
    fn test_registry_lookup() {
        let registry = AdapterRegistry::with_defaults();
        assert!(registry.get(SupportedBridge::Mock).is_ok());
        let err = registry.get(SupportedBridge::Across).unwrap_err();
        assert!(matches!(err, AdapterError::Unregistered(_)));
    }

    #[test]
    fn test_permanent_classification() {
        assert!(AdapterError::Permanent("FAILED".into()).is_permanent());
        assert!(AdapterError::Unsupported("no USDT on 10".into()).is_permanent());
        assert!(!AdapterError::Transient("timeout".into()).is_permanent());
        assert!(!AdapterError::Quote("thin liquidity".into()).is_permanent());
    }
}
