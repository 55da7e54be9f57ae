//! Mock bridge back-end
//!
//! Deterministic adapter used by tests and dev deployments: quotes a fixed
//! fee haircut, "transfers" by emitting an approval plus a bridge call, and
//! is immediately ready on the destination. Behaviour knobs are plain fields
//! guarded by mutexes so tests can script refusals and pending states.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{AdapterError, AdapterTransaction, BridgeAdapter, MemoType, Route, SupportedBridge};
use crate::amount::{Amount, DBPS_MULTIPLIER};
use crate::chain::TransactionRequest;
use crate::receipt::NormalizedReceipt;

#[derive(Debug)]
pub struct MockBridge {
    /// Quote haircut in dbps.
    fee_dbps: u32,
    ready: AtomicBool,
    /// When set, `destination_callback` returns a mint transaction instead of
    /// nothing.
    needs_callback: AtomicBool,
    /// Next quote/send refusals, drained in order.
    scripted_errors: Mutex<Vec<AdapterError>>,
}

impl MockBridge {
    pub fn new() -> Self {
        Self::with_fee(10)
    }

    pub fn with_fee(fee_dbps: u32) -> Self {
        Self {
            fee_dbps,
            ready: AtomicBool::new(true),
            needs_callback: AtomicBool::new(false),
            scripted_errors: Mutex::new(Vec::new()),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_needs_callback(&self, needs: bool) {
        self.needs_callback.store(needs, Ordering::SeqCst);
    }

    pub fn script_error(&self, error: AdapterError) {
        self.scripted_errors.lock().unwrap().push(error);
    }

    fn take_scripted_error(&self) -> Option<AdapterError> {
        let mut errors = self.scripted_errors.lock().unwrap();
        if errors.is_empty() { None } else { Some(errors.remove(0)) }
    }
}

impl Default for MockBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BridgeAdapter for MockBridge {
    fn bridge_type(&self) -> SupportedBridge {
        SupportedBridge::Mock
    }

    async fn received_amount(
        &self,
        amount: &Amount,
        _route: &Route,
    ) -> Result<Amount, AdapterError> {
        if let Some(error) = self.take_scripted_error() {
            return Err(error);
        }
        amount
            .min_received(self.fee_dbps)
            .map_err(|e| AdapterError::Quote(e.to_string()))
    }

    async fn send(
        &self,
        sender: &str,
        recipient: &str,
        amount: &Amount,
        route: &Route,
    ) -> Result<Vec<AdapterTransaction>, AdapterError> {
        if let Some(error) = self.take_scripted_error() {
            return Err(error);
        }
        if u64::from(self.fee_dbps) > DBPS_MULTIPLIER {
            return Err(AdapterError::Unsupported("fee exceeds whole amount".into()));
        }

        let approval = AdapterTransaction {
            memo: MemoType::Approval,
            transaction: TransactionRequest {
                chain_id: route.origin_chain,
                to: route.origin_asset.clone(),
                data: json!({
                    "method": "approve",
                    "spender": "0xmockbridge",
                    "amount": amount.to_string(),
                }),
                value: Amount::zero(),
                safe_module: None,
            },
        };

        let bridge_call = AdapterTransaction {
            memo: MemoType::Rebalance,
            transaction: TransactionRequest {
                chain_id: route.origin_chain,
                to: "0xmockbridge".into(),
                data: json!({
                    "method": "transfer",
                    "sender": sender,
                    "recipient": recipient,
                    "amount": amount.to_string(),
                    "destinationChain": route.destination_chain,
                    "asset": route.origin_asset,
                }),
                value: Amount::zero(),
                safe_module: None,
            },
        };

        Ok(vec![approval, bridge_call])
    }

    async fn ready_on_destination(
        &self,
        _amount: &Amount,
        _route: &Route,
        _origin_receipt: &NormalizedReceipt,
    ) -> Result<bool, AdapterError> {
        Ok(self.ready.load(Ordering::SeqCst))
    }

    async fn destination_callback(
        &self,
        route: &Route,
        origin_receipt: &NormalizedReceipt,
    ) -> Result<Option<TransactionRequest>, AdapterError> {
        if !self.needs_callback.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(TransactionRequest {
            chain_id: route.destination_chain,
            to: route.destination_asset.clone(),
            data: json!({
                "method": "mint",
                "originTxHash": origin_receipt.transaction_hash,
            }),
            value: Amount::zero(),
            safe_module: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::canonical;

    fn route() -> Route {
        Route {
            origin_chain: 10,
            destination_chain: 8453,
            ticker_hash: "0xusdc".into(),
            origin_asset: "0xa10".into(),
            destination_asset: "0xa8453".into(),
        }
    }

    fn receipt() -> NormalizedReceipt {
        NormalizedReceipt {
            transaction_hash: "0xorigin".into(),
            from: "0xmark".into(),
            to: "0xmockbridge".into(),
            effective_gas_price: None,
            status: Some(1),
            logs: Vec::new(),
            confirmations: Some(1),
        }
    }

    #[tokio::test]
    async fn test_quote_applies_fee() {
        let bridge = MockBridge::with_fee(100);
        let quote = bridge
            .received_amount(&canonical(100), &route())
            .await
            .unwrap();
        assert_eq!(quote.to_string(), "99990000000000000000");
    }

    #[tokio::test]
    async fn test_send_plan_order() {
        let bridge = MockBridge::new();
        let plan = bridge
            .send("0xmark", "0xmark", &canonical(10), &route())
            .await
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].memo, MemoType::Approval);
        assert_eq!(plan[1].memo, MemoType::Rebalance);
        assert_eq!(plan[1].transaction.chain_id, 10);
    }

    #[tokio::test]
    async fn test_scripted_errors_drain_in_order() {
        let bridge = MockBridge::new();
        bridge.script_error(AdapterError::Quote("thin".into()));

        assert!(bridge.received_amount(&canonical(1), &route()).await.is_err());
        assert!(bridge.received_amount(&canonical(1), &route()).await.is_ok());
    }

    #[tokio::test]
    async fn test_callback_toggle() {
        let bridge = MockBridge::new();
        assert!(
            bridge
                .destination_callback(&route(), &receipt())
                .await
                .unwrap()
                .is_none()
        );

        bridge.set_needs_callback(true);
        let tx = bridge
            .destination_callback(&route(), &receipt())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.chain_id, 8453);
    }
}
