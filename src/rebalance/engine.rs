//! Engine core: tick orchestration and bridge-leg execution.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::RebalanceError;
use crate::adapters::{AdapterRegistry, MemoType, Route, SupportedBridge};
use crate::amount::{Amount, CANONICAL_DECIMALS};
use crate::chain::ChainService;
use crate::config::AppConfig;
use crate::hub::HubClient;
use crate::receipt::NormalizedReceipt;
use crate::store::{
    EarmarkStore, OperationStore, PauseKey, PauseStore, RebalanceOperation, TransactionEntry,
};
use uuid::Uuid;

pub struct RebalanceEngine {
    pub(super) config: Arc<AppConfig>,
    pub(super) earmarks: Arc<EarmarkStore>,
    pub(super) operations: Arc<OperationStore>,
    pub(super) pause: Arc<PauseStore>,
    pub(super) registry: Arc<AdapterRegistry>,
    pub(super) chain: Arc<dyn ChainService>,
    pub(super) hub: Arc<dyn HubClient>,
    /// Held for the duration of a tick; a tick arriving while the previous
    /// one still runs is skipped, not queued.
    tick_lock: tokio::sync::Mutex<()>,
}

impl RebalanceEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<AppConfig>,
        earmarks: Arc<EarmarkStore>,
        operations: Arc<OperationStore>,
        pause: Arc<PauseStore>,
        registry: Arc<AdapterRegistry>,
        chain: Arc<dyn ChainService>,
        hub: Arc<dyn HubClient>,
    ) -> Self {
        Self {
            config,
            earmarks,
            operations,
            pause,
            registry,
            chain,
            hub,
            tick_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run the periodic ticker until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.tick_interval_secs);
        info!(interval_secs = interval.as_secs(), "Starting rebalance engine");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Rebalance engine shutting down");
                        return;
                    }
                }
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "Rebalance tick failed");
            }
        }
    }

    /// One tick: callbacks, then on-demand, then threshold. Pause flags are
    /// re-read from the store every tick.
    pub async fn tick(&self) -> Result<(), RebalanceError> {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            warn!("Previous rebalance tick still running, skipping this tick");
            return Ok(());
        };

        self.run_callbacks().await?;
        self.expire_stale_earmarks().await?;

        if self.pause.is_paused(PauseKey::Ondemand).await? {
            info!("On-demand rebalancing paused, skipping phase");
        } else {
            self.run_ondemand().await?;
        }

        if self.pause.is_paused(PauseKey::Rebalance).await? {
            info!("Threshold rebalancing paused, skipping phase");
        } else {
            self.run_threshold().await?;
        }

        Ok(())
    }

    /// Pending earmarks past their TTL expire; their live operations are
    /// orphaned and keep running so bridged funds are not stranded.
    pub(super) async fn expire_stale_earmarks(&self) -> Result<(), RebalanceError> {
        let ttl = ChronoDuration::seconds(self.config.rebalance.earmark_ttl_secs as i64);
        let expired = self.earmarks.expire_older_than(Utc::now() - ttl).await?;
        for id in &expired {
            warn!(earmark_id = %id, "Earmark expired");
        }
        Ok(())
    }

    /// One-off transfer for the admin `send` trigger. Same path as the
    /// engine's own legs, standalone operation.
    pub async fn manual_transfer(
        &self,
        bridge: SupportedBridge,
        slippage_dbps: u32,
        origin_chain: u64,
        destination_chain: u64,
        ticker_hash: &str,
        amount: &Amount,
    ) -> Result<RebalanceOperation, RebalanceError> {
        let route = self.runtime_route(origin_chain, destination_chain, ticker_hash)?;
        self.execute_bridge_transfer(bridge, slippage_dbps, &route, amount, None)
            .await
    }

    /// Same-chain conversion for the admin `swap` trigger, executed through
    /// a CEX-style adapter.
    pub async fn manual_swap(
        &self,
        bridge: SupportedBridge,
        slippage_dbps: u32,
        chain_id: u64,
        from_ticker: &str,
        to_ticker: &str,
        amount: &Amount,
    ) -> Result<RebalanceOperation, RebalanceError> {
        let from_asset =
            self.config
                .asset(chain_id, from_ticker)
                .ok_or_else(|| RebalanceError::UnknownAsset {
                    chain_id,
                    ticker_hash: from_ticker.to_string(),
                })?;
        let to_asset =
            self.config
                .asset(chain_id, to_ticker)
                .ok_or_else(|| RebalanceError::UnknownAsset {
                    chain_id,
                    ticker_hash: to_ticker.to_string(),
                })?;

        let route = Route {
            origin_chain: chain_id,
            destination_chain: chain_id,
            // decimals resolve through the asset being sold
            ticker_hash: from_ticker.to_string(),
            origin_asset: from_asset.address.clone(),
            destination_asset: to_asset.address.clone(),
        };
        self.execute_bridge_transfer(bridge, slippage_dbps, &route, amount, None)
            .await
    }

    /// Build the runtime route (with asset addresses) for a lane.
    pub(super) fn runtime_route(
        &self,
        origin_chain: u64,
        destination_chain: u64,
        ticker_hash: &str,
    ) -> Result<Route, RebalanceError> {
        let origin_asset =
            self.config
                .asset(origin_chain, ticker_hash)
                .ok_or_else(|| RebalanceError::UnknownAsset {
                    chain_id: origin_chain,
                    ticker_hash: ticker_hash.to_string(),
                })?;
        let destination_asset = self
            .config
            .asset(destination_chain, ticker_hash)
            .ok_or_else(|| RebalanceError::UnknownAsset {
                chain_id: destination_chain,
                ticker_hash: ticker_hash.to_string(),
            })?;

        Ok(Route {
            origin_chain,
            destination_chain,
            ticker_hash: ticker_hash.to_string(),
            origin_asset: origin_asset.address.clone(),
            destination_asset: destination_asset.address.clone(),
        })
    }

    /// Quote, build and submit one bridge leg, then persist the operation.
    ///
    /// `amount` is canonical; the adapter sees origin-native units. The
    /// operation is persisted only after the origin submission succeeds, with
    /// the bridge-call receipt recorded under the origin chain id.
    pub(super) async fn execute_bridge_transfer(
        &self,
        bridge: SupportedBridge,
        slippage_dbps: u32,
        route: &Route,
        amount: &Amount,
        earmark_id: Option<Uuid>,
    ) -> Result<RebalanceOperation, RebalanceError> {
        let adapter = self.registry.get(bridge)?;

        let origin_decimals = self
            .config
            .asset_decimals(route.origin_chain, &route.ticker_hash);
        let native = amount.rescale(CANONICAL_DECIMALS, origin_decimals);

        if let Some(minimum) = adapter.minimum_amount(route).await?
            && native < minimum
        {
            return Err(RebalanceError::BelowBridgeMinimum {
                amount: native,
                minimum,
            });
        }

        let quote = adapter.received_amount(&native, route).await?;
        let floor = native.min_received(slippage_dbps)?;
        if quote < floor {
            return Err(RebalanceError::SlippageRejected { quote, floor });
        }

        let sender = self.config.signer.address.clone();
        let plan = adapter.send(&sender, &sender, &native, route).await?;

        let mut operation = RebalanceOperation::new(
            earmark_id,
            route.origin_chain,
            route.destination_chain,
            route.ticker_hash.clone(),
            amount.clone(),
            slippage_dbps,
            bridge,
            sender,
        );

        // Approvals, then the bridge call; the last non-approval receipt is
        // the origin transfer.
        for adapter_tx in &plan {
            let receipt = self
                .chain
                .submit_and_monitor(adapter_tx.transaction.chain_id, &adapter_tx.transaction)
                .await?;
            info!(
                bridge = %bridge,
                chain_id = adapter_tx.transaction.chain_id,
                tx_hash = %receipt.transaction_hash,
                memo = ?adapter_tx.memo,
                "Submitted bridge leg transaction"
            );
            if adapter_tx.memo != MemoType::Approval {
                operation.transactions.insert(
                    adapter_tx.transaction.chain_id,
                    entry_from_receipt(&receipt, adapter_tx.memo),
                );
            }
        }

        self.operations.create(&operation).await?;
        info!(
            operation_id = %operation.id,
            origin = route.origin_chain,
            destination = route.destination_chain,
            amount = %amount,
            bridge = %bridge,
            "Rebalance operation created"
        );

        Ok(operation)
    }
}

/// Receipt metadata persisted into the operation's transactions map.
pub(super) fn entry_from_receipt(receipt: &NormalizedReceipt, memo: MemoType) -> TransactionEntry {
    TransactionEntry {
        hash: receipt.transaction_hash.clone(),
        from: receipt.from.clone(),
        to: receipt.to.clone(),
        memo,
        effective_gas_price: receipt.effective_gas_price.clone(),
        submitted_at: Utc::now(),
    }
}

/// Rebuild the origin receipt an adapter expects from the persisted entry.
pub(super) fn receipt_from_entry(entry: &TransactionEntry) -> NormalizedReceipt {
    NormalizedReceipt {
        transaction_hash: entry.hash.clone(),
        from: entry.from.clone(),
        to: entry.to.clone(),
        effective_gas_price: entry.effective_gas_price.clone(),
        status: Some(1),
        logs: Vec::new(),
        confirmations: None,
    }
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;
    use crate::adapters::mock::MockBridge;
    use crate::amount::canonical;
    use crate::chain::testing::MockChainService;
    use crate::hub::Invoice;
    use crate::hub::testing::MockHub;
    use crate::store::{EarmarkStatus, OperationStatus, ensure_schema};
    use sqlx::postgres::PgPoolOptions;
    use std::collections::BTreeMap;

    const BASE_CONFIG_YAML: &str = r#"
database_url: "postgres://localhost/mark_test"
everclear_api_url: "http://localhost:3000"
signer:
  address: "0xmark"
supported_settlement_domains: [10, 8453]
rebalance:
  min_rebalance_amount: "50000000000000000000"
chains:
  10:
    spoke: "0xspoke10"
    assets:
      - symbol: "USDT"
        ticker_hash: "0xusdt"
        address: "0xa10"
        decimals: 6
  8453:
    spoke: "0xspoke8453"
    assets:
      - symbol: "USDT"
        ticker_hash: "0xusdt"
        address: "0xa8453"
        decimals: 6
routes:
  - origin: 10
    destination: 8453
    ticker_hash: "0xusdt"
    preferences:
      - bridge: "mock"
        slippage_dbps: 500
"#;

    /// Tests share the database, so each harness works a ticker of its own:
    /// a concurrently running engine skips foreign-ticker operations instead
    /// of advancing them.
    pub(in crate::rebalance) fn unique_ticker() -> String {
        format!("0xusdt{}", Uuid::new_v4().simple())
    }

    pub(in crate::rebalance) fn test_config(ticker: &str) -> AppConfig {
        serde_yaml::from_str(&BASE_CONFIG_YAML.replace("0xusdt", ticker)).unwrap()
    }

    pub(in crate::rebalance) struct TestHarness {
        pub engine: RebalanceEngine,
        pub chain: Arc<MockChainService>,
        pub hub: Arc<MockHub>,
        pub bridge: Arc<MockBridge>,
        pub earmarks: Arc<EarmarkStore>,
        pub operations: Arc<OperationStore>,
        pub ticker: String,
    }

    pub(in crate::rebalance) async fn harness() -> Option<TestHarness> {
        let ticker = unique_ticker();
        harness_with_config(test_config(&ticker), ticker).await
    }

    pub(in crate::rebalance) async fn harness_with_config(
        config: AppConfig,
        ticker: String,
    ) -> Option<TestHarness> {
        let database_url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(&database_url)
            .await
            .ok()?;
        ensure_schema(&pool).await.ok()?;

        let earmarks = Arc::new(EarmarkStore::new(pool.clone()));
        let operations = Arc::new(OperationStore::new(pool.clone()));
        let pause = Arc::new(PauseStore::new(pool));

        let chain = Arc::new(MockChainService::new());
        let hub = Arc::new(MockHub::new());
        let bridge = Arc::new(MockBridge::with_fee(10));

        let mut registry = AdapterRegistry::new();
        registry.register(bridge.clone());

        let engine = RebalanceEngine::new(
            Arc::new(config),
            earmarks.clone(),
            operations.clone(),
            pause.clone(),
            Arc::new(registry),
            chain.clone(),
            hub.clone(),
        );

        // tests assume unpaused flags
        pause.set_paused(PauseKey::Ondemand, false).await.ok()?;
        pause.set_paused(PauseKey::Rebalance, false).await.ok()?;

        Some(TestHarness {
            engine,
            chain,
            hub,
            bridge,
            earmarks,
            operations,
            ticker,
        })
    }

    pub(in crate::rebalance) fn usdt_invoice(ticker: &str, id: &str, amount: Amount) -> Invoice {
        Invoice {
            id: id.to_string(),
            ticker_hash: ticker.to_string(),
            amount,
            destinations: vec![8453],
            origin: None,
            owner: "0xowner".into(),
            hub_invoice_enqueued_timestamp: 1_700_000_000,
            tx_nonce: 1,
        }
    }

    #[tokio::test]
    async fn test_on_demand_rebalance_end_to_end() {
        let Some(h) = harness().await else {
            eprintln!("Skipping test - database not available");
            return;
        };

        // Invoice for 100 USDT to chain 8453; destination balance 0, origin
        // balance 250 on chain 10; shortfall 100 above the 50 minimum.
        let invoice_id = format!("0xinv-{}", Uuid::new_v4());
        h.hub
            .insert_invoice(usdt_invoice(&h.ticker, &invoice_id, canonical(100)));
        let mut min_amounts = BTreeMap::new();
        min_amounts.insert(8453u64, canonical(100));
        h.hub.set_min_amounts(&invoice_id, min_amounts);

        // 250 USDT in 6-decimal native units on the origin
        h.chain.set_balance(10, "0xa10", Amount::from(250_000_000u64));

        // Tick 1: phase B creates the earmark and submits the bridge leg.
        h.engine.tick().await.unwrap();

        let earmark = h
            .earmarks
            .get_active_by_invoice(&invoice_id)
            .await
            .unwrap()
            .expect("earmark created");
        assert_eq!(earmark.status, EarmarkStatus::Pending);
        assert_eq!(earmark.min_amount, canonical(100));
        assert_eq!(earmark.designated_purchase_chain, 8453);

        let ops = h.operations.list_by_earmark(earmark.id).await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].status, OperationStatus::Pending);
        assert!(ops[0].origin_transaction().is_some());
        // approval + bridge call
        assert_eq!(h.chain.submission_count(), 2);

        // Tick 2: callbacks observe destination readiness, complete the
        // operation and mark the earmark ready.
        h.engine.tick().await.unwrap();

        let ops = h.operations.list_by_earmark(earmark.id).await.unwrap();
        assert_eq!(ops[0].status, OperationStatus::Completed);
        let earmark = h.earmarks.get(earmark.id).await.unwrap().unwrap();
        assert_eq!(earmark.status, EarmarkStatus::Ready);
    }

    #[tokio::test]
    async fn test_admin_cancel_orphans_but_keeps_driving() {
        let Some(h) = harness().await else {
            eprintln!("Skipping test - database not available");
            return;
        };

        let invoice_id = format!("0xinv-{}", Uuid::new_v4());
        let earmark = crate::store::Earmark::new(invoice_id, 8453, h.ticker.clone(), canonical(100));
        h.earmarks.create(&earmark).await.unwrap();

        for _ in 0..2 {
            let mut op = RebalanceOperation::new(
                Some(earmark.id),
                10,
                8453,
                h.ticker.clone(),
                canonical(50),
                500,
                SupportedBridge::Mock,
                "0xmark",
            );
            op.transactions.insert(
                10,
                TransactionEntry {
                    hash: "0xorigin".into(),
                    from: "0xmark".into(),
                    to: "0xmockbridge".into(),
                    memo: MemoType::Rebalance,
                    effective_gas_price: None,
                    submitted_at: Utc::now(),
                },
            );
            h.operations.create(&op).await.unwrap();
        }

        // Admin cancels mid-flight: earmark cancelled, operations orphaned
        // but still pending.
        assert!(h.earmarks.cancel(earmark.id).await.unwrap());
        let ops = h.operations.list_by_earmark(earmark.id).await.unwrap();
        assert_eq!(ops.len(), 2);
        for op in &ops {
            assert_eq!(op.status, OperationStatus::Pending);
            assert!(op.is_orphaned);
        }

        // Subsequent ticks still advance the orphans to completion, but the
        // cancelled earmark never becomes ready.
        h.engine.tick().await.unwrap();
        let ops = h.operations.list_by_earmark(earmark.id).await.unwrap();
        for op in &ops {
            assert_eq!(op.status, OperationStatus::Completed);
        }
        let earmark = h.earmarks.get(earmark.id).await.unwrap().unwrap();
        assert_eq!(earmark.status, EarmarkStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_slippage_rejection_fails_earmark() {
        let Some(h) = harness().await else {
            eprintln!("Skipping test - database not available");
            return;
        };

        let invoice_id = format!("0xinv-{}", Uuid::new_v4());
        h.hub
            .insert_invoice(usdt_invoice(&h.ticker, &invoice_id, canonical(100)));
        h.chain.set_balance(10, "0xa10", Amount::from(250_000_000u64));

        // Quote collapses below the slippage floor.
        h.bridge
            .script_error(crate::adapters::AdapterError::Quote("thin book".into()));

        h.engine.tick().await.unwrap();

        // The earmark was created first, then failed when no preference
        // produced an acceptable quote.
        let earmark = h
            .earmarks
            .list(&crate::store::EarmarkFilter {
                invoice_id: Some(invoice_id.clone()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(earmark.len(), 1);
        assert_eq!(earmark[0].status, EarmarkStatus::Failed);
        assert_eq!(h.chain.submission_count(), 0);
    }
}
