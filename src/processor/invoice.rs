//! InvoiceEnqueued handler
//!
//! The purchase pipeline: fetch the invoice, validate it, consult the
//! purchase cache and earmarks, plan split intents against current balances
//! and custodied liquidity, and submit the intents. Every step that depends
//! on an external view fails soft with a retry so the at-least-once queue
//! can drive the invoice to a terminal outcome.

use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{EventHandler, HandlerOutcome};
use crate::amount::Amount;
use crate::balances::ticker_balances;
use crate::cache::PurchaseRecord;
use crate::chain::TransactionRequest;
use crate::config::AppConfig;
use crate::hub::{HubError, Invoice};
use crate::planner::{PlannerInput, plan_split_intents};
use crate::queue::{QueuedEvent, now_ms};
use crate::store::EarmarkStatus;

const RETRY_HUB_DOWN: Duration = Duration::from_secs(60);
const RETRY_PAUSED: Duration = Duration::from_secs(60);
const RETRY_SHORT: Duration = Duration::from_secs(10);

/// Validation verdict for an invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceValidation {
    Valid,
    /// Permanent: never purchasable.
    Invalid(String),
    /// Transient: will become valid (or expire) on its own; retry.
    Retry(String),
}

/// Validate invoice shape and age. The amount is a decimal string in the
/// wire schema and is parsed, never type-checked as a number.
pub fn is_valid_invoice(config: &AppConfig, invoice: &Invoice, now_secs: u64) -> InvoiceValidation {
    if invoice.id.trim().is_empty() {
        return InvoiceValidation::Invalid("empty invoice id".into());
    }
    if invoice.amount.is_zero() {
        return InvoiceValidation::Invalid("zero amount".into());
    }
    if invoice.destinations.is_empty() {
        return InvoiceValidation::Invalid("no destinations".into());
    }
    if invoice.owner.eq_ignore_ascii_case(&config.signer.address) {
        return InvoiceValidation::Invalid("own invoice".into());
    }

    // Ticker must be configured somewhere Mark operates.
    let known_ticker = config
        .chains
        .values()
        .any(|c| c.assets.iter().any(|a| a.ticker_hash.eq_ignore_ascii_case(&invoice.ticker_hash)));
    if !known_ticker {
        return InvoiceValidation::Invalid(format!("unknown ticker {}", invoice.ticker_hash));
    }

    let age = now_secs.saturating_sub(invoice.hub_invoice_enqueued_timestamp);
    if age > config.invoice_age_secs {
        return InvoiceValidation::Invalid(format!("invoice stale ({age}s old)"));
    }
    if age < config.min_invoice_age_secs {
        // InvalidAge: too young right now, purchasable shortly.
        return InvoiceValidation::Retry(format!("invoice too young ({age}s old)"));
    }

    InvoiceValidation::Valid
}

/// Whether every destination the invoice can settle on is XERC20-only.
pub fn xerc20_only_destinations(config: &AppConfig, invoice: &Invoice) -> bool {
    let mut saw_configured = false;
    for destination in &invoice.destinations {
        if let Some(asset) = config.asset(*destination, &invoice.ticker_hash) {
            saw_configured = true;
            if !asset.is_xerc20 {
                return false;
            }
        }
    }
    saw_configured
}

impl EventHandler {
    pub(super) async fn process_invoice_enqueued(&self, event: &QueuedEvent) -> HandlerOutcome {
        let invoice_id = event.id.as_str();

        // 1. Fetch the invoice; a 404 is a settlement signal.
        let invoice = match self.hub.fetch_invoice(invoice_id).await {
            Ok(invoice) => invoice,
            Err(HubError::NotFound(_)) => {
                return self.cleanup_stale_earmarks(invoice_id).await;
            }
            Err(e) => {
                return HandlerOutcome::failure(format!("fetch invoice: {e}"), RETRY_HUB_DOWN);
            }
        };

        // 2. Per-origin minimum amounts.
        let min_amounts = match self.hub.min_amounts(invoice_id).await {
            Ok(amounts) => amounts,
            Err(e) => {
                return HandlerOutcome::failure(format!("min amounts: {e}"), RETRY_HUB_DOWN);
            }
        };

        // 3. Purchase loop pause flag, re-read every event.
        match self.cache.is_paused().await {
            Ok(true) => return HandlerOutcome::failure("purchase loop paused", RETRY_PAUSED),
            Ok(false) => {}
            Err(e) => return HandlerOutcome::failure_backoff(format!("purchase cache: {e}")),
        }

        // 4. A pending earmark means bridged funds are still in flight;
        //    another cycle will retry once they land.
        let active_earmark = match self.earmarks.get_active_by_invoice(invoice_id).await {
            Ok(earmark) => earmark,
            Err(e) => return HandlerOutcome::failure_backoff(format!("earmark lookup: {e}")),
        };
        if let Some(earmark) = &active_earmark
            && earmark.status == EarmarkStatus::Pending
        {
            debug!(invoice_id, earmark_id = %earmark.id, "Earmark pending, deferring purchase");
            return HandlerOutcome::failure("earmark funds in flight", RETRY_SHORT);
        }

        // 5. Shape and age validation.
        match is_valid_invoice(&self.config, &invoice, now_ms() / 1000) {
            InvoiceValidation::Valid => {}
            InvoiceValidation::Invalid(reason) => return HandlerOutcome::Invalid(reason),
            InvoiceValidation::Retry(reason) => {
                return HandlerOutcome::failure(reason, RETRY_SHORT);
            }
        }

        // 6. XERC20-only destinations cannot be purchased against.
        if xerc20_only_destinations(&self.config, &invoice) {
            return HandlerOutcome::Invalid("all destinations are XERC20-only".into());
        }

        // 7. Outstanding purchase: nothing to do until settlement clears it.
        match self.cache.get(invoice_id).await {
            Ok(Some(_)) => {
                info!(
                    invoice_id,
                    metric = "pending_purchase_record",
                    "Purchase already outstanding"
                );
                return HandlerOutcome::Success;
            }
            Ok(None) => {}
            Err(e) => return HandlerOutcome::failure_backoff(format!("purchase cache: {e}")),
        }

        // 8. Plan split intents from current balances and custodied
        //    liquidity.
        let balances =
            match ticker_balances(&self.config, self.chain.as_ref(), &invoice.ticker_hash).await {
                Ok(balances) => balances,
                Err(e) => return HandlerOutcome::failure_backoff(format!("balance read: {e}")),
            };
        let custodied = match self.hub.economy_data().await {
            Ok(economy) => economy
                .custodied
                .get(&invoice.ticker_hash)
                .cloned()
                .unwrap_or_default(),
            Err(e) => return HandlerOutcome::failure_backoff(format!("economy data: {e}")),
        };

        let plan = plan_split_intents(&PlannerInput {
            invoice: &invoice,
            min_amounts: &min_amounts,
            balances: &balances,
            custodied: &custodied,
            supported_domains: &self.config.supported_settlement_domains,
            max_destinations: self.config.max_destinations,
            min_allocation: Amount::zero(),
        });
        let Some(plan) = plan else {
            debug!(invoice_id, "Planner produced no intents, retrying later");
            return HandlerOutcome::failure("no intents planned", RETRY_SHORT);
        };

        // 9. Submit every intent, then record the purchase fingerprint.
        match self.submit_intents(&invoice, &plan).await {
            Ok(()) => {}
            Err(outcome) => return outcome,
        }

        // A ready earmark is consumed by the purchase.
        if let Some(earmark) = active_earmark
            && earmark.status == EarmarkStatus::Ready
            && let Err(e) = self
                .earmarks
                .update_status_if(earmark.id, EarmarkStatus::Ready, EarmarkStatus::Completed)
                .await
        {
            warn!(invoice_id, error = %e, "Failed to complete earmark after purchase");
        }

        HandlerOutcome::Success
    }

    async fn submit_intents(
        &self,
        invoice: &Invoice,
        plan: &crate::planner::SplitIntentPlan,
    ) -> Result<(), HandlerOutcome> {
        let origin = plan.origin_domain;
        let spoke = self
            .config
            .chains
            .get(&origin)
            .map(|c| c.spoke.clone())
            .unwrap_or_default();

        let mut first_tx_hash: Option<String> = None;
        for (index, intent) in plan.intents.iter().enumerate() {
            let tx = TransactionRequest {
                chain_id: origin,
                to: spoke.clone(),
                data: json!({
                    "method": "newIntent",
                    "params": intent,
                }),
                value: Amount::zero(),
                safe_module: None,
            };

            match self.chain.submit_and_monitor(origin, &tx).await {
                Ok(receipt) => {
                    info!(
                        invoice_id = %invoice.id,
                        origin,
                        intent_index = index,
                        amount = %intent.amount,
                        tx_hash = %receipt.transaction_hash,
                        "Intent submitted"
                    );
                    first_tx_hash.get_or_insert(receipt.transaction_hash);
                }
                Err(e) if first_tx_hash.is_none() => {
                    return Err(HandlerOutcome::failure_backoff(format!(
                        "intent submission: {e}"
                    )));
                }
                Err(e) => {
                    // Part of the purchase landed; record what we submitted
                    // so retries do not double-purchase, and let the hub
                    // settle the partial offer.
                    warn!(
                        invoice_id = %invoice.id,
                        intent_index = index,
                        error = %e,
                        "Intent submission failed after partial success"
                    );
                    break;
                }
            }
        }

        let record = PurchaseRecord {
            invoice_id: invoice.id.clone(),
            target: origin,
            intent: serde_json::to_value(&plan.intents).unwrap_or_default(),
            transaction_hash: first_tx_hash.unwrap_or_default(),
            cached_at: now_ms(),
        };
        if let Err(e) = self.cache.save(&record).await {
            // The submission happened; losing the fingerprint risks a
            // duplicate purchase, so surface loudly but do not retry the
            // whole event.
            warn!(invoice_id = %invoice.id, error = %e, "Failed to cache purchase record");
        }

        Ok(())
    }

    /// Hub 404: the invoice settled and was pruned. Propagate the settlement
    /// signal and expire any earmark still reserved for it.
    async fn cleanup_stale_earmarks(&self, invoice_id: &str) -> HandlerOutcome {
        info!(invoice_id, "Invoice gone from hub, cleaning up");

        if let Err(e) = self.queue.add_settled_invoice(invoice_id).await {
            return HandlerOutcome::failure_backoff(format!("settled marker: {e}"));
        }
        let settlement = QueuedEvent::minimal_settlement(invoice_id, now_ms());
        if let Err(e) = self.queue.enqueue(&settlement, false).await {
            return HandlerOutcome::failure_backoff(format!("enqueue settlement: {e}"));
        }

        match self.earmarks.get_active_by_invoice(invoice_id).await {
            Ok(Some(earmark)) => {
                let expired = self
                    .earmarks
                    .update_status_if(earmark.id, earmark.status, EarmarkStatus::Expired)
                    .await;
                match expired {
                    Ok(true) => {
                        info!(invoice_id, earmark_id = %earmark.id, "Stale earmark expired");
                    }
                    Ok(false) => {}
                    Err(e) => {
                        return HandlerOutcome::failure_backoff(format!("expire earmark: {e}"));
                    }
                }
            }
            Ok(None) => {}
            Err(e) => return HandlerOutcome::failure_backoff(format!("earmark lookup: {e}")),
        }

        HandlerOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::canonical;

    fn config() -> AppConfig {
        serde_yaml::from_str(
            r#"
database_url: "postgres://localhost/mark_test"
everclear_api_url: "http://localhost:3000"
signer:
  address: "0xmark"
invoice_age_secs: 3600
min_invoice_age_secs: 10
chains:
  10:
    assets:
      - symbol: "USDC"
        ticker_hash: "0xusdc"
        address: "0xa10"
        decimals: 6
  8453:
    assets:
      - symbol: "USDC"
        ticker_hash: "0xusdc"
        address: "0xa8453"
        decimals: 6
      - symbol: "XTOKEN"
        ticker_hash: "0xxtoken"
        address: "0xx8453"
        decimals: 18
        is_xerc20: true
"#,
        )
        .unwrap()
    }

    fn invoice(age_secs: u64) -> Invoice {
        let now = 1_700_000_000u64;
        Invoice {
            id: "0xinvoice".into(),
            ticker_hash: "0xusdc".into(),
            amount: canonical(100),
            destinations: vec![10],
            origin: None,
            owner: "0xowner".into(),
            hub_invoice_enqueued_timestamp: now - age_secs,
            tx_nonce: 1,
        }
    }

    const NOW: u64 = 1_700_000_000;

    #[test]
    fn test_valid_invoice() {
        assert_eq!(
            is_valid_invoice(&config(), &invoice(60), NOW),
            InvoiceValidation::Valid
        );
    }

    #[test]
    fn test_shape_failures_are_permanent() {
        let config = config();

        let mut no_destinations = invoice(60);
        no_destinations.destinations.clear();
        assert!(matches!(
            is_valid_invoice(&config, &no_destinations, NOW),
            InvoiceValidation::Invalid(_)
        ));

        let mut zero_amount = invoice(60);
        zero_amount.amount = Amount::zero();
        assert!(matches!(
            is_valid_invoice(&config, &zero_amount, NOW),
            InvoiceValidation::Invalid(_)
        ));

        let mut unknown_ticker = invoice(60);
        unknown_ticker.ticker_hash = "0xshitcoin".into();
        assert!(matches!(
            is_valid_invoice(&config, &unknown_ticker, NOW),
            InvoiceValidation::Invalid(_)
        ));

        let mut own = invoice(60);
        own.owner = "0xMARK".into();
        assert!(matches!(
            is_valid_invoice(&config, &own, NOW),
            InvoiceValidation::Invalid(_)
        ));
    }

    #[test]
    fn test_age_bounds() {
        let config = config();

        // too young: transient
        assert!(matches!(
            is_valid_invoice(&config, &invoice(3), NOW),
            InvoiceValidation::Retry(_)
        ));

        // too old: permanent
        assert!(matches!(
            is_valid_invoice(&config, &invoice(7200), NOW),
            InvoiceValidation::Invalid(_)
        ));
    }

    #[test]
    fn test_xerc20_only_detection() {
        let config = config();

        let mut xerc20 = invoice(60);
        xerc20.ticker_hash = "0xxtoken".into();
        xerc20.destinations = vec![8453];
        assert!(xerc20_only_destinations(&config, &xerc20));

        // USDC on 8453 is a normal deployment
        let normal = invoice(60);
        assert!(!xerc20_only_destinations(&config, &normal));

        // no configured destination at all: not provably XERC20-only
        let mut unconfigured = invoice(60);
        unconfigured.destinations = vec![1];
        assert!(!xerc20_only_destinations(&config, &unconfigured));
    }
}
