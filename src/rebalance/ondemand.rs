//! Phase B — on-demand rebalancing
//!
//! For each open invoice destined to a chain Mark monitors, bridge the
//! shortfall between what the purchase needs and what the destination
//! already holds. Funds committed earlier in the same tick are tracked so
//! two invoices cannot spend the same origin balance.

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use super::RebalanceError;
use super::engine::RebalanceEngine;
use crate::amount::Amount;
use crate::balances::chain_balance;
use crate::hub::Invoice;
use crate::store::{Earmark, EarmarkStatus, StoreError};

/// Origin funds already claimed by earlier invoices in this tick, keyed by
/// (chain, ticker). Scoped to one tick, never shared.
type CommittedMap = FxHashMap<(u64, String), Amount>;

impl RebalanceEngine {
    pub(super) async fn run_ondemand(&self) -> Result<(), RebalanceError> {
        let page = self.hub.fetch_invoices_by_tx_nonce(None, 100).await?;
        let mut committed: CommittedMap = CommittedMap::default();

        for invoice in &page.invoices {
            if let Err(e) = self.consider_invoice(invoice, &mut committed).await {
                warn!(
                    invoice_id = %invoice.id,
                    error = %e,
                    "On-demand rebalance attempt failed"
                );
            }
        }
        Ok(())
    }

    async fn consider_invoice(
        &self,
        invoice: &Invoice,
        committed: &mut CommittedMap,
    ) -> Result<(), RebalanceError> {
        // Only destinations Mark actually operates on.
        let Some(&destination) = invoice
            .destinations
            .iter()
            .find(|d| self.config.chains.contains_key(*d))
        else {
            return Ok(());
        };

        if self
            .earmarks
            .get_active_by_invoice(&invoice.id)
            .await?
            .is_some()
        {
            debug!(invoice_id = %invoice.id, "Active earmark exists, skipping");
            return Ok(());
        }

        let min_amounts = self.hub.min_amounts(&invoice.id).await.unwrap_or_default();
        let intent_amount = min_amounts.get(&destination).unwrap_or(&invoice.amount);

        let destination_balance = chain_balance(
            &self.config,
            self.chain.as_ref(),
            destination,
            &invoice.ticker_hash,
        )
        .await?;

        let shortfall = intent_amount.saturating_sub(&destination_balance);
        if shortfall.is_zero() {
            debug!(invoice_id = %invoice.id, "Destination already funded, skipping");
            return Ok(());
        }
        if shortfall < self.config.rebalance.min_rebalance_amount {
            debug!(
                invoice_id = %invoice.id,
                shortfall = %shortfall,
                "Shortfall below rebalance minimum, skipping"
            );
            return Ok(());
        }

        // Candidate lanes into the destination, in operator preference order.
        let routes: Vec<crate::config::RouteConfig> = self
            .config
            .find_routes(None, destination, &invoice.ticker_hash)
            .into_iter()
            .cloned()
            .collect();

        for route_config in routes {
            let committed_key = (route_config.origin, invoice.ticker_hash.clone());
            let already_committed = committed
                .get(&committed_key)
                .cloned()
                .unwrap_or_else(Amount::zero);

            let origin_balance = chain_balance(
                &self.config,
                self.chain.as_ref(),
                route_config.origin,
                &invoice.ticker_hash,
            )
            .await?;
            let available = origin_balance.saturating_sub(&already_committed);
            if available < self.config.rebalance.min_rebalance_amount {
                debug!(
                    origin = route_config.origin,
                    available = %available,
                    "Origin lacks spendable balance, trying next route"
                );
                continue;
            }

            let amount = shortfall.min(available);

            // Earmark row exists before any of its operations. A unique
            // violation means another worker won this invoice.
            let earmark = Earmark::new(
                invoice.id.clone(),
                destination,
                invoice.ticker_hash.clone(),
                amount.clone(),
            );
            match self.earmarks.create(&earmark).await {
                Ok(()) => {}
                Err(StoreError::DuplicateEarmark(_)) => {
                    debug!(invoice_id = %invoice.id, "Lost earmark race, skipping");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
            info!(
                earmark_id = %earmark.id,
                invoice_id = %invoice.id,
                amount = %amount,
                destination,
                "Earmark created"
            );

            // First hop ends at the intermediate chain for two-leg routes.
            let leg_destination = route_config.via.unwrap_or(route_config.destination);
            let route =
                self.runtime_route(route_config.origin, leg_destination, &invoice.ticker_hash)?;

            for preference in &route_config.preferences {
                match self
                    .execute_bridge_transfer(
                        preference.bridge,
                        preference.slippage_dbps,
                        &route,
                        &amount,
                        Some(earmark.id),
                    )
                    .await
                {
                    Ok(_) => {
                        committed.insert(committed_key, already_committed.checked_add(&amount));
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(
                            invoice_id = %invoice.id,
                            bridge = %preference.bridge,
                            error = %e,
                            "Bridge preference failed, trying next"
                        );
                    }
                }
            }

            // No preference produced an acceptable transfer; release the
            // invoice by failing the earmark so a later tick can retry.
            self.earmarks
                .update_status_if(earmark.id, EarmarkStatus::Pending, EarmarkStatus::Failed)
                .await?;
            warn!(
                earmark_id = %earmark.id,
                invoice_id = %invoice.id,
                "No bridge preference succeeded, earmark failed"
            );
            return Ok(());
        }

        Ok(())
    }
}
