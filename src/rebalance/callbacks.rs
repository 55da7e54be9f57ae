//! Phase A — callbacks
//!
//! Drives every live operation forward: pending operations whose transfer is
//! ready on the destination advance to awaiting_callback; awaiting
//! operations run the adapter's destination finaliser and complete. Earmark
//! bookkeeping (next legs, readiness) happens on completion.

use tracing::{error, info, warn};

use super::RebalanceError;
use super::engine::{RebalanceEngine, entry_from_receipt, receipt_from_entry};
use crate::adapters::MemoType;
use crate::amount::CANONICAL_DECIMALS;
use crate::store::{EarmarkStatus, OperationStatus, RebalanceOperation};

impl RebalanceEngine {
    /// Advance every operation in {pending, awaiting_callback}. Individual
    /// failures are contained: a transient error leaves the operation
    /// untouched for the next tick, a permanent one cancels it.
    pub(super) async fn run_callbacks(&self) -> Result<(), RebalanceError> {
        let live = self.operations.live().await?;
        for operation in live {
            match self.advance_operation(&operation).await {
                Ok(()) => {}
                Err(e) if e.is_permanent() => {
                    error!(
                        operation_id = %operation.id,
                        error = %e,
                        "Permanent adapter failure, cancelling operation"
                    );
                    self.operations
                        .update_status_if(operation.id, operation.status, OperationStatus::Cancelled)
                        .await?;
                }
                Err(e) => {
                    warn!(
                        operation_id = %operation.id,
                        error = %e,
                        "Callback processing failed, will retry next tick"
                    );
                }
            }
        }
        Ok(())
    }

    async fn advance_operation(&self, operation: &RebalanceOperation) -> Result<(), RebalanceError> {
        let adapter = self.registry.get(operation.bridge)?;
        let route = self.runtime_route(
            operation.origin_chain_id,
            operation.destination_chain_id,
            &operation.ticker_hash,
        )?;

        let Some(origin_entry) = operation.origin_transaction() else {
            // No origin receipt means the submission never landed; nothing to
            // poll, the next on-demand/threshold pass re-attempts the lane.
            warn!(
                operation_id = %operation.id,
                "Operation has no origin transaction, skipping"
            );
            return Ok(());
        };
        let origin_receipt = receipt_from_entry(origin_entry);

        let origin_decimals = self
            .config
            .asset_decimals(operation.origin_chain_id, &operation.ticker_hash);
        let native_amount = operation
            .amount
            .rescale(CANONICAL_DECIMALS, origin_decimals);

        match operation.status {
            OperationStatus::Pending => {
                if adapter
                    .ready_on_destination(&native_amount, &route, &origin_receipt)
                    .await?
                    && self
                        .operations
                        .update_status_if(
                            operation.id,
                            OperationStatus::Pending,
                            OperationStatus::AwaitingCallback,
                        )
                        .await?
                {
                    info!(operation_id = %operation.id, "Operation ready on destination");
                    self.finalize_operation(operation, &route, &origin_receipt)
                        .await?;
                }
            }
            OperationStatus::AwaitingCallback => {
                self.finalize_operation(operation, &route, &origin_receipt)
                    .await?;
            }
            _ => {}
        }

        Ok(())
    }

    /// Run the destination callback (if the bridge has one), record its
    /// receipt, and complete the operation.
    async fn finalize_operation(
        &self,
        operation: &RebalanceOperation,
        route: &crate::adapters::Route,
        origin_receipt: &crate::receipt::NormalizedReceipt,
    ) -> Result<(), RebalanceError> {
        let adapter = self.registry.get(operation.bridge)?;

        if let Some(callback_tx) = adapter.destination_callback(route, origin_receipt).await? {
            let receipt = self
                .chain
                .submit_and_monitor(operation.destination_chain_id, &callback_tx)
                .await?;
            info!(
                operation_id = %operation.id,
                tx_hash = %receipt.transaction_hash,
                "Submitted destination callback"
            );
            self.operations
                .record_transaction(
                    operation.id,
                    operation.destination_chain_id,
                    &entry_from_receipt(&receipt, MemoType::Mint),
                )
                .await?;
        }

        if self
            .operations
            .update_status_if(
                operation.id,
                OperationStatus::AwaitingCallback,
                OperationStatus::Completed,
            )
            .await?
        {
            info!(operation_id = %operation.id, "Operation completed");
            self.on_operation_completed(operation).await?;
        }

        Ok(())
    }

    /// Earmark bookkeeping after a leg completes: spawn the next leg when the
    /// funds landed on an intermediate chain, otherwise mark the earmark
    /// ready once every leg has delivered. Orphaned operations complete
    /// without touching their (cancelled) earmark.
    async fn on_operation_completed(
        &self,
        operation: &RebalanceOperation,
    ) -> Result<(), RebalanceError> {
        let Some(earmark_id) = operation.earmark_id else {
            return Ok(());
        };
        let Some(earmark) = self.earmarks.get(earmark_id).await? else {
            return Ok(());
        };

        if operation.destination_chain_id != earmark.designated_purchase_chain {
            // Intermediate leg landed; create the next hop toward the
            // designated purchase chain.
            self.create_next_leg(operation, &earmark).await?;
            return Ok(());
        }

        if operation.is_orphaned || earmark.status != EarmarkStatus::Pending {
            return Ok(());
        }

        let legs = self.operations.list_by_earmark(earmark_id).await?;
        let all_delivered = legs
            .iter()
            .all(|leg| leg.status == OperationStatus::Completed);
        if all_delivered
            && self
                .earmarks
                .update_status_if(earmark_id, EarmarkStatus::Pending, EarmarkStatus::Ready)
                .await?
        {
            info!(
                earmark_id = %earmark_id,
                invoice_id = %earmark.invoice_id,
                "Earmark ready: all legs delivered"
            );
        }

        Ok(())
    }

    async fn create_next_leg(
        &self,
        operation: &RebalanceOperation,
        earmark: &crate::store::Earmark,
    ) -> Result<(), RebalanceError> {
        let hop_origin = operation.destination_chain_id;
        let routes = self.config.find_routes(
            Some(hop_origin),
            earmark.designated_purchase_chain,
            &operation.ticker_hash,
        );
        let Some(route_config) = routes.first() else {
            error!(
                operation_id = %operation.id,
                origin = hop_origin,
                destination = earmark.designated_purchase_chain,
                "No route configured for the next leg"
            );
            return Err(RebalanceError::NoRoute {
                origin: Some(hop_origin),
                destination: earmark.designated_purchase_chain,
                ticker_hash: operation.ticker_hash.clone(),
            });
        };

        let route = self.runtime_route(
            hop_origin,
            earmark.designated_purchase_chain,
            &operation.ticker_hash,
        )?;

        for preference in &route_config.preferences {
            match self
                .execute_bridge_transfer(
                    preference.bridge,
                    preference.slippage_dbps,
                    &route,
                    &operation.amount,
                    Some(earmark.id),
                )
                .await
            {
                Ok(next) => {
                    info!(
                        operation_id = %operation.id,
                        next_operation_id = %next.id,
                        "Created next leg"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        bridge = %preference.bridge,
                        error = %e,
                        "Next-leg bridge preference failed, trying next"
                    );
                }
            }
        }

        // All preferences refused; the next tick's callback pass retries
        // because the earmark still has a non-final completed leg.
        Ok(())
    }
}
