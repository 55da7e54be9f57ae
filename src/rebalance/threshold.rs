//! Phase C — threshold rebalancing
//!
//! Maintenance lanes with a configured `maximum` drain overweight origin
//! chains down to their reserve. Standalone operations, no earmark.

use tracing::{debug, info, warn};

use super::RebalanceError;
use super::engine::RebalanceEngine;
use crate::balances::chain_balance;
use crate::config::RouteConfig;

impl RebalanceEngine {
    pub(super) async fn run_threshold(&self) -> Result<(), RebalanceError> {
        let routes: Vec<RouteConfig> = self
            .config
            .routes
            .iter()
            .filter(|r| r.maximum.is_some())
            .cloned()
            .collect();

        for route_config in routes {
            if let Err(e) = self.consider_route(&route_config).await {
                warn!(
                    origin = route_config.origin,
                    destination = route_config.destination,
                    error = %e,
                    "Threshold rebalance attempt failed"
                );
            }
        }
        Ok(())
    }

    async fn consider_route(&self, route_config: &RouteConfig) -> Result<(), RebalanceError> {
        let maximum = route_config
            .maximum
            .as_ref()
            .expect("filtered to maintenance routes");

        let origin_balance = chain_balance(
            &self.config,
            self.chain.as_ref(),
            route_config.origin,
            &route_config.ticker_hash,
        )
        .await?;

        if origin_balance <= *maximum {
            return Ok(());
        }

        let reserve = route_config.reserve.as_ref().unwrap_or(maximum);
        let amount = origin_balance.saturating_sub(reserve);
        if amount < self.config.rebalance.min_rebalance_amount {
            debug!(
                origin = route_config.origin,
                amount = %amount,
                "Excess below rebalance minimum, skipping"
            );
            return Ok(());
        }

        info!(
            origin = route_config.origin,
            destination = route_config.destination,
            balance = %origin_balance,
            maximum = %maximum,
            amount = %amount,
            "Origin over maximum, rebalancing excess"
        );

        let leg_destination = route_config.via.unwrap_or(route_config.destination);
        let route = self.runtime_route(
            route_config.origin,
            leg_destination,
            &route_config.ticker_hash,
        )?;

        for preference in &route_config.preferences {
            match self
                .execute_bridge_transfer(
                    preference.bridge,
                    preference.slippage_dbps,
                    &route,
                    &amount,
                    None,
                )
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(
                        bridge = %preference.bridge,
                        error = %e,
                        "Bridge preference failed, trying next"
                    );
                }
            }
        }

        // Every preference refused this tick; the balance is still over the
        // maximum so the next tick retries.
        Ok(())
    }
}
