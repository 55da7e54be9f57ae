//! Balance reads
//!
//! Mark's own balances of a ticker across every configured chain, rescaled
//! to canonical 18-decimal units. Both the event processor (planner input)
//! and the rebalance engine (shortfall/threshold accounting) read through
//! here so the two always agree on units.

use std::collections::BTreeMap;

use crate::amount::{Amount, CANONICAL_DECIMALS};
use crate::chain::{ChainError, ChainService};
use crate::config::AppConfig;

/// Canonical balance of `ticker_hash` on every chain where it is configured.
/// Chains whose balance read fails are omitted (logged by the caller's
/// error context), not zeroed, so a flaky provider cannot trigger a
/// spurious rebalance.
pub async fn ticker_balances(
    config: &AppConfig,
    chain_service: &dyn ChainService,
    ticker_hash: &str,
) -> Result<BTreeMap<u64, Amount>, ChainError> {
    let mut balances = BTreeMap::new();
    for (&chain_id, chain) in &config.chains {
        let Some(asset) = chain
            .assets
            .iter()
            .find(|a| a.ticker_hash.eq_ignore_ascii_case(ticker_hash))
        else {
            continue;
        };
        let native = chain_service
            .balance_of(chain_id, &asset.address, &config.signer.address)
            .await?;
        balances.insert(chain_id, native.rescale(asset.decimals, CANONICAL_DECIMALS));
    }
    Ok(balances)
}

/// Canonical balance on one chain; zero when the asset is not configured
/// there.
pub async fn chain_balance(
    config: &AppConfig,
    chain_service: &dyn ChainService,
    chain_id: u64,
    ticker_hash: &str,
) -> Result<Amount, ChainError> {
    let Some(asset) = config.asset(chain_id, ticker_hash) else {
        return Ok(Amount::zero());
    };
    let native = chain_service
        .balance_of(chain_id, &asset.address, &config.signer.address)
        .await?;
    Ok(native.rescale(asset.decimals, CANONICAL_DECIMALS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::MockChainService;

    fn config() -> AppConfig {
        serde_yaml::from_str(
            r#"
database_url: "postgres://localhost/mark_test"
everclear_api_url: "http://localhost:3000"
signer:
  address: "0xmark"
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
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_balances_rescaled_to_canonical() {
        let config = config();
        let chain = MockChainService::new();
        // 25 USDC in 6-decimal native units
        chain.set_balance(10, "0xa10", Amount::from(25_000_000u64));

        let balances = ticker_balances(&config, &chain, "0xusdc").await.unwrap();
        assert_eq!(balances[&10], crate::amount::canonical(25));
        assert_eq!(balances[&8453], Amount::zero());
    }

    #[tokio::test]
    async fn test_unconfigured_asset_reads_zero() {
        let config = config();
        let chain = MockChainService::new();
        assert_eq!(
            chain_balance(&config, &chain, 10, "0xweth").await.unwrap(),
            Amount::zero()
        );
    }
}
