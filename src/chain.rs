//! Chain Service
//!
//! Abstract transaction submission and balance reads. The production
//! implementation talks to the signer sidecar, which holds Mark's key,
//! encodes and broadcasts the transaction (optionally wrapped through a
//! Safe-role policy module), and returns the mined receipt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;

use crate::amount::Amount;
use crate::config::AppConfig;
use crate::receipt::{NormalizedReceipt, ReceiptError, normalize_receipt};

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Chain {0} is not configured")]
    UnknownChain(u64),

    #[error("Submission rejected: {0}")]
    Rejected(String),

    #[error("Malformed receipt: {0}")]
    Receipt(#[from] ReceiptError),
}

impl From<reqwest::Error> for ChainError {
    fn from(e: reqwest::Error) -> Self {
        ChainError::Network(e.to_string())
    }
}

/// A transaction to submit, already targeted at one chain. The `data` field
/// carries the signer-sidecar call document (hex calldata for contract calls,
/// structured params for intents); the signer owns encoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub chain_id: u64,
    pub to: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub value: Amount,
    /// Route the call through this chain's Safe policy module.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safe_module: Option<String>,
}

#[async_trait]
pub trait ChainService: Send + Sync + Debug {
    /// Broadcast a transaction and wait for its receipt.
    async fn submit_and_monitor(
        &self,
        chain_id: u64,
        tx: &TransactionRequest,
    ) -> Result<NormalizedReceipt, ChainError>;

    /// Mark's balance of an asset on a chain, in the asset's native decimals.
    async fn balance_of(
        &self,
        chain_id: u64,
        asset_address: &str,
        owner: &str,
    ) -> Result<Amount, ChainError>;
}

/// Signer-sidecar backed implementation.
#[derive(Debug)]
pub struct SignerChainService {
    http: reqwest::Client,
    signer_url: String,
    config: AppConfig,
}

impl SignerChainService {
    pub fn new(config: AppConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            signer_url: config.signer.url.clone(),
            config,
        }
    }
}

#[async_trait]
impl ChainService for SignerChainService {
    async fn submit_and_monitor(
        &self,
        chain_id: u64,
        tx: &TransactionRequest,
    ) -> Result<NormalizedReceipt, ChainError> {
        let chain = self
            .config
            .chains
            .get(&chain_id)
            .ok_or(ChainError::UnknownChain(chain_id))?;

        // Per-chain Safe module wins over whatever the caller set.
        let mut tx = tx.clone();
        if tx.safe_module.is_none() {
            tx.safe_module = chain.safe_module.clone();
        }

        let response = self
            .http
            .post(format!("{}/submit", self.signer_url))
            .json(&json!({
                "chainId": chain_id,
                "providers": chain.providers,
                "transaction": tx,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::Rejected(format!("signer returned {status}: {body}")));
        }

        let raw: serde_json::Value = response.json().await?;
        Ok(normalize_receipt(&raw)?)
    }

    async fn balance_of(
        &self,
        chain_id: u64,
        asset_address: &str,
        owner: &str,
    ) -> Result<Amount, ChainError> {
        let chain = self
            .config
            .chains
            .get(&chain_id)
            .ok_or(ChainError::UnknownChain(chain_id))?;

        let response = self
            .http
            .post(format!("{}/balance", self.signer_url))
            .json(&json!({
                "chainId": chain_id,
                "providers": chain.providers,
                "asset": asset_address,
                "owner": owner,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(ChainError::Network(format!("balance query returned {status}")));
        }

        #[derive(Deserialize)]
        struct BalanceResponse {
            balance: Amount,
        }
        let body: BalanceResponse = response.json().await?;
        Ok(body.balance)
    }
}
