//! Everclear hub REST client
//!
//! Read-mostly client for invoices, per-destination minimum amounts and
//! hub-custodied liquidity. A 404 on invoice lookup is load-bearing: it means
//! the hub has settled and pruned the invoice, so callers translate it into a
//! settlement signal rather than an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;

use crate::amount::Amount;

#[derive(Debug, Error)]
pub enum HubError {
    /// The hub no longer knows the invoice (settled and pruned).
    #[error("Invoice not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Hub returned status {0}: {1}")]
    Status(u16, String),

    #[error("Failed to decode hub response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for HubError {
    fn from(e: reqwest::Error) -> Self {
        HubError::Network(e.to_string())
    }
}

/// A hub-issued request to move a ticker amount to one of several candidate
/// destination chains.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    pub ticker_hash: String,
    /// Canonical 18-decimal units, decimal string on the wire.
    pub amount: Amount,
    pub destinations: Vec<u64>,
    #[serde(default)]
    pub origin: Option<u64>,
    #[serde(default)]
    pub owner: String,
    /// Seconds since epoch when the hub enqueued the invoice.
    pub hub_invoice_enqueued_timestamp: u64,
    #[serde(default)]
    pub tx_nonce: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePage {
    pub invoices: Vec<Invoice>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Hub-custodied liquidity: ticker -> chain -> canonical amount.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EconomyData {
    #[serde(default)]
    pub custodied: BTreeMap<String, BTreeMap<u64, Amount>>,
}

#[async_trait]
pub trait HubClient: Send + Sync + Debug {
    async fn fetch_invoice(&self, invoice_id: &str) -> Result<Invoice, HubError>;

    async fn fetch_invoices_by_tx_nonce(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<InvoicePage, HubError>;

    /// Per-origin minimum amounts required to purchase the invoice.
    async fn min_amounts(&self, invoice_id: &str) -> Result<BTreeMap<u64, Amount>, HubError>;

    async fn economy_data(&self) -> Result<EconomyData, HubError>;
}

#[derive(Debug)]
pub struct EverclearApi {
    http: reqwest::Client,
    base_url: String,
}

impl EverclearApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        not_found_id: Option<&str>,
    ) -> Result<T, HubError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 404
            && let Some(id) = not_found_id
        {
            return Err(HubError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HubError::Status(status.as_u16(), body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| HubError::Decode(e.to_string()))
    }
}

#[async_trait]
impl HubClient for EverclearApi {
    async fn fetch_invoice(&self, invoice_id: &str) -> Result<Invoice, HubError> {
        self.get_json(&format!("/invoices/{invoice_id}"), Some(invoice_id))
            .await
    }

    async fn fetch_invoices_by_tx_nonce(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<InvoicePage, HubError> {
        let path = match cursor {
            Some(cursor) => format!("/invoices?cursor={cursor}&limit={limit}"),
            None => format!("/invoices?limit={limit}"),
        };
        self.get_json(&path, None).await
    }

    async fn min_amounts(&self, invoice_id: &str) -> Result<BTreeMap<u64, Amount>, HubError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct MinAmountsResponse {
            min_amounts: BTreeMap<u64, Amount>,
        }
        let body: MinAmountsResponse = self
            .get_json(&format!("/invoices/{invoice_id}/min-amounts"), Some(invoice_id))
            .await?;
        Ok(body.min_amounts)
    }

    async fn economy_data(&self) -> Result<EconomyData, HubError> {
        self.get_json("/economy", None).await
    }
}
