//! Transaction Receipt Normalisation
//!
//! Receipts arrive from heterogeneous sources (signer sidecar, bridge APIs,
//! RPC providers) with inconsistent shapes. Every ingress point runs
//! [`normalize_receipt`] so downstream code can assume one shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReceiptError {
    #[error("Receipt missing required field: {0}")]
    MissingField(&'static str),

    #[error("Receipt is not a JSON object")]
    NotAnObject,
}

/// The one receipt shape the rest of the system sees.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedReceipt {
    pub transaction_hash: String,
    pub from: String,
    /// Defaults to empty string when the source omits it (contract creation,
    /// CEX withdrawal records).
    #[serde(default)]
    pub to: String,
    /// Falls back to the legacy `gasPrice` field when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_gas_price: Option<String>,
    /// 1 = success; anything the source reports that is not "success"/1 maps
    /// to None.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u8>,
    #[serde(default)]
    pub logs: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
}

fn string_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Normalise a raw receipt.
///
/// Rules:
/// - `transactionHash` required, `from` required
/// - `to` defaults to ""
/// - `effectiveGasPrice` falls back to `gasPrice`
/// - `status`: "success" or 1 -> Some(1), anything else -> None
/// - `logs` defaults to the empty list
/// - `confirmations` preserved only when numeric
pub fn normalize_receipt(raw: &Value) -> Result<NormalizedReceipt, ReceiptError> {
    let obj = raw.as_object().ok_or(ReceiptError::NotAnObject)?;

    let transaction_hash = string_field(obj, "transactionHash")
        .or_else(|| string_field(obj, "transaction_hash"))
        .or_else(|| string_field(obj, "hash"))
        .ok_or(ReceiptError::MissingField("transactionHash"))?;

    let from = string_field(obj, "from").ok_or(ReceiptError::MissingField("from"))?;

    let to = string_field(obj, "to").unwrap_or_default();

    let effective_gas_price =
        string_field(obj, "effectiveGasPrice").or_else(|| string_field(obj, "gasPrice"));

    let status = match obj.get("status") {
        Some(Value::String(s)) if s.eq_ignore_ascii_case("success") || s == "1" || s == "0x1" => {
            Some(1)
        }
        Some(Value::Number(n)) if n.as_u64() == Some(1) => Some(1),
        _ => None,
    };

    let logs = match obj.get("logs") {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };

    let confirmations = obj.get("confirmations").and_then(Value::as_u64);

    Ok(NormalizedReceipt {
        transaction_hash,
        from,
        to,
        effective_gas_price,
        status,
        logs,
        confirmations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_receipt() {
        let raw = json!({
            "transactionHash": "0xabc",
            "from": "0xsender",
            "to": "0xrecipient",
            "effectiveGasPrice": "1000000000",
            "status": "success",
            "logs": [{"topic": "0x1"}],
            "confirmations": 12,
        });
        let receipt = normalize_receipt(&raw).unwrap();
        assert_eq!(receipt.transaction_hash, "0xabc");
        assert_eq!(receipt.to, "0xrecipient");
        assert_eq!(receipt.effective_gas_price.as_deref(), Some("1000000000"));
        assert_eq!(receipt.status, Some(1));
        assert_eq!(receipt.logs.len(), 1);
        assert_eq!(receipt.confirmations, Some(12));
    }

    #[test]
    fn test_defaults_and_fallbacks() {
        let raw = json!({
            "transactionHash": "0xabc",
            "from": "0xsender",
            "gasPrice": "7",
            "status": 0,
            "confirmations": "not-a-number",
        });
        let receipt = normalize_receipt(&raw).unwrap();
        assert_eq!(receipt.to, "");
        assert_eq!(receipt.effective_gas_price.as_deref(), Some("7"));
        assert_eq!(receipt.status, None);
        assert!(receipt.logs.is_empty());
        assert_eq!(receipt.confirmations, None);
    }

    #[test]
    fn test_numeric_status_one() {
        let raw = json!({"transactionHash": "0x1", "from": "0x2", "status": 1});
        assert_eq!(normalize_receipt(&raw).unwrap().status, Some(1));
    }

    #[test]
    fn test_missing_required_fields() {
        let no_hash = json!({"from": "0x2"});
        assert_eq!(
            normalize_receipt(&no_hash),
            Err(ReceiptError::MissingField("transactionHash"))
        );

        let no_from = json!({"transactionHash": "0x1"});
        assert_eq!(
            normalize_receipt(&no_from),
            Err(ReceiptError::MissingField("from"))
        );

        assert_eq!(
            normalize_receipt(&json!("just a string")),
            Err(ReceiptError::NotAnObject)
        );
    }
}
