//! Transaction history
//!
//! Reads recent transactions for an address from the indexing API and
//! classifies them for display. History is best-effort: an empty result
//! or missing credentials is not an error.

use crate::config::{Config, CHAIN_ID};
use crate::{Error, Result};
use alloy::primitives::{Address, U256};
use serde_json::Value;
use std::str::FromStr;

/// Whether the owner sent or received the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

/// One classified history row.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub hash: String,
    pub direction: Direction,
    /// The other party: sender for received, recipient for sent
    pub counterparty: String,
    /// Attached native value in wei
    pub value_wei: U256,
    /// Unix milliseconds
    pub timestamp_ms: i64,
    pub success: bool,
}

/// Client for the indexer's transactions endpoint.
pub struct HistoryClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
}

impl HistoryClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.endpoints.indexer_url.clone(),
            client_id: config.indexer_client_id(),
        }
    }

    /// Most recent transactions touching `owner`, newest first.
    pub async fn recent(&self, owner: Address, limit: u32) -> Result<Vec<HistoryEntry>> {
        let url = format!("{}/v1/transactions", self.base_url);
        let owner_str = owner.to_string();
        let response = self
            .http
            .get(&url)
            .header("x-client-id", &self.client_id)
            .query(&[
                ("chain_id", CHAIN_ID.to_string()),
                ("to_address", owner_str.clone()),
                ("from_address", owner_str),
                ("limit", limit.to_string()),
                ("order", "desc".to_string()),
                ("sort_by", "block_timestamp".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Indexer(format!(
                "transactions endpoint returned {}",
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        let entries = body
            .get("data")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default();

        let mut history: Vec<HistoryEntry> = entries
            .iter()
            .filter_map(|entry| classify(entry, owner))
            .collect();
        history.sort_by_key(|entry| std::cmp::Reverse(entry.timestamp_ms));
        Ok(history)
    }
}

/// Map one raw indexer row to a history entry. Rows without a hash are
/// dropped; everything else degrades field by field.
fn classify(entry: &Value, owner: Address) -> Option<HistoryEntry> {
    let hash = entry.get("hash").and_then(|v| v.as_str())?.to_string();

    let owner_lower = owner.to_string().to_lowercase();
    let from = entry
        .get("from_address")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_lowercase();
    let to = entry
        .get("to_address")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_lowercase();

    // A self-transfer counts as sent.
    let (direction, counterparty) = if to == owner_lower && from != owner_lower {
        (Direction::Received, from)
    } else {
        (Direction::Sent, to)
    };

    let value_wei = entry
        .get("value")
        .and_then(|v| match v {
            Value::String(s) => U256::from_str(s).ok(),
            Value::Number(n) => n.as_u64().map(U256::from),
            _ => None,
        })
        .unwrap_or(U256::ZERO);

    let timestamp_ms = entry
        .get("block_timestamp")
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0);

    let success = entry
        .get("status")
        .and_then(|v| v.as_u64())
        .map(|s| s == 1)
        .unwrap_or(true);

    Some(HistoryEntry {
        hash,
        direction,
        counterparty,
        value_wei,
        timestamp_ms,
        success,
    })
}
