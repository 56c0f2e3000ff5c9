//! Configuration for the wallet orchestrator

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Base mainnet chain id
pub const CHAIN_ID: u64 = 8453;

/// Chain slug used in aggregator URL paths
pub const CHAIN_SLUG: &str = "base";

/// Environment variable holding the hex-encoded wallet private key
pub const WALLET_KEY_ENV: &str = "WALLET_PRIVATE_KEY";

/// Environment variable holding the balance-indexer client id
pub const INDEXER_CLIENT_ID_ENV: &str = "INDEXER_CLIENT_ID";

/// Upstream service endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoints {
    /// Chain JSON-RPC endpoint
    pub rpc_url: String,
    /// Balance/transaction indexing API
    pub indexer_url: String,
    /// Liquidity aggregator API (v3)
    pub aggregator_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            rpc_url: "https://mainnet.base.org".to_string(),
            indexer_url: "https://insight.thirdweb.com".to_string(),
            aggregator_url: "https://open-api.openocean.finance/v3".to_string(),
        }
    }
}

/// Refresh cadences imposed by callers on the polling clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intervals {
    /// Seconds between balance refreshes
    pub balance_refresh_secs: u64,
    /// Seconds between price refreshes
    pub price_refresh_secs: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            balance_refresh_secs: 30,
            price_refresh_secs: 120,
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upstream endpoints
    #[serde(default)]
    pub endpoints: Endpoints,
    /// Polling cadences
    #[serde(default)]
    pub intervals: Intervals,
    /// Default slippage tolerance in percent
    pub default_slippage_pct: f64,
    /// Gas price hint passed to the aggregator (gwei, Base runs well below 1)
    pub gas_price_hint: String,
    /// Where the persisted price cache lives; `None` keeps it in memory
    pub cache_path: Option<PathBuf>,
    /// Indexer API client id; resolved from the environment when empty
    #[serde(default)]
    pub indexer_client_id: String,
}

impl Config {
    /// Resolve the indexer client id, preferring the config value over the
    /// environment.
    pub fn indexer_client_id(&self) -> String {
        if !self.indexer_client_id.is_empty() {
            return self.indexer_client_id.clone();
        }
        std::env::var(INDEXER_CLIENT_ID_ENV).unwrap_or_default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            intervals: Intervals::default(),
            default_slippage_pct: 1.0,
            gas_price_hint: "0.001".to_string(),
            cache_path: Some(PathBuf::from("price-cache.json")),
            indexer_client_id: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_base() {
        let config = Config::default();
        assert_eq!(config.endpoints.rpc_url, "https://mainnet.base.org");
        assert_eq!(config.default_slippage_pct, 1.0);
        assert_eq!(config.intervals.balance_refresh_secs, 30);
    }

    #[test]
    fn deserialize_partial_config() {
        let value = serde_json::json!({
            "default_slippage_pct": 0.5,
            "gas_price_hint": "0.001",
            "cache_path": null
        });
        let parsed: Config = serde_json::from_value(value).expect("parse config");
        assert_eq!(parsed.default_slippage_pct, 0.5);
        assert!(parsed.cache_path.is_none());
        assert_eq!(parsed.endpoints.indexer_url, "https://insight.thirdweb.com");
    }
}
