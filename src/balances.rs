//! Balance query client
//!
//! Fetches fungible-token and native balances from the external indexing
//! API. Queries fail soft: a transport or parse error yields zero, which
//! callers must treat as "unknown or genuinely zero", never as an
//! authoritative negative signal. The [`BalanceTracker`] keeps the last
//! good snapshot per token so a refresh in flight (or a failed one) never
//! flashes a zero balance.

use crate::config::{Config, CHAIN_ID};
use crate::tokens::TokenDescriptor;
use crate::{Error, Result};
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Raw-balance lookup for a token and owner.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Balance in smallest units. An absent indexer entry is zero; only
    /// transport and parse failures error.
    async fn raw_balance(&self, token: &TokenDescriptor, owner: Address) -> Result<U256>;

    /// Fail-soft variant: logs and returns zero on error.
    async fn balance_or_zero(&self, token: &TokenDescriptor, owner: Address) -> U256 {
        match self.raw_balance(token, owner).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(token = token.symbol, error = %e, "balance query failed, treating as zero");
                U256::ZERO
            }
        }
    }
}

/// A point-in-time balance reading. Superseded, never merged.
#[derive(Debug, Clone)]
pub struct BalanceSnapshot {
    pub token: TokenDescriptor,
    pub raw: U256,
    pub display: String,
}

impl BalanceSnapshot {
    pub fn new(token: TokenDescriptor, raw: U256) -> Self {
        let display = token.format_raw(raw);
        Self {
            token,
            raw,
            display,
        }
    }
}

/// Client for the balance indexing API.
pub struct IndexerClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
}

impl IndexerClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.endpoints.indexer_url.clone(),
            client_id: config.indexer_client_id(),
        }
    }

    async fn fetch(&self, token: &TokenDescriptor, owner: Address) -> Result<U256> {
        let url = format!("{}/v1/tokens", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("x-client-id", &self.client_id)
            .query(&[
                ("chain_id", CHAIN_ID.to_string()),
                ("token_address", token.address.to_string()),
                ("owner_address", owner.to_string()),
                ("include_native", "true".to_string()),
                ("include_spam", "false".to_string()),
                ("limit", "50".to_string()),
                ("metadata", "false".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Indexer(format!(
                "indexer returned {} for {}",
                response.status(),
                token.symbol
            )));
        }

        let body: serde_json::Value = response.json().await?;
        let balance = body
            .get("data")
            .and_then(|d| d.get(0))
            .and_then(|entry| entry.get("balance"))
            .and_then(|b| b.as_str())
            .unwrap_or("0");

        U256::from_str(balance)
            .map_err(|e| Error::Indexer(format!("unparseable balance {:?}: {}", balance, e)))
    }
}

#[async_trait]
impl BalanceSource for IndexerClient {
    async fn raw_balance(&self, token: &TokenDescriptor, owner: Address) -> Result<U256> {
        self.fetch(token, owner).await
    }
}

/// Snapshot holder refreshed on a caller-imposed cadence.
///
/// Concurrent refreshes are resolved by a generation counter: a result is
/// applied only if no newer refresh was issued while it was in flight, so
/// a slow stale response can never overwrite fresher state.
pub struct BalanceTracker<B> {
    source: B,
    owner: Address,
    tokens: Vec<TokenDescriptor>,
    snapshots: RwLock<HashMap<Address, BalanceSnapshot>>,
    generation: AtomicU64,
}

impl<B: BalanceSource> BalanceTracker<B> {
    pub fn new(source: B, owner: Address, tokens: Vec<TokenDescriptor>) -> Self {
        Self {
            source,
            owner,
            tokens,
            snapshots: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Last known snapshot for a token, if any query ever succeeded.
    pub fn snapshot(&self, token: &TokenDescriptor) -> Option<BalanceSnapshot> {
        self.snapshots
            .read()
            .expect("snapshot lock")
            .get(&token.address)
            .cloned()
    }

    /// Fetch fresh balances for every tracked token.
    ///
    /// Returns `false` if the results were discarded because a newer
    /// refresh was issued while this one was in flight. Tokens whose query
    /// failed keep their previous snapshot.
    pub async fn refresh(&self) -> bool {
        let issue = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let results = futures::future::join_all(self.tokens.iter().map(|token| async move {
            (token, self.source.raw_balance(token, self.owner).await)
        }))
        .await;

        if self.generation.load(Ordering::SeqCst) != issue {
            tracing::debug!(issue, "balance refresh superseded, discarding results");
            return false;
        }

        let mut snapshots = self.snapshots.write().expect("snapshot lock");
        for (token, result) in results {
            match result {
                Ok(raw) => {
                    snapshots.insert(token.address, BalanceSnapshot::new(*token, raw));
                }
                Err(e) => {
                    tracing::warn!(token = token.symbol, error = %e, "keeping previous balance snapshot");
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::{FLUX, FORGE};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct ScriptedSource {
        // (delay, result) per call, in order
        script: Arc<Mutex<VecDeque<(Duration, Result<U256>)>>>,
    }

    impl ScriptedSource {
        fn push(&self, delay_ms: u64, result: Result<U256>) {
            self.script
                .lock()
                .unwrap()
                .push_back((Duration::from_millis(delay_ms), result));
        }
    }

    #[async_trait]
    impl BalanceSource for ScriptedSource {
        async fn raw_balance(&self, _token: &TokenDescriptor, _owner: Address) -> Result<U256> {
            let (delay, result) = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or((Duration::ZERO, Ok(U256::ZERO)));
            tokio::time::sleep(delay).await;
            result
        }
    }

    #[tokio::test]
    async fn snapshot_formats_display() {
        let source = ScriptedSource::default();
        source.push(0, Ok(U256::from(12345u64)));
        let tracker = BalanceTracker::new(source, Address::ZERO, vec![FLUX]);
        assert!(tracker.refresh().await);
        let snap = tracker.snapshot(&FLUX).unwrap();
        assert_eq!(snap.display, "123.45");
        assert_eq!(snap.raw, U256::from(12345u64));
    }

    #[tokio::test]
    async fn failed_query_keeps_previous_snapshot() {
        let source = ScriptedSource::default();
        source.push(0, Ok(U256::from(500u64)));
        source.push(0, Err(Error::Indexer("boom".to_string())));
        let tracker = BalanceTracker::new(source, Address::ZERO, vec![FORGE]);

        assert!(tracker.refresh().await);
        assert_eq!(tracker.snapshot(&FORGE).unwrap().raw, U256::from(500u64));

        // second refresh fails upstream; previous value must survive
        assert!(tracker.refresh().await);
        assert_eq!(tracker.snapshot(&FORGE).unwrap().raw, U256::from(500u64));
    }

    #[tokio::test(start_paused = true)]
    async fn newest_issued_refresh_wins() {
        let source = ScriptedSource::default();
        // first refresh is slow and resolves last
        source.push(1_000, Ok(U256::from(100u64)));
        // second refresh is fast
        source.push(10, Ok(U256::from(200u64)));

        let tracker = Arc::new(BalanceTracker::new(source, Address::ZERO, vec![FLUX]));

        let slow = tokio::spawn({
            let tracker = Arc::clone(&tracker);
            async move { tracker.refresh().await }
        });
        // let the slow refresh claim its generation first
        tokio::time::sleep(Duration::from_millis(1)).await;
        let fast = tokio::spawn({
            let tracker = Arc::clone(&tracker);
            async move { tracker.refresh().await }
        });

        let fast_applied = fast.await.unwrap();
        let slow_applied = slow.await.unwrap();

        assert!(fast_applied);
        assert!(!slow_applied);
        // the stale 100 from the superseded refresh was discarded
        assert_eq!(tracker.snapshot(&FLUX).unwrap().raw, U256::from(200u64));
    }

    #[tokio::test]
    async fn balance_or_zero_absorbs_errors() {
        let source = ScriptedSource::default();
        source.push(0, Err(Error::Indexer("down".to_string())));
        assert_eq!(source.balance_or_zero(&FLUX, Address::ZERO).await, U256::ZERO);
    }
}
