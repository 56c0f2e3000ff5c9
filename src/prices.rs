//! Price oracle aggregator
//!
//! Combines a gas-token/fiat rate from an ordered list of redundant
//! providers with a utility-token/gas-token rate derived from the
//! liquidity aggregator, and persists the combined record across sessions.
//! The oracle never fails past its boundary: every leg degrades to the
//! cached or constant fallback and the result carries an optional
//! human-readable reason when no live data was available.

use crate::aggregator::DexApi;
use crate::store::{
    KvStore, PriceCache, PriceRecord, ProviderThrottle, PRICE_DISPLAY_MAX_AGE,
    PRICE_FALLBACK_MAX_AGE, PROVIDER_COOLDOWN,
};
use crate::tokens::{units_to_f64, FLUX, NATIVE};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Fixed gas-token/fiat fallback when neither providers nor cache help.
/// The wallet must stay usable with a plausible default.
pub const GAS_FIAT_FALLBACK: f64 = 3000.0;

/// A single gas-token/fiat rate source.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Stable name, also the rate-limit key.
    fn name(&self) -> &'static str;

    /// Current rate; implementations return an error rather than zero.
    async fn gas_fiat_rate(&self) -> Result<f64>;
}

/// Market-data aggregator provider.
#[derive(Default)]
pub struct CoinGecko {
    http: reqwest::Client,
}

#[async_trait]
impl RateProvider for CoinGecko {
    fn name(&self) -> &'static str {
        "coingecko"
    }

    async fn gas_fiat_rate(&self) -> Result<f64> {
        let body: serde_json::Value = self
            .http
            .get("https://api.coingecko.com/api/v3/simple/price")
            .query(&[("ids", "ethereum"), ("vs_currencies", "eur")])
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::Aggregator(format!("coingecko: {}", e)))?
            .json()
            .await?;
        body.get("ethereum")
            .and_then(|e| e.get("eur"))
            .and_then(|v| v.as_f64())
            .ok_or_else(|| Error::Aggregator("coingecko: missing eur rate".to_string()))
    }
}

/// Price-ticker provider.
#[derive(Default)]
pub struct CryptoCompare {
    http: reqwest::Client,
}

#[async_trait]
impl RateProvider for CryptoCompare {
    fn name(&self) -> &'static str {
        "cryptocompare"
    }

    async fn gas_fiat_rate(&self) -> Result<f64> {
        let body: serde_json::Value = self
            .http
            .get("https://min-api.cryptocompare.com/data/price")
            .query(&[("fsym", "ETH"), ("tsyms", "EUR")])
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::Aggregator(format!("cryptocompare: {}", e)))?
            .json()
            .await?;
        body.get("EUR")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| Error::Aggregator("cryptocompare: missing EUR rate".to_string()))
    }
}

/// Exchange-ticker provider: ETH/EUR cross-derived from ETHUSDT and
/// EURUSDT.
#[derive(Default)]
pub struct BinanceCross {
    http: reqwest::Client,
}

impl BinanceCross {
    async fn ticker(&self, symbol: &str) -> Result<f64> {
        let body: serde_json::Value = self
            .http
            .get("https://api.binance.com/api/v3/ticker/price")
            .query(&[("symbol", symbol)])
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::Aggregator(format!("binance {}: {}", symbol, e)))?
            .json()
            .await?;
        body.get("price")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| Error::Aggregator(format!("binance {}: missing price", symbol)))
    }
}

#[async_trait]
impl RateProvider for BinanceCross {
    fn name(&self) -> &'static str {
        "binance"
    }

    async fn gas_fiat_rate(&self) -> Result<f64> {
        let eth_usdt = self.ticker("ETHUSDT").await?;
        let eur_usdt = self.ticker("EURUSDT").await?;
        if eur_usdt <= 0.0 {
            return Err(Error::Aggregator("binance: zero EURUSDT rate".to_string()));
        }
        Ok(eth_usdt / eur_usdt)
    }
}

/// Best-estimate price set produced by a refresh.
#[derive(Debug, Clone)]
pub struct Prices {
    /// Gas token (ETH) in fiat
    pub gas_fiat: f64,
    /// Utility tokens per 1 gas token
    pub utility_per_gas: f64,
    /// Utility token in fiat (`gas_fiat / utility_per_gas`)
    pub utility_fiat: f64,
    /// Why the estimate is degraded, when no live data was available
    pub degraded: Option<String>,
}

/// The price oracle.
///
/// Safe to drive from a fixed timer: a monotonically increasing request
/// generation discards any in-flight refresh that resolves after a newer
/// one was issued, so "newest-issued request wins" regardless of response
/// arrival order.
pub struct PriceOracle<D> {
    providers: Vec<Box<dyn RateProvider>>,
    dex: D,
    cache: PriceCache,
    throttle: ProviderThrottle,
    current: RwLock<Option<Prices>>,
    generation: AtomicU64,
}

impl<D: DexApi> PriceOracle<D> {
    /// Oracle with the standard provider stack, seeded from any persisted
    /// record younger than the display window so the UI never starts with
    /// "no price" when a recent one exists.
    pub fn new(dex: D, store: Arc<dyn KvStore>) -> Self {
        Self::with_providers(
            dex,
            store,
            vec![
                Box::new(CoinGecko::default()),
                Box::new(CryptoCompare::default()),
                Box::new(BinanceCross::default()),
            ],
        )
    }

    pub fn with_providers(
        dex: D,
        store: Arc<dyn KvStore>,
        providers: Vec<Box<dyn RateProvider>>,
    ) -> Self {
        let cache = PriceCache::new(Arc::clone(&store));
        let seeded = cache.load_fresh(PRICE_DISPLAY_MAX_AGE).map(|record| Prices {
            gas_fiat: record.gas_fiat,
            utility_per_gas: record.utility_per_gas,
            utility_fiat: record.utility_fiat,
            degraded: None,
        });
        Self {
            providers,
            dex,
            cache,
            throttle: ProviderThrottle::new(store),
            current: RwLock::new(seeded),
            generation: AtomicU64::new(0),
        }
    }

    /// Latest applied price set, if any.
    pub fn current(&self) -> Option<Prices> {
        self.current.read().expect("prices lock").clone()
    }

    /// Fetch fresh rates, degrade where needed, persist on full success.
    pub async fn refresh(&self) -> Prices {
        let issue = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut degraded: Option<String> = None;

        // Gas leg: first provider with a positive rate wins. A provider
        // inside its cooldown is skipped, not counted as a failure.
        let mut live_gas = None;
        for provider in &self.providers {
            if self.throttle.should_skip(provider.name(), PROVIDER_COOLDOWN) {
                tracing::debug!(provider = provider.name(), "inside cooldown, skipping");
                continue;
            }
            self.throttle.mark(provider.name());
            match provider.gas_fiat_rate().await {
                Ok(rate) if rate > 0.0 => {
                    let rate = (rate * 100.0).round() / 100.0;
                    tracing::info!(provider = provider.name(), rate, "gas fiat rate fetched");
                    live_gas = Some(rate);
                    break;
                }
                Ok(rate) => {
                    tracing::warn!(provider = provider.name(), rate, "non-positive rate, trying next");
                }
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "provider failed, trying next");
                }
            }
        }
        let gas_live = live_gas.is_some();
        let gas_fiat = match live_gas {
            Some(rate) => rate,
            None => match self.cache.load_fresh(PRICE_FALLBACK_MAX_AGE) {
                Some(record) => {
                    degraded = Some("rate providers unavailable, using cached gas rate".to_string());
                    record.gas_fiat
                }
                None => {
                    degraded =
                        Some("rate providers unavailable and no cache, using fixed fallback".to_string());
                    GAS_FIAT_FALLBACK
                }
            },
        };

        // Utility leg: quote 1 gas token through the aggregator.
        let one_gas = NATIVE.base_units();
        let (utility_per_gas, utility_live) =
            match self.dex.rate_quote(&NATIVE, &FLUX, one_gas).await {
                Ok(out_amount) => (units_to_f64(out_amount, FLUX.decimals), true),
                Err(e) => {
                    tracing::warn!(error = %e, "aggregator rate quote failed");
                    match self.cache.load_fresh(PRICE_FALLBACK_MAX_AGE) {
                        Some(record) if record.utility_per_gas > 0.0 => {
                            degraded
                                .get_or_insert_with(|| "using cached utility rate".to_string());
                            (record.utility_per_gas, false)
                        }
                        _ => {
                            degraded = Some(format!("utility rate unavailable: {}", e));
                            (0.0, false)
                        }
                    }
                }
            };

        let utility_fiat = if utility_per_gas > 0.0 {
            gas_fiat / utility_per_gas
        } else {
            self.cache
                .load_fresh(PRICE_FALLBACK_MAX_AGE)
                .map(|record| record.utility_fiat)
                .unwrap_or(0.0)
        };

        let prices = Prices {
            gas_fiat,
            utility_per_gas,
            utility_fiat,
            degraded,
        };

        // Apply only if no newer refresh was issued while this one ran.
        if self.generation.load(Ordering::SeqCst) != issue {
            tracing::debug!(issue, "price refresh superseded, discarding result");
            return prices;
        }

        *self.current.write().expect("prices lock") = Some(prices.clone());
        if gas_live && utility_live {
            self.cache.store(PriceRecord {
                gas_fiat,
                utility_per_gas,
                utility_fiat,
                timestamp_ms: 0, // stamped on store
            });
        }
        prices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::SwapQuote;
    use crate::store::MemoryStore;
    use crate::tokens::TokenDescriptor;
    use alloy::primitives::{Address, U256};
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FixedProvider {
        name: &'static str,
        rate: Result<f64>,
        calls: Arc<AtomicU32>,
    }

    impl FixedProvider {
        fn ok(name: &'static str, rate: f64, calls: Arc<AtomicU32>) -> Box<Self> {
            Box::new(Self {
                name,
                rate: Ok(rate),
                calls,
            })
        }

        fn failing(name: &'static str, calls: Arc<AtomicU32>) -> Box<Self> {
            Box::new(Self {
                name,
                rate: Err(Error::Aggregator("down".to_string())),
                calls,
            })
        }
    }

    #[async_trait]
    impl RateProvider for FixedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn gas_fiat_rate(&self) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.rate {
                Ok(rate) => Ok(*rate),
                Err(_) => Err(Error::Aggregator("down".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct ScriptedDex {
        // (delay, out_amount) per rate_quote call
        script: Mutex<VecDeque<(Duration, Result<U256>)>>,
    }

    impl ScriptedDex {
        fn push(&self, delay_ms: u64, result: Result<U256>) {
            self.script
                .lock()
                .unwrap()
                .push_back((Duration::from_millis(delay_ms), result));
        }
    }

    #[async_trait]
    impl DexApi for ScriptedDex {
        async fn rate_quote(
            &self,
            _input: &TokenDescriptor,
            _output: &TokenDescriptor,
            _amount: U256,
        ) -> Result<U256> {
            let (delay, result) = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or((Duration::ZERO, Err(Error::NoLiquidity("empty".to_string()))));
            tokio::time::sleep(delay).await;
            result
        }

        async fn swap_quote(
            &self,
            _input: &TokenDescriptor,
            _output: &TokenDescriptor,
            _amount: U256,
            _slippage_pct: f64,
            _account: Address,
        ) -> Result<SwapQuote> {
            Err(Error::Aggregator("not scripted".to_string()))
        }

        async fn allowance(&self, _owner: Address, _token: &TokenDescriptor) -> Option<U256> {
            None
        }

        fn spender(&self) -> Address {
            Address::ZERO
        }
    }

    fn store() -> Arc<dyn KvStore> {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn derives_utility_fiat_rate() {
        let dex = ScriptedDex::default();
        // 1 ETH -> 500.00 FLUX (raw 50000 at 2 decimals)
        dex.push(0, Ok(U256::from(50_000u64)));
        let calls = Arc::new(AtomicU32::new(0));
        let oracle = PriceOracle::with_providers(
            dex,
            store(),
            vec![FixedProvider::ok("coingecko", 3000.0, calls)],
        );

        let prices = oracle.refresh().await;
        assert_eq!(prices.gas_fiat, 3000.0);
        assert_eq!(prices.utility_per_gas, 500.0);
        assert!((prices.utility_fiat - 6.0).abs() < 1e-9);
        assert!(prices.degraded.is_none());
    }

    #[tokio::test]
    async fn provider_in_cooldown_is_skipped_not_failed() {
        let kv = store();
        // put the first provider inside its cooldown window
        kv.put(
            "last_coingecko_request",
            Utc::now().timestamp_millis().to_string(),
        );

        let first_calls = Arc::new(AtomicU32::new(0));
        let second_calls = Arc::new(AtomicU32::new(0));
        let dex = ScriptedDex::default();
        dex.push(0, Ok(U256::from(50_000u64)));
        let oracle = PriceOracle::with_providers(
            dex,
            kv,
            vec![
                FixedProvider::ok("coingecko", 2500.0, Arc::clone(&first_calls)),
                FixedProvider::ok("cryptocompare", 3100.0, Arc::clone(&second_calls)),
            ],
        );

        let prices = oracle.refresh().await;
        assert_eq!(first_calls.load(Ordering::SeqCst), 0);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert_eq!(prices.gas_fiat, 3100.0);
    }

    #[tokio::test]
    async fn falls_back_to_cache_then_constant() {
        // cached record available: providers all fail -> cached rate
        let kv = store();
        PriceCache::new(Arc::clone(&kv)).store(PriceRecord {
            gas_fiat: 2800.0,
            utility_per_gas: 400.0,
            utility_fiat: 7.0,
            timestamp_ms: 0,
        });
        let calls = Arc::new(AtomicU32::new(0));
        let dex = ScriptedDex::default();
        dex.push(0, Err(Error::NoLiquidity("dry".to_string())));
        let oracle = PriceOracle::with_providers(
            dex,
            kv,
            vec![FixedProvider::failing("coingecko", Arc::clone(&calls))],
        );
        let prices = oracle.refresh().await;
        assert_eq!(prices.gas_fiat, 2800.0);
        assert_eq!(prices.utility_per_gas, 400.0);
        assert!(prices.degraded.is_some());

        // no cache at all: fixed constant fallback, never absent
        let dex = ScriptedDex::default();
        dex.push(0, Err(Error::NoLiquidity("dry".to_string())));
        let oracle = PriceOracle::with_providers(
            dex,
            store(),
            vec![FixedProvider::failing("coingecko", Arc::new(AtomicU32::new(0)))],
        );
        let prices = oracle.refresh().await;
        assert_eq!(prices.gas_fiat, GAS_FIAT_FALLBACK);
        assert!(prices.degraded.is_some());
    }

    #[tokio::test]
    async fn persists_record_on_full_success() {
        let kv = store();
        let dex = ScriptedDex::default();
        dex.push(0, Ok(U256::from(50_000u64)));
        let oracle = PriceOracle::with_providers(
            dex,
            Arc::clone(&kv),
            vec![FixedProvider::ok(
                "coingecko",
                3000.0,
                Arc::new(AtomicU32::new(0)),
            )],
        );
        oracle.refresh().await;

        let cached = PriceCache::new(kv).load_fresh(PRICE_DISPLAY_MAX_AGE).unwrap();
        assert_eq!(cached.gas_fiat, 3000.0);
        assert_eq!(cached.utility_per_gas, 500.0);
    }

    #[tokio::test]
    async fn seeds_current_from_fresh_cache() {
        let kv = store();
        PriceCache::new(Arc::clone(&kv)).store(PriceRecord {
            gas_fiat: 3000.0,
            utility_per_gas: 500.0,
            utility_fiat: 6.0,
            timestamp_ms: 0,
        });
        let oracle = PriceOracle::with_providers(ScriptedDex::default(), kv, vec![]);
        let seeded = oracle.current().unwrap();
        assert_eq!(seeded.utility_per_gas, 500.0);
    }

    #[tokio::test(start_paused = true)]
    async fn newest_issued_refresh_wins() {
        let dex = ScriptedDex::default();
        // first refresh resolves slowly with a stale rate
        dex.push(1_000, Ok(U256::from(10_000u64))); // 100 FLUX/ETH
        // second refresh resolves quickly with the fresh rate
        dex.push(10, Ok(U256::from(50_000u64))); // 500 FLUX/ETH

        let oracle = Arc::new(PriceOracle::with_providers(dex, store(), vec![]));

        let slow = tokio::spawn({
            let oracle = Arc::clone(&oracle);
            async move { oracle.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        let fast = tokio::spawn({
            let oracle = Arc::clone(&oracle);
            async move { oracle.refresh().await }
        });

        fast.await.unwrap();
        slow.await.unwrap();

        // regardless of arrival order, state reflects the newest-issued
        // request only
        let current = oracle.current().unwrap();
        assert_eq!(current.utility_per_gas, 500.0);
    }
}
