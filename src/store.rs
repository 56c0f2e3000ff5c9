//! Persisted key-value state
//!
//! Process-wide keyed store behind an injected accessor trait, shared by
//! the price oracle (last-known-good price records) and the per-provider
//! rate limiter (last-request timestamps). Freshness is decided by the
//! stored timestamps, never by write order.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Cache key for the combined price record
const PRICE_RECORD_KEY: &str = "token_prices";

/// A cached price record may seed the display for up to 6 hours.
pub const PRICE_DISPLAY_MAX_AGE: Duration = Duration::from_secs(6 * 60 * 60);

/// A cached price record remains a last-resort fallback for 24 hours.
pub const PRICE_FALLBACK_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Minimum spacing between requests to the same rate provider.
pub const PROVIDER_COOLDOWN: Duration = Duration::from_secs(30);

/// String-keyed store with last-write-wins semantics.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: String);
}

/// In-memory store for tests and cache-less configurations.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().expect("store lock").get(key).cloned()
    }

    fn put(&self, key: &str, value: String) {
        self.entries.lock().expect("store lock").insert(key.to_string(), value);
    }
}

/// JSON-file-backed store, persisted on every write.
///
/// Write failures are logged and absorbed: losing a cache write must never
/// fail a pricing or rate-limiting flow.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn persist(&self, entries: &HashMap<String, String>) {
        let serialized = match serde_json::to_string_pretty(entries) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize state store");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, serialized) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to persist state store");
        }
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().expect("store lock").get(key).cloned()
    }

    fn put(&self, key: &str, value: String) {
        let mut entries = self.entries.lock().expect("store lock");
        entries.insert(key.to_string(), value);
        self.persist(&entries);
    }
}

/// Combined price record persisted across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Gas token (ETH) price in fiat
    pub gas_fiat: f64,
    /// Utility tokens received per 1 gas token
    pub utility_per_gas: f64,
    /// Utility token price in fiat
    pub utility_fiat: f64,
    /// Unix milliseconds at which the record was taken
    pub timestamp_ms: i64,
}

impl PriceRecord {
    pub fn age(&self, now_ms: i64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.timestamp_ms).max(0) as u64)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Typed accessor for the persisted price record.
pub struct PriceCache {
    store: std::sync::Arc<dyn KvStore>,
}

impl PriceCache {
    pub fn new(store: std::sync::Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Load the record if it is younger than `max_age`.
    pub fn load_fresh(&self, max_age: Duration) -> Option<PriceRecord> {
        let raw = self.store.get(PRICE_RECORD_KEY)?;
        let record: PriceRecord = serde_json::from_str(&raw).ok()?;
        if record.age(now_ms()) <= max_age {
            Some(record)
        } else {
            None
        }
    }

    /// Persist a new record, superseding whatever was stored.
    pub fn store(&self, mut record: PriceRecord) {
        if record.timestamp_ms == 0 {
            record.timestamp_ms = now_ms();
        }
        match serde_json::to_string(&record) {
            Ok(serialized) => self.store.put(PRICE_RECORD_KEY, serialized),
            Err(e) => tracing::warn!(error = %e, "failed to serialize price record"),
        }
    }
}

/// Per-provider request throttle backed by persisted timestamps.
pub struct ProviderThrottle {
    store: std::sync::Arc<dyn KvStore>,
}

impl ProviderThrottle {
    pub fn new(store: std::sync::Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn key(provider: &str) -> String {
        format!("last_{}_request", provider)
    }

    /// Whether the provider is still inside its cooldown window.
    pub fn should_skip(&self, provider: &str, cooldown: Duration) -> bool {
        let last: i64 = self
            .store
            .get(&Self::key(provider))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let elapsed_ms = now_ms().saturating_sub(last);
        elapsed_ms >= 0 && (elapsed_ms as u128) < cooldown.as_millis()
    }

    /// Record that a request to the provider was just issued.
    pub fn mark(&self, provider: &str) {
        self.store.put(&Self::key(provider), now_ms().to_string());
    }
}
