//! Error types for the wallet orchestrator

use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("aggregator error: {0}")]
    Aggregator(String),

    #[error("no liquidity available: {0}")]
    NoLiquidity(String),

    #[error("invalid quote payload: {0}")]
    InvalidQuote(String),

    #[error("balance indexer error: {0}")]
    Indexer(String),

    #[error("chain RPC error: {0}")]
    Rpc(String),

    #[error("transaction reverted: {0}")]
    Reverted(String),

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// How long a transient error notice stays visible before auto-dismissing.
pub const NOTICE_TTL: Duration = Duration::from_secs(5);

/// A user-facing failure notice raised by an orchestrator.
///
/// Transient notices expire on their own after [`NOTICE_TTL`]; sticky ones
/// (failures during fund-moving steps) stay until explicitly acknowledged.
#[derive(Debug, Clone)]
pub struct ErrorNotice {
    message: String,
    sticky: bool,
    raised_at: Instant,
}

impl ErrorNotice {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sticky: false,
            raised_at: Instant::now(),
        }
    }

    pub fn sticky(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sticky: true,
            raised_at: Instant::now(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_sticky(&self) -> bool {
        self.sticky
    }

    /// Whether the notice should still be shown.
    pub fn is_active(&self) -> bool {
        self.sticky || self.raised_at.elapsed() < NOTICE_TTL
    }
}
