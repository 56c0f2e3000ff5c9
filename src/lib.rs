//! FLUX wallet engine
//!
//! Client-side orchestrator for a dual-token economy on Base:
//! - view FLUX, FORGE, and native ETH balances via an indexing API
//! - buy/sell FLUX against ETH through a liquidity aggregator
//! - transfer tokens peer-to-peer
//! - stake FORGE to accrue continuous FLUX rewards
//! - browse transaction history
//!
//! Settlement on public RPC infrastructure is unreliable to observe, so
//! every orchestration follows the same discipline: bounded receipt
//! polling (an unconfirmed transaction proceeds optimistically, an
//! explicit revert aborts), then balance-delta verification as the final
//! word on whether the operation took economic effect.

pub mod aggregator;
pub mod balances;
pub mod chain;
pub mod config;
pub mod history;
pub mod prices;
pub mod retry;
pub mod staking;
pub mod store;
pub mod swap;
pub mod tokens;
pub mod verify;
pub mod wallet;

mod error;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, ErrorNotice, Result};
pub use swap::{SwapOrchestrator, SwapStep};
pub use verify::SettleOutcome;
