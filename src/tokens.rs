//! Shared token registry
//!
//! Centralizes token metadata (addresses, decimals, symbols) so every
//! component formats and scales amounts the same way. This module is the
//! single source of truth for token information and amount conversion.

use crate::{Error, Result};
use alloy::primitives::{address, Address, U256};
use std::str::FromStr;

/// Token metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenDescriptor {
    /// Token contract address, or the zero-address sentinel for native ETH
    pub address: Address,
    /// Number of decimals
    pub decimals: u8,
    /// Token symbol (e.g., "FLUX", "ETH")
    pub symbol: &'static str,
}

impl TokenDescriptor {
    pub const fn new(address: Address, decimals: u8, symbol: &'static str) -> Self {
        Self {
            address,
            decimals,
            symbol,
        }
    }

    /// Whether this descriptor refers to the native gas token.
    pub fn is_native(&self) -> bool {
        self.address == addresses::NATIVE_ETH
    }

    /// One whole token in smallest units (`10^decimals`).
    pub fn base_units(&self) -> U256 {
        U256::from(10u64).pow(U256::from(self.decimals))
    }

    /// Format a raw amount for display.
    pub fn format_raw(&self, raw: U256) -> String {
        format_units(raw, self.decimals)
    }

    /// Parse a display amount into smallest units.
    pub fn parse_amount(&self, display: &str) -> Result<U256> {
        parse_units(display, self.decimals)
    }
}

/// Contract addresses on Base (chain id 8453)
pub mod addresses {
    use super::*;

    /// FLUX utility token (2 decimals)
    pub const FLUX_TOKEN: Address = address!("5af1b6c3e2d94c1a7b08d544f0ce9cb14d9a6e21");
    /// FORGE investment/staking token (0 decimals)
    pub const FORGE_TOKEN: Address = address!("93c4d8a17e5b20f6ab7cd0412e88fa6b39d5c7e4");
    /// FORGE staking contract, pays rewards in FLUX
    pub const STAKING_CONTRACT: Address = address!("c02f1d83b9a6e4057d21ce9b44af08e6d13b7a90");
    /// Aggregator router on Base; the spender that swap approvals authorize
    pub const AGGREGATOR_ROUTER: Address = address!("6352a56caadc4f1e25cd6c75970fa768a3304e64");
    /// Zero-address sentinel for native ETH
    pub const NATIVE_ETH: Address = address!("0000000000000000000000000000000000000000");
}

/// FLUX utility token descriptor
pub const FLUX: TokenDescriptor = TokenDescriptor::new(addresses::FLUX_TOKEN, 2, "FLUX");
/// FORGE investment token descriptor
pub const FORGE: TokenDescriptor = TokenDescriptor::new(addresses::FORGE_TOKEN, 0, "FORGE");
/// Native ETH descriptor
pub const NATIVE: TokenDescriptor = TokenDescriptor::new(addresses::NATIVE_ETH, 18, "ETH");

/// Look up a descriptor by symbol (case-insensitive).
pub fn by_symbol(symbol: &str) -> Option<&'static TokenDescriptor> {
    match symbol.to_uppercase().as_str() {
        "FLUX" => Some(&FLUX),
        "FORGE" => Some(&FORGE),
        "ETH" => Some(&NATIVE),
        _ => None,
    }
}

/// Format a raw amount with exactly `decimals` fractional digits.
///
/// Raw `12345` with 2 decimals renders as `"123.45"`; raw `7` with 0
/// decimals renders as `"7"`. No zero-trimming: display width is fixed
/// per token so values line up and never flicker.
pub fn format_units(raw: U256, decimals: u8) -> String {
    if decimals == 0 {
        return raw.to_string();
    }
    let scale = U256::from(10u64).pow(U256::from(decimals));
    let whole = raw / scale;
    let frac = raw % scale;
    format!("{}.{:0>width$}", whole, frac, width = decimals as usize)
}

/// Parse a display amount into smallest units, scaling by `10^decimals`.
///
/// Rejects negative values, non-numeric input, and more fractional digits
/// than the token carries.
pub fn parse_units(display: &str, decimals: u8) -> Result<U256> {
    let display = display.trim();
    if display.is_empty() {
        return Err(Error::InvalidArgument("empty amount".to_string()));
    }
    if display.starts_with('-') {
        return Err(Error::InvalidArgument(format!(
            "amount must be positive: {}",
            display
        )));
    }

    let (whole, frac) = match display.split_once('.') {
        Some((w, f)) => (w, f),
        None => (display, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(Error::InvalidArgument(format!("invalid amount: {}", display)));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::InvalidArgument(format!("invalid amount: {}", display)));
    }
    if frac.len() > decimals as usize {
        return Err(Error::InvalidArgument(format!(
            "at most {} decimal places allowed: {}",
            decimals, display
        )));
    }

    let scale = U256::from(10u64).pow(U256::from(decimals));
    let whole_part = if whole.is_empty() {
        U256::ZERO
    } else {
        U256::from_str(whole)
            .map_err(|e| Error::InvalidArgument(format!("invalid amount {}: {}", display, e)))?
    };
    let frac_part = if frac.is_empty() {
        U256::ZERO
    } else {
        let padded = format!("{:0<width$}", frac, width = decimals as usize);
        U256::from_str(&padded)
            .map_err(|e| Error::InvalidArgument(format!("invalid amount {}: {}", display, e)))?
    };

    whole_part
        .checked_mul(scale)
        .and_then(|scaled| scaled.checked_add(frac_part))
        .ok_or_else(|| Error::InvalidArgument(format!("amount out of range: {}", display)))
}

/// Lossy conversion of a raw amount to a display float.
///
/// Only for price arithmetic and previews, never for on-chain amounts.
pub fn units_to_f64(raw: U256, decimals: u8) -> f64 {
    let value: f64 = raw.to_string().parse().unwrap_or(0.0);
    value / 10f64.powi(decimals as i32)
}
