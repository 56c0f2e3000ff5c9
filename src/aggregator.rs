//! Liquidity aggregator client
//!
//! Speaks the aggregator's v3 HTTP API: rate quotes, executable swap
//! quotes, and the spender-allowance endpoint. The allowance response is
//! loosely typed upstream (object, array-of-objects, or bare scalar) and
//! is normalized to a single integer at this boundary so nothing untyped
//! leaks into the orchestration logic.

use crate::config::{Config, CHAIN_SLUG};
use crate::tokens::{addresses, TokenDescriptor};
use crate::{Error, Result};
use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use serde_json::Value;
use std::str::FromStr;

/// An executable quote for one specific (input, output, amount, slippage,
/// account) tuple. Invalidated the moment any of those inputs change.
#[derive(Debug, Clone)]
pub struct SwapQuote {
    /// Call target (the aggregator router)
    pub to: Address,
    /// Ready-to-submit call payload
    pub data: Bytes,
    /// Native value to attach
    pub value: U256,
    /// Declared output amount in the output token's smallest units
    pub out_amount: U256,
    /// Spender that must be authorized for ERC-20 inputs
    pub spender: Address,
}

/// Aggregator operations the orchestrators depend on.
#[async_trait]
pub trait DexApi: Send + Sync {
    /// Output amount for swapping `amount` of `input` into `output`
    /// (display/pricing quote, no payload).
    async fn rate_quote(
        &self,
        input: &TokenDescriptor,
        output: &TokenDescriptor,
        amount: U256,
    ) -> Result<U256>;

    /// Executable swap quote for a specific account and slippage.
    async fn swap_quote(
        &self,
        input: &TokenDescriptor,
        output: &TokenDescriptor,
        amount: U256,
        slippage_pct: f64,
        account: Address,
    ) -> Result<SwapQuote>;

    /// Current allowance the aggregator router holds over `token`.
    /// `None` means the endpoint could not be read; callers treat that
    /// conservatively as "approval required".
    async fn allowance(&self, owner: Address, token: &TokenDescriptor) -> Option<U256>;

    /// The router spender address approvals must authorize.
    fn spender(&self) -> Address;
}

/// HTTP client for the aggregator API.
pub struct AggregatorClient {
    http: reqwest::Client,
    base_url: String,
    gas_price_hint: String,
    router: Address,
}

impl AggregatorClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("{}/{}", config.endpoints.aggregator_url, CHAIN_SLUG),
            gas_price_hint: config.gas_price_hint.clone(),
            router: addresses::AGGREGATOR_ROUTER,
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self.http.get(&url).query(query).send().await?;
        if !response.status().is_success() {
            return Err(Error::Aggregator(format!(
                "{} returned {}",
                path,
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl DexApi for AggregatorClient {
    async fn rate_quote(
        &self,
        input: &TokenDescriptor,
        output: &TokenDescriptor,
        amount: U256,
    ) -> Result<U256> {
        let body = self
            .get_json(
                "quote",
                &[
                    ("inTokenAddress", input.address.to_string()),
                    ("outTokenAddress", output.address.to_string()),
                    ("amount", amount.to_string()),
                    ("gasPrice", self.gas_price_hint.clone()),
                ],
            )
            .await?;
        parse_rate_quote(&body, input, output)
    }

    async fn swap_quote(
        &self,
        input: &TokenDescriptor,
        output: &TokenDescriptor,
        amount: U256,
        slippage_pct: f64,
        account: Address,
    ) -> Result<SwapQuote> {
        let body = self
            .get_json(
                "swap_quote",
                &[
                    ("inTokenAddress", input.address.to_string()),
                    ("outTokenAddress", output.address.to_string()),
                    ("amount", amount.to_string()),
                    ("slippage", format!("{}", slippage_pct)),
                    ("gasPrice", self.gas_price_hint.clone()),
                    ("account", account.to_string()),
                ],
            )
            .await?;
        parse_swap_quote(&body, self.router)
    }

    async fn allowance(&self, owner: Address, token: &TokenDescriptor) -> Option<U256> {
        let result = self
            .get_json(
                "allowance",
                &[
                    ("account", owner.to_string()),
                    ("inTokenAddress", token.address.to_string()),
                ],
            )
            .await;
        match result {
            Ok(body) => {
                let allowance = body.get("data").and_then(normalize_allowance);
                if allowance.is_none() {
                    tracing::warn!(token = token.symbol, "allowance response had no usable value");
                }
                allowance
            }
            Err(e) => {
                tracing::warn!(token = token.symbol, error = %e, "allowance lookup failed");
                None
            }
        }
    }

    fn spender(&self) -> Address {
        self.router
    }
}

fn check_code(body: &Value) -> Result<()> {
    if let Some(code) = body.get("code").and_then(|c| c.as_i64()) {
        if code != 200 {
            return Err(Error::Aggregator(format!("aggregator returned code {}", code)));
        }
    }
    Ok(())
}

fn parse_rate_quote(body: &Value, input: &TokenDescriptor, output: &TokenDescriptor) -> Result<U256> {
    check_code(body)?;
    let out_amount = body
        .get("data")
        .and_then(|d| d.get("outAmount"))
        .and_then(value_to_u256)
        .ok_or_else(|| Error::InvalidQuote("missing outAmount".to_string()))?;
    if out_amount.is_zero() {
        return Err(Error::NoLiquidity(format!(
            "{} -> {}",
            input.symbol, output.symbol
        )));
    }
    Ok(out_amount)
}

fn parse_swap_quote(body: &Value, spender: Address) -> Result<SwapQuote> {
    check_code(body)?;
    let data = body
        .get("data")
        .ok_or_else(|| Error::InvalidQuote("empty response".to_string()))?;

    let to = data
        .get("to")
        .and_then(|v| v.as_str())
        .and_then(|s| Address::from_str(s).ok())
        .ok_or_else(|| Error::InvalidQuote("missing call target".to_string()))?;
    let payload = data
        .get("data")
        .and_then(|v| v.as_str())
        .and_then(|s| Bytes::from_str(s).ok())
        .ok_or_else(|| Error::InvalidQuote("missing call payload".to_string()))?;
    let value = data
        .get("value")
        .and_then(value_to_u256)
        .unwrap_or(U256::ZERO);
    let out_amount = data
        .get("outAmount")
        .and_then(value_to_u256)
        .unwrap_or(U256::ZERO);

    Ok(SwapQuote {
        to,
        data: payload,
        value,
        out_amount,
        spender,
    })
}

/// Reduce the aggregator's loosely-typed allowance payload to one integer.
pub fn normalize_allowance(data: &Value) -> Option<U256> {
    match data {
        Value::String(_) | Value::Number(_) => value_to_u256(data),
        Value::Array(items) => items.first().and_then(normalize_allowance),
        Value::Object(map) => map.values().next().and_then(normalize_allowance),
        _ => None,
    }
}

fn value_to_u256(value: &Value) -> Option<U256> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x") {
                U256::from_str_radix(hex, 16).ok()
            } else {
                U256::from_str(s).ok()
            }
        }
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                Some(U256::from(v))
            } else {
                n.as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                    .map(|f| U256::from(f as u128))
            }
        }
        _ => None,
    }
}
