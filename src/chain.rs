//! Chain access
//!
//! Thin client over the chain JSON-RPC node: native balance, contract
//! reads, transaction submission, and bounded receipt polling. Contract
//! call data is hand-encoded (selector plus 32-byte words); the handful of
//! functions this wallet touches does not justify an ABI code generator.

use crate::retry::{poll_until, PollOutcome, RetryPolicy};
use crate::wallet::LocalWallet;
use crate::{Error, Result};
use alloy::network::EthereumWallet;
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;

/// Terminal status reported by a transaction receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Reverted,
}

/// Outcome of a bounded receipt wait.
///
/// `Unknown` means the bound elapsed without a receipt; per the
/// confirmation policy that is non-fatal and callers proceed to balance
/// verification. Only `Reverted` aborts an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Confirmed,
    Reverted,
    Unknown,
}

/// A prepared contract call or value transfer.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

impl CallRequest {
    pub fn contract(to: Address, data: Bytes) -> Self {
        Self {
            to,
            data,
            value: U256::ZERO,
        }
    }

    pub fn native_transfer(to: Address, value: U256) -> Self {
        Self {
            to,
            data: Bytes::new(),
            value,
        }
    }
}

/// Chain operations the orchestrators depend on.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Sign and broadcast a call, returning its transaction hash.
    async fn submit(&self, call: CallRequest) -> Result<B256>;

    /// Receipt status by hash; `None` while the transaction is unconfirmed.
    async fn receipt_status(&self, hash: B256) -> Result<Option<TxStatus>>;

    /// Whether the node knows the transaction at all (mempool presence).
    async fn transaction_known(&self, hash: B256) -> bool;

    /// Native ETH balance of an address.
    async fn native_balance(&self, owner: Address) -> Result<U256>;

    /// Read-only contract call.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;
}

/// Poll for a receipt by hash until confirmed, reverted, or the bound
/// elapses. Individual query failures count as "not yet confirmed".
pub async fn wait_for_receipt<C>(chain: &C, hash: B256, policy: RetryPolicy) -> ReceiptOutcome
where
    C: ChainClient + ?Sized,
{
    let outcome = poll_until(policy, |attempt| async move {
        match chain.receipt_status(hash).await {
            Ok(Some(status)) => Some(status),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(%hash, attempt, error = %e, "receipt query failed, retrying");
                None
            }
        }
    })
    .await;

    match outcome {
        PollOutcome::Completed(TxStatus::Success) => ReceiptOutcome::Confirmed,
        PollOutcome::Completed(TxStatus::Reverted) => ReceiptOutcome::Reverted,
        PollOutcome::Exhausted => {
            tracing::warn!(%hash, "no receipt within bound, proceeding optimistically");
            ReceiptOutcome::Unknown
        }
    }
}

/// First four bytes of the keccak hash of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// An address left-padded into a 32-byte ABI word.
pub fn address_word(address: Address) -> U256 {
    U256::from_be_slice(address.as_slice())
}

/// Encode a call as selector plus full 32-byte words.
pub fn encode_call(signature: &str, words: &[U256]) -> Bytes {
    let mut data = selector(signature).to_vec();
    for word in words {
        data.extend_from_slice(&word.to_be_bytes::<32>());
    }
    Bytes::from(data)
}

/// Decode the `index`-th 32-byte word of a return payload.
pub fn decode_word(data: &[u8], index: usize) -> Option<U256> {
    let start = index * 32;
    let end = start + 32;
    if data.len() < end {
        return None;
    }
    Some(U256::from_be_slice(&data[start..end]))
}

/// ERC-20 call data
pub mod erc20 {
    use super::*;

    pub fn balance_of(owner: Address) -> Bytes {
        encode_call("balanceOf(address)", &[address_word(owner)])
    }

    pub fn allowance(owner: Address, spender: Address) -> Bytes {
        encode_call(
            "allowance(address,address)",
            &[address_word(owner), address_word(spender)],
        )
    }

    pub fn approve(spender: Address, amount: U256) -> Bytes {
        encode_call("approve(address,uint256)", &[address_word(spender), amount])
    }

    pub fn transfer(to: Address, amount: U256) -> Bytes {
        encode_call("transfer(address,uint256)", &[address_word(to), amount])
    }
}

/// Alloy-backed chain client.
///
/// Providers are built per call from the configured URL, the way a fresh
/// connection is cheapest with HTTP transports.
pub struct EvmClient {
    rpc_url: url::Url,
    wallet: EthereumWallet,
    address: Address,
}

impl EvmClient {
    pub fn new(rpc_url: &str, signer: &LocalWallet) -> Result<Self> {
        let rpc_url: url::Url = rpc_url
            .parse()
            .map_err(|e| Error::Config(format!("invalid RPC URL: {}", e)))?;
        Ok(Self {
            rpc_url,
            wallet: signer.wallet().clone(),
            address: signer.address(),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn provider(&self) -> impl Provider {
        ProviderBuilder::new().connect_http(self.rpc_url.clone())
    }

    fn signing_provider(&self) -> impl Provider {
        ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .connect_http(self.rpc_url.clone())
    }
}

#[async_trait]
impl ChainClient for EvmClient {
    async fn submit(&self, call: CallRequest) -> Result<B256> {
        let mut tx = TransactionRequest::default()
            .from(self.address)
            .to(call.to)
            .value(call.value);
        if !call.data.is_empty() {
            tx = tx.input(call.data.into());
        }

        let pending = self
            .signing_provider()
            .send_transaction(tx)
            .await
            .map_err(|e| Error::Rpc(format!("failed to send transaction: {}", e)))?;
        let hash = *pending.tx_hash();
        tracing::info!(%hash, "transaction broadcast");
        Ok(hash)
    }

    async fn receipt_status(&self, hash: B256) -> Result<Option<TxStatus>> {
        let receipt = self
            .provider()
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| Error::Rpc(format!("failed to fetch receipt: {}", e)))?;
        Ok(receipt.map(|r| {
            if r.status() {
                TxStatus::Success
            } else {
                TxStatus::Reverted
            }
        }))
    }

    async fn transaction_known(&self, hash: B256) -> bool {
        matches!(
            self.provider().get_transaction_by_hash(hash).await,
            Ok(Some(_))
        )
    }

    async fn native_balance(&self, owner: Address) -> Result<U256> {
        self.provider()
            .get_balance(owner)
            .await
            .map_err(|e| Error::Rpc(format!("failed to get balance: {}", e)))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let tx = TransactionRequest::default().to(to).input(data.into());
        self.provider()
            .call(tx)
            .await
            .map_err(|e| Error::Rpc(format!("eth_call failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn selectors_match_known_values() {
        assert_eq!(selector("balanceOf(address)"), [0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(
            selector("transfer(address,uint256)"),
            [0xa9, 0x05, 0x9c, 0xbb]
        );
        assert_eq!(
            selector("approve(address,uint256)"),
            [0x09, 0x5e, 0xa7, 0xb3]
        );
        assert_eq!(
            selector("allowance(address,address)"),
            [0xdd, 0x62, 0xed, 0x3e]
        );
    }

    #[test]
    fn encode_call_lays_out_words() {
        let owner = Address::repeat_byte(0x11);
        let data = erc20::balance_of(owner);
        assert_eq!(data.len(), 4 + 32);
        assert_eq!(&data[..4], &[0x70, 0xa0, 0x82, 0x31]);
        // address is right-aligned in its word
        assert!(data[4..16].iter().all(|b| *b == 0));
        assert_eq!(&data[16..36], owner.as_slice());
    }

    #[test]
    fn approve_encodes_amount() {
        let spender = Address::repeat_byte(0x22);
        let data = erc20::approve(spender, U256::from(1_000u64));
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(decode_word(&data[4..], 1), Some(U256::from(1_000u64)));
    }

    #[test]
    fn decode_word_bounds() {
        let data = [0u8; 64];
        assert_eq!(decode_word(&data, 1), Some(U256::ZERO));
        assert_eq!(decode_word(&data, 2), None);
    }

    struct ScriptedChain {
        // one entry per receipt poll: None = unconfirmed, Some = terminal
        receipts: Mutex<Vec<Option<TxStatus>>>,
    }

    impl ScriptedChain {
        fn new(mut script: Vec<Option<TxStatus>>) -> Self {
            script.reverse();
            Self {
                receipts: Mutex::new(script),
            }
        }
    }

    #[async_trait]
    impl ChainClient for ScriptedChain {
        async fn submit(&self, _call: CallRequest) -> Result<B256> {
            Ok(B256::ZERO)
        }

        async fn receipt_status(&self, _hash: B256) -> Result<Option<TxStatus>> {
            Ok(self.receipts.lock().unwrap().pop().flatten())
        }

        async fn transaction_known(&self, _hash: B256) -> bool {
            true
        }

        async fn native_balance(&self, _owner: Address) -> Result<U256> {
            Ok(U256::ZERO)
        }

        async fn call(&self, _to: Address, _data: Bytes) -> Result<Bytes> {
            Ok(Bytes::new())
        }
    }

    fn short_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            std::time::Duration::ZERO,
            crate::retry::BackoffSchedule::Fixed(std::time::Duration::from_secs(2)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn receipt_confirmed_after_pending_polls() {
        let chain = ScriptedChain::new(vec![None, None, Some(TxStatus::Success)]);
        let outcome = wait_for_receipt(&chain, B256::ZERO, short_policy(10)).await;
        assert_eq!(outcome, ReceiptOutcome::Confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn receipt_reverted_is_terminal() {
        let chain = ScriptedChain::new(vec![None, Some(TxStatus::Reverted)]);
        let outcome = wait_for_receipt(&chain, B256::ZERO, short_policy(10)).await;
        assert_eq!(outcome, ReceiptOutcome::Reverted);
    }

    #[tokio::test(start_paused = true)]
    async fn receipt_unknown_after_bound() {
        let chain = ScriptedChain::new(vec![]);
        let outcome = wait_for_receipt(&chain, B256::ZERO, short_policy(3)).await;
        assert_eq!(outcome, ReceiptOutcome::Unknown);
    }
}
