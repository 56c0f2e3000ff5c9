//! Local signing wallet
//!
//! The only place where key material exists. The key is read from the
//! environment into a `SecretString`, parsed into alloy's signer, and
//! never logged or serialized.

use crate::{Error, Result};
use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use secrecy::{ExposeSecret, SecretString};

/// Wallet wrapping a locally held private key.
pub struct LocalWallet {
    address: Address,
    wallet: EthereumWallet,
}

impl LocalWallet {
    /// Load the key from an environment variable.
    pub fn from_env(var_name: &str) -> Result<Self> {
        let key = std::env::var(var_name).map_err(|_| {
            Error::Wallet(format!(
                "environment variable {} not set, required for signing",
                var_name
            ))
        })?;
        let key = SecretString::from(key);
        Self::from_hex(key.expose_secret())
    }

    /// Build from a hex-encoded private key, with or without `0x` prefix.
    pub fn from_hex(key_hex: &str) -> Result<Self> {
        let key_hex = key_hex.strip_prefix("0x").unwrap_or(key_hex);
        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|e| Error::Wallet(format!("invalid private key: {}", e)))?;

        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        Ok(Self { address, wallet })
    }

    /// The public address (safe to share).
    pub fn address(&self) -> Address {
        self.address
    }

    /// The alloy wallet for provider integration. Only exposes signing
    /// operations, never the raw key.
    pub fn wallet(&self) -> &EthereumWallet {
        &self.wallet
    }
}

// Manual Debug so the signer can never leak through logging.
impl std::fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWallet")
            .field("address", &self.address)
            .field("signer", &"[REDACTED]")
            .finish()
    }
}
