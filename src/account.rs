//! Signing identity for a gateway session
//!
//! At most one account is held at a time. The address is derived from the
//! key and nothing is ever written to disk.

use crate::contract::codec;
use crate::error::{GatewayError, GatewayResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use serde::Serialize;
use std::fmt;
use tokio::sync::RwLock;
use tracing::info;

/// Where the key material came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum KeyOrigin {
    /// Handed in by the operator at runtime
    Supplied,
    /// Read from an environment variable at startup
    Environment { var: String },
}

/// A signing identity derived from a private key
#[derive(Clone)]
pub struct Account {
    address: Address,
    wallet: LocalWallet,
    origin: KeyOrigin,
}

impl Account {
    /// Derive an account from a hex private key, with or without `0x`
    pub fn from_private_key(key: &str, origin: KeyOrigin) -> GatewayResult<Self> {
        let normalized = normalize_key(key)?;
        let wallet = normalized
            .parse::<LocalWallet>()
            .map_err(|e| GatewayError::Validation(format!("Invalid private key: {}", e)))?;

        Ok(Self {
            address: wallet.address(),
            wallet,
            origin,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn origin(&self) -> &KeyOrigin {
        &self.origin
    }

    /// Wallet bound to the chain the transaction targets
    pub fn wallet_for_chain(&self, chain_id: u64) -> LocalWallet {
        self.wallet.clone().with_chain_id(chain_id)
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Strip the optional prefix and check for exactly 32 bytes of hex
fn normalize_key(key: &str) -> GatewayResult<String> {
    let digits = codec::strip_hex_prefix(key.trim());

    if digits.len() != 64 {
        return Err(GatewayError::Validation(format!(
            "Invalid private key: expected 64 hex characters, got {}",
            digits.len()
        )));
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(GatewayError::Validation(
            "Invalid private key: non-hex characters".to_string(),
        ));
    }

    Ok(digits.to_ascii_lowercase())
}

/// Holds the session's single account
#[derive(Debug, Default)]
pub struct AccountSession {
    current: RwLock<Option<Account>>,
}

impl AccountSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current account. The previous one is dropped even when
    /// the new key turns out to be malformed.
    pub async fn set(&self, key: &str, origin: KeyOrigin) -> GatewayResult<Address> {
        let mut current = self.current.write().await;
        match Account::from_private_key(key, origin) {
            Ok(account) => {
                let address = account.address();
                info!("Account set: {:?} ({:?})", address, account.origin());
                *current = Some(account);
                Ok(address)
            }
            Err(e) => {
                *current = None;
                Err(e)
            }
        }
    }

    pub async fn clear(&self) {
        if let Some(account) = self.current.write().await.take() {
            info!("Account cleared: {:?}", account.address());
        }
    }

    /// Address of the current account, or `None`
    pub async fn current_address(&self) -> Option<Address> {
        self.current.read().await.as_ref().map(Account::address)
    }

    /// The account required for signing
    pub async fn require(&self) -> GatewayResult<Account> {
        self.current
            .read()
            .await
            .clone()
            .ok_or(GatewayError::NoAccount)
    }
}
