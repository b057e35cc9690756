//! Wallet provider abstraction.
//!
//! A wallet provider is the external party that owns the user's keys: it
//! authorizes accounts, tracks which network the user is on, signs and
//! broadcasts transactions, and pushes account/network change events.
//!
//! The [`WalletProvider`] trait follows the request surface of an injected
//! EIP-1193 provider so that any backend (local key, remote signer,
//! scripted test double) can sit behind the session layer:
//!
//! - [`RpcWallet`]: alloy-backed provider signing with a local private key
//! - [`select_provider`]: picks the compatible provider among several
//!
//! # Example
//!
//! ```rust,ignore
//! use miner_chain::wallet::{select_provider, WalletProvider};
//!
//! let provider = select_provider(&injected)?;
//! let accounts = provider.request_accounts().await?;
//! let chain_id = provider.chain_id().await?;
//! ```

mod discovery;
mod rpc;

pub use discovery::{select_provider, ProviderUnavailable};
pub use rpc::RpcWallet;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tokio::sync::broadcast;

use crate::error::ProviderError;

/// Result of a provider request.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Identity flags a provider announces about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    /// Display name (e.g. "MetaMask", "local-key")
    pub name: String,
    /// Whether this provider can operate the target EVM network
    pub is_compatible: bool,
    /// Whether this provider installs itself over others when injected
    /// (an incompatible wallet claiming the default slot)
    pub shadows_others: bool,
}

impl ProviderInfo {
    /// A compatible provider.
    pub fn compatible(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_compatible: true,
            shadows_others: false,
        }
    }

    /// An incompatible provider that grabs the default injection slot.
    pub fn shadowing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_compatible: false,
            shadows_others: true,
        }
    }
}

/// Native currency metadata for network registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    /// Currency name (e.g. "BNB")
    pub name: String,
    /// Ticker symbol
    pub symbol: String,
    /// Decimals (18 for every EVM native asset in practice)
    pub decimals: u8,
}

/// Parameters for registering a network with a provider (EIP-3085).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParams {
    /// Chain ID
    pub chain_id: u64,
    /// Human-readable name
    pub chain_name: String,
    /// Native currency metadata
    pub native_currency: NativeCurrency,
    /// RPC endpoints, first one preferred
    pub rpc_urls: Vec<String>,
    /// Block explorer URLs
    pub block_explorer_urls: Vec<String>,
}

impl NetworkParams {
    /// Chain ID in the hex form providers expect.
    pub fn chain_id_hex(&self) -> String {
        format!("0x{:x}", self.chain_id)
    }
}

/// Events pushed by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// Authorized accounts changed. Empty means the user disconnected.
    AccountsChanged(Vec<Address>),
    /// The provider switched to another network.
    ChainChanged(u64),
}

/// Settled transaction summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    /// Transaction hash
    pub tx_hash: B256,
    /// Block the transaction was included in
    pub block_number: Option<u64>,
    /// Gas consumed
    pub gas_used: u64,
    /// Execution status (false = reverted)
    pub success: bool,
}

/// Request surface of an external wallet provider.
///
/// Every method is a suspension point. None of them carry a timeout:
/// `request_accounts` waits on the wallet UI, `wait_for_receipt` waits on
/// the ledger.
#[async_trait]
pub trait WalletProvider: Send + Sync + Debug {
    /// Identity flags of this provider.
    fn info(&self) -> ProviderInfo;

    /// Ask the user to authorize accounts (`eth_requestAccounts`).
    async fn request_accounts(&self) -> ProviderResult<Vec<Address>>;

    /// Current network identity (`eth_chainId`).
    async fn chain_id(&self) -> ProviderResult<u64>;

    /// Switch the active network (`wallet_switchEthereumChain`).
    /// Fails with code 4902 when the network is not registered.
    async fn switch_chain(&self, chain_id: u64) -> ProviderResult<()>;

    /// Register a network (`wallet_addEthereumChain`).
    async fn add_chain(&self, params: &NetworkParams) -> ProviderResult<()>;

    /// Read-only call (`eth_call`), returning raw return data.
    async fn call(&self, tx: TransactionRequest) -> ProviderResult<Bytes>;

    /// Pre-flight a transaction (`eth_estimateGas`).
    async fn estimate_gas(&self, tx: TransactionRequest) -> ProviderResult<u64>;

    /// Sign and broadcast (`eth_sendTransaction`), returning the hash once
    /// the provider has accepted the transaction.
    async fn send_transaction(&self, tx: TransactionRequest) -> ProviderResult<B256>;

    /// Wait until the transaction settles.
    async fn wait_for_receipt(&self, tx_hash: B256) -> ProviderResult<TxReceipt>;

    /// Native balance of an address (`eth_getBalance`).
    async fn balance(&self, address: Address) -> ProviderResult<U256>;

    /// Subscribe to account/network change events.
    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}
