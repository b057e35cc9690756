//! Local-key wallet provider backed by alloy HTTP providers.
//!
//! Behaves like an injected wallet from the session layer's point of view:
//! it keeps a table of registered networks, refuses to switch to a network
//! it does not know (code 4902), and announces network switches on its
//! event channel.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::TransportError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use super::{NetworkParams, ProviderInfo, ProviderResult, TxReceipt, WalletEvent, WalletProvider};
use crate::error::{codes, ProviderError};

/// Interval between receipt lookups while a transaction is pending.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Event channel capacity.
const EVENT_CAPACITY: usize = 16;

/// Wallet provider that signs with a local private key.
pub struct RpcWallet {
    /// Signer wallet
    wallet: EthereumWallet,
    /// Signer address
    address: Address,
    /// Active RPC endpoint
    rpc_url: RwLock<String>,
    /// Registered networks by chain ID
    networks: DashMap<u64, NetworkParams>,
    /// Account/network change notifications
    events: broadcast::Sender<WalletEvent>,
}

impl RpcWallet {
    /// Create a wallet from a private key (with or without 0x prefix),
    /// pointed at an initial RPC endpoint.
    pub fn new(private_key: &str, rpc_url: impl Into<String>) -> Result<Self> {
        let key_str = private_key.trim().trim_start_matches("0x");
        let signer: PrivateKeySigner = key_str.parse().context("Invalid private key")?;
        let address = signer.address();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let rpc_url = rpc_url.into();

        info!(address = %address, rpc = %rpc_url, "Local key wallet initialized");

        Ok(Self {
            wallet: EthereumWallet::from(signer),
            address,
            rpc_url: RwLock::new(rpc_url),
            networks: DashMap::new(),
            events,
        })
    }

    /// Pre-register a network, as if the user had added it earlier.
    pub fn with_network(self, params: NetworkParams) -> Self {
        self.networks.insert(params.chain_id, params);
        self
    }

    /// Signer address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Active RPC endpoint.
    pub fn rpc_url(&self) -> String {
        self.rpc_url.read().clone()
    }

    fn endpoint<U>(&self) -> ProviderResult<U>
    where
        U: std::str::FromStr,
        U::Err: std::fmt::Display,
    {
        parse_url(&self.rpc_url.read())
    }
}

fn parse_url<U>(url: &str) -> ProviderResult<U>
where
    U: std::str::FromStr,
    U::Err: std::fmt::Display,
{
    url.parse()
        .map_err(|e| ProviderError::new(codes::INTERNAL_ERROR, format!("Invalid RPC URL {url}: {e}")))
}

/// Convert a transport failure into the provider's `{ code, message, data }`
/// shape, keeping revert data when the node returned some.
fn map_transport_error(err: TransportError) -> ProviderError {
    if let Some(payload) = err.as_error_resp() {
        let mut mapped = ProviderError::new(payload.code, payload.message.to_string());
        if let Some(data) = payload.as_revert_data() {
            mapped = mapped.with_data(data);
        }
        return mapped;
    }
    ProviderError::message(err.to_string())
}

impl std::fmt::Debug for RpcWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcWallet")
            .field("address", &self.address)
            .field("rpc_url", &*self.rpc_url.read())
            .field("networks", &self.networks.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl WalletProvider for RpcWallet {
    fn info(&self) -> ProviderInfo {
        ProviderInfo::compatible("local-key")
    }

    async fn request_accounts(&self) -> ProviderResult<Vec<Address>> {
        // A local key is authorized by construction.
        Ok(vec![self.address])
    }

    async fn chain_id(&self) -> ProviderResult<u64> {
        let provider = ProviderBuilder::new().on_http(self.endpoint()?);
        provider.get_chain_id().await.map_err(map_transport_error)
    }

    #[instrument(skip(self))]
    async fn switch_chain(&self, chain_id: u64) -> ProviderResult<()> {
        let params = self
            .networks
            .get(&chain_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ProviderError::unrecognized_chain(chain_id))?;

        let url = params.rpc_urls.first().cloned().ok_or_else(|| {
            ProviderError::new(codes::INTERNAL_ERROR, "Registered network has no RPC URL")
        })?;

        let provider = ProviderBuilder::new().on_http(parse_url(&url)?);
        let reported = provider.get_chain_id().await.map_err(map_transport_error)?;
        if reported != chain_id {
            return Err(ProviderError::new(
                codes::INTERNAL_ERROR,
                format!("RPC endpoint {url} serves chain {reported}, expected {chain_id}"),
            ));
        }

        let previous = std::mem::replace(&mut *self.rpc_url.write(), url.clone());
        if previous != url {
            info!(chain_id = chain_id, rpc = %url, "Switched network");
            // No receivers is fine.
            let _ = self.events.send(WalletEvent::ChainChanged(chain_id));
        }
        Ok(())
    }

    async fn add_chain(&self, params: &NetworkParams) -> ProviderResult<()> {
        if params.rpc_urls.is_empty() {
            return Err(ProviderError::new(
                codes::INTERNAL_ERROR,
                "wallet_addEthereumChain requires at least one RPC URL",
            ));
        }
        info!(
            chain_id = params.chain_id,
            name = %params.chain_name,
            "Registering network"
        );
        self.networks.insert(params.chain_id, params.clone());
        Ok(())
    }

    async fn call(&self, tx: TransactionRequest) -> ProviderResult<Bytes> {
        let provider = ProviderBuilder::new().on_http(self.endpoint()?);
        provider
            .call(tx.with_from(self.address))
            .await
            .map_err(map_transport_error)
    }

    async fn estimate_gas(&self, tx: TransactionRequest) -> ProviderResult<u64> {
        let provider = ProviderBuilder::new().on_http(self.endpoint()?);
        provider
            .estimate_gas(tx.with_from(self.address))
            .await
            .map_err(map_transport_error)
    }

    #[instrument(skip(self, tx))]
    async fn send_transaction(&self, tx: TransactionRequest) -> ProviderResult<B256> {
        let provider = ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(self.endpoint()?);

        let pending = provider
            .send_transaction(tx.with_from(self.address))
            .await
            .map_err(map_transport_error)?;
        let tx_hash = *pending.tx_hash();

        info!(tx_hash = %tx_hash, "[TX] Transaction broadcast");
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> ProviderResult<TxReceipt> {
        let provider = ProviderBuilder::new().on_http(self.endpoint()?);
        loop {
            match provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    return Ok(TxReceipt {
                        tx_hash,
                        block_number: receipt.block_number,
                        gas_used: receipt.gas_used as u64,
                        success: receipt.status(),
                    });
                }
                Ok(None) => {
                    debug!(tx_hash = %tx_hash, "Receipt not available yet");
                }
                Err(e) => {
                    // Transient lookup failures keep the wait alive.
                    warn!(tx_hash = %tx_hash, error = %e, "Receipt lookup failed");
                }
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    async fn balance(&self, address: Address) -> ProviderResult<U256> {
        let provider = ProviderBuilder::new().on_http(self.endpoint()?);
        provider.get_balance(address).await.map_err(map_transport_error)
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::NativeCurrency;

    // Well-known development key (DO NOT USE IN PRODUCTION)
    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn bsc_testnet() -> NetworkParams {
        NetworkParams {
            chain_id: 97,
            chain_name: "BSC Testnet".to_string(),
            native_currency: NativeCurrency {
                name: "BNB".to_string(),
                symbol: "tBNB".to_string(),
                decimals: 18,
            },
            rpc_urls: vec!["https://data-seed-prebsc-1-s1.binance.org:8545/".to_string()],
            block_explorer_urls: vec!["https://testnet.bscscan.com/".to_string()],
        }
    }

    #[test]
    fn test_wallet_address_from_key() {
        let wallet = RpcWallet::new(TEST_KEY, "http://localhost:8545").unwrap();
        assert_eq!(
            format!("{:?}", wallet.address()).to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert!(wallet.info().is_compatible);
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(RpcWallet::new("not-a-key", "http://localhost:8545").is_err());
    }

    #[tokio::test]
    async fn test_switch_to_unregistered_chain_fails_with_4902() {
        let wallet = RpcWallet::new(TEST_KEY, "http://localhost:8545").unwrap();
        let err = wallet.switch_chain(97).await.unwrap_err();
        assert!(err.is_unrecognized_chain());
    }

    #[tokio::test]
    async fn test_add_chain_requires_rpc_url() {
        let wallet = RpcWallet::new(TEST_KEY, "http://localhost:8545").unwrap();
        let mut params = bsc_testnet();
        params.rpc_urls.clear();
        assert!(wallet.add_chain(&params).await.is_err());

        wallet.add_chain(&bsc_testnet()).await.unwrap();
        assert!(wallet.networks.contains_key(&97));
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_switch_after_registration() {
        let wallet = RpcWallet::new(TEST_KEY, "http://localhost:8545").unwrap();
        let mut events = wallet.subscribe();
        wallet.add_chain(&bsc_testnet()).await.unwrap();
        wallet.switch_chain(97).await.unwrap();
        assert_eq!(wallet.chain_id().await.unwrap(), 97);
        assert_eq!(events.recv().await.unwrap(), WalletEvent::ChainChanged(97));
    }
}
