//! Network and contract configuration.

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use miner_chain::{NativeCurrency, NetworkParams};
use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Required network identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Chain ID
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Human-readable name
    #[serde(default = "default_chain_name")]
    pub name: String,
    /// RPC endpoints, first one preferred
    #[serde(default = "default_rpc_urls")]
    pub rpc_urls: Vec<String>,
    /// Block explorer URLs
    #[serde(default = "default_explorer_urls")]
    pub explorer_urls: Vec<String>,
    /// Native asset metadata
    #[serde(default = "default_native_currency")]
    pub native_currency: NativeCurrency,
}

fn default_chain_id() -> u64 {
    56
}
fn default_chain_name() -> String {
    "BSC Mainnet".to_string()
}
fn default_rpc_urls() -> Vec<String> {
    vec!["https://bsc-dataseed.binance.org/".to_string()]
}
fn default_explorer_urls() -> Vec<String> {
    vec!["https://bscscan.com/".to_string()]
}
fn default_native_currency() -> NativeCurrency {
    NativeCurrency {
        name: "BNB".to_string(),
        symbol: "BNB".to_string(),
        decimals: 18,
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            name: default_chain_name(),
            rpc_urls: default_rpc_urls(),
            explorer_urls: default_explorer_urls(),
            native_currency: default_native_currency(),
        }
    }
}

impl NetworkConfig {
    /// Registration parameters for a wallet provider.
    pub fn to_params(&self) -> NetworkParams {
        NetworkParams {
            chain_id: self.chain_id,
            chain_name: self.name.clone(),
            native_currency: self.native_currency.clone(),
            rpc_urls: self.rpc_urls.clone(),
            block_explorer_urls: self.explorer_urls.clone(),
        }
    }

    /// Preferred RPC endpoint.
    pub fn primary_rpc(&self) -> Result<&str> {
        self.rpc_urls
            .first()
            .map(String::as_str)
            .context("Network configuration has no RPC URL")
    }

    /// Explorer link for a transaction hash.
    pub fn tx_url(&self, tx_hash: impl std::fmt::Display) -> Option<String> {
        self.explorer_urls
            .first()
            .map(|base| format!("{}/tx/{}", base.trim_end_matches('/'), tx_hash))
    }

    pub(crate) fn expand_env_vars(&mut self) {
        for url in self.rpc_urls.iter_mut().chain(self.explorer_urls.iter_mut()) {
            *url = expand_env(url);
        }
    }
}

/// Target contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractConfig {
    /// Contract address (hex)
    #[serde(default = "default_contract_address")]
    pub address: String,
    /// Optional TOML file overriding candidate signatures
    #[serde(default)]
    pub operations_file: Option<PathBuf>,
}

fn default_contract_address() -> String {
    "0xD9bbb27Df553cfC7Ea919009B4Dd9dc357775836".to_string()
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            address: default_contract_address(),
            operations_file: None,
        }
    }
}

impl ContractConfig {
    /// Parsed contract address.
    pub fn address(&self) -> Result<Address> {
        let trimmed = self.address.trim();
        if trimmed.is_empty() {
            bail!("Contract address is not configured");
        }
        trimmed
            .parse()
            .with_context(|| format!("Invalid contract address '{}'", trimmed))
    }

    pub(crate) fn expand_env_vars(&mut self) {
        self.address = expand_env(&self.address);
    }
}

/// Replace each `${NAME}` with the value of env var `NAME`. Unset
/// variables are left as written.
pub(crate) fn expand_env(s: &str) -> String {
    placeholder()
        .replace_all(s, |caps: &Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is valid"))
}
