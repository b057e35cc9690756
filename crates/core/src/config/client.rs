//! Client configuration.
//!
//! Every section is optional in TOML; missing values fall back to the
//! built-in defaults (BSC mainnet, 30 s state refresh, 5 min price refresh).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::network::{expand_env, ContractConfig, NetworkConfig};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "MINER_CONFIG";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Required network identity
    #[serde(default)]
    pub network: NetworkConfig,

    /// Target contract
    #[serde(default)]
    pub contract: ContractConfig,

    /// Refresh periods
    #[serde(default)]
    pub polling: PollingConfig,

    /// Action parameters
    #[serde(default)]
    pub actions: ActionsConfig,

    /// Price feed endpoint
    #[serde(default)]
    pub price_feed: PriceFeedConfig,

    /// Persistent storage
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Refresh periods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Session-dependent state refresh, while connected
    #[serde(default = "default_state_interval")]
    pub state_interval_secs: u64,
    /// Price feed refresh, regardless of session state
    #[serde(default = "default_price_interval")]
    pub price_interval_secs: u64,
}

fn default_state_interval() -> u64 {
    30
}
fn default_price_interval() -> u64 {
    300
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            state_interval_secs: default_state_interval(),
            price_interval_secs: default_price_interval(),
        }
    }
}

impl PollingConfig {
    /// State refresh period.
    pub fn state_interval(&self) -> Duration {
        Duration::from_secs(self.state_interval_secs.max(1))
    }

    /// Price refresh period.
    pub fn price_interval(&self) -> Duration {
        Duration::from_secs(self.price_interval_secs.max(1))
    }
}

/// Action parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionsConfig {
    /// Balance margin reserved for network fees on Acquire (bps of amount)
    #[serde(default = "default_fee_margin_bps")]
    pub fee_margin_bps: u32,
    /// Share of compounded yield credited to the referrer (bps), informational
    #[serde(default = "default_referral_share_bps")]
    pub referral_share_bps: u32,
    /// Lifetime of a user-facing notice
    #[serde(default = "default_notice_ttl")]
    pub notice_ttl_secs: u64,
}

fn default_fee_margin_bps() -> u32 {
    1000
}
fn default_referral_share_bps() -> u32 {
    1500
}
fn default_notice_ttl() -> u64 {
    5
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            fee_margin_bps: default_fee_margin_bps(),
            referral_share_bps: default_referral_share_bps(),
            notice_ttl_secs: default_notice_ttl(),
        }
    }
}

impl ActionsConfig {
    /// Notice lifetime.
    pub fn notice_ttl(&self) -> Duration {
        Duration::from_secs(self.notice_ttl_secs)
    }
}

/// Price feed endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceFeedConfig {
    /// Feed URL
    #[serde(default = "default_price_url")]
    pub url: String,
    /// JSON field carrying the price
    #[serde(default = "default_price_field")]
    pub field: String,
    /// Price used when the feed fails
    #[serde(default = "default_price")]
    pub default_price: f64,
}

fn default_price_url() -> String {
    miner_api::DEFAULT_PRICE_URL.to_string()
}
fn default_price_field() -> String {
    miner_api::DEFAULT_PRICE_FIELD.to_string()
}
fn default_price() -> f64 {
    miner_api::DEFAULT_PRICE
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            url: default_price_url(),
            field: default_price_field(),
            default_price: default_price(),
        }
    }
}

impl PriceFeedConfig {
    /// Build the HTTP client.
    pub fn client(&self) -> miner_api::PriceFeedClient {
        miner_api::PriceFeedClient::new(&self.url, &self.field, self.default_price)
    }
}

/// Persistent storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file holding persisted flags
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".miner/state.json")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl ClientConfig {
    /// Load config from a TOML file, expanding `${VAR}` references.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config {:?}", path))?;

        // Relative operations files resolve against the config directory.
        if let (Some(ops), Some(dir)) = (config.contract.operations_file.as_mut(), path.parent()) {
            if ops.is_relative() {
                *ops = dir.join(&*ops);
            }
        }
        Ok(config)
    }

    /// Parse config from TOML, expanding `${VAR}` references.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: ClientConfig = toml::from_str(content)?;
        config.expand_env_vars();
        Ok(config)
    }

    /// Load from the file named by `MINER_CONFIG`, or built-in defaults.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim()),
            _ => Ok(Self::default()),
        }
    }

    fn expand_env_vars(&mut self) {
        self.network.expand_env_vars();
        self.contract.expand_env_vars();
        self.price_feed.url = expand_env(&self.price_feed.url);
        let storage = expand_env(&self.storage.path.to_string_lossy());
        self.storage.path = PathBuf::from(storage);
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(
            chain_id = self.network.chain_id,
            network = %self.network.name,
            rpc = ?self.network.rpc_urls.first(),
            "Network configuration loaded"
        );
        tracing::info!(
            contract = %self.contract.address,
            operations_file = ?self.contract.operations_file,
            "Contract configuration"
        );
        tracing::info!(
            state_interval_secs = self.polling.state_interval_secs,
            price_interval_secs = self.polling.price_interval_secs,
            "Polling intervals"
        );
        tracing::info!(
            fee_margin_bps = self.actions.fee_margin_bps,
            referral_share_bps = self.actions.referral_share_bps,
            "Action parameters"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.network.chain_id, 56);
        assert_eq!(config.polling.state_interval(), Duration::from_secs(30));
        assert_eq!(config.polling.price_interval(), Duration::from_secs(300));
        assert_eq!(config.actions.fee_margin_bps, 1000);
        assert_eq!(config.actions.notice_ttl(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ClientConfig::from_toml_str(
            r#"
            [network]
            chain_id = 97
            name = "BSC Testnet"
            rpc_urls = ["https://data-seed-prebsc-1-s1.binance.org:8545/"]

            [polling]
            state_interval_secs = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.network.chain_id, 97);
        assert_eq!(config.network.native_currency.symbol, "BNB");
        assert_eq!(config.polling.state_interval_secs, 10);
        assert_eq!(config.polling.price_interval_secs, 300);
        assert_eq!(config.price_feed.field, "price");
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("MINER_CLIENT_TEST_RPC", "https://rpc.example");
        let config = ClientConfig::from_toml_str(
            r#"
            [network]
            rpc_urls = ["${MINER_CLIENT_TEST_RPC}/bsc"]
            "#,
        )
        .unwrap();
        assert_eq!(config.network.rpc_urls[0], "https://rpc.example/bsc");
        std::env::remove_var("MINER_CLIENT_TEST_RPC");
    }

    #[test]
    fn test_from_file_resolves_operations_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("miner.toml");
        std::fs::write(
            &path,
            "[contract]\naddress = \"0xD9bbb27Df553cfC7Ea919009B4Dd9dc357775836\"\noperations_file = \"ops.toml\"\n",
        )
        .unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.contract.operations_file, Some(dir.path().join("ops.toml")));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = ClientConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("chain_id = 56"));
        let parsed = ClientConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed.network, config.network);
    }

    #[test]
    fn test_example_config_parses() {
        let config =
            ClientConfig::from_toml_str(include_str!("../../../../config/miner.example.toml"))
                .unwrap();
        assert_eq!(config.network.chain_id, 56);
        assert_eq!(config.actions.fee_margin_bps, 1000);
        assert_eq!(config.price_feed.field, "price");
        assert!(config.contract.operations_file.is_none());
    }
}
