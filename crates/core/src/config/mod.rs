//! Configuration for the miner client.
//!
//! This module provides:
//! - Network identity (chain, RPC endpoints, explorer, native asset)
//! - Contract address and optional candidate-signature overrides
//! - Polling, action and price feed parameters
//! - Storage location for the persisted session flag

mod client;
mod network;

pub use client::{
    ActionsConfig, ClientConfig, PollingConfig, PriceFeedConfig, StorageConfig, CONFIG_ENV,
};
pub use network::{ContractConfig, NetworkConfig};
