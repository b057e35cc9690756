//! Derived dashboard statistics.
//!
//! Recomputed on every poll tick and after confirmed actions; never
//! persisted. Concurrent refreshes are last-writer-wins.

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use miner_api::PriceFeedClient;
use miner_chain::{canonical, CallArgs, ContractFacade, ReadResolution};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::session::{SessionError, SessionManager};
use crate::units::{self, NATIVE_DECIMALS};

/// Per-account figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserStats {
    /// Producing units owned
    pub unit_count: U256,
    /// Accrued, unclaimed yield
    pub yield_units: U256,
    /// Native value of the accrued yield
    pub yield_value: U256,
}

/// Contract-wide figures.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContractStats {
    /// Whether the contract is open
    pub initialized: bool,
    /// Native balance held by the contract
    pub locked_balance: U256,
    /// Market-wide yield supply
    pub market_supply: U256,
    /// `locked_balance` in fiat at the last known price
    pub total_value_locked_fiat: f64,
}

/// Everything the dashboard shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub user: UserStats,
    pub contract: ContractStats,
    /// Native asset fiat price
    pub price: f64,
    /// Reads that fell back to a default in the last refresh
    pub unresolved: Vec<String>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl StatsSnapshot {
    /// Fiat value of the accrued yield.
    pub fn yield_value_fiat(&self) -> f64 {
        units::to_f64(self.user.yield_value, NATIVE_DECIMALS) * self.price
    }
}

/// Refreshes [`StatsSnapshot`] from the contract and the price feed.
#[derive(Debug)]
pub struct StatsRefresher {
    session: SessionManager,
    price_feed: PriceFeedClient,
    stats: RwLock<StatsSnapshot>,
}

impl StatsRefresher {
    /// Create a refresher. The price starts at the feed's default.
    pub fn new(session: SessionManager, price_feed: PriceFeedClient) -> Self {
        let stats = StatsSnapshot {
            price: price_feed.default_price(),
            ..StatsSnapshot::default()
        };
        Self {
            session,
            price_feed,
            stats: RwLock::new(stats),
        }
    }

    /// Last computed stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.read().clone()
    }

    /// Current fiat price.
    pub fn price(&self) -> f64 {
        self.stats.read().price
    }

    /// Re-read contract and account state.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<StatsSnapshot, SessionError> {
        let (contract, account) = match (self.session.contract(), self.session.account()) {
            (Some(contract), Some(account)) => (contract, account),
            _ => return Err(SessionError::NotConnected),
        };

        let (contract_stats, user_stats, unresolved) = read_stats(&contract, account).await;

        let snapshot = {
            let mut stats = self.stats.write();
            stats.contract = ContractStats {
                total_value_locked_fiat: fiat(contract_stats.locked_balance, stats.price),
                ..contract_stats
            };
            stats.user = user_stats;
            stats.unresolved = unresolved;
            stats.refreshed_at = Some(Utc::now());
            stats.clone()
        };

        debug!(
            units = %snapshot.user.unit_count,
            yield_units = %snapshot.user.yield_units,
            locked = %units::format_native(snapshot.contract.locked_balance),
            unresolved = snapshot.unresolved.len(),
            "Stats refreshed"
        );
        Ok(snapshot)
    }

    /// Re-read the fiat price. Feed failures keep the default price.
    #[instrument(skip(self))]
    pub async fn refresh_price(&self) -> f64 {
        let price = self.price_feed.price_or_default().await;
        let mut stats = self.stats.write();
        stats.price = price;
        stats.contract.total_value_locked_fiat = fiat(stats.contract.locked_balance, price);
        info!(price = price, "Price updated");
        price
    }

    /// Drop account figures (after disconnect).
    pub fn clear_user(&self) {
        let mut stats = self.stats.write();
        stats.user = UserStats::default();
        stats.unresolved.clear();
    }
}

fn fiat(balance: U256, price: f64) -> f64 {
    units::to_f64(balance, NATIVE_DECIMALS) * price
}

fn record(resolution: &ReadResolution, unresolved: &mut Vec<String>) {
    if !resolution.is_resolved() {
        unresolved.push(resolution.operation.clone());
    }
}

/// Resolve one single-word read; the word is a uint or a bool.
async fn read_word(
    contract: &ContractFacade,
    operation: &str,
    args: CallArgs,
    unresolved: &mut Vec<String>,
) -> Option<ReadResolution> {
    match contract.resolve_read(operation, &args).await {
        Ok(resolution) => {
            record(&resolution, unresolved);
            Some(resolution)
        }
        Err(e) => {
            warn!(operation = operation, error = %e, "Read misconfigured");
            unresolved.push(operation.to_string());
            None
        }
    }
}

/// Read everything one refresh needs.
async fn read_stats(
    contract: &ContractFacade,
    account: Address,
) -> (ContractStats, UserStats, Vec<String>) {
    let mut unresolved = Vec::new();

    let locked_balance = match contract.contract_balance().await {
        Ok(balance) => balance,
        Err(e) => {
            warn!(error = %e, "Failed to read contract balance");
            U256::ZERO
        }
    };

    let initialized = read_word(contract, canonical::INITIALIZED, CallArgs::none(), &mut unresolved)
        .await
        .filter(ReadResolution::is_resolved)
        .map(|r| r.as_bool())
        // A contract that holds value has been opened.
        .unwrap_or(!locked_balance.is_zero());

    let market_supply = read_word(contract, canonical::MARKET_SUPPLY, CallArgs::none(), &mut unresolved)
        .await
        .map(|r| r.as_uint())
        .unwrap_or_default();

    let unit_count = read_word(contract, canonical::UNIT_COUNT, CallArgs::account(account), &mut unresolved)
        .await
        .map(|r| r.as_uint())
        .unwrap_or_default();

    let yield_units = read_word(contract, canonical::YIELD_UNITS, CallArgs::account(account), &mut unresolved)
        .await
        .map(|r| r.as_uint())
        .unwrap_or_default();

    let yield_value = if yield_units.is_zero() {
        U256::ZERO
    } else {
        match read_word(contract, canonical::YIELD_VALUE, CallArgs::units(yield_units), &mut unresolved).await {
            Some(r) if r.is_resolved() => r.as_uint(),
            _ => {
                let estimate = units::estimate_yield_value(yield_units, locked_balance, market_supply);
                debug!(estimate = %estimate, "Yield value estimated locally");
                estimate
            }
        }
    };

    (
        ContractStats {
            initialized,
            locked_balance,
            market_supply,
            total_value_locked_fiat: 0.0,
        },
        UserStats {
            unit_count,
            yield_units,
            yield_value,
        },
        unresolved,
    )
}
