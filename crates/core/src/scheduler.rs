//! Periodic refresh cycles.
//!
//! Two independent cycles:
//! - price: every `price_interval`, from startup, regardless of connection
//! - state: every `state_interval`, only while the session is connected;
//!   the first tick fires as soon as a connection is established
//!
//! Each tick spawns its refresh instead of awaiting it, so a slow refresh
//! never delays or queues later ticks. Overlapping refreshes write
//! last-wins.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::PollingConfig;
use crate::session::{SessionManager, SessionSnapshot};
use crate::stats::StatsRefresher;

/// Drives [`StatsRefresher`] on timers.
#[derive(Debug, Clone)]
pub struct PollingScheduler {
    session: SessionManager,
    stats: Arc<StatsRefresher>,
    state_interval: Duration,
    price_interval: Duration,
}

/// Running cycles. Dropping the handle stops them.
#[derive(Debug)]
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop both cycles.
    pub fn stop(self) {
        // Drop aborts.
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl PollingScheduler {
    pub fn new(session: SessionManager, stats: Arc<StatsRefresher>, config: &PollingConfig) -> Self {
        Self {
            session,
            stats,
            state_interval: config.state_interval(),
            price_interval: config.price_interval(),
        }
    }

    /// Spawn both cycles on the current runtime.
    pub fn start(self) -> SchedulerHandle {
        info!(
            state_interval_secs = self.state_interval.as_secs(),
            price_interval_secs = self.price_interval.as_secs(),
            "Starting polling"
        );

        let price = self.clone();
        let price_task = tokio::spawn(async move { price.price_cycle().await });

        let changes = self.session.subscribe();
        let state_task = tokio::spawn(async move { self.state_cycle(changes).await });

        SchedulerHandle {
            tasks: vec![price_task, state_task],
        }
    }

    async fn price_cycle(&self) {
        let mut ticker = interval(self.price_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;

            let stats = Arc::clone(&self.stats);
            tokio::spawn(async move {
                stats.refresh_price().await;
            });
        }
    }

    async fn state_cycle(&self, mut changes: watch::Receiver<SessionSnapshot>) {
        loop {
            // Idle until connected.
            if changes.wait_for(SessionSnapshot::is_connected).await.is_err() {
                return;
            }
            debug!("Session connected, state polling active");

            let mut ticker = interval(self.state_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.spawn_refresh(),
                    changed = changes.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        if !changes.borrow_and_update().is_connected() {
                            debug!("Session ended, state polling paused");
                            self.stats.clear_user();
                            break;
                        }
                    }
                }
            }
        }
    }

    fn spawn_refresh(&self) {
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            if let Err(e) = stats.refresh().await {
                warn!(error = %e, "State refresh failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use alloy::primitives::Address;
    use miner_api::PriceFeedClient;
    use miner_chain::testing::MockWallet;
    use miner_chain::{NativeCurrency, NetworkParams, OperationRegistry, WalletProvider};

    const ACCOUNT: Address = Address::new([0xaa; 20]);
    const CONTRACT: Address = Address::new([0xcc; 20]);

    fn manager(mock: &Arc<MockWallet>) -> SessionManager {
        SessionManager::new(
            vec![mock.clone() as Arc<dyn WalletProvider>],
            NetworkParams {
                chain_id: 56,
                chain_name: "BSC Mainnet".to_string(),
                native_currency: NativeCurrency {
                    name: "BNB".to_string(),
                    symbol: "BNB".to_string(),
                    decimals: 18,
                },
                rpc_urls: vec!["https://bsc-dataseed.binance.org/".to_string()],
                block_explorer_urls: vec![],
            },
            CONTRACT,
            Arc::new(OperationRegistry::builtin()),
            Arc::new(MemoryStore::new()),
        )
    }

    fn refresher(session: &SessionManager) -> Arc<StatsRefresher> {
        Arc::new(StatsRefresher::new(
            session.clone(),
            PriceFeedClient::new("http://127.0.0.1:9/price", "price", 500.0),
        ))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_polling_follows_connection() {
        let mock = Arc::new(MockWallet::new(ACCOUNT, 56));
        let session = manager(&mock);
        let handle = PollingScheduler::new(
            session.clone(),
            refresher(&session),
            &PollingConfig::default(),
        )
        .start();

        // Not connected: no state reads
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(mock.call_count("initialized()"), 0);

        // Connecting triggers an immediate refresh
        session.connect().await.unwrap();
        settle().await;
        assert_eq!(mock.call_count("initialized()"), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.call_count("initialized()"), 2);

        session.disconnect();
        settle().await;
        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(mock.call_count("initialized()"), 2);

        session.connect().await.unwrap();
        settle().await;
        assert_eq!(mock.call_count("initialized()"), 3);

        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_polling() {
        let mock = Arc::new(MockWallet::new(ACCOUNT, 56));
        let session = manager(&mock);
        session.connect().await.unwrap();

        let handle = PollingScheduler::new(
            session.clone(),
            refresher(&session),
            &PollingConfig::default(),
        )
        .start();
        settle().await;
        assert_eq!(mock.call_count("initialized()"), 1);

        drop(handle);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(mock.call_count("initialized()"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_clears_user_stats() {
        let mock = Arc::new(MockWallet::new(ACCOUNT, 56));
        mock.returns_uint("getMyHarvesters(address)", alloy::primitives::U256::from(7));
        let session = manager(&mock);
        session.connect().await.unwrap();

        let stats = refresher(&session);
        let _handle = PollingScheduler::new(session.clone(), Arc::clone(&stats), &PollingConfig::default())
            .start();
        settle().await;
        assert_eq!(stats.snapshot().user.unit_count, alloy::primitives::U256::from(7));

        session.disconnect();
        settle().await;
        assert!(stats.snapshot().user.unit_count.is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_switch_retry_keeps_user_stats() {
        let mock = Arc::new(MockWallet::new(ACCOUNT, 1));
        mock.register_chain(56);
        mock.fail_switch(miner_chain::ProviderError::user_rejected());
        mock.returns_uint("getMyHarvesters(address)", alloy::primitives::U256::from(7));
        let session = manager(&mock);
        assert!(session.connect().await.is_err());

        let stats = refresher(&session);
        let _handle = PollingScheduler::new(session.clone(), Arc::clone(&stats), &PollingConfig::default())
            .start();
        settle().await;
        assert_eq!(mock.call_count("initialized()"), 0);

        mock.allow_switch();
        session.switch_network().await.unwrap();
        settle().await;
        assert_eq!(stats.snapshot().user.unit_count, alloy::primitives::U256::from(7));

        // The wallet's ChainChanged from the switch must not end the session.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(session.snapshot().is_connected());
        assert_eq!(stats.snapshot().user.unit_count, alloy::primitives::U256::from(7));
        assert_eq!(mock.call_count("initialized()"), 1);
    }
}
