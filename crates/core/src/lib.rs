//! Miner client core logic.
//!
//! This crate provides the client-side adapter over a yield-farming
//! contract:
//! - Wallet session lifecycle (connect, network switch, auto-reconnect)
//! - User actions (Acquire, Compound, Liquidate) with error classification
//! - Derived dashboard stats with read fallbacks
//! - Periodic state and price polling
//! - Persisted session flag and transient user notices

mod actions;
pub mod config;
mod notice;
mod scheduler;
mod session;
mod stats;
mod storage;
pub mod units;

pub use actions::{
    parse_referral, ActionCoordinator, ActionError, ActionKind, ActionOutcome,
    ActionValidationError, PendingAction, PendingState,
};
pub use config::{
    ActionsConfig, ClientConfig, ContractConfig, NetworkConfig, PollingConfig, PriceFeedConfig,
    StorageConfig, CONFIG_ENV,
};
pub use notice::{Notice, NoticeBoard, NoticeLevel};
pub use scheduler::{PollingScheduler, SchedulerHandle};
pub use session::{ConnectionState, Session, SessionError, SessionManager, SessionSnapshot};
pub use stats::{ContractStats, StatsRefresher, StatsSnapshot, UserStats};
pub use storage::{FileStore, KeyValueStore, MemoryStore, CONNECTED_KEY, CONNECTED_VALUE};
pub use units::AmountError;
