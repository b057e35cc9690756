//! User actions: Acquire, Compound, Liquidate.
//!
//! Each action runs strictly in sequence:
//! validate → resolve referrer → submit → await confirmation → refresh.
//!
//! Failures are classified and surfaced once. Nothing here resubmits a
//! transaction.

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use miner_chain::{canonical, CallArgs, ContractFacade, FacadeError, ProviderError, TxReceipt};
use parking_lot::Mutex;
use regex_lite::Regex;
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::config::ActionsConfig;
use crate::notice::NoticeBoard;
use crate::session::SessionManager;
use crate::stats::StatsRefresher;
use crate::units::{self, AmountError, NATIVE_DECIMALS};

/// User action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Acquire,
    Compound,
    Liquidate,
}

impl ActionKind {
    fn operation(&self) -> &'static str {
        match self {
            Self::Acquire => canonical::ACQUIRE,
            Self::Compound => canonical::COMPOUND,
            Self::Liquidate => canonical::LIQUIDATE,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Acquire => "Acquire",
            Self::Compound => "Compound",
            Self::Liquidate => "Liquidate",
        })
    }
}

/// Lifecycle of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    Submitted,
    Confirmed,
    Failed,
}

/// A transaction in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub kind: ActionKind,
    pub submitted_at: DateTime<Utc>,
    pub tx_hash: B256,
    pub state: PendingState,
}

/// Input refused before any remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionValidationError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    #[error("Invalid referral address '{0}'")]
    InvalidAddress(String),
}

/// Classified action failure.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error(transparent)]
    Validation(#[from] ActionValidationError),

    #[error("Connect your wallet first")]
    NotConnected,

    #[error("Transaction rejected in the wallet")]
    UserRejected,

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("Transaction failed: {0}")]
    Unknown(String),
}

fn insufficient_funds_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)insufficient funds|insufficient balance|exceeds balance")
            .expect("valid regex")
    })
}

fn reverted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)revert|execution failed|CALL_EXCEPTION").expect("valid regex")
    })
}

fn address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid regex"))
}

impl ActionError {
    /// Classify a provider error report.
    pub fn from_provider(err: &ProviderError) -> Self {
        if err.is_user_rejection() {
            Self::UserRejected
        } else if insufficient_funds_re().is_match(&err.message) {
            Self::InsufficientFunds(err.message.clone())
        } else if reverted_re().is_match(&err.message) {
            Self::Reverted(err.message.clone())
        } else {
            Self::Unknown(err.message.clone())
        }
    }

    /// Classify a facade failure.
    pub fn classify(err: &FacadeError) -> Self {
        match err {
            FacadeError::Reverted { tx_hash } => Self::Reverted(format!("transaction {tx_hash}")),
            other => match other.provider_error() {
                Some(provider) => Self::from_provider(provider),
                None => Self::Unknown(other.to_string()),
            },
        }
    }
}

/// Validate an optional referral address. Empty input means none.
///
/// Mixed-case input must carry a valid EIP-55 checksum.
pub fn parse_referral(input: Option<&str>) -> Result<Option<Address>, ActionValidationError> {
    let Some(raw) = input.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let invalid = || ActionValidationError::InvalidAddress(raw.to_string());

    if !address_re().is_match(raw) {
        return Err(invalid());
    }
    let hex = &raw[2..];
    let mixed_case = hex.chars().any(|c| c.is_ascii_uppercase())
        && hex.chars().any(|c| c.is_ascii_lowercase());

    let address = if mixed_case {
        Address::parse_checksummed(raw, None).map_err(|_| invalid())?
    } else {
        raw.parse::<Address>().map_err(|_| invalid())?
    };
    Ok(Some(address))
}

/// Result of a confirmed action.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub kind: ActionKind,
    /// Candidate signature that was submitted
    pub candidate: String,
    pub receipt: TxReceipt,
}

/// Runs user actions against the connected session.
#[derive(Debug)]
pub struct ActionCoordinator {
    session: SessionManager,
    stats: Arc<StatsRefresher>,
    notices: Arc<NoticeBoard>,
    config: ActionsConfig,
    pending: Mutex<Vec<PendingAction>>,
}

impl ActionCoordinator {
    pub fn new(
        session: SessionManager,
        stats: Arc<StatsRefresher>,
        notices: Arc<NoticeBoard>,
        config: ActionsConfig,
    ) -> Self {
        Self {
            session,
            stats,
            notices,
            config,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Transactions currently in flight.
    pub fn pending(&self) -> Vec<PendingAction> {
        self.pending.lock().clone()
    }

    fn connected(&self) -> Result<(Arc<ContractFacade>, Address), ActionError> {
        match (self.session.contract(), self.session.account()) {
            (Some(contract), Some(account)) => Ok((contract, account)),
            _ => Err(ActionError::NotConnected),
        }
    }

    /// Buy units with `amount` native units, crediting `referral` (defaults
    /// to the caller).
    #[instrument(skip(self))]
    pub async fn acquire(
        &self,
        amount: &str,
        referral: Option<&str>,
    ) -> Result<ActionOutcome, ActionError> {
        let result = self.try_acquire(amount, referral).await;
        self.report(ActionKind::Acquire, result)
    }

    async fn try_acquire(
        &self,
        amount: &str,
        referral: Option<&str>,
    ) -> Result<ActionOutcome, ActionError> {
        let value = units::parse_amount(amount, NATIVE_DECIMALS).map_err(ActionValidationError::from)?;
        let referral = parse_referral(referral)?;
        let (contract, account) = self.connected()?;

        // Fresh balance, never cached stats.
        let balance = contract
            .provider()
            .balance(account)
            .await
            .map_err(|e| ActionError::from_provider(&e))?;
        let required = units::apply_basis_points_up(value, self.config.fee_margin_bps);
        if balance < required {
            return Err(ActionError::InsufficientFunds(format!(
                "balance {} is below {} (amount plus fee margin)",
                units::format_native(balance),
                units::format_native(required)
            )));
        }

        let referrer = referral.unwrap_or(account);
        self.execute(ActionKind::Acquire, &contract, CallArgs::referrer(referrer), value)
            .await
    }

    /// Convert accrued yield into units, crediting `referral` (defaults to
    /// the caller) with its share.
    #[instrument(skip(self))]
    pub async fn compound(&self, referral: Option<&str>) -> Result<ActionOutcome, ActionError> {
        let result: Result<ActionOutcome, ActionError> = async {
            let referral = parse_referral(referral)?;
            let (contract, account) = self.connected()?;
            let referrer = referral.unwrap_or(account);
            info!(
                referrer = %referrer,
                referral_share_bps = self.config.referral_share_bps,
                "Compounding yield"
            );
            self.execute(ActionKind::Compound, &contract, CallArgs::referrer(referrer), U256::ZERO)
                .await
        }
        .await;
        self.report(ActionKind::Compound, result)
    }

    /// Convert all accrued yield to the native asset.
    #[instrument(skip(self))]
    pub async fn liquidate(&self) -> Result<ActionOutcome, ActionError> {
        let result: Result<ActionOutcome, ActionError> = async {
            let (contract, _) = self.connected()?;
            self.execute(ActionKind::Liquidate, &contract, CallArgs::none(), U256::ZERO)
                .await
        }
        .await;
        self.report(ActionKind::Liquidate, result)
    }

    async fn execute(
        &self,
        kind: ActionKind,
        contract: &ContractFacade,
        args: CallArgs,
        value: U256,
    ) -> Result<ActionOutcome, ActionError> {
        let pending = contract
            .resolve_write(kind.operation(), &args, value)
            .await
            .map_err(|e| ActionError::classify(&e))?;

        info!(
            action = %kind,
            tx_hash = %pending.tx_hash,
            candidate = %pending.candidate,
            "[TX] Submitted, waiting for confirmation"
        );
        self.pending.lock().push(PendingAction {
            kind,
            submitted_at: Utc::now(),
            tx_hash: pending.tx_hash,
            state: PendingState::Submitted,
        });

        let confirmation = contract.wait_for_confirmation(&pending).await;
        let state = if confirmation.is_ok() {
            PendingState::Confirmed
        } else {
            PendingState::Failed
        };
        self.settle(pending.tx_hash, state);

        let receipt = confirmation.map_err(|e| ActionError::classify(&e))?;
        info!(action = %kind, tx_hash = %receipt.tx_hash, "[TX] Confirmed");

        if let Err(e) = self.stats.refresh().await {
            warn!(error = %e, "Post-action refresh failed");
        }

        Ok(ActionOutcome {
            kind,
            candidate: pending.candidate,
            receipt,
        })
    }

    fn settle(&self, tx_hash: B256, state: PendingState) {
        let mut pending = self.pending.lock();
        if let Some(entry) = pending.iter_mut().find(|p| p.tx_hash == tx_hash) {
            entry.state = state;
        }
        pending.retain(|p| p.state == PendingState::Submitted);
    }

    fn report(
        &self,
        kind: ActionKind,
        result: Result<ActionOutcome, ActionError>,
    ) -> Result<ActionOutcome, ActionError> {
        match &result {
            Ok(outcome) => {
                self.notices.success(format!(
                    "{kind} confirmed in block {}",
                    outcome
                        .receipt
                        .block_number
                        .map_or_else(|| "?".to_string(), |b| b.to_string())
                ));
            }
            Err(ActionError::Validation(e)) => {
                warn!(action = %kind, error = %e, "Action refused");
                self.notices.error(e.to_string());
            }
            Err(e) => {
                error!(action = %kind, error = %e, "Action failed");
                self.notices.error(e.to_string());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notice::NoticeLevel;
    use crate::session::SessionManager;
    use crate::storage::MemoryStore;
    use miner_api::PriceFeedClient;
    use miner_chain::testing::{selector, MockWallet};
    use miner_chain::{codes, NativeCurrency, NetworkParams, OperationRegistry, WalletProvider};
    use std::time::Duration;

    const ACCOUNT: Address = Address::new([0xaa; 20]);
    const CONTRACT: Address = Address::new([0xcc; 20]);

    fn ether(n: u64) -> U256 {
        U256::from(n) * units::pow10(18)
    }

    struct Harness {
        mock: Arc<MockWallet>,
        session: SessionManager,
        notices: Arc<NoticeBoard>,
        actions: ActionCoordinator,
    }

    async fn harness(connect: bool) -> Harness {
        let mock = Arc::new(MockWallet::new(ACCOUNT, 56));
        mock.set_balance(ACCOUNT, Ok(ether(1)));
        let session = SessionManager::new(
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
        );
        if connect {
            session.connect().await.unwrap();
        }
        let stats = Arc::new(StatsRefresher::new(
            session.clone(),
            PriceFeedClient::new("http://127.0.0.1:9/price", "price", 500.0),
        ));
        let notices = Arc::new(NoticeBoard::new(Duration::from_secs(5)));
        let actions = ActionCoordinator::new(
            session.clone(),
            stats,
            notices.clone(),
            ActionsConfig::default(),
        );
        Harness {
            mock,
            session,
            notices,
            actions,
        }
    }

    /// Reads, gas estimates, sends and balance lookups seen by the wallet.
    fn remote_activity(mock: &MockWallet) -> (usize, usize, usize, usize) {
        (
            mock.calls().len(),
            mock.estimates().len(),
            mock.sent().len(),
            mock.request_count("eth_getBalance"),
        )
    }

    #[tokio::test]
    async fn test_acquire_rejects_non_positive_amounts_without_remote_calls() {
        let h = harness(true).await;
        let before = remote_activity(&h.mock);

        for amount in ["0", "-1", "", "abc"] {
            let err = h.actions.acquire(amount, None).await.unwrap_err();
            assert!(
                matches!(err, ActionError::Validation(ActionValidationError::InvalidAmount(_))),
                "{amount}: {err:?}"
            );
        }
        assert_eq!(remote_activity(&h.mock), before);
        assert_eq!(h.mock.request_count("eth_getBalance"), 0);
        assert_eq!(h.notices.current().unwrap().level, NoticeLevel::Error);
    }

    #[tokio::test]
    async fn test_malformed_referral_rejected_before_remote_calls() {
        let h = harness(true).await;
        let before = remote_activity(&h.mock);

        let err = h.actions.acquire("0.1", Some("0x1234")).await.unwrap_err();
        assert!(matches!(
            err,
            ActionError::Validation(ActionValidationError::InvalidAddress(_))
        ));
        let err = h.actions.compound(Some("not-an-address")).await.unwrap_err();
        assert!(matches!(
            err,
            ActionError::Validation(ActionValidationError::InvalidAddress(_))
        ));
        assert_eq!(remote_activity(&h.mock), before);
        assert_eq!(h.mock.request_count("eth_getBalance"), 0);
    }

    #[tokio::test]
    async fn test_acquire_defaults_referral_to_caller() {
        let h = harness(true).await;
        h.mock.accepts_write("buyCorn(address)");

        let outcome = h.actions.acquire("0.1", None).await.unwrap();
        assert_eq!(outcome.kind, ActionKind::Acquire);
        assert_eq!(outcome.candidate, "buyCorn(address)");

        let sent = h.mock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].value, units::pow10(17));
        assert_eq!(sent[0].selector, selector("buyCorn(address)"));
        // selector + left-padded address word
        assert_eq!(&sent[0].input[16..36], ACCOUNT.as_slice());
        assert!(h.actions.pending().is_empty());
        assert_eq!(h.notices.current().unwrap().level, NoticeLevel::Success);
    }

    #[tokio::test]
    async fn test_acquire_with_referral() {
        let h = harness(true).await;
        h.mock.accepts_write("buyCorn(address)");
        let referrer = Address::new([0xbb; 20]);

        h.actions
            .acquire("0.5", Some(&referrer.to_string()))
            .await
            .unwrap();
        assert_eq!(&h.mock.sent()[0].input[16..36], referrer.as_slice());
    }

    #[tokio::test]
    async fn test_acquire_insufficient_balance_checked_with_margin() {
        let h = harness(true).await;
        h.mock.accepts_write("buyCorn(address)");
        h.mock.set_balance(ACCOUNT, Ok(ether(1)));

        // 1.0 + 10% margin > 1.0 balance
        let err = h.actions.acquire("1", None).await.unwrap_err();
        assert!(matches!(err, ActionError::InsufficientFunds(_)));
        assert!(h.mock.estimates().is_empty());
        assert!(h.mock.sent().is_empty());
    }

    #[tokio::test]
    async fn test_user_rejection_is_not_retried() {
        let h = harness(true).await;
        h.mock.accepts_write("popCorn(address)");
        h.mock.accepts_write("hatchEggs(address)");
        h.mock.fail_send(ProviderError::user_rejected());

        let err = h.actions.compound(None).await.unwrap_err();
        assert!(matches!(err, ActionError::UserRejected));
        assert_eq!(h.mock.request_count("eth_sendTransaction"), 1);
        assert_eq!(h.mock.estimates(), vec![selector("popCorn(address)")]);
    }

    #[tokio::test]
    async fn test_reverted_confirmation() {
        let h = harness(true).await;
        h.mock.accepts_write("sellCorn()");
        h.mock.set_receipt_success(false);

        let err = h.actions.liquidate().await.unwrap_err();
        assert!(matches!(err, ActionError::Reverted(_)));
        assert!(h.actions.pending().is_empty());
        assert_eq!(h.mock.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_liquidate_refreshes_stats() {
        let h = harness(true).await;
        h.mock.accepts_write("sellEggs()");
        let reads_before = h.mock.calls().len();

        let outcome = h.actions.liquidate().await.unwrap();
        assert_eq!(outcome.candidate, "sellEggs()");
        assert!(outcome.receipt.success);
        assert!(h.mock.calls().len() > reads_before);
    }

    #[tokio::test]
    async fn test_actions_require_connection() {
        let h = harness(false).await;
        assert!(matches!(h.actions.acquire("0.1", None).await, Err(ActionError::NotConnected)));
        assert!(matches!(h.actions.liquidate().await, Err(ActionError::NotConnected)));
        assert!(matches!(h.actions.compound(None).await, Err(ActionError::NotConnected)));
        assert!(h.session.contract().is_none());
        assert_eq!(remote_activity(&h.mock), (0, 0, 0, 0));
    }

    #[tokio::test]
    async fn test_preflight_revert_classified() {
        let h = harness(true).await;
        h.mock.reverts("popCorn(address)", "not initialized");

        let err = h.actions.compound(None).await.unwrap_err();
        assert!(matches!(err, ActionError::Reverted(_)));
        assert!(h.mock.sent().is_empty());
    }

    #[test]
    fn test_classification() {
        let insufficient = ProviderError::new(
            codes::EXECUTION_ERROR,
            "insufficient funds for gas * price + value",
        );
        assert!(matches!(
            ActionError::from_provider(&insufficient),
            ActionError::InsufficientFunds(_)
        ));
        assert!(matches!(
            ActionError::from_provider(&ProviderError::user_rejected()),
            ActionError::UserRejected
        ));
        assert!(matches!(
            ActionError::from_provider(&ProviderError::message("nonce too low")),
            ActionError::Unknown(_)
        ));
    }

    #[test]
    fn test_parse_referral() {
        assert_eq!(parse_referral(None).unwrap(), None);
        assert_eq!(parse_referral(Some("  ")).unwrap(), None);

        let lower = "0xd9bbb27df553cfc7ea919009b4dd9dc357775836";
        assert!(parse_referral(Some(lower)).unwrap().is_some());

        let checksummed = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
        assert!(parse_referral(Some(checksummed)).unwrap().is_some());
        // Last letter's case flipped
        let broken = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAeD";
        assert!(parse_referral(Some(broken)).is_err());

        assert!(parse_referral(Some("0x12")).is_err());
        assert!(parse_referral(Some("d9bbb27df553cfc7ea919009b4dd9dc357775836")).is_err());
    }
}
