//! Wallet session lifecycle.
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!                            -> NetworkMismatch (switch failed, retry permitted)
//!                            -> Disconnected (rejected / provider failure)
//! ```
//!
//! The manager owns the [`Session`] value, republishes every change on a
//! watch channel, and consumes the provider's account/network events in a
//! listener task that lives as long as the session.

use alloy::primitives::Address;
use miner_chain::{
    codes, select_provider, ContractFacade, NetworkParams, OperationRegistry, ProviderError,
    ProviderUnavailable, WalletEvent, WalletProvider,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::storage::{KeyValueStore, CONNECTED_KEY, CONNECTED_VALUE};

/// Connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Authorized, but on the wrong network
    NetworkMismatch,
}

/// Live state of the connection to a wallet provider.
///
/// `account` is set iff the state is `Connected` or `NetworkMismatch`;
/// `contract` is set iff the state is `Connected`.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Selected provider
    pub provider: Option<Arc<dyn WalletProvider>>,
    /// Contract handle bound to the provider's signer and network
    pub contract: Option<Arc<ContractFacade>>,
    /// Authorized account
    pub account: Option<Address>,
    /// Network the provider is on
    pub chain_id: Option<u64>,
    /// Connection state
    pub state: ConnectionState,
    /// Whether the "connected" flag is persisted
    pub persisted: bool,
    /// Last connection error, for display
    pub last_error: Option<String>,
}

impl Session {
    /// Observable fields of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            account: self.account,
            chain_id: self.chain_id,
            state: self.state,
            persisted: self.persisted,
            last_error: self.last_error.clone(),
        }
    }
}

/// Observable fields of a [`Session`], published to observers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub account: Option<Address>,
    pub chain_id: Option<u64>,
    pub state: ConnectionState,
    pub persisted: bool,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    /// Whether actions may be submitted.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Session errors.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// No compatible provider.
    #[error(transparent)]
    ProviderUnavailable(#[from] ProviderUnavailable),

    /// The user dismissed the authorization request.
    #[error("Connection rejected: {0}")]
    ConnectionRejected(#[source] ProviderError),

    /// Authorization returned an empty account list.
    #[error("The wallet did not authorize any account")]
    NoAccounts,

    /// Switching (or registering) the network failed. The session is kept
    /// in `NetworkMismatch`.
    #[error("Please switch to {network} (chain {chain_id}): {source}")]
    NetworkSwitchFailed {
        chain_id: u64,
        network: String,
        #[source]
        source: ProviderError,
    },

    /// Any other provider failure.
    #[error("Wallet provider error: {0}")]
    Provider(#[source] ProviderError),

    /// An operation needs an authorized session.
    #[error("Wallet not connected")]
    NotConnected,

    /// `disconnect` ran while the attempt was waiting on the wallet.
    #[error("Connection attempt cancelled by disconnect")]
    Cancelled,
}

struct Inner {
    /// Injected providers, in injection order
    providers: Vec<Arc<dyn WalletProvider>>,
    /// Required network
    network: NetworkParams,
    /// Target contract
    contract_address: Address,
    /// Candidate signatures
    registry: Arc<OperationRegistry>,
    /// Persisted flag storage
    store: Arc<dyn KeyValueStore>,
    session: RwLock<Session>,
    changes: watch::Sender<SessionSnapshot>,
    /// Provider event listener of the current session
    listener: Mutex<Option<JoinHandle<()>>>,
    /// Serializes connect attempts
    connecting: tokio::sync::Mutex<()>,
    /// Bumped by every disconnect, under the session write lock
    epoch: AtomicU64,
}

/// Owns the wallet session.
///
/// Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("network", &self.inner.network.chain_id)
            .field("contract", &self.inner.contract_address)
            .field("session", &self.inner.session.read().snapshot())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager over the injected providers.
    pub fn new(
        providers: Vec<Arc<dyn WalletProvider>>,
        network: NetworkParams,
        contract_address: Address,
        registry: Arc<OperationRegistry>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let session = Session {
            persisted: flag_set(store.as_ref()),
            ..Session::default()
        };
        let (changes, _) = watch::channel(session.snapshot());
        Self {
            inner: Arc::new(Inner {
                providers,
                network,
                contract_address,
                registry,
                store,
                session: RwLock::new(session),
                changes,
                listener: Mutex::new(None),
                connecting: tokio::sync::Mutex::new(()),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Required network.
    pub fn network(&self) -> &NetworkParams {
        &self.inner.network
    }

    /// Current session.
    pub fn session(&self) -> Session {
        self.inner.session.read().clone()
    }

    /// Observable session fields.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.session.read().snapshot()
    }

    /// Connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.session.read().state
    }

    /// Authorized account.
    pub fn account(&self) -> Option<Address> {
        self.inner.session.read().account
    }

    /// Contract handle, while connected.
    pub fn contract(&self) -> Option<Arc<ContractFacade>> {
        self.inner.session.read().contract.clone()
    }

    /// Session-changed notifications.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.changes.subscribe()
    }

    fn update(&self, f: impl FnOnce(&mut Session)) -> SessionSnapshot {
        let snapshot = {
            let mut session = self.inner.session.write();
            f(&mut session);
            session.snapshot()
        };
        self.inner.changes.send_replace(snapshot.clone());
        snapshot
    }

    /// Apply `f` unless a disconnect happened since `epoch` was read.
    fn update_current(
        &self,
        epoch: u64,
        f: impl FnOnce(&mut Session),
    ) -> Result<SessionSnapshot, SessionError> {
        let snapshot = {
            let mut session = self.inner.session.write();
            if self.inner.epoch.load(Ordering::SeqCst) != epoch {
                debug!("Session changed by disconnect, dropping stale update");
                return Err(SessionError::Cancelled);
            }
            f(&mut session);
            session.snapshot()
        };
        self.inner.changes.send_replace(snapshot.clone());
        Ok(snapshot)
    }

    fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    fn reset(&self, last_error: Option<String>) -> SessionSnapshot {
        self.update(|s| {
            let persisted = s.persisted;
            *s = Session {
                persisted,
                last_error,
                ..Session::default()
            };
        })
    }

    /// Connect to the wallet.
    ///
    /// Waits on the wallet's authorization prompt without a timeout. A call
    /// made while another connect is in flight waits for it and returns its
    /// session instead of prompting again.
    ///
    /// The "connected" flag is persisted as soon as the wallet authorizes
    /// an account, so a network change after a failed switch reconnects.
    /// A `disconnect` while the prompt is open wins: the attempt returns
    /// [`SessionError::Cancelled`] and leaves the session disconnected.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<SessionSnapshot, SessionError> {
        let _guard = self.inner.connecting.lock().await;
        if self.state() == ConnectionState::Connected {
            debug!("Already connected");
            return Ok(self.snapshot());
        }
        let epoch = self.epoch();

        let provider = match select_provider(&self.inner.providers) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(error = %e, "No usable wallet provider");
                self.reset(Some(e.to_string()));
                return Err(e.into());
            }
        };

        self.update(|s| {
            s.state = ConnectionState::Connecting;
            s.provider = Some(Arc::clone(&provider));
            s.last_error = None;
        });

        let accounts = match provider.request_accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                let err = if e.is_user_rejection() || e.code == Some(codes::UNAUTHORIZED) {
                    SessionError::ConnectionRejected(e)
                } else {
                    SessionError::Provider(e)
                };
                warn!(error = %err, "Account authorization failed");
                self.reset(Some(err.to_string()));
                return Err(err);
            }
        };
        let Some(account) = accounts.first().copied() else {
            self.reset(Some(SessionError::NoAccounts.to_string()));
            return Err(SessionError::NoAccounts);
        };

        self.update_current(epoch, |s| s.persisted = self.persist())?;

        let chain_id = match provider.chain_id().await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Failed to read network");
                self.reset(Some(e.to_string()));
                return Err(SessionError::Provider(e));
            }
        };

        info!(account = %account, chain_id = chain_id, "Wallet authorized");

        let target = self.inner.network.chain_id;
        if chain_id != target {
            self.update_current(epoch, |s| {
                s.state = ConnectionState::NetworkMismatch;
                s.account = Some(account);
                s.chain_id = Some(chain_id);
            })?;
            return self.switch_network_from(epoch).await;
        }

        self.establish(&provider, account, chain_id, epoch)
    }

    /// Switch the provider to the required network, registering it first
    /// when the provider does not know it.
    ///
    /// Failure leaves the session in `NetworkMismatch`; calling again retries.
    /// The event listener is paused during the switch so the wallet's own
    /// `ChainChanged` does not tear the session down.
    #[instrument(skip(self))]
    pub async fn switch_network(&self) -> Result<SessionSnapshot, SessionError> {
        self.switch_network_from(self.epoch()).await
    }

    async fn switch_network_from(&self, epoch: u64) -> Result<SessionSnapshot, SessionError> {
        let (provider, account) = {
            let s = self.inner.session.read();
            match (s.provider.clone(), s.account) {
                (Some(p), Some(a)) => (p, a),
                _ => return Err(SessionError::NotConnected),
            }
        };

        if let Some(handle) = self.inner.listener.lock().take() {
            handle.abort();
        }

        match self.ensure_network(provider.as_ref()).await {
            Ok(chain_id) => self.establish(&provider, account, chain_id, epoch),
            Err(source) => {
                let err = SessionError::NetworkSwitchFailed {
                    chain_id: self.inner.network.chain_id,
                    network: self.inner.network.chain_name.clone(),
                    source,
                };
                warn!(error = %err, "Network switch failed");
                let current = provider.chain_id().await.ok();
                self.update_current(epoch, |s| {
                    s.state = ConnectionState::NetworkMismatch;
                    s.contract = None;
                    s.chain_id = current.or(s.chain_id);
                    s.last_error = Some(err.to_string());
                })?;
                // Listen again so a manual switch in the wallet reloads.
                self.start_listener(&provider);
                Err(err)
            }
        }
    }

    async fn ensure_network(&self, provider: &dyn WalletProvider) -> Result<u64, ProviderError> {
        let network = &self.inner.network;

        match provider.switch_chain(network.chain_id).await {
            Ok(()) => {}
            Err(e) if e.is_unrecognized_chain() => {
                info!(
                    chain_id = network.chain_id,
                    name = %network.chain_name,
                    "Network not registered with wallet, requesting registration"
                );
                provider.add_chain(network).await?;
                provider.switch_chain(network.chain_id).await?;
            }
            Err(e) => return Err(e),
        }

        let now = provider.chain_id().await?;
        if now != network.chain_id {
            return Err(ProviderError::new(
                codes::INTERNAL_ERROR,
                format!("Wallet is still on chain {now}"),
            ));
        }
        Ok(now)
    }

    fn establish(
        &self,
        provider: &Arc<dyn WalletProvider>,
        account: Address,
        chain_id: u64,
        epoch: u64,
    ) -> Result<SessionSnapshot, SessionError> {
        let contract = Arc::new(ContractFacade::new(
            self.inner.contract_address,
            Arc::clone(provider),
            Arc::clone(&self.inner.registry),
        ));

        let snapshot = self.update_current(epoch, |s| {
            s.provider = Some(Arc::clone(provider));
            s.contract = Some(contract);
            s.account = Some(account);
            s.chain_id = Some(chain_id);
            s.state = ConnectionState::Connected;
            s.persisted = self.persist();
            s.last_error = None;
        })?;
        self.start_listener(provider);

        info!(account = %account, chain_id = chain_id, "Wallet connected");
        Ok(snapshot)
    }

    fn persist(&self) -> bool {
        match self.inner.store.set(CONNECTED_KEY, CONNECTED_VALUE) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to persist connected flag");
                false
            }
        }
    }

    /// Disconnect: clear the session, remove the persisted flag, stop
    /// listening to the provider. Idempotent.
    #[instrument(skip(self))]
    pub fn disconnect(&self) {
        if let Some(handle) = self.inner.listener.lock().take() {
            handle.abort();
        }
        let was = self.state();
        self.update(|s| {
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            self.clear_persisted();
            *s = Session::default();
        });
        if was != ConnectionState::Disconnected {
            info!("Wallet disconnected");
        }
    }

    fn clear_persisted(&self) {
        if let Err(e) = self.inner.store.remove(CONNECTED_KEY) {
            warn!(error = %e, "Failed to clear connected flag");
        }
    }

    /// Whether the "connected" flag is persisted.
    pub fn was_connected(&self) -> bool {
        flag_set(self.inner.store.as_ref())
    }

    /// Reconnect at startup if the previous run left a connected flag.
    ///
    /// Returns `Ok(None)` when no attempt was made. A failed attempt clears
    /// the flag so the next start does not prompt again.
    #[instrument(skip(self))]
    pub async fn auto_connect(&self) -> Result<Option<SessionSnapshot>, SessionError> {
        if !self.was_connected() {
            debug!("No previous session");
            return Ok(None);
        }
        if select_provider(&self.inner.providers).is_err() {
            debug!("Previous session found but no compatible provider");
            return Ok(None);
        }

        info!("Restoring previous session");
        match self.connect().await {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!(error = %e, "Auto-connect failed, clearing connected flag");
                self.clear_persisted();
                self.update(|s| s.persisted = false);
                Err(e)
            }
        }
    }

    fn start_listener(&self, provider: &Arc<dyn WalletProvider>) {
        let events = provider.subscribe();
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(listen(weak, events));
        if let Some(previous) = self.inner.listener.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Apply a provider event. Returns false when the listener should stop.
    async fn on_event(&self, event: WalletEvent) -> bool {
        match event {
            WalletEvent::AccountsChanged(accounts) => match accounts.first().copied() {
                None => {
                    info!("Wallet revoked all accounts");
                    // Detach rather than abort: this runs on the listener.
                    self.inner.listener.lock().take();
                    self.clear_persisted();
                    self.update(|s| *s = Session::default());
                    false
                }
                Some(account) => {
                    info!(account = %account, "Account changed");
                    self.update(|s| s.account = Some(account));
                    true
                }
            },
            WalletEvent::ChainChanged(chain_id) => {
                warn!(chain_id = chain_id, "Network changed, reloading session");
                self.inner.listener.lock().take();
                self.reset(None);

                let manager = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = manager.auto_connect().await {
                        warn!(error = %e, "Session reload failed");
                    }
                });
                false
            }
        }
    }
}

fn flag_set(store: &dyn KeyValueStore) -> bool {
    matches!(store.get(CONNECTED_KEY), Ok(Some(ref v)) if v == CONNECTED_VALUE)
}

async fn listen(inner: Weak<Inner>, mut events: broadcast::Receiver<WalletEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "Wallet event listener lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Wallet event channel closed");
                break;
            }
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let manager = SessionManager { inner };
        debug!(event = ?event, "Wallet event");
        if !manager.on_event(event).await {
            break;
        }
    }
}
