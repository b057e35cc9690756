//! Scripted wallet provider for tests.
//!
//! Reads and gas estimations are keyed by function selector; anything not
//! scripted behaves like a contract without that function (a revert with no
//! data). Every request is recorded so tests can assert on call order.

use alloy::network::TransactionBuilder;
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolValue;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};

use crate::error::{codes, ProviderError};
use crate::wallet::{NetworkParams, ProviderInfo, ProviderResult, TxReceipt, WalletEvent, WalletProvider};

/// Selector of a plain signature such as `getMyCorns(address)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// A transaction the mock accepted for signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTx {
    pub selector: [u8; 4],
    pub value: U256,
    pub input: Bytes,
    pub tx_hash: B256,
}

#[derive(Debug)]
struct MockState {
    accounts: ProviderResult<Vec<Address>>,
    chain_id: ProviderResult<u64>,
    registered: HashSet<u64>,
    switch_error: Option<ProviderError>,
    add_error: Option<ProviderError>,
    reads: HashMap<[u8; 4], ProviderResult<Bytes>>,
    writes: HashMap<[u8; 4], ProviderResult<u64>>,
    send_error: Option<ProviderError>,
    receipt_success: bool,
    balances: HashMap<Address, ProviderResult<U256>>,
    requests: Vec<String>,
    calls: Vec<[u8; 4]>,
    estimates: Vec<[u8; 4]>,
    sent: Vec<SentTx>,
    added: Vec<NetworkParams>,
    accounts_gate: Option<Arc<Notify>>,
}

/// Scripted [`WalletProvider`].
#[derive(Debug)]
pub struct MockWallet {
    info: ProviderInfo,
    state: Mutex<MockState>,
    events: broadcast::Sender<WalletEvent>,
}

impl MockWallet {
    /// Compatible wallet with one authorized account on `chain_id`.
    pub fn new(account: Address, chain_id: u64) -> Self {
        Self::with_info(ProviderInfo::compatible("mock"), account, chain_id)
    }

    /// Wallet announcing custom identity flags.
    pub fn with_info(info: ProviderInfo, account: Address, chain_id: u64) -> Self {
        let (events, _) = broadcast::channel(16);
        let mut registered = HashSet::new();
        registered.insert(chain_id);
        Self {
            info,
            state: Mutex::new(MockState {
                accounts: Ok(vec![account]),
                chain_id: Ok(chain_id),
                registered,
                switch_error: None,
                add_error: None,
                reads: HashMap::new(),
                writes: HashMap::new(),
                send_error: None,
                receipt_success: true,
                balances: HashMap::new(),
                requests: Vec::new(),
                calls: Vec::new(),
                estimates: Vec::new(),
                sent: Vec::new(),
                added: Vec::new(),
                accounts_gate: None,
            }),
            events,
        }
    }

    // ---- scripting ----

    /// Result of `request_accounts`.
    pub fn set_accounts(&self, accounts: ProviderResult<Vec<Address>>) {
        self.state.lock().accounts = accounts;
    }

    /// Result of `chain_id`.
    pub fn set_chain_id(&self, chain_id: ProviderResult<u64>) {
        self.state.lock().chain_id = chain_id;
    }

    /// Mark a network as known, so switching to it succeeds.
    pub fn register_chain(&self, chain_id: u64) {
        self.state.lock().registered.insert(chain_id);
    }

    /// Make `switch_chain` fail with this error for registered networks.
    pub fn fail_switch(&self, err: ProviderError) {
        self.state.lock().switch_error = Some(err);
    }

    /// Let `switch_chain` succeed again.
    pub fn allow_switch(&self) {
        self.state.lock().switch_error = None;
    }

    /// Make `add_chain` fail.
    pub fn fail_add_chain(&self, err: ProviderError) {
        self.state.lock().add_error = Some(err);
    }

    /// Script the raw result of a read.
    pub fn set_read(&self, signature: &str, result: ProviderResult<Bytes>) {
        self.state.lock().reads.insert(selector(signature), result);
    }

    /// A read returning an ABI-encoded uint256.
    pub fn returns_uint(&self, signature: &str, value: U256) {
        self.set_read(signature, Ok(Bytes::from(value.abi_encode())));
    }

    /// A read returning an ABI-encoded bool.
    pub fn returns_bool(&self, signature: &str, value: bool) {
        self.set_read(signature, Ok(Bytes::from(value.abi_encode())));
    }

    /// A function that exists but reverts with a reason.
    pub fn reverts(&self, signature: &str, reason: &str) {
        let err = ProviderError::new(codes::EXECUTION_ERROR, format!("execution reverted: {reason}"))
            .with_data(reason.as_bytes().to_vec());
        self.set_read(signature, Err(err.clone()));
        self.state.lock().writes.insert(selector(signature), Err(err));
    }

    /// A write whose pre-flight succeeds.
    pub fn accepts_write(&self, signature: &str) {
        self.state.lock().writes.insert(selector(signature), Ok(21_000));
    }

    /// A write whose pre-flight fails with this error.
    pub fn rejects_write(&self, signature: &str, err: ProviderError) {
        self.state.lock().writes.insert(selector(signature), Err(err));
    }

    /// Make `send_transaction` fail (e.g. the user dismisses the prompt).
    pub fn fail_send(&self, err: ProviderError) {
        self.state.lock().send_error = Some(err);
    }

    /// Status of every receipt.
    pub fn set_receipt_success(&self, success: bool) {
        self.state.lock().receipt_success = success;
    }

    /// Native balance of an address.
    pub fn set_balance(&self, address: Address, balance: ProviderResult<U256>) {
        self.state.lock().balances.insert(address, balance);
    }

    /// Block `request_accounts` until the returned handle is notified.
    pub fn hold_accounts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().accounts_gate = Some(Arc::clone(&gate));
        gate
    }

    /// Push an event to subscribers.
    pub fn emit(&self, event: WalletEvent) {
        let _ = self.events.send(event);
    }

    // ---- inspection ----

    /// Wallet-level requests in order (`eth_requestAccounts`, ...).
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }

    /// How many times a wallet-level method was requested.
    pub fn request_count(&self, method: &str) -> usize {
        self.state.lock().requests.iter().filter(|r| *r == method).count()
    }

    /// Selectors passed to `call`, in order.
    pub fn calls(&self) -> Vec<[u8; 4]> {
        self.state.lock().calls.clone()
    }

    /// How many times a function was read.
    pub fn call_count(&self, signature: &str) -> usize {
        let sel = selector(signature);
        self.state.lock().calls.iter().filter(|s| **s == sel).count()
    }

    /// Selectors passed to `estimate_gas`, in order.
    pub fn estimates(&self) -> Vec<[u8; 4]> {
        self.state.lock().estimates.clone()
    }

    /// Transactions accepted for signing.
    pub fn sent(&self) -> Vec<SentTx> {
        self.state.lock().sent.clone()
    }

    /// Networks registered through `add_chain`.
    pub fn added_chains(&self) -> Vec<NetworkParams> {
        self.state.lock().added.clone()
    }

    fn record(&self, method: &str) {
        self.state.lock().requests.push(method.to_string());
    }
}

fn selector_of(tx: &TransactionRequest) -> [u8; 4] {
    let input = tx.input().map(|b| b.as_ref()).unwrap_or_default();
    let mut sel = [0u8; 4];
    if input.len() >= 4 {
        sel.copy_from_slice(&input[..4]);
    }
    sel
}

fn missing_function() -> ProviderError {
    ProviderError::new(codes::EXECUTION_ERROR, "execution reverted")
}

#[async_trait]
impl WalletProvider for MockWallet {
    fn info(&self) -> ProviderInfo {
        self.info.clone()
    }

    async fn request_accounts(&self) -> ProviderResult<Vec<Address>> {
        self.record("eth_requestAccounts");
        let gate = self.state.lock().accounts_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.state.lock().accounts.clone()
    }

    async fn chain_id(&self) -> ProviderResult<u64> {
        self.record("eth_chainId");
        self.state.lock().chain_id.clone()
    }

    async fn switch_chain(&self, chain_id: u64) -> ProviderResult<()> {
        self.record("wallet_switchEthereumChain");
        let changed = {
            let mut state = self.state.lock();
            if !state.registered.contains(&chain_id) {
                return Err(ProviderError::unrecognized_chain(chain_id));
            }
            if let Some(err) = state.switch_error.clone() {
                return Err(err);
            }
            let changed = state.chain_id.as_ref().ok() != Some(&chain_id);
            state.chain_id = Ok(chain_id);
            changed
        };
        if changed {
            self.emit(WalletEvent::ChainChanged(chain_id));
        }
        Ok(())
    }

    async fn add_chain(&self, params: &NetworkParams) -> ProviderResult<()> {
        self.record("wallet_addEthereumChain");
        let mut state = self.state.lock();
        if let Some(err) = state.add_error.clone() {
            return Err(err);
        }
        state.registered.insert(params.chain_id);
        state.added.push(params.clone());
        Ok(())
    }

    async fn call(&self, tx: TransactionRequest) -> ProviderResult<Bytes> {
        let sel = selector_of(&tx);
        let mut state = self.state.lock();
        state.calls.push(sel);
        state.reads.get(&sel).cloned().unwrap_or_else(|| Err(missing_function()))
    }

    async fn estimate_gas(&self, tx: TransactionRequest) -> ProviderResult<u64> {
        let sel = selector_of(&tx);
        let mut state = self.state.lock();
        state.estimates.push(sel);
        state.writes.get(&sel).cloned().unwrap_or_else(|| Err(missing_function()))
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> ProviderResult<B256> {
        self.record("eth_sendTransaction");
        let mut state = self.state.lock();
        if let Some(err) = state.send_error.clone() {
            return Err(err);
        }
        let tx_hash = B256::with_last_byte(state.sent.len() as u8 + 1);
        state.sent.push(SentTx {
            selector: selector_of(&tx),
            value: (&tx).value().unwrap_or_default(),
            input: (&tx).input().cloned().unwrap_or_default(),
            tx_hash,
        });
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> ProviderResult<TxReceipt> {
        let success = self.state.lock().receipt_success;
        Ok(TxReceipt {
            tx_hash,
            block_number: Some(1),
            gas_used: 21_000,
            success,
        })
    }

    async fn balance(&self, address: Address) -> ProviderResult<U256> {
        self.record("eth_getBalance");
        self.state
            .lock()
            .balances
            .get(&address)
            .cloned()
            .unwrap_or(Ok(U256::ZERO))
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unscripted_read_is_missing_function() {
        let mock = MockWallet::new(Address::repeat_byte(1), 56);
        let tx = TransactionRequest::default().with_input(selector("getMyCorns(address)").to_vec());
        let err = mock.call(tx).await.unwrap_err();
        assert!(err.is_dispatch_failure());
        assert_eq!(mock.call_count("getMyCorns(address)"), 1);
    }

    #[tokio::test]
    async fn test_switch_unregistered_then_register() {
        let mock = MockWallet::new(Address::repeat_byte(1), 1);
        assert!(mock.switch_chain(56).await.unwrap_err().is_unrecognized_chain());
        mock.register_chain(56);
        mock.switch_chain(56).await.unwrap();
        assert_eq!(mock.chain_id().await.unwrap(), 56);
    }
}
