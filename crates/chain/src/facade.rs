//! Contract facade: canonical operations over whichever signature the
//! deployed contract actually exposes.
//!
//! Reads try candidates in declared order. A dispatch error (unknown
//! function, incompatible result) moves on to the next candidate; any other
//! failure stops the cascade. When nothing resolves, the read yields the
//! zero value of its type and the failure chain is logged and returned, so
//! one missing getter never blanks the whole dashboard.
//!
//! Writes pre-flight each candidate with a gas estimate. The first candidate
//! that passes is accepted for signing and submitted; after that point there
//! is no fallback, so a rejection or revert surfaces as-is and the same
//! intent is never submitted twice.

use alloy::dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy::json_abi::Function;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::error::{CallFailure, ProviderError};
use crate::operations::{Candidate, CallArgs, OperationRegistry, RemoteOperation, ValueKind};
use crate::wallet::{ProviderResult, TxReceipt, WalletProvider};

/// Decoded value of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadValue {
    Uint(U256),
    Bool(bool),
    Address(Address),
}

impl ReadValue {
    /// Zero value for a kind.
    pub fn zero(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Bool => Self::Bool(false),
            ValueKind::Address => Self::Address(Address::ZERO),
            ValueKind::Uint | ValueKind::None => Self::Uint(U256::ZERO),
        }
    }

    /// Numeric view (zero for non-numeric values).
    pub fn as_uint(&self) -> U256 {
        match self {
            Self::Uint(v) => *v,
            _ => U256::ZERO,
        }
    }

    /// Boolean view (false for non-bool values).
    pub fn as_bool(&self) -> bool {
        matches!(self, Self::Bool(true))
    }

    fn from_dyn(value: DynSolValue, kind: ValueKind) -> Option<Self> {
        match (value, kind) {
            (DynSolValue::Uint(v, _), ValueKind::Uint) => Some(Self::Uint(v)),
            (DynSolValue::Bool(b), ValueKind::Bool) => Some(Self::Bool(b)),
            (DynSolValue::Address(a), ValueKind::Address) => Some(Self::Address(a)),
            _ => None,
        }
    }
}

/// One candidate that did not resolve.
#[derive(Debug, Clone)]
pub struct CandidateFailure {
    /// Candidate label
    pub candidate: String,
    /// What went wrong
    pub failure: CallFailure,
}

/// Outcome of a read, resolved or defaulted.
#[derive(Debug, Clone)]
pub struct ReadResolution {
    /// Canonical operation
    pub operation: String,
    /// Resolved value, or the zero default
    pub value: ReadValue,
    /// Candidate that produced the value
    pub resolved_by: Option<String>,
    /// Failed candidates, in the order tried
    pub failures: SmallVec<[CandidateFailure; 4]>,
}

impl ReadResolution {
    /// Whether a candidate produced the value.
    pub fn is_resolved(&self) -> bool {
        self.resolved_by.is_some()
    }

    /// Numeric value.
    pub fn as_uint(&self) -> U256 {
        self.value.as_uint()
    }

    /// Boolean value.
    pub fn as_bool(&self) -> bool {
        self.value.as_bool()
    }
}

/// A submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTx {
    /// Canonical operation
    pub operation: String,
    /// Candidate accepted for signing
    pub candidate: String,
    /// Transaction hash
    pub tx_hash: B256,
}

/// Facade errors.
#[derive(Debug, Clone, Error)]
pub enum FacadeError {
    /// The operation is not in the registry.
    #[error("Unknown operation '{0}'")]
    UnknownOperation(String),

    /// A read was requested for a write operation or vice versa, or value
    /// was attached to a non-payable write.
    #[error("Operation '{operation}' cannot be used as {requested}")]
    KindMismatch {
        operation: String,
        requested: &'static str,
    },

    /// Every candidate failed dispatch.
    #[error("No candidate signature of '{operation}' is supported by the contract")]
    Unresolved {
        operation: String,
        failures: Vec<CandidateFailure>,
    },

    /// The pre-flight of a dispatchable candidate failed (revert with reason,
    /// insufficient funds, transport).
    #[error("{candidate} pre-flight failed: {source}")]
    Preflight {
        candidate: String,
        #[source]
        source: ProviderError,
    },

    /// The provider refused or failed to sign/broadcast.
    #[error("{candidate} submission failed: {source}")]
    Submission {
        candidate: String,
        #[source]
        source: ProviderError,
    },

    /// The receipt could not be obtained.
    #[error("Confirmation failed: {0}")]
    Confirmation(#[source] ProviderError),

    /// The transaction settled with a failed status.
    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },
}

impl FacadeError {
    /// Provider report behind this error, if any.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Preflight { source, .. }
            | Self::Submission { source, .. }
            | Self::Confirmation(source) => Some(source),
            _ => None,
        }
    }
}

/// Canonical operations against one contract through one provider.
///
/// Bound to the provider and network of the session that created it.
pub struct ContractFacade {
    address: Address,
    provider: Arc<dyn WalletProvider>,
    registry: Arc<OperationRegistry>,
}

impl ContractFacade {
    /// Create a facade for a contract address.
    pub fn new(
        address: Address,
        provider: Arc<dyn WalletProvider>,
        registry: Arc<OperationRegistry>,
    ) -> Self {
        Self {
            address,
            provider,
            registry,
        }
    }

    /// Contract address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Underlying provider.
    pub fn provider(&self) -> &Arc<dyn WalletProvider> {
        &self.provider
    }

    fn operation(&self, canonical: &str) -> Result<Arc<RemoteOperation>, FacadeError> {
        self.registry
            .get(canonical)
            .ok_or_else(|| FacadeError::UnknownOperation(canonical.to_string()))
    }

    /// Resolve a read operation.
    ///
    /// Never fails because of the contract: unresolved reads yield the zero
    /// default with the failure chain attached.
    #[instrument(skip(self, args), fields(contract = %self.address))]
    pub async fn resolve_read(
        &self,
        canonical: &str,
        args: &CallArgs,
    ) -> Result<ReadResolution, FacadeError> {
        let op = self.operation(canonical)?;
        if op.kind.is_write() {
            return Err(FacadeError::KindMismatch {
                operation: op.canonical.clone(),
                requested: "a read",
            });
        }

        let mut failures = SmallVec::new();
        for candidate in &op.candidates {
            match self.invoke_read(&op, candidate, args).await {
                Ok(value) => {
                    debug!(operation = %op.canonical, candidate = %candidate, "Read resolved");
                    return Ok(ReadResolution {
                        operation: op.canonical.clone(),
                        value,
                        resolved_by: Some(candidate.label().to_string()),
                        failures,
                    });
                }
                Err(failure) => {
                    let dispatch = failure.is_dispatch();
                    debug!(
                        operation = %op.canonical,
                        candidate = %candidate,
                        error = %failure,
                        "Candidate failed"
                    );
                    failures.push(CandidateFailure {
                        candidate: candidate.label().to_string(),
                        failure,
                    });
                    if !dispatch {
                        break;
                    }
                }
            }
        }

        let chain: Vec<String> = failures
            .iter()
            .map(|f: &CandidateFailure| format!("{}: {}", f.candidate, f.failure))
            .collect();
        warn!(
            operation = %op.canonical,
            failures = ?chain,
            "Read unresolved, using zero default"
        );

        Ok(ReadResolution {
            operation: op.canonical.clone(),
            value: ReadValue::zero(op.output),
            resolved_by: None,
            failures,
        })
    }

    async fn invoke_read(
        &self,
        op: &RemoteOperation,
        candidate: &Candidate,
        args: &CallArgs,
    ) -> Result<ReadValue, CallFailure> {
        let mut total = U256::ZERO;
        let mut last = None;

        for function in candidate.calls() {
            let input = self.encode(op, function, args)?;
            let tx = TransactionRequest::default()
                .with_to(self.address)
                .with_input(input);

            let data = self
                .provider
                .call(tx)
                .await
                .map_err(CallFailure::from_provider)?;
            if data.is_empty() {
                return Err(CallFailure::Dispatch(format!(
                    "{} returned no data",
                    function.signature()
                )));
            }

            let value = function
                .abi_decode_output(&data, true)
                .ok()
                .and_then(|values| values.into_iter().next())
                .and_then(|value| ReadValue::from_dyn(value, op.output))
                .ok_or_else(|| {
                    CallFailure::Dispatch(format!(
                        "{} returned data that does not decode as {:?}",
                        function.signature(),
                        op.output
                    ))
                })?;

            total = total.saturating_add(value.as_uint());
            last = Some(value);
        }

        match last {
            Some(_) if candidate.is_composite() => Ok(ReadValue::Uint(total)),
            Some(value) => Ok(value),
            None => Err(CallFailure::Dispatch(format!("{} has no calls", candidate))),
        }
    }

    fn encode(
        &self,
        op: &RemoteOperation,
        function: &Function,
        args: &CallArgs,
    ) -> Result<Bytes, CallFailure> {
        let values = op.bind_args(function, args).ok_or_else(|| {
            CallFailure::Dispatch(format!(
                "{} takes arguments '{}' does not provide",
                function.signature(),
                op.canonical
            ))
        })?;
        function
            .abi_encode_input(&values)
            .map(Bytes::from)
            .map_err(|e| CallFailure::Dispatch(format!("{}: {e}", function.signature())))
    }

    /// Resolve and submit a write operation.
    ///
    /// Returns once the provider has accepted the transaction; use
    /// [`wait_for_confirmation`](Self::wait_for_confirmation) to settle it.
    #[instrument(skip(self, args), fields(contract = %self.address))]
    pub async fn resolve_write(
        &self,
        canonical: &str,
        args: &CallArgs,
        value: U256,
    ) -> Result<PendingTx, FacadeError> {
        let op = self.operation(canonical)?;
        if !op.kind.is_write() {
            return Err(FacadeError::KindMismatch {
                operation: op.canonical.clone(),
                requested: "a write",
            });
        }
        if !value.is_zero() && op.kind != crate::operations::OperationKind::Payable {
            return Err(FacadeError::KindMismatch {
                operation: op.canonical.clone(),
                requested: "a payable write",
            });
        }

        let mut failures = Vec::new();
        for candidate in &op.candidates {
            let Some(function) = candidate.calls().first() else {
                continue;
            };

            let input = match self.encode(&op, function, args) {
                Ok(input) => input,
                Err(failure) => {
                    failures.push(CandidateFailure {
                        candidate: candidate.label().to_string(),
                        failure,
                    });
                    continue;
                }
            };

            let mut tx = TransactionRequest::default()
                .with_to(self.address)
                .with_input(input);
            if !value.is_zero() {
                tx = tx.with_value(value);
            }

            match self.provider.estimate_gas(tx.clone()).await {
                Ok(gas) => {
                    info!(
                        operation = %op.canonical,
                        candidate = %candidate,
                        gas = gas,
                        value = %value,
                        "Candidate accepted for signing"
                    );
                    let started = Instant::now();
                    let tx_hash = self.provider.send_transaction(tx).await.map_err(|source| {
                        FacadeError::Submission {
                            candidate: candidate.label().to_string(),
                            source,
                        }
                    })?;
                    info!(
                        operation = %op.canonical,
                        tx_hash = %tx_hash,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Transaction submitted"
                    );
                    return Ok(PendingTx {
                        operation: op.canonical.clone(),
                        candidate: candidate.label().to_string(),
                        tx_hash,
                    });
                }
                Err(err) => match CallFailure::from_provider(err) {
                    failure @ CallFailure::Dispatch(_) => {
                        debug!(
                            operation = %op.canonical,
                            candidate = %candidate,
                            error = %failure,
                            "Candidate not dispatchable"
                        );
                        failures.push(CandidateFailure {
                            candidate: candidate.label().to_string(),
                            failure,
                        });
                    }
                    CallFailure::Execution(source) => {
                        warn!(
                            operation = %op.canonical,
                            candidate = %candidate,
                            error = %source,
                            "Pre-flight failed"
                        );
                        return Err(FacadeError::Preflight {
                            candidate: candidate.label().to_string(),
                            source,
                        });
                    }
                },
            }
        }

        warn!(
            operation = %op.canonical,
            candidates = failures.len(),
            "No candidate signature accepted"
        );
        Err(FacadeError::Unresolved {
            operation: op.canonical.clone(),
            failures,
        })
    }

    /// Wait for a submitted transaction to settle.
    #[instrument(skip(self, pending), fields(tx_hash = %pending.tx_hash))]
    pub async fn wait_for_confirmation(&self, pending: &PendingTx) -> Result<TxReceipt, FacadeError> {
        let receipt = self
            .provider
            .wait_for_receipt(pending.tx_hash)
            .await
            .map_err(FacadeError::Confirmation)?;

        if !receipt.success {
            warn!(operation = %pending.operation, "Transaction reverted");
            return Err(FacadeError::Reverted {
                tx_hash: pending.tx_hash,
            });
        }

        info!(
            operation = %pending.operation,
            block = ?receipt.block_number,
            gas_used = receipt.gas_used,
            "Transaction confirmed"
        );
        Ok(receipt)
    }

    /// Native balance held by the contract.
    pub async fn contract_balance(&self) -> ProviderResult<U256> {
        self.provider.balance(self.address).await
    }
}

impl std::fmt::Debug for ContractFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractFacade")
            .field("address", &self.address)
            .field("provider", &self.provider.info().name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use crate::operations::canonical;
    use crate::testing::{selector, MockWallet};

    const CONTRACT: Address = Address::new([0xcc; 20]);
    const ACCOUNT: Address = Address::new([0xaa; 20]);

    fn facade(mock: &Arc<MockWallet>) -> ContractFacade {
        ContractFacade::new(
            CONTRACT,
            Arc::clone(mock) as Arc<dyn WalletProvider>,
            Arc::new(OperationRegistry::builtin()),
        )
    }

    fn mock() -> Arc<MockWallet> {
        Arc::new(MockWallet::new(ACCOUNT, 56))
    }

    #[tokio::test]
    async fn test_read_falls_back_in_order() {
        let mock = mock();
        mock.returns_uint("getMyMiners(address)", U256::from(7));
        let facade = facade(&mock);

        let res = facade
            .resolve_read(canonical::UNIT_COUNT, &CallArgs::account(ACCOUNT))
            .await
            .unwrap();

        assert_eq!(res.as_uint(), U256::from(7));
        assert_eq!(res.resolved_by.as_deref(), Some("getMyMiners(address)"));
        assert_eq!(res.failures.len(), 2);
        assert_eq!(
            mock.calls(),
            vec![
                selector("getMyHarvesters(address)"),
                selector("hatcheryHarvesters(address)"),
                selector("getMyMiners(address)"),
            ]
        );
    }

    #[tokio::test]
    async fn test_read_first_candidate_short_circuits() {
        let mock = mock();
        mock.returns_uint("getMyHarvesters(address)", U256::from(3));
        mock.returns_uint("getMyMiners(address)", U256::from(9));
        let facade = facade(&mock);

        let res = facade
            .resolve_read(canonical::UNIT_COUNT, &CallArgs::account(ACCOUNT))
            .await
            .unwrap();
        assert_eq!(res.as_uint(), U256::from(3));
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_read_all_fail_yields_zero() {
        let mock = mock();
        let facade = facade(&mock);

        let res = facade
            .resolve_read(canonical::UNIT_COUNT, &CallArgs::account(ACCOUNT))
            .await
            .unwrap();
        assert!(!res.is_resolved());
        assert_eq!(res.as_uint(), U256::ZERO);
        assert_eq!(res.failures.len(), 5);

        let init = facade.resolve_read(canonical::INITIALIZED, &CallArgs::none()).await.unwrap();
        assert!(!init.as_bool());
    }

    #[tokio::test]
    async fn test_read_composite_sums() {
        let mock = mock();
        mock.returns_uint("claimedCorns(address)", U256::from(100));
        mock.returns_uint("getCornsSinceLastHatch(address)", U256::from(23));
        let facade = facade(&mock);

        let res = facade
            .resolve_read(canonical::YIELD_UNITS, &CallArgs::account(ACCOUNT))
            .await
            .unwrap();
        assert_eq!(res.as_uint(), U256::from(123));
    }

    #[tokio::test]
    async fn test_read_revert_with_reason_stops_cascade() {
        let mock = mock();
        mock.reverts("getMyHarvesters(address)", "paused");
        mock.returns_uint("hatcheryHarvesters(address)", U256::from(5));
        let facade = facade(&mock);

        let res = facade
            .resolve_read(canonical::UNIT_COUNT, &CallArgs::account(ACCOUNT))
            .await
            .unwrap();
        assert!(!res.is_resolved());
        assert_eq!(res.as_uint(), U256::ZERO);
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_read_undecodable_result_advances() {
        let mock = mock();
        mock.set_read("getMyHarvesters(address)", Ok(Bytes::from_static(&[1, 2, 3])));
        mock.returns_uint("hatcheryHarvesters(address)", U256::from(4));
        let facade = facade(&mock);

        let res = facade
            .resolve_read(canonical::UNIT_COUNT, &CallArgs::account(ACCOUNT))
            .await
            .unwrap();
        assert_eq!(res.as_uint(), U256::from(4));
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let facade = facade(&mock());
        let err = facade.resolve_read("nope", &CallArgs::none()).await.unwrap_err();
        assert!(matches!(err, FacadeError::UnknownOperation(_)));
    }

    #[tokio::test]
    async fn test_write_falls_back_until_accepted() {
        let mock = mock();
        mock.accepts_write("hatchEggs(address)");
        mock.accepts_write("rebakePizza(address)");
        let facade = facade(&mock);

        let pending = facade
            .resolve_write(canonical::COMPOUND, &CallArgs::referrer(ACCOUNT), U256::ZERO)
            .await
            .unwrap();

        assert_eq!(pending.candidate, "hatchEggs(address)");
        let sent = mock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].selector, selector("hatchEggs(address)"));
    }

    #[tokio::test]
    async fn test_write_rejection_after_acceptance_does_not_fall_back() {
        let mock = mock();
        mock.accepts_write("popCorn(address)");
        mock.accepts_write("hatchEggs(address)");
        mock.fail_send(ProviderError::user_rejected());
        let facade = facade(&mock);

        let err = facade
            .resolve_write(canonical::COMPOUND, &CallArgs::referrer(ACCOUNT), U256::ZERO)
            .await
            .unwrap_err();

        assert!(matches!(err, FacadeError::Submission { ref candidate, .. } if candidate == "popCorn(address)"));
        assert!(err.provider_error().unwrap().is_user_rejection());
        assert_eq!(mock.estimates(), vec![selector("popCorn(address)")]);
        assert_eq!(mock.request_count("eth_sendTransaction"), 1);
    }

    #[tokio::test]
    async fn test_write_preflight_execution_error_surfaces() {
        let mock = mock();
        mock.rejects_write(
            "buyCorn(address)",
            ProviderError::new(codes::EXECUTION_ERROR, "insufficient funds for gas * price + value"),
        );
        mock.accepts_write("buyEggs(address)");
        let facade = facade(&mock);

        let err = facade
            .resolve_write(canonical::ACQUIRE, &CallArgs::referrer(ACCOUNT), U256::from(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FacadeError::Preflight { .. }));
        assert!(mock.sent().is_empty());
    }

    #[tokio::test]
    async fn test_write_all_unsupported() {
        let mock = mock();
        let facade = facade(&mock);

        let err = facade
            .resolve_write(canonical::LIQUIDATE, &CallArgs::none(), U256::ZERO)
            .await
            .unwrap_err();
        match err {
            FacadeError::Unresolved { failures, .. } => assert_eq!(failures.len(), 4),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_payable_write_carries_value() {
        let mock = mock();
        mock.accepts_write("buyCorn(address)");
        let facade = facade(&mock);
        let value = U256::from(10u64.pow(16));

        facade
            .resolve_write(canonical::ACQUIRE, &CallArgs::referrer(ACCOUNT), value)
            .await
            .unwrap();
        assert_eq!(mock.sent()[0].value, value);
    }

    #[tokio::test]
    async fn test_value_on_non_payable_rejected() {
        let facade = facade(&mock());
        let err = facade
            .resolve_write(canonical::LIQUIDATE, &CallArgs::none(), U256::from(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FacadeError::KindMismatch { .. }));
    }

    #[tokio::test]
    async fn test_confirmation_reverted() {
        let mock = mock();
        mock.accepts_write("sellCorn()");
        mock.set_receipt_success(false);
        let facade = facade(&mock);

        let pending = facade
            .resolve_write(canonical::LIQUIDATE, &CallArgs::none(), U256::ZERO)
            .await
            .unwrap();
        let err = facade.wait_for_confirmation(&pending).await.unwrap_err();
        assert!(matches!(err, FacadeError::Reverted { .. }));
    }

    #[tokio::test]
    async fn test_contract_balance() {
        let mock = mock();
        mock.set_balance(CONTRACT, Ok(U256::from(42)));
        assert_eq!(facade(&mock).contract_balance().await.unwrap(), U256::from(42));
    }
}
