//! Miner chain interaction layer.
//!
//! This crate provides:
//! - The wallet provider seam (account authorization, network switching,
//!   signing, account/network events) and a local-key implementation
//! - A registry of canonical contract operations with prioritized candidate
//!   signatures, loadable from TOML
//! - A contract facade resolving reads with zero-default fallback and writes
//!   with pre-flight fallback up to signing
//! - Provider error classification (dispatch vs execution failures)

pub mod error;
mod facade;
pub mod operations;
pub mod wallet;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{codes, CallFailure, ProviderError};
pub use facade::{
    CandidateFailure, ContractFacade, FacadeError, PendingTx, ReadResolution, ReadValue,
};
pub use operations::{
    canonical, ArgRole, CallArgs, Candidate, OperationKind, OperationRegistry, OperationSpec,
    RemoteOperation, ValueKind,
};
pub use wallet::{
    select_provider, NativeCurrency, NetworkParams, ProviderInfo, ProviderResult,
    ProviderUnavailable, RpcWallet, TxReceipt, WalletEvent, WalletProvider,
};
