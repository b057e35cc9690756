//! Provider error reports and remote-call failure classification.

use alloy::primitives::Bytes;
use regex_lite::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// EIP-1193 / EIP-3326 error codes reported by wallet providers.
pub mod codes {
    /// The user rejected the request.
    pub const USER_REJECTED: i64 = 4001;
    /// The requested account or method has not been authorized.
    pub const UNAUTHORIZED: i64 = 4100;
    /// The provider does not support the requested method.
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    /// The provider is disconnected from all chains.
    pub const DISCONNECTED: i64 = 4900;
    /// The requested chain has not been added to the provider.
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
    /// Generic execution error (reverts, insufficient funds, ...).
    pub const EXECUTION_ERROR: i64 = -32000;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Error report returned by a wallet provider.
///
/// Mirrors the `{ code, message, data }` shape providers use, so the
/// classification below can look at every part of it.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    /// Numeric error code, if the provider supplied one
    pub code: Option<i64>,
    /// Human-readable message
    pub message: String,
    /// Revert data or other payload
    pub data: Option<Bytes>,
}

impl ProviderError {
    /// Create an error with a code.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
            data: None,
        }
    }

    /// Create an error without a code (transport failures, local errors).
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            data: None,
        }
    }

    /// Attach revert/payload data.
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// The user dismissed the request in the wallet UI.
    pub fn user_rejected() -> Self {
        Self::new(codes::USER_REJECTED, "User rejected the request.")
    }

    /// The chain is not registered with the provider.
    pub fn unrecognized_chain(chain_id: u64) -> Self {
        Self::new(
            codes::UNRECOGNIZED_CHAIN,
            format!("Unrecognized chain ID 0x{chain_id:x}. Try adding the chain first."),
        )
    }

    /// Whether the provider reported that the chain is unknown to it.
    pub fn is_unrecognized_chain(&self) -> bool {
        self.code == Some(codes::UNRECOGNIZED_CHAIN)
    }

    /// Whether this looks like a user rejection.
    pub fn is_user_rejection(&self) -> bool {
        self.code == Some(codes::USER_REJECTED) || user_rejected_re().is_match(&self.message)
    }

    /// Whether the reported failure means the function was never dispatched
    /// (missing selector, incompatible signature) rather than executed.
    pub fn is_dispatch_failure(&self) -> bool {
        if dispatch_re().is_match(&self.message) {
            return true;
        }
        // A contract without the selector (and without a fallback) reverts
        // with no data at all. A real revert carries a reason payload.
        revert_re().is_match(&self.message) && self.data.as_ref().map_or(true, |d| d.is_empty())
    }
}

fn user_rejected_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)user (rejected|denied|cancel)|rejected by user|ACTION_REJECTED")
            .expect("valid regex")
    })
}

fn dispatch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)function selector was not recognized|no matching function|is not a function|function does not exist|invalid function signature|missing revert data",
        )
        .expect("valid regex")
    })
}

fn revert_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)revert").expect("valid regex"))
}

/// Why a single candidate invocation failed.
#[derive(Debug, Clone, Error)]
pub enum CallFailure {
    /// The candidate could not be dispatched: unknown function, incompatible
    /// arguments, or a result that does not match its declared signature.
    /// The facade moves on to the next candidate.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// The function exists and ran, but the call failed (revert with reason,
    /// transport failure, funds). The facade stops cascading.
    #[error("execution error: {0}")]
    Execution(ProviderError),
}

impl CallFailure {
    /// Classify a provider error from a call or gas estimation.
    pub fn from_provider(err: ProviderError) -> Self {
        if err.is_dispatch_failure() {
            Self::Dispatch(err.message)
        } else {
            Self::Execution(err)
        }
    }

    /// Whether the facade should try the next candidate.
    pub fn is_dispatch(&self) -> bool {
        matches!(self, Self::Dispatch(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revert_without_data_is_dispatch() {
        let err = ProviderError::new(codes::EXECUTION_ERROR, "execution reverted");
        assert!(err.is_dispatch_failure());

        let with_reason = ProviderError::new(codes::EXECUTION_ERROR, "execution reverted: not open")
            .with_data(vec![0x08, 0xc3, 0x79, 0xa0]);
        assert!(!with_reason.is_dispatch_failure());
    }

    #[test]
    fn test_dispatch_messages() {
        for msg in [
            "Function selector was not recognized and there's no fallback function",
            "no matching function (argument=\"key\")",
            "contract.popCorn is not a function",
        ] {
            assert!(ProviderError::message(msg).is_dispatch_failure(), "{msg}");
        }
        assert!(!ProviderError::message("connection refused").is_dispatch_failure());
    }

    #[test]
    fn test_user_rejection() {
        assert!(ProviderError::user_rejected().is_user_rejection());
        assert!(ProviderError::message("MetaMask Tx Signature: User denied transaction signature.")
            .is_user_rejection());
        assert!(!ProviderError::message("insufficient funds for gas").is_user_rejection());
    }

    #[test]
    fn test_call_failure_classification() {
        let dispatch = CallFailure::from_provider(ProviderError::message("execution reverted"));
        assert!(dispatch.is_dispatch());

        let transport = CallFailure::from_provider(ProviderError::message("timed out"));
        assert!(!transport.is_dispatch());
    }

    #[test]
    fn test_unrecognized_chain() {
        let err = ProviderError::unrecognized_chain(56);
        assert!(err.is_unrecognized_chain());
        assert!(err.message.contains("0x38"));
    }
}
