//! Provider discovery among several injected wallets.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::WalletProvider;

/// No usable provider could be selected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderUnavailable {
    /// Nothing was injected at all.
    #[error("No wallet provider detected. Install a compatible EVM wallet.")]
    NotDetected,
    /// Only incompatible providers were found.
    #[error("{0} detected, but it cannot operate this network. Use a compatible EVM wallet.")]
    Incompatible(String),
}

/// Pick the provider to talk to.
///
/// The first compatible provider wins, even when an incompatible one sits in
/// front of it and claims the default slot. Without any compatible provider
/// the selection fails.
pub fn select_provider(
    candidates: &[Arc<dyn WalletProvider>],
) -> Result<Arc<dyn WalletProvider>, ProviderUnavailable> {
    let Some(first) = candidates.first() else {
        return Err(ProviderUnavailable::NotDetected);
    };

    if let Some(compatible) = candidates.iter().find(|p| p.info().is_compatible) {
        let info = compatible.info();
        if candidates.len() > 1 {
            info!(
                selected = %info.name,
                candidates = candidates.len(),
                "Multiple providers found, compatible provider prioritized"
            );
        } else {
            debug!(selected = %info.name, "Provider selected");
        }
        return Ok(Arc::clone(compatible));
    }

    let info = first.info();
    warn!(
        provider = %info.name,
        shadows_others = info.shadows_others,
        "Only incompatible wallet providers detected"
    );
    Err(ProviderUnavailable::Incompatible(info.name))
}
