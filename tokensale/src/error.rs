//! Crate-wide error type.
//!
//! Chain and configuration errors keep their own enums; [`Error`] only
//! aggregates them for callers that drive the whole storefront.

use crate::chain::ChainError;
use crate::classify::Failure;
use crate::config::ConfigError;

/// Result type alias for storefront operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Chain access error.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A purchase action was blocked or failed.
    #[error("Purchase error: {0}")]
    Purchase(#[from] Failure),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FailureKind;
    use crate::sequencer::TxKind;

    #[test]
    fn wraps_sources_with_context() {
        let err: Error = ChainError::NotConnected.into();
        assert_eq!(err.to_string(), "Chain error: No wallet connected");

        let err: Error = Failure::new(TxKind::Purchase, FailureKind::InsufficientFunds).into();
        assert_eq!(
            err.to_string(),
            "Purchase error: Insufficient balance to complete the transaction"
        );
    }
}
