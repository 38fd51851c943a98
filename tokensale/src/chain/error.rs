//! Error types for chain access.
//!
//! [`ChainError`] covers RPC provider communication, signing, transaction
//! submission, on-chain reverts and ABI decoding. Its rendered message is what
//! [`classify`](crate::classify::classify) inspects to pick a user-facing
//! failure kind, so variants keep the upstream message text intact.

/// Error type for chain reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ChainError {
    /// RPC / provider error.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Signing error, including a wallet refusing to sign.
    #[error("Signing error: {0}")]
    Signing(String),

    /// Transaction submission or confirmation error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// The call reverted, either in simulation or on-chain.
    #[error("Transaction reverted: {0}")]
    Reverted(String),

    /// Return data could not be decoded, or calldata could not be encoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A write was requested without a wallet session.
    #[error("No wallet connected")]
    NotConnected,

    /// Invalid configuration (missing fields, bad parameters).
    #[error("Config error: {0}")]
    Config(String),
}

impl ChainError {
    /// Create a provider error.
    #[must_use]
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a signing error.
    #[must_use]
    pub fn signing(msg: impl Into<String>) -> Self {
        Self::Signing(msg.into())
    }

    /// Create a transaction error.
    #[must_use]
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Create a revert error.
    #[must_use]
    pub fn reverted(msg: impl Into<String>) -> Self {
        Self::Reverted(msg.into())
    }

    /// Wrap a failed pre-submit simulation of `function`.
    ///
    /// Only node text reporting a revert becomes [`ChainError::Reverted`].
    /// Funding, gas and transport failures stay provider errors with the
    /// node's wording intact.
    #[must_use]
    pub fn simulation(function: &str, error: impl std::fmt::Display) -> Self {
        let msg = format!("{function} simulation failed: {error}");
        if msg.to_lowercase().contains("revert") {
            Self::Reverted(msg)
        } else {
            Self::Provider(msg)
        }
    }

    /// Create a decode error.
    #[must_use]
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a config error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{FailureKind, classify};

    #[test]
    fn simulation_revert_keeps_reason() {
        let err = ChainError::simulation(
            "buyTokens",
            "server returned an error response: error code 3: execution reverted: \"Sale paused\"",
        );
        assert!(matches!(err, ChainError::Reverted(_)));
        assert_eq!(
            classify(&err.to_string()),
            FailureKind::Reverted {
                reason: Some("Sale paused".into())
            }
        );
    }

    #[test]
    fn simulation_without_funds_is_not_a_revert() {
        let err = ChainError::simulation(
            "buyTokens",
            "server returned an error response: error code -32000: insufficient funds for gas * price + value",
        );
        assert!(matches!(err, ChainError::Provider(_)));
        assert_eq!(classify(&err.to_string()), FailureKind::InsufficientFunds);
    }

    #[test]
    fn simulation_transport_failure_stays_raw() {
        let err = ChainError::simulation("approve", "error sending request: connection refused");
        assert_eq!(
            classify(&err.to_string()),
            FailureKind::Unknown(
                "Provider error: approve simulation failed: error sending request: connection refused"
                    .into()
            )
        );
    }
}
