//! Failure classification for user-facing messages.
//!
//! Raw failure text from wallets, nodes and contracts is mapped onto a small
//! taxonomy by case-insensitive substring match. Classification only chooses
//! what is displayed; it never changes control flow.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::sequencer::TxKind;

/// Quoted revert reason, e.g. `reverted with reason string 'Sale ended'` or
/// `execution reverted: "Sale ended"`.
static REVERT_REASON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)reverted(?: with reason string)?:?\s*['"]([^'"]*)['"]"#)
        .unwrap_or_else(|e| unreachable!("revert reason pattern is valid: {e}"))
});

/// What configuration the action could not proceed without.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingConfig {
    /// Sale or stablecoin contract address.
    ContractAddresses,
    /// Unit price not loaded, or zero.
    Price,
}

/// A precondition the user has to fix before the action can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// No wallet session.
    NotConnected,
    /// Desired quantity is zero.
    QuantityNotPositive,
    /// Total cost could not be computed.
    CostUncomputable,
    /// More tokens requested than the sale holds.
    ExceedsInventory {
        /// Whole tokens still available.
        available: u64,
    },
    /// The allowance does not cover the cost yet.
    ApprovalRequired,
}

/// Failure taxonomy shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The user declined the signature request.
    UserRejected,
    /// The call reverted, with the contract's reason when one was found.
    Reverted {
        /// Revert reason string.
        reason: Option<String>,
    },
    /// The contract computed a zero cost for the requested amount.
    ZeroCost,
    /// Not enough stablecoin or gas funds.
    InsufficientFunds,
    /// The request itself was malformed.
    MalformedRequest,
    /// Contract addresses or price unavailable.
    ConfigurationMissing(MissingConfig),
    /// The action was refused before reaching the chain.
    Precondition(Precondition),
    /// The caller stopped waiting before the transaction settled.
    Abandoned,
    /// Anything unrecognised; carries the raw message.
    Unknown(String),
}

impl From<Precondition> for FailureKind {
    fn from(precondition: Precondition) -> Self {
        Self::Precondition(precondition)
    }
}

/// A classified failure of one action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", self.message())]
pub struct Failure {
    /// Which step failed.
    pub action: TxKind,
    /// Classified cause.
    pub kind: FailureKind,
}

impl Failure {
    /// Create a failure of `action`.
    #[must_use]
    pub const fn new(action: TxKind, kind: FailureKind) -> Self {
        Self { action, kind }
    }

    /// Classify a raw failure message from `action`.
    #[must_use]
    pub fn classify(action: TxKind, raw: &str) -> Self {
        Self::new(action, classify(raw))
    }

    /// Whether the user cancelled the action.
    #[must_use]
    pub const fn is_user_rejection(&self) -> bool {
        matches!(self.kind, FailureKind::UserRejected)
    }

    /// Message for display.
    #[must_use]
    pub fn message(&self) -> String {
        match &self.kind {
            FailureKind::UserRejected => match self.action {
                TxKind::ApprovalReset | TxKind::Approval => "Approval cancelled by user".into(),
                TxKind::Purchase => "Transaction cancelled by user".into(),
            },
            FailureKind::Reverted {
                reason: Some(reason),
            } => format!("Transaction reverted: {reason}"),
            FailureKind::Reverted { reason: None } => "Transaction reverted".into(),
            FailureKind::ZeroCost => {
                "The calculated cost is zero; try a larger token amount".into()
            }
            FailureKind::InsufficientFunds => {
                "Insufficient balance to complete the transaction".into()
            }
            FailureKind::MalformedRequest => "The transaction request was malformed".into(),
            FailureKind::ConfigurationMissing(MissingConfig::ContractAddresses) => {
                "Contract addresses are not configured".into()
            }
            FailureKind::ConfigurationMissing(MissingConfig::Price) => {
                "Token price is unavailable".into()
            }
            FailureKind::Precondition(p) => p.to_string(),
            FailureKind::Abandoned => {
                "Stopped waiting for the transaction; check your wallet before retrying".into()
            }
            FailureKind::Unknown(raw) => raw.clone(),
        }
    }
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => f.write_str("Connect a wallet first"),
            Self::QuantityNotPositive => f.write_str("Token amount must be greater than zero"),
            Self::CostUncomputable => f.write_str("Cannot calculate the total cost"),
            Self::ExceedsInventory { available } => write!(f, "Only {available} tokens available"),
            Self::ApprovalRequired => f.write_str("Approve the stablecoin spend first"),
        }
    }
}

/// Map a raw failure message onto a [`FailureKind`].
#[must_use]
pub fn classify(raw: &str) -> FailureKind {
    let message = raw.to_lowercase();

    if message.contains("user rejected") || message.contains("user denied") {
        return FailureKind::UserRejected;
    }
    if message.contains("cost is zero") {
        return FailureKind::ZeroCost;
    }
    if message.contains("reverted") {
        let reason = REVERT_REASON
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|r| !r.is_empty());
        return FailureKind::Reverted { reason };
    }
    if message.contains("insufficient") {
        return FailureKind::InsufficientFunds;
    }
    if message.contains("malformed")
        || message.contains("invalid address")
        || message.contains("invalid arguments")
    {
        return FailureKind::MalformedRequest;
    }
    FailureKind::Unknown(raw.to_string())
}
