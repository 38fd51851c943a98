//! Chain access for the sale: read calls, write calls and the client seam.
//!
//! # Architecture
//!
//! ```text
//! ReadCall  (contract, function, args) ──► ChainClient::read    ──► U256
//! WriteCall (approve / buyTokens)      ──► ChainClient::simulate
//!                                      ──► ChainClient::submit  ──► tx hash
//!                                      ──► ChainClient::confirm ──► included / reverted
//! ```
//!
//! [`EvmClient`] talks JSON-RPC through [`alloy`]; [`MockChain`] is an
//! in-memory stand-in used by tests and demos.

use std::fmt;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;

pub mod contracts;
mod error;
mod evm;
mod mock;
mod network;

pub use error::ChainError;
pub use evm::EvmClient;
pub use mock::{MockChain, MockEvent};
pub use network::EvmChain;

/// Transaction identifier returned by a successful submission.
pub type TxHash = B256;

/// Read-only contract functions the storefront polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadFunction {
    /// `PRICE_PER_TOKEN()` on the sale contract.
    PricePerToken,
    /// `getAvailableTokens()` on the sale contract.
    AvailableTokens,
    /// `balanceOf(owner)` on an ERC-20 contract.
    BalanceOf,
    /// `allowance(owner, spender)` on an ERC-20 contract.
    Allowance,
}

impl ReadFunction {
    /// ABI function name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PricePerToken => "PRICE_PER_TOKEN",
            Self::AvailableTokens => "getAvailableTokens",
            Self::BalanceOf => "balanceOf",
            Self::Allowance => "allowance",
        }
    }

    /// Number of address arguments the function takes.
    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::PricePerToken | Self::AvailableTokens => 0,
            Self::BalanceOf => 1,
            Self::Allowance => 2,
        }
    }
}

impl fmt::Display for ReadFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A read call, which doubles as its cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReadCall {
    /// Contract being queried.
    pub contract: Address,
    /// Function being called.
    pub function: ReadFunction,
    /// Address arguments, in ABI order.
    pub args: Vec<Address>,
}

impl ReadCall {
    /// `PRICE_PER_TOKEN()` on `sale`.
    #[must_use]
    pub const fn price_per_token(sale: Address) -> Self {
        Self {
            contract: sale,
            function: ReadFunction::PricePerToken,
            args: Vec::new(),
        }
    }

    /// `getAvailableTokens()` on `sale`.
    #[must_use]
    pub const fn available_tokens(sale: Address) -> Self {
        Self {
            contract: sale,
            function: ReadFunction::AvailableTokens,
            args: Vec::new(),
        }
    }

    /// `balanceOf(owner)` on `token`.
    #[must_use]
    pub fn balance_of(token: Address, owner: Address) -> Self {
        Self {
            contract: token,
            function: ReadFunction::BalanceOf,
            args: vec![owner],
        }
    }

    /// `allowance(owner, spender)` on `token`.
    #[must_use]
    pub fn allowance(token: Address, owner: Address, spender: Address) -> Self {
        Self {
            contract: token,
            function: ReadFunction::Allowance,
            args: vec![owner, spender],
        }
    }

    /// Whether this call is parameterized by `owner` as its first argument.
    #[must_use]
    pub fn is_owned_by(&self, owner: Address) -> bool {
        self.args.first() == Some(&owner)
    }
}

impl fmt::Display for ReadCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.contract, self.function)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}

/// A state-changing call that needs a wallet signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCall {
    /// `approve(spender, amount)` on the stablecoin.
    Approve {
        /// Stablecoin contract.
        token: Address,
        /// Contract allowed to pull funds.
        spender: Address,
        /// New allowance, in stablecoin base units.
        amount: U256,
    },
    /// `buyTokens(amount)` on the sale contract.
    BuyTokens {
        /// Sale contract.
        sale: Address,
        /// Quantity scaled to the token's decimals.
        amount: U256,
    },
}

impl WriteCall {
    /// Contract the transaction is sent to.
    #[must_use]
    pub const fn contract(&self) -> Address {
        match self {
            Self::Approve { token, .. } => *token,
            Self::BuyTokens { sale, .. } => *sale,
        }
    }

    /// ABI function name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Approve { .. } => "approve",
            Self::BuyTokens { .. } => "buyTokens",
        }
    }

    /// Amount argument of the call.
    #[must_use]
    pub const fn amount(&self) -> U256 {
        match self {
            Self::Approve { amount, .. } | Self::BuyTokens { amount, .. } => *amount,
        }
    }
}

/// Access to the chain: contract reads and the wallet session.
///
/// Every method is a suspension point; implementations must not block.
/// A client without a wallet session serves reads only and reports
/// `None` from [`account`](Self::account).
#[async_trait]
pub trait ChainClient: Send + Sync + fmt::Debug {
    /// Address of the connected wallet, if any.
    fn account(&self) -> Option<Address>;

    /// Numeric chain ID, if known.
    fn chain_id(&self) -> Option<u64> {
        None
    }

    /// Execute a read-only contract call.
    ///
    /// # Errors
    ///
    /// Returns an error if the RPC call or ABI decoding fails.
    async fn read(&self, call: &ReadCall) -> Result<U256, ChainError>;

    /// Dry-run a write from the connected account without submitting it.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Reverted`] if the call would revert.
    async fn simulate(&self, _call: &WriteCall) -> Result<(), ChainError> {
        Ok(())
    }

    /// Request a signature for `call` and broadcast it.
    ///
    /// # Errors
    ///
    /// Returns an error if no wallet is connected, the wallet refuses to
    /// sign, or the node rejects the transaction.
    async fn submit(&self, call: &WriteCall) -> Result<TxHash, ChainError>;

    /// Wait until `tx` is included in a block.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Reverted`] if the transaction reverted, or a
    /// transaction error if waiting for the receipt failed.
    async fn confirm(&self, tx: TxHash) -> Result<(), ChainError>;
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;

    const SALE: Address = address!("0x1000000000000000000000000000000000000001");
    const USDT: Address = address!("0x2000000000000000000000000000000000000002");
    const USER: Address = address!("0x3000000000000000000000000000000000000003");

    #[test]
    fn read_calls_carry_their_arity() {
        for call in [
            ReadCall::price_per_token(SALE),
            ReadCall::available_tokens(SALE),
            ReadCall::balance_of(USDT, USER),
            ReadCall::allowance(USDT, USER, SALE),
        ] {
            assert_eq!(call.args.len(), call.function.arity());
        }
    }

    #[test]
    fn ownership_is_first_argument() {
        assert!(ReadCall::allowance(USDT, USER, SALE).is_owned_by(USER));
        assert!(!ReadCall::allowance(USDT, USER, SALE).is_owned_by(SALE));
        assert!(!ReadCall::price_per_token(SALE).is_owned_by(USER));
    }

    #[test]
    fn write_call_accessors() {
        let call = WriteCall::BuyTokens {
            sale: SALE,
            amount: U256::from(5),
        };
        assert_eq!(call.contract(), SALE);
        assert_eq!(call.name(), "buyTokens");
        assert_eq!(call.amount(), U256::from(5));
    }
}
