//! Known EVM networks and their block explorers.

use std::fmt;

use alloy::primitives::{Address, B256};

/// Known EVM-compatible chains with their chain IDs and human-readable names.
///
/// # Examples
///
/// ```rust
/// use tokensale::chain::EvmChain;
///
/// let chain = EvmChain::from_id(137);
/// assert_eq!(chain.name(), "polygon");
/// assert_eq!(chain.explorer_domain(), Some("polygonscan.com"));
///
/// // Local dev nodes have no explorer.
/// let chain = EvmChain::from_id(31_337);
/// assert_eq!(chain.name(), "evm-31337");
/// assert!(chain.explorer_domain().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EvmChain {
    /// Ethereum Mainnet (chain ID: 1).
    Ethereum,
    /// Sepolia Testnet (chain ID: 11155111).
    Sepolia,
    /// Goerli Testnet (chain ID: 5).
    Goerli,
    /// Optimism (chain ID: 10).
    Optimism,
    /// BNB Smart Chain (chain ID: 56).
    Bsc,
    /// Polygon `PoS` (chain ID: 137).
    Polygon,
    /// Base (chain ID: 8453).
    Base,
    /// Arbitrum One (chain ID: 42161).
    Arbitrum,
    /// Avalanche C-Chain (chain ID: 43114).
    Avalanche,
    /// Custom chain with user-specified ID and name.
    Custom {
        /// Numeric chain ID.
        id: u64,
        /// Human-readable chain name.
        name: String,
    },
}

impl EvmChain {
    /// Get the numeric chain ID.
    #[must_use]
    pub const fn id(&self) -> u64 {
        match self {
            Self::Ethereum => 1,
            Self::Sepolia => 11_155_111,
            Self::Goerli => 5,
            Self::Optimism => 10,
            Self::Bsc => 56,
            Self::Polygon => 137,
            Self::Base => 8453,
            Self::Arbitrum => 42_161,
            Self::Avalanche => 43_114,
            Self::Custom { id, .. } => *id,
        }
    }

    /// Get the human-readable chain name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Sepolia => "sepolia",
            Self::Goerli => "goerli",
            Self::Optimism => "optimism",
            Self::Bsc => "bsc",
            Self::Polygon => "polygon",
            Self::Base => "base",
            Self::Arbitrum => "arbitrum",
            Self::Avalanche => "avalanche",
            Self::Custom { name, .. } => name,
        }
    }

    /// Infer an [`EvmChain`] from a numeric chain ID.
    ///
    /// Unknown chain IDs produce [`EvmChain::Custom`] with a generic name.
    #[must_use]
    pub fn from_id(id: u64) -> Self {
        match id {
            1 => Self::Ethereum,
            5 => Self::Goerli,
            10 => Self::Optimism,
            56 => Self::Bsc,
            137 => Self::Polygon,
            8453 => Self::Base,
            42_161 => Self::Arbitrum,
            43_114 => Self::Avalanche,
            11_155_111 => Self::Sepolia,
            _ => Self::Custom {
                id,
                name: format!("evm-{id}"),
            },
        }
    }

    /// Block explorer domain, if the chain has a supported one.
    #[must_use]
    pub const fn explorer_domain(&self) -> Option<&'static str> {
        match self {
            Self::Ethereum => Some("etherscan.io"),
            Self::Sepolia => Some("sepolia.etherscan.io"),
            Self::Goerli => Some("goerli.etherscan.io"),
            Self::Optimism => Some("optimistic.etherscan.io"),
            Self::Bsc => Some("bscscan.com"),
            Self::Polygon => Some("polygonscan.com"),
            Self::Arbitrum => Some("arbiscan.io"),
            Self::Avalanche => Some("snowtrace.io"),
            Self::Base | Self::Custom { .. } => None,
        }
    }

    /// Explorer URL for a transaction, or `None` without an explorer.
    #[must_use]
    pub fn tx_url(&self, tx: B256) -> Option<String> {
        self.explorer_domain()
            .map(|domain| format!("https://{domain}/tx/{tx:#x}"))
    }

    /// Explorer URL for an address, or `None` without an explorer.
    #[must_use]
    pub fn address_url(&self, address: Address) -> Option<String> {
        self.explorer_domain()
            .map(|domain| format!("https://{domain}/address/{}", address.to_checksum(None)))
    }
}

impl fmt::Display for EvmChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, b256};

    use super::*;

    #[test]
    fn from_id_round_trips_known_chains() {
        for chain in [
            EvmChain::Ethereum,
            EvmChain::Sepolia,
            EvmChain::Goerli,
            EvmChain::Polygon,
            EvmChain::Arbitrum,
        ] {
            assert_eq!(EvmChain::from_id(chain.id()), chain);
        }
    }

    #[test]
    fn mainnet_tx_url() {
        let tx = b256!("0x00000000000000000000000000000000000000000000000000000000000000ab");
        assert_eq!(
            EvmChain::Ethereum.tx_url(tx).as_deref(),
            Some("https://etherscan.io/tx/0x00000000000000000000000000000000000000000000000000000000000000ab")
        );
    }

    #[test]
    fn address_url_is_checksummed() {
        let addr = address!("0xdac17f958d2ee523a2206206994597c13d831ec7");
        assert_eq!(
            EvmChain::Sepolia.address_url(addr).as_deref(),
            Some("https://sepolia.etherscan.io/address/0xdAC17F958D2ee523a2206206994597C13D831ec7")
        );
    }

    #[test]
    fn local_chain_has_no_links() {
        let chain = EvmChain::from_id(31_337);
        assert!(chain.tx_url(B256::ZERO).is_none());
        assert!(chain.address_url(Address::ZERO).is_none());
        assert_eq!(chain.to_string(), "evm-31337 (31337)");
    }
}
