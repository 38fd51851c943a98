//! Post-purchase cache invalidation.
//!
//! A confirmed purchase moves stablecoin out of the buyer's wallet, tokens
//! out of the sale contract and tokens into the buyer's wallet. The three
//! cached reads that show those amounts are marked stale and refetched;
//! nothing else in the cache is touched.

use alloy::primitives::Address;
use tracing::{debug, info};

use crate::chain::{ReadCall, ReadFunction};
use crate::config::Contracts;
use crate::reader::{ChainStateReader, ReadCache};

/// One (contract, function) pair to invalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// Contract address.
    pub contract: Address,
    /// Read function on that contract.
    pub function: ReadFunction,
}

/// Invalidates the reads a purchase makes stale.
#[derive(Debug, Clone, Default)]
pub struct CacheInvalidator {
    targets: Vec<Target>,
}

impl CacheInvalidator {
    /// Targets for a purchase: the stablecoin balance, the sale inventory and
    /// the purchased-token balance. Unconfigured contracts are skipped.
    #[must_use]
    pub fn for_purchase(contracts: Contracts) -> Self {
        let targets = [
            (contracts.stablecoin, ReadFunction::BalanceOf),
            (contracts.sale, ReadFunction::AvailableTokens),
            (contracts.token, ReadFunction::BalanceOf),
        ]
        .into_iter()
        .filter_map(|(contract, function)| contract.map(|contract| Target { contract, function }))
        .collect();
        Self { targets }
    }

    /// The configured targets.
    #[must_use]
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Mark matching cache entries stale.
    ///
    /// Reads that take an owner argument only match `owner`'s entries.
    pub async fn mark(&self, cache: &ReadCache, owner: Option<Address>) -> Vec<ReadCall> {
        let mut marked = Vec::new();
        for target in &self.targets {
            let owner = (target.function.arity() > 0).then_some(owner).flatten();
            marked.extend(cache.invalidate(target.contract, target.function, owner).await);
        }
        marked
    }

    /// Mark the targets stale for the reader's account and refetch them.
    ///
    /// Returns the invalidated reads.
    pub async fn run(&self, reader: &ChainStateReader) -> Vec<ReadCall> {
        let marked = self.mark(reader.cache(), reader.account()).await;
        debug!(count = marked.len(), "reads invalidated after purchase");
        reader.refetch(marked.clone()).await;
        info!(count = marked.len(), "post-purchase reads refreshed");
        marked
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use alloy::primitives::{U256, address};

    use super::*;
    use crate::chain::MockChain;

    const SALE: Address = address!("0x1000000000000000000000000000000000000001");
    const USDT: Address = address!("0x2000000000000000000000000000000000000002");
    const USER: Address = address!("0x3000000000000000000000000000000000000003");
    const TOKEN: Address = address!("0x4000000000000000000000000000000000000004");
    const OTHER: Address = address!("0x5000000000000000000000000000000000000005");

    fn contracts() -> Contracts {
        Contracts {
            sale: Some(SALE),
            stablecoin: Some(USDT),
            token: Some(TOKEN),
        }
    }

    #[test]
    fn unconfigured_token_is_skipped() {
        let invalidator = CacheInvalidator::for_purchase(Contracts {
            token: None,
            ..contracts()
        });
        assert_eq!(invalidator.targets().len(), 2);
    }

    #[tokio::test]
    async fn marks_each_dependent_read_once() {
        let cache = ReadCache::new();
        let dependent = [
            ReadCall::balance_of(USDT, USER),
            ReadCall::available_tokens(SALE),
            ReadCall::balance_of(TOKEN, USER),
        ];
        let unrelated = [
            ReadCall::balance_of(USDT, OTHER),
            ReadCall::price_per_token(SALE),
            ReadCall::allowance(USDT, USER, SALE),
        ];
        for call in dependent.iter().chain(&unrelated) {
            cache.store(call.clone(), Ok(U256::from(1))).await;
        }

        let marked = CacheInvalidator::for_purchase(contracts())
            .mark(&cache, Some(USER))
            .await;

        assert_eq!(marked.len(), 3);
        for call in &dependent {
            assert_eq!(cache.invalidation_count(call).await, 1, "{call}");
        }
        for call in &unrelated {
            assert_eq!(cache.invalidation_count(call).await, 0, "{call}");
        }
    }

    #[tokio::test]
    async fn run_refetches_only_marked_reads() {
        let chain = Arc::new(MockChain::new(Some(USER)));
        for call in [
            ReadCall::price_per_token(SALE),
            ReadCall::available_tokens(SALE),
            ReadCall::balance_of(USDT, USER),
            ReadCall::allowance(USDT, USER, SALE),
            ReadCall::balance_of(TOKEN, USER),
        ] {
            chain.set_read(call, U256::from(10));
        }
        let reader = ChainStateReader::new(chain.clone(), contracts(), Duration::from_secs(10));
        reader.refresh().await;

        chain.set_read(ReadCall::available_tokens(SALE), U256::from(4));
        let marked = CacheInvalidator::for_purchase(contracts()).run(&reader).await;

        assert_eq!(marked.len(), 3);
        assert_eq!(
            reader.value(&ReadCall::available_tokens(SALE)).await,
            Some(U256::from(4))
        );
        assert_eq!(chain.read_count(&ReadCall::price_per_token(SALE)), 1);
        assert_eq!(chain.read_count(&ReadCall::allowance(USDT, USER, SALE)), 1);
        assert!(reader.cache().stale_keys().await.is_empty());
    }
}
