//! Chain state reader.
//!
//! [`ChainStateReader`] owns the freshness of every contract read the
//! storefront shows: unit price and inventory from the sale contract, and the
//! connected user's stablecoin balance, allowance and token balance. Each read
//! is gated by what it needs: sale reads need the sale address, user reads
//! additionally need a wallet session. Disabled reads are never fetched.
//!
//! Reads refresh on start (mount), on a fixed interval, and on
//! [`on_focus`](ChainStateReader::on_focus). A failed read is cached as
//! [`ReadState::Failed`] and retried only by the next refresh.

mod cache;
mod poller;

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use alloy::primitives::{Address, U256};
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub use cache::{ReadCache, ReadState};
pub use poller::Poller;

use crate::chain::{ChainClient, ReadCall};
use crate::config::Contracts;

/// Reads the sale contract serves to everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaleState {
    /// Stablecoin base units per whole token.
    pub unit_price: ReadState,
    /// Tokens left, scaled to token decimals.
    pub available_inventory: ReadState,
}

/// Reads parameterized by the connected account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserState {
    /// Connected wallet, if any.
    pub account: Option<Address>,
    /// Stablecoin balance.
    pub stablecoin_balance: ReadState,
    /// Stablecoin allowance granted to the sale contract.
    pub allowance: ReadState,
    /// Purchased-token balance.
    pub token_balance: ReadState,
}

/// The enabled read calls for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSet {
    /// `PRICE_PER_TOKEN()`.
    pub unit_price: Option<ReadCall>,
    /// `getAvailableTokens()`.
    pub available_inventory: Option<ReadCall>,
    /// Stablecoin `balanceOf(account)`.
    pub stablecoin_balance: Option<ReadCall>,
    /// Stablecoin `allowance(account, sale)`.
    pub allowance: Option<ReadCall>,
    /// Token `balanceOf(account)`.
    pub token_balance: Option<ReadCall>,
}

impl ReadSet {
    /// Build the read set for `contracts` and the connected `account`.
    #[must_use]
    pub fn new(contracts: Contracts, account: Option<Address>) -> Self {
        let Contracts {
            sale,
            stablecoin,
            token,
        } = contracts;
        Self {
            unit_price: sale.map(ReadCall::price_per_token),
            available_inventory: sale.map(ReadCall::available_tokens),
            stablecoin_balance: stablecoin
                .zip(account)
                .map(|(usd, owner)| ReadCall::balance_of(usd, owner)),
            allowance: match (stablecoin, sale, account) {
                (Some(usd), Some(sale), Some(owner)) => {
                    Some(ReadCall::allowance(usd, owner, sale))
                }
                _ => None,
            },
            token_balance: token
                .zip(account)
                .map(|(token, owner)| ReadCall::balance_of(token, owner)),
        }
    }

    /// Every enabled call.
    pub fn enabled(&self) -> impl Iterator<Item = &ReadCall> {
        [
            &self.unit_price,
            &self.available_inventory,
            &self.stablecoin_balance,
            &self.allowance,
            &self.token_balance,
        ]
        .into_iter()
        .flatten()
    }
}

/// Fetches and caches contract reads, refreshing them in the background.
#[derive(Debug)]
pub struct ChainStateReader {
    client: Arc<dyn ChainClient>,
    contracts: Contracts,
    refresh_interval: Duration,
    cache: Arc<ReadCache>,
    poller: Poller,
    revision: watch::Sender<u64>,
    last_account: Mutex<Option<Address>>,
}

impl ChainStateReader {
    /// Create a reader; nothing is fetched until [`refresh`](Self::refresh)
    /// or [`start`](Self::start).
    #[must_use]
    pub fn new(client: Arc<dyn ChainClient>, contracts: Contracts, refresh_interval: Duration) -> Self {
        Self {
            client,
            contracts,
            refresh_interval,
            cache: Arc::new(ReadCache::new()),
            poller: Poller::new(),
            revision: watch::channel(0).0,
            last_account: Mutex::new(None),
        }
    }

    /// The shared read cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<ReadCache> {
        &self.cache
    }

    /// Connected account as reported by the client.
    #[must_use]
    pub fn account(&self) -> Option<Address> {
        self.client.account()
    }

    /// Reads enabled for the current session.
    #[must_use]
    pub fn read_set(&self) -> ReadSet {
        ReadSet::new(self.contracts, self.client.account())
    }

    /// Subscribe to refresh notifications; the value increases after every
    /// batch of fetches lands in the cache.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Fetch every enabled read concurrently.
    pub async fn refresh(&self) {
        self.track_account().await;
        let calls: Vec<ReadCall> = self.read_set().enabled().cloned().collect();
        self.fetch(calls).await;
    }

    /// Fetch `calls` regardless of staleness.
    pub async fn refetch(&self, calls: Vec<ReadCall>) {
        self.fetch(calls).await;
    }

    /// Fetch every read currently marked stale.
    pub async fn refetch_stale(&self) {
        let stale = self.cache.stale_keys().await;
        self.fetch(stale).await;
    }

    /// Refresh on window focus regain.
    pub async fn on_focus(&self) {
        debug!("focus regained, refreshing reads");
        self.refresh().await;
    }

    /// Start periodic refresh. The first refresh runs immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let reader: Weak<Self> = Arc::downgrade(self);
        info!(interval = ?self.refresh_interval, "starting chain state refresh");
        self.poller.start(self.refresh_interval, move || {
            let reader = reader.clone();
            async move {
                match reader.upgrade() {
                    Some(reader) => {
                        reader.refresh().await;
                        true
                    }
                    None => false,
                }
            }
        });
    }

    /// Stop periodic refresh.
    pub fn stop(&self) {
        self.poller.stop();
    }

    /// Current sale reads.
    pub async fn sale_state(&self) -> SaleState {
        let set = self.read_set();
        SaleState {
            unit_price: self.state_of(set.unit_price.as_ref()).await,
            available_inventory: self.state_of(set.available_inventory.as_ref()).await,
        }
    }

    /// Current reads for the connected account.
    pub async fn user_state(&self) -> UserState {
        let set = self.read_set();
        UserState {
            account: self.client.account(),
            stablecoin_balance: self.state_of(set.stablecoin_balance.as_ref()).await,
            allowance: self.state_of(set.allowance.as_ref()).await,
            token_balance: self.state_of(set.token_balance.as_ref()).await,
        }
    }

    /// Cached value of `call`, if loaded.
    pub async fn value(&self, call: &ReadCall) -> Option<U256> {
        self.cache.get(call).await.value()
    }

    async fn state_of(&self, call: Option<&ReadCall>) -> ReadState {
        match call {
            Some(call) => self.cache.get(call).await,
            None => ReadState::Disabled,
        }
    }

    async fn fetch(&self, calls: Vec<ReadCall>) {
        if calls.is_empty() {
            return;
        }

        let generations = self.cache.generations(&calls).await;
        let results = join_all(calls.iter().map(|call| self.client.read(call))).await;
        let mut changed = 0usize;
        for ((call, generation), result) in calls.into_iter().zip(generations).zip(results) {
            if let Err(e) = &result {
                warn!(%call, error = %e, "contract read failed");
            }
            if self.cache.store_at(call, generation, result).await {
                changed += 1;
            }
        }

        debug!(changed, "reads refreshed");
        self.revision.send_modify(|rev| *rev += 1);
    }

    /// Drop the previous account's reads when the session changes.
    async fn track_account(&self) {
        let current = self.client.account();
        let previous = {
            let mut last = self
                .last_account
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *last, current)
        };

        if previous != current {
            info!(?previous, ?current, "wallet session changed");
            if let Some(previous) = previous {
                self.cache.forget_owner(previous).await;
            }
        }
    }
}
