//! Shared cache of contract reads.

use std::collections::HashMap;

use alloy::primitives::{Address, U256};
use tokio::sync::RwLock;
use tracing::debug;

use crate::chain::{ChainError, ReadCall, ReadFunction};

/// Observable state of one read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReadState {
    /// The read's enabling predicate is false (e.g. no wallet).
    Disabled,
    /// No value has arrived yet.
    #[default]
    Loading,
    /// The last fetch failed; the message is shown verbatim.
    Failed(String),
    /// A value is available.
    Ready(U256),
}

impl ReadState {
    /// The loaded value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<U256> {
        match self {
            Self::Ready(v) => Some(*v),
            _ => None,
        }
    }

    /// Whether the read is still waiting for its first value.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// The failure message, if the last fetch failed.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Entry {
    state: ReadState,
    stale: bool,
    invalidations: usize,
    generation: u64,
}

/// Read results keyed by (contract, function, arguments).
///
/// A stale entry keeps serving its last value until the refetch lands.
/// Every invalidation bumps the entry's generation; a result fetched under an
/// older generation is discarded by [`store_at`](Self::store_at), so a slow
/// fetch issued before the invalidation cannot overwrite the refetch.
#[derive(Debug, Default)]
pub struct ReadCache {
    entries: RwLock<HashMap<ReadCall, Entry>>,
}

impl ReadCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `call`; [`ReadState::Loading`] if never fetched.
    pub async fn get(&self, call: &ReadCall) -> ReadState {
        self.entries
            .read()
            .await
            .get(call)
            .map(|entry| entry.state.clone())
            .unwrap_or_default()
    }

    /// Record a fetch result and clear the stale mark.
    ///
    /// Returns `true` if the observable state changed.
    pub async fn store(&self, call: ReadCall, result: Result<U256, ChainError>) -> bool {
        let mut entries = self.entries.write().await;
        Self::apply(entries.entry(call).or_default(), result)
    }

    /// Generation of each of `calls`, to be passed back to
    /// [`store_at`](Self::store_at) with the fetch results.
    pub async fn generations(&self, calls: &[ReadCall]) -> Vec<u64> {
        let entries = self.entries.read().await;
        calls
            .iter()
            .map(|call| entries.get(call).map_or(0, |entry| entry.generation))
            .collect()
    }

    /// Record a result fetched at `generation`.
    ///
    /// The result is dropped if `call` was invalidated after the fetch was
    /// issued. Returns `true` if the observable state changed.
    pub async fn store_at(
        &self,
        call: ReadCall,
        generation: u64,
        result: Result<U256, ChainError>,
    ) -> bool {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(call).or_default();
        if entry.generation != generation {
            debug!(generation, current = entry.generation, "dropping superseded read");
            return false;
        }
        Self::apply(entry, result)
    }

    fn apply(entry: &mut Entry, result: Result<U256, ChainError>) -> bool {
        let state = match result {
            Ok(value) => ReadState::Ready(value),
            Err(e) => ReadState::Failed(e.to_string()),
        };
        entry.stale = false;
        if entry.state == state {
            return false;
        }
        entry.state = state;
        true
    }

    /// Mark every cached `function` read on `contract` as stale.
    ///
    /// With `owner` set, only reads whose first argument is `owner` match;
    /// the same function queried for another address is left alone.
    /// Returns the keys that were marked.
    pub async fn invalidate(
        &self,
        contract: Address,
        function: ReadFunction,
        owner: Option<Address>,
    ) -> Vec<ReadCall> {
        let mut entries = self.entries.write().await;
        let mut marked = Vec::new();
        for (call, entry) in entries.iter_mut() {
            if call.contract != contract || call.function != function {
                continue;
            }
            if owner.is_some_and(|owner| !call.is_owned_by(owner)) {
                continue;
            }
            entry.stale = true;
            entry.invalidations += 1;
            entry.generation += 1;
            marked.push(call.clone());
        }
        marked
    }

    /// Keys currently marked stale.
    pub async fn stale_keys(&self) -> Vec<ReadCall> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.stale)
            .map(|(call, _)| call.clone())
            .collect()
    }

    /// Whether `call` is waiting for a refetch.
    pub async fn is_stale(&self, call: &ReadCall) -> bool {
        self.entries
            .read()
            .await
            .get(call)
            .is_some_and(|entry| entry.stale)
    }

    /// How many times `call` has been invalidated.
    pub async fn invalidation_count(&self, call: &ReadCall) -> usize {
        self.entries
            .read()
            .await
            .get(call)
            .map_or(0, |entry| entry.invalidations)
    }

    /// Drop every entry parameterized by `owner`.
    pub async fn forget_owner(&self, owner: Address) {
        self.entries
            .write()
            .await
            .retain(|call, _| !call.is_owned_by(owner));
    }

    /// Number of cached reads.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
