//! In-memory chain for testing.
//!
//! [`MockChain`] serves scripted contract reads, records every submission and
//! confirmation in order, and applies the effects of confirmed approvals and
//! purchases to its own read values, so a full approve → purchase flow can be
//! exercised without a node.
//!
//! # Example
//!
//! ```rust,ignore
//! use tokensale::chain::{MockChain, ReadCall};
//!
//! let chain = MockChain::new(Some(user)).with_sale(sale, usdt, token, 18);
//! chain.set_read(ReadCall::price_per_token(sale), price);
//! chain.fail_next_submit("User rejected the request.");
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use tokio::sync::{Semaphore, watch};

use super::{ChainClient, ChainError, ReadCall, TxHash, WriteCall};

/// One entry of the mock's transaction journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// A write was signed and broadcast.
    Submitted {
        /// The submitted call.
        call: WriteCall,
        /// Hash assigned to it.
        tx: TxHash,
    },
    /// A transaction was included successfully.
    Confirmed {
        /// Hash of the included transaction.
        tx: TxHash,
    },
}

#[derive(Debug, Clone, Copy)]
struct SaleContracts {
    sale: Address,
    stablecoin: Address,
    token: Address,
    token_decimals: u8,
}

#[derive(Debug, Default)]
struct MockState {
    account: Option<Address>,
    chain_id: Option<u64>,
    sale: Option<SaleContracts>,
    reads: HashMap<ReadCall, U256>,
    read_failures: HashMap<ReadCall, String>,
    read_counts: HashMap<ReadCall, usize>,
    submit_failures: VecDeque<String>,
    simulation_failures: VecDeque<String>,
    confirm_failures: VecDeque<String>,
    pending: HashMap<TxHash, WriteCall>,
    journal: Vec<MockEvent>,
    next_tx: u64,
}

/// A scripted, in-memory [`ChainClient`].
#[derive(Debug)]
pub struct MockChain {
    state: Mutex<MockState>,
    hold_confirmations: AtomicBool,
    confirmation_permits: Semaphore,
    submissions: watch::Sender<usize>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MockChain {
    /// Create a mock chain with an optional connected account.
    #[must_use]
    pub fn new(account: Option<Address>) -> Self {
        Self {
            state: Mutex::new(MockState {
                account,
                ..MockState::default()
            }),
            hold_confirmations: AtomicBool::new(false),
            confirmation_permits: Semaphore::new(0),
            submissions: watch::channel(0).0,
        }
    }

    /// Register the sale contracts so confirmed writes update reads.
    #[must_use]
    pub fn with_sale(
        self,
        sale: Address,
        stablecoin: Address,
        token: Address,
        token_decimals: u8,
    ) -> Self {
        self.lock().sale = Some(SaleContracts {
            sale,
            stablecoin,
            token,
            token_decimals,
        });
        self
    }

    /// Report `chain_id` from [`ChainClient::chain_id`].
    #[must_use]
    pub fn with_chain_id(self, chain_id: u64) -> Self {
        self.lock().chain_id = Some(chain_id);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect or disconnect the wallet session.
    pub fn set_account(&self, account: Option<Address>) {
        self.lock().account = account;
    }

    /// Set the value returned for `call`, clearing any scripted failure.
    pub fn set_read(&self, call: ReadCall, value: U256) {
        let mut state = self.lock();
        state.read_failures.remove(&call);
        state.reads.insert(call, value);
    }

    /// Make every read of `call` fail with `message`.
    pub fn fail_read(&self, call: ReadCall, message: impl Into<String>) {
        self.lock().read_failures.insert(call, message.into());
    }

    /// Current value stored for `call`.
    #[must_use]
    pub fn read_value(&self, call: &ReadCall) -> Option<U256> {
        self.lock().reads.get(call).copied()
    }

    /// How many times `call` has been read.
    #[must_use]
    pub fn read_count(&self, call: &ReadCall) -> usize {
        self.lock().read_counts.get(call).copied().unwrap_or(0)
    }

    /// Fail the next submission with `message` (e.g. a wallet rejection).
    pub fn fail_next_submit(&self, message: impl Into<String>) {
        self.lock().submit_failures.push_back(message.into());
    }

    /// Fail the next simulation with `message`.
    pub fn fail_next_simulation(&self, message: impl Into<String>) {
        self.lock().simulation_failures.push_back(message.into());
    }

    /// Fail the next confirmation with `message` (e.g. an on-chain revert).
    pub fn fail_next_confirm(&self, message: impl Into<String>) {
        self.lock().confirm_failures.push_back(message.into());
    }

    /// Hold every confirmation until released with [`release_confirmations`](Self::release_confirmations).
    pub fn hold_confirmations(&self) {
        self.hold_confirmations.store(true, Ordering::SeqCst);
    }

    /// Let `n` held confirmations proceed.
    pub fn release_confirmations(&self, n: usize) {
        self.confirmation_permits.add_permits(n);
    }

    /// Wait until at least `n` transactions have been submitted.
    pub async fn wait_for_submissions(&self, n: usize) {
        let mut rx = self.submissions.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    /// Every submitted call, in submission order.
    #[must_use]
    pub fn submissions(&self) -> Vec<WriteCall> {
        self.lock()
            .journal
            .iter()
            .filter_map(|event| match event {
                MockEvent::Submitted { call, .. } => Some(*call),
                MockEvent::Confirmed { .. } => None,
            })
            .collect()
    }

    /// The full submission/confirmation journal, in order.
    #[must_use]
    pub fn journal(&self) -> Vec<MockEvent> {
        self.lock().journal.clone()
    }

    fn apply_effects(state: &mut MockState, call: WriteCall) {
        let (Some(owner), Some(sale)) = (state.account, state.sale) else {
            return;
        };

        match call {
            WriteCall::Approve {
                token,
                spender,
                amount,
            } => {
                state
                    .reads
                    .insert(ReadCall::allowance(token, owner, spender), amount);
            }
            WriteCall::BuyTokens { amount, .. } => {
                let one = U256::from(10u64).pow(U256::from(sale.token_decimals));
                let price = state
                    .reads
                    .get(&ReadCall::price_per_token(sale.sale))
                    .copied()
                    .unwrap_or_default();
                let cost = amount.saturating_mul(price) / one;

                let mut adjust = |call: ReadCall, f: &dyn Fn(U256) -> U256| {
                    let current = state.reads.get(&call).copied().unwrap_or_default();
                    state.reads.insert(call, f(current));
                };
                adjust(ReadCall::balance_of(sale.stablecoin, owner), &|v| {
                    v.saturating_sub(cost)
                });
                adjust(
                    ReadCall::allowance(sale.stablecoin, owner, sale.sale),
                    &|v| v.saturating_sub(cost),
                );
                adjust(ReadCall::available_tokens(sale.sale), &|v| {
                    v.saturating_sub(amount)
                });
                adjust(ReadCall::balance_of(sale.token, owner), &|v| {
                    v.saturating_add(amount)
                });
            }
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn account(&self) -> Option<Address> {
        self.lock().account
    }

    fn chain_id(&self) -> Option<u64> {
        self.lock().chain_id
    }

    async fn read(&self, call: &ReadCall) -> Result<U256, ChainError> {
        let mut state = self.lock();
        *state.read_counts.entry(call.clone()).or_default() += 1;

        if let Some(message) = state.read_failures.get(call) {
            return Err(ChainError::provider(message.clone()));
        }
        state
            .reads
            .get(call)
            .copied()
            .ok_or_else(|| ChainError::decode(format!("{call} returned no data")))
    }

    async fn simulate(&self, call: &WriteCall) -> Result<(), ChainError> {
        match self.lock().simulation_failures.pop_front() {
            Some(message) => Err(ChainError::simulation(call.name(), message)),
            None => Ok(()),
        }
    }

    async fn submit(&self, call: &WriteCall) -> Result<TxHash, ChainError> {
        let tx = {
            let mut state = self.lock();
            if state.account.is_none() {
                return Err(ChainError::NotConnected);
            }
            if let Some(message) = state.submit_failures.pop_front() {
                return Err(ChainError::signing(message));
            }

            state.next_tx += 1;
            let tx = B256::from(U256::from(state.next_tx));
            state.pending.insert(tx, *call);
            state.journal.push(MockEvent::Submitted { call: *call, tx });
            tx
        };

        self.submissions.send_modify(|count| *count += 1);
        Ok(tx)
    }

    async fn confirm(&self, tx: TxHash) -> Result<(), ChainError> {
        if self.hold_confirmations.load(Ordering::SeqCst) {
            let permit = self
                .confirmation_permits
                .acquire()
                .await
                .map_err(|e| ChainError::transaction(e.to_string()))?;
            permit.forget();
        }

        let mut state = self.lock();
        let call = state
            .pending
            .remove(&tx)
            .ok_or_else(|| ChainError::transaction(format!("unknown transaction {tx:#x}")))?;

        if let Some(message) = state.confirm_failures.pop_front() {
            return Err(ChainError::reverted(message));
        }

        Self::apply_effects(&mut state, call);
        state.journal.push(MockEvent::Confirmed { tx });
        Ok(())
    }
}
