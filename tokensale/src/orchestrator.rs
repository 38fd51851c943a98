//! Purchase orchestration.
//!
//! [`PurchaseOrchestrator`] composes the reader, the pure quote helpers, the
//! sequencer and the invalidator into what a front end consumes: a
//! [`PurchaseStatus`] snapshot and the `approve` / `purchase` /
//! `handle_purchase` actions.
//!
//! The status is never edited field by field. [`PurchaseStatus::derive`]
//! rebuilds it from the current reads, quantity, phase and error slot, and
//! the orchestrator republishes it whenever any of those change.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use alloy::primitives::U256;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, TxHash};
use crate::classify::{Failure, FailureKind, MissingConfig, Precondition};
use crate::config::{Contracts, SaleConfig};
use crate::invalidate::CacheInvalidator;
use crate::progress::SaleProgress;
use crate::quote::{self, format_amount, scale_quantity, unit};
use crate::reader::{ChainStateReader, SaleState, UserState};
use crate::sequencer::{Phase, StepError, TransactionSequencer, TxHistory, TxKind};

/// Derived validation flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Validation {
    /// A wallet session is present.
    pub is_connected: bool,
    /// Balance covers the total cost (both known).
    pub has_balance: bool,
    /// Inventory is known and the quantity is positive.
    pub has_inventory: bool,
    /// Quantity is positive.
    pub quantity_valid: bool,
    /// The approve action is available.
    pub can_approve: bool,
    /// The purchase action is available.
    pub can_purchase: bool,
}

/// Everything a [`PurchaseStatus`] is derived from.
#[derive(Debug, Clone, Copy)]
pub struct StatusInputs<'a> {
    /// Desired whole-token quantity.
    pub quantity: u64,
    /// Sale configuration.
    pub config: &'a SaleConfig,
    /// Sale reads.
    pub sale: &'a SaleState,
    /// Account reads.
    pub user: &'a UserState,
    /// Transaction phase.
    pub phase: &'a Phase,
    /// Error slot.
    pub error: Option<&'a Failure>,
    /// Recent transaction hashes.
    pub history: TxHistory,
}

/// Snapshot exposed to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurchaseStatus {
    /// Desired whole-token quantity.
    pub quantity: u64,
    /// Some enabled read has not produced its first value, or a
    /// transaction is in flight.
    pub is_loading: bool,
    /// A transaction is in flight.
    pub is_processing: bool,
    /// An approval step is in flight.
    pub is_approving: bool,
    /// The purchase is in flight.
    pub is_buying: bool,
    /// The allowance does not cover the cost.
    pub needs_approval: bool,
    /// The approval will be preceded by a reset to zero.
    pub needs_allowance_reset: bool,
    /// Error slot.
    pub error: Option<Failure>,
    /// First failed read, shown verbatim.
    pub read_error: Option<String>,
    /// Validation flags.
    pub validation: Validation,
    /// Stablecoin base units per whole token.
    pub price_per_token: Option<U256>,
    /// Total cost of the quantity.
    pub total_cost: Option<U256>,
    /// Stablecoin balance.
    pub stablecoin_balance: Option<U256>,
    /// Allowance granted to the sale contract.
    pub allowance: Option<U256>,
    /// Tokens left, scaled.
    pub available_inventory: Option<U256>,
    /// Purchased-token balance, scaled.
    pub token_balance: Option<U256>,
    /// Transaction phase.
    pub phase: Phase,
    /// The last purchase was confirmed.
    pub is_success: bool,
    /// Last approval transaction.
    pub approval_tx: Option<TxHash>,
    /// Last purchase transaction.
    pub purchase_tx: Option<TxHash>,
    /// Sale progress, once inventory is known.
    pub progress: Option<SaleProgress>,
    /// Inventory is loaded and exhausted.
    pub is_closed: bool,
    /// Stablecoin decimals, for formatting.
    pub stablecoin_decimals: u8,
    /// Token decimals, for formatting.
    pub token_decimals: u8,
}

impl PurchaseStatus {
    /// Derive the snapshot from its inputs.
    #[must_use]
    pub fn derive(inputs: &StatusInputs<'_>) -> Self {
        let StatusInputs {
            quantity,
            config,
            sale,
            user,
            phase,
            error,
            history,
        } = *inputs;

        let price_per_token = sale.unit_price.value();
        let available_inventory = sale.available_inventory.value();
        let stablecoin_balance = user.stablecoin_balance.value();
        let allowance = user.allowance.value();

        let total_cost = quote::compute_total_cost(quantity, price_per_token, config.token_decimals);
        let needs_approval = quote::needs_approval(allowance, total_cost);
        let needs_allowance_reset =
            needs_approval && allowance.is_some_and(quote::needs_allowance_reset);

        let in_flight = phase.is_in_flight();
        let is_connected = user.account.is_some();
        let has_balance = matches!(
            (stablecoin_balance, total_cost),
            (Some(balance), Some(cost)) if balance >= cost
        );
        let quantity_valid = quantity > 0;
        let has_inventory = available_inventory.is_some() && quantity_valid;
        let can_approve = is_connected && has_balance && quantity_valid && !in_flight;
        let can_purchase = can_approve && has_inventory && !needs_approval;

        let reads = [
            &sale.unit_price,
            &sale.available_inventory,
            &user.stablecoin_balance,
            &user.allowance,
            &user.token_balance,
        ];

        Self {
            quantity,
            is_loading: in_flight || reads.iter().any(|r| r.is_loading()),
            is_processing: in_flight,
            is_approving: phase.is_approving(),
            is_buying: phase.is_buying(),
            needs_approval,
            needs_allowance_reset,
            error: error.cloned(),
            read_error: reads.iter().find_map(|r| r.error()).map(str::to_string),
            validation: Validation {
                is_connected,
                has_balance,
                has_inventory,
                quantity_valid,
                can_approve,
                can_purchase,
            },
            price_per_token,
            total_cost,
            stablecoin_balance,
            allowance,
            available_inventory,
            token_balance: user.token_balance.value(),
            phase: phase.clone(),
            is_success: matches!(phase, Phase::Succeeded { .. }),
            approval_tx: history.approval,
            purchase_tx: history.purchase,
            progress: available_inventory.map(|available| {
                SaleProgress::new(config.initial_supply, available, config.token_decimals)
            }),
            is_closed: available_inventory.is_some_and(|v| v.is_zero()),
            stablecoin_decimals: config.stablecoin_decimals,
            token_decimals: config.token_decimals,
        }
    }

    /// Message in the error slot.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(Failure::message)
    }

    /// Unit price in stablecoin units.
    #[must_use]
    pub fn formatted_price(&self) -> Option<String> {
        self.price_per_token
            .map(|v| format_amount(v, self.stablecoin_decimals))
    }

    /// Total cost in stablecoin units.
    #[must_use]
    pub fn formatted_total_cost(&self) -> Option<String> {
        self.total_cost
            .map(|v| format_amount(v, self.stablecoin_decimals))
    }

    /// Stablecoin balance in stablecoin units.
    #[must_use]
    pub fn formatted_balance(&self) -> Option<String> {
        self.stablecoin_balance
            .map(|v| format_amount(v, self.stablecoin_decimals))
    }

    /// Remaining inventory in whole tokens.
    #[must_use]
    pub fn formatted_inventory(&self) -> Option<String> {
        self.available_inventory
            .map(|v| format_amount(v, self.token_decimals))
    }
}

/// Result of an orchestrator action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The allowance now covers the cost.
    Approved {
        /// Final approval transaction.
        tx: TxHash,
    },
    /// The purchase was confirmed.
    Purchased {
        /// Purchase transaction.
        tx: TxHash,
    },
    /// A transaction was already in flight; nothing was submitted.
    Busy,
    /// A pre-check failed; the chain was not touched.
    Blocked(Failure),
    /// A transaction step failed.
    Failed(Failure),
}

impl Outcome {
    /// The failure, for blocked or failed outcomes.
    #[must_use]
    pub const fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Blocked(f) | Self::Failed(f) => Some(f),
            _ => None,
        }
    }

    /// The transaction, for successful outcomes.
    #[must_use]
    pub const fn tx(&self) -> Option<TxHash> {
        match self {
            Self::Approved { tx } | Self::Purchased { tx } => Some(*tx),
            _ => None,
        }
    }
}

/// The purchase flow behind a storefront.
#[derive(Debug)]
pub struct PurchaseOrchestrator {
    config: SaleConfig,
    contracts: Contracts,
    reader: Arc<ChainStateReader>,
    sequencer: TransactionSequencer,
    invalidator: CacheInvalidator,
    quantity: AtomicU64,
    error: Mutex<Option<Failure>>,
    status: watch::Sender<PurchaseStatus>,
    publish: tokio::sync::Mutex<()>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl PurchaseOrchestrator {
    /// Create an orchestrator over `client`. Nothing is read until
    /// [`start`](Self::start) or an action runs.
    #[must_use]
    pub fn new(config: SaleConfig, client: Arc<dyn ChainClient>) -> Self {
        let contracts = config.contracts();
        if contracts.sale.is_none() || contracts.stablecoin.is_none() {
            warn!(?contracts, "sale or stablecoin address missing; actions will be blocked");
        }

        let reader = Arc::new(ChainStateReader::new(
            Arc::clone(&client),
            contracts,
            config.refresh_interval(),
        ));
        let quantity = AtomicU64::new(config.default_quantity);

        Self {
            contracts,
            reader,
            sequencer: TransactionSequencer::new(client),
            invalidator: CacheInvalidator::for_purchase(contracts),
            quantity,
            error: Mutex::new(None),
            status: watch::channel(PurchaseStatus::default()).0,
            publish: tokio::sync::Mutex::new(()),
            watcher: Mutex::new(None),
            config,
        }
    }

    /// The configuration this orchestrator was built with.
    #[must_use]
    pub const fn config(&self) -> &SaleConfig {
        &self.config
    }

    /// The chain state reader.
    #[must_use]
    pub const fn reader(&self) -> &Arc<ChainStateReader> {
        &self.reader
    }

    /// The transaction sequencer.
    #[must_use]
    pub const fn sequencer(&self) -> &TransactionSequencer {
        &self.sequencer
    }

    /// Desired whole-token quantity.
    #[must_use]
    pub fn quantity(&self) -> u64 {
        self.quantity.load(Ordering::SeqCst)
    }

    /// Supply a new desired quantity. Clears the error slot unless a
    /// transaction is in flight.
    pub async fn set_quantity(&self, quantity: u64) {
        self.quantity.store(quantity, Ordering::SeqCst);
        if !self.sequencer.phase().is_in_flight() {
            self.set_error(None);
        }
        self.refresh_status().await;
    }

    /// Last published snapshot.
    #[must_use]
    pub fn status(&self) -> PurchaseStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to published snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PurchaseStatus> {
        self.status.subscribe()
    }

    /// Re-derive the snapshot from current inputs and publish it.
    ///
    /// Derivations are serialized, so a snapshot built from older inputs is
    /// never published over a newer one.
    pub async fn refresh_status(&self) -> PurchaseStatus {
        let _publish = self.publish.lock().await;
        let sale = self.reader.sale_state().await;
        let user = self.reader.user_state().await;
        let phase = self.sequencer.phase();
        let error = self.error();

        let status = PurchaseStatus::derive(&StatusInputs {
            quantity: self.quantity(),
            config: &self.config,
            sale: &sale,
            user: &user,
            phase: &phase,
            error: error.as_ref(),
            history: self.sequencer.history(),
        });
        self.status.send_replace(status.clone());
        status
    }

    /// Start background refresh and keep the published snapshot current.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        self.reader.start();

        let this = Arc::downgrade(self);
        let mut reads = self.reader.subscribe();
        let mut phase = self.sequencer.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = reads.changed() => if changed.is_err() { break },
                    changed = phase.changed() => if changed.is_err() { break },
                }
                let Some(this) = this.upgrade() else { break };
                this.refresh_status().await;
            }
            debug!("status watcher stopped");
        });

        if let Some(previous) = self.watcher_slot().replace(handle) {
            previous.abort();
        }
    }

    /// Stop background refresh.
    pub fn stop(&self) {
        self.reader.stop();
        if let Some(handle) = self.watcher_slot().take() {
            handle.abort();
        }
    }

    /// Refresh reads on window focus regain.
    pub async fn on_focus(&self) {
        self.reader.on_focus().await;
        self.refresh_status().await;
    }

    /// Set the allowance to the current total cost.
    pub async fn approve(&self) -> Outcome {
        if self.sequencer.phase().is_in_flight() {
            return Outcome::Busy;
        }
        let status = self.fresh_status().await;
        self.run_approve(&status).await
    }

    /// Buy the current quantity.
    pub async fn purchase(&self) -> Outcome {
        if self.sequencer.phase().is_in_flight() {
            return Outcome::Busy;
        }
        let status = self.fresh_status().await;
        self.run_purchase(&status).await
    }

    /// The primary action: approve if the fresh allowance is short,
    /// otherwise purchase.
    pub async fn handle_purchase(&self) -> Outcome {
        if self.sequencer.phase().is_in_flight() {
            return Outcome::Busy;
        }
        let status = self.fresh_status().await;
        if status.needs_approval {
            info!(quantity = status.quantity, "allowance short, approving first");
            self.run_approve(&status).await
        } else {
            self.run_purchase(&status).await
        }
    }

    /// Run [`handle_purchase`](Self::handle_purchase) in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(self: &Arc<Self>) -> JoinHandle<Outcome> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.handle_purchase().await })
    }

    async fn run_approve(&self, status: &PurchaseStatus) -> Outcome {
        let action = TxKind::Approval;
        let (Some(stablecoin), Some(sale)) = (self.contracts.stablecoin, self.contracts.sale) else {
            return self
                .block(action, FailureKind::ConfigurationMissing(MissingConfig::ContractAddresses))
                .await;
        };
        if !status.validation.is_connected {
            return self.block(action, Precondition::NotConnected.into()).await;
        }
        if status.price_per_token.is_none_or(|p| p.is_zero()) {
            return self
                .block(action, FailureKind::ConfigurationMissing(MissingConfig::Price))
                .await;
        }
        let Some(cost) = status.total_cost else {
            return self.block(action, Precondition::CostUncomputable.into()).await;
        };

        let reset_first = status.allowance.is_some_and(quote::needs_allowance_reset);
        let allowance = self.reader.read_set().allowance;
        let refetch_allowance = async {
            if let Some(call) = allowance {
                self.reader.refetch(vec![call]).await;
            }
        };

        info!(%cost, reset_first, "requesting approval");
        let result = self
            .sequencer
            .approve(stablecoin, sale, cost, reset_first, refetch_allowance)
            .await;
        self.settle(result, |tx| Outcome::Approved { tx }).await
    }

    async fn run_purchase(&self, status: &PurchaseStatus) -> Outcome {
        let action = TxKind::Purchase;
        let Some(sale) = self.contracts.sale else {
            return self
                .block(action, FailureKind::ConfigurationMissing(MissingConfig::ContractAddresses))
                .await;
        };
        if !status.validation.is_connected {
            return self.block(action, Precondition::NotConnected.into()).await;
        }
        if status.quantity == 0 {
            return self.block(action, Precondition::QuantityNotPositive.into()).await;
        }
        if status.price_per_token.is_none_or(|p| p.is_zero()) {
            return self
                .block(action, FailureKind::ConfigurationMissing(MissingConfig::Price))
                .await;
        }
        if status.total_cost.is_none() {
            return self.block(action, Precondition::CostUncomputable.into()).await;
        }

        let amount = scale_quantity(status.quantity, self.config.token_decimals);
        if let Some(inventory) = status.available_inventory.filter(|inv| amount > *inv) {
            let available = u64::try_from(inventory / unit(self.config.token_decimals))
                .unwrap_or(u64::MAX);
            return self
                .block(action, Precondition::ExceedsInventory { available }.into())
                .await;
        }
        if !status.validation.has_balance {
            return self.block(action, FailureKind::InsufficientFunds).await;
        }
        if status.needs_approval {
            return self.block(action, Precondition::ApprovalRequired.into()).await;
        }

        let invalidate = async {
            self.invalidator.run(&self.reader).await;
        };

        info!(quantity = status.quantity, %amount, "requesting purchase");
        let result = self.sequencer.purchase(sale, amount, invalidate).await;
        self.settle(result, |tx| Outcome::Purchased { tx }).await
    }

    /// Reads that decide the next action, refetched right before deciding.
    async fn fresh_status(&self) -> PurchaseStatus {
        if self.reader.cache().is_empty().await {
            self.reader.refresh().await;
        } else if let Some(call) = self.reader.read_set().allowance {
            self.reader.refetch(vec![call]).await;
        }
        self.refresh_status().await
    }

    async fn block(&self, action: TxKind, kind: FailureKind) -> Outcome {
        let failure = Failure::new(action, kind);
        warn!(%action, reason = %failure, "action blocked");
        self.set_error(Some(failure.clone()));
        self.refresh_status().await;
        Outcome::Blocked(failure)
    }

    async fn settle(
        &self,
        result: Result<TxHash, StepError>,
        done: fn(TxHash) -> Outcome,
    ) -> Outcome {
        let outcome = match result {
            Ok(tx) => {
                self.set_error(None);
                done(tx)
            }
            Err(StepError::Busy) => Outcome::Busy,
            Err(StepError::Failed(failure)) => {
                self.set_error(Some(failure.clone()));
                Outcome::Failed(failure)
            }
        };
        self.refresh_status().await;
        outcome
    }

    fn error(&self) -> Option<Failure> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_error(&self, failure: Option<Failure>) {
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = failure;
    }

    fn watcher_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.watcher.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PurchaseOrchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}
