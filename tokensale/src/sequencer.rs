//! Transaction sequencing.
//!
//! [`TransactionSequencer`] is the only writer of the transaction [`Phase`].
//! Every change goes through [`Phase::next`], a pure function of the current
//! phase and an [`Event`]; an event the current phase does not accept is
//! dropped. Starting a transaction is only accepted when nothing is in flight,
//! which makes a second concurrent approve or purchase impossible. Dropping
//! an action's future before it settles fails the in-flight transaction with
//! [`FailureKind::Abandoned`], so the sequencer never stays busy without an
//! owner.
//!
//! ```text
//! Idle ─Start(kind)─► AwaitingSignature(kind) ─Signed(tx)─► Confirming{kind, tx}
//!
//! Confirming{ApprovalReset} ─Confirmed─► AwaitingSignature(Approval)
//! Confirming{Approval}      ─Confirmed─► Idle
//! Confirming{Purchase}      ─Confirmed─► Succeeded{tx}
//! AwaitingSignature | Confirming ─Failed(f)─► Failed(f)
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use alloy::primitives::{Address, U256};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, ChainError, TxHash, WriteCall};
use crate::classify::{Failure, FailureKind};

/// Kind of on-chain transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxKind {
    /// `approve(sale, 0)` ahead of a new approval.
    ApprovalReset,
    /// `approve(sale, cost)`.
    Approval,
    /// `buyTokens(quantity)`.
    Purchase,
}

impl TxKind {
    /// Whether this is one of the approval steps.
    #[must_use]
    pub const fn is_approval(self) -> bool {
        matches!(self, Self::ApprovalReset | Self::Approval)
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ApprovalReset => "approval reset",
            Self::Approval => "approval",
            Self::Purchase => "purchase",
        })
    }
}

/// Transaction lifecycle phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Phase {
    /// Nothing in flight.
    #[default]
    Idle,
    /// Waiting for the wallet to sign.
    AwaitingSignature(TxKind),
    /// Broadcast, waiting for inclusion.
    Confirming {
        /// What is being confirmed.
        kind: TxKind,
        /// Transaction hash.
        tx: TxHash,
    },
    /// The purchase was confirmed.
    Succeeded {
        /// Purchase transaction hash.
        tx: TxHash,
    },
    /// The last attempt failed.
    Failed(Failure),
}

/// A completion signal driving [`Phase`] transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A transaction of this kind is about to be requested.
    Start(TxKind),
    /// The wallet signed and the transaction was broadcast.
    Signed(TxHash),
    /// The transaction was included.
    Confirmed,
    /// Signing, simulation or confirmation failed.
    Failed(Failure),
}

impl Phase {
    /// The phase after `event`, or `None` if `event` is not accepted here.
    #[must_use]
    pub fn next(&self, event: &Event) -> Option<Self> {
        match (self, event) {
            (Self::Idle | Self::Succeeded { .. } | Self::Failed(_), Event::Start(kind)) => {
                Some(Self::AwaitingSignature(*kind))
            }
            (Self::AwaitingSignature(kind), Event::Signed(tx)) => Some(Self::Confirming {
                kind: *kind,
                tx: *tx,
            }),
            (Self::Confirming { kind, tx }, Event::Confirmed) => Some(match kind {
                TxKind::ApprovalReset => Self::AwaitingSignature(TxKind::Approval),
                TxKind::Approval => Self::Idle,
                TxKind::Purchase => Self::Succeeded { tx: *tx },
            }),
            (Self::AwaitingSignature(_) | Self::Confirming { .. }, Event::Failed(failure)) => {
                Some(Self::Failed(failure.clone()))
            }
            _ => None,
        }
    }

    /// Whether a transaction is being signed or confirmed.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        matches!(self, Self::AwaitingSignature(_) | Self::Confirming { .. })
    }

    /// Kind of the in-flight transaction.
    #[must_use]
    pub const fn in_flight_kind(&self) -> Option<TxKind> {
        match self {
            Self::AwaitingSignature(kind) | Self::Confirming { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether an approval step is in flight.
    #[must_use]
    pub const fn is_approving(&self) -> bool {
        matches!(self.in_flight_kind(), Some(TxKind::ApprovalReset | TxKind::Approval))
    }

    /// Whether the purchase is in flight.
    #[must_use]
    pub const fn is_buying(&self) -> bool {
        matches!(self.in_flight_kind(), Some(TxKind::Purchase))
    }

    /// The failure, if the last attempt failed.
    #[must_use]
    pub const fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Why a sequenced action did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    /// Another transaction is in flight; nothing was submitted.
    #[error("a transaction is already in flight")]
    Busy,
    /// The action failed and the phase moved to [`Phase::Failed`].
    #[error(transparent)]
    Failed(#[from] Failure),
}

/// Hashes of the most recent transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxHistory {
    /// Last approval transaction (reset or set).
    pub approval: Option<TxHash>,
    /// Last purchase transaction.
    pub purchase: Option<TxHash>,
}

/// Submits approvals and purchases in order and tracks their phase.
#[derive(Debug)]
pub struct TransactionSequencer {
    client: Arc<dyn ChainClient>,
    phase: watch::Sender<Phase>,
    history: Mutex<TxHistory>,
}

impl TransactionSequencer {
    /// Create a sequencer in [`Phase::Idle`].
    #[must_use]
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self {
            client,
            phase: watch::channel(Phase::Idle).0,
            history: Mutex::new(TxHistory::default()),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase.borrow().clone()
    }

    /// Subscribe to phase changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Most recent transaction hashes.
    #[must_use]
    pub fn history(&self) -> TxHistory {
        *self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the stablecoin allowance of `spender` to `amount`.
    ///
    /// With `reset_first`, the allowance is first set to zero and the real
    /// approval is only requested once that reset is confirmed. `on_confirmed`
    /// runs after the final approval is included and before the phase
    /// returns to idle.
    ///
    /// # Errors
    ///
    /// [`StepError::Busy`] if a transaction is in flight, otherwise the
    /// classified failure of whichever step failed.
    pub async fn approve<F>(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
        reset_first: bool,
        on_confirmed: F,
    ) -> Result<TxHash, StepError>
    where
        F: Future<Output = ()> + Send,
    {
        let first = if reset_first {
            TxKind::ApprovalReset
        } else {
            TxKind::Approval
        };
        if !self.apply(Event::Start(first)) {
            return Err(StepError::Busy);
        }
        let _guard = InFlightGuard { sequencer: self };

        if reset_first {
            let reset = WriteCall::Approve {
                token,
                spender,
                amount: U256::ZERO,
            };
            self.execute(TxKind::ApprovalReset, &reset).await?;
            self.apply(Event::Confirmed);
        }

        let approval = WriteCall::Approve {
            token,
            spender,
            amount,
        };
        let tx = self.execute(TxKind::Approval, &approval).await?;
        on_confirmed.await;
        self.apply(Event::Confirmed);
        Ok(tx)
    }

    /// Buy `amount` (scaled to token decimals) from `sale`.
    ///
    /// `on_confirmed` runs after the purchase is included and before the
    /// phase becomes [`Phase::Succeeded`].
    ///
    /// # Errors
    ///
    /// [`StepError::Busy`] if a transaction is in flight, otherwise the
    /// classified failure.
    pub async fn purchase<F>(
        &self,
        sale: Address,
        amount: U256,
        on_confirmed: F,
    ) -> Result<TxHash, StepError>
    where
        F: Future<Output = ()> + Send,
    {
        if !self.apply(Event::Start(TxKind::Purchase)) {
            return Err(StepError::Busy);
        }
        let _guard = InFlightGuard { sequencer: self };

        let call = WriteCall::BuyTokens { sale, amount };
        let tx = self.execute(TxKind::Purchase, &call).await?;
        on_confirmed.await;
        self.apply(Event::Confirmed);
        Ok(tx)
    }

    /// Simulate, sign, broadcast and confirm one transaction. The phase must
    /// be `AwaitingSignature(kind)`; on success it is left at `Confirming`.
    async fn execute(&self, kind: TxKind, call: &WriteCall) -> Result<TxHash, StepError> {
        let tx = match self.sign(call).await {
            Ok(tx) => tx,
            Err(e) => return Err(self.fail(kind, &e)),
        };
        self.apply(Event::Signed(tx));
        self.record(kind, tx);

        if let Err(e) = self.client.confirm(tx).await {
            return Err(self.fail(kind, &e));
        }
        info!(%kind, %tx, "transaction confirmed");
        Ok(tx)
    }

    async fn sign(&self, call: &WriteCall) -> Result<TxHash, ChainError> {
        self.client.simulate(call).await?;
        self.client.submit(call).await
    }

    fn fail(&self, kind: TxKind, error: &ChainError) -> StepError {
        let failure = Failure::classify(kind, &error.to_string());
        warn!(%kind, %error, message = %failure, "transaction failed");
        self.apply(Event::Failed(failure.clone()));
        StepError::Failed(failure)
    }

    fn record(&self, kind: TxKind, tx: TxHash) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if kind.is_approval() {
            history.approval = Some(tx);
        } else {
            history.purchase = Some(tx);
        }
    }

    /// Apply `event` atomically; returns whether it was accepted.
    fn apply(&self, event: Event) -> bool {
        let mut accepted = false;
        self.phase.send_if_modified(|phase| match phase.next(&event) {
            Some(next) => {
                debug!(from = ?phase, to = ?next, "phase transition");
                *phase = next;
                accepted = true;
                true
            }
            None => false,
        });
        if !accepted {
            warn!(?event, "transition not accepted in current phase");
        }
        accepted
    }
}

/// Held by an action between its accepted `Start` and the end of its future.
struct InFlightGuard<'a> {
    sequencer: &'a TransactionSequencer,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let kind = self.sequencer.phase.borrow().in_flight_kind();
        let Some(kind) = kind else {
            return;
        };
        warn!(%kind, "transaction abandoned before it settled");
        self.sequencer
            .apply(Event::Failed(Failure::new(kind, FailureKind::Abandoned)));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use alloy::primitives::address;
    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;
    use crate::chain::{MockChain, MockEvent};

    const SALE: Address = address!("0x1000000000000000000000000000000000000001");
    const USDT: Address = address!("0x2000000000000000000000000000000000000002");
    const USER: Address = address!("0x3000000000000000000000000000000000000003");

    fn tx(n: u64) -> TxHash {
        TxHash::from(U256::from(n))
    }

    fn sequencer() -> (Arc<MockChain>, TransactionSequencer) {
        let chain = Arc::new(MockChain::new(Some(USER)));
        let sequencer = TransactionSequencer::new(chain.clone());
        (chain, sequencer)
    }

    mod transitions {
        use super::*;

        #[test]
        fn start_only_from_settled_phases() {
            let start = Event::Start(TxKind::Purchase);
            assert!(Phase::Idle.next(&start).is_some());
            assert!(Phase::Succeeded { tx: tx(1) }.next(&start).is_some());
            assert!(
                Phase::Failed(Failure::classify(TxKind::Purchase, "x"))
                    .next(&start)
                    .is_some()
            );
            assert!(Phase::AwaitingSignature(TxKind::Approval).next(&start).is_none());
            assert!(
                Phase::Confirming {
                    kind: TxKind::Purchase,
                    tx: tx(1)
                }
                .next(&start)
                .is_none()
            );
        }

        #[test]
        fn reset_confirmation_chains_into_approval() {
            let phase = Phase::Confirming {
                kind: TxKind::ApprovalReset,
                tx: tx(1),
            };
            assert_eq!(
                phase.next(&Event::Confirmed),
                Some(Phase::AwaitingSignature(TxKind::Approval))
            );
        }

        #[test]
        fn confirmations_settle_by_kind() {
            let approval = Phase::Confirming {
                kind: TxKind::Approval,
                tx: tx(2),
            };
            assert_eq!(approval.next(&Event::Confirmed), Some(Phase::Idle));

            let purchase = Phase::Confirming {
                kind: TxKind::Purchase,
                tx: tx(3),
            };
            assert_eq!(
                purchase.next(&Event::Confirmed),
                Some(Phase::Succeeded { tx: tx(3) })
            );
        }

        #[test]
        fn stray_events_are_rejected() {
            assert!(Phase::Idle.next(&Event::Confirmed).is_none());
            assert!(Phase::Idle.next(&Event::Signed(tx(1))).is_none());
            let failure = Failure::classify(TxKind::Purchase, "x");
            assert!(Phase::Idle.next(&Event::Failed(failure)).is_none());
        }

        #[test]
        fn in_flight_flags() {
            let phase = Phase::AwaitingSignature(TxKind::ApprovalReset);
            assert!(phase.is_in_flight() && phase.is_approving() && !phase.is_buying());
            let phase = Phase::Confirming {
                kind: TxKind::Purchase,
                tx: tx(1),
            };
            assert!(phase.is_in_flight() && phase.is_buying());
            assert!(!Phase::Idle.is_in_flight());
        }
    }

    mod approval {
        use super::*;

        #[tokio::test]
        async fn reset_then_approve_in_order() {
            let (chain, sequencer) = sequencer();
            sequencer
                .approve(USDT, SALE, U256::from(200), true, async {})
                .await
                .unwrap();

            let amounts: Vec<U256> = chain.submissions().iter().map(WriteCall::amount).collect();
            assert_eq!(amounts, vec![U256::ZERO, U256::from(200)]);
            assert_eq!(
                chain.journal(),
                vec![
                    MockEvent::Submitted {
                        call: WriteCall::Approve {
                            token: USDT,
                            spender: SALE,
                            amount: U256::ZERO
                        },
                        tx: tx(1)
                    },
                    MockEvent::Confirmed { tx: tx(1) },
                    MockEvent::Submitted {
                        call: WriteCall::Approve {
                            token: USDT,
                            spender: SALE,
                            amount: U256::from(200)
                        },
                        tx: tx(2)
                    },
                    MockEvent::Confirmed { tx: tx(2) },
                ]
            );
            assert_eq!(sequencer.phase(), Phase::Idle);
            assert_eq!(sequencer.history().approval, Some(tx(2)));
        }

        #[tokio::test]
        async fn second_step_waits_for_reset_confirmation() {
            let (chain, sequencer) = sequencer();
            chain.hold_confirmations();

            let mut approve =
                task::spawn(sequencer.approve(USDT, SALE, U256::from(200), true, async {}));
            assert_pending!(approve.poll());
            assert_eq!(chain.submissions().len(), 1);
            assert!(matches!(
                sequencer.phase(),
                Phase::Confirming {
                    kind: TxKind::ApprovalReset,
                    ..
                }
            ));

            chain.release_confirmations(1);
            assert_pending!(approve.poll());
            assert_eq!(chain.submissions().len(), 2);

            chain.release_confirmations(1);
            assert_eq!(assert_ready!(approve.poll()), Ok(tx(2)));
        }

        #[tokio::test]
        async fn rejected_reset_never_submits_approval() {
            let (chain, sequencer) = sequencer();
            chain.fail_next_submit("User rejected the request.");

            let err = sequencer
                .approve(USDT, SALE, U256::from(200), true, async {})
                .await
                .unwrap_err();

            let StepError::Failed(failure) = err else {
                panic!("expected a failure, got {err:?}");
            };
            assert_eq!(failure.action, TxKind::ApprovalReset);
            assert_eq!(failure.kind, FailureKind::UserRejected);
            assert!(chain.submissions().is_empty());
            assert!(sequencer.phase().failure().is_some());
        }
    }

    mod purchase {
        use super::*;

        #[tokio::test]
        async fn hook_runs_before_success_is_observable() {
            let (_chain, sequencer) = sequencer();
            let observed = Mutex::new(None);
            let rx = sequencer.subscribe();

            sequencer
                .purchase(SALE, U256::from(1), async {
                    *observed.lock().unwrap() = Some(rx.borrow().clone());
                })
                .await
                .unwrap();

            assert!(matches!(
                observed.into_inner().unwrap(),
                Some(Phase::Confirming {
                    kind: TxKind::Purchase,
                    ..
                })
            ));
            assert_eq!(sequencer.phase(), Phase::Succeeded { tx: tx(1) });
        }

        #[tokio::test]
        async fn busy_while_in_flight() {
            let (chain, sequencer) = sequencer();
            chain.hold_confirmations();

            let mut first = task::spawn(sequencer.purchase(SALE, U256::from(1), async {}));
            assert_pending!(first.poll());

            let second = sequencer.purchase(SALE, U256::from(1), async {}).await;
            assert_eq!(second, Err(StepError::Busy));
            let third = sequencer
                .approve(USDT, SALE, U256::from(1), false, async {})
                .await;
            assert_eq!(third, Err(StepError::Busy));
            assert_eq!(chain.submissions().len(), 1);

            chain.release_confirmations(1);
            assert!(assert_ready!(first.poll()).is_ok());
        }

        #[tokio::test]
        async fn dropped_while_confirming_frees_the_sequencer() {
            let (chain, sequencer) = sequencer();
            chain.hold_confirmations();

            let mut first = task::spawn(sequencer.purchase(SALE, U256::from(1), async {}));
            assert_pending!(first.poll());
            assert!(sequencer.phase().is_buying());
            drop(first);

            let failure = sequencer.phase().failure().cloned().unwrap();
            assert_eq!(failure.kind, FailureKind::Abandoned);
            assert_eq!(failure.action, TxKind::Purchase);

            chain.release_confirmations(1);
            let tx = sequencer.purchase(SALE, U256::from(1), async {}).await.unwrap();
            assert_eq!(sequencer.phase(), Phase::Succeeded { tx });
            assert_eq!(chain.submissions().len(), 2);
        }

        #[tokio::test]
        async fn dropped_after_reset_frees_the_sequencer() {
            let (chain, sequencer) = sequencer();
            chain.hold_confirmations();

            let mut approve =
                task::spawn(sequencer.approve(USDT, SALE, U256::from(200), true, async {}));
            assert_pending!(approve.poll());
            chain.release_confirmations(1);
            assert_pending!(approve.poll());
            drop(approve);

            assert_eq!(
                sequencer.phase().failure().map(|f| (&f.kind, f.action)),
                Some((&FailureKind::Abandoned, TxKind::Approval))
            );

            chain.release_confirmations(1);
            let hash = sequencer
                .approve(USDT, SALE, U256::from(200), false, async {})
                .await
                .unwrap();
            assert_eq!(hash, tx(3));
            assert_eq!(sequencer.phase(), Phase::Idle);
        }

        #[tokio::test]
        async fn revert_moves_to_failed_and_allows_retry() {
            let (chain, sequencer) = sequencer();
            chain.fail_next_confirm("reverted with reason string 'Sale paused'");

            let err = sequencer
                .purchase(SALE, U256::from(1), async {})
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), "Transaction reverted: Sale paused");

            let tx = sequencer.purchase(SALE, U256::from(1), async {}).await.unwrap();
            assert_eq!(sequencer.phase(), Phase::Succeeded { tx });
        }

        #[tokio::test]
        async fn simulation_failure_skips_signature() {
            let (chain, sequencer) = sequencer();
            chain.fail_next_simulation("execution reverted: \"Exceeds supply\"");

            let err = sequencer
                .purchase(SALE, U256::from(1), async {})
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), "Transaction reverted: Exceeds supply");
            assert!(chain.submissions().is_empty());
        }

        #[tokio::test]
        async fn unfunded_simulation_is_insufficient_funds() {
            let (chain, sequencer) = sequencer();
            chain.fail_next_simulation("insufficient funds for gas * price + value");

            let err = sequencer
                .purchase(SALE, U256::from(1), async {})
                .await
                .unwrap_err();
            let StepError::Failed(failure) = err else {
                panic!("expected a failure, got {err:?}");
            };
            assert_eq!(failure.kind, FailureKind::InsufficientFunds);
            assert!(chain.submissions().is_empty());
        }
    }
}
