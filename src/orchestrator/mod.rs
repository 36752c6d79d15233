//! Deposit / withdraw orchestration.
//!
//! Each request walks a small state machine on its own tokio task:
//! CHECKING_ALLOWANCE -> [APPROVING] -> SUBMITTING -> AWAITING_CONFIRMATION ->
//! SUCCEEDED | FAILED. Withdrawals start at SUBMITTING. At most one mutation
//! runs per (wallet, vault) pair; different pairs run concurrently.

pub mod events;
pub mod signer;
pub mod slots;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregator::StateAggregator;
use crate::error::MutationError;
use crate::ledger::{Contract, ContractWrite, LedgerReader};
use crate::models::{
    Address, MutationKind, MutationOutcome, MutationRequest, MutationState, TxHash, TxStage,
};
use crate::positions::PositionRefresher;

pub use events::{MutationEvent, MutationEventKind};
pub use signer::{RpcNodeSigner, TransactionRequest, TransactionSigner, TxReceipt};
pub use slots::{SlotKey, SlotTable};

use slots::SlotGuard;

const APPROVAL_CONFIRMED_LATE: &str = "approval confirmed late; action not submitted";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub confirmation_timeout: Duration,
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(120),
            event_buffer: 256,
        }
    }
}

/// Handle to a mutation running in the background. Dropping it does not
/// cancel the mutation.
pub struct MutationHandle {
    request_id: Uuid,
    key: SlotKey,
    task: JoinHandle<Result<MutationOutcome, MutationError>>,
}

impl MutationHandle {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn key(&self) -> &SlotKey {
        &self.key
    }

    pub async fn outcome(self) -> Result<MutationOutcome, MutationError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(MutationError::Aborted(e.to_string())),
        }
    }
}

struct Inner {
    ledger: Arc<dyn LedgerReader>,
    signer: Arc<dyn TransactionSigner>,
    aggregator: Arc<StateAggregator>,
    positions: Arc<PositionRefresher>,
    slots: Arc<SlotTable>,
    events: broadcast::Sender<MutationEvent>,
    confirmation_timeout: Duration,
}

#[derive(Clone)]
pub struct TransactionOrchestrator {
    inner: Arc<Inner>,
}

impl TransactionOrchestrator {
    pub fn new(
        ledger: Arc<dyn LedgerReader>,
        signer: Arc<dyn TransactionSigner>,
        aggregator: Arc<StateAggregator>,
        positions: Arc<PositionRefresher>,
        config: OrchestratorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                ledger,
                signer,
                aggregator,
                positions,
                slots: Arc::new(SlotTable::new()),
                events,
                confirmation_timeout: config.confirmation_timeout,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self, wallet: Address, vault: Address) -> MutationState {
        self.inner.slots.state(&SlotKey::new(wallet, vault))
    }

    pub fn states(&self) -> Vec<(SlotKey, MutationState)> {
        self.inner.slots.snapshot()
    }

    /// Claim the pair's slot and run the mutation in the background.
    /// Rejects immediately with `Busy` if the pair is already in flight.
    pub fn start(&self, request: MutationRequest) -> Result<MutationHandle, MutationError> {
        if self.inner.aggregator.registry().get(&request.vault).is_none() {
            return Err(MutationError::UnknownVault(request.vault));
        }

        let key = SlotKey::new(request.wallet, request.vault);
        let initial = match request.kind {
            MutationKind::Deposit => MutationState::CheckingAllowance,
            MutationKind::Withdraw => MutationState::Submitting,
        };
        let guard = self.inner.slots.try_acquire(key, request.id, initial)?;

        info!(
            request_id = %request.id,
            kind = %request.kind,
            wallet = %request.wallet,
            vault = %request.vault,
            amount = %request.amount,
            "mutation accepted"
        );

        let request_id = request.id;
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.run(request, guard).await });
        Ok(MutationHandle {
            request_id,
            key,
            task,
        })
    }

    /// Run a mutation to completion.
    pub async fn submit(&self, request: MutationRequest) -> Result<MutationOutcome, MutationError> {
        self.start(request)?.outcome().await
    }

    /// Resolve an indeterminate pair from the receipt of its pending
    /// transaction. Returns the pair's state afterwards; a transaction that is
    /// still pending leaves it indeterminate.
    pub async fn reconcile(
        &self,
        wallet: Address,
        vault: Address,
    ) -> Result<MutationState, MutationError> {
        self.inner.reconcile(SlotKey::new(wallet, vault)).await
    }

    pub async fn reconcile_all(&self) -> Vec<(SlotKey, MutationState)> {
        let mut resolved = Vec::new();
        for (key, _, _) in self.inner.slots.indeterminate() {
            match self.inner.reconcile(key).await {
                Ok(state) => resolved.push((key, state)),
                Err(e) => warn!(
                    wallet = %key.wallet,
                    vault = %key.vault,
                    error = %e,
                    "reconciliation failed; pair stays indeterminate"
                ),
            }
        }
        resolved
    }
}

impl Inner {
    fn emit(&self, request: &MutationRequest, event: MutationEventKind) {
        // no subscribers is fine
        let _ = self.events.send(MutationEvent {
            request_id: request.id,
            kind: request.kind,
            wallet: request.wallet,
            vault: request.vault,
            at: Utc::now(),
            event,
        });
    }

    async fn run(
        &self,
        request: MutationRequest,
        guard: SlotGuard,
    ) -> Result<MutationOutcome, MutationError> {
        let result = self.execute(&request, &guard).await;

        match &result {
            Ok(outcome) => {
                self.refresh_after_success(request.wallet).await;
                guard.finish(MutationState::Succeeded);
                info!(
                    request_id = %request.id,
                    tx_hash = %outcome.action_tx,
                    "mutation succeeded"
                );
            }
            Err(MutationError::ConfirmationTimeout { tx_hash, stage }) => {
                warn!(
                    request_id = %request.id,
                    tx_hash = %tx_hash,
                    stage = %stage,
                    "confirmation timed out; outcome unknown until reconciled"
                );
                self.emit(
                    &request,
                    MutationEventKind::Indeterminate {
                        tx_hash: *tx_hash,
                        stage: *stage,
                    },
                );
                guard.finish(MutationState::Indeterminate {
                    tx_hash: *tx_hash,
                    stage: *stage,
                });
            }
            Err(MutationError::UserDeclined(msg)) => {
                info!(request_id = %request.id, reason = %msg, "user declined signing");
                self.emit(
                    &request,
                    MutationEventKind::Error {
                        message: format!("user declined: {}", msg),
                    },
                );
                guard.finish(MutationState::Idle);
            }
            Err(e) => {
                error!(request_id = %request.id, error = %e, "mutation failed");
                self.emit(
                    &request,
                    MutationEventKind::Error {
                        message: e.to_string(),
                    },
                );
                guard.finish(MutationState::Failed {
                    reason: e.to_string(),
                });
            }
        }
        result
    }

    async fn execute(
        &self,
        request: &MutationRequest,
        guard: &SlotGuard,
    ) -> Result<MutationOutcome, MutationError> {
        let mut approval_tx = None;

        if request.kind == MutationKind::Deposit {
            let vault = Contract::new(self.ledger.as_ref(), request.vault);
            let underlying = vault.asset().await?;
            let allowance = Contract::new(self.ledger.as_ref(), underlying)
                .allowance(&request.wallet, &request.vault)
                .await?;

            if allowance < request.amount {
                guard.advance(MutationState::Approving);
                self.emit(
                    request,
                    MutationEventKind::ApprovalRequested {
                        amount: request.amount.clone(),
                    },
                );
                let tx_hash = self
                    .signer
                    .send_transaction(TransactionRequest {
                        from: request.wallet,
                        to: underlying,
                        call: ContractWrite::Approve {
                            spender: request.vault,
                            amount: request.amount.clone(),
                        },
                    })
                    .await?;
                debug!(request_id = %request.id, tx_hash = %tx_hash, "approval submitted");
                self.confirm(tx_hash, TxStage::Approval).await?;
                self.emit(request, MutationEventKind::ApprovalConfirmed { tx_hash });
                approval_tx = Some(tx_hash);
            } else {
                debug!(
                    request_id = %request.id,
                    allowance = %allowance,
                    "allowance sufficient; skipping approval"
                );
            }
            guard.advance(MutationState::Submitting);
        }

        let call = match request.kind {
            MutationKind::Deposit => ContractWrite::Deposit {
                assets: request.amount.clone(),
                receiver: request.wallet,
            },
            MutationKind::Withdraw => ContractWrite::Withdraw {
                assets: request.amount.clone(),
                receiver: request.wallet,
                owner: request.wallet,
            },
        };
        let tx_hash = self
            .signer
            .send_transaction(TransactionRequest {
                from: request.wallet,
                to: request.vault,
                call,
            })
            .await?;
        self.emit(request, MutationEventKind::ActionSubmitted { tx_hash });
        guard.advance(MutationState::AwaitingConfirmation);

        let receipt = self.confirm(tx_hash, TxStage::Action).await?;
        self.emit(request, MutationEventKind::ActionConfirmed { tx_hash });

        Ok(MutationOutcome {
            request_id: request.id,
            kind: request.kind,
            vault: request.vault,
            wallet: request.wallet,
            approval_tx,
            action_tx: tx_hash,
            block_number: receipt.block_number,
        })
    }

    async fn confirm(&self, tx_hash: TxHash, stage: TxStage) -> Result<TxReceipt, MutationError> {
        match timeout(
            self.confirmation_timeout,
            self.signer.wait_for_confirmation(&tx_hash),
        )
        .await
        {
            Err(_) => Err(MutationError::ConfirmationTimeout { tx_hash, stage }),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(receipt)) if !receipt.success => Err(MutationError::Reverted { tx_hash, stage }),
            Ok(Ok(receipt)) => Ok(receipt),
        }
    }

    async fn refresh_after_success(&self, wallet: Address) {
        let snapshot = self.aggregator.refresh().await;
        self.positions.refresh_positions(wallet, &snapshot).await;
    }

    async fn reconcile(&self, key: SlotKey) -> Result<MutationState, MutationError> {
        let (tx_hash, stage) = match self.slots.state(&key) {
            MutationState::Indeterminate { tx_hash, stage } => (tx_hash, stage),
            other => return Ok(other),
        };

        let Some(receipt) = self.signer.receipt(&tx_hash).await? else {
            debug!(wallet = %key.wallet, vault = %key.vault, tx_hash = %tx_hash, "still pending");
            return Ok(MutationState::Indeterminate { tx_hash, stage });
        };

        let resolved = match (receipt.success, stage) {
            (true, TxStage::Action) => MutationState::Succeeded,
            (true, TxStage::Approval) => MutationState::Failed {
                reason: APPROVAL_CONFIRMED_LATE.to_string(),
            },
            (false, stage) => MutationState::Failed {
                reason: MutationError::Reverted { tx_hash, stage }.to_string(),
            },
        };

        if self.slots.resolve(&key, &tx_hash, resolved.clone()) {
            info!(
                wallet = %key.wallet,
                vault = %key.vault,
                tx_hash = %tx_hash,
                state = %resolved,
                "indeterminate mutation reconciled"
            );
            if resolved == MutationState::Succeeded {
                self.refresh_after_success(key.wallet).await;
            }
        }
        Ok(self.slots.state(&key))
    }
}
