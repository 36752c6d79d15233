use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Address, MutationKind, TxHash, TxStage};
use crate::units::decimal_string;

/// Lifecycle notification for one mutation, fanned out to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct MutationEvent {
    pub request_id: Uuid,
    pub kind: MutationKind,
    pub wallet: Address,
    pub vault: Address,
    pub at: DateTime<Utc>,
    pub event: MutationEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MutationEventKind {
    ApprovalRequested {
        #[serde(with = "decimal_string")]
        amount: BigUint,
    },
    ApprovalConfirmed {
        tx_hash: TxHash,
    },
    ActionSubmitted {
        tx_hash: TxHash,
    },
    ActionConfirmed {
        tx_hash: TxHash,
    },
    /// Confirmation timed out; the pair waits for reconciliation.
    Indeterminate {
        tx_hash: TxHash,
        stage: TxStage,
    },
    Error {
        message: String,
    },
}
