//! Per (wallet, vault) mutation slots.
//!
//! A slot holds the live state of the one mutation allowed for a pair. It is
//! claimed with [`SlotTable::try_acquire`] and released when the returned
//! guard is finished or dropped, so a task that dies mid-flight never leaves
//! its pair blocked.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::MutationError;
use crate::models::{Address, MutationState, TxHash, TxStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SlotKey {
    pub wallet: Address,
    pub vault: Address,
}

impl SlotKey {
    pub fn new(wallet: Address, vault: Address) -> Self {
        Self { wallet, vault }
    }
}

#[derive(Debug)]
struct Slot {
    owner: Uuid,
    state: MutationState,
}

#[derive(Debug, Default)]
pub struct SlotTable {
    slots: Mutex<HashMap<SlotKey, Slot>>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `key`. Fails with `Busy` while another mutation for
    /// the pair is in flight, including one left indeterminate.
    pub fn try_acquire(
        self: &Arc<Self>,
        key: SlotKey,
        owner: Uuid,
        initial: MutationState,
    ) -> Result<SlotGuard, MutationError> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(&key) {
            if slot.state.is_in_flight() {
                return Err(MutationError::Busy {
                    wallet: key.wallet,
                    vault: key.vault,
                });
            }
        }
        debug!(wallet = %key.wallet, vault = %key.vault, state = %initial, "slot acquired");
        slots.insert(
            key,
            Slot {
                owner,
                state: initial,
            },
        );
        Ok(SlotGuard {
            table: Arc::clone(self),
            key,
            owner,
            finished: false,
        })
    }

    pub fn state(&self, key: &SlotKey) -> MutationState {
        self.slots
            .lock()
            .get(key)
            .map(|s| s.state.clone())
            .unwrap_or(MutationState::Idle)
    }

    pub fn snapshot(&self) -> Vec<(SlotKey, MutationState)> {
        self.slots
            .lock()
            .iter()
            .map(|(k, s)| (*k, s.state.clone()))
            .collect()
    }

    /// Pairs currently waiting on reconciliation.
    pub fn indeterminate(&self) -> Vec<(SlotKey, TxHash, TxStage)> {
        self.slots
            .lock()
            .iter()
            .filter_map(|(k, s)| match &s.state {
                MutationState::Indeterminate { tx_hash, stage } => Some((*k, *tx_hash, *stage)),
                _ => None,
            })
            .collect()
    }

    /// Replace an indeterminate state for `tx_hash` with its resolution.
    /// Returns false if the slot moved on in the meantime.
    pub fn resolve(&self, key: &SlotKey, tx_hash: &TxHash, resolved: MutationState) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(key) {
            Some(slot)
                if matches!(&slot.state, MutationState::Indeterminate { tx_hash: h, .. } if h == tx_hash) =>
            {
                slot.state = resolved;
                true
            }
            _ => false,
        }
    }

    fn set(&self, key: &SlotKey, owner: &Uuid, state: MutationState) {
        let mut slots = self.slots.lock();
        match slots.get_mut(key) {
            Some(slot) if &slot.owner == owner => slot.state = state,
            _ => warn!(
                wallet = %key.wallet,
                vault = %key.vault,
                "slot no longer owned by this mutation; update dropped"
            ),
        }
    }
}

/// Exclusive hold on one slot for the duration of a mutation.
#[derive(Debug)]
pub struct SlotGuard {
    table: Arc<SlotTable>,
    key: SlotKey,
    owner: Uuid,
    finished: bool,
}

impl SlotGuard {
    pub fn advance(&self, state: MutationState) {
        debug!(wallet = %self.key.wallet, vault = %self.key.vault, state = %state, "mutation state");
        self.table.set(&self.key, &self.owner, state);
    }

    /// Record the terminal state. An `Indeterminate` state keeps the pair busy
    /// until reconciled.
    pub fn finish(mut self, state: MutationState) {
        self.advance(state);
        self.finished = true;
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.table.set(
                &self.key,
                &self.owner,
                MutationState::Failed {
                    reason: "mutation task aborted".to_string(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SlotKey {
        SlotKey::new(
            "0x0000000000000000000000000000000000000777".parse().unwrap(),
            "0x00000000000000000000000000000000000000a1".parse().unwrap(),
        )
    }

    #[test]
    fn test_second_acquire_is_busy_until_finished() {
        let table = Arc::new(SlotTable::new());
        assert_eq!(table.state(&key()), MutationState::Idle);

        let guard = table
            .try_acquire(key(), Uuid::new_v4(), MutationState::CheckingAllowance)
            .unwrap();
        let err = table
            .try_acquire(key(), Uuid::new_v4(), MutationState::Submitting)
            .unwrap_err();
        assert!(err.is_busy());

        guard.finish(MutationState::Succeeded);
        assert_eq!(table.state(&key()), MutationState::Succeeded);
        assert!(table
            .try_acquire(key(), Uuid::new_v4(), MutationState::Submitting)
            .is_ok());
    }

    #[test]
    fn test_dropped_guard_releases_as_failed() {
        let table = Arc::new(SlotTable::new());
        {
            let guard = table
                .try_acquire(key(), Uuid::new_v4(), MutationState::Submitting)
                .unwrap();
            guard.advance(MutationState::AwaitingConfirmation);
        }
        assert!(matches!(table.state(&key()), MutationState::Failed { .. }));
        assert!(!table.state(&key()).is_in_flight());
    }

    #[test]
    fn test_indeterminate_stays_busy_until_resolved() {
        let table = Arc::new(SlotTable::new());
        let hash = TxHash::from_bytes([7u8; 32]);
        let guard = table
            .try_acquire(key(), Uuid::new_v4(), MutationState::Submitting)
            .unwrap();
        guard.finish(MutationState::Indeterminate {
            tx_hash: hash,
            stage: TxStage::Action,
        });

        assert!(table
            .try_acquire(key(), Uuid::new_v4(), MutationState::Submitting)
            .is_err());
        assert_eq!(table.indeterminate().len(), 1);

        let other = TxHash::from_bytes([8u8; 32]);
        assert!(!table.resolve(&key(), &other, MutationState::Succeeded));
        assert!(table.resolve(&key(), &hash, MutationState::Succeeded));
        assert!(table.indeterminate().is_empty());
        assert_eq!(table.state(&key()), MutationState::Succeeded);
    }
}
