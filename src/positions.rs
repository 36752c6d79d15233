//! Per-wallet position reads against a published snapshot.

use chrono::Utc;
use futures_util::future::join_all;
use num_bigint::BigUint;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::ledger::{Contract, LedgerReader};
use crate::models::{
    Accounting, Address, PortfolioSnapshot, PositionSet, ShareMetric, UserPosition,
    VaultReadFailure, VaultState,
};
use crate::units;

struct CachedPositions {
    sequence: u64,
    set: Arc<PositionSet>,
}

pub struct PositionRefresher {
    ledger: Arc<dyn LedgerReader>,
    cache: RwLock<HashMap<Address, CachedPositions>>,
    sequence: AtomicU64,
}

impl PositionRefresher {
    pub fn new(ledger: Arc<dyn LedgerReader>) -> Self {
        Self {
            ledger,
            cache: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Last refreshed positions for `wallet`, if any.
    pub fn positions(&self, wallet: &Address) -> Option<Arc<PositionSet>> {
        self.cache.read().get(wallet).map(|c| Arc::clone(&c.set))
    }

    /// Read the wallet's share balance in every vault of `snapshot` and
    /// convert it to assets. A vault whose reads fail is left out rather
    /// than reported as an empty position.
    pub async fn refresh_positions(
        &self,
        wallet: Address,
        snapshot: &PortfolioSnapshot,
    ) -> Arc<PositionSet> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        let results = join_all(
            snapshot
                .vaults
                .iter()
                .map(|state| self.read_position(&wallet, state)),
        )
        .await;

        let mut positions = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (state, result) in snapshot.vaults.iter().zip(results) {
            match result {
                Ok(position) => positions.push(position),
                Err(e) => {
                    warn!(
                        wallet = %wallet,
                        vault = %state.address(),
                        error = %e,
                        "position read failed"
                    );
                    failures.push(VaultReadFailure {
                        vault: *state.address(),
                        name: state.vault.name.clone(),
                        retryable: e.is_retryable(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let set = Arc::new(PositionSet {
            wallet,
            snapshot_generation: snapshot.generation,
            captured_at: Utc::now(),
            positions,
            failures,
        });

        let mut cache = self.cache.write();
        match cache.get(&wallet) {
            Some(existing) if existing.sequence > sequence => {
                debug!(wallet = %wallet, sequence, "newer positions already cached");
            }
            _ => {
                cache.insert(
                    wallet,
                    CachedPositions {
                        sequence,
                        set: Arc::clone(&set),
                    },
                );
            }
        }
        set
    }

    async fn read_position(
        &self,
        wallet: &Address,
        state: &VaultState,
    ) -> Result<UserPosition, LedgerError> {
        let vault = Contract::new(self.ledger.as_ref(), *state.address());
        let shares = vault.balance_of(wallet).await?;

        let assets = if shares.bits() == 0 {
            BigUint::from(0u32)
        } else {
            match (&state.vault.accounting, &state.share_metric) {
                (Accounting::PricePerShare, ShareMetric::PricePerShare(pps)) => {
                    &shares * pps / units::pow10(state.decimals)
                }
                _ => vault.convert_to_assets(&shares).await?,
            }
        };

        Ok(UserPosition {
            wallet: *wallet,
            vault: *state.address(),
            value: units::to_float(&assets, state.decimals),
            shares,
            assets,
            decimals: state.decimals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::StateAggregator;
    use crate::analytics::StaticYieldData;
    use crate::ledger::{ContractWrite, PaperLedger};
    use crate::models::{DisplayMetadata, VaultDescriptor};
    use crate::orchestrator::signer::{TransactionRequest, TransactionSigner};
    use crate::registry::VaultRegistry;

    const TOKEN: &str = "0x00000000000000000000000000000000000000d0";
    const VAULT_A: &str = "0x00000000000000000000000000000000000000a1";
    const VAULT_B: &str = "0x00000000000000000000000000000000000000b1";
    const WALLET: &str = "0x0000000000000000000000000000000000000777";

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    async fn setup(accounting: Accounting) -> (Arc<PaperLedger>, Arc<PortfolioSnapshot>) {
        let ledger = Arc::new(PaperLedger::new());
        ledger.add_token(addr(TOKEN), "USDC", 6);
        ledger.add_vault(addr(VAULT_A), addr(TOKEN));
        ledger.add_vault(addr(VAULT_B), addr(TOKEN));
        ledger.set_vault_totals(
            &addr(VAULT_A),
            BigUint::from(1_100_000_000u64),
            BigUint::from(1_000_000_000u64),
        );
        let descriptors = [VAULT_A, VAULT_B]
            .iter()
            .map(|v| VaultDescriptor {
                address: addr(v),
                name: v.to_string(),
                protocol: "paper".into(),
                asset_symbol: "USDC".into(),
                decimals: 6,
                accounting,
                donation_router: false,
                metadata: DisplayMetadata::default(),
            })
            .collect();
        let aggregator = StateAggregator::new(
            ledger.clone(),
            Arc::new(VaultRegistry::new(descriptors).unwrap()),
            Arc::new(StaticYieldData::default()),
        );
        let snapshot = aggregator.refresh().await;
        (ledger, snapshot)
    }

    async fn deposit(ledger: &PaperLedger, wallet: Address, vault: Address, amount: u64) {
        ledger.mint(&addr(TOKEN), &wallet, BigUint::from(amount));
        ledger.set_allowance(&addr(TOKEN), &wallet, &vault, BigUint::from(amount));
        ledger
            .send_transaction(TransactionRequest {
                from: wallet,
                to: vault,
                call: ContractWrite::Deposit {
                    assets: BigUint::from(amount),
                    receiver: wallet,
                },
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_positions_convert_shares_to_assets() {
        let (ledger, snapshot) = setup(Accounting::Supply).await;
        let wallet = addr(WALLET);
        // 110 assets at 1.1 assets per share
        deposit(&ledger, wallet, addr(VAULT_A), 110_000_000).await;
        assert_eq!(
            ledger.share_balance(&addr(VAULT_A), &wallet),
            BigUint::from(100_000_000u64)
        );

        let refresher = PositionRefresher::new(ledger.clone());
        let set = refresher.refresh_positions(wallet, &snapshot).await;
        assert_eq!(set.positions.len(), 2);
        let a = set.get(&addr(VAULT_A)).unwrap();
        assert_eq!(a.shares, BigUint::from(100_000_000u64));
        assert_eq!(a.assets, BigUint::from(110_000_000u64));
        assert!((a.value - 110.0).abs() < 1e-9);

        let b = set.get(&addr(VAULT_B)).unwrap();
        assert_eq!(b.value, 0.0);
        assert_eq!(refresher.positions(&wallet).unwrap().positions.len(), 2);
    }

    #[tokio::test]
    async fn test_price_accounting_uses_snapshot_price() {
        let (ledger, snapshot) = setup(Accounting::PricePerShare).await;
        let wallet = addr(WALLET);
        deposit(&ledger, wallet, addr(VAULT_A), 110_000_000).await;

        let refresher = PositionRefresher::new(ledger.clone());
        let before = ledger.reads().len();
        let set = refresher.refresh_positions(wallet, &snapshot).await;
        assert!(!ledger.reads()[before..]
            .iter()
            .any(|(_, m)| *m == "convertToAssets"));
        let a = set.get(&addr(VAULT_A)).unwrap();
        assert_eq!(a.assets, BigUint::from(110_000_000u64));
    }

    #[tokio::test]
    async fn test_zero_balance_skips_conversion_call() {
        let (ledger, snapshot) = setup(Accounting::ConvertToAssets).await;
        let refresher = PositionRefresher::new(ledger.clone());
        let before = ledger.reads().len();
        refresher.refresh_positions(addr(WALLET), &snapshot).await;

        let reads = ledger.reads();
        let new_reads = &reads[before..];
        assert_eq!(new_reads.len(), 2);
        assert!(new_reads.iter().all(|(_, m)| *m == "balanceOf"));
    }

    #[tokio::test]
    async fn test_failed_vault_is_excluded_not_zeroed() {
        let (ledger, snapshot) = setup(Accounting::Supply).await;
        ledger.fail_reads(addr(VAULT_B), LedgerError::Transport("timeout".into()));
        let refresher = PositionRefresher::new(ledger.clone());
        let set = refresher.refresh_positions(addr(WALLET), &snapshot).await;

        assert_eq!(set.positions.len(), 1);
        assert!(set.get(&addr(VAULT_B)).is_none());
        assert_eq!(set.failures.len(), 1);
        assert_eq!(set.snapshot_generation, snapshot.generation);
    }

    #[tokio::test]
    async fn test_unknown_wallet_has_no_cached_positions() {
        let (ledger, _snapshot) = setup(Accounting::Supply).await;
        let refresher = PositionRefresher::new(ledger);
        assert!(refresher.positions(&addr(WALLET)).is_none());
    }
}
