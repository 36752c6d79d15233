//! Vault state aggregation.
//!
//! One `refresh()` is one pass: every registered vault is read concurrently,
//! failures are isolated per vault, and the surviving states are published as
//! a single immutable snapshot. Readers always see a complete snapshot; a pass
//! that finishes late never replaces a newer one.

use arc_swap::ArcSwap;
use chrono::Utc;
use futures_util::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::analytics::YieldDataSource;
use crate::error::LedgerError;
use crate::ledger::{Contract, LedgerReader};
use crate::metrics;
use crate::models::{
    Accounting, Address, PortfolioSnapshot, ShareMetric, VaultDescriptor, VaultReadFailure,
    VaultState,
};
use crate::registry::VaultRegistry;
use crate::units;

pub struct StateAggregator {
    ledger: Arc<dyn LedgerReader>,
    registry: Arc<VaultRegistry>,
    yields: Arc<dyn YieldDataSource>,
    current: ArcSwap<PortfolioSnapshot>,
    generation: AtomicU64,
}

impl StateAggregator {
    pub fn new(
        ledger: Arc<dyn LedgerReader>,
        registry: Arc<VaultRegistry>,
        yields: Arc<dyn YieldDataSource>,
    ) -> Self {
        Self {
            ledger,
            registry,
            yields,
            current: ArcSwap::from_pointee(PortfolioSnapshot::empty()),
            generation: AtomicU64::new(0),
        }
    }

    /// Latest published snapshot (generation 0 before the first pass).
    pub fn current(&self) -> Arc<PortfolioSnapshot> {
        self.current.load_full()
    }

    pub fn registry(&self) -> &Arc<VaultRegistry> {
        &self.registry
    }

    /// Run one aggregation pass and return the snapshot it produced.
    pub async fn refresh(&self) -> Arc<PortfolioSnapshot> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let descriptors = self.registry.descriptors();

        let results = join_all(descriptors.iter().map(|d| self.read_vault(d))).await;

        let mut vaults = Vec::with_capacity(descriptors.len());
        let mut failures = Vec::new();
        for (descriptor, result) in descriptors.iter().zip(results) {
            match result {
                Ok(state) => vaults.push(state),
                Err(e) => {
                    warn!(
                        vault = %descriptor.address,
                        name = %descriptor.name,
                        error = %e,
                        "vault read failed; excluded from snapshot"
                    );
                    failures.push(VaultReadFailure {
                        vault: descriptor.address,
                        name: descriptor.name.clone(),
                        retryable: e.is_retryable(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let snapshot = Arc::new(PortfolioSnapshot {
            generation,
            captured_at: Utc::now(),
            total_tvl: metrics::sum_tvl(&vaults),
            vaults,
            failures,
        });

        self.publish(&snapshot);
        info!(
            generation,
            vaults = snapshot.vaults.len(),
            failed = snapshot.failures.len(),
            total_tvl = snapshot.total_tvl,
            "portfolio snapshot refreshed"
        );
        snapshot
    }

    fn publish(&self, snapshot: &Arc<PortfolioSnapshot>) {
        let previous = self.current.rcu(|current| {
            if current.generation > snapshot.generation {
                Arc::clone(current)
            } else {
                Arc::clone(snapshot)
            }
        });
        if previous.generation > snapshot.generation {
            debug!(
                generation = snapshot.generation,
                published = previous.generation,
                "stale pass not published"
            );
        }
    }

    async fn read_vault(&self, descriptor: &VaultDescriptor) -> Result<VaultState, LedgerError> {
        let vault = Contract::new(self.ledger.as_ref(), descriptor.address);

        let (total_assets, underlying) = tokio::try_join!(vault.total_assets(), vault.asset())?;

        let token = Contract::new(self.ledger.as_ref(), underlying);
        let (asset_symbol, decimals) = tokio::try_join!(token.symbol(), token.decimals())?;

        if decimals != descriptor.decimals {
            warn!(
                vault = %descriptor.address,
                configured = descriptor.decimals,
                reported = decimals,
                "underlying decimals differ from registry; using reported value"
            );
        }

        // one share is priced at the reported precision
        let (share_metric, donation_address) = tokio::try_join!(
            read_share_metric(&vault, descriptor.accounting, decimals),
            read_donation_address(&vault, descriptor),
        )?;

        let apy = self.yields.apy(descriptor).unwrap_or_else(|| {
            debug!(vault = %descriptor.address, "no apy supplied; using 0");
            0.0
        });

        Ok(VaultState {
            vault: descriptor.clone(),
            underlying,
            asset_symbol,
            decimals,
            tvl: units::to_float(&total_assets, decimals),
            yield_generated: metrics::yield_generated(&total_assets, &share_metric, decimals),
            total_assets,
            share_metric,
            apy,
            donation_address,
        })
    }
}

async fn read_share_metric(
    vault: &Contract<'_>,
    accounting: Accounting,
    decimals: u8,
) -> Result<ShareMetric, LedgerError> {
    match accounting {
        Accounting::Supply => vault.total_supply().await.map(ShareMetric::TotalSupply),
        Accounting::PricePerShare => vault.price_per_share().await.map(ShareMetric::PricePerShare),
        Accounting::ConvertToAssets => vault
            .assets_per_share(decimals)
            .await
            .map(ShareMetric::PricePerShare),
    }
}

async fn read_donation_address(
    vault: &Contract<'_>,
    descriptor: &VaultDescriptor,
) -> Result<Option<Address>, LedgerError> {
    if !descriptor.donation_router {
        return Ok(None);
    }
    vault.dragon_router().await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::StaticYieldData;
    use crate::ledger::PaperLedger;
    use crate::models::DisplayMetadata;
    use num_bigint::BigUint;

    const TOKEN: &str = "0x00000000000000000000000000000000000000d0";
    const VAULT_A: &str = "0x00000000000000000000000000000000000000a1";
    const VAULT_B: &str = "0x00000000000000000000000000000000000000b1";
    const VAULT_C: &str = "0x00000000000000000000000000000000000000c1";
    const ROUTER: &str = "0x00000000000000000000000000000000000000d7";

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn descriptor(address: &str, accounting: Accounting) -> VaultDescriptor {
        VaultDescriptor {
            address: addr(address),
            name: address.to_string(),
            protocol: "paper".into(),
            asset_symbol: "USDC".into(),
            decimals: 6,
            accounting,
            donation_router: false,
            metadata: DisplayMetadata::default(),
        }
    }

    fn setup(accounting: Accounting) -> (Arc<PaperLedger>, StateAggregator) {
        let ledger = Arc::new(PaperLedger::new());
        ledger.add_token(addr(TOKEN), "USDC", 6);
        for v in [VAULT_A, VAULT_B, VAULT_C] {
            ledger.add_vault(addr(v), addr(TOKEN));
        }
        ledger.set_vault_totals(
            &addr(VAULT_A),
            BigUint::from(1_100_000_000u64),
            BigUint::from(1_000_000_000u64),
        );
        ledger.set_vault_totals(
            &addr(VAULT_B),
            BigUint::from(2_000_000u64),
            BigUint::from(2_000_000u64),
        );

        let registry = Arc::new(
            VaultRegistry::new(vec![
                descriptor(VAULT_A, accounting),
                descriptor(VAULT_B, accounting),
                descriptor(VAULT_C, accounting),
            ])
            .unwrap(),
        );
        let yields = Arc::new(
            StaticYieldData::default()
                .with_apy(addr(VAULT_A), 7.2)
                .with_apy(addr(VAULT_B), 8.5),
        );
        let aggregator = StateAggregator::new(ledger.clone(), registry, yields);
        (ledger, aggregator)
    }

    #[tokio::test]
    async fn test_refresh_reads_all_vaults_in_order() {
        let (_ledger, aggregator) = setup(Accounting::Supply);
        assert_eq!(aggregator.current().generation, 0);

        let snapshot = aggregator.refresh().await;
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.vaults.len(), 3);
        assert!(snapshot.failures.is_empty());
        let order: Vec<_> = snapshot.vaults.iter().map(|v| *v.address()).collect();
        assert_eq!(order, vec![addr(VAULT_A), addr(VAULT_B), addr(VAULT_C)]);

        let a = snapshot.get(&addr(VAULT_A)).unwrap();
        assert!((a.tvl - 1100.0).abs() < 1e-9);
        assert!((a.yield_generated - 100.0).abs() < 1e-9);
        assert_eq!(a.apy, 7.2);
        assert_eq!(a.asset_symbol, "USDC");
        assert!((snapshot.total_tvl - 1102.0).abs() < 1e-9);
        assert_eq!(aggregator.current().generation, 1);
    }

    #[tokio::test]
    async fn test_single_failure_excludes_only_that_vault() {
        let (ledger, aggregator) = setup(Accounting::Supply);
        ledger.fail_reads(addr(VAULT_B), LedgerError::Transport("connection reset".into()));

        let snapshot = aggregator.refresh().await;
        assert_eq!(snapshot.vaults.len(), 2);
        assert!(snapshot.get(&addr(VAULT_B)).is_none());
        assert_eq!(snapshot.failures.len(), 1);
        assert_eq!(snapshot.failures[0].vault, addr(VAULT_B));
        assert!(snapshot.failures[0].retryable);
        assert!((snapshot.total_tvl - metrics::total_tvl(&snapshot)).abs() < 1e-12);
        assert!((snapshot.total_tvl - 1100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_underlying_failure_excludes_vault() {
        let (ledger, aggregator) = setup(Accounting::Supply);
        ledger.fail_reads(addr(TOKEN), LedgerError::Revert("paused".into()));
        let snapshot = aggregator.refresh().await;
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.failures.len(), 3);
        assert!(snapshot.failures.iter().all(|f| !f.retryable));
    }

    #[tokio::test]
    async fn test_price_accounting_reads_price_per_share() {
        let (ledger, aggregator) = setup(Accounting::PricePerShare);
        let snapshot = aggregator.refresh().await;
        let a = snapshot.get(&addr(VAULT_A)).unwrap();
        assert_eq!(a.price_per_share(), Some(1.1));
        assert!((a.yield_generated - 0.1 * 1100.0).abs() < 1e-6);

        let reads = ledger.reads();
        assert!(reads.iter().any(|(_, m)| *m == "pricePerShare"));
        assert!(!reads.iter().any(|(_, m)| *m == "totalSupply"));
    }

    #[tokio::test]
    async fn test_convert_to_assets_accounting_without_price_per_share() {
        let (ledger, aggregator) = setup(Accounting::ConvertToAssets);
        for v in [VAULT_A, VAULT_B, VAULT_C] {
            ledger.set_price_per_share_support(&addr(v), false);
        }
        let snapshot = aggregator.refresh().await;
        assert_eq!(snapshot.vaults.len(), 3);
        assert_eq!(snapshot.get(&addr(VAULT_A)).unwrap().price_per_share(), Some(1.1));
    }

    #[tokio::test]
    async fn test_convert_to_assets_prices_one_share_at_reported_decimals() {
        let (ledger, _) = setup(Accounting::ConvertToAssets);
        let mut a = descriptor(VAULT_A, Accounting::ConvertToAssets);
        a.decimals = 18;
        let registry = Arc::new(VaultRegistry::new(vec![a]).unwrap());
        let aggregator =
            StateAggregator::new(ledger, registry, Arc::new(StaticYieldData::default()));

        let snapshot = aggregator.refresh().await;
        let a = snapshot.get(&addr(VAULT_A)).unwrap();
        assert_eq!(a.decimals, 6);
        assert_eq!(
            a.share_metric,
            ShareMetric::PricePerShare(BigUint::from(1_100_000u64))
        );
        assert_eq!(a.price_per_share(), Some(1.1));
        assert!((a.yield_generated - 110.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_donation_address_read_only_for_router_strategies() {
        let (ledger, _) = setup(Accounting::Supply);
        ledger.set_donation_router(&addr(VAULT_A), addr(ROUTER));
        let mut a = descriptor(VAULT_A, Accounting::Supply);
        a.donation_router = true;
        let registry = Arc::new(
            VaultRegistry::new(vec![a, descriptor(VAULT_B, Accounting::Supply)]).unwrap(),
        );
        let aggregator =
            StateAggregator::new(ledger.clone(), registry, Arc::new(StaticYieldData::default()));

        let snapshot = aggregator.refresh().await;
        assert_eq!(snapshot.vaults.len(), 2);
        assert_eq!(
            snapshot.get(&addr(VAULT_A)).unwrap().donation_address,
            Some(addr(ROUTER))
        );
        assert_eq!(snapshot.get(&addr(VAULT_B)).unwrap().donation_address, None);
        let router_reads: Vec<_> = ledger
            .reads()
            .into_iter()
            .filter(|(_, m)| *m == "dragonRouter")
            .collect();
        assert_eq!(router_reads, vec![(addr(VAULT_A), "dragonRouter")]);
    }

    #[tokio::test]
    async fn test_missing_router_excludes_opted_in_vault() {
        let (ledger, _) = setup(Accounting::Supply);
        let mut a = descriptor(VAULT_A, Accounting::Supply);
        a.donation_router = true;
        let registry = Arc::new(
            VaultRegistry::new(vec![a, descriptor(VAULT_B, Accounting::Supply)]).unwrap(),
        );
        let aggregator =
            StateAggregator::new(ledger, registry, Arc::new(StaticYieldData::default()));

        let snapshot = aggregator.refresh().await;
        assert_eq!(snapshot.vaults.len(), 1);
        assert_eq!(snapshot.failures[0].vault, addr(VAULT_A));
    }

    #[tokio::test]
    async fn test_malformed_symbol_excludes_only_that_vault() {
        const OTHER_TOKEN: &str = "0x00000000000000000000000000000000000000d1";
        let (ledger, _) = setup(Accounting::Supply);
        ledger.add_token(addr(OTHER_TOKEN), "BAD", 6);
        ledger.add_vault(addr(VAULT_C), addr(OTHER_TOKEN));

        // dynamic string whose offset word is near u64::MAX
        let mut data = vec![0u8; 24];
        data.extend_from_slice(&[0xff; 8]);
        data.extend(vec![0u8; 32]);
        ledger.set_raw_return(addr(OTHER_TOKEN), "symbol", data);

        let snapshot = aggregator_over(&ledger).refresh().await;
        assert_eq!(snapshot.vaults.len(), 2);
        assert!(snapshot.get(&addr(VAULT_C)).is_none());
        assert_eq!(snapshot.failures.len(), 1);
        assert_eq!(snapshot.failures[0].vault, addr(VAULT_C));
    }

    fn aggregator_over(ledger: &Arc<PaperLedger>) -> StateAggregator {
        let registry = Arc::new(
            VaultRegistry::new(vec![
                descriptor(VAULT_A, Accounting::Supply),
                descriptor(VAULT_B, Accounting::Supply),
                descriptor(VAULT_C, Accounting::Supply),
            ])
            .unwrap(),
        );
        StateAggregator::new(
            ledger.clone(),
            registry,
            Arc::new(StaticYieldData::default()),
        )
    }

    #[tokio::test]
    async fn test_each_pass_recomputes_from_scratch() {
        let (ledger, aggregator) = setup(Accounting::Supply);
        let first = aggregator.refresh().await;
        assert_eq!(first.vaults.len(), 3);

        ledger.fail_reads(addr(VAULT_A), LedgerError::Revert("boom".into()));
        let second = aggregator.refresh().await;
        assert_eq!(second.generation, 2);
        assert_eq!(second.vaults.len(), 2);
        assert!((second.total_tvl - 2.0).abs() < 1e-9);

        // the earlier snapshot is untouched
        assert_eq!(first.vaults.len(), 3);
        assert_eq!(aggregator.current().generation, 2);
    }

    #[tokio::test]
    async fn test_stale_pass_is_not_published() {
        let (_ledger, aggregator) = setup(Accounting::Supply);
        aggregator.refresh().await;
        aggregator.refresh().await;

        let stale = Arc::new(PortfolioSnapshot::empty());
        aggregator.publish(&stale);
        assert_eq!(aggregator.current().generation, 2);
        assert_eq!(aggregator.current().vaults.len(), 3);
    }
}
