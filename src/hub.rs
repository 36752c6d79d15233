//! Wiring: one `VaultHub` owns the registry, aggregator, position refresher
//! and orchestrator built from an explicit [`HubConfig`].

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::aggregator::StateAggregator;
use crate::analytics::{DonationSlice, YieldDataSource};
use crate::config::HubConfig;
use crate::error::{MetricError, MutationError};
use crate::ledger::{JsonRpcLedger, LedgerReader};
use crate::metrics;
use crate::models::{
    Address, MutationKind, MutationOutcome, MutationRequest, PortfolioSnapshot, PositionSet,
    VaultState,
};
use crate::orchestrator::{
    MutationEvent, OrchestratorConfig, RpcNodeSigner, TransactionOrchestrator, TransactionSigner,
};
use crate::positions::PositionRefresher;
use crate::registry::VaultRegistry;

pub struct VaultHub {
    registry: Arc<VaultRegistry>,
    yields: Arc<dyn YieldDataSource>,
    aggregator: Arc<StateAggregator>,
    positions: Arc<PositionRefresher>,
    orchestrator: TransactionOrchestrator,
}

impl VaultHub {
    pub fn new(
        registry: VaultRegistry,
        yields: Arc<dyn YieldDataSource>,
        ledger: Arc<dyn LedgerReader>,
        signer: Arc<dyn TransactionSigner>,
        config: OrchestratorConfig,
    ) -> Self {
        let registry = Arc::new(registry);
        let aggregator = Arc::new(StateAggregator::new(
            Arc::clone(&ledger),
            Arc::clone(&registry),
            Arc::clone(&yields),
        ));
        let positions = Arc::new(PositionRefresher::new(Arc::clone(&ledger)));
        let orchestrator = TransactionOrchestrator::new(
            ledger,
            signer,
            Arc::clone(&aggregator),
            Arc::clone(&positions),
            config,
        );
        Self {
            registry,
            yields,
            aggregator,
            positions,
            orchestrator,
        }
    }

    /// Build from config over caller-supplied ledger and signer.
    pub fn from_config(
        config: &HubConfig,
        ledger: Arc<dyn LedgerReader>,
        signer: Arc<dyn TransactionSigner>,
    ) -> anyhow::Result<Self> {
        let registry = config.registry().context("invalid vault registry")?;
        Ok(Self::new(
            registry,
            Arc::new(config.yield_data()),
            ledger,
            signer,
            config.orchestrator_config(),
        ))
    }

    /// Build against the configured JSON-RPC endpoint.
    pub fn connect(config: &HubConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let ledger = JsonRpcLedger::new(config.ledger.rpc_url.clone(), config.request_timeout())
            .context("failed to build ledger client")?;
        let signer = RpcNodeSigner::new(
            config.ledger.rpc_url.clone(),
            config.request_timeout(),
            config.receipt_poll_interval(),
        )
        .context("failed to build signer")?;
        info!(
            rpc_url = %config.ledger.rpc_url,
            vaults = config.vaults.len(),
            "vault hub connected"
        );
        Self::from_config(config, Arc::new(ledger), Arc::new(signer))
    }

    pub fn registry(&self) -> &VaultRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> &TransactionOrchestrator {
        &self.orchestrator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.orchestrator.subscribe()
    }

    /// Settle indeterminate mutations, then run one aggregation pass.
    pub async fn refresh(&self) -> Arc<PortfolioSnapshot> {
        self.orchestrator.reconcile_all().await;
        self.aggregator.refresh().await
    }

    pub fn snapshot(&self) -> Arc<PortfolioSnapshot> {
        self.aggregator.current()
    }

    /// Refresh positions against the latest snapshot, taking one first if
    /// none has been published yet.
    pub async fn refresh_wallet(&self, wallet: Address) -> Arc<PositionSet> {
        let mut snapshot = self.aggregator.current();
        if snapshot.generation == 0 {
            snapshot = self.aggregator.refresh().await;
        }
        self.positions.refresh_positions(wallet, &snapshot).await
    }

    pub fn positions(&self, wallet: &Address) -> Option<Arc<PositionSet>> {
        self.positions.positions(wallet)
    }

    /// Build a request with `amount` given in whole asset units ("250.5").
    pub fn request(
        &self,
        kind: MutationKind,
        vault: Address,
        wallet: Address,
        amount: &str,
    ) -> Result<MutationRequest, MutationError> {
        let descriptor = self
            .registry
            .get(&vault)
            .ok_or(MutationError::UnknownVault(vault))?;
        // the ledger-reported decimals win once a snapshot has seen the vault
        let decimals = self
            .aggregator
            .current()
            .get(&vault)
            .map(|s| s.decimals)
            .unwrap_or(descriptor.decimals);
        MutationRequest::from_units(kind, vault, wallet, amount, decimals)
    }

    pub async fn deposit(
        &self,
        vault: Address,
        wallet: Address,
        amount: &str,
    ) -> Result<MutationOutcome, MutationError> {
        let request = self.request(MutationKind::Deposit, vault, wallet, amount)?;
        self.orchestrator.submit(request).await
    }

    pub async fn withdraw(
        &self,
        vault: Address,
        wallet: Address,
        amount: &str,
    ) -> Result<MutationOutcome, MutationError> {
        let request = self.request(MutationKind::Withdraw, vault, wallet, amount)?;
        self.orchestrator.submit(request).await
    }

    pub fn best_vault(&self) -> Option<VaultState> {
        metrics::best_vault(&self.aggregator.current()).cloned()
    }

    pub fn projected_best_yield(&self, principal: f64, days: f64) -> Result<Option<f64>, MetricError> {
        metrics::projected_best_yield(&self.aggregator.current(), principal, days)
    }

    pub fn donations(&self) -> Vec<DonationSlice> {
        self.yields.donation_breakdown()
    }
}
