//! Hub configuration
//!
//! TOML file with the ledger endpoint, orchestrator timings, the vault list
//! and the static yield figures. Selected values can be overridden from the
//! environment (`VAULT_HUB_*`).

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::analytics::{DonationSlice, StaticYieldData};
use crate::error::RegistryError;
use crate::models::VaultDescriptor;
use crate::orchestrator::OrchestratorConfig;
use crate::registry::VaultRegistry;

pub const CONFIG_PATH_ENV: &str = "VAULT_HUB_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "vault-hub.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    /// Registry order is the order listed here.
    #[serde(default)]
    pub vaults: Vec<VaultConfig>,

    #[serde(default)]
    pub donations: Vec<DonationSlice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint. Usually supplied through `VAULT_HUB_RPC_URL`.
    #[serde(default)]
    pub rpc_url: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,

    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,

    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_confirmation_timeout_ms() -> u64 {
    120_000
}

fn default_receipt_poll_interval_ms() -> u64 {
    1_000
}

fn default_event_buffer() -> usize {
    256
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// One `[[vaults]]` entry: the descriptor plus its static apy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(flatten)]
    pub descriptor: VaultDescriptor,

    /// Percent. Omitted means no apy is known for the vault.
    #[serde(default)]
    pub apy: Option<f64>,
}

impl HubConfig {
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(contents).context("invalid hub config")?;
        Ok(config)
    }

    /// Load from a TOML file. Environment overrides are not applied.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("in {}", path.display()))
    }

    /// Load from `VAULT_HUB_CONFIG` (or `vault-hub.toml`), apply environment
    /// overrides and validate.
    pub fn from_env() -> anyhow::Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup; unparsable values are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("VAULT_HUB_RPC_URL").filter(|v| !v.trim().is_empty()) {
            self.ledger.rpc_url = url.trim().to_string();
        }
        if let Some(ms) = lookup("VAULT_HUB_REQUEST_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.ledger.request_timeout_ms = ms;
        }
        if let Some(ms) = lookup("VAULT_HUB_CONFIRMATION_TIMEOUT_MS").and_then(|v| v.parse().ok())
        {
            self.orchestrator.confirmation_timeout_ms = ms;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let url = self.ledger.rpc_url.as_str();
        if url.is_empty() {
            bail!("ledger.rpc_url is not set (config file or VAULT_HUB_RPC_URL)");
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("ledger.rpc_url must be an http(s) URL, got {:?}", url);
        }
        if self.ledger.request_timeout_ms == 0 {
            bail!("ledger.request_timeout_ms must be positive");
        }
        if self.orchestrator.confirmation_timeout_ms == 0 {
            bail!("orchestrator.confirmation_timeout_ms must be positive");
        }
        for v in &self.vaults {
            if let Some(apy) = v.apy {
                if !apy.is_finite() || apy < 0.0 {
                    bail!("vault {} has invalid apy {}", v.descriptor.address, apy);
                }
            }
        }
        for d in &self.donations {
            if !d.amount.is_finite() || d.amount < 0.0 {
                bail!("donation {:?} has invalid amount {}", d.category, d.amount);
            }
            if !(0.0..=100.0).contains(&d.percentage) {
                bail!("donation {:?} has invalid percentage {}", d.category, d.percentage);
            }
        }
        self.registry().context("invalid vault registry")?;
        Ok(())
    }

    pub fn registry(&self) -> Result<VaultRegistry, RegistryError> {
        VaultRegistry::new(self.vaults.iter().map(|v| v.descriptor.clone()).collect())
    }

    pub fn yield_data(&self) -> StaticYieldData {
        let apys: HashMap<_, _> = self
            .vaults
            .iter()
            .filter_map(|v| v.apy.map(|apy| (v.descriptor.address, apy)))
            .collect();
        StaticYieldData::new(apys, self.donations.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger.request_timeout_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.orchestrator.receipt_poll_interval_ms)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            confirmation_timeout: Duration::from_millis(self.orchestrator.confirmation_timeout_ms),
            event_buffer: self.orchestrator.event_buffer,
        }
    }
}
