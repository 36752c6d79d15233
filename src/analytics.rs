//! Injected yield analytics: APY per vault and the donation breakdown.
//!
//! Real APY needs historical share-price data and is out of scope for the
//! hub; whatever computes it plugs in through [`YieldDataSource`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{Address, VaultDescriptor};

/// One category of donated yield.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationSlice {
    pub category: String,
    pub amount: f64,
    pub percentage: f64,
}

pub trait YieldDataSource: Send + Sync {
    /// Annual percentage yield, in percent (8.5 = 8.5%).
    fn apy(&self, vault: &VaultDescriptor) -> Option<f64>;

    fn donation_breakdown(&self) -> Vec<DonationSlice>;
}

/// Fixed figures from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticYieldData {
    apys: HashMap<Address, f64>,
    donations: Vec<DonationSlice>,
}

impl StaticYieldData {
    pub fn new(apys: HashMap<Address, f64>, donations: Vec<DonationSlice>) -> Self {
        Self { apys, donations }
    }

    pub fn with_apy(mut self, vault: Address, apy: f64) -> Self {
        self.apys.insert(vault, apy);
        self
    }
}

impl YieldDataSource for StaticYieldData {
    fn apy(&self, vault: &VaultDescriptor) -> Option<f64> {
        self.apys.get(&vault.address).copied()
    }

    fn donation_breakdown(&self) -> Vec<DonationSlice> {
        self.donations.clone()
    }
}
