//! Static, ordered vault registry.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::models::{Address, VaultDescriptor};

/// Largest decimals for which 10^decimals still fits a uint256 share unit.
const MAX_DECIMALS: u8 = 36;

/// Immutable list of vaults known to the hub. Order is display order and the
/// tie-break order for metrics.
#[derive(Debug, Clone)]
pub struct VaultRegistry {
    vaults: Arc<[VaultDescriptor]>,
}

impl VaultRegistry {
    pub fn new(vaults: Vec<VaultDescriptor>) -> Result<Self, RegistryError> {
        if vaults.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut seen = HashSet::with_capacity(vaults.len());
        for v in &vaults {
            if !seen.insert(v.address) {
                return Err(RegistryError::DuplicateVault(v.address));
            }
            if v.name.trim().is_empty() {
                return Err(RegistryError::MissingName(v.address));
            }
            if v.decimals > MAX_DECIMALS {
                return Err(RegistryError::UnsupportedDecimals {
                    vault: v.address,
                    decimals: v.decimals,
                });
            }
        }

        Ok(Self {
            vaults: vaults.into(),
        })
    }

    pub fn descriptors(&self) -> &[VaultDescriptor] {
        &self.vaults
    }

    pub fn get(&self, address: &Address) -> Option<&VaultDescriptor> {
        self.vaults.iter().find(|v| &v.address == address)
    }

    pub fn len(&self) -> usize {
        self.vaults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vaults.is_empty()
    }
}
