//! Portfolio metrics. Pure functions over snapshots and positions.

use num_bigint::BigUint;

use crate::error::MetricError;
use crate::models::{PortfolioSnapshot, PositionSet, ShareMetric, VaultState};
use crate::units;

const DAYS_PER_YEAR: f64 = 365.0;

fn check_input(field: &'static str, value: f64) -> Result<f64, MetricError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(MetricError::InvalidInput { field, value })
    }
}

/// Simple-interest projection: principal * apy% * days / 365.
pub fn projected_yield(principal: f64, apy_percent: f64, days: f64) -> Result<f64, MetricError> {
    let principal = check_input("principal", principal)?;
    let apy_percent = check_input("apy", apy_percent)?;
    let days = check_input("days", days)?;
    Ok(principal * apy_percent * days / (DAYS_PER_YEAR * 100.0))
}

/// Vault with the highest apy; the earliest in registry order wins ties.
pub fn best_vault(snapshot: &PortfolioSnapshot) -> Option<&VaultState> {
    snapshot.vaults.iter().fold(None, |best: Option<&VaultState>, v| match best {
        Some(b) if b.apy >= v.apy => Some(b),
        _ => Some(v),
    })
}

/// Projection at the best vault's apy. `Ok(None)` when the snapshot is empty.
pub fn projected_best_yield(
    snapshot: &PortfolioSnapshot,
    principal: f64,
    days: f64,
) -> Result<Option<f64>, MetricError> {
    match best_vault(snapshot) {
        Some(best) => projected_yield(principal, best.apy, days).map(Some),
        None => {
            // validate anyway so bad input is never silently accepted
            check_input("principal", principal)?;
            check_input("days", days)?;
            Ok(None)
        }
    }
}

pub fn total_tvl(snapshot: &PortfolioSnapshot) -> f64 {
    sum_tvl(&snapshot.vaults)
}

pub(crate) fn sum_tvl(vaults: &[VaultState]) -> f64 {
    vaults.iter().map(|v| v.tvl).sum()
}

pub fn total_yield_generated(snapshot: &PortfolioSnapshot) -> f64 {
    snapshot.vaults.iter().map(|v| v.yield_generated).sum()
}

/// Sum of position values in asset terms. Mixed assets are summed at face value.
pub fn portfolio_value(positions: &PositionSet) -> f64 {
    positions.positions.iter().map(|p| p.value).sum()
}

/// Yield generated by a vault under its own accounting convention.
///
/// Supply accounting: `max(totalAssets - totalSupply, 0)`.
/// Price accounting: `max(assetsPerShare - 1, 0) * totalAssets`.
pub fn yield_generated(total_assets: &BigUint, metric: &ShareMetric, decimals: u8) -> f64 {
    match metric {
        ShareMetric::TotalSupply(supply) => {
            if total_assets > supply {
                units::to_float(&(total_assets - supply), decimals)
            } else {
                0.0
            }
        }
        ShareMetric::PricePerShare(pps) => {
            let per_share = units::to_float(pps, decimals);
            (per_share - 1.0).max(0.0) * units::to_float(total_assets, decimals)
        }
    }
}
