//! End-to-end tests for the vault hub
//!
//! Drives the hub built from the shipped example config against the paper
//! ledger, which plays both the read endpoint and the signer.

use num_bigint::BigUint;
use std::path::PathBuf;
use std::sync::Arc;

use vault_hub::ledger::PaperLedger;
use vault_hub::metrics;
use vault_hub::models::{Address, MutationState};
use vault_hub::{HubConfig, VaultHub};

const SDAI: &str = "0x83F20F44975D03b1b09e64809B757c47f942BEeA";
const SUSDS: &str = "0xa3931d71877C0E7a3148CB7Eb4463524FEc27fbD";
const MORPHO: &str = "0x8ea3Fa89931d7fC9A401E31329BA378A1BE95664";
const SKY: &str = "0x213D250f688b699a5b42B7D27cA2db03CC29e5d4";

const DAI: &str = "0x00000000000000000000000000000000000000da";
const USDS: &str = "0x00000000000000000000000000000000000000d5";
const USDC: &str = "0x00000000000000000000000000000000000000c6";

const WALLET: &str = "0x000000000000000000000000000000000000beef";
const DRAGON_ROUTER: &str = "0x00000000000000000000000000000000000000dd";

fn addr(s: &str) -> Address {
    s.parse().unwrap()
}

fn wad(whole: u64) -> BigUint {
    BigUint::from(whole) * BigUint::from(10u64).pow(18)
}

fn usdc(whole: u64) -> BigUint {
    BigUint::from(whole) * BigUint::from(1_000_000u64)
}

fn example_config() -> HubConfig {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("config")
        .join("vault-hub.example.toml");
    let mut config = HubConfig::load(path).unwrap();
    config.orchestrator.confirmation_timeout_ms = 5_000;
    config.validate().unwrap();
    config
}

fn paper_chain() -> Arc<PaperLedger> {
    let ledger = Arc::new(PaperLedger::new());
    ledger.add_token(addr(DAI), "DAI", 18);
    ledger.add_token(addr(USDS), "USDS", 18);
    ledger.add_token(addr(USDC), "USDC", 6);

    ledger.add_vault(addr(SDAI), addr(DAI));
    ledger.add_vault(addr(SUSDS), addr(USDS));
    ledger.add_vault(addr(MORPHO), addr(USDC));
    ledger.add_vault(addr(SKY), addr(USDC));
    for v in [SDAI, SUSDS] {
        ledger.set_price_per_share_support(&addr(v), false);
    }
    for v in [MORPHO, SKY] {
        ledger.set_donation_router(&addr(v), addr(DRAGON_ROUTER));
    }

    ledger.set_vault_totals(&addr(SDAI), wad(1_050_000), wad(1_000_000));
    ledger.set_vault_totals(&addr(SUSDS), wad(2_000_000), wad(1_900_000));
    ledger.set_vault_totals(&addr(MORPHO), usdc(500_250), usdc(500_000));
    ledger.set_vault_totals(&addr(SKY), usdc(80_000), usdc(80_000));

    ledger.mint(&addr(DAI), &addr(WALLET), wad(10_000));
    ledger
}

fn hub(ledger: &Arc<PaperLedger>) -> VaultHub {
    VaultHub::from_config(&example_config(), ledger.clone(), ledger.clone()).unwrap()
}

#[tokio::test]
async fn test_snapshot_over_example_registry() {
    let ledger = paper_chain();
    let hub = hub(&ledger);

    let snapshot = hub.refresh().await;
    assert_eq!(snapshot.vaults.len(), 4);
    assert!(snapshot.failures.is_empty());
    assert_eq!(snapshot.vaults[0].vault.name, "Savings DAI");

    let expected_tvl = 1_050_000.0 + 2_000_000.0 + 500_250.0 + 80_000.0;
    assert!((snapshot.total_tvl - expected_tvl).abs() < 1e-3);
    assert_eq!(snapshot.total_tvl, metrics::total_tvl(&snapshot));

    let morpho = snapshot.get(&addr(MORPHO)).unwrap();
    assert!((morpho.yield_generated - 250.0).abs() < 1e-9);
    assert_eq!(morpho.asset_symbol, "USDC");
    assert_eq!(morpho.donation_address, Some(addr(DRAGON_ROUTER)));
    assert_eq!(snapshot.get(&addr(SDAI)).unwrap().donation_address, None);
    assert_eq!(snapshot.get(&addr(SKY)).unwrap().yield_generated, 0.0);

    let sdai = snapshot.get(&addr(SDAI)).unwrap();
    assert!((sdai.price_per_share().unwrap() - 1.05).abs() < 1e-12);

    assert_eq!(*hub.best_vault().unwrap().address(), addr(SUSDS));
    let projected = hub.projected_best_yield(1000.0, 365.0).unwrap().unwrap();
    assert!((projected - 85.0).abs() < 0.01);
}

#[tokio::test]
async fn test_failed_vault_drops_out_and_best_moves() {
    let ledger = paper_chain();
    let hub = hub(&ledger);
    ledger.fail_reads(
        addr(SUSDS),
        vault_hub::error::LedgerError::Transport("connection refused".into()),
    );

    let snapshot = hub.refresh().await;
    assert_eq!(snapshot.vaults.len(), 3);
    assert_eq!(snapshot.failures.len(), 1);
    assert_eq!(*hub.best_vault().unwrap().address(), addr(SDAI));

    ledger.clear_read_fault(&addr(SUSDS));
    let snapshot = hub.refresh().await;
    assert_eq!(snapshot.vaults.len(), 4);
    assert_eq!(*hub.best_vault().unwrap().address(), addr(SUSDS));
}

#[tokio::test]
async fn test_deposit_then_withdraw_updates_positions() {
    let ledger = paper_chain();
    let hub = hub(&ledger);
    let wallet = addr(WALLET);
    hub.refresh().await;

    let outcome = hub.deposit(addr(SDAI), wallet, "1050").await.unwrap();
    assert!(outcome.approval_tx.is_some());
    assert_eq!(ledger.count_sent("approve"), 1);
    assert_eq!(
        ledger.allowance(&addr(DAI), &wallet, &addr(SDAI)),
        BigUint::from(0u32)
    );
    assert_eq!(
        hub.orchestrator().state(wallet, addr(SDAI)),
        MutationState::Succeeded
    );

    // 1050 DAI at 1.05 per share
    let positions = hub.positions(&wallet).unwrap();
    let position = positions.get(&addr(SDAI)).unwrap();
    assert_eq!(position.shares, wad(1_000));
    assert!((position.value - 1050.0).abs() < 1e-6);
    assert!((metrics::portfolio_value(&positions) - 1050.0).abs() < 1e-6);

    hub.withdraw(addr(SDAI), wallet, "500.5").await.unwrap();
    assert_eq!(ledger.count_sent("approve"), 1);
    let positions = hub.positions(&wallet).unwrap();
    assert!((positions.get(&addr(SDAI)).unwrap().value - 549.5).abs() < 1e-6);
    assert_eq!(
        ledger.token_balance(&addr(DAI), &wallet),
        wad(10_000) - wad(1050) + BigUint::from(5_005u64) * BigUint::from(10u64).pow(17)
    );
}

#[tokio::test]
async fn test_invalid_amounts_are_rejected_before_signing() {
    let ledger = paper_chain();
    let hub = hub(&ledger);
    let wallet = addr(WALLET);

    assert!(hub.deposit(addr(SDAI), wallet, "0").await.is_err());
    assert!(hub.deposit(addr(SDAI), wallet, "-5").await.is_err());
    assert!(hub.deposit(addr(MORPHO), wallet, "1.0000001").await.is_err());
    assert!(hub
        .deposit(addr("0x0000000000000000000000000000000000000bad"), wallet, "1")
        .await
        .is_err());
    assert!(ledger.sent_transactions().is_empty());
}

#[tokio::test]
async fn test_donations_from_config() {
    let ledger = paper_chain();
    let hub = hub(&ledger);
    let donations = hub.donations();
    assert_eq!(donations.len(), 4);
    assert_eq!(donations[0].category, "Open Source");
    let total: f64 = donations.iter().map(|d| d.percentage).sum();
    assert!((total - 100.0).abs() < 1e-9);
}
