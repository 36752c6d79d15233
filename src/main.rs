//! vault-hub CLI
//!
//! Reads vault state, wallet positions and yield projections, and submits
//! deposits / withdrawals through a node-managed signer. Output is JSON on
//! stdout; logs go to stderr.
//!
//! Environment Variables:
//!   VAULT_HUB_CONFIG - Path to TOML config file (default: vault-hub.toml)
//!   VAULT_HUB_RPC_URL - JSON-RPC endpoint, overrides the config file
//!   VAULT_HUB_CONFIRMATION_TIMEOUT_MS - Confirmation wait before a mutation turns indeterminate
//!   RUST_LOG - Log filter (default: vault_hub=info)

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vault_hub::config::{HubConfig, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use vault_hub::hub::VaultHub;
use vault_hub::metrics;
use vault_hub::models::Address;

#[derive(Parser, Debug)]
#[command(name = "vault-hub")]
#[command(about = "ERC-4626 vault portfolio reader and deposit/withdraw orchestrator")]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, env = CONFIG_PATH_ENV, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read every registered vault and print the portfolio snapshot
    Snapshot,
    /// Print a wallet's position in every vault
    Positions {
        #[arg(long)]
        wallet: Address,
    },
    /// Project simple-interest yield, at --apy or the best vault's apy
    Project {
        #[arg(long)]
        principal: f64,
        #[arg(long)]
        days: f64,
        #[arg(long)]
        apy: Option<f64>,
    },
    /// Deposit assets into a vault, approving first if needed
    Deposit(MutationArgs),
    /// Withdraw assets from a vault
    Withdraw(MutationArgs),
    /// Print the donation breakdown
    Donations,
}

#[derive(Args, Debug)]
struct MutationArgs {
    #[arg(long)]
    vault: Address,
    #[arg(long)]
    wallet: Address,
    /// Amount in asset units, e.g. "250.5"
    #[arg(long)]
    amount: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();
    let mut config = HubConfig::load(&cli.config)?;
    config.apply_env_overrides();

    match cli.command {
        Command::Donations => print_json(&config.donations),
        Command::Project {
            principal,
            days,
            apy: Some(apy),
        } => {
            let projected = metrics::projected_yield(principal, apy, days)?;
            print_json(&json!({
                "principal": principal,
                "days": days,
                "apy": apy,
                "projected_yield": projected,
            }))
        }
        command => run_connected(&config, command).await,
    }
}

async fn run_connected(config: &HubConfig, command: Command) -> Result<()> {
    let hub = VaultHub::connect(config)?;

    match command {
        Command::Snapshot => {
            let snapshot = hub.refresh().await;
            print_json(&json!({
                "snapshot": &*snapshot,
                "best_vault": metrics::best_vault(&snapshot).map(|v| v.address()),
                "total_yield_generated": metrics::total_yield_generated(&snapshot),
            }))
        }
        Command::Positions { wallet } => {
            hub.refresh().await;
            let positions = hub.refresh_wallet(wallet).await;
            print_json(&json!({
                "positions": &*positions,
                "portfolio_value": metrics::portfolio_value(&positions),
            }))
        }
        Command::Project {
            principal, days, ..
        } => {
            let snapshot = hub.refresh().await;
            let best = metrics::best_vault(&snapshot);
            let projected = metrics::projected_best_yield(&snapshot, principal, days)?;
            print_json(&json!({
                "principal": principal,
                "days": days,
                "vault": best.map(|v| v.address()),
                "apy": best.map(|v| v.apy),
                "projected_yield": projected,
            }))
        }
        Command::Deposit(args) => {
            hub.refresh().await;
            info!(vault = %args.vault, wallet = %args.wallet, amount = %args.amount, "depositing");
            let outcome = hub
                .deposit(args.vault, args.wallet, &args.amount)
                .await
                .context("deposit failed")?;
            print_json(&outcome)
        }
        Command::Withdraw(args) => {
            hub.refresh().await;
            info!(vault = %args.vault, wallet = %args.wallet, amount = %args.amount, "withdrawing");
            let outcome = hub
                .withdraw(args.vault, args.wallet, &args.amount)
                .await
                .context("withdraw failed")?;
            print_json(&outcome)
        }
        Command::Donations => print_json(&hub.donations()),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vault_hub=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_env() {
    let _ = dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let env_file = manifest_dir.join(".env");
    if env_file.exists() {
        let _ = dotenv::from_path(&env_file);
    }
}
