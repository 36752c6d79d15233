//! vault-hub
//!
//! Aggregates ERC-4626 vault state from a ledger endpoint into immutable
//! portfolio snapshots, reads wallet positions, computes yield metrics, and
//! orchestrates approve / deposit / withdraw transactions through an external
//! signer.

pub mod aggregator;
pub mod analytics;
pub mod config;
pub mod error;
pub mod hub;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod positions;
pub mod registry;
pub mod units;

pub use aggregator::StateAggregator;
pub use config::HubConfig;
pub use hub::VaultHub;
pub use orchestrator::TransactionOrchestrator;
pub use registry::VaultRegistry;
