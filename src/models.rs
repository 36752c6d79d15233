use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::MutationError;
use crate::units::{self, decimal_string};

/// 20-byte ledger account or contract address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0; 20]);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// 0x-prefixed lowercase hex, the form used in JSON-RPC payloads.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| format!("address must start with 0x: {:?}", s))?;
        if body.len() != 40 {
            return Err(format!("address must be 40 hex chars: {:?}", s));
        }
        let bytes = hex::decode(body).map_err(|e| format!("invalid address {:?}: {}", s, e))?;
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// 32-byte transaction hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash([u8; 32]);

impl TxHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl FromStr for TxHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.trim().trim_start_matches("0x");
        if body.len() != 64 {
            return Err(format!("transaction hash must be 64 hex chars: {:?}", s));
        }
        let bytes = hex::decode(body).map_err(|e| format!("invalid tx hash {:?}: {}", s, e))?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TxHash({})", self)
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// How a vault's generated yield is derived. Fixed per vault; never mixed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accounting {
    /// yield = max(totalAssets - totalSupply, 0); assumes shares minted 1:1 at inception.
    Supply,
    /// yield = (pricePerShare - 1) * totalAssets, reading `pricePerShare()`.
    PricePerShare,
    /// Same as `PricePerShare`, with the price read as `convertToAssets(1 share)`.
    #[default]
    ConvertToAssets,
}

/// Presentation hints carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Static description of a registered vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultDescriptor {
    pub address: Address,
    pub name: String,
    pub protocol: String,
    pub asset_symbol: String,
    pub decimals: u8,
    #[serde(default)]
    pub accounting: Accounting,
    /// Strategy exposes `dragonRouter()`, the address its yield is donated to.
    #[serde(default)]
    pub donation_router: bool,
    #[serde(default)]
    pub metadata: DisplayMetadata,
}

/// The share-side quantity a vault was read with. One variant per accounting family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ShareMetric {
    TotalSupply(#[serde(with = "decimal_string")] BigUint),
    /// Assets (raw units) per one whole share.
    PricePerShare(#[serde(with = "decimal_string")] BigUint),
}

/// One vault as observed by a single aggregation pass.
#[derive(Debug, Clone, Serialize)]
pub struct VaultState {
    pub vault: VaultDescriptor,
    pub underlying: Address,
    /// Symbol and decimals as reported by the underlying token contract.
    pub asset_symbol: String,
    pub decimals: u8,
    #[serde(with = "decimal_string")]
    pub total_assets: BigUint,
    pub share_metric: ShareMetric,
    pub tvl: f64,
    pub yield_generated: f64,
    pub apy: f64,
    /// Donation recipient, read only for `donation_router` strategies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub donation_address: Option<Address>,
}

impl VaultState {
    pub fn address(&self) -> &Address {
        &self.vault.address
    }

    /// Assets per whole share as a float, when the vault was read by price.
    pub fn price_per_share(&self) -> Option<f64> {
        match &self.share_metric {
            ShareMetric::PricePerShare(pps) => Some(units::to_float(pps, self.decimals)),
            ShareMetric::TotalSupply(_) => None,
        }
    }
}

/// A vault whose reads failed during a pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VaultReadFailure {
    pub vault: Address,
    pub name: String,
    pub error: String,
    pub retryable: bool,
}

/// Immutable result of one aggregation pass.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSnapshot {
    /// Pass number; later passes have larger generations.
    pub generation: u64,
    pub captured_at: DateTime<Utc>,
    /// Successfully read vaults, in registry order.
    pub vaults: Vec<VaultState>,
    pub total_tvl: f64,
    pub failures: Vec<VaultReadFailure>,
}

impl PortfolioSnapshot {
    /// Placeholder published before the first pass completes.
    pub fn empty() -> Self {
        Self {
            generation: 0,
            captured_at: Utc::now(),
            vaults: Vec::new(),
            total_tvl: 0.0,
            failures: Vec::new(),
        }
    }

    pub fn get(&self, vault: &Address) -> Option<&VaultState> {
        self.vaults.iter().find(|v| v.address() == vault)
    }

    pub fn is_empty(&self) -> bool {
        self.vaults.is_empty()
    }
}

/// A wallet's holding in one vault.
#[derive(Debug, Clone, Serialize)]
pub struct UserPosition {
    pub wallet: Address,
    pub vault: Address,
    #[serde(with = "decimal_string")]
    pub shares: BigUint,
    #[serde(with = "decimal_string")]
    pub assets: BigUint,
    pub decimals: u8,
    /// `assets` in asset terms.
    pub value: f64,
}

/// Result of one position refresh for one wallet.
#[derive(Debug, Clone, Serialize)]
pub struct PositionSet {
    pub wallet: Address,
    /// Generation of the snapshot the positions were read against.
    pub snapshot_generation: u64,
    pub captured_at: DateTime<Utc>,
    pub positions: Vec<UserPosition>,
    pub failures: Vec<VaultReadFailure>,
}

impl PositionSet {
    pub fn get(&self, vault: &Address) -> Option<&UserPosition> {
        self.positions.iter().find(|p| &p.vault == vault)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Deposit,
    Withdraw,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deposit => write!(f, "deposit"),
            Self::Withdraw => write!(f, "withdraw"),
        }
    }
}

/// A user-initiated deposit or withdraw. Lives for one orchestration run.
#[derive(Debug, Clone, Serialize)]
pub struct MutationRequest {
    pub id: Uuid,
    pub kind: MutationKind,
    pub vault: Address,
    pub wallet: Address,
    /// Asset-denominated raw units.
    #[serde(with = "decimal_string")]
    pub amount: BigUint,
    pub decimals: u8,
}

impl MutationRequest {
    pub fn new(
        kind: MutationKind,
        vault: Address,
        wallet: Address,
        amount: BigUint,
        decimals: u8,
    ) -> Result<Self, MutationError> {
        if amount == BigUint::from(0u32) {
            return Err(MutationError::InvalidRequest(
                "amount must be positive".to_string(),
            ));
        }
        if amount.bits() > 256 {
            return Err(MutationError::InvalidRequest(
                "amount does not fit in uint256".to_string(),
            ));
        }
        if wallet == Address::ZERO {
            return Err(MutationError::InvalidRequest(
                "wallet address required".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            kind,
            vault,
            wallet,
            amount,
            decimals,
        })
    }

    /// Build a request from a decimal amount string such as "250.75".
    pub fn from_units(
        kind: MutationKind,
        vault: Address,
        wallet: Address,
        amount: &str,
        decimals: u8,
    ) -> Result<Self, MutationError> {
        let raw = units::parse_units(amount, decimals)
            .map_err(|e| MutationError::InvalidRequest(e.to_string()))?;
        Self::new(kind, vault, wallet, raw, decimals)
    }
}

/// Which transaction of a mutation a hash belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStage {
    Approval,
    Action,
}

impl std::fmt::Display for TxStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approval => write!(f, "approval"),
            Self::Action => write!(f, "action"),
        }
    }
}

/// Live state of the mutation slot for one (wallet, vault) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MutationState {
    Idle,
    CheckingAllowance,
    Approving,
    Submitting,
    AwaitingConfirmation,
    Succeeded,
    Failed { reason: String },
    /// A transaction timed out waiting for confirmation; resolved by reconciliation.
    Indeterminate { tx_hash: TxHash, stage: TxStage },
}

impl MutationState {
    /// States that block a new request for the same pair.
    pub fn is_in_flight(&self) -> bool {
        !matches!(self, Self::Idle | Self::Succeeded | Self::Failed { .. })
    }
}

impl std::fmt::Display for MutationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::CheckingAllowance => write!(f, "CHECKING_ALLOWANCE"),
            Self::Approving => write!(f, "APPROVING"),
            Self::Submitting => write!(f, "SUBMITTING"),
            Self::AwaitingConfirmation => write!(f, "AWAITING_CONFIRMATION"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed { reason } => write!(f, "FAILED({})", reason),
            Self::Indeterminate { tx_hash, stage } => {
                write!(f, "INDETERMINATE({} {})", stage, tx_hash)
            }
        }
    }
}

/// Completed mutation.
#[derive(Debug, Clone, Serialize)]
pub struct MutationOutcome {
    pub request_id: Uuid,
    pub kind: MutationKind,
    pub vault: Address,
    pub wallet: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_tx: Option<TxHash>,
    pub action_tx: TxHash,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}
