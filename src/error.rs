//! Error types shared across the read and write paths.

use crate::models::{Address, TxHash, TxStage};

/// Failure of a single ledger read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Endpoint unreachable, timed out, or answered with a non-call error.
    Transport(String),
    /// The call reached the contract and reverted.
    Revert(String),
    /// The call returned data that does not decode as the expected type.
    Decode(String),
}

impl LedgerError {
    /// Transport failures may succeed on a later attempt; reverts and bad data will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::Revert(msg) => write!(f, "contract reverted: {}", msg),
            Self::Decode(msg) => write!(f, "undecodable return data: {}", msg),
        }
    }
}

impl std::error::Error for LedgerError {}

/// Failure reported by a transaction signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// The wallet owner rejected the transaction.
    UserDeclined(String),
    /// The signer or its endpoint could not be reached.
    Transport(String),
    /// The transaction was rejected before inclusion (bad nonce, gas estimation revert, ...).
    Rejected(String),
}

impl std::fmt::Display for SignerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserDeclined(msg) => write!(f, "user declined transaction: {}", msg),
            Self::Transport(msg) => write!(f, "signer transport error: {}", msg),
            Self::Rejected(msg) => write!(f, "transaction rejected: {}", msg),
        }
    }
}

impl std::error::Error for SignerError {}

/// Invalid vault registry. Fatal to the whole hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    Empty,
    DuplicateVault(Address),
    MissingName(Address),
    UnsupportedDecimals { vault: Address, decimals: u8 },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "vault registry is empty"),
            Self::DuplicateVault(a) => write!(f, "vault {} registered more than once", a),
            Self::MissingName(a) => write!(f, "vault {} has no display name", a),
            Self::UnsupportedDecimals { vault, decimals } => {
                write!(f, "vault {} declares unsupported decimals {}", vault, decimals)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Rejected metric input (negative principal, non-finite apy, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum MetricError {
    InvalidInput { field: &'static str, value: f64 },
}

impl std::fmt::Display for MetricError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput { field, value } => {
                write!(f, "invalid {}: {} (must be finite and >= 0)", field, value)
            }
        }
    }
}

impl std::error::Error for MetricError {}

/// Decimal amount parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitsError {
    Empty,
    Negative,
    Malformed(String),
    TooManyDecimals { max: u8 },
}

impl std::fmt::Display for UnitsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "amount is empty"),
            Self::Negative => write!(f, "amount is negative"),
            Self::Malformed(s) => write!(f, "malformed amount: {:?}", s),
            Self::TooManyDecimals { max } => {
                write!(f, "amount has more than {} fractional digits", max)
            }
        }
    }
}

impl std::error::Error for UnitsError {}

/// Why a deposit or withdraw did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// Another mutation for the same (wallet, vault) pair is still in flight.
    Busy { wallet: Address, vault: Address },
    InvalidRequest(String),
    UnknownVault(Address),
    /// A read needed by the mutation (asset, allowance) failed.
    Ledger(LedgerError),
    UserDeclined(String),
    Signer(SignerError),
    /// The transaction was mined but reverted.
    Reverted { tx_hash: TxHash, stage: TxStage },
    /// The transaction was not seen confirmed in time. Outcome unknown until reconciled.
    ConfirmationTimeout { tx_hash: TxHash, stage: TxStage },
    /// The mutation task ended without reporting an outcome.
    Aborted(String),
}

impl MutationError {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

impl std::fmt::Display for MutationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Busy { wallet, vault } => write!(
                f,
                "a mutation for wallet {} on vault {} is already in flight",
                wallet, vault
            ),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
            Self::UnknownVault(v) => write!(f, "vault {} is not registered", v),
            Self::Ledger(e) => write!(f, "ledger read failed: {}", e),
            Self::UserDeclined(msg) => write!(f, "user declined: {}", msg),
            Self::Signer(e) => write!(f, "{}", e),
            Self::Reverted { tx_hash, stage } => {
                write!(f, "{} transaction {} reverted", stage, tx_hash)
            }
            Self::ConfirmationTimeout { tx_hash, stage } => write!(
                f,
                "{} transaction {} not confirmed in time; outcome unknown",
                stage, tx_hash
            ),
            Self::Aborted(msg) => write!(f, "mutation aborted: {}", msg),
        }
    }
}

impl std::error::Error for MutationError {}

impl From<LedgerError> for MutationError {
    fn from(e: LedgerError) -> Self {
        Self::Ledger(e)
    }
}

impl From<SignerError> for MutationError {
    fn from(e: SignerError) -> Self {
        match e {
            SignerError::UserDeclined(msg) => Self::UserDeclined(msg),
            other => Self::Signer(other),
        }
    }
}
