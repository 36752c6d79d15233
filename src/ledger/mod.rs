//! Ledger access: typed read calls, write call encoding, and the adapters
//! that carry them (JSON-RPC over HTTP, and an in-memory paper ledger).

pub mod abi;
pub mod paper;
pub mod rpc;

use num_bigint::BigUint;

use crate::error::LedgerError;
use crate::models::Address;
use crate::units;
use abi::{selectors, Token};

pub use paper::PaperLedger;
pub use rpc::{JsonRpcClient, JsonRpcLedger};

/// A read-only contract call: operation name plus typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    TotalAssets,
    TotalSupply,
    PricePerShare,
    ConvertToAssets(BigUint),
    BalanceOf(Address),
    Asset,
    Symbol,
    Decimals,
    DragonRouter,
    Allowance { owner: Address, spender: Address },
}

impl ContractCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TotalAssets => "totalAssets",
            Self::TotalSupply => "totalSupply",
            Self::PricePerShare => "pricePerShare",
            Self::ConvertToAssets(_) => "convertToAssets",
            Self::BalanceOf(_) => "balanceOf",
            Self::Asset => "asset",
            Self::Symbol => "symbol",
            Self::Decimals => "decimals",
            Self::DragonRouter => "dragonRouter",
            Self::Allowance { .. } => "allowance",
        }
    }

    pub fn calldata(&self) -> String {
        match self {
            Self::TotalAssets => abi::encode_call(selectors::TOTAL_ASSETS, &[]),
            Self::TotalSupply => abi::encode_call(selectors::TOTAL_SUPPLY, &[]),
            Self::PricePerShare => abi::encode_call(selectors::PRICE_PER_SHARE, &[]),
            Self::ConvertToAssets(shares) => {
                abi::encode_call(selectors::CONVERT_TO_ASSETS, &[Token::Uint(shares)])
            }
            Self::BalanceOf(owner) => abi::encode_call(selectors::BALANCE_OF, &[Token::Address(owner)]),
            Self::Asset => abi::encode_call(selectors::ASSET, &[]),
            Self::Symbol => abi::encode_call(selectors::SYMBOL, &[]),
            Self::Decimals => abi::encode_call(selectors::DECIMALS, &[]),
            Self::DragonRouter => abi::encode_call(selectors::DRAGON_ROUTER, &[]),
            Self::Allowance { owner, spender } => abi::encode_call(
                selectors::ALLOWANCE,
                &[Token::Address(owner), Token::Address(spender)],
            ),
        }
    }
}

/// A state-changing contract call, submitted through a signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractWrite {
    Approve { spender: Address, amount: BigUint },
    Deposit { assets: BigUint, receiver: Address },
    Withdraw { assets: BigUint, receiver: Address, owner: Address },
}

impl ContractWrite {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Approve { .. } => "approve",
            Self::Deposit { .. } => "deposit",
            Self::Withdraw { .. } => "withdraw",
        }
    }

    pub fn calldata(&self) -> String {
        match self {
            Self::Approve { spender, amount } => abi::encode_call(
                selectors::APPROVE,
                &[Token::Address(spender), Token::Uint(amount)],
            ),
            Self::Deposit { assets, receiver } => abi::encode_call(
                selectors::DEPOSIT,
                &[Token::Uint(assets), Token::Address(receiver)],
            ),
            Self::Withdraw {
                assets,
                receiver,
                owner,
            } => abi::encode_call(
                selectors::WITHDRAW,
                &[
                    Token::Uint(assets),
                    Token::Address(receiver),
                    Token::Address(owner),
                ],
            ),
        }
    }
}

/// Issues read-only calls against contracts. Every call stands alone; no
/// batching, retries or concurrency limits are applied here.
#[async_trait::async_trait]
pub trait LedgerReader: Send + Sync {
    /// Raw ABI-encoded return data of `call` executed against `to`.
    async fn call(&self, to: &Address, call: &ContractCall) -> Result<Vec<u8>, LedgerError>;
}

/// Typed view of one contract over a [`LedgerReader`].
#[derive(Clone, Copy)]
pub struct Contract<'a> {
    ledger: &'a dyn LedgerReader,
    address: Address,
}

impl<'a> Contract<'a> {
    pub fn new(ledger: &'a dyn LedgerReader, address: Address) -> Self {
        Self { ledger, address }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    async fn uint(&self, call: ContractCall) -> Result<BigUint, LedgerError> {
        let data = self.ledger.call(&self.address, &call).await?;
        abi::decode_uint(&data)
    }

    pub async fn total_assets(&self) -> Result<BigUint, LedgerError> {
        self.uint(ContractCall::TotalAssets).await
    }

    pub async fn total_supply(&self) -> Result<BigUint, LedgerError> {
        self.uint(ContractCall::TotalSupply).await
    }

    pub async fn price_per_share(&self) -> Result<BigUint, LedgerError> {
        self.uint(ContractCall::PricePerShare).await
    }

    pub async fn convert_to_assets(&self, shares: &BigUint) -> Result<BigUint, LedgerError> {
        self.uint(ContractCall::ConvertToAssets(shares.clone())).await
    }

    /// `convertToAssets` of one whole share at `decimals` precision.
    pub async fn assets_per_share(&self, decimals: u8) -> Result<BigUint, LedgerError> {
        self.convert_to_assets(&units::pow10(decimals)).await
    }

    pub async fn balance_of(&self, owner: &Address) -> Result<BigUint, LedgerError> {
        self.uint(ContractCall::BalanceOf(*owner)).await
    }

    pub async fn allowance(
        &self,
        owner: &Address,
        spender: &Address,
    ) -> Result<BigUint, LedgerError> {
        self.uint(ContractCall::Allowance {
            owner: *owner,
            spender: *spender,
        })
        .await
    }

    pub async fn asset(&self) -> Result<Address, LedgerError> {
        let data = self.ledger.call(&self.address, &ContractCall::Asset).await?;
        abi::decode_address(&data)
    }

    pub async fn dragon_router(&self) -> Result<Address, LedgerError> {
        let data = self
            .ledger
            .call(&self.address, &ContractCall::DragonRouter)
            .await?;
        abi::decode_address(&data)
    }

    pub async fn symbol(&self) -> Result<String, LedgerError> {
        let data = self.ledger.call(&self.address, &ContractCall::Symbol).await?;
        abi::decode_string(&data)
    }

    pub async fn decimals(&self) -> Result<u8, LedgerError> {
        let data = self.ledger.call(&self.address, &ContractCall::Decimals).await?;
        abi::decode_u8(&data)
    }
}
