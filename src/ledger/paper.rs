//! Paper ledger: an in-memory ERC-20 / ERC-4626 chain that answers reads and
//! executes signed writes. Used for dry runs and as the test double for both
//! the read adapter and the signer.
//!
//! Fault injection knobs mirror what goes wrong against a real endpoint:
//! per-contract read failures, malformed return data, a wallet that declines
//! to sign, writes that revert on-chain, and confirmations that are held back
//! until explicitly released.

use num_bigint::BigUint;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::sync::Notify;
use tracing::debug;

use super::{ContractCall, ContractWrite, LedgerReader};
use crate::error::{LedgerError, SignerError};
use crate::models::{Address, TxHash};
use crate::orchestrator::signer::{TransactionRequest, TransactionSigner, TxReceipt};
use crate::units;

#[derive(Debug, Default)]
struct PaperToken {
    symbol: String,
    decimals: u8,
    balances: HashMap<Address, BigUint>,
    allowances: HashMap<(Address, Address), BigUint>,
}

#[derive(Debug)]
struct PaperVault {
    asset: Address,
    decimals: u8,
    total_assets: BigUint,
    total_supply: BigUint,
    shares: HashMap<Address, BigUint>,
    exposes_price_per_share: bool,
    donation_router: Option<Address>,
}

impl PaperVault {
    fn convert_to_assets(&self, shares: &BigUint) -> BigUint {
        if self.total_supply == zero() {
            return shares.clone();
        }
        shares * &self.total_assets / &self.total_supply
    }

    fn convert_to_shares(&self, assets: &BigUint) -> BigUint {
        if self.total_supply == zero() || self.total_assets == zero() {
            return assets.clone();
        }
        assets * &self.total_supply / &self.total_assets
    }

    /// Shares burned to release `assets`, rounded up against the withdrawer.
    fn preview_withdraw(&self, assets: &BigUint) -> BigUint {
        if self.total_supply == zero() || self.total_assets == zero() {
            return assets.clone();
        }
        (assets * &self.total_supply + &self.total_assets - 1u32) / &self.total_assets
    }
}

#[derive(Debug, Default)]
struct PaperState {
    tokens: HashMap<Address, PaperToken>,
    vaults: HashMap<Address, PaperVault>,
    read_faults: HashMap<Address, LedgerError>,
    raw_returns: HashMap<(Address, &'static str), Vec<u8>>,
    reverting_writes: HashSet<&'static str>,
    decline_signing: bool,
    hold_confirmations: bool,
    held: Vec<(TxHash, TransactionRequest)>,
    receipts: HashMap<TxHash, TxReceipt>,
    submitted: HashSet<TxHash>,
    sent: Vec<TransactionRequest>,
    reads: Vec<(Address, &'static str)>,
    nonce: u64,
    block: u64,
}

#[derive(Debug, Default)]
pub struct PaperLedger {
    state: Mutex<PaperState>,
    confirmed: Notify,
}

fn zero() -> BigUint {
    BigUint::from(0u32)
}

fn uint_word(v: &BigUint) -> Vec<u8> {
    let bytes = v.to_bytes_be();
    let mut out = vec![0u8; 32usize.saturating_sub(bytes.len())];
    out.extend_from_slice(&bytes);
    out
}

fn address_word(a: &Address) -> Vec<u8> {
    let mut out = vec![0u8; 12];
    out.extend_from_slice(a.as_bytes());
    out
}

fn string_data(s: &str) -> Vec<u8> {
    let mut out = uint_word(&BigUint::from(32u32));
    out.extend(uint_word(&BigUint::from(s.len())));
    let mut body = s.as_bytes().to_vec();
    let padded = body.len().div_ceil(32) * 32;
    body.resize(padded, 0);
    out.extend(body);
    out
}

impl PaperLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_token(&self, address: Address, symbol: &str, decimals: u8) {
        self.state.lock().tokens.insert(
            address,
            PaperToken {
                symbol: symbol.to_string(),
                decimals,
                ..Default::default()
            },
        );
    }

    /// Register an ERC-4626 vault over an already added token.
    pub fn add_vault(&self, address: Address, asset: Address) {
        let mut state = self.state.lock();
        let decimals = state.tokens.get(&asset).map(|t| t.decimals).unwrap_or(18);
        state.vaults.insert(
            address,
            PaperVault {
                asset,
                decimals,
                total_assets: zero(),
                total_supply: zero(),
                shares: HashMap::new(),
                exposes_price_per_share: true,
                donation_router: None,
            },
        );
    }

    /// Vaults without `pricePerShare()` revert on it, like plain ERC-4626 vaults.
    pub fn set_price_per_share_support(&self, vault: &Address, supported: bool) {
        if let Some(v) = self.state.lock().vaults.get_mut(vault) {
            v.exposes_price_per_share = supported;
        }
    }

    /// Strategies with a router answer `dragonRouter()`; others revert on it.
    pub fn set_donation_router(&self, vault: &Address, router: Address) {
        if let Some(v) = self.state.lock().vaults.get_mut(vault) {
            v.donation_router = Some(router);
        }
    }

    /// Overwrite vault totals, e.g. to simulate accrued yield.
    pub fn set_vault_totals(&self, vault: &Address, total_assets: BigUint, total_supply: BigUint) {
        if let Some(v) = self.state.lock().vaults.get_mut(vault) {
            v.total_assets = total_assets;
            v.total_supply = total_supply;
        }
    }

    pub fn mint(&self, token: &Address, owner: &Address, amount: BigUint) {
        if let Some(t) = self.state.lock().tokens.get_mut(token) {
            *t.balances.entry(*owner).or_insert_with(zero) += amount;
        }
    }

    pub fn set_allowance(&self, token: &Address, owner: &Address, spender: &Address, amount: BigUint) {
        if let Some(t) = self.state.lock().tokens.get_mut(token) {
            t.allowances.insert((*owner, *spender), amount);
        }
    }

    /// Every call targeting `contract` fails with `error` until cleared.
    pub fn fail_reads(&self, contract: Address, error: LedgerError) {
        self.state.lock().read_faults.insert(contract, error);
    }

    pub fn clear_read_fault(&self, contract: &Address) {
        self.state.lock().read_faults.remove(contract);
    }

    /// Answer `method` on `contract` with `data` verbatim instead of the modelled value.
    pub fn set_raw_return(&self, contract: Address, method: &'static str, data: Vec<u8>) {
        self.state.lock().raw_returns.insert((contract, method), data);
    }

    /// Mined transactions calling `method` revert while set.
    pub fn set_revert_writes(&self, method: &'static str, revert: bool) {
        let mut state = self.state.lock();
        if revert {
            state.reverting_writes.insert(method);
        } else {
            state.reverting_writes.remove(method);
        }
    }

    pub fn set_decline_signing(&self, decline: bool) {
        self.state.lock().decline_signing = decline;
    }

    /// While held, submitted transactions stay pending until [`release_held`](Self::release_held).
    pub fn set_hold_confirmations(&self, hold: bool) {
        self.state.lock().hold_confirmations = hold;
    }

    /// Mine every held transaction in submission order.
    pub fn release_held(&self) {
        {
            let mut state = self.state.lock();
            state.hold_confirmations = false;
            let held = std::mem::take(&mut state.held);
            for (hash, tx) in held {
                let receipt = state.execute(hash, &tx);
                state.receipts.insert(hash, receipt);
            }
        }
        self.confirmed.notify_waiters();
    }

    pub fn sent_transactions(&self) -> Vec<TransactionRequest> {
        self.state.lock().sent.clone()
    }

    pub fn count_sent(&self, method: &str) -> usize {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|tx| tx.call.name() == method)
            .count()
    }

    /// (contract, method) of every read served so far.
    pub fn reads(&self) -> Vec<(Address, &'static str)> {
        self.state.lock().reads.clone()
    }

    pub fn token_balance(&self, token: &Address, owner: &Address) -> BigUint {
        self.state
            .lock()
            .tokens
            .get(token)
            .and_then(|t| t.balances.get(owner).cloned())
            .unwrap_or_else(zero)
    }

    pub fn share_balance(&self, vault: &Address, owner: &Address) -> BigUint {
        self.state
            .lock()
            .vaults
            .get(vault)
            .and_then(|v| v.shares.get(owner).cloned())
            .unwrap_or_else(zero)
    }

    pub fn allowance(&self, token: &Address, owner: &Address, spender: &Address) -> BigUint {
        self.state
            .lock()
            .tokens
            .get(token)
            .and_then(|t| t.allowances.get(&(*owner, *spender)).cloned())
            .unwrap_or_else(zero)
    }
}

impl PaperState {
    fn read(&self, to: &Address, call: &ContractCall) -> Result<Vec<u8>, LedgerError> {
        if let Some(vault) = self.vaults.get(to) {
            return match call {
                ContractCall::TotalAssets => Ok(uint_word(&vault.total_assets)),
                ContractCall::TotalSupply => Ok(uint_word(&vault.total_supply)),
                ContractCall::PricePerShare if vault.exposes_price_per_share => Ok(uint_word(
                    &vault.convert_to_assets(&units::pow10(vault.decimals)),
                )),
                ContractCall::ConvertToAssets(shares) => {
                    Ok(uint_word(&vault.convert_to_assets(shares)))
                }
                ContractCall::BalanceOf(owner) => Ok(uint_word(
                    vault.shares.get(owner).unwrap_or(&zero()),
                )),
                ContractCall::Asset => Ok(address_word(&vault.asset)),
                ContractCall::Decimals => Ok(uint_word(&BigUint::from(vault.decimals))),
                ContractCall::DragonRouter => match &vault.donation_router {
                    Some(router) => Ok(address_word(router)),
                    None => Err(LedgerError::Revert("vault has no dragonRouter".into())),
                },
                _ => Err(LedgerError::Revert(format!(
                    "vault does not implement {}",
                    call.name()
                ))),
            };
        }

        if let Some(token) = self.tokens.get(to) {
            return match call {
                ContractCall::Symbol => Ok(string_data(&token.symbol)),
                ContractCall::Decimals => Ok(uint_word(&BigUint::from(token.decimals))),
                ContractCall::BalanceOf(owner) => {
                    Ok(uint_word(token.balances.get(owner).unwrap_or(&zero())))
                }
                ContractCall::Allowance { owner, spender } => Ok(uint_word(
                    token.allowances.get(&(*owner, *spender)).unwrap_or(&zero()),
                )),
                _ => Err(LedgerError::Revert(format!(
                    "token does not implement {}",
                    call.name()
                ))),
            };
        }

        // eth_call against an address without code returns empty data.
        Ok(Vec::new())
    }

    fn next_hash(&mut self) -> TxHash {
        self.nonce += 1;
        let mut bytes = [0u8; 32];
        bytes[0] = 0xaa;
        bytes[24..].copy_from_slice(&self.nonce.to_be_bytes());
        TxHash::from_bytes(bytes)
    }

    /// Apply a transaction; reverts leave state untouched.
    fn execute(&mut self, hash: TxHash, tx: &TransactionRequest) -> TxReceipt {
        self.block += 1;
        let success = if self.reverting_writes.contains(tx.call.name()) {
            false
        } else {
            match &tx.call {
                ContractWrite::Approve { spender, amount } => match self.tokens.get_mut(&tx.to) {
                    Some(token) => {
                        token.allowances.insert((tx.from, *spender), amount.clone());
                        true
                    }
                    None => false,
                },
                ContractWrite::Deposit { assets, receiver } => self.deposit(tx, assets, receiver),
                ContractWrite::Withdraw {
                    assets,
                    receiver,
                    owner,
                } => self.withdraw(tx, assets, receiver, owner),
            }
        };
        debug!(tx_hash = %hash, method = tx.call.name(), success, "paper transaction mined");
        TxReceipt {
            tx_hash: hash,
            success,
            block_number: Some(self.block),
        }
    }

    fn deposit(&mut self, tx: &TransactionRequest, assets: &BigUint, receiver: &Address) -> bool {
        let Some(vault) = self.vaults.get_mut(&tx.to) else {
            return false;
        };
        let Some(token) = self.tokens.get_mut(&vault.asset) else {
            return false;
        };

        let key = (tx.from, tx.to);
        let allowance = token.allowances.get(&key).cloned().unwrap_or_else(zero);
        let balance = token.balances.get(&tx.from).cloned().unwrap_or_else(zero);
        if &allowance < assets || &balance < assets {
            return false;
        }

        let minted = vault.convert_to_shares(assets);
        token.allowances.insert(key, allowance - assets);
        token.balances.insert(tx.from, balance - assets);
        vault.total_assets += assets;
        vault.total_supply += &minted;
        *vault.shares.entry(*receiver).or_insert_with(zero) += minted;
        true
    }

    fn withdraw(
        &mut self,
        tx: &TransactionRequest,
        assets: &BigUint,
        receiver: &Address,
        owner: &Address,
    ) -> bool {
        if &tx.from != owner {
            return false;
        }
        let Some(vault) = self.vaults.get_mut(&tx.to) else {
            return false;
        };
        let burned = vault.preview_withdraw(assets);
        let held = vault.shares.get(owner).cloned().unwrap_or_else(zero);
        if held < burned || &vault.total_assets < assets {
            return false;
        }

        vault.shares.insert(*owner, held - &burned);
        vault.total_supply -= &burned;
        vault.total_assets -= assets;
        let asset = vault.asset;
        if let Some(token) = self.tokens.get_mut(&asset) {
            *token.balances.entry(*receiver).or_insert_with(zero) += assets;
        }
        true
    }
}

#[async_trait::async_trait]
impl LedgerReader for PaperLedger {
    async fn call(&self, to: &Address, call: &ContractCall) -> Result<Vec<u8>, LedgerError> {
        let mut state = self.state.lock();
        state.reads.push((*to, call.name()));
        if let Some(err) = state.read_faults.get(to) {
            return Err(err.clone());
        }
        if let Some(data) = state.raw_returns.get(&(*to, call.name())) {
            return Ok(data.clone());
        }
        state.read(to, call)
    }
}

#[async_trait::async_trait]
impl TransactionSigner for PaperLedger {
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash, SignerError> {
        let mut state = self.state.lock();
        if state.decline_signing {
            return Err(SignerError::UserDeclined("paper wallet declined".into()));
        }

        let hash = state.next_hash();
        state.sent.push(tx.clone());
        state.submitted.insert(hash);
        if state.hold_confirmations {
            state.held.push((hash, tx));
        } else {
            let receipt = state.execute(hash, &tx);
            state.receipts.insert(hash, receipt);
        }
        Ok(hash)
    }

    async fn wait_for_confirmation(&self, tx_hash: &TxHash) -> Result<TxReceipt, SignerError> {
        loop {
            // Registered before the check so a release in between is not missed.
            let notified = self.confirmed.notified();
            {
                let state = self.state.lock();
                if let Some(receipt) = state.receipts.get(tx_hash) {
                    return Ok(receipt.clone());
                }
                if !state.submitted.contains(tx_hash) {
                    return Err(SignerError::Transport(format!(
                        "unknown transaction {}",
                        tx_hash
                    )));
                }
            }
            notified.await;
        }
    }

    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>, SignerError> {
        Ok(self.state.lock().receipts.get(tx_hash).cloned())
    }
}
