//! Signer capability: submit a transaction, then await or look up its receipt.

use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{LedgerError, SignerError};
use crate::ledger::rpc::{is_revert, RpcFailure};
use crate::ledger::{ContractWrite, JsonRpcClient};
use crate::models::{Address, TxHash};

/// A write call from `from` to contract `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub call: ContractWrite,
}

/// Mined transaction outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub success: bool,
    pub block_number: Option<u64>,
}

/// External collaborator that owns the wallet's key. The hub never sees keys.
#[async_trait::async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Sign and broadcast; returns once the node has accepted the transaction.
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash, SignerError>;

    /// Block until the transaction is mined. Unbounded; callers apply their own timeout.
    async fn wait_for_confirmation(&self, tx_hash: &TxHash) -> Result<TxReceipt, SignerError>;

    /// Non-blocking lookup; `None` while the transaction is still pending.
    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>, SignerError>;
}

/// Signs through `eth_sendTransaction` on a node that manages the sending
/// account (local dev chains, virtual testnets, wallet-backed RPC bridges).
#[derive(Debug)]
pub struct RpcNodeSigner {
    rpc: JsonRpcClient,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    status: Option<String>,
    block_number: Option<String>,
}

impl RpcNodeSigner {
    pub fn new(
        rpc_url: impl Into<String>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, LedgerError> {
        Ok(Self {
            rpc: JsonRpcClient::new(rpc_url, timeout)?,
            poll_interval,
        })
    }
}

/// EIP-1193 code 4001 is the wallet's "user rejected request".
pub fn classify_send_failure(failure: RpcFailure) -> SignerError {
    match failure {
        RpcFailure::Transport(msg) => SignerError::Transport(msg),
        RpcFailure::Rpc(err) => {
            let lower = err.message.to_ascii_lowercase();
            if err.code == 4001 || lower.contains("user rejected") || lower.contains("user denied") {
                SignerError::UserDeclined(err.message)
            } else if is_revert(&err) {
                SignerError::Rejected(err.message)
            } else {
                SignerError::Transport(format!("rpc error {}: {}", err.code, err.message))
            }
        }
    }
}

fn parse_quantity(q: &str) -> Option<u64> {
    u64::from_str_radix(q.trim().trim_start_matches("0x"), 16).ok()
}

#[async_trait::async_trait]
impl TransactionSigner for RpcNodeSigner {
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash, SignerError> {
        let params = serde_json::json!([{
            "from": tx.from.to_hex(),
            "to": tx.to.to_hex(),
            "data": tx.call.calldata(),
        }]);

        let hash: Option<String> = self
            .rpc
            .request("eth_sendTransaction", params)
            .await
            .map_err(classify_send_failure)?;
        let hash = hash.ok_or_else(|| SignerError::Transport("node returned no tx hash".into()))?;
        let hash: TxHash = hash.parse().map_err(SignerError::Transport)?;

        debug!(
            tx_hash = %hash,
            from = %tx.from,
            to = %tx.to,
            method = tx.call.name(),
            "transaction submitted"
        );
        Ok(hash)
    }

    async fn wait_for_confirmation(&self, tx_hash: &TxHash) -> Result<TxReceipt, SignerError> {
        loop {
            match self.receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                // Keep polling; the caller's timeout bounds the wait.
                Err(e) => warn!(tx_hash = %tx_hash, error = %e, "receipt poll failed"),
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>, SignerError> {
        let params = serde_json::json!([tx_hash.to_string()]);
        let receipt: Option<RpcReceipt> = self
            .rpc
            .request("eth_getTransactionReceipt", params)
            .await
            .map_err(|f| SignerError::Transport(f.to_string()))?;

        Ok(receipt.map(|r| TxReceipt {
            tx_hash: *tx_hash,
            success: r.status.as_deref().and_then(parse_quantity) == Some(1),
            block_number: r.block_number.as_deref().and_then(parse_quantity),
        }))
    }
}
