//! JSON-RPC transport for the ledger endpoint.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use super::{abi, ContractCall, LedgerReader};
use crate::error::LedgerError;
use crate::models::Address;

/// JSON-RPC error object as returned by the node.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

/// Failure of one JSON-RPC exchange, before domain classification.
#[derive(Debug, Clone)]
pub enum RpcFailure {
    Transport(String),
    Rpc(RpcErrorObject),
}

impl std::fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "{}", msg),
            Self::Rpc(e) => write!(f, "rpc error {}: {}", e.code, e.message),
        }
    }
}

/// Thin JSON-RPC 2.0 client over HTTP. Shared by the read adapter and the node signer.
#[derive(Debug)]
pub struct JsonRpcClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    /// `Ok(None)` when the node answers with a null result.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>, RpcFailure> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RpcFailure::Transport(format!("{} request failed: {}", method, e)))?;

        if !resp.status().is_success() {
            return Err(RpcFailure::Transport(format!(
                "{} returned HTTP {}",
                method,
                resp.status()
            )));
        }

        let rpc = resp
            .json::<RpcResponse<T>>()
            .await
            .map_err(|e| RpcFailure::Transport(format!("failed to parse {} response: {}", method, e)))?;

        if let Some(err) = rpc.error {
            return Err(RpcFailure::Rpc(err));
        }
        Ok(rpc.result)
    }
}

/// Geth and most providers report reverts as code 3 or -32000 with "revert" in the message.
pub fn is_revert(err: &RpcErrorObject) -> bool {
    err.code == 3 || err.message.to_ascii_lowercase().contains("revert")
}

/// Map an `eth_call` failure to the ledger error taxonomy.
pub fn classify_call_failure(failure: RpcFailure) -> LedgerError {
    match failure {
        RpcFailure::Transport(msg) => LedgerError::Transport(msg),
        RpcFailure::Rpc(err) if is_revert(&err) => LedgerError::Revert(err.message),
        RpcFailure::Rpc(err) => {
            LedgerError::Transport(format!("rpc error {}: {}", err.code, err.message))
        }
    }
}

/// `eth_call` against the configured endpoint at the latest block.
#[derive(Debug)]
pub struct JsonRpcLedger {
    rpc: JsonRpcClient,
}

impl JsonRpcLedger {
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Result<Self, LedgerError> {
        Ok(Self {
            rpc: JsonRpcClient::new(rpc_url, timeout)?,
        })
    }
}

#[async_trait::async_trait]
impl LedgerReader for JsonRpcLedger {
    async fn call(&self, to: &Address, call: &ContractCall) -> Result<Vec<u8>, LedgerError> {
        let params = serde_json::json!([
            { "to": to.to_hex(), "data": call.calldata() },
            "latest"
        ]);

        let result: Option<String> = self
            .rpc
            .request("eth_call", params)
            .await
            .map_err(classify_call_failure)?;

        let result = result.ok_or_else(|| LedgerError::Decode("no result in eth_call response".into()))?;
        let bytes = abi::decode_hex(&result)?;
        debug!(
            contract = %to,
            method = call.name(),
            bytes = bytes.len(),
            "eth_call ok"
        );
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_err(code: i64, message: &str) -> RpcFailure {
        RpcFailure::Rpc(RpcErrorObject {
            code,
            message: message.to_string(),
            data: None,
        })
    }

    #[test]
    fn test_classify_revert() {
        assert!(matches!(
            classify_call_failure(rpc_err(3, "execution reverted")),
            LedgerError::Revert(_)
        ));
        assert!(matches!(
            classify_call_failure(rpc_err(-32000, "execution reverted: paused")),
            LedgerError::Revert(_)
        ));
    }

    #[test]
    fn test_classify_non_revert_rpc_error_is_transport() {
        let err = classify_call_failure(rpc_err(-32005, "rate limited"));
        assert!(matches!(err, LedgerError::Transport(_)));
        assert!(err.is_retryable());
        assert!(matches!(
            classify_call_failure(RpcFailure::Transport("timeout".into())),
            LedgerError::Transport(_)
        ));
    }

    #[test]
    fn test_rpc_response_parses_error_object() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"error":{"code":3,"message":"execution reverted","data":"0x"}}"#;
        let resp: RpcResponse<String> = serde_json::from_str(raw).unwrap();
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, 3);
    }
}
