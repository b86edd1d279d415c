use alloy_primitives::{Address, B256, Bytes};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::RpcConfig;
use crate::error::{Result, SponsorGuardError};

#[cfg(test)]
use mockall::automock;

/// Read-only chain state needed by the sponsorship checks.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn get_code(&self, address: Address) -> Result<Bytes>;
    async fn get_storage_at(&self, address: Address, slot: B256) -> Result<B256>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub(crate) struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    /// Error object wins over result; a response with neither is an error too.
    pub(crate) fn into_result(self) -> Result<Value> {
        if let Some(err) = self.error {
            return Err(SponsorGuardError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        self.result.ok_or_else(|| {
            SponsorGuardError::Internal("JSON-RPC response had neither result nor error".to_string())
        })
    }
}

/// Left-pads a storage word to 32 bytes. Some nodes trim leading zeros.
fn storage_word(raw: Bytes) -> Result<B256> {
    if raw.len() > 32 {
        return Err(SponsorGuardError::Decode(format!(
            "storage word is {} bytes, expected at most 32",
            raw.len()
        )));
    }
    Ok(B256::left_padding_from(&raw))
}

/// JSON-RPC 2.0 client over HTTP.
pub struct JsonRpcClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(config: &RpcConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        tracing::debug!(method, id = req.id, "Sending JSON-RPC request");

        let response: JsonRpcResponse = self
            .client
            .post(&self.url)
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let value = response.into_result()?;
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl ChainReader for JsonRpcClient {
    async fn get_code(&self, address: Address) -> Result<Bytes> {
        self.request("eth_getCode", json!([address, "latest"])).await
    }

    async fn get_storage_at(&self, address: Address, slot: B256) -> Result<B256> {
        let raw: Bytes = self
            .request("eth_getStorageAt", json!([address, slot, "latest"]))
            .await?;
        storage_word(raw)
    }
}
