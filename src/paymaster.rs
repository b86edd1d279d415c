use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use crate::config::PaymasterConfig;
use crate::error::{Result, SponsorGuardError};
use crate::retry::{RetryOptions, RetryOutcome, failure_message, retry_operation};
use crate::rpc::JsonRpcResponse;
use crate::sponsor::{SponsorshipChecker, UserOperation};

#[cfg(test)]
use mockall::automock;

pub const METHOD_STUB_DATA: &str = "pm_getPaymasterStubData";
pub const METHOD_DATA: &str = "pm_getPaymasterData";

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const SERVER_ERROR: i64 = -32000;

/// Upstream paymaster that actually signs sponsorship data.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PaymasterService: Send + Sync {
    async fn forward(&self, method: &str, params: &Value) -> Result<Value>;
}

/// JSON-RPC paymaster service reachable over HTTP.
pub struct HttpPaymasterService {
    client: Client,
    url: String,
}

impl HttpPaymasterService {
    pub fn new(config: &PaymasterConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            url: config.upstream_url.clone(),
        })
    }
}

#[async_trait]
impl PaymasterService for HttpPaymasterService {
    async fn forward(&self, method: &str, params: &Value) -> Result<Value> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SponsorGuardError::Upstream(format!("{status}: {body}")));
        }

        let body: JsonRpcResponse = response.json().await?;
        body.into_result()
            .map_err(|e| SponsorGuardError::Upstream(e.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymasterRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymasterResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl PaymasterResponse {
    fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// `[userOp, entryPoint, chainId, context?]` positional params.
struct SponsorParams {
    user_op: UserOperation,
    entry_point: String,
    chain_id: u64,
}

fn parse_params(params: &Value) -> std::result::Result<SponsorParams, String> {
    let items = params
        .as_array()
        .ok_or_else(|| "params must be an array".to_string())?;
    if items.len() < 3 {
        return Err(format!("expected at least 3 params, got {}", items.len()));
    }

    let user_op: UserOperation = serde_json::from_value(items[0].clone())
        .map_err(|e| format!("invalid user operation: {e}"))?;
    let entry_point = items[1]
        .as_str()
        .ok_or_else(|| "entry point must be a string".to_string())?
        .to_string();
    let chain_id = parse_chain_id(&items[2])?;

    Ok(SponsorParams {
        user_op,
        entry_point,
        chain_id,
    })
}

/// Chain id as sent by wallets: `"0x14a34"`, or a plain number.
fn parse_chain_id(value: &Value) -> std::result::Result<u64, String> {
    match value {
        Value::String(s) => {
            let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16),
                None => s.parse(),
            };
            parsed.map_err(|e| format!("invalid chain id {s:?}: {e}"))
        }
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| format!("invalid chain id {n}")),
        other => Err(format!("invalid chain id {other}")),
    }
}

/// Forwards paymaster requests upstream only for sponsorable user operations.
pub struct PaymasterProxy {
    checker: SponsorshipChecker,
    upstream: Arc<dyn PaymasterService>,
    retry: RetryOptions,
}

impl PaymasterProxy {
    pub fn new(
        checker: SponsorshipChecker,
        upstream: Arc<dyn PaymasterService>,
        retry: RetryOptions,
    ) -> Self {
        Self {
            checker,
            upstream,
            retry,
        }
    }

    pub async fn handle(&self, request: PaymasterRequest) -> PaymasterResponse {
        let PaymasterRequest { id, method, params } = request;

        if method != METHOD_STUB_DATA && method != METHOD_DATA {
            tracing::warn!(method = %method, "Unsupported paymaster method");
            return PaymasterResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"));
        }

        let parsed = match parse_params(&params) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(method = %method, "Invalid paymaster params: {}", e);
                return PaymasterResponse::error(id, INVALID_PARAMS, e);
            }
        };

        if !self
            .checker
            .will_sponsor(parsed.chain_id, &parsed.entry_point, &parsed.user_op)
            .await
        {
            return PaymasterResponse::error(id, SERVER_ERROR, "Not a sponsorable operation");
        }

        let upstream = &self.upstream;
        let method_ref = method.as_str();
        let params_ref = &params;
        let outcome =
            retry_operation(move || upstream.forward(method_ref, params_ref), &self.retry).await;

        match outcome {
            RetryOutcome::Success { data, attempts } => {
                tracing::info!(method = %method, attempts, "Paymaster request forwarded");
                PaymasterResponse::result(id, data)
            }
            RetryOutcome::Failure { error, attempts } => {
                tracing::error!(method = %method, attempts, "Paymaster request failed: {}", error);
                PaymasterResponse::error(
                    id,
                    SERVER_ERROR,
                    failure_message("Paymaster request", &error, attempts),
                )
            }
        }
    }
}
