use thiserror::Error;

/// Errors raised by the chain client, the upstream paymaster and config loading.
#[derive(Error, Debug)]
pub enum SponsorGuardError {
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ABI decode error: {0}")]
    Decode(String),

    #[error("Upstream paymaster error: {0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<alloy_sol_types::Error> for SponsorGuardError {
    fn from(e: alloy_sol_types::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SponsorGuardError>;
