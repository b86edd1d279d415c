pub mod config;
pub mod error;
pub mod paymaster;
pub mod retry;
pub mod rpc;
pub mod server;
pub mod sponsor;
pub mod validation;

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::paymaster::{HttpPaymasterService, PaymasterProxy, PaymasterService};
use crate::rpc::{ChainReader, JsonRpcClient};
use crate::server::AppState;
use crate::sponsor::SponsorshipChecker;

pub use crate::retry::{RetryOptions, RetryOutcome, is_retryable_error, retry_operation};
pub use crate::sponsor::{SponsorPolicy, UserOperation};

/// Wires the chain client, the upstream paymaster and the validation rules from config.
pub fn build_state(cfg: &Config) -> Result<AppState> {
    let reader = Arc::new(JsonRpcClient::new(&cfg.rpc)?);
    let upstream = Arc::new(HttpPaymasterService::new(&cfg.paymaster)?);

    let checker = SponsorshipChecker::new(
        Arc::clone(&reader) as Arc<dyn ChainReader>,
        cfg.sponsor.clone(),
    );
    let proxy = PaymasterProxy::new(
        checker,
        Arc::clone(&upstream) as Arc<dyn PaymasterService>,
        cfg.retry.clone(),
    );

    Ok(AppState {
        proxy: Arc::new(proxy),
        rules: Arc::new(cfg.validation.clone()),
    })
}
