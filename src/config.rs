use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

use crate::retry::RetryOptions;
use crate::sponsor::SponsorPolicy;
use crate::validation::ValidationRules;

/// Main configuration structure for sponsor-guard
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub rpc: RpcConfig,
    pub paymaster: PaymasterConfig,
    pub sponsor: SponsorPolicy,
    pub retry: RetryOptions,
    pub validation: ValidationRules,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Optional bearer token; `/health` stays open.
    pub bearer_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            bearer_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub url: String,
    pub timeout_seconds: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "https://sepolia.base.org".to_string(),
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymasterConfig {
    pub upstream_url: String,
    pub timeout_seconds: u64,
}

impl Default for PaymasterConfig {
    fn default() -> Self {
        Self {
            upstream_url: String::new(),
            timeout_seconds: 15,
        }
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides
    /// ALWAYS returns a valid config - never fails
    pub fn load() -> Self {
        let env_paths = ["../.env", ".env"];

        let mut env_loaded = false;
        for path in &env_paths {
            if dotenvy::from_path(path).is_ok() {
                tracing::info!("Loaded .env from: {}", path);
                env_loaded = true;
                break;
            }
        }

        if !env_loaded {
            tracing::warn!("No .env file found - continuing with env vars only");
        }

        let config_path = env::var("SG_CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        let mut config = Self::from_file(&config_path);

        config.apply_env_overrides(|key| env::var(key).ok());

        if let Err(e) = config.validate() {
            tracing::warn!("Config validation warnings: {} - continuing anyway", e);
        }

        config
    }

    fn from_file(config_path: &str) -> Self {
        if !Path::new(config_path).exists() {
            tracing::warn!("Config file not found at {} - using defaults", config_path);
            return Self::default();
        }

        match fs::read_to_string(config_path) {
            Ok(contents) => Self::from_yaml(&contents).unwrap_or_else(|e| {
                tracing::error!(
                    "Failed to parse config file {}: {} - using defaults",
                    config_path,
                    e
                );
                Self::default()
            }),
            Err(e) => {
                tracing::error!(
                    "Failed to read config file {}: {} - using defaults",
                    config_path,
                    e
                );
                Self::default()
            }
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        let config = serde_yaml::from_str::<Config>(contents)?;
        tracing::info!("Loaded configuration from YAML");
        Ok(config)
    }

    /// Apply environment variable overrides. `lookup` is `std::env::var` outside tests.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = lookup("SG_HTTP_BIND") {
            self.server.bind = bind;
        }
        if let Some(token) = lookup("SG_BEARER_TOKEN") {
            self.server.bearer_token = Some(token).filter(|t| !t.is_empty());
        }

        if let Some(url) = lookup("RPC_URL") {
            self.rpc.url = url;
        }
        if let Some(timeout) = lookup("SG_RPC_TIMEOUT_SECONDS") {
            if let Ok(secs) = timeout.parse() {
                self.rpc.timeout_seconds = secs;
            }
        }

        if let Some(url) = lookup("PAYMASTER_SERVICE_URL") {
            self.paymaster.upstream_url = url;
        }

        if let Some(contract) = lookup("SG_SPONSOR_APP_CONTRACT") {
            match contract.parse::<Address>() {
                Ok(address) => self.sponsor.app_contract = address,
                Err(e) => tracing::warn!("Ignoring SG_SPONSOR_APP_CONTRACT={}: {}", contract, e),
            }
        }
        if let Some(chain_id) = lookup("SG_SPONSOR_CHAIN_ID") {
            if let Ok(id) = chain_id.parse() {
                self.sponsor.chain_id = id;
            }
        }

        if let Some(attempts) = lookup("SG_RETRY_MAX_ATTEMPTS") {
            if let Ok(n) = attempts.parse() {
                self.retry.max_attempts = n;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts cannot be 0".into());
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err("retry.backoff_multiplier must be at least 1.0".into());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err("retry.base_delay_ms cannot exceed retry.max_delay_ms".into());
        }

        if self.rpc.url.is_empty() {
            return Err("rpc.url must be set (RPC_URL)".into());
        }
        if self.paymaster.upstream_url.is_empty() {
            return Err("paymaster.upstream_url must be set (PAYMASTER_SERVICE_URL)".into());
        }
        if self.sponsor.app_contract == Address::ZERO {
            return Err("sponsor.app_contract is unset; nothing will be sponsored".into());
        }

        let v = &self.validation;
        if v.postal_code_min_len > v.postal_code_max_len {
            return Err("validation.postal_code_min_len cannot exceed postal_code_max_len".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use std::collections::HashMap;

    fn configured() -> Config {
        let mut cfg = Config::default();
        cfg.paymaster.upstream_url = "https://paymaster.example/rpc".to_string();
        cfg.sponsor.app_contract = address!("119Ea671030FBf79AB93b436D2E20af6ea469a19");
        cfg
    }

    #[test]
    fn test_defaults_flag_missing_app_contract() {
        let mut cfg = Config::default();
        cfg.paymaster.upstream_url = "https://paymaster.example/rpc".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("sponsor.app_contract"));
        assert!(configured().validate().is_ok());
    }

    #[test]
    fn test_retry_validation() {
        let mut cfg = configured();
        cfg.retry.max_attempts = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = configured();
        cfg.retry.backoff_multiplier = 0.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SG_HTTP_BIND", "0.0.0.0:9000"),
            ("SG_BEARER_TOKEN", "secret"),
            ("RPC_URL", "http://localhost:8545"),
            ("PAYMASTER_SERVICE_URL", "http://localhost:9999"),
            ("SG_SPONSOR_APP_CONTRACT", "0x119ea671030fbf79ab93b436d2e20af6ea469a19"),
            ("SG_SPONSOR_CHAIN_ID", "8453"),
            ("SG_RETRY_MAX_ATTEMPTS", "5"),
        ]);
        let mut cfg = Config::default();
        cfg.apply_env_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.server.bind, "0.0.0.0:9000");
        assert_eq!(cfg.server.bearer_token.as_deref(), Some("secret"));
        assert_eq!(cfg.rpc.url, "http://localhost:8545");
        assert_eq!(cfg.paymaster.upstream_url, "http://localhost:9999");
        assert_eq!(
            cfg.sponsor.app_contract,
            address!("119Ea671030FBf79AB93b436D2E20af6ea469a19")
        );
        assert_eq!(cfg.sponsor.chain_id, 8453);
        assert_eq!(cfg.retry.max_attempts, 5);
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(|k| match k {
            "SG_SPONSOR_APP_CONTRACT" => Some("nope".to_string()),
            "SG_RETRY_MAX_ATTEMPTS" => Some("many".to_string()),
            "SG_BEARER_TOKEN" => Some(String::new()),
            _ => None,
        });
        assert_eq!(cfg.sponsor.app_contract, Address::ZERO);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert!(cfg.server.bearer_token.is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg = Config::from_yaml(
            r#"
rpc:
  url: http://localhost:8545
sponsor:
  app_contract: "0x119ea671030fbf79ab93b436d2e20af6ea469a19"
retry:
  max_attempts: 4
validation:
  blocked_countries: [XY, ZZ]
"#,
        )
        .unwrap();
        assert_eq!(cfg.rpc.url, "http://localhost:8545");
        assert_eq!(cfg.rpc.timeout_seconds, 10);
        assert_eq!(cfg.sponsor.chain_id, crate::sponsor::BASE_SEPOLIA_CHAIN_ID);
        assert_eq!(cfg.sponsor.entry_point, crate::sponsor::ENTRY_POINT_V06);
        assert_eq!(cfg.retry.max_attempts, 4);
        assert_eq!(cfg.retry.base_delay_ms, 1000);
        assert_eq!(cfg.validation.blocked_countries, vec!["XY", "ZZ"]);
        assert_eq!(cfg.validation.postal_code_max_len, 10);
        assert_eq!(cfg.server.bind, "127.0.0.1:8787");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let cfg = Config::from_file("/nonexistent/sponsor-guard.yaml");
        assert_eq!(cfg.retry, RetryOptions::default());
    }
}
