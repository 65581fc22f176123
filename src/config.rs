//! Configuration management for the EVM gateway
//!
//! Loads configuration from a TOML file with environment variable substitution.
//! Every field has a default, so a missing file yields a usable configuration.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub node: NodeConfig,
    pub account: AccountConfig,
    pub fees: FeeConfig,
    pub receipts: ReceiptConfig,
    pub metrics: MetricsConfig,
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Endpoint configured at startup; the operator may replace it later
    pub url: Option<String>,
    pub probe_timeout_secs: u64,
    pub rpc_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Name of the environment variable holding a startup private key
    pub private_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    pub strategy: FeeStrategy,
    pub gas_limit_buffer_percent: u64,
    pub gas_price_buffer_percent: u64,
    /// Flat gas added on top of the buffered estimate for deployments
    pub deploy_gas_headroom: u64,
    pub priority_fee_gwei: u64,
    pub max_fee_per_gas_gwei: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeeStrategy {
    #[default]
    Legacy,
    Eip1559,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReceiptConfig {
    pub poll_interval_ms: u64,
    pub transfer_timeout_secs: u64,
    pub deploy_timeout_secs: u64,
    pub broadcast_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            account: AccountConfig::default(),
            fees: FeeConfig::default(),
            receipts: ReceiptConfig::default(),
            metrics: MetricsConfig::default(),
            health_check_interval_secs: 30,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: None,
            probe_timeout_secs: 10,
            rpc_timeout_secs: 30,
        }
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            strategy: FeeStrategy::Legacy,
            gas_limit_buffer_percent: 20,
            gas_price_buffer_percent: 10,
            deploy_gas_headroom: 200_000,
            priority_fee_gwei: 2,
            max_fee_per_gas_gwei: 500,
        }
    }
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            transfer_timeout_secs: 300,
            deploy_timeout_secs: 600,
            broadcast_timeout_secs: 30,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9100,
        }
    }
}

impl Settings {
    /// Load settings from the configured file, falling back to defaults
    pub fn load() -> Result<Self> {
        let config_path = env::var("EVM_GATEWAY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        if !config_path.exists() {
            tracing::warn!(
                "Config file {:?} not found, using built-in defaults",
                config_path
            );
            let settings = Settings::default();
            settings.validate()?;
            return Ok(settings);
        }

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&config_str)
    }

    /// Parse settings from TOML text
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.receipts.poll_interval_ms == 0 {
            anyhow::bail!("receipts.poll_interval_ms must be greater than zero");
        }
        if self.receipts.transfer_timeout_secs == 0
            || self.receipts.deploy_timeout_secs == 0
            || self.receipts.broadcast_timeout_secs == 0
        {
            anyhow::bail!("receipt timeouts must be greater than zero");
        }
        if self.node.probe_timeout_secs == 0 || self.node.rpc_timeout_secs == 0 {
            anyhow::bail!("node timeouts must be greater than zero");
        }
        if self.health_check_interval_secs == 0 {
            anyhow::bail!("health_check_interval_secs must be greater than zero");
        }

        if let Some(url) = &self.node.url {
            if url.trim().is_empty() {
                tracing::warn!("node.url is empty - the node must be configured at runtime");
            }
        }

        Ok(())
    }
}

/// Runtime projection of [`Settings`] consumed by the gateway
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub probe_timeout: Duration,
    pub rpc_timeout: Duration,
    pub broadcast_timeout: Duration,
    pub poll_interval: Duration,
    pub transfer_timeout: Duration,
    pub deploy_timeout: Duration,
    pub fees: FeeConfig,
}

impl From<&Settings> for GatewayOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            probe_timeout: Duration::from_secs(settings.node.probe_timeout_secs),
            rpc_timeout: Duration::from_secs(settings.node.rpc_timeout_secs),
            broadcast_timeout: Duration::from_secs(settings.receipts.broadcast_timeout_secs),
            poll_interval: Duration::from_millis(settings.receipts.poll_interval_ms),
            transfer_timeout: Duration::from_secs(settings.receipts.transfer_timeout_secs),
            deploy_timeout: Duration::from_secs(settings.receipts.deploy_timeout_secs),
            fees: settings.fees.clone(),
        }
    }
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("EVM_GATEWAY_TEST_VAR", "test_value");
        let input = "url = \"https://rpc.example.com/${EVM_GATEWAY_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://rpc.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_defaults_match_receipt_budgets() {
        let options = GatewayOptions::default();
        assert_eq!(options.transfer_timeout, Duration::from_secs(300));
        assert_eq!(options.deploy_timeout, Duration::from_secs(600));
        assert_eq!(options.fees.strategy, FeeStrategy::Legacy);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        env::set_var("EVM_GATEWAY_TEST_NODE", "http://127.0.0.1:8545");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
health_check_interval_secs = 5

[node]
url = "${{EVM_GATEWAY_TEST_NODE}}"

[fees]
strategy = "eip1559"
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.node.url.as_deref(), Some("http://127.0.0.1:8545"));
        assert_eq!(settings.fees.strategy, FeeStrategy::Eip1559);
        assert_eq!(settings.fees.deploy_gas_headroom, 200_000);
        assert_eq!(settings.receipts.deploy_timeout_secs, 600);
        assert_eq!(settings.health_check_interval_secs, 5);
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = Settings::parse("[receipts]\npoll_interval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        for field in [
            "broadcast_timeout_secs",
            "transfer_timeout_secs",
            "deploy_timeout_secs",
        ] {
            let toml = format!("[receipts]\n{} = 0\n", field);
            assert!(Settings::parse(&toml).is_err(), "{} = 0 was accepted", field);
        }
        assert!(Settings::parse("[receipts]\nbroadcast_timeout_secs = 1\n").is_ok());
    }
}
