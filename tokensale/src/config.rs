//! Sale configuration.
//!
//! Settings are loaded from:
//! 1. Default values
//! 2. A TOML file (optional; defaults are used when it is absent)
//! 3. Environment variables
//!
//! Contract addresses are kept as strings here and resolved by
//! [`SaleConfig::contracts`]. A missing or unparseable address resolves to
//! `None`, which the orchestrator reports as a configuration failure instead
//! of attempting the call.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Read refresh interval used when none (or zero) is configured.
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 10_000;

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    /// TOML serialization error.
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    /// Invalid value.
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Storefront configuration, fixed at process start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SaleConfig {
    /// JSON-RPC endpoint.
    pub rpc_url: Option<String>,
    /// Expected chain ID.
    pub chain_id: Option<u64>,
    /// Sale contract address.
    pub sale_contract: Option<String>,
    /// Stablecoin (payment) contract address.
    pub stablecoin_contract: Option<String>,
    /// Purchased token contract address.
    pub token_contract: Option<String>,
    /// Stablecoin decimals (6 for USDT/USDC).
    pub stablecoin_decimals: u8,
    /// Purchased token decimals.
    pub token_decimals: u8,
    /// Tokens on sale at launch, in whole tokens.
    pub initial_supply: u64,
    /// Largest quantity accepted from the input.
    pub max_quantity: u64,
    /// Quantity the input starts at and returns to after a purchase.
    pub default_quantity: u64,
    /// Chain read refresh interval, in milliseconds.
    pub refresh_interval_ms: u64,
    /// Receipt polling interval while confirming, in milliseconds.
    pub receipt_poll_ms: u64,
    /// Confirmation wait limit, in milliseconds.
    pub confirmation_timeout_ms: u64,
}

impl Default for SaleConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            chain_id: None,
            sale_contract: None,
            stablecoin_contract: None,
            token_contract: None,
            stablecoin_decimals: 6,
            token_decimals: 18,
            initial_supply: 0,
            max_quantity: 50_000,
            default_quantity: 1,
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            receipt_poll_ms: 1_000,
            confirmation_timeout_ms: 300_000,
        }
    }
}

/// Resolved contract addresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Contracts {
    /// Sale contract.
    pub sale: Option<Address>,
    /// Stablecoin contract.
    pub stablecoin: Option<Address>,
    /// Purchased token contract.
    pub token: Option<Address>,
}

fn parse_address(raw: Option<&str>) -> Option<Address> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| Address::from_str(s).ok())
}

impl SaleConfig {
    /// Parse a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this schema.
    pub fn from_toml(text: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Resolve the configured contract addresses.
    #[must_use]
    pub fn contracts(&self) -> Contracts {
        Contracts {
            sale: parse_address(self.sale_contract.as_deref()),
            stablecoin: parse_address(self.stablecoin_contract.as_deref()),
            token: parse_address(self.token_contract.as_deref()),
        }
    }

    /// Chain read refresh interval. Zero falls back to the default.
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        match self.refresh_interval_ms {
            0 => Duration::from_millis(DEFAULT_REFRESH_INTERVAL_MS),
            ms => Duration::from_millis(ms),
        }
    }

    /// Receipt polling interval.
    #[must_use]
    pub const fn receipt_poll(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms)
    }

    /// Confirmation wait limit.
    #[must_use]
    pub const fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    /// Validate the configuration and return all issues found.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        for (path, raw) in [
            ("sale_contract", &self.sale_contract),
            ("stablecoin_contract", &self.stablecoin_contract),
            ("token_contract", &self.token_contract),
        ] {
            match raw.as_deref().map(str::trim) {
                None | Some("") => issues.push(ConfigIssue::error(path, "address is not set")),
                Some(s) if Address::from_str(s).is_err() => {
                    issues.push(ConfigIssue::error(path, format!("'{s}' is not a valid address")));
                }
                Some(_) => {}
            }
        }

        if self.rpc_url.is_none() {
            issues.push(ConfigIssue::warning(
                "rpc_url",
                "No RPC endpoint set. Set RPC_URL env var.",
            ));
        }

        if self.max_quantity == 0 {
            issues.push(ConfigIssue::error(
                "max_quantity",
                "Max quantity must be at least 1",
            ));
        }

        if self.default_quantity == 0 || self.default_quantity > self.max_quantity {
            issues.push(ConfigIssue::warning(
                "default_quantity",
                "Default quantity should be between 1 and max_quantity",
            ));
        }

        if self.refresh_interval_ms == 0 {
            issues.push(ConfigIssue::error(
                "refresh_interval_ms",
                "Refresh interval must be greater than zero",
            ));
        }

        if self.initial_supply == 0 {
            issues.push(ConfigIssue::warning(
                "initial_supply",
                "Initial supply is 0, sale progress will not be shown",
            ));
        }

        issues
    }

    /// Check if the configuration is valid (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate()
            .iter()
            .all(|issue| issue.level != IssueLevel::Error)
    }

    /// Merge environment variables into the configuration.
    ///
    /// Empty variables count as unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable does not parse.
    pub fn with_env(self) -> ConfigResult<Self> {
        self.with_vars(|key| std::env::var(key).ok())
    }

    fn with_vars(mut self, var: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let get = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        fn number<T: FromStr>(key: &str, raw: &str) -> ConfigResult<T> {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("{key}='{raw}' is not a number")))
        }

        if let Some(v) = get("RPC_URL") {
            self.rpc_url = Some(v);
        }
        if let Some(v) = get("SALE_CONTRACT_ADDRESS") {
            self.sale_contract = Some(v);
        }
        if let Some(v) = get("STABLECOIN_CONTRACT_ADDRESS") {
            self.stablecoin_contract = Some(v);
        }
        if let Some(v) = get("TOKEN_CONTRACT_ADDRESS") {
            self.token_contract = Some(v);
        }
        if let Some(v) = get("CHAIN_ID") {
            self.chain_id = Some(number("CHAIN_ID", &v)?);
        }
        if let Some(v) = get("STABLECOIN_DECIMALS") {
            self.stablecoin_decimals = number("STABLECOIN_DECIMALS", &v)?;
        }
        if let Some(v) = get("TOKEN_DECIMALS") {
            self.token_decimals = number("TOKEN_DECIMALS", &v)?;
        }
        if let Some(v) = get("INITIAL_TOKEN_SUPPLY") {
            self.initial_supply = number("INITIAL_TOKEN_SUPPLY", &v)?;
        }
        if let Some(v) = get("MAX_PURCHASE_QUANTITY") {
            self.max_quantity = number("MAX_PURCHASE_QUANTITY", &v)?;
        }
        if let Some(v) = get("REFRESH_INTERVAL_MS") {
            self.refresh_interval_ms = number("REFRESH_INTERVAL_MS", &v)?;
        }

        Ok(self)
    }
}

/// Load configuration from a TOML file, falling back to defaults when the
/// file does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub async fn load_config_from(path: impl AsRef<Path>) -> ConfigResult<SaleConfig> {
    let path = path.as_ref();
    if !path.exists() {
        info!(path = %path.display(), "config file not found, using defaults");
        return Ok(SaleConfig::default());
    }

    let content = tokio::fs::read_to_string(path).await?;
    let config = SaleConfig::from_toml(&content)?;
    debug!(path = %path.display(), "loaded config file");

    Ok(config)
}

/// Configuration validation issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Issue severity level.
    pub level: IssueLevel,
    /// Configuration path (e.g., "sale_contract").
    pub path: String,
    /// Human-readable message.
    pub message: String,
}

/// Severity of a [`ConfigIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    /// The storefront cannot operate correctly.
    Error,
    /// Degraded but usable.
    Warning,
}

impl ConfigIssue {
    /// Create an error-level issue.
    #[must_use]
    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a warning-level issue.
    #[must_use]
    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            IssueLevel::Error => "ERROR",
            IssueLevel::Warning => "WARN",
        };
        write!(f, "[{}] {}: {}", prefix, self.path, self.message)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const USDT: &str = "0xdAC17F958D2ee523a2206206994597C13D831ec7";

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_sale() {
        let config = SaleConfig::default();
        assert_eq!(config.stablecoin_decimals, 6);
        assert_eq!(config.token_decimals, 18);
        assert_eq!(config.max_quantity, 50_000);
        assert_eq!(config.refresh_interval(), Duration::from_secs(10));
    }

    #[test]
    fn zero_refresh_interval_falls_back_to_default() {
        let config = SaleConfig::default()
            .with_vars(env(&[("REFRESH_INTERVAL_MS", "0")]))
            .unwrap();
        assert_eq!(config.refresh_interval_ms, 0);
        assert_eq!(config.refresh_interval(), Duration::from_secs(10));
        assert!(
            config
                .validate()
                .iter()
                .any(|i| i.path == "refresh_interval_ms" && i.level == IssueLevel::Error)
        );
    }

    #[test]
    fn missing_addresses_resolve_to_none() {
        let config = SaleConfig {
            stablecoin_contract: Some(USDT.to_string()),
            sale_contract: Some("not-an-address".to_string()),
            token_contract: Some(String::new()),
            ..SaleConfig::default()
        };
        let contracts = config.contracts();
        assert!(contracts.stablecoin.is_some());
        assert!(contracts.sale.is_none());
        assert!(contracts.token.is_none());

        let errors: Vec<_> = config
            .validate()
            .into_iter()
            .filter(|i| i.level == IssueLevel::Error)
            .map(|i| i.path)
            .collect();
        assert_eq!(errors, vec!["sale_contract", "token_contract"]);
        assert!(!config.is_valid());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SaleConfig::from_toml(
            r#"
            sale_contract = "0x1000000000000000000000000000000000000001"
            initial_supply = 1000000
            "#,
        )
        .unwrap();
        assert_eq!(config.initial_supply, 1_000_000);
        assert_eq!(config.stablecoin_decimals, 6);
        assert!(config.contracts().sale.is_some());
    }

    #[test]
    fn unknown_toml_fields_are_rejected() {
        assert!(SaleConfig::from_toml("price = 2").is_err());
    }

    #[test]
    fn toml_round_trip() {
        let config = SaleConfig {
            rpc_url: Some("http://localhost:8545".to_string()),
            ..SaleConfig::default()
        };
        let text = config.to_toml().unwrap();
        assert_eq!(SaleConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn env_overrides_and_ignores_empty() {
        let config = SaleConfig::default()
            .with_vars(env(&[
                ("STABLECOIN_CONTRACT_ADDRESS", USDT),
                ("SALE_CONTRACT_ADDRESS", ""),
                ("MAX_PURCHASE_QUANTITY", "100"),
            ]))
            .unwrap();
        assert_eq!(config.stablecoin_contract.as_deref(), Some(USDT));
        assert!(config.sale_contract.is_none());
        assert_eq!(config.max_quantity, 100);
    }

    #[test]
    fn env_rejects_bad_numbers() {
        let err = SaleConfig::default()
            .with_vars(env(&[("TOKEN_DECIMALS", "eighteen")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let config = load_config_from("/nonexistent/tokensale.toml").await.unwrap();
        assert_eq!(config, SaleConfig::default());
    }
}
