//! Configuration management for the witscan indexer.
//!
//! Configuration is loaded from a TOML file. Values may reference
//! environment variables with `${VAR_NAME}` syntax; placeholders inside
//! comment lines are left alone.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node pool configuration
    pub node: NodeConfig,

    /// Network identity
    #[serde(default)]
    pub network: NetworkConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Block ingestion configuration
    #[serde(default)]
    pub insert: InsertConfig,

    /// Confirmation sweep configuration
    #[serde(default)]
    pub confirm: ConfirmConfig,

    /// Mempool sampling configuration
    #[serde(default)]
    pub pending: PendingConfig,

    /// Address cache notification configuration
    #[serde(default)]
    pub address_cache: AddressCacheConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// JSON-RPC addresses, `host:port`. Repeating an address widens the
    /// pool for that node.
    pub addresses: Vec<String>,

    /// Default per-call timeout in seconds
    #[serde(default = "default_rpc_timeout_secs")]
    pub timeout_secs: u64,
}

/// Network identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network name, used for log context
    #[serde(default = "default_network_name")]
    pub name: String,

    /// Bech32 human-readable prefix for derived addresses
    #[serde(default = "default_address_hrp")]
    pub address_hrp: String,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://witscan.db")
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Block ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertConfig {
    /// Epoch to start ingesting from when the database is empty
    #[serde(default)]
    pub start_epoch: u32,

    /// Maximum chain-digest entries fetched per catch-up batch
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
}

/// Confirmation sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmConfig {
    /// Seconds between confirmation sweeps
    #[serde(default = "default_confirm_interval_secs")]
    pub interval_secs: u64,
}

/// Mempool sampling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingConfig {
    /// Seconds between mempool samples
    #[serde(default = "default_pending_interval_secs")]
    pub interval_secs: u64,
}

/// Address cache notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AddressCacheConfig {
    /// Cache server address, `host:port`. Notifications are disabled when
    /// unset.
    #[serde(default)]
    pub address: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_rpc_timeout_secs() -> u64 {
    60
}

fn default_network_name() -> String {
    "mainnet".to_string()
}

fn default_address_hrp() -> String {
    witscan_core::address::MAINNET_HRP.to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_batch_size() -> i64 {
    50
}

fn default_confirm_interval_secs() -> u64 {
    30
}

fn default_pending_interval_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: default_network_name(),
            address_hrp: default_address_hrp(),
        }
    }
}

impl Default for InsertConfig {
    fn default() -> Self {
        Self {
            start_epoch: 0,
            batch_size: default_batch_size(),
        }
    }
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_confirm_interval_secs(),
        }
    }
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_pending_interval_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, expanding `${VAR}` placeholders
    /// from the environment first.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let expanded = Self::expand_env_vars(&contents)?;

        let config: Config = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.node.addresses.is_empty() {
            anyhow::bail!("Node addresses cannot be empty");
        }
        for addr in &self.node.addresses {
            if !addr.contains(':') {
                anyhow::bail!("Node address '{}' must be host:port", addr);
            }
        }
        if self.node.timeout_secs == 0 {
            anyhow::bail!("Node timeout_secs must be > 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be > 0");
        }

        if self.confirm.interval_secs == 0 {
            anyhow::bail!("Confirm interval_secs must be > 0 (tokio interval cannot be zero)");
        }
        if self.pending.interval_secs == 0 {
            anyhow::bail!("Pending interval_secs must be > 0 (tokio interval cannot be zero)");
        }
        if self.insert.batch_size <= 0 {
            anyhow::bail!("Insert batch_size must be > 0");
        }

        if let Some(addr) = &self.address_cache.address {
            if !addr.contains(':') {
                anyhow::bail!("Address cache address '{}' must be host:port", addr);
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!(
                "Logging format must be one of: {} (got '{}')",
                valid_formats.join(", "),
                self.logging.format
            );
        }

        Ok(())
    }

    /// Default per-call RPC timeout.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.node.timeout_secs)
    }

    /// Expand `${VAR_NAME}` placeholders from the environment.
    ///
    /// Lines whose first non-whitespace character is `#` are copied through
    /// untouched, so commented-out examples never require the variable to
    /// exist. Referencing an unset variable elsewhere is an error.
    fn expand_env_vars(input: &str) -> Result<String> {
        let mut result = String::with_capacity(input.len());
        for (line_no, line) in input.lines().enumerate() {
            if line_no > 0 {
                result.push('\n');
            }
            if line.trim_start().starts_with('#') {
                result.push_str(line);
                continue;
            }

            let mut rest = line;
            while let Some(start) = rest.find("${") {
                result.push_str(&rest[..start]);
                let after = &rest[start + 2..];
                let end = after.find('}').with_context(|| {
                    format!("Unclosed environment variable placeholder on line {}", line_no + 1)
                })?;
                let var_name = &after[..end];
                if var_name.is_empty() {
                    anyhow::bail!("Empty environment variable name on line {}", line_no + 1);
                }
                let value = std::env::var(var_name).with_context(|| {
                    format!(
                        "Environment variable '{}' is not set (referenced on line {})",
                        var_name,
                        line_no + 1
                    )
                })?;
                result.push_str(&value);
                rest = &after[end + 1..];
            }
            result.push_str(rest);
        }
        if input.ends_with('\n') {
            result.push('\n');
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[node]
addresses = ["127.0.0.1:21338"]

[database]
url = "sqlite://witscan.db"
"#;

    #[test]
    fn test_load_minimal_config() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.node.addresses.len(), 1);
        assert_eq!(config.database.url, "sqlite://witscan.db");
    }

    #[test]
    fn test_default_values() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.node.timeout_secs, 60);
        assert_eq!(config.network.name, "mainnet");
        assert_eq!(config.network.address_hrp, "wit");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.insert.start_epoch, 0);
        assert_eq!(config.insert.batch_size, 50);
        assert_eq!(config.confirm.interval_secs, 30);
        assert_eq!(config.pending.interval_secs, 60);
        assert!(config.address_cache.address.is_none());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_validation_empty_addresses() {
        let toml = r#"
[node]
addresses = []

[database]
url = "sqlite://witscan.db"
"#;
        let result = Config::from_toml_str(toml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("addresses"));
    }

    #[test]
    fn test_validation_address_without_port() {
        let toml = r#"
[node]
addresses = ["localhost"]

[database]
url = "sqlite://witscan.db"
"#;
        let result = Config::from_toml_str(toml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("host:port"));
    }

    #[test]
    fn test_validation_zero_pending_interval() {
        let toml = r#"
[node]
addresses = ["127.0.0.1:21338"]

[database]
url = "sqlite://witscan.db"

[pending]
interval_secs = 0
"#;
        let result = Config::from_toml_str(toml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("interval_secs"));
    }

    #[test]
    fn test_validation_bad_log_level() {
        let toml = r#"
[node]
addresses = ["127.0.0.1:21338"]

[database]
url = "sqlite://witscan.db"

[logging]
level = "verbose"
"#;
        let result = Config::from_toml_str(toml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Logging level"));
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("WITSCAN_TEST_DB", "sqlite:///tmp/test.db");
        let expanded =
            Config::expand_env_vars("url = \"${WITSCAN_TEST_DB}\"").unwrap();
        assert_eq!(expanded, "url = \"sqlite:///tmp/test.db\"");
        std::env::remove_var("WITSCAN_TEST_DB");
    }

    #[test]
    fn test_expand_env_vars_undefined() {
        let result = Config::expand_env_vars("url = \"${WITSCAN_UNDEFINED_VAR_999}\"");
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("WITSCAN_UNDEFINED_VAR_999"));
    }

    #[test]
    fn test_expand_env_vars_unclosed() {
        let result = Config::expand_env_vars("url = \"${UNCLOSED");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Unclosed"));
    }

    #[test]
    fn test_expand_env_vars_ignores_comment_lines() {
        let input = "# example: url = \"${NOT_SET_ANYWHERE}\"\nkey = \"value\"";
        let expanded = Config::expand_env_vars(input).unwrap();
        assert!(expanded.contains("${NOT_SET_ANYWHERE}"));
        assert!(expanded.contains("key = \"value\""));
    }
}
