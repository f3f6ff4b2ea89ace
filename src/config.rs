//! Configuration for the reactor and its demo binaries.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the demo binaries.
#[derive(Parser, Debug)]
#[command(name = "sockmux")]
#[command(version = "0.1.0")]
#[command(about = "A single-threaded readiness-driven TCP endpoint multiplexer", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind (server) or connect to (client)
    #[arg(short, long)]
    pub address: Option<String>,

    /// Port to bind or connect to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Pending-connection queue depth (server only)
    #[arg(short, long)]
    pub backlog: Option<u32>,

    /// Poll timeout in milliseconds (also the connect timeout in client mode)
    #[arg(short, long)]
    pub timeout_ms: Option<u64>,

    /// Drain timeout in milliseconds for graceful stop (0 = unbounded)
    #[arg(long)]
    pub drain_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub reactor: ReactorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Address/port configuration
#[derive(Debug, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            backlog: default_backlog(),
        }
    }
}

/// Loop timing configuration
#[derive(Debug, Deserialize)]
pub struct ReactorConfig {
    /// Poll timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Drain timeout in milliseconds; 0 disables the bound
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_address() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1234
}

fn default_backlog() -> u32 {
    1
}

fn default_timeout_ms() -> u64 {
    100
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub address: String,
    pub port: u16,
    pub backlog: u32,
    /// Poll bound; also the connect timeout in client mode.
    pub timeout: Duration,
    /// Bound on the graceful-stop drain phase. `None` drains forever.
    pub drain_timeout: Option<Duration>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            backlog: default_backlog(),
            timeout: Duration::from_millis(default_timeout_ms()),
            drain_timeout: Some(Duration::from_millis(default_drain_timeout_ms())),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::merge(CliArgs::parse())
    }

    fn merge(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let drain_ms = cli
            .drain_timeout_ms
            .unwrap_or(toml_config.reactor.drain_timeout_ms);

        Ok(Config {
            address: cli.address.unwrap_or(toml_config.endpoint.address),
            port: cli.port.unwrap_or(toml_config.endpoint.port),
            backlog: cli.backlog.unwrap_or(toml_config.endpoint.backlog),
            timeout: Duration::from_millis(
                cli.timeout_ms.unwrap_or(toml_config.reactor.timeout_ms),
            ),
            drain_timeout: if drain_ms == 0 {
                None
            } else {
                Some(Duration::from_millis(drain_ms))
            },
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.address, "localhost");
        assert_eq!(config.port, 1234);
        assert_eq!(config.backlog, 1);
        assert_eq!(config.timeout, Duration::from_millis(100));
        assert_eq!(config.drain_timeout, Some(Duration::from_millis(5000)));
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [endpoint]
            address = "0.0.0.0"
            port = 9000
            backlog = 16

            [reactor]
            timeout_ms = 50
            drain_timeout_ms = 0

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.endpoint.address, "0.0.0.0");
        assert_eq!(config.endpoint.port, 9000);
        assert_eq!(config.endpoint.backlog, 16);
        assert_eq!(config.reactor.timeout_ms, 50);
        assert_eq!(config.reactor.drain_timeout_ms, 0);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_zero_drain_timeout_means_unbounded() {
        let cli = CliArgs {
            config: None,
            address: None,
            port: None,
            backlog: None,
            timeout_ms: Some(10),
            drain_timeout_ms: Some(0),
            log_level: "info".to_string(),
        };

        let config = Config::merge(cli).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(10));
        assert!(config.drain_timeout.is_none());
    }
}
