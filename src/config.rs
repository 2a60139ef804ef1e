//! Configuration for the echo benchmark server.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// Engine used to drive the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    /// Edge-triggered readiness via epoll (mio)
    #[default]
    Epoll,
    /// Single-shot completion-based I/O via io_uring
    Uring,
    /// Multishot accept/recv via io_uring with a provided buffer ring
    Multishot,
}

/// Command-line arguments for the echo server.
#[derive(Parser, Debug)]
#[command(name = "echobench")]
#[command(version = "0.1.0")]
#[command(about = "TCP echo benchmark server: epoll vs io_uring vs io_uring multishot", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Engine to benchmark (epoll, uring, multishot)
    #[arg(short = 'm', long, value_enum)]
    pub mode: Option<EngineType>,

    /// TCP port to listen on
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure.
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Engine to benchmark
    #[serde(default)]
    pub mode: EngineType,
    /// TCP port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: EngineType::default(),
            port: default_port(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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

fn default_port() -> u16 {
    9999
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: EngineType,
    pub port: u16,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: EngineType::default(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::resolve(cli, toml_config))
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            mode: cli.mode.unwrap_or(toml_config.server.mode),
            port: cli.port.unwrap_or(toml_config.server.port),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }
}

/// Configuration loading errors.
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
        assert_eq!(config.mode, EngineType::Epoll);
        assert_eq!(config.port, 9999);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            mode = "multishot"
            port = 19993

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.mode, EngineType::Multishot);
        assert_eq!(config.server.port, 19993);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_str = r#"
            [server]
            mode = "uring"
            port = 12000
        "#;
        let toml_config: TomlConfig = toml::from_str(toml_str).unwrap();

        let cli = CliArgs {
            config: None,
            mode: Some(EngineType::Epoll),
            port: None,
            log_level: None,
        };

        let config = Config::resolve(cli, toml_config);
        assert_eq!(config.mode, EngineType::Epoll);
        assert_eq!(config.port, 12000);
        assert_eq!(config.log_level, "info");
    }
}
