//! Configuration module for the relay.
//!
//! The port comes from the command line. Tuning knobs (read chunk size,
//! event batch size, listen backlog) and the log level may come from an
//! optional TOML file. CLI arguments take precedence over config file values.

use clap::error::ErrorKind;
use clap::Parser;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Usage message printed when the command line cannot be parsed.
pub const USAGE_MESSAGE: &str = "Wrong number of arguments\n";

/// Command-line arguments for the relay
#[derive(Parser, Debug)]
#[command(name = "mini-relay")]
#[command(author = "mini-relay authors")]
#[command(version = "0.1.0")]
#[command(about = "A line-delimited TCP broadcast relay", long_about = None)]
pub struct CliArgs {
    /// TCP port to listen on (loopback only)
    pub port: u16,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Maximum bytes taken from a socket in a single read
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
    /// Readiness events collected per wait
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: default_read_chunk_size(),
            event_capacity: default_event_capacity(),
            backlog: default_backlog(),
        }
    }
}

/// Logging configuration
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

fn default_read_chunk_size() -> usize {
    60_000
}

fn default_event_capacity() -> usize {
    1024
}

fn default_backlog() -> i32 {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Whether clap only wants to print help or version text.
pub fn is_informational(err: &clap::Error) -> bool {
    matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion)
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub read_chunk_size: usize,
    pub event_capacity: usize,
    pub backlog: i32,
    pub log_level: String,
}

impl Config {
    /// Load configuration from the process arguments and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::try_parse().map_err(ConfigError::Usage)?;
        Self::from_cli(cli)
    }

    /// Resolve configuration from already parsed CLI arguments.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let server = toml_config.server;
        if server.read_chunk_size == 0 {
            return Err(ConfigError::InvalidValue("read_chunk_size must be non-zero"));
        }
        if server.event_capacity == 0 {
            return Err(ConfigError::InvalidValue("event_capacity must be non-zero"));
        }

        Ok(Config {
            port: cli.port,
            read_chunk_size: server.read_chunk_size,
            event_capacity: server.event_capacity,
            backlog: server.backlog,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// Address the relay binds to. Always loopback.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    Usage(clap::Error),
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Usage(e) => write!(f, "Invalid arguments: {e}"),
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
