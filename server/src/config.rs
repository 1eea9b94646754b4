//! Server configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty (or
//! absent) file yields a runnable server. The binary's CLI flags
//! override file values.

use io_driver::Engine;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

/// Default Minecraft server port.
fn default_port() -> u16 {
    25565
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// I/O engine selection: "auto", "mio", or "uring".
    #[serde(default)]
    pub io_engine: Engine,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Port to listen on. The bind address is always `0.0.0.0`.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, colored output.
    #[default]
    Pretty,
    /// Single-line condensed output.
    Compact,
    /// JSON lines.
    Json,
}

/// Logging settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter; `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include timestamps in output.
    #[serde(default = "default_true")]
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            timestamps: true,
        }
    }
}

/// Configuration loading failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML or has unknown/ill-typed fields.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// The address to bind: `INADDR_ANY` on the configured port.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.server.port))
    }
}
