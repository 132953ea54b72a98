//! # Configuration Management
//!
//! Centralized configuration for the session protocol.
//!
//! This module provides structured configuration for server deployments:
//! listener parameters, the cooperative command timeout, frame-size limits,
//! and logging options.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-variable overrides via `from_env()` (`DOCDB_*`)
//!
//! ## Security Considerations
//! - Frame-size limits bound what a single client request may allocate
//! - The command timeout prevents a single command from pinning a session

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default cooperative command timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Max allowed command frame length (bytes).
pub const MAX_COMMAND_LEN: usize = 1024 * 1024;

/// Max allowed query text length (bytes).
pub const MAX_QUERY_LEN: usize = 1024 * 1024;

/// Max allowed ingest document size (e.g. 64 MB).
pub const MAX_DOCUMENT_SIZE: usize = 64 * 1024 * 1024;

/// Main configuration structure containing all configurable settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Frame-size limits
    #[serde(default)]
    pub limits: LimitConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| SessionError::Config(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| SessionError::Config(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| SessionError::Config(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("DOCDB_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(timeout) = std::env::var("DOCDB_COMMAND_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.server.command_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(max) = std::env::var("DOCDB_MAX_CONNECTIONS") {
            if let Ok(val) = max.parse::<usize>() {
                config.server.max_connections = val;
            }
        }

        if let Ok(size) = std::env::var("DOCDB_MAX_DOCUMENT_SIZE") {
            if let Ok(val) = size.parse::<usize>() {
                config.limits.max_document_size = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// The per-session options derived from this configuration.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            command_timeout: self.server.command_timeout,
            limits: self.limits.clone(),
        }
    }

    /// Validate the configuration for common issues and misconfigurations.
    ///
    /// Returns a list of validation errors. Empty list means the
    /// configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.limits.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SessionError::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server listen address (e.g., "127.0.0.1:1984")
    pub address: String,

    /// Maximum number of concurrent sessions
    pub max_connections: usize,

    /// Cooperative timeout for a single command execution.
    /// Zero disables the deadline entirely.
    #[serde(with = "duration_serde")]
    pub command_timeout: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:1984"),
            max_connections: 1000,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:1984')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        // Zero disables the deadline; anything else below 10ms is a footgun.
        if !self.command_timeout.is_zero() && self.command_timeout.as_millis() < 10 {
            errors.push("Command timeout too short (minimum: 10ms, or 0 to disable)".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Frame-size limits applied to client requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitConfig {
    /// Maximum command frame length in bytes
    pub max_command_len: usize,

    /// Maximum query text length in bytes
    pub max_query_len: usize,

    /// Maximum ingest document size in bytes
    pub max_document_size: usize,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_command_len: MAX_COMMAND_LEN,
            max_query_len: MAX_QUERY_LEN,
            max_document_size: MAX_DOCUMENT_SIZE,
        }
    }
}

impl LimitConfig {
    /// Validate limit configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_command_len == 0 {
            errors.push("Max command length cannot be 0".to_string());
        }

        if self.max_query_len == 0 {
            errors.push("Max query length cannot be 0".to_string());
        }

        if self.max_document_size == 0 {
            errors.push("Max document size cannot be 0".to_string());
        } else if self.max_document_size > 1024 * 1024 * 1024 {
            errors.push(format!(
                "Max document size too large: {} bytes (maximum recommended: 1 GB)",
                self.max_document_size
            ));
        }

        errors
    }
}

/// Per-session options derived from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Cooperative timeout for a single command execution; zero disables it.
    pub command_timeout: Duration,

    /// Frame-size limits
    pub limits: LimitConfig,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Config::default().session_options()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("docdb-protocol"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
