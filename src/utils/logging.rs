//! # Logging Initialization
//!
//! Sets up the global `tracing` subscriber from a [`LoggingConfig`]. Console
//! and file output are independent layers, so both can be active at once.
//! Honors `RUST_LOG` when set; otherwise falls back to the configured level.

use crate::config::LoggingConfig;
use crate::error::{Result, SessionError};
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Per-layer filter; `EnvFilter` is not cloneable, so each layer builds its
/// own.
fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()))
}

/// Initialize the global subscriber. Returns an error if logging was
/// already initialized or the log file cannot be opened.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let console_layer = if config.log_to_console {
        let layer = tracing_subscriber::fmt::layer();
        let layer = if config.json_format {
            layer.json().boxed()
        } else {
            layer.boxed()
        };
        Some(layer.with_filter(env_filter(config)))
    } else {
        None
    };

    let file_layer = if config.log_to_file {
        let path = config.log_file_path.as_deref().ok_or_else(|| {
            SessionError::Config("log_file_path must be set when log_to_file is true".into())
        })?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SessionError::Config(format!("Failed to open log file: {e}")))?;
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(Arc::new(file))
            .with_ansi(false);
        let layer = if config.json_format {
            layer.json().boxed()
        } else {
            layer.boxed()
        };
        Some(layer.with_filter(env_filter(config)))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| SessionError::Config(format!("Failed to initialize logging: {e}")))
}
