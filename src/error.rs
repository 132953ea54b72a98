//! # Error Types
//!
//! Comprehensive error handling for the session protocol.
//!
//! This module defines all error variants that can occur while serving a
//! client session, from low-level transport failures to command and query
//! execution problems.
//!
//! ## Failure policy
//! - **Transport failures** (`Io`, `OversizedFrame`, `InvalidString`) end the
//!   session immediately and are never reported to the client.
//! - **Everything else** is recovered locally and reported through the
//!   standard response framing; the session keeps serving requests.
//! - `Interrupted` marks a cooperative abort of a running command. The
//!   session rewrites it to the timeout message when its own deadline fired.
//!
//! All errors implement `std::error::Error` for interoperability.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common cases.
pub mod constants {
    /// Authentication errors
    pub const ERR_ACCESS_DENIED: &str = "Access denied";

    /// Command execution errors
    pub const ERR_INTERRUPTED: &str = "Command was interrupted";
    pub const ERR_TIMEOUT: &str = "Command execution exceeded the configured timeout";

    /// Framing errors
    pub const ERR_FRAME_NOT_UTF8: &str = "Frame contains invalid UTF-8";
    pub const ERR_EMBEDDED_NUL: &str = "String frame contains an embedded NUL byte";

    /// Synchronization errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
}

/// Primary error type for all session protocol operations.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Syntax error: {0}")]
    Parse(String),

    #[error("Command failed: {0}")]
    Execution(String),

    #[error("Command was interrupted")]
    Interrupted,

    #[error("Query error: {0}")]
    Query(String),

    #[error("Ingest failed: {0}")]
    Ingest(String),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Invalid string frame: {0}")]
    InvalidString(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl SessionError {
    /// The message surfaced to the client through response framing.
    ///
    /// Reportable variants carry a plain text message without the variant
    /// prefix; transport-level variants fall back to their full display form
    /// (they are never sent to the client, this is for logging symmetry).
    pub fn client_message(&self) -> String {
        match self {
            SessionError::Authentication(msg)
            | SessionError::Parse(msg)
            | SessionError::Execution(msg)
            | SessionError::Query(msg)
            | SessionError::Ingest(msg)
            | SessionError::Custom(msg) => msg.clone(),
            SessionError::Interrupted => constants::ERR_INTERRUPTED.to_string(),
            other => other.to_string(),
        }
    }

    /// Whether this error must terminate the session.
    ///
    /// Only transport-level failures are session-fatal; every other variant
    /// is reported to the client and the command loop continues.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Io(_) | SessionError::OversizedFrame(_) | SessionError::InvalidString(_)
        )
    }
}

/// Type alias for Results using SessionError
pub type Result<T> = std::result::Result<T, SessionError>;
