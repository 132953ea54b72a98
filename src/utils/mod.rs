//! # Utility Modules
//!
//! Supporting utilities shared across the protocol implementation.
//!
//! ## Components
//! - **Logging**: tracing subscriber initialization from configuration

pub mod logging;
