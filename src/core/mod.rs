//! # Core Protocol Functionality
//!
//! Wire-level building blocks shared by every sub-protocol: framing
//! primitives and the total request decode.

pub mod wire;

pub use wire::Request;
