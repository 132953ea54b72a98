//! # Session Protocol
//!
//! The server-side protocol layers: challenge-response authentication, the
//! per-connection session loop, the query iterator table, database ingest,
//! and the process-wide session registry.

pub mod auth;
pub mod ingest;
pub mod iterator;
pub mod registry;
pub mod session;

pub use registry::{SessionInfo, SessionRegistry};
pub use session::Session;
