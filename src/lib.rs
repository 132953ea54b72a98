//! # docdb-protocol
//!
//! Session protocol core for a multi-client document database server.
//!
//! For each accepted connection the crate provides a stateful [`Session`]
//! that authenticates the client with a nonce challenge-response handshake,
//! executes textual database commands under a cooperative timeout, and
//! multiplexes any number of client-addressable query result iterators over
//! a single socket.
//!
//! ## Architecture
//! - [`core::wire`] — framing primitives: NulStrings, status bytes, escaped
//!   raw content, and the total request decode
//! - [`protocol::auth`] — the challenge-response handshake
//! - [`protocol::session`] — the per-connection request loop and teardown
//! - [`protocol::iterator`] — the per-session query iterator table
//! - [`protocol::ingest`] — streaming database creation
//! - [`protocol::registry`] — the process-wide live-session registry
//! - [`backend`] — trait seams for the database engine, credential store,
//!   and structured log sink, plus an in-memory reference backend
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use docdb_protocol::backend::{MemoryBackend, TracingLog};
//! use docdb_protocol::config::Config;
//! use docdb_protocol::{Session, SessionRegistry};
//!
//! # async fn serve(stream: tokio::net::TcpStream) -> docdb_protocol::Result<()> {
//! let backend = Arc::new(MemoryBackend::new().with_user("admin", "admin"));
//! let registry = Arc::new(SessionRegistry::new());
//! let options = Config::default().session_options();
//!
//! let session = Session::new(
//!     backend.clone(),
//!     backend,
//!     &registry,
//!     Arc::new(TracingLog),
//!     options,
//! );
//! session.run(stream).await
//! # }
//! ```
//!
//! Connection acceptance and listener setup are deliberately left to the
//! embedding server; a session only needs an established byte stream.

pub mod backend;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod utils;

pub use config::{Config, SessionOptions};
pub use error::{Result, SessionError};
pub use protocol::{Session, SessionInfo, SessionRegistry};
