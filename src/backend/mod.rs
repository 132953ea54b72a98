//! # Backend Collaborators
//!
//! The session protocol treats everything that gives commands and queries
//! their meaning as an external collaborator behind a trait seam:
//!
//! - [`CredentialStore`] — username to stored secret hash lookup
//! - [`Backend`] — command parsing/execution, query compilation, database
//!   building, and the per-session execution context
//! - [`QueryCursor`] — one open query's result stream
//! - [`SessionLog`] — structured lifecycle and command logging
//!
//! The protocol core only moves bytes and state; it never interprets command
//! or query text itself.

use crate::error::Result;
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod memory;

pub use memory::MemoryBackend;

/// Looks up the stored secret hash for a username.
///
/// The store never sees a raw password: it holds `hex(sha256(password))` and
/// the handshake compares digests derived from that hash and the connection
/// nonce.
pub trait CredentialStore: Send + Sync {
    /// The stored secret hash for `username`, or `None` if unknown.
    fn secret_hash(&self, username: &str) -> Option<String>;
}

/// Result of parsing one command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed<C> {
    /// The session-terminating exit directive.
    Exit,
    /// An executable command.
    Run(C),
}

/// Output of a successful command execution.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Result payload streamed to the client before the response frame.
    pub payload: Vec<u8>,
    /// Informational message carried in the response frame.
    pub info: String,
}

/// One open query's result stream. Owned exclusively by its iterator entry.
pub trait QueryCursor: Send {
    /// Produce the next item's serialized bytes, or `None` once exhausted.
    fn next(&mut self) -> impl Future<Output = Result<Option<Bytes>>> + Send;

    /// Release any resources held by the cursor. Idempotent.
    fn close(&mut self);
}

/// The database engine behind a session: command parsing and execution,
/// query compilation, and database building.
///
/// One `Backend` is shared by all sessions; each session owns a private
/// `Context` created at accept time and closed at teardown.
pub trait Backend: Send + Sync + 'static {
    /// A parsed, executable command.
    type Command: Send;
    /// Per-session execution context.
    type Context: Send;
    /// Cursor type produced by [`Backend::open_query`].
    type Cursor: QueryCursor;

    /// Create a fresh execution context for a new session.
    fn open_context(&self) -> Self::Context;

    /// Close a session's execution context. Idempotent.
    fn close_context(&self, ctx: &mut Self::Context);

    /// Parse one command frame. Malformed text is a
    /// [`SessionError::Parse`](crate::error::SessionError::Parse) and never
    /// ends the session.
    fn parse(&self, input: &str) -> Result<Parsed<Self::Command>>;

    /// Execute a parsed command. The command must observe `cancel` at safe
    /// points and bail out with
    /// [`SessionError::Interrupted`](crate::error::SessionError::Interrupted)
    /// once it is cancelled.
    fn execute(
        &self,
        command: Self::Command,
        ctx: &mut Self::Context,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<CommandOutput>> + Send;

    /// Compile a query and eagerly initialize its cursor. Compilation and
    /// priming errors surface here, before the iterator is registered.
    fn open_query(&self, query: &str, ctx: &mut Self::Context) -> Result<Self::Cursor>;

    /// Build a database `name` from raw document content. Returns an
    /// informational message on success.
    fn build_database(
        &self,
        name: &str,
        content: &[u8],
        ctx: &mut Self::Context,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Identifies one session in log output.
#[derive(Debug, Clone, Default)]
pub struct SessionLabel {
    /// Process-wide session id.
    pub id: u64,
    /// Bound username, set after a successful handshake.
    pub user: Option<String>,
}

impl fmt::Display for SessionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(user) => write!(f, "[{}:{}]", self.id, user),
            None => write!(f, "[{}]", self.id),
        }
    }
}

/// Outcome of a logged operation.
#[derive(Debug, Clone, Copy)]
pub enum LogOutcome<'a> {
    /// The operation succeeded.
    Ok,
    /// The operation failed with the given message.
    Failed(&'a str),
}

/// Structured log sink observing session lifecycle and command execution.
pub trait SessionLog: Send + Sync {
    /// Record a lifecycle event (login, logout, query open, ingest).
    fn event(&self, session: &SessionLabel, message: &str, outcome: LogOutcome<'_>);

    /// Record one command execution with its elapsed time.
    fn command(&self, session: &SessionLabel, text: &str, outcome: LogOutcome<'_>, elapsed: Duration);
}

/// [`SessionLog`] implementation emitting `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl SessionLog for TracingLog {
    fn event(&self, session: &SessionLabel, message: &str, outcome: LogOutcome<'_>) {
        match outcome {
            LogOutcome::Ok => tracing::info!(session = %session, "{message}"),
            LogOutcome::Failed(err) => {
                tracing::warn!(session = %session, error = %err, "{message}");
            }
        }
    }

    fn command(
        &self,
        session: &SessionLabel,
        text: &str,
        outcome: LogOutcome<'_>,
        elapsed: Duration,
    ) {
        let elapsed_ms = elapsed.as_millis() as u64;
        match outcome {
            LogOutcome::Ok => {
                tracing::info!(session = %session, elapsed_ms, command = %text, "Command executed");
            }
            LogOutcome::Failed(err) => {
                tracing::warn!(
                    session = %session,
                    elapsed_ms,
                    command = %text,
                    error = %err,
                    "Command failed"
                );
            }
        }
    }
}
