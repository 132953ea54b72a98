//! # Client Session
//!
//! Stateful handler for one client connection. A session authenticates the
//! client once, then loops reading one leading selector byte per request and
//! routing it to command execution, the query iterator protocol, or database
//! ingest. Requests are strictly sequential within a session; concurrency
//! comes from one task per connection.
//!
//! Response framing is completed after every operation — success, failure,
//! or timeout-triggered abort — so the client's protocol state machine stays
//! synchronized even when everything else fails. Teardown is idempotent and
//! runs on explicit exit, transport failure, and administrative stop alike.

use crate::backend::{Backend, CredentialStore, LogOutcome, Parsed, SessionLabel, SessionLog};
use crate::config::SessionOptions;
use crate::core::wire::{self, Request};
use crate::error::{constants, Result, SessionError};
use crate::protocol::auth::Authenticator;
use crate::protocol::ingest::DatabaseIngestHandler;
use crate::protocol::iterator::{QueryIterator, QueryIteratorTable};
use crate::protocol::registry::SessionRegistry;
use bytes::Bytes;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Frame-size bound for iterator id arguments.
const MAX_ID_LEN: usize = 32;

/// Armed execution deadline for one command.
///
/// A child of the session's stop token, cancelled either by the timer task
/// when the configured timeout elapses or transitively by an administrative
/// stop. The `expired` flag records which of the two happened, so the
/// surfaced failure message can distinguish a timeout from other aborts.
struct Deadline {
    token: CancellationToken,
    expired: Arc<AtomicBool>,
    timer: Option<JoinHandle<()>>,
}

impl Deadline {
    /// Arm a deadline. A zero timeout disables the timer; the token then
    /// only fires on administrative stop.
    fn arm(parent: &CancellationToken, timeout: Duration) -> Self {
        let token = parent.child_token();
        let expired = Arc::new(AtomicBool::new(false));
        let timer = if timeout.is_zero() {
            None
        } else {
            let token = token.clone();
            let expired = expired.clone();
            Some(tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                expired.store(true, Ordering::SeqCst);
                token.cancel();
            }))
        };
        Self {
            token,
            expired,
            timer,
        }
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Disarm the deadline and report whether it had expired.
    fn disarm(self) -> bool {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        self.expired.load(Ordering::SeqCst)
    }
}

/// Server-side state and protocol handler for one client connection.
pub struct Session<B: Backend> {
    id: u64,
    backend: Arc<B>,
    credentials: Arc<dyn CredentialStore>,
    context: B::Context,
    label: SessionLabel,
    queries: QueryIteratorTable<B::Cursor>,
    registry: Weak<SessionRegistry>,
    log: Arc<dyn SessionLog>,
    options: SessionOptions,
    stop: CancellationToken,
    closed: bool,
}

impl<B: Backend> Session<B> {
    /// Create a session for a freshly accepted connection. The session takes
    /// its process-wide id immediately but only registers itself after a
    /// successful handshake.
    pub fn new(
        backend: Arc<B>,
        credentials: Arc<dyn CredentialStore>,
        registry: &Arc<SessionRegistry>,
        log: Arc<dyn SessionLog>,
        options: SessionOptions,
    ) -> Self {
        let id = registry.allocate_id();
        let context = backend.open_context();
        Self {
            id,
            backend,
            credentials,
            context,
            label: SessionLabel { id, user: None },
            queries: QueryIteratorTable::new(),
            registry: Arc::downgrade(registry),
            log,
            options,
            stop: CancellationToken::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Token cancelled by an administrative stop request. The session
    /// observes it between requests and tears down cooperatively.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Drive the session over its connection: handshake, command loop,
    /// teardown. Consumes the session; the connection closes when the
    /// stream is dropped by the caller.
    pub async fn run<S>(mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (reader, writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);

        let credentials = self.credentials.clone();
        let user = match Authenticator::new(credentials.as_ref())
            .authenticate(&mut reader, &mut writer, self.log.as_ref(), &self.label)
            .await
        {
            Ok(Some(user)) => user,
            Ok(None) => {
                // The failure status has been sent; the session never starts.
                self.teardown().await;
                return Err(SessionError::Authentication(
                    constants::ERR_ACCESS_DENIED.into(),
                ));
            }
            Err(err) => {
                self.teardown().await;
                return Err(err);
            }
        };

        self.label.user = Some(user.clone());
        if let Some(registry) = self.registry.upgrade() {
            registry.register(self.id, &user, self.stop.clone()).await;
        }
        self.log
            .event(&self.label, &format!("LOGIN {user}"), LogOutcome::Ok);

        let result = self.serve(&mut reader, &mut writer).await;
        self.teardown().await;
        result
    }

    /// The request loop: one leading selector byte per request.
    async fn serve<R, W>(&mut self, reader: &mut R, writer: &mut W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let first = tokio::select! {
                _ = self.stop.cancelled() => {
                    debug!(session_id = self.id, "Stop requested, leaving request loop");
                    return Ok(());
                }
                byte = reader.read_u8() => match byte {
                    Ok(byte) => byte,
                    // Abrupt disconnect; teardown runs on the way out.
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                    Err(e) => return Err(e.into()),
                },
            };

            match Request::decode(first) {
                Request::QueryOpen => self.query_open(reader, writer).await?,
                Request::QueryAdvance => self.query_advance(reader, writer).await?,
                Request::QueryClose => self.query_close(reader, writer).await?,
                Request::Ingest => {
                    DatabaseIngestHandler::new(&*self.backend, &self.options.limits)
                        .handle(
                            &mut self.context,
                            reader,
                            writer,
                            &*self.log,
                            &self.label,
                        )
                        .await?;
                }
                Request::Command(byte) => {
                    if !self.command(byte, reader, writer).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Execute one textual command. Returns `false` when the command was the
    /// session-terminating exit directive (no response frame is sent for it).
    async fn command<R, W>(&mut self, first: u8, reader: &mut R, writer: &mut W) -> Result<bool>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let started = Instant::now();
        let mut raw = vec![first];
        raw.extend(wire::read_nul_bytes(reader, self.options.limits.max_command_len).await?);
        let input = match String::from_utf8(raw) {
            Ok(input) => input,
            Err(err) => {
                // Garbled text is a parse failure, not a session-fatal one.
                let lossy = String::from_utf8_lossy(err.as_bytes()).into_owned();
                self.log.command(
                    &self.label,
                    &lossy,
                    LogOutcome::Failed(constants::ERR_FRAME_NOT_UTF8),
                    started.elapsed(),
                );
                write_command_failure(writer, constants::ERR_FRAME_NOT_UTF8).await?;
                return Ok(true);
            }
        };
        let command = match self.backend.parse(&input) {
            Ok(Parsed::Exit) => return Ok(false),
            Ok(Parsed::Run(command)) => command,
            Err(err) => {
                let msg = err.client_message();
                self.log
                    .command(&self.label, &input, LogOutcome::Failed(&msg), started.elapsed());
                write_command_failure(writer, &msg).await?;
                return Ok(true);
            }
        };

        let deadline = Deadline::arm(&self.stop, self.options.command_timeout);
        let result = self
            .backend
            .execute(command, &mut self.context, deadline.token())
            .await;
        let expired = deadline.disarm();

        match result {
            Ok(output) => {
                writer.write_all(&output.payload).await?;
                wire::write_terminator(writer).await?;
                wire::write_nul_string(writer, &output.info).await?;
                wire::write_status(writer, true).await?;
                writer.flush().await?;
                self.log
                    .command(&self.label, &input, LogOutcome::Ok, started.elapsed());
            }
            Err(err) => {
                // A cooperative abort caused by our own deadline is surfaced
                // as a timeout; any other abort keeps its generic message.
                let msg = match err {
                    SessionError::Interrupted if expired => constants::ERR_TIMEOUT.to_string(),
                    other => other.client_message(),
                };
                write_command_failure(writer, &msg).await?;
                self.log
                    .command(&self.label, &input, LogOutcome::Failed(&msg), started.elapsed());
            }
        }
        Ok(true)
    }

    /// Open a new query iterator. The id is consumed before compilation, so
    /// failed opens never cause id reuse.
    async fn query_open<R, W>(&mut self, reader: &mut R, writer: &mut W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let query = wire::read_nul_string(reader, self.options.limits.max_query_len).await?;
        let id = self.queries.next_id();

        match self.backend.open_query(&query, &mut self.context) {
            Ok(cursor) => {
                self.queries
                    .insert(QueryIterator::new(id, query.clone(), cursor));
                self.log.event(&self.label, &query, LogOutcome::Ok);
                wire::write_nul_string(writer, &id.to_string()).await?;
                wire::write_status(writer, true).await?;
            }
            Err(err) => {
                let msg = err.client_message();
                self.log.event(&self.label, &query, LogOutcome::Failed(&msg));
                wire::write_nul_string(writer, &id.to_string()).await?;
                wire::write_nul_string(writer, &msg).await?;
                wire::write_status(writer, false).await?;
            }
        }
        writer.flush().await?;
        Ok(())
    }

    /// Advance an iterator by one item. Unknown or closed ids are a benign
    /// no-op; exhaustion auto-closes the iterator and is signaled only by
    /// the absence of streamed bytes.
    async fn query_advance<R, W>(&mut self, reader: &mut R, writer: &mut W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        enum Outcome {
            Missing,
            Item(Bytes),
            Exhausted(u64),
            Failed { id: u64, query: String, msg: String },
        }

        let arg = wire::read_nul_string(reader, MAX_ID_LEN).await?;
        // Ids that never parse can never have been assigned; same no-op.
        let id = arg.parse::<u64>().ok();

        let outcome = match id.and_then(|id| self.queries.get_mut(id).map(|it| (id, it))) {
            None => Outcome::Missing,
            Some((id, iterator)) => match iterator.advance().await {
                Ok(Some(item)) => Outcome::Item(item),
                Ok(None) => Outcome::Exhausted(id),
                Err(err) => Outcome::Failed {
                    id,
                    query: iterator.query().to_string(),
                    msg: err.client_message(),
                },
            },
        };

        match outcome {
            Outcome::Missing => {
                wire::write_terminator(writer).await?;
                wire::write_status(writer, true).await?;
            }
            Outcome::Item(item) => {
                writer.write_all(&item).await?;
                wire::write_terminator(writer).await?;
                wire::write_status(writer, true).await?;
            }
            Outcome::Exhausted(id) => {
                self.queries.remove(id);
                wire::write_terminator(writer).await?;
                wire::write_status(writer, true).await?;
            }
            Outcome::Failed { id, query, msg } => {
                // Any advance error forces the iterator closed.
                self.queries.remove(id);
                self.log.event(&self.label, &query, LogOutcome::Failed(&msg));
                wire::write_terminator(writer).await?;
                wire::write_status(writer, false).await?;
                wire::write_nul_string(writer, &msg).await?;
            }
        }
        writer.flush().await?;
        Ok(())
    }

    /// Close an iterator. The reply framing is identical whether or not the
    /// id existed.
    async fn query_close<R, W>(&mut self, reader: &mut R, writer: &mut W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let arg = wire::read_nul_string(reader, MAX_ID_LEN).await?;
        if let Ok(id) = arg.parse::<u64>() {
            self.queries.remove(id);
        }
        wire::write_terminator(writer).await?;
        wire::write_status(writer, true).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Release everything the session owns. Safe to call from the normal
    /// loop-exit path and from error paths alike.
    async fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.queries.close_all();
        self.backend.close_context(&mut self.context);
        if let Some(registry) = self.registry.upgrade() {
            registry.deregister(self.id).await;
        }
        if let Some(user) = self.label.user.clone() {
            self.log
                .event(&self.label, &format!("LOGOUT {user}"), LogOutcome::Ok);
        }
    }
}

/// Failure response frame for a command: end-of-result terminator, info
/// message, failure status.
async fn write_command_failure<W>(writer: &mut W, msg: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    wire::write_terminator(writer).await?;
    wire::write_nul_string(writer, msg).await?;
    wire::write_status(writer, false).await?;
    writer.flush().await?;
    Ok(())
}
