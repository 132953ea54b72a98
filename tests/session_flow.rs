#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end protocol scenarios driving a session over in-memory pipes:
//! handshake, command execution, query iterators, ingest, timeouts, and
//! teardown.

use docdb_protocol::backend::{
    LogOutcome, MemoryBackend, SessionLabel, SessionLog, TracingLog,
};
use docdb_protocol::config::SessionOptions;
use docdb_protocol::core::wire;
use docdb_protocol::protocol::auth;
use docdb_protocol::{Session, SessionError, SessionRegistry};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

struct TestClient {
    backend: Arc<MemoryBackend>,
    registry: Arc<SessionRegistry>,
    session_id: u64,
    handle: JoinHandle<Result<(), SessionError>>,
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
}

/// Log sink recording every command entry, for tests asserting on logging.
#[derive(Default)]
struct RecordingLog {
    commands: Mutex<Vec<(String, bool)>>,
}

impl RecordingLog {
    fn commands(&self) -> Vec<(String, bool)> {
        self.commands.lock().unwrap().clone()
    }
}

impl SessionLog for RecordingLog {
    fn event(&self, _session: &SessionLabel, _message: &str, _outcome: LogOutcome<'_>) {}

    fn command(
        &self,
        _session: &SessionLabel,
        text: &str,
        outcome: LogOutcome<'_>,
        _elapsed: Duration,
    ) {
        let ok = matches!(outcome, LogOutcome::Ok);
        self.commands.lock().unwrap().push((text.to_string(), ok));
    }
}

async fn spawn_session(backend: Arc<MemoryBackend>, options: SessionOptions) -> TestClient {
    spawn_session_with_log(backend, options, Arc::new(TracingLog)).await
}

async fn spawn_session_with_log(
    backend: Arc<MemoryBackend>,
    options: SessionOptions,
    log: Arc<dyn SessionLog>,
) -> TestClient {
    let registry = Arc::new(SessionRegistry::new());
    let (client, server) = tokio::io::duplex(64 * 1024);
    let session = Session::new(backend.clone(), backend.clone(), &registry, log, options);
    let session_id = session.id();
    let handle = tokio::spawn(session.run(server));
    let (reader, writer) = tokio::io::split(client);
    TestClient {
        backend,
        registry,
        session_id,
        handle,
        reader,
        writer,
    }
}

async fn login_ok(client: &mut TestClient, user: &str, password: &str) {
    let ok = auth::client_handshake(&mut client.reader, &mut client.writer, user, password)
        .await
        .unwrap();
    assert!(ok, "handshake should succeed");
}

async fn read_until_nul<R: AsyncRead + Unpin>(reader: &mut R) -> Vec<u8> {
    let mut buf = Vec::new();
    loop {
        let byte = reader.read_u8().await.unwrap();
        if byte == 0 {
            return buf;
        }
        buf.push(byte);
    }
}

async fn read_string<R: AsyncRead + Unpin>(reader: &mut R) -> String {
    String::from_utf8(read_until_nul(reader).await).unwrap()
}

async fn read_status<R: AsyncRead + Unpin>(reader: &mut R) -> u8 {
    reader.read_u8().await.unwrap()
}

async fn send_command<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) {
    writer.write_all(text.as_bytes()).await.unwrap();
    writer.write_u8(0).await.unwrap();
    writer.flush().await.unwrap();
}

/// Read a command reply: (payload, info, status).
async fn read_command_reply(client: &mut TestClient) -> (Vec<u8>, String, u8) {
    let payload = read_until_nul(&mut client.reader).await;
    let info = read_string(&mut client.reader).await;
    let status = read_status(&mut client.reader).await;
    (payload, info, status)
}

/// Open a query; returns (id, error message if any, status).
async fn query_open(client: &mut TestClient, query: &str) -> (String, Option<String>, u8) {
    client.writer.write_u8(0).await.unwrap();
    send_command(&mut client.writer, query).await;
    let id = read_string(&mut client.reader).await;
    // After the id, a 0x00 byte is the success status; anything else is the
    // first byte of the error message (printable), followed by the status.
    let next = client.reader.read_u8().await.unwrap();
    if next == 0 {
        (id, None, 0)
    } else {
        let mut msg = vec![next];
        msg.extend(read_until_nul(&mut client.reader).await);
        let status = read_status(&mut client.reader).await;
        (id, Some(String::from_utf8(msg).unwrap()), status)
    }
}

/// Advance a query; returns (item bytes, status, error message if any).
async fn query_advance(client: &mut TestClient, id: &str) -> (Vec<u8>, u8, Option<String>) {
    client.writer.write_u8(1).await.unwrap();
    send_command(&mut client.writer, id).await;
    let item = read_until_nul(&mut client.reader).await;
    let status = read_status(&mut client.reader).await;
    let msg = if status == 1 {
        Some(read_string(&mut client.reader).await)
    } else {
        None
    };
    (item, status, msg)
}

async fn query_close(client: &mut TestClient, id: &str) -> u8 {
    client.writer.write_u8(2).await.unwrap();
    send_command(&mut client.writer, id).await;
    let terminator = read_until_nul(&mut client.reader).await;
    assert!(terminator.is_empty());
    read_status(&mut client.reader).await
}

/// Ingest a document; returns (message, status).
async fn ingest(client: &mut TestClient, name: &str, content: &[u8]) -> (String, u8) {
    client.writer.write_u8(3).await.unwrap();
    send_command(&mut client.writer, name).await;
    wire::write_escaped_content(&mut client.writer, content)
        .await
        .unwrap();
    client.writer.flush().await.unwrap();
    let msg = read_string(&mut client.reader).await;
    let status = read_status(&mut client.reader).await;
    (msg, status)
}

fn test_backend() -> Arc<MemoryBackend> {
    Arc::new(
        MemoryBackend::new()
            .with_user("admin", "admin")
            .with_database("shop", "<items/>"),
    )
}

// ============================================================================
// AUTHENTICATION
// ============================================================================

#[tokio::test]
async fn test_valid_credentials_start_a_command_accepting_session() {
    let mut client = spawn_session(test_backend(), SessionOptions::default()).await;
    login_ok(&mut client, "admin", "admin").await;

    send_command(&mut client.writer, "list").await;
    let (payload, info, status) = read_command_reply(&mut client).await;
    assert_eq!(status, 0);
    assert_eq!(payload, b"shop");
    assert!(info.contains("1 database"));

    // The session registered itself after the handshake.
    assert_eq!(client.registry.len().await, 1);
}

#[tokio::test]
async fn test_invalid_credentials_leave_no_session_state() {
    let mut client = spawn_session(test_backend(), SessionOptions::default()).await;
    let ok = auth::client_handshake(&mut client.reader, &mut client.writer, "admin", "wrong")
        .await
        .unwrap();
    assert!(!ok);

    let result = client.handle.await.unwrap();
    assert!(matches!(result, Err(SessionError::Authentication(_))));
    assert!(client.registry.is_empty().await);
    assert_eq!(client.backend.closed_contexts(), 1);
}

// ============================================================================
// QUERY ITERATOR PROTOCOL
// ============================================================================

#[tokio::test]
async fn test_open_advance_exhaust_close_lifecycle() {
    let mut client = spawn_session(test_backend(), SessionOptions::default()).await;
    login_ok(&mut client, "admin", "admin").await;

    let (id, err, status) = query_open(&mut client, "1+1").await;
    assert_eq!((id.as_str(), err, status), ("0", None, 0));

    let (item, status, _) = query_advance(&mut client, "0").await;
    assert_eq!(item, b"2");
    assert_eq!(status, 0);

    // Exhausted: no bytes, success status, auto-closed.
    let (item, status, _) = query_advance(&mut client, "0").await;
    assert!(item.is_empty());
    assert_eq!(status, 0);

    // Closing a never-opened id is benign.
    assert_eq!(query_close(&mut client, "5").await, 0);

    // The exhausted iterator released its cursor.
    assert_eq!(client.backend.open_cursors(), 0);
}

#[tokio::test]
async fn test_two_queries_have_distinct_stable_ids() {
    let mut client = spawn_session(test_backend(), SessionOptions::default()).await;
    login_ok(&mut client, "admin", "admin").await;

    let (first, _, _) = query_open(&mut client, "1+1").await;
    let (second, _, _) = query_open(&mut client, "10, 20").await;
    assert_eq!(first, "0");
    assert_eq!(second, "1");

    // Closing one leaves the other's stream unaffected.
    assert_eq!(query_close(&mut client, &first).await, 0);
    let (item, status, _) = query_advance(&mut client, &second).await;
    assert_eq!(item, b"10");
    assert_eq!(status, 0);
    let (item, _, _) = query_advance(&mut client, &second).await;
    assert_eq!(item, b"20");
}

#[tokio::test]
async fn test_advance_on_unknown_id_is_a_benign_no_op() {
    let mut client = spawn_session(test_backend(), SessionOptions::default()).await;
    login_ok(&mut client, "admin", "admin").await;

    for id in ["7", "abc", ""] {
        let (item, status, msg) = query_advance(&mut client, id).await;
        assert!(item.is_empty());
        assert_eq!(status, 0);
        assert!(msg.is_none());
    }
}

#[tokio::test]
async fn test_failed_open_burns_the_id_without_registering() {
    let mut client = spawn_session(test_backend(), SessionOptions::default()).await;
    login_ok(&mut client, "admin", "admin").await;

    let (id, err, status) = query_open(&mut client, "1+").await;
    assert_eq!(id, "0");
    assert_eq!(status, 1);
    assert!(err.unwrap().contains("expected a number"));
    assert_eq!(client.backend.open_cursors(), 0);

    // The next open gets a fresh id; the failed one stays unknown.
    let (id, err, status) = query_open(&mut client, "7").await;
    assert_eq!((id.as_str(), err, status), ("1", None, 0));
    let (item, status, _) = query_advance(&mut client, "0").await;
    assert!(item.is_empty());
    assert_eq!(status, 0);
}

#[tokio::test]
async fn test_advance_error_force_closes_the_iterator() {
    let mut client = spawn_session(test_backend(), SessionOptions::default()).await;
    login_ok(&mut client, "admin", "admin").await;

    let (id, _, status) = query_open(&mut client, "1, error").await;
    assert_eq!(status, 0);

    let (item, status, _) = query_advance(&mut client, &id).await;
    assert_eq!(item, b"1");
    assert_eq!(status, 0);

    let (item, status, msg) = query_advance(&mut client, &id).await;
    assert!(item.is_empty());
    assert_eq!(status, 1);
    assert!(msg.unwrap().contains("simulated runtime error"));
    assert_eq!(client.backend.open_cursors(), 0);

    // The discarded id now behaves like an unknown one.
    let (item, status, _) = query_advance(&mut client, &id).await;
    assert!(item.is_empty());
    assert_eq!(status, 0);
}

#[tokio::test]
async fn test_overflowing_query_fails_the_open_cleanly() {
    let mut client = spawn_session(test_backend(), SessionOptions::default()).await;
    login_ok(&mut client, "admin", "admin").await;

    let query = format!("{}+1", i64::MAX);
    let (id, err, status) = query_open(&mut client, &query).await;
    assert_eq!(id, "0");
    assert_eq!(status, 1);
    assert!(err.unwrap().contains("overflow"));

    // The session keeps serving after the failed open.
    let (id, err, status) = query_open(&mut client, "1+1").await;
    assert_eq!((id.as_str(), err, status), ("1", None, 0));
}

// ============================================================================
// COMMANDS
// ============================================================================

#[tokio::test]
async fn test_parse_failure_keeps_the_session_alive() {
    let mut client = spawn_session(test_backend(), SessionOptions::default()).await;
    login_ok(&mut client, "admin", "admin").await;

    send_command(&mut client.writer, "frobnicate").await;
    let (payload, info, status) = read_command_reply(&mut client).await;
    assert!(payload.is_empty());
    assert_eq!(status, 1);
    assert!(info.contains("unknown command"));

    send_command(&mut client.writer, "open shop").await;
    let (_, info, status) = read_command_reply(&mut client).await;
    assert_eq!(status, 0);
    assert!(info.contains("opened"));
}

#[tokio::test]
async fn test_garbled_command_is_reported_and_logged() {
    let log = Arc::new(RecordingLog::default());
    let mut client =
        spawn_session_with_log(test_backend(), SessionOptions::default(), log.clone()).await;
    login_ok(&mut client, "admin", "admin").await;

    // 0xC3 0x28 is not valid UTF-8; 0xC3 is outside the selector range.
    client.writer.write_all(&[0xC3, 0x28, 0x00]).await.unwrap();
    client.writer.flush().await.unwrap();
    let (payload, info, status) = read_command_reply(&mut client).await;
    assert!(payload.is_empty());
    assert_eq!(status, 1);
    assert!(info.contains("UTF-8"));

    // The attempt is logged as a failed command like any other parse failure.
    let commands = log.commands();
    assert_eq!(commands.len(), 1);
    assert!(!commands[0].1);

    send_command(&mut client.writer, "list").await;
    let (_, _, status) = read_command_reply(&mut client).await;
    assert_eq!(status, 0);
}

#[tokio::test]
async fn test_execution_failure_is_reported_and_recovered() {
    let mut client = spawn_session(test_backend(), SessionOptions::default()).await;
    login_ok(&mut client, "admin", "admin").await;

    send_command(&mut client.writer, "open missing").await;
    let (_, info, status) = read_command_reply(&mut client).await;
    assert_eq!(status, 1);
    assert!(info.contains("not found"));

    send_command(&mut client.writer, "list").await;
    let (_, _, status) = read_command_reply(&mut client).await;
    assert_eq!(status, 0);
}

#[tokio::test]
async fn test_timeout_is_distinguishable_from_other_failures() {
    let options = SessionOptions {
        command_timeout: Duration::from_millis(50),
        ..SessionOptions::default()
    };
    let mut client = spawn_session(test_backend(), options).await;
    login_ok(&mut client, "admin", "admin").await;

    send_command(&mut client.writer, "sleep 10000").await;
    let (_, timeout_info, status) = read_command_reply(&mut client).await;
    assert_eq!(status, 1);
    assert!(timeout_info.contains("timeout"), "got: {timeout_info}");

    // An ordinary execution failure reads differently.
    send_command(&mut client.writer, "open missing").await;
    let (_, failure_info, status) = read_command_reply(&mut client).await;
    assert_eq!(status, 1);
    assert_ne!(timeout_info, failure_info);

    // The session stays usable after the abort.
    send_command(&mut client.writer, "list").await;
    let (_, _, status) = read_command_reply(&mut client).await;
    assert_eq!(status, 0);
}

// ============================================================================
// INGEST
// ============================================================================

#[tokio::test]
async fn test_ingest_fresh_then_duplicate_name() {
    let mut client = spawn_session(test_backend(), SessionOptions::default()).await;
    login_ok(&mut client, "admin", "admin").await;

    let (msg, status) = ingest(&mut client, "inventory", b"<stock/>").await;
    assert_eq!(status, 0);
    assert!(msg.contains("inventory"));

    // Same name again fails, but the session keeps serving.
    let (msg, status) = ingest(&mut client, "inventory", b"<other/>").await;
    assert_eq!(status, 1);
    assert!(msg.contains("already exists"));

    send_command(&mut client.writer, "list").await;
    let (payload, _, status) = read_command_reply(&mut client).await;
    assert_eq!(status, 0);
    assert_eq!(payload, b"inventory\nshop");
}

#[tokio::test]
async fn test_ingest_non_ascii_content() {
    let backend = Arc::new(MemoryBackend::new().with_user("admin", "admin"));
    let mut client = spawn_session(backend, SessionOptions::default()).await;
    login_ok(&mut client, "admin", "admin").await;

    // UTF-8 text that round-trips through the escape layer.
    let (_, status) = ingest(&mut client, "notes", "caf\u{e9}".as_bytes()).await;
    assert_eq!(status, 0);
}

// ============================================================================
// TEARDOWN
// ============================================================================

#[tokio::test]
async fn test_exit_tears_down_iterators_context_and_registration() {
    let mut client = spawn_session(test_backend(), SessionOptions::default()).await;
    login_ok(&mut client, "admin", "admin").await;

    query_open(&mut client, "1, 2, 3").await;
    query_open(&mut client, "4").await;
    assert_eq!(client.backend.open_cursors(), 2);

    // Exit sends no response frame; the run future completes cleanly.
    send_command(&mut client.writer, "exit").await;
    let result = client.handle.await.unwrap();
    assert!(result.is_ok());

    assert_eq!(client.backend.open_cursors(), 0);
    assert_eq!(client.backend.closed_contexts(), 1);
    assert!(client.registry.is_empty().await);
}

#[tokio::test]
async fn test_abrupt_disconnect_triggers_full_teardown() {
    let mut client = spawn_session(test_backend(), SessionOptions::default()).await;
    login_ok(&mut client, "admin", "admin").await;

    query_open(&mut client, "1+1").await;

    drop(client.reader);
    drop(client.writer);

    let result = client.handle.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(client.backend.open_cursors(), 0);
    assert_eq!(client.backend.closed_contexts(), 1);
    assert!(client.registry.is_empty().await);
}

#[tokio::test]
async fn test_administrative_kill_ends_a_blocked_session() {
    let mut client = spawn_session(test_backend(), SessionOptions::default()).await;
    login_ok(&mut client, "admin", "admin").await;

    // Make sure the session is registered and idle in its read loop.
    send_command(&mut client.writer, "list").await;
    read_command_reply(&mut client).await;
    assert!(client.registry.kill(client.session_id).await);

    let result = client.handle.await.unwrap();
    assert!(result.is_ok());
    assert!(client.registry.is_empty().await);
    assert_eq!(client.backend.closed_contexts(), 1);
}
