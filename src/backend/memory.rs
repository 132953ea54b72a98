//! # In-Memory Reference Backend
//!
//! A small main-memory backend exercising every protocol path. It backs the
//! integration tests and doubles as a worked example of the [`Backend`]
//! seam:
//!
//! - **Commands**: `list`, `open <name>`, `sleep <millis>` (cooperative,
//!   observes the cancel token in 10 ms steps), `exit`/`quit`.
//! - **Queries**: comma-separated integer expressions with `+`/`-`
//!   (`"1+1"` yields one item `"2"`, `"1,2,3"` yields three items). An
//!   `error` term compiles but raises when the cursor reaches it, the way
//!   engines with lazily produced sequences surface runtime failures.
//! - **Ingest**: a UTF-8 document store keyed by database name; duplicate
//!   names and empty documents fail.

use crate::backend::{Backend, CommandOutput, CredentialStore, Parsed, QueryCursor};
use crate::error::{constants, Result, SessionError};
use crate::protocol::auth;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// In-memory backend shared across sessions.
#[derive(Default)]
pub struct MemoryBackend {
    users: HashMap<String, String>,
    databases: RwLock<HashMap<String, String>>,
    open_cursors: Arc<AtomicIsize>,
    closed_contexts: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user, storing only the hash of the password.
    pub fn with_user(mut self, username: &str, password: &str) -> Self {
        self.users
            .insert(username.to_string(), auth::hash_secret(password));
        self
    }

    /// Seed a database.
    pub fn with_database(self, name: &str, content: &str) -> Self {
        if let Ok(mut databases) = self.databases.write() {
            databases.insert(name.to_string(), content.to_string());
        }
        self
    }

    /// Names of all stored databases, sorted.
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .databases
            .read()
            .map(|dbs| dbs.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Number of cursors opened but not yet closed. Zero after every session
    /// has been torn down.
    pub fn open_cursors(&self) -> isize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    /// Number of session contexts closed so far.
    pub fn closed_contexts(&self) -> usize {
        self.closed_contexts.load(Ordering::SeqCst)
    }
}

impl CredentialStore for MemoryBackend {
    fn secret_hash(&self, username: &str) -> Option<String> {
        self.users.get(username).cloned()
    }
}

/// Per-session state: at most one bound database.
#[derive(Debug, Default)]
pub struct MemoryContext {
    database: Option<String>,
    closed: bool,
}

impl MemoryContext {
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Parsed command forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryCommand {
    /// List stored database names.
    List,
    /// Bind a database into the session context.
    Open(String),
    /// Sleep cooperatively for the given number of milliseconds.
    Sleep(u64),
}

/// One compiled item slot. `Raise` defers its error to iteration time.
#[derive(Debug, Clone)]
enum Item {
    Value(Bytes),
    Raise(String),
}

/// Cursor over an eagerly compiled item sequence.
pub struct MemoryCursor {
    items: VecDeque<Item>,
    open_cursors: Arc<AtomicIsize>,
    closed: bool,
}

impl QueryCursor for MemoryCursor {
    fn next(&mut self) -> impl std::future::Future<Output = Result<Option<Bytes>>> + Send {
        let item = self.items.pop_front();
        async move {
            match item {
                Some(Item::Value(bytes)) => Ok(Some(bytes)),
                Some(Item::Raise(msg)) => Err(SessionError::Query(msg)),
                None => Ok(None),
            }
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.items.clear();
            self.open_cursors.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Backend for MemoryBackend {
    type Command = MemoryCommand;
    type Context = MemoryContext;
    type Cursor = MemoryCursor;

    fn open_context(&self) -> MemoryContext {
        MemoryContext::default()
    }

    fn close_context(&self, ctx: &mut MemoryContext) {
        if !ctx.closed {
            ctx.closed = true;
            ctx.database = None;
            self.closed_contexts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn parse(&self, input: &str) -> Result<Parsed<MemoryCommand>> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SessionError::Parse("empty command".into()));
        }

        let (verb, rest) = match input.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (input, ""),
        };

        match verb.to_ascii_lowercase().as_str() {
            "exit" | "quit" => Ok(Parsed::Exit),
            "list" => Ok(Parsed::Run(MemoryCommand::List)),
            "open" if !rest.is_empty() => Ok(Parsed::Run(MemoryCommand::Open(rest.to_string()))),
            "open" => Err(SessionError::Parse("open: missing database name".into())),
            "sleep" => rest
                .parse::<u64>()
                .map(|millis| Parsed::Run(MemoryCommand::Sleep(millis)))
                .map_err(|_| SessionError::Parse(format!("sleep: invalid duration '{rest}'"))),
            other => Err(SessionError::Parse(format!("unknown command: {other}"))),
        }
    }

    fn execute(
        &self,
        command: MemoryCommand,
        ctx: &mut MemoryContext,
        cancel: &CancellationToken,
    ) -> impl std::future::Future<Output = Result<CommandOutput>> + Send {
        let cancel = cancel.clone();
        let outcome = match &command {
            MemoryCommand::List => {
                let names = self.database_names();
                Ok(CommandOutput {
                    payload: names.join("\n").into_bytes(),
                    info: format!("{} database(s)", names.len()),
                })
            }
            MemoryCommand::Open(name) => {
                let exists = self
                    .databases
                    .read()
                    .map_err(|_| SessionError::Custom(constants::ERR_LOCK_POISONED.into()))
                    .map(|dbs| dbs.contains_key(name));
                match exists {
                    Ok(true) => {
                        ctx.database = Some(name.clone());
                        Ok(CommandOutput {
                            payload: Vec::new(),
                            info: format!("database '{name}' opened"),
                        })
                    }
                    Ok(false) => Err(SessionError::Execution(format!(
                        "database '{name}' not found"
                    ))),
                    Err(e) => Err(e),
                }
            }
            MemoryCommand::Sleep(_) => Ok(CommandOutput::default()),
        };

        async move {
            if let MemoryCommand::Sleep(millis) = command {
                let mut remaining = millis;
                while remaining > 0 {
                    if cancel.is_cancelled() {
                        return Err(SessionError::Interrupted);
                    }
                    let step = remaining.min(10);
                    tokio::time::sleep(Duration::from_millis(step)).await;
                    remaining -= step;
                }
                return Ok(CommandOutput {
                    payload: Vec::new(),
                    info: format!("slept for {millis}ms"),
                });
            }
            outcome
        }
    }

    fn open_query(&self, query: &str, _ctx: &mut MemoryContext) -> Result<MemoryCursor> {
        let items = compile(query)?;
        self.open_cursors.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryCursor {
            items,
            open_cursors: self.open_cursors.clone(),
            closed: false,
        })
    }

    fn build_database(
        &self,
        name: &str,
        content: &[u8],
        _ctx: &mut MemoryContext,
    ) -> impl std::future::Future<Output = Result<String>> + Send {
        let result = (|| {
            if name.is_empty() {
                return Err(SessionError::Ingest("database name is empty".into()));
            }
            let text = std::str::from_utf8(content)
                .map_err(|_| SessionError::Ingest("document is not valid UTF-8".into()))?;
            if text.is_empty() {
                return Err(SessionError::Ingest("document is empty".into()));
            }

            let mut databases = self
                .databases
                .write()
                .map_err(|_| SessionError::Custom(constants::ERR_LOCK_POISONED.into()))?;
            if databases.contains_key(name) {
                return Err(SessionError::Ingest(format!(
                    "database '{name}' already exists"
                )));
            }
            databases.insert(name.to_string(), text.to_string());
            Ok(format!("database '{name}' created ({} bytes)", content.len()))
        })();
        async move { result }
    }
}

/// Compile query text into an item sequence. Malformed expressions fail
/// here, before any iterator is registered.
fn compile(query: &str) -> Result<VecDeque<Item>> {
    if query.trim().is_empty() {
        return Err(SessionError::Query("empty query".into()));
    }
    query
        .split(',')
        .map(|term| {
            let term = term.trim();
            if term == "error" {
                Ok(Item::Raise("simulated runtime error".into()))
            } else {
                eval_term(term).map(|value| Item::Value(Bytes::from(value.to_string())))
            }
        })
        .collect()
}

/// Evaluate one additive integer expression.
fn eval_term(term: &str) -> Result<i64> {
    let mut total: i64 = 0;
    let mut pending_op = '+';
    let mut operand = String::new();

    let apply = |total: &mut i64, op: char, operand: &str| -> Result<()> {
        let value: i64 = operand
            .parse()
            .map_err(|_| SessionError::Query(format!("expected a number, found '{operand}'")))?;
        let next = match op {
            '+' => total.checked_add(value),
            _ => total.checked_sub(value),
        };
        *total = next
            .ok_or_else(|| SessionError::Query(format!("integer overflow evaluating '{term}'")))?;
        Ok(())
    };

    for ch in term.chars() {
        match ch {
            '0'..='9' => operand.push(ch),
            '+' | '-' => {
                apply(&mut total, pending_op, &operand)?;
                pending_op = ch;
                operand.clear();
            }
            c if c.is_whitespace() => {}
            other => {
                return Err(SessionError::Query(format!(
                    "unexpected character '{other}' in query"
                )))
            }
        }
    }
    apply(&mut total, pending_op, &operand)?;
    Ok(total)
}
