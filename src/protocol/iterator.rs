//! # Query Iterator Table
//!
//! Per-session registry of open query iterators. Ids are session-scoped,
//! assigned from a monotonically increasing counter starting at 0, and are
//! never reused — an id is consumed even when opening the query fails.
//!
//! Iterators are private to their owning session; no locking. Every opened
//! iterator is eventually closed: explicitly, on exhaustion, on error, or at
//! session teardown.

use crate::backend::QueryCursor;
use crate::error::Result;
use bytes::Bytes;

/// Lifecycle of one iterator entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    /// Initialized and serving advance requests.
    Opened,
    /// The cursor reported exhaustion; the entry is about to be removed.
    Exhausted,
    /// Closed; the cursor has been released.
    Closed,
}

/// One open query iterator bound to its cursor.
pub struct QueryIterator<C: QueryCursor> {
    id: u64,
    query: String,
    state: IteratorState,
    cursor: C,
}

impl<C: QueryCursor> QueryIterator<C> {
    pub fn new(id: u64, query: String, cursor: C) -> Self {
        Self {
            id,
            query,
            state: IteratorState::Opened,
            cursor,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The source query text, for logging.
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn state(&self) -> IteratorState {
        self.state
    }

    /// Pull the next item from the cursor. `None` marks exhaustion and moves
    /// the entry to [`IteratorState::Exhausted`].
    pub async fn advance(&mut self) -> Result<Option<Bytes>> {
        match self.cursor.next().await {
            Ok(Some(item)) => Ok(Some(item)),
            Ok(None) => {
                self.state = IteratorState::Exhausted;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Release the cursor. Idempotent.
    pub fn close(&mut self) {
        if self.state != IteratorState::Closed {
            self.cursor.close();
            self.state = IteratorState::Closed;
        }
    }
}

/// Map from iterator id to iterator state for one session.
pub struct QueryIteratorTable<C: QueryCursor> {
    entries: std::collections::HashMap<u64, QueryIterator<C>>,
    next_id: u64,
}

impl<C: QueryCursor> Default for QueryIteratorTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: QueryCursor> QueryIteratorTable<C> {
    pub fn new() -> Self {
        Self {
            entries: std::collections::HashMap::new(),
            next_id: 0,
        }
    }

    /// Consume the next iterator id. Called before compilation, so failed
    /// opens still burn their id and ids are never reused.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Register an initialized iterator under its id.
    pub fn insert(&mut self, iterator: QueryIterator<C>) {
        self.entries.insert(iterator.id(), iterator);
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut QueryIterator<C>> {
        self.entries.get_mut(&id)
    }

    /// Close and remove one iterator. Unknown ids are a benign no-op.
    pub fn remove(&mut self, id: u64) -> bool {
        match self.entries.remove(&id) {
            Some(mut iterator) => {
                iterator.close();
                true
            }
            None => false,
        }
    }

    /// Close every remaining iterator. A failure closing one entry never
    /// blocks closing the rest (close itself is infallible by contract).
    pub fn close_all(&mut self) {
        for (_, mut iterator) in self.entries.drain() {
            iterator.close();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
