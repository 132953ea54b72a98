//! # Session Registry
//!
//! Process-wide set of live sessions for administration. An explicit,
//! internally-synchronized service object rather than an implicit global;
//! sessions hold a `Weak` back-reference used only for deregistration.
//!
//! The registry is read far more often than written, so the map sits behind
//! an async `RwLock`. Killing a session cancels its stop token; the session
//! observes the cancellation at its next read and tears itself down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Snapshot of one live session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Process-wide session id.
    pub id: u64,
    /// Authenticated username.
    pub user: String,
}

struct Entry {
    user: String,
    stop: CancellationToken,
}

/// Concurrently accessed set of live sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<u64, Entry>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next session id. Ids are process-unique and never
    /// reused; a session takes its id before authentication so that even
    /// failed logins are attributable in logs.
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a session after a successful handshake.
    pub async fn register(&self, id: u64, user: &str, stop: CancellationToken) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            id,
            Entry {
                user: user.to_string(),
                stop,
            },
        );
        debug!(session_id = id, user, "Session registered");
    }

    /// Remove a session. Returns whether it was present; deregistering twice
    /// is harmless.
    pub async fn deregister(&self, id: u64) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            debug!(session_id = id, "Session deregistered");
        }
        removed
    }

    /// Snapshot of all live sessions.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(&id, entry)| SessionInfo {
                id,
                user: entry.user.clone(),
            })
            .collect()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no session is live.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Request an administrative stop of one session. Cancellation is
    /// cooperative: the session finishes its in-flight response framing
    /// before tearing down. Returns whether the session was known.
    pub async fn kill(&self, id: u64) -> bool {
        let sessions = self.sessions.read().await;
        match sessions.get(&id) {
            Some(entry) => {
                info!(session_id = id, user = %entry.user, "Session kill requested");
                entry.stop.cancel();
                true
            }
            None => false,
        }
    }
}
