//! Cancellation tokens and the in-flight run registry.
//!
//! Every agent run holds a [`RunSlot`] for its chat session. The slot is the
//! only way to register a run, so at most one run exists per session, and
//! dropping the slot (on completion, failure or panic) removes the entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// A cancellation token checked by the runner and the relay.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }
}

/// Which connection started a run, and on whose behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

struct Entry {
    generation: u64,
    user_id: String,
    connection: ConnectionId,
    token: CancelToken,
}

/// Returned when a session already has a run in flight.
#[derive(Debug, thiserror::Error)]
#[error("a reply is already being generated for this session")]
pub struct SessionBusy;

/// In-flight runs keyed by chat session id.
#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, Entry>>,
    generation: AtomicU64,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the run slot for `session_id`, or fail if one is held.
    pub fn try_claim(
        self: &Arc<Self>,
        session_id: &str,
        user_id: &str,
        connection: ConnectionId,
    ) -> Result<RunSlot, SessionBusy> {
        let mut runs = self.runs.lock();
        if runs.contains_key(session_id) {
            return Err(SessionBusy);
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = CancelToken::new();
        runs.insert(
            session_id.to_owned(),
            Entry {
                generation,
                user_id: user_id.to_owned(),
                connection,
                token: token.clone(),
            },
        );
        Ok(RunSlot {
            registry: self.clone(),
            session_id: session_id.to_owned(),
            generation,
            token,
        })
    }

    /// Cancel the run for `session_id` if `user_id` owns it. Returns whether
    /// a run was signalled; an unknown session is a no-op.
    pub fn cancel(&self, session_id: &str, user_id: &str) -> bool {
        match self.runs.lock().get(session_id) {
            Some(e) if e.user_id == user_id => {
                e.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancel every run started by `connection`. Returns how many.
    pub fn cancel_connection(&self, connection: ConnectionId) -> usize {
        let runs = self.runs.lock();
        let mut n = 0;
        for e in runs.values().filter(|e| e.connection == connection) {
            e.token.cancel();
            n += 1;
        }
        n
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.runs.lock().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.runs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, session_id: &str, generation: u64) {
        let mut runs = self.runs.lock();
        if runs.get(session_id).is_some_and(|e| e.generation == generation) {
            runs.remove(session_id);
        }
    }
}

/// Exclusive right to run one turn for a session. Released on drop.
pub struct RunSlot {
    registry: Arc<RunRegistry>,
    session_id: String,
    generation: u64,
    token: CancelToken,
}

impl RunSlot {
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.registry.release(&self.session_id, self.generation);
    }
}
