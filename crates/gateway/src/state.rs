use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bk_domain::config::Config;
use bk_providers::ProviderRegistry;
use bk_store::{JobQueue, Store};

use crate::api::auth::IdentityVerifier;
use crate::channel::RoomHub;
use crate::runtime::{ConnectionId, RunRegistry};

/// Shared application state passed to every handler and channel session.
///
/// Fields are grouped by concern:
/// - **Core services**: config, store, job queue, LLM providers
/// - **Identity**: the token verifier used at handshake time
/// - **Channel**: in-flight runs and per-user rooms
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    /// `None` when no job queue is wired; metered tools report unavailable.
    pub jobs: Option<Arc<dyn JobQueue>>,
    pub llm: Arc<ProviderRegistry>,

    // ── Identity ──────────────────────────────────────────────────────
    /// `None` refuses every websocket handshake.
    pub verifier: Option<Arc<dyn IdentityVerifier>>,

    // ── Channel ───────────────────────────────────────────────────────
    pub runs: Arc<RunRegistry>,
    pub rooms: Arc<RoomHub>,
    next_connection: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn Store>,
        jobs: Option<Arc<dyn JobQueue>>,
        llm: Arc<ProviderRegistry>,
        verifier: Option<Arc<dyn IdentityVerifier>>,
    ) -> Self {
        Self {
            config,
            store,
            jobs,
            llm,
            verifier,
            runs: Arc::new(RunRegistry::new()),
            rooms: Arc::new(RoomHub::new()),
            next_connection: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }
}
