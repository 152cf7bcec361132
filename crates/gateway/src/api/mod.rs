pub mod auth;
pub mod health;
pub mod sessions;
pub mod ws;

use axum::middleware;
use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Build the API router.
///
/// Routes are split into **public** (health, and the websocket, which
/// verifies its own token before upgrading) and **protected** (gated behind
/// the bearer-token middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/v1/health", get(health::health))
        .route("/v1/chat/ws", get(ws::chat_ws));

    let protected = Router::new()
        .route("/v1/sessions", get(sessions::list_sessions))
        .layer(middleware::from_fn_with_state(state, auth::require_identity));

    public.merge(protected)
}
