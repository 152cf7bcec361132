//! Chat session listing for the authenticated caller.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;

use crate::api::auth::VerifiedIdentity;
use crate::state::AppState;

/// GET /v1/sessions: the caller's chat sessions, most recent first.
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(identity): Extension<VerifiedIdentity>,
) -> Response {
    match state.store.list_sessions(&identity.user_id).await {
        Ok(sessions) => {
            let sessions: Vec<serde_json::Value> = sessions
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "sessionId": s.session_id,
                        "activeRecordId": s.active_record_id,
                        "createdAt": s.created_at,
                        "lastMessageAt": s.last_message_at,
                        "messageCount": s.message_count,
                        "ended": s.is_ended(),
                        "running": state.runs.is_running(&s.session_id),
                    })
                })
                .collect();
            Json(serde_json::json!({ "sessions": sessions })).into_response()
        }
        Err(e) => {
            tracing::error!(user_id = %identity.user_id, error = %e, "listing sessions failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "could not list sessions" })),
            )
                .into_response()
        }
    }
}
