//! WebSocket endpoint for the chat channel.
//!
//! Flow:
//! 1. Client connects to `/v1/chat/ws` with `Authorization: Bearer <token>`
//!    or `?token=<token>`
//! 2. The token is verified before the upgrade; failures get a 401
//! 3. A writer task drains the connection's outbox into the socket while
//!    the reader loop feeds text frames to the [`ChannelSession`]
//! 4. On close every run the connection started is cancelled

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::api::auth::{authenticate, bearer_token, unauthorized, VerifiedIdentity};
use crate::channel::ChannelSession;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Token for clients that cannot set headers on the upgrade request.
    pub token: Option<String>,
}

/// GET /v1/chat/ws: upgrade to WebSocket.
pub async fn chat_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = bearer_token(&headers).or(query.token.as_deref());
    let Some(identity) = authenticate(&state, token).await else {
        tracing::info!("refused chat websocket handshake");
        return unauthorized();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: VerifiedIdentity) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (session, mut outbox) = ChannelSession::open(state, &identity.user_id);

    // Writer task: forwards outbox frames to the WS sink.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbox.recv().await {
            if ws_sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    // Reader loop.
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => session.handle_text(&text).await,
            Message::Close(_) => break,
            // axum answers WS-level pings itself.
            _ => {}
        }
    }

    session.disconnect();
    writer.abort();
}
