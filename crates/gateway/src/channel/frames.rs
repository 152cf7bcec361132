//! Wire frames for the real-time chat channel.
//!
//! Every websocket text frame is a JSON object with an `event` name and a
//! `data` payload. Inbound frames may carry an `ack` id; the reply to such a
//! frame is an `ack` frame echoing that id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use bk_domain::record::ChatMessage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const CHAT_SEND: &str = "chat:send";
pub const CHAT_CANCEL: &str = "chat:cancel";
pub const CHAT_HISTORY: &str = "chat:history";
pub const CHAT_NEW_SESSION: &str = "chat:new-session";
pub const CHAT_END_SESSION: &str = "chat:end-session";

#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub ack: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPayload {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub active_record_id: Option<String>,
    #[serde(default)]
    pub page_context: Option<String>,
}

/// Payload of `chat:cancel` and `chat:end-session`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    #[serde(default)]
    pub session_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPayload {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub before: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionPayload {
    #[serde(default)]
    pub active_record_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Client-facing error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    Busy,
    SessionNotFound,
    SessionEnded,
    Unavailable,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "chat:session-start", rename_all = "camelCase")]
    SessionStart { session_id: String, agent_session_id: String },

    #[serde(rename = "chat:tool-start", rename_all = "camelCase")]
    ToolStart {
        session_id: String,
        tool_name: String,
        tool_input: Value,
        call_number: u32,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "chat:tool-complete", rename_all = "camelCase")]
    ToolComplete { session_id: String, tool_name: String, timestamp: DateTime<Utc> },

    #[serde(rename = "chat:tool-error", rename_all = "camelCase")]
    ToolError {
        session_id: String,
        tool_name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "chat:message-start", rename_all = "camelCase")]
    MessageStart { message_id: String, session_id: String },

    #[serde(rename = "chat:message-delta", rename_all = "camelCase")]
    MessageDelta { message_id: String, delta: String },

    #[serde(rename = "chat:message-end", rename_all = "camelCase")]
    MessageEnd {
        message_id: String,
        content: String,
        model: String,
        tokens_used: u32,
        stop_reason: &'static str,
    },

    #[serde(rename = "chat:record-updated", rename_all = "camelCase")]
    RecordUpdated { record_id: String, fields: Vec<String> },

    #[serde(rename = "chat:session-end", rename_all = "camelCase")]
    SessionEnd { session_id: String, reason: &'static str },

    #[serde(rename = "chat:error", rename_all = "camelCase")]
    Error { session_id: Option<String>, error: String, code: ErrorCode },
}

impl ServerEvent {
    pub fn error(session_id: Option<&str>, code: ErrorCode, error: impl Into<String>) -> Self {
        Self::Error { session_id: session_id.map(str::to_owned), error: error.into(), code }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStart { .. } => "chat:session-start",
            Self::ToolStart { .. } => "chat:tool-start",
            Self::ToolComplete { .. } => "chat:tool-complete",
            Self::ToolError { .. } => "chat:tool-error",
            Self::MessageStart { .. } => "chat:message-start",
            Self::MessageDelta { .. } => "chat:message-delta",
            Self::MessageEnd { .. } => "chat:message-end",
            Self::RecordUpdated { .. } => "chat:record-updated",
            Self::SessionEnd { .. } => "chat:session-end",
            Self::Error { .. } => "chat:error",
        }
    }

    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(event = self.name(), error = %e, "failed to encode server event");
            String::new()
        })
    }
}

/// Reply to an inbound frame that carried an `ack` id.
pub fn ack_frame(ack: u64, data: Value) -> String {
    json!({ "event": "ack", "ack": ack, "data": data }).to_string()
}

/// Client view of one persisted message.
pub fn message_view(m: &ChatMessage) -> Value {
    serde_json::to_value(m).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_frame_defaults() {
        let f: InboundFrame = serde_json::from_str(r#"{"event":"chat:cancel"}"#).unwrap();
        assert_eq!(f.event, CHAT_CANCEL);
        assert!(f.data.is_null());
        assert!(f.ack.is_none());
    }

    #[test]
    fn send_payload_is_camel_case() {
        let p: SendPayload = serde_json::from_value(json!({
            "content": "hi",
            "sessionId": "s1",
            "activeRecordId": "b1",
        }))
        .unwrap();
        assert_eq!(p.session_id, "s1");
        assert_eq!(p.active_record_id.as_deref(), Some("b1"));
        assert!(p.page_context.is_none());
    }

    #[test]
    fn server_event_encoding() {
        let ev = ServerEvent::MessageEnd {
            message_id: "m1".into(),
            content: "ok".into(),
            model: "gpt".into(),
            tokens_used: 42,
            stop_reason: "completed",
        };
        let v: Value = serde_json::from_str(&ev.to_frame()).unwrap();
        assert_eq!(v["event"], "chat:message-end");
        assert_eq!(v["data"]["messageId"], "m1");
        assert_eq!(v["data"]["tokensUsed"], 42);
        assert_eq!(v["data"]["stopReason"], "completed");
    }

    #[test]
    fn error_event_code_is_snake_case() {
        let ev = ServerEvent::error(Some("s1"), ErrorCode::SessionNotFound, "Session not found");
        let v: Value = serde_json::from_str(&ev.to_frame()).unwrap();
        assert_eq!(v["event"], "chat:error");
        assert_eq!(v["data"]["code"], "session_not_found");
        assert_eq!(v["data"]["sessionId"], "s1");
    }

    #[test]
    fn ack_frame_shape() {
        let v: Value = serde_json::from_str(&ack_frame(7, json!({"sessionId": "s"}))).unwrap();
        assert_eq!(v["event"], "ack");
        assert_eq!(v["ack"], 7);
        assert_eq!(v["data"]["sessionId"], "s");
    }
}
