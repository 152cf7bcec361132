//! Lifecycle hooks invoked by the runner.
//!
//! [`RelayHooks`] forwards each hook onto the run's own event channel, so
//! hook notifications reach the client in the same order as the text and
//! tool results around them. Hooks are observers only: authorization lives
//! in the tool handlers.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::runner::RunEvent;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Completed,
    BudgetExceeded,
    Cancelled,
    Error,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::BudgetExceeded => "budget_exceeded",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    Continue,
    Block { reason: String },
}

/// Notifications produced by the hooks, relayed to the client.
#[derive(Debug, Clone)]
pub enum HookEvent {
    SessionStart { agent_session_id: String },
    ToolStart { tool_name: String, input: Value, call_number: u32 },
    ToolComplete { tool_name: String },
    ToolError { tool_name: String, error: String },
    SessionEnd { reason: EndReason },
}

#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    async fn on_session_start(&self, agent_session_id: &str);
    async fn on_pre_tool_use(&self, tool_name: &str, input: &Value) -> HookDecision;
    async fn on_post_tool_use(&self, tool_name: &str);
    async fn on_post_tool_failure(&self, tool_name: &str, error: &str);
    async fn on_session_end(&self, reason: EndReason);
}

pub struct RelayHooks {
    session_id: String,
    tx: mpsc::Sender<RunEvent>,
    calls: AtomicU32,
}

impl RelayHooks {
    pub fn new(session_id: impl Into<String>, tx: mpsc::Sender<RunEvent>) -> Self {
        Self { session_id: session_id.into(), tx, calls: AtomicU32::new(0) }
    }

    /// Number of tool calls seen so far.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn relay(&self, event: HookEvent) {
        // A closed channel means the client is gone; nothing to notify.
        let _ = self.tx.send(RunEvent::Hook(event)).await;
    }
}

#[async_trait]
impl LifecycleHooks for RelayHooks {
    async fn on_session_start(&self, agent_session_id: &str) {
        tracing::info!(session_id = %self.session_id, agent_session_id, "agent session started");
        self.relay(HookEvent::SessionStart { agent_session_id: agent_session_id.to_owned() })
            .await;
    }

    async fn on_pre_tool_use(&self, tool_name: &str, input: &Value) -> HookDecision {
        let call_number = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(session_id = %self.session_id, tool_name, call_number, "tool call starting");
        self.relay(HookEvent::ToolStart {
            tool_name: tool_name.to_owned(),
            input: input.clone(),
            call_number,
        })
        .await;
        HookDecision::Continue
    }

    async fn on_post_tool_use(&self, tool_name: &str) {
        tracing::info!(
            session_id = %self.session_id,
            tool_name,
            call_number = self.call_count(),
            "tool call complete"
        );
        self.relay(HookEvent::ToolComplete { tool_name: tool_name.to_owned() }).await;
    }

    async fn on_post_tool_failure(&self, tool_name: &str, error: &str) {
        tracing::warn!(
            session_id = %self.session_id,
            tool_name,
            call_number = self.call_count(),
            error,
            "tool call failed"
        );
        self.relay(HookEvent::ToolError { tool_name: tool_name.to_owned(), error: error.to_owned() })
            .await;
    }

    async fn on_session_end(&self, reason: EndReason) {
        tracing::info!(
            session_id = %self.session_id,
            reason = reason.as_str(),
            tool_calls = self.call_count(),
            "agent session ended"
        );
        self.relay(HookEvent::SessionEnd { reason }).await;
    }
}
