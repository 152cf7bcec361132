use serde::Serialize;

/// Structured trace events emitted across the gateway crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    RoleResolved {
        user_id: String,
        effective_role: String,
    },
    ToolsFiltered {
        effective_role: String,
        offered: usize,
        available: usize,
    },
    LlmRequest {
        provider: String,
        model: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    ToolInvoked {
        session_id: String,
        tool_name: String,
        duration_ms: u64,
        ok: bool,
    },
    ConfirmationRequested {
        session_id: String,
        tool_name: String,
        action: String,
    },
    CreditsDebited {
        user_id: String,
        credit_type: String,
        amount: u32,
        remaining: u32,
    },
    CreditsRefunded {
        user_id: String,
        credit_type: String,
        amount: u32,
    },
    CreditsRefused {
        user_id: String,
        credit_type: String,
        required: u32,
        remaining: u32,
    },
    CreditsGranted {
        user_id: String,
        credit_type: String,
        amount: u32,
        granted_by: String,
    },
    JobEnqueued {
        job_id: String,
        job_type: String,
        user_id: String,
    },
    RunFinished {
        session_id: String,
        turns: u32,
        cost_usd: f64,
        stop_reason: String,
    },
    RunCancelled {
        session_id: String,
        reason: String,
    },
    TranscriptAppend {
        session_id: String,
        role: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "bk_event");
    }
}
