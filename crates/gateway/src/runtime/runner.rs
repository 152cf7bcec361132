//! The agent session runner: one bounded LLM turn loop.
//!
//! [`spawn_run`] drives the loop on its own task and reports through an
//! ordered [`RunEvent`] channel. A run is never resumed: after cancellation
//! or failure the caller starts a fresh one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::Instrument;

use bk_domain::config::ModelPricing;
use bk_domain::error::{Error, Result};
use bk_domain::stream::{StreamEvent, Usage};
use bk_domain::tool::{Message, ToolCall};
use bk_domain::trace::TraceEvent;
use bk_providers::{ChatRequest, LlmProvider};
use bk_tools::{RecordMutation, ToolOutcome, ToolSet};

use super::cancel::CancelToken;
use super::hooks::{EndReason, HookDecision, HookEvent, LifecycleHooks};
use super::prompt::wrap_user_message;

const TOOL_FAULT_MESSAGE: &str = "The action failed unexpectedly. Please try again later.";
const BUDGET_NOTICE: &str =
    "\n\n(I ran out of budget for this request. This is as far as I got.)";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs & events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Hard limits for one run.
#[derive(Debug, Clone, Copy)]
pub struct RunCaps {
    /// Maximum number of LLM calls.
    pub max_turns: u32,
    /// Maximum estimated spend in USD across all calls.
    pub max_cost_usd: f64,
}

pub struct RunInput {
    pub agent_session_id: String,
    pub session_id: String,
    pub system_prompt: String,
    pub tools: ToolSet,
    pub history: Vec<Message>,
    pub user_message: String,
    pub caps: RunCaps,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    /// Pricing for the model; without it only the turn cap applies.
    pub pricing: Option<ModelPricing>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    BudgetExceeded,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::BudgetExceeded => "budget_exceeded",
        }
    }
}

#[derive(Debug, Clone)]
pub enum RunEvent {
    Hook(HookEvent),
    TextDelta {
        text: String,
    },
    ToolStart {
        call_id: String,
        tool_name: String,
        input: Value,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        input: Value,
        payload: Value,
        is_error: bool,
        mutation: Option<RecordMutation>,
    },
    Final {
        content: String,
        model: String,
        usage: Usage,
        cost_usd: f64,
        stop_reason: StopReason,
    },
    /// Infrastructure failure. The message is for logs only.
    Failed {
        error: String,
    },
}

/// Control flow inside the loop.
enum Flow<T> {
    Next(T),
    Stop,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// spawn_run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Start a run. Events arrive on `tx` in the order they happen; the
/// channel closes when the run is over.
pub fn spawn_run(
    provider: Arc<dyn LlmProvider>,
    input: RunInput,
    hooks: Arc<dyn LifecycleHooks>,
    tx: mpsc::Sender<RunEvent>,
    cancel: CancelToken,
) -> tokio::task::JoinHandle<()> {
    let span = tracing::info_span!(
        "turn",
        agent_session_id = %input.agent_session_id,
        session_id = %input.session_id,
        "otel.kind" = "SERVER",
    );
    tokio::spawn(
        async move {
            let started = Instant::now();
            let session_id = input.session_id.clone();
            let run = Run { provider, hooks, tx, cancel, input };
            match run.drive().await {
                Ok(Flow::Next((reason, turns, cost))) => {
                    TraceEvent::RunFinished {
                        session_id,
                        turns,
                        cost_usd: cost,
                        stop_reason: reason.as_str().to_string(),
                    }
                    .emit();
                    run.hooks.on_session_end(reason).await;
                }
                Ok(Flow::Stop) => {
                    TraceEvent::RunCancelled { session_id, reason: "cancelled".into() }.emit();
                    run.hooks.on_session_end(EndReason::Cancelled).await;
                }
                Err(e) => {
                    tracing::error!(
                        session_id = %session_id,
                        error = %e,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "agent run failed"
                    );
                    run.hooks.on_session_end(EndReason::Error).await;
                    let _ = run.tx.send(RunEvent::Failed { error: e.to_string() }).await;
                }
            }
        }
        .instrument(span),
    )
}

struct Run {
    provider: Arc<dyn LlmProvider>,
    hooks: Arc<dyn LifecycleHooks>,
    tx: mpsc::Sender<RunEvent>,
    cancel: CancelToken,
    input: RunInput,
}

/// One assembled LLM response.
struct Completion {
    text: String,
    calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

impl Run {
    /// Send an event unless the run is cancelled or nobody is listening.
    async fn emit(&self, event: RunEvent) -> Flow<()> {
        if self.cancel.is_cancelled() || self.tx.send(event).await.is_err() {
            return Flow::Stop;
        }
        Flow::Next(())
    }

    async fn drive(&self) -> Result<Flow<(EndReason, u32, f64)>> {
        self.hooks.on_session_start(&self.input.agent_session_id).await;

        let model = self
            .input
            .model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string());
        let definitions = self.input.tools.definitions();

        let mut messages = Vec::with_capacity(self.input.history.len() + 2);
        messages.push(Message::system(self.input.system_prompt.clone()));
        messages.extend(self.input.history.iter().cloned());
        messages.push(Message::user(wrap_user_message(&self.input.user_message)));

        let mut content = String::new();
        let mut usage = Usage::default();
        let mut cost = 0.0_f64;
        let caps = self.input.caps;

        for turn in 1..=caps.max_turns {
            if self.cancel.is_cancelled() {
                return Ok(Flow::Stop);
            }

            let req = ChatRequest {
                messages: messages.clone(),
                tools: definitions.clone(),
                temperature: self.input.temperature,
                max_tokens: None,
                model: Some(model.clone()),
            };
            let llm_span = tracing::info_span!(
                "llm.call",
                "otel.kind" = "CLIENT",
                model = %model,
                turn,
                input_tokens = tracing::field::Empty,
                output_tokens = tracing::field::Empty,
            );
            let llm_started = Instant::now();
            let completion = match self.complete(&req).instrument(llm_span.clone()).await? {
                Flow::Next(c) => c,
                Flow::Stop => return Ok(Flow::Stop),
            };

            if let Some(u) = &completion.usage {
                llm_span.record("input_tokens", u.prompt_tokens);
                llm_span.record("output_tokens", u.completion_tokens);
                usage.accumulate(u);
                if let Some(p) = &self.input.pricing {
                    cost += p.estimate_cost(u.prompt_tokens, u.completion_tokens);
                }
            }
            TraceEvent::LlmRequest {
                provider: self.provider.provider_id().to_string(),
                model: model.clone(),
                streaming: true,
                duration_ms: llm_started.elapsed().as_millis() as u64,
                prompt_tokens: completion.usage.map(|u| u.prompt_tokens),
                completion_tokens: completion.usage.map(|u| u.completion_tokens),
            }
            .emit();
            content.push_str(&completion.text);

            if completion.calls.is_empty() {
                return self.finish(content, model, usage, cost, StopReason::Completed, turn).await;
            }
            if cost > caps.max_cost_usd {
                tracing::info!(cost_usd = cost, cap = caps.max_cost_usd, "run cost cap reached");
                return self
                    .finish(content, model, usage, cost, StopReason::BudgetExceeded, turn)
                    .await;
            }

            messages.push(Message::assistant_with_tools(&completion.text, &completion.calls));
            for call in &completion.calls {
                match self.invoke(call).await {
                    Flow::Next(result) => {
                        messages.push(Message::tool_result(&call.call_id, result.0, result.1))
                    }
                    Flow::Stop => return Ok(Flow::Stop),
                }
            }
        }

        tracing::info!(max_turns = caps.max_turns, "run turn cap reached");
        self.finish(content, model, usage, cost, StopReason::BudgetExceeded, caps.max_turns)
            .await
    }

    async fn finish(
        &self,
        mut content: String,
        model: String,
        usage: Usage,
        cost_usd: f64,
        stop_reason: StopReason,
        turns: u32,
    ) -> Result<Flow<(EndReason, u32, f64)>> {
        if stop_reason == StopReason::BudgetExceeded {
            if let Flow::Stop = self.emit(RunEvent::TextDelta { text: BUDGET_NOTICE.into() }).await {
                return Ok(Flow::Stop);
            }
            content.push_str(BUDGET_NOTICE);
        }
        let event = RunEvent::Final { content, model, usage, cost_usd, stop_reason };
        if let Flow::Stop = self.emit(event).await {
            return Ok(Flow::Stop);
        }
        let reason = match stop_reason {
            StopReason::Completed => EndReason::Completed,
            StopReason::BudgetExceeded => EndReason::BudgetExceeded,
        };
        Ok(Flow::Next((reason, turns, cost_usd)))
    }

    /// Stream one completion, relaying text as it arrives.
    async fn complete(&self, req: &ChatRequest) -> Result<Flow<Completion>> {
        let mut stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(Flow::Stop),
            s = self.provider.chat_stream(req) => s?,
        };

        let mut text = String::new();
        let mut calls: Vec<ToolCall> = Vec::new();
        let mut usage = None;
        // call_id -> (name, argument buffer), in start order
        let mut partial: Vec<(String, String, String)> = Vec::new();
        let mut finished: HashSet<String> = HashSet::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(Flow::Stop),
                n = stream.next() => n,
            };
            let Some(event) = next else { break };
            match event? {
                StreamEvent::Token { text: delta } => {
                    text.push_str(&delta);
                    if let Flow::Stop = self.emit(RunEvent::TextDelta { text: delta }).await {
                        return Ok(Flow::Stop);
                    }
                }
                StreamEvent::ToolCallStarted { call_id, tool_name } => {
                    partial.push((call_id, tool_name, String::new()));
                }
                StreamEvent::ToolCallDelta { call_id, delta } => {
                    if let Some(p) = partial.iter_mut().find(|p| p.0 == call_id) {
                        p.2.push_str(&delta);
                    }
                }
                StreamEvent::ToolCallFinished { call_id, tool_name, arguments } => {
                    finished.insert(call_id.clone());
                    calls.push(ToolCall { call_id, tool_name, arguments });
                }
                StreamEvent::Done { usage: u, .. } => usage = u,
                StreamEvent::Error { message } => {
                    return Err(Error::Provider {
                        provider: self.provider.provider_id().to_string(),
                        message,
                    });
                }
            }
        }

        for (call_id, tool_name, args) in partial {
            if finished.contains(&call_id) {
                continue;
            }
            let arguments = if args.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&args).unwrap_or_else(|e| {
                    tracing::warn!(
                        call_id = %call_id,
                        tool = %tool_name,
                        error = %e,
                        "tool call arguments are not valid JSON; using an empty object"
                    );
                    json!({})
                })
            };
            calls.push(ToolCall { call_id, tool_name, arguments });
        }

        Ok(Flow::Next(Completion { text, calls, usage }))
    }

    /// Run one tool call. Returns the content and error flag fed back to
    /// the model.
    async fn invoke(&self, call: &ToolCall) -> Flow<(String, bool)> {
        let name = call.tool_name.as_str();
        let started = Instant::now();

        let Some(descriptor) = self.input.tools.get(name) else {
            tracing::warn!(tool_name = name, "model requested a tool outside its set");
            self.hooks.on_post_tool_failure(name, "tool not available").await;
            let payload = json!({ "error": "tool not available", "code": "unavailable" });
            return self.report(call, payload, true, None, started).await;
        };

        if let HookDecision::Block { reason } =
            self.hooks.on_pre_tool_use(name, &call.arguments).await
        {
            let payload = json!({ "error": reason, "code": "blocked" });
            return self.report(call, payload, true, None, started).await;
        }
        if let Flow::Stop = self
            .emit(RunEvent::ToolStart {
                call_id: call.call_id.clone(),
                tool_name: name.to_owned(),
                input: call.arguments.clone(),
            })
            .await
        {
            return Flow::Stop;
        }

        let handler = descriptor.handler.clone();
        let args = call.arguments.clone();
        let tool_span = tracing::info_span!("tool.call", tool_name = %name);
        // Spawned so a cancelled run can walk away while the call finishes.
        let task = tokio::spawn(async move { handler.call(args).await }.instrument(tool_span));
        let joined = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Flow::Stop,
            j = task => j,
        };

        match joined {
            Ok(Ok(outcome)) => {
                if let ToolOutcome::PendingConfirmation { action, .. } = &outcome {
                    TraceEvent::ConfirmationRequested {
                        session_id: self.input.session_id.clone(),
                        tool_name: name.to_owned(),
                        action: action.clone(),
                    }
                    .emit();
                }
                self.hooks.on_post_tool_use(name).await;
                let mutation = outcome.mutation().cloned();
                self.report(call, outcome.to_payload(), outcome.is_failure(), mutation, started)
                    .await
            }
            Ok(Err(fault)) => {
                tracing::error!(tool_name = name, error = %fault, "tool fault");
                self.hooks.on_post_tool_failure(name, TOOL_FAULT_MESSAGE).await;
                let payload = json!({ "error": TOOL_FAULT_MESSAGE, "code": "internal" });
                self.report(call, payload, true, None, started).await
            }
            Err(join) => {
                tracing::error!(tool_name = name, error = %join, "tool task panicked");
                self.hooks.on_post_tool_failure(name, TOOL_FAULT_MESSAGE).await;
                let payload = json!({ "error": TOOL_FAULT_MESSAGE, "code": "internal" });
                self.report(call, payload, true, None, started).await
            }
        }
    }

    async fn report(
        &self,
        call: &ToolCall,
        payload: Value,
        is_error: bool,
        mutation: Option<RecordMutation>,
        started: Instant,
    ) -> Flow<(String, bool)> {
        TraceEvent::ToolInvoked {
            session_id: self.input.session_id.clone(),
            tool_name: call.tool_name.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            ok: !is_error,
        }
        .emit();
        let content = payload.to_string();
        let event = RunEvent::ToolResult {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            input: call.arguments.clone(),
            payload,
            is_error,
            mutation,
        };
        match self.emit(event).await {
            Flow::Next(()) => Flow::Next((content, is_error)),
            Flow::Stop => Flow::Stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bk_providers::{ScriptedProvider, ScriptedTurn};
    use bk_tools::{ToolCategory, ToolDescriptor, ToolFault, ToolHandler};

    use crate::runtime::hooks::RelayHooks;

    struct Echo(Arc<AtomicUsize>);

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, input: Value) -> std::result::Result<ToolOutcome, ToolFault> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ToolOutcome::mutated("renamed", input, "b-1", vec!["name".into()]))
        }
    }

    struct Broken;

    #[async_trait]
    impl ToolHandler for Broken {
        async fn call(&self, _input: Value) -> std::result::Result<ToolOutcome, ToolFault> {
            Err(ToolFault(Error::Store("connection reset".into())))
        }
    }

    fn tool(name: &'static str, handler: Arc<dyn ToolHandler>) -> ToolDescriptor {
        ToolDescriptor {
            name,
            description: "test tool",
            input_schema: json!({"type": "object"}),
            category: ToolCategory::RecordMutate,
            handler,
        }
    }

    fn input(tools: Vec<ToolDescriptor>, max_turns: u32) -> RunInput {
        RunInput {
            agent_session_id: "a-1".into(),
            session_id: "s-1".into(),
            system_prompt: "be helpful".into(),
            tools: ToolSet::new(tools),
            history: vec![Message::user("earlier"), Message::assistant("reply")],
            user_message: "rename it".into(),
            caps: RunCaps { max_turns, max_cost_usd: 1.0 },
            model: None,
            temperature: None,
            pricing: None,
        }
    }

    async fn run(
        provider: Arc<ScriptedProvider>,
        input: RunInput,
        cancel: CancelToken,
    ) -> Vec<RunEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        let hooks = Arc::new(RelayHooks::new("s-1", tx.clone()));
        let handle = spawn_run(provider, input, hooks, tx, cancel);
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        handle.await.unwrap();
        events
    }

    fn final_of(events: &[RunEvent]) -> Option<(&str, StopReason)> {
        events.iter().find_map(|e| match e {
            RunEvent::Final { content, stop_reason, .. } => Some((content.as_str(), *stop_reason)),
            _ => None,
        })
    }

    #[tokio::test]
    async fn text_only_run_completes() {
        let provider = Arc::new(ScriptedProvider::new("s", vec![ScriptedTurn::text("hello there")]));
        let events = run(provider.clone(), input(vec![], 5), CancelToken::new()).await;

        assert!(matches!(events.first(), Some(RunEvent::Hook(HookEvent::SessionStart { .. }))));
        assert_eq!(final_of(&events), Some(("hello there", StopReason::Completed)));
        assert!(matches!(
            events.last(),
            Some(RunEvent::Hook(HookEvent::SessionEnd { reason: EndReason::Completed }))
        ));

        let req = &provider.requests()[0];
        assert_eq!(req.messages.len(), 4);
        let last = req.messages[3].content.extract_all_text();
        assert!(last.contains("<user_message>"));
        assert!(last.contains("rename it"));
    }

    #[tokio::test]
    async fn tool_result_is_fed_back_and_reported() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(ScriptedProvider::new(
            "s",
            vec![
                ScriptedTurn::tool_call("c1", "rename", json!({"name": "Solstice"})),
                ScriptedTurn::text("Done."),
            ],
        ));
        let tools = vec![tool("rename", Arc::new(Echo(calls.clone())))];
        let events = run(provider.clone(), input(tools, 5), CancelToken::new()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let mutation = events.iter().find_map(|e| match e {
            RunEvent::ToolResult { mutation, is_error: false, .. } => mutation.clone(),
            _ => None,
        });
        assert_eq!(mutation.unwrap().fields, vec!["name".to_string()]);
        assert!(events
            .iter()
            .any(|e| matches!(e, RunEvent::Hook(HookEvent::ToolComplete { tool_name }) if tool_name == "rename")));
        assert_eq!(final_of(&events), Some(("Done.", StopReason::Completed)));

        // Second request carries the assistant tool call and its result.
        let second = &provider.requests()[1];
        assert_eq!(second.messages.len(), 6);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_as_error() {
        let provider = Arc::new(ScriptedProvider::new(
            "s",
            vec![
                ScriptedTurn::tool_call("c1", "grant_credits", json!({})),
                ScriptedTurn::text("Sorry."),
            ],
        ));
        let events = run(provider, input(vec![], 5), CancelToken::new()).await;
        let payload = events.iter().find_map(|e| match e {
            RunEvent::ToolResult { payload, is_error: true, .. } => Some(payload.clone()),
            _ => None,
        });
        assert_eq!(payload.unwrap()["error"], "tool not available");
        assert!(events.iter().any(|e| matches!(e, RunEvent::Hook(HookEvent::ToolError { .. }))));
        assert!(!events.iter().any(|e| matches!(e, RunEvent::ToolStart { .. })));
    }

    #[tokio::test]
    async fn tool_fault_is_masked() {
        let provider = Arc::new(ScriptedProvider::new(
            "s",
            vec![ScriptedTurn::tool_call("c1", "broken", json!({})), ScriptedTurn::text("Oops.")],
        ));
        let events = run(provider, input(vec![tool("broken", Arc::new(Broken))], 5), CancelToken::new()).await;
        let payload = events.iter().find_map(|e| match e {
            RunEvent::ToolResult { payload, .. } => Some(payload.clone()),
            _ => None,
        });
        let payload = payload.unwrap();
        assert_eq!(payload["code"], "internal");
        assert!(!payload.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn turn_cap_stops_with_budget_exceeded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(ScriptedProvider::new(
            "s",
            vec![
                ScriptedTurn::tool_call("c1", "rename", json!({})),
                ScriptedTurn::tool_call("c2", "rename", json!({})),
                ScriptedTurn::text("never reached"),
            ],
        ));
        let tools = vec![tool("rename", Arc::new(Echo(calls.clone())))];
        let events = run(provider.clone(), input(tools, 2), CancelToken::new()).await;

        let (content, reason) = final_of(&events).unwrap();
        assert_eq!(reason, StopReason::BudgetExceeded);
        assert!(content.contains("ran out of budget"));
        assert_eq!(provider.requests().len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cost_cap_stops_before_tools_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(ScriptedProvider::new(
            "s",
            vec![ScriptedTurn::tool_call("c1", "rename", json!({})).with_usage(1_000_000, 0)],
        ));
        let mut inp = input(vec![tool("rename", Arc::new(Echo(calls.clone())))], 5);
        inp.pricing = Some(ModelPricing { input_per_1m: 5.0, output_per_1m: 5.0 });
        let events = run(provider, inp, CancelToken::new()).await;

        assert_eq!(final_of(&events).map(|f| f.1), Some(StopReason::BudgetExceeded));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_failure_reports_failed() {
        let provider = Arc::new(ScriptedProvider::new("s", vec![ScriptedTurn::failure("503")]));
        let events = run(provider, input(vec![], 5), CancelToken::new()).await;
        assert!(matches!(events.last(), Some(RunEvent::Failed { .. })));
        assert!(final_of(&events).is_none());
        assert!(events
            .iter()
            .any(|e| matches!(e, RunEvent::Hook(HookEvent::SessionEnd { reason: EndReason::Error }))));
    }

    #[tokio::test]
    async fn cancel_mid_stream_stops_without_final() {
        let provider = Arc::new(ScriptedProvider::new(
            "s",
            vec![ScriptedTurn::text("one two three four five six")
                .with_delay(Duration::from_millis(20))],
        ));
        let cancel = CancelToken::new();
        let (tx, mut rx) = mpsc::channel(64);
        let hooks = Arc::new(RelayHooks::new("s-1", tx.clone()));
        let handle = spawn_run(provider, input(vec![], 5), hooks, tx, cancel.clone());

        let mut deltas = 0;
        let mut saw_final = false;
        while let Some(ev) = rx.recv().await {
            match ev {
                RunEvent::TextDelta { .. } => {
                    deltas += 1;
                    if deltas == 2 {
                        cancel.cancel();
                    }
                }
                RunEvent::Final { .. } => saw_final = true,
                _ => {}
            }
        }
        handle.await.unwrap();
        assert!(!saw_final);
        assert!(deltas < 6);
    }

    struct Slow(Arc<AtomicUsize>);

    #[async_trait]
    impl ToolHandler for Slow {
        async fn call(&self, input: Value) -> std::result::Result<ToolOutcome, ToolFault> {
            tokio::time::sleep(Duration::from_millis(80)).await;
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ToolOutcome::mutated("renamed", input, "b-1", vec!["name".into()]))
        }
    }

    #[tokio::test]
    async fn cancel_during_tool_lets_it_finish_unreported() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(ScriptedProvider::new(
            "s",
            vec![
                ScriptedTurn::tool_call("c1", "rename", json!({"name": "Solstice"})),
                ScriptedTurn::text("done"),
            ],
        ));
        let cancel = CancelToken::new();
        let (tx, mut rx) = mpsc::channel(64);
        let hooks = Arc::new(RelayHooks::new("s-1", tx.clone()));
        let tools = vec![tool("rename", Arc::new(Slow(calls.clone())))];
        let handle = spawn_run(provider.clone(), input(tools, 5), hooks, tx, cancel.clone());

        let mut after_cancel = Vec::new();
        while let Some(ev) = rx.recv().await {
            if cancel.is_cancelled() {
                after_cancel.push(ev);
            } else if matches!(ev, RunEvent::ToolStart { .. }) {
                cancel.cancel();
            }
        }
        handle.await.unwrap();

        assert!(!after_cancel.iter().any(|e| matches!(
            e,
            RunEvent::ToolResult { .. }
                | RunEvent::Final { .. }
                | RunEvent::Hook(HookEvent::ToolComplete { .. })
        )));
        // No second completion was requested.
        assert_eq!(provider.requests().len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
