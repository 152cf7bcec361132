//! Scripted provider for deterministic runs.
//!
//! Each call to `chat_stream` pops the next [`ScriptedTurn`] and replays its
//! events. Requests are recorded so tests can assert on what the model saw
//! (tool set, system prompt, history).

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use crate::traits::{ChatRequest, LlmProvider};
use bk_domain::error::{Error, Result};
use bk_domain::stream::{BoxStream, StreamEvent, Usage};

/// One canned model response.
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    events: Vec<StreamEvent>,
    /// Delay before each event.
    delay: Duration,
    /// When set, `chat_stream` itself fails with this message.
    fail: Option<String>,
}

impl ScriptedTurn {
    /// Plain text, streamed word by word.
    pub fn text(text: &str) -> Self {
        let mut events: Vec<StreamEvent> = text
            .split_inclusive(' ')
            .map(|w| StreamEvent::Token { text: w.to_string() })
            .collect();
        events.push(done("stop"));
        Self { events, delay: Duration::ZERO, fail: None }
    }

    /// A single tool call with complete arguments.
    pub fn tool_call(call_id: &str, tool_name: &str, arguments: serde_json::Value) -> Self {
        let events = vec![
            StreamEvent::ToolCallStarted {
                call_id: call_id.to_string(),
                tool_name: tool_name.to_string(),
            },
            StreamEvent::ToolCallDelta {
                call_id: call_id.to_string(),
                delta: arguments.to_string(),
            },
            done("tool_calls"),
        ];
        Self { events, delay: Duration::ZERO, fail: None }
    }

    /// Raw events, replayed as given.
    pub fn events(events: Vec<StreamEvent>) -> Self {
        Self { events, delay: Duration::ZERO, fail: None }
    }

    /// The request itself fails.
    pub fn failure(message: &str) -> Self {
        Self { events: Vec::new(), delay: Duration::ZERO, fail: Some(message.to_string()) }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Replace the usage reported on the closing `Done`.
    pub fn with_usage(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        for ev in &mut self.events {
            if let StreamEvent::Done { usage, .. } = ev {
                *usage = Some(Usage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: prompt_tokens + completion_tokens,
                });
            }
        }
        self
    }
}

fn done(reason: &str) -> StreamEvent {
    StreamEvent::Done {
        usage: Some(Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 }),
        finish_reason: Some(reason.to_string()),
    }
}

pub struct ScriptedProvider {
    id: String,
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(id: &str, turns: Vec<ScriptedTurn>) -> Self {
        Self {
            id: id.to_string(),
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, turn: ScriptedTurn) {
        self.turns.lock().push_back(turn);
    }

    /// Every request seen so far, oldest first.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.turns.lock().len()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.requests.lock().push(req.clone());
        let turn = self
            .turns
            .lock()
            .pop_front()
            .unwrap_or_else(|| ScriptedTurn::text("(no scripted response)"));

        if let Some(message) = turn.fail {
            return Err(Error::Provider { provider: self.id.clone(), message });
        }

        let ScriptedTurn { events, delay, .. } = turn;
        let stream = async_stream::stream! {
            for event in events {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(event);
            }
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn default_model(&self) -> &str {
        "scripted"
    }
}
