use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent run limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model override. `None` uses the provider's default model.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Hard cap on LLM calls within one run.
    #[serde(default = "d_max_turns")]
    pub max_turns: u32,
    /// Hard cap on estimated spend for one run, in USD.
    #[serde(default = "d_max_cost")]
    pub max_cost_usd: f64,
    /// Number of most recent messages fed back into each run.
    #[serde(default = "d_history_window")]
    pub history_window: usize,
    /// Page size for `chat:history`.
    #[serde(default = "d_history_page")]
    pub history_page_size: usize,
    /// Upper bound on inbound message length, in characters.
    #[serde(default = "d_max_message_chars")]
    pub max_message_chars: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: None,
            max_turns: d_max_turns(),
            max_cost_usd: d_max_cost(),
            history_window: d_history_window(),
            history_page_size: d_history_page(),
            max_message_chars: d_max_message_chars(),
        }
    }
}

fn d_max_turns() -> u32 {
    8
}
fn d_max_cost() -> f64 {
    0.50
}
fn d_history_window() -> usize {
    20
}
fn d_history_page() -> usize {
    50
}
fn d_max_message_chars() -> usize {
    8000
}
