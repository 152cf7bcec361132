use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_60000u")]
    pub request_timeout_ms: u64,
    /// Provider id used for chat runs. Falls back to the first provider.
    #[serde(default)]
    pub default_provider: Option<String>,
    /// Registered providers. Adding a provider means adding config.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Per-model pricing used for the run spend cap (key = model name).
    #[serde(default)]
    pub pricing: HashMap<String, ModelPricing>,
    /// Pricing applied to models missing from `pricing`.
    #[serde(default)]
    pub fallback_pricing: Option<ModelPricing>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: d_60000u(),
            default_provider: None,
            providers: Vec::new(),
            pricing: HashMap::new(),
            fallback_pricing: None,
        }
    }
}

impl LlmConfig {
    /// Pricing for `model`, if any is known.
    pub fn pricing_for(&self, model: &str) -> Option<ModelPricing> {
        self.pricing.get(model).copied().or(self.fallback_pricing)
    }
}

/// Pricing per million tokens for a specific model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Dollars per 1 million input (prompt) tokens.
    pub input_per_1m: f64,
    /// Dollars per 1 million output (completion) tokens.
    pub output_per_1m: f64,
}

impl ModelPricing {
    /// Estimated cost in USD for the given token counts.
    pub fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_per_1m + output_tokens as f64 * self.output_per_1m)
            / 1_000_000.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(default)]
    pub kind: ProviderKind,
    pub base_url: String,
    /// Env var holding the API key. Unset means no auth header.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    OpenaiCompat,
}

fn d_60000u() -> u64 {
    60_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_pricing_estimate_cost() {
        let pricing = ModelPricing {
            input_per_1m: 2.50,
            output_per_1m: 10.00,
        };
        // 1000 in @ 2.50/1M + 500 out @ 10/1M = 0.0025 + 0.005
        let cost = pricing.estimate_cost(1000, 500);
        assert!((cost - 0.0075).abs() < 1e-10);
    }

    #[test]
    fn pricing_falls_back() {
        let mut cfg = LlmConfig::default();
        assert!(cfg.pricing_for("gpt-4o").is_none());
        cfg.fallback_pricing = Some(ModelPricing { input_per_1m: 1.0, output_per_1m: 2.0 });
        let p = cfg.pricing_for("gpt-4o").unwrap();
        assert!((p.output_per_1m - 2.0).abs() < 1e-10);
    }

    #[test]
    fn providers_parse_from_toml() {
        let toml_str = r#"
            default_provider = "local"

            [[providers]]
            id = "local"
            base_url = "http://localhost:11434/v1"
            default_model = "llama3.1"

            [pricing."gpt-4o"]
            input_per_1m = 2.5
            output_per_1m = 10.0
        "#;
        let cfg: LlmConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.providers.len(), 1);
        assert_eq!(cfg.providers[0].kind, ProviderKind::OpenaiCompat);
        assert!(cfg.providers[0].api_key_env.is_none());
        assert!(cfg.pricing_for("gpt-4o").is_some());
        assert_eq!(cfg.request_timeout_ms, 60_000);
    }
}
