//! AppState construction extracted from `main.rs`.

use std::sync::Arc;

use anyhow::Context;

use bk_domain::config::{Config, ConfigSeverity};
use bk_providers::ProviderRegistry;
use bk_store::{InMemoryJobQueue, InMemoryStore, JobQueue, SeedData, Store};

use crate::api::auth::{HmacTokenVerifier, IdentityVerifier, StaticTokenVerifier};
use crate::state::AppState;

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Store ────────────────────────────────────────────────────────
    let store: Arc<dyn Store> = match &config.store.seed_path {
        Some(path) => {
            let seed = SeedData::load(path)
                .with_context(|| format!("loading seed {}", path.display()))?;
            tracing::info!(
                path = %path.display(),
                users = seed.users.len(),
                brands = seed.brands.len(),
                "in-memory store seeded"
            );
            Arc::new(InMemoryStore::from_seed(seed))
        }
        None => {
            tracing::warn!("no [store] seed_path configured; starting with an empty store");
            Arc::new(InMemoryStore::new())
        }
    };

    // ── Job queue ────────────────────────────────────────────────────
    let jobs: Option<Arc<dyn JobQueue>> = Some(Arc::new(InMemoryJobQueue::new()));
    tracing::info!("in-memory job queue ready");

    // ── LLM providers ────────────────────────────────────────────────
    let llm = Arc::new(ProviderRegistry::from_config(&config.llm));
    if !llm.is_empty() {
        tracing::info!(providers = llm.len(), "LLM provider registry ready");
    }

    // ── Identity ─────────────────────────────────────────────────────
    let verifier = build_verifier(&config);

    Ok(AppState::new(config, store, jobs, llm, verifier))
}

/// Signed tokens win over development tokens when both are configured.
fn build_verifier(config: &Config) -> Option<Arc<dyn IdentityVerifier>> {
    if let Some(v) = HmacTokenVerifier::from_env(&config.auth.hmac_secret_env) {
        tracing::info!(env = %config.auth.hmac_secret_env, "HMAC token verification enabled");
        return Some(Arc::new(v));
    }
    if let Some(v) = StaticTokenVerifier::from_env(&config.auth.dev_tokens_env) {
        tracing::warn!(
            env = %config.auth.dev_tokens_env,
            tokens = v.len(),
            "using static development tokens; do not use in production"
        );
        return Some(Arc::new(v));
    }
    tracing::warn!(
        hmac_env = %config.auth.hmac_secret_env,
        dev_env = %config.auth.dev_tokens_env,
        "no identity verifier configured; every chat connection will be refused"
    );
    None
}
