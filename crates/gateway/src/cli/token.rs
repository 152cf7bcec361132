use anyhow::Context;

use bk_domain::config::Config;

use crate::api::auth::HmacTokenVerifier;

/// Print a signed token for `user` valid for `ttl_secs` (or the configured
/// default).
pub fn mint(config: &Config, user: &str, ttl_secs: Option<u64>) -> anyhow::Result<()> {
    let env = &config.auth.hmac_secret_env;
    let verifier = HmacTokenVerifier::from_env(env)
        .with_context(|| format!("{env} is not set; cannot sign tokens"))?;
    let ttl = ttl_secs.unwrap_or(config.auth.token_ttl_secs);
    let ttl = i64::try_from(ttl).context("ttl too large")?;
    let expires = chrono::Utc::now().timestamp().saturating_add(ttl);
    let token = verifier.mint(user, expires)?;
    println!("{token}");
    Ok(())
}
