use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Identity verification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the gateway finds the secrets used to verify bearer tokens.
///
/// Both are names of environment variables, never the secrets themselves.
/// When neither variable is set every websocket handshake is refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Env var holding the HMAC secret for signed `user.expires.sig` tokens.
    #[serde(default = "d_hmac_secret_env")]
    pub hmac_secret_env: String,
    /// Env var holding `user:token,user:token` pairs for local development.
    #[serde(default = "d_dev_tokens_env")]
    pub dev_tokens_env: String,
    /// Default lifetime for tokens minted by `token mint`.
    #[serde(default = "d_token_ttl")]
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            hmac_secret_env: d_hmac_secret_env(),
            dev_tokens_env: d_dev_tokens_env(),
            token_ttl_secs: d_token_ttl(),
        }
    }
}

fn d_hmac_secret_env() -> String {
    "BK_AUTH_SECRET".into()
}
fn d_dev_tokens_env() -> String {
    "BK_DEV_TOKENS".into()
}
fn d_token_ttl() -> u64 {
    3600
}
