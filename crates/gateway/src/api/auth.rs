//! Identity verification.
//!
//! Clients present a bearer token at websocket handshake time (and on the
//! REST routes). Two verifiers exist:
//! - [`HmacTokenVerifier`]: `<userId>.<expiresUnix>.<hex hmac-sha256>` tokens
//!   signed with the secret in `auth.hmac_secret_env`.
//! - [`StaticTokenVerifier`]: `user:token` pairs from `auth.dev_tokens_env`,
//!   for local development.
//!
//! When neither is configured every handshake is refused.

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use bk_domain::error::{Error, Result};

use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// The caller a token was issued to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user_id: String,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify_token(&self, token: &str) -> Result<VerifiedIdentity>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Signed tokens
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HmacTokenVerifier {
    secret: Vec<u8>,
}

impl HmacTokenVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var).ok().filter(|s| !s.is_empty()).map(Self::new)
    }

    fn mac(&self, message: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| Error::Auth(format!("invalid HMAC key: {e}")))?;
        mac.update(message.as_bytes());
        Ok(mac)
    }

    /// Issue a token for `user_id` that expires at `expires_unix`.
    pub fn mint(&self, user_id: &str, expires_unix: i64) -> Result<String> {
        if user_id.is_empty() || user_id.contains('.') {
            return Err(Error::Auth("user id must be non-empty and contain no '.'".into()));
        }
        let payload = format!("{user_id}.{expires_unix}");
        let sig = hex::encode(self.mac(&payload)?.finalize().into_bytes());
        Ok(format!("{payload}.{sig}"))
    }

    fn check(&self, token: &str, now_unix: i64) -> Result<VerifiedIdentity> {
        let mut parts = token.splitn(3, '.');
        let (Some(user_id), Some(expires), Some(sig)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Auth("malformed token".into()));
        };
        let expires: i64 = expires.parse().map_err(|_| Error::Auth("malformed token".into()))?;
        let sig = hex::decode(sig).map_err(|_| Error::Auth("malformed token".into()))?;

        self.mac(&format!("{user_id}.{expires}"))?
            .verify_slice(&sig)
            .map_err(|_| Error::Auth("bad signature".into()))?;
        if expires <= now_unix {
            return Err(Error::Auth("token expired".into()));
        }
        if user_id.is_empty() {
            return Err(Error::Auth("malformed token".into()));
        }
        Ok(VerifiedIdentity { user_id: user_id.to_owned() })
    }
}

#[async_trait]
impl IdentityVerifier for HmacTokenVerifier {
    async fn verify_token(&self, token: &str) -> Result<VerifiedIdentity> {
        self.check(token, chrono::Utc::now().timestamp())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Development tokens
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct StaticTokenVerifier {
    /// (user id, SHA-256 of the token)
    entries: Vec<(String, [u8; 32])>,
}

impl StaticTokenVerifier {
    /// Parse `"user1:tokA,user2:tokB"`. Malformed pairs are skipped.
    pub fn parse(raw: &str) -> Self {
        let entries = raw
            .split(',')
            .filter_map(|pair| pair.trim().split_once(':'))
            .filter(|(user, token)| !user.is_empty() && !token.is_empty())
            .map(|(user, token)| (user.to_owned(), Sha256::digest(token.as_bytes()).into()))
            .collect();
        Self { entries }
    }

    pub fn from_env(var: &str) -> Option<Self> {
        let v = Self::parse(&std::env::var(var).ok()?);
        (!v.entries.is_empty()).then_some(v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify_token(&self, token: &str) -> Result<VerifiedIdentity> {
        // Hash to a fixed length, then compare every entry in constant time.
        let provided = Sha256::digest(token.as_bytes());
        let mut found = None;
        for (user, digest) in &self.entries {
            if bool::from(provided.as_slice().ct_eq(digest)) && found.is_none() {
                found = Some(user.clone());
            }
        }
        found
            .map(|user_id| VerifiedIdentity { user_id })
            .ok_or_else(|| Error::Auth("unknown token".into()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Verify `token` against the configured verifier.
pub async fn authenticate(state: &AppState, token: Option<&str>) -> Option<VerifiedIdentity> {
    let verifier = state.verifier.as_ref()?;
    match verifier.verify_token(token?).await {
        Ok(identity) => Some(identity),
        Err(e) => {
            tracing::debug!(error = %e, "token rejected");
            None
        }
    }
}

pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({ "error": "invalid or missing token" })),
    )
        .into_response()
}

/// Axum middleware for the REST routes: verifies the bearer token and
/// stores the [`VerifiedIdentity`] in request extensions.
pub async fn require_identity(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    match authenticate(&state, bearer_token(req.headers())).await {
        Some(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        None => unauthorized(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_token_round_trips() {
        let v = HmacTokenVerifier::new("s3cret");
        let token = v.mint("u-1", 2_000).unwrap();
        assert_eq!(v.check(&token, 1_000).unwrap().user_id, "u-1");
    }

    #[test]
    fn expired_token_is_refused() {
        let v = HmacTokenVerifier::new("s3cret");
        let token = v.mint("u-1", 1_000).unwrap();
        assert!(v.check(&token, 1_000).is_err());
    }

    #[test]
    fn tampered_token_is_refused() {
        let v = HmacTokenVerifier::new("s3cret");
        let token = v.mint("u-1", 2_000).unwrap();
        let forged = token.replacen("u-1", "u-2", 1);
        assert!(v.check(&forged, 1_000).is_err());
        let other = HmacTokenVerifier::new("different");
        assert!(other.check(&token, 1_000).is_err());
        assert!(v.check("garbage", 1_000).is_err());
        assert!(v.check("u-1.notanumber.abcd", 1_000).is_err());
    }

    #[test]
    fn mint_rejects_dotted_user_ids() {
        assert!(HmacTokenVerifier::new("k").mint("a.b", 10).is_err());
    }

    #[tokio::test]
    async fn static_tokens() {
        let v = StaticTokenVerifier::parse("alice:tokA, bob:tokB,broken,:x");
        assert_eq!(v.len(), 2);
        assert_eq!(v.verify_token("tokB").await.unwrap().user_id, "bob");
        assert!(v.verify_token("tokC").await.is_err());
        assert!(v.verify_token("").await.is_err());
    }

    #[test]
    fn bearer_extraction() {
        let mut h = HeaderMap::new();
        assert!(bearer_token(&h).is_none());
        h.insert("authorization", "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&h), Some("abc"));
        h.insert("authorization", "Basic abc".parse().unwrap());
        assert!(bearer_token(&h).is_none());
    }
}
