//! Bearer-token auth for the API.
//!
//! The admin token comes from the environment at startup, never from the
//! config file. With no token configured the console is locked: every
//! protected route answers 401 until one is set.

use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use tracing::warn;

pub const TOKEN_HEADER: &str = "x-opsgate-token";
pub const ACTOR_HEADER: &str = "x-opsgate-actor";

/// Holds only a digest of the configured token.
#[derive(Clone)]
pub struct TokenGuard {
    digest: Option<[u8; 32]>,
}

impl TokenGuard {
    pub fn new(token: Option<String>) -> Self {
        let digest = token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| Sha256::digest(t.as_bytes()).into());
        Self { digest }
    }

    /// Compare hashes of both sides rather than the raw strings, so the
    /// comparison time does not depend on where the values diverge.
    pub fn verify(&self, provided: &str) -> bool {
        let Some(expected) = &self.digest else {
            return false;
        };
        let provided: [u8; 32] = Sha256::digest(provided.trim().as_bytes()).into();
        &provided == expected
    }

    pub fn is_configured(&self) -> bool {
        self.digest.is_some()
    }
}

impl std::fmt::Debug for TokenGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGuard")
            .field("configured", &self.is_configured())
            .finish()
    }
}

/// Middleware guarding every route except `/api/v1/health`.
pub async fn require_token(
    axum::extract::State(guard): axum::extract::State<TokenGuard>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !guard.verify(provided) {
        warn!(path = %request.uri().path(), "rejected unauthenticated request");
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({
                "success": false,
                "error": "invalid or missing token"
            })),
        )
            .into_response();
    }
    next.run(request).await
}

/// The acting identity for audit rows, from the actor header.
pub fn actor_from(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_accepts_exact_token_only() {
        let guard = TokenGuard::new(Some("s3cret".to_string()));
        assert!(guard.verify("s3cret"));
        assert!(guard.verify("  s3cret  "));
        assert!(!guard.verify("s3cret2"));
        assert!(!guard.verify(""));
    }

    #[test]
    fn missing_token_locks_the_console() {
        for guard in [
            TokenGuard::new(None),
            TokenGuard::new(Some(String::new())),
            TokenGuard::new(Some("   ".to_string())),
        ] {
            assert!(!guard.is_configured());
            assert!(!guard.verify("anything"));
            assert!(!guard.verify(""));
        }
    }

    #[test]
    fn actor_defaults_to_unknown() {
        let mut headers = HeaderMap::new();
        assert_eq!(actor_from(&headers), "unknown");

        headers.insert(ACTOR_HEADER, "ops@example".parse().unwrap());
        assert_eq!(actor_from(&headers), "ops@example");
    }
}
