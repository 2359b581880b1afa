//! Internal API key verification.
//!
//! Gates the token-retrieval route: only callers presenting the shared
//! internal secret as `Authorization: Bearer <secret>` may read decrypted
//! tokens. Comparison is constant-time to resist timing side channels.

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;
use tracing::{error, warn};

/// Verifies the internal caller credential against the shared secret.
///
/// Fail-closed: with no secret configured, every request is rejected.
#[derive(Clone)]
pub struct ApiKeyGate {
    api_key: Option<String>,
}

impl ApiKeyGate {
    /// Creates a gate for the given shared secret. An empty secret counts as
    /// unconfigured.
    pub fn new(api_key: Option<String>) -> Self {
        let api_key = api_key.filter(|key| !key.is_empty());
        Self { api_key }
    }

    /// Checks the `Authorization` header against the configured secret.
    ///
    /// Accepts only the exact form `Bearer <secret>`: case-sensitive scheme,
    /// single space, no surrounding whitespace.
    pub fn verify(&self, headers: &HeaderMap) -> bool {
        let Some(api_key) = &self.api_key else {
            error!("INTERNAL_API_KEY not configured, rejecting request");
            return false;
        };

        let Some(presented) = bearer_credential(headers) else {
            warn!("Missing or invalid Authorization header");
            return false;
        };

        presented.as_bytes().ct_eq(api_key.as_bytes()).into()
    }
}

/// Extracts the credential from an exact `Bearer <credential>` header.
fn bearer_credential(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(value).unwrap());
        headers
    }

    fn gate() -> ApiKeyGate {
        ApiKeyGate::new(Some("internal-secret-key".to_string()))
    }

    #[test]
    fn test_exact_secret_accepted() {
        assert!(gate().verify(&headers_with_auth("Bearer internal-secret-key")));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        assert!(!gate().verify(&headers_with_auth("Bearer wrong-key")));
    }

    #[test]
    fn test_prefix_and_suffix_mismatches_rejected() {
        let gate = gate();
        assert!(!gate.verify(&headers_with_auth("Bearer internal-secret-ke")));
        assert!(!gate.verify(&headers_with_auth("Bearer internal-secret-key-extra")));
        assert!(!gate.verify(&headers_with_auth("Bearer xinternal-secret-key")));
    }

    #[test]
    fn test_scheme_is_case_sensitive() {
        assert!(!gate().verify(&headers_with_auth("bearer internal-secret-key")));
        assert!(!gate().verify(&headers_with_auth("BEARER internal-secret-key")));
    }

    #[test]
    fn test_empty_credential_rejected() {
        assert!(!gate().verify(&headers_with_auth("Bearer ")));
        assert!(!gate().verify(&headers_with_auth("Bearer")));
    }

    #[test]
    fn test_missing_header_rejected() {
        assert!(!gate().verify(&HeaderMap::new()));
    }

    #[test]
    fn test_unconfigured_gate_rejects_everything() {
        let gate = ApiKeyGate::new(None);
        assert!(!gate.verify(&headers_with_auth("Bearer internal-secret-key")));

        let gate = ApiKeyGate::new(Some(String::new()));
        assert!(!gate.verify(&headers_with_auth("Bearer ")));
        assert!(!gate.verify(&headers_with_auth("Bearer internal-secret-key")));
    }
}
