// Shared-secret check for the HTTP surface
// Credentials arrive as `Authorization: Bearer <key>` or a `?key=` query parameter.

use axum::http::{header, HeaderMap};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Holds the digest of the configured secret
#[derive(Clone)]
pub struct AuthGate {
    digest: [u8; 32],
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate").finish_non_exhaustive()
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

impl AuthGate {
    pub fn new(secret: &str) -> Self {
        Self {
            digest: digest(secret),
        }
    }

    /// Constant-time comparison; an absent credential never passes
    pub fn authorize(&self, credential: Option<&str>) -> bool {
        match credential {
            Some(candidate) if !candidate.is_empty() => {
                bool::from(digest(candidate).ct_eq(&self.digest))
            }
            _ => false,
        }
    }
}

/// Pull the caller's credential, preferring the bearer header over the query
pub fn extract_credential(headers: &HeaderMap, query_key: Option<&str>) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    query_key
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn bearer(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", value)).unwrap(),
        );
        headers
    }

    #[test]
    fn test_authorize_matches_secret_only() {
        let gate = AuthGate::new("s3cret");
        assert!(gate.authorize(Some("s3cret")));
        assert!(!gate.authorize(Some("s3cret ")));
        assert!(!gate.authorize(Some("wrong")));
    }

    #[test]
    fn test_absent_or_empty_credential_is_unauthorized() {
        let gate = AuthGate::new("s3cret");
        assert!(!gate.authorize(None));
        assert!(!gate.authorize(Some("")));
    }

    #[test]
    fn test_bearer_takes_precedence_over_query() {
        let headers = bearer("from-header");
        assert_eq!(
            extract_credential(&headers, Some("from-query")).as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn test_query_used_without_header() {
        let headers = HeaderMap::new();
        assert_eq!(
            extract_credential(&headers, Some("from-query")).as_deref(),
            Some("from-query")
        );
    }

    #[test]
    fn test_blank_values_count_as_absent() {
        let headers = bearer("   ");
        assert_eq!(extract_credential(&headers, Some("")), None);
        assert_eq!(
            extract_credential(&headers, Some("fallback")).as_deref(),
            Some("fallback")
        );
    }

    #[test]
    fn test_non_bearer_scheme_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_credential(&headers, None), None);
    }
}
