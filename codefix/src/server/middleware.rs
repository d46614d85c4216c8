// Shared-secret gate applied to every protected route

use super::error::ApiError;
use super::AppState;
use crate::session::auth::extract_credential;
use crate::session::protocol::ErrorKind;
use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;

/// The `key` query parameter; other parameters are left to the handlers
#[derive(Debug, Default, Deserialize)]
pub struct CredentialQuery {
    #[serde(default)]
    pub key: Option<String>,
}

/// Credential carried by a request, header first
pub fn request_credential(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let query = Query::<CredentialQuery>::try_from_uri(uri)
        .map(|Query(q)| q)
        .unwrap_or_default();
    extract_credential(headers, query.key.as_deref())
}

pub async fn require_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let credential = request_credential(request.headers(), request.uri());
    if !state.auth.authorize(credential.as_deref()) {
        tracing::warn!(
            method = %request.method(),
            path = %request.uri().path(),
            "Rejected request without a valid key"
        );
        return ApiError::new(ErrorKind::Unauthorized).into_response();
    }

    next.run(request).await
}
