//! API-key authentication for the HTTP API.

use crate::error::message_response;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{error, warn};

/// Header carrying the client's API key.
pub const API_KEY_HEADER: &str = "X-API-KEY";

pub const NOT_CONFIGURED_MESSAGE: &str = "API key is not configured on the server.";
pub const UNAUTHORIZED_MESSAGE: &str = "Unauthorized: Invalid or missing API key.";

/// First path segments that skip the key check.
const DOCUMENTATION_SEGMENTS: [&str; 2] = ["swagger", "swagger-ui"];

/// The server-side API key.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyConfig {
    key: Option<String>,
}

impl ApiKeyConfig {
    /// A blank key counts as not configured.
    pub fn new(key: Option<impl Into<String>>) -> Self {
        let key = key.map(Into::into).filter(|k: &String| !k.trim().is_empty());
        Self { key }
    }

    pub fn unconfigured() -> Self {
        Self { key: None }
    }

    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    fn verify(&self, provided: &str) -> Option<bool> {
        self.key
            .as_deref()
            .map(|expected| constant_time_eq(provided.as_bytes(), expected.as_bytes()))
    }
}

/// Authentication middleware for HTTP requests.
///
/// Documentation paths pass through; everything else needs a matching
/// `X-API-KEY`. A server without a key answers 500.
pub async fn api_key_middleware(
    State(config): State<Arc<ApiKeyConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if is_documentation_path(request.uri().path()) {
        return next.run(request).await;
    }

    if !config.is_configured() {
        error!("Rejecting request: no API key configured on the server");
        return message_response(StatusCode::INTERNAL_SERVER_ERROR, NOT_CONFIGURED_MESSAGE);
    }

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    let rejection = match provided {
        Some(key) if config.verify(key) == Some(true) => None,
        Some(key) => Some(format!("invalid API key {}", mask_key(key))),
        None => Some("missing X-API-KEY header".to_string()),
    };

    match rejection {
        None => next.run(request).await,
        Some(reason) => {
            warn!(%reason, "Authentication failed");
            message_response(StatusCode::UNAUTHORIZED, UNAUTHORIZED_MESSAGE)
        }
    }
}

/// Segment-aware, case-insensitive match on the first path segment.
pub fn is_documentation_path(path: &str) -> bool {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .is_some_and(|segment| {
            DOCUMENTATION_SEGMENTS
                .iter()
                .any(|doc| segment.eq_ignore_ascii_case(doc))
        })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

fn mask_key(key: &str) -> String {
    match key.char_indices().nth(3) {
        Some((idx, _)) => format!("{}***", &key[..idx]),
        None => "***".to_string(),
    }
}
