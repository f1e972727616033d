//! Shared-credential auth for the API (single-tenant).
//!
//! - Clients send the configured `API_KEY` in the `x-api-key` header
//! - When `DEV_MODE=true`, no credential is required
//! - Without a configured key outside dev mode, requests fail closed

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::routes::AppState;
use crate::config::Config;

/// Header carrying the shared credential.
pub const API_KEY_HEADER: &str = "x-api-key";

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() != b_bytes.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for i in 0..a_bytes.len() {
        diff |= a_bytes[i] ^ b_bytes[i];
    }
    diff == 0
}

/// Check a presented key against the server config.
/// Returns true iff auth is not required (dev mode), or the key matches.
pub fn verify_key_for_config(presented: &str, config: &Config) -> bool {
    if !config.auth.auth_required(config.dev_mode) {
        return true;
    }
    match config.auth.api_key.as_deref() {
        Some(expected) if !expected.is_empty() => constant_time_eq(presented.trim(), expected),
        _ => false,
    }
}

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // Dev mode => no auth checks.
    if state.config.dev_mode {
        return next.run(req).await;
    }

    if state.config.auth.api_key.is_none() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "API_KEY not configured").into_response();
    }

    let presented = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if presented.is_empty() {
        return (StatusCode::UNAUTHORIZED, "Missing API Key").into_response();
    }

    if verify_key_for_config(presented, &state.config) {
        next.run(req).await
    } else {
        (StatusCode::UNAUTHORIZED, "Invalid API Key").into_response()
    }
}
