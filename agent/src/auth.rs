//! Bearer key check for the control routes
//!
//! Every `/node/*`, `/snapshot/*` and `/operation*` handler takes an
//! [`Operator`] argument, so a request reaches the controller only after
//! its key matched the configured one.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
};
use std::sync::Arc;
use tracing::debug;

use crate::AppState;

/// Proof that the request carried the agent's API key
pub struct Operator;

impl FromRequestParts<Arc<AppState>> for Operator {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match bearer_token(&parts.headers) {
            Some(token) if key_matches(token, &state.api_key) => Ok(Operator),
            _ => {
                debug!("Rejected {} {}", parts.method, parts.uri.path());
                Err(StatusCode::UNAUTHORIZED)
            }
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Compares every byte so the time taken does not depend on the match length.
/// An empty configured key matches nothing.
fn key_matches(token: &str, api_key: &str) -> bool {
    if api_key.is_empty() || token.len() != api_key.len() {
        return false;
    }
    token
        .bytes()
        .zip(api_key.bytes())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}
