//! Token extraction from the request transport.
//!
//! The `token` cookie is read first (cookie transport only); when it is absent
//! or empty the body is buffered and parsed as JSON for a string `token`
//! field. The buffered body is put back so handlers still receive it.

use axum::{
    body::{Body, Bytes, to_bytes},
    http::{HeaderMap, Request, header},
};
use serde_json::Value;

use crate::config::TokenTransport;
use crate::error::AppError;
use crate::services::auth::Rejection;

pub const TOKEN_FIELD: &str = "token";

/// Reads the `token` cookie. An empty value counts as absent.
pub fn token_from_cookies(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| name.trim() == TOKEN_FIELD)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
}

/// Reads `token` from a JSON body.
///
/// - empty body, non-object JSON, missing or non-string field -> `Missing`
/// - not JSON at all -> `MalformedBody`
pub fn token_from_json(body: &[u8]) -> Result<String, Rejection> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(Rejection::Missing);
    }

    let json: Value = serde_json::from_slice(body).map_err(|_| Rejection::MalformedBody)?;

    json.get(TOKEN_FIELD)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(Rejection::Missing)
}

/// Pull the token out of `req` according to `transport`.
///
/// Returns the request (with its body restored) alongside the outcome. Only a
/// body that cannot be read at all is an error.
pub async fn extract_token(
    req: Request<Body>,
    transport: TokenTransport,
    body_limit: usize,
) -> Result<(Result<String, Rejection>, Request<Body>), AppError> {
    if transport == TokenTransport::Cookies
        && let Some(token) = token_from_cookies(req.headers())
    {
        return Ok((Ok(token), req));
    }

    let (parts, body) = req.into_parts();
    let bytes: Bytes = to_bytes(body, body_limit).await.map_err(|e| {
        tracing::warn!(error = %e, "failed to buffer request body");
        AppError::InvalidRequest("unreadable request body".to_string())
    })?;

    let found = token_from_json(&bytes);
    Ok((found, Request::from_parts(parts, Body::from(bytes))))
}
