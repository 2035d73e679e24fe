//! Response envelope for JSON API routes.
//!
//! Responses on matching API paths are rewritten to
//! `{"status": <code>, "datas": <body without "message">, "message": <body.message | null>}`.
//!
//! Formatting is best-effort: a body that is empty or not JSON goes out
//! unchanged, and the status code is never altered. A body stream that fails
//! mid-read becomes a 500.

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::{OriginalUri, State},
    http::{HeaderValue, Method, Request, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::EnvelopeConfig;
use crate::error::AppError;
use crate::state::AppState;

const MESSAGE_FIELD: &str = "message";

#[derive(Debug, Serialize)]
struct Envelope {
    status: u16,
    datas: Value,
    message: Value,
}

#[derive(Clone, Debug)]
pub struct ResponseNormalizer {
    config: EnvelopeConfig,
}

impl ResponseNormalizer {
    pub fn new(config: EnvelopeConfig) -> Self {
        Self { config }
    }

    /// Whether responses to `method path` get the envelope.
    pub fn applies(&self, method: &Method, path: &str) -> bool {
        if !self.config.enabled || !self.config.methods.contains(method) {
            return false;
        }

        let path = path.trim_start_matches('/');
        if self.config.excluded_patterns.iter().any(|re| re.is_match(path)) {
            return false;
        }
        self.config.api_patterns.iter().any(|re| re.is_match(path))
    }
}

/// Wrap a JSON body in the envelope.
///
/// Returns `None` when the body is empty or not JSON.
pub fn wrap_body(status: StatusCode, body: &[u8]) -> Option<Vec<u8>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return None;
    }

    let data: Value = serde_json::from_slice(body).ok()?;

    let (datas, message) = match data {
        Value::Object(mut map) => {
            let message = map.remove(MESSAGE_FIELD).unwrap_or(Value::Null);
            (Value::Object(map), message)
        }
        Value::Null => (Value::Object(Map::new()), Value::Null),
        other => (other, Value::Null),
    };

    let envelope = Envelope {
        status: status.as_u16(),
        datas,
        message,
    };

    serde_json::to_vec(&envelope).ok()
}

// Only buffer bodies that can be JSON; streams and other media pass through.
fn may_be_json(response: &Response) -> bool {
    let Some(content_type) = response.headers().get(header::CONTENT_TYPE) else {
        return true;
    };
    let Ok(content_type) = content_type.to_str() else {
        return false;
    };

    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    essence == "application/json" || essence.ends_with("+json")
}

pub fn apply(router: Router<AppState>, state: AppState) -> Router<AppState> {
    router.layer(middleware::from_fn_with_state(state, envelope_middleware))
}

async fn envelope_middleware(
    State(state): State<AppState>,
    OriginalUri(original_uri): OriginalUri,
    req: Request<Body>,
    next: Next,
) -> Response {
    let applies = state.normalizer.applies(req.method(), original_uri.path());

    let response = next.run(req).await;
    if !applies || !may_be_json(&response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            // the stream is partly consumed; the original body cannot be sent on
            tracing::error!(error = %err, path = original_uri.path(), status = %parts.status, "failed to buffer response body");
            return AppError::Internal.into_response();
        }
    };

    match wrap_body(parts.status, &bytes) {
        Some(wrapped) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            parts.headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            Response::from_parts(parts, Body::from(wrapped))
        }
        None => Response::from_parts(parts, Body::from(bytes)),
    }
}
