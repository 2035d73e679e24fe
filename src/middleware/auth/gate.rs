//! Auth gate: token validation → Identity / GateState を extensions に入れる
//!
//! Per request:
//! - enforcement off, or method not enforced → Exempt (素通し)
//! - token を取り出して検証 (有効なら有効期限を延長)
//! - 有効 → Authorized, identity 連携が有効なら User を bind
//! - 無効/無し → policy に従い Exempt (Anonymous) か 403

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{OriginalUri, State},
    http::{Method, Request},
    middleware::{self, Next},
    response::Response,
};

use crate::api::v1::extractors::{GateState, Identity};
use crate::config::{GateConfig, ProtectedPathPolicy};
use crate::error::AppError;
use crate::middleware::auth::extract::extract_token;
use crate::services::auth::{Rejection, Token, TokenValidator};
use crate::state::AppState;

/// Result of running the gate over one request.
#[derive(Debug)]
pub enum GateOutcome {
    /// Enforcement does not apply to this request.
    Exempt,
    Authorized(Token),
    /// No valid token, but the path may be reached anonymously.
    Allowed(Rejection),
    Rejected(Rejection),
}

impl GateOutcome {
    pub fn state(&self) -> GateState {
        match self {
            Self::Exempt | Self::Allowed(_) => GateState::Exempt,
            Self::Authorized(_) => GateState::Authorized,
            Self::Rejected(_) => GateState::Rejected,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthGate {
    config: GateConfig,
    validator: TokenValidator,
    body_limit: usize,
}

impl AuthGate {
    pub fn new(config: GateConfig, validator: TokenValidator, body_limit: usize) -> Self {
        Self {
            config,
            validator,
            body_limit,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn applies_to(&self, method: &Method) -> bool {
        self.config.enforcement_enabled && self.config.enforce_on_methods.contains(method)
    }

    pub fn is_allowed_path(&self, path: &str) -> bool {
        self.config.allowed_paths.iter().any(|p| p == path)
    }

    pub fn is_protected_path(&self, path: &str) -> bool {
        self.config
            .protected_path_patterns
            .iter()
            .any(|re| re.is_match(path))
    }

    /// Whether a request without a valid token may still reach `path`.
    pub fn passes_without_token(&self, path: &str) -> bool {
        if self.is_allowed_path(path) {
            return true;
        }

        let protected = self.is_protected_path(path);
        match self.config.protected_path_policy {
            ProtectedPathPolicy::Strict => false,
            ProtectedPathPolicy::ProtectedOnly => !protected,
            ProtectedPathPolicy::Legacy => protected,
        }
    }

    /// Run the gate over `req` and hand the request back (its body may have
    /// been buffered to look for a token).
    pub async fn evaluate(
        &self,
        path: &str,
        req: Request<Body>,
    ) -> Result<(GateOutcome, Request<Body>), AppError> {
        if !self.applies_to(req.method()) {
            return Ok((GateOutcome::Exempt, req));
        }

        let (found, req) = extract_token(req, self.config.token_transport, self.body_limit).await?;

        let verdict = match found {
            Ok(value) => self.validator.validate(Some(&value)).await,
            Err(rejection) => Err(rejection),
        };

        let outcome = match verdict {
            Ok(token) => GateOutcome::Authorized(token),
            Err(rejection) if self.passes_without_token(path) => GateOutcome::Allowed(rejection),
            Err(rejection) => GateOutcome::Rejected(rejection),
        };

        Ok((outcome, req))
    }
}

/// Router に auth gate を掛ける。
///
/// 例：
/// ```ignore
/// let gated = Router::new().nest("/api/v1", api::v1::routes());
/// let gated = middleware::auth::gate::apply(gated, state.clone());
/// ```
pub fn apply(router: Router<AppState>, state: AppState) -> Router<AppState> {
    router.layer(middleware::from_fn_with_state(state, gate_middleware))
}

async fn gate_middleware(
    State(state): State<AppState>,
    OriginalUri(original_uri): OriginalUri,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let gate: &Arc<AuthGate> = &state.gate;
    let path = original_uri.path();
    let method = req.method().clone();

    let (outcome, mut req) = gate.evaluate(path, req).await?;

    let identity = match &outcome {
        GateOutcome::Exempt => {
            tracing::trace!(%method, path, "auth gate not enforced");
            None
        }
        GateOutcome::Authorized(token) => Some(Identity::from_token(token)),
        GateOutcome::Allowed(rejection) => {
            tracing::debug!(%method, path, reason = %rejection, "anonymous request allowed");
            Some(Identity::Anonymous)
        }
        GateOutcome::Rejected(rejection) => {
            tracing::warn!(%method, path, reason = %rejection, "request rejected by auth gate");
            return Err(AppError::Forbidden);
        }
    };

    // middleware → extractor への受け渡し
    req.extensions_mut().insert(outcome.state());
    if gate.config().integrate_with_identity_layer
        && let Some(identity) = identity
    {
        req.extensions_mut().insert(identity);
    }

    Ok(next.run(req).await)
}
