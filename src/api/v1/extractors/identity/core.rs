use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::{GateState, Identity, RequestContext};

/// Handler で RequestContext を受け取るための extractor
///
/// gate middleware が `GateState` (常に) と `Identity` (identity 連携が有効な時のみ)
/// を extensions に insert している前提。無ければ Unchecked / Anonymous になる。
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = parts
            .extensions
            .get::<Identity>()
            .cloned()
            .unwrap_or_default();
        let gate = parts
            .extensions
            .get::<GateState>()
            .copied()
            .unwrap_or_default();

        Ok(RequestContext { identity, gate })
    }
}
