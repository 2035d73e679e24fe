use axum::Json;

use crate::{
    api::v1::{
        dto::me::MeResponse,
        extractors::{Identity, RequestContext},
    },
    error::AppError,
};

/// GET /api/v1/me
pub async fn me(ctx: RequestContext) -> Result<Json<MeResponse>, AppError> {
    let Identity::User {
        user_id,
        expires_at,
        ..
    } = ctx.identity
    else {
        return Err(AppError::Unauthorized);
    };

    Ok(Json(MeResponse {
        message: "ok",
        user_id,
        expires_at,
    }))
}
