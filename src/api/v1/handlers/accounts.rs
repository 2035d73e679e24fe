/*
 * Responsibility
 * - POST /accounts/signin/  : user の token を発行 (有効なものがあれば再利用) → cookie + body
 * - POST /accounts/signout/ : user の token を全て削除 → cookie を消す
 *
 * Notes
 * - 認証 (パスワード等) はこの層では扱わない。user_id をそのまま信頼する
 */
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::{
    api::v1::{
        dto::accounts::{SignInRequest, SignInResponse, SignOutResponse},
        extractors::RequestContext,
    },
    error::AppError,
    middleware::auth::extract::TOKEN_FIELD,
    services::auth::Token,
    state::AppState,
};

pub async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> Result<Response, AppError> {
    let token = state.tokens.get_or_create(req.user_id).await?;
    tracing::info!(user_id = %token.owner_id, token_id = %token.id, "signed in");

    let cookie = token_cookie(&token, state.tokens.lifetime().as_seconds(), state.secure_cookies);
    let body = SignInResponse {
        message: "signed in",
        token: token.value,
        expires_at: token.expires_at,
    };

    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

pub async fn sign_out(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Response, AppError> {
    let user_id = ctx.identity.user_id().ok_or(AppError::Unauthorized)?;

    let revoked = state.tokens.delete_all_for(user_id).await?;
    tracing::info!(%user_id, revoked, "signed out");

    let body = SignOutResponse {
        message: "signed out",
        revoked,
    };

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, clear_cookie(state.secure_cookies))],
        Json(body),
    )
        .into_response())
}

fn token_cookie(token: &Token, max_age: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{TOKEN_FIELD}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}",
        token.value
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn clear_cookie(secure: bool) -> String {
    let mut cookie = format!("{TOKEN_FIELD}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}
