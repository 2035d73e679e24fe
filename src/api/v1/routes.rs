/*
 * Responsibility
 * - v1 の URL 構造を定義
 * - /accounts (signin/signout) と /api/v1 (me) を分けて返す
 * - gate / envelope の適用範囲は app 側で決める
 */
use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

use crate::api::v1::handlers::{
    accounts::{sign_in, sign_out},
    me::me,
};

/// Mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new().route("/me", get(me))
}

/// Mounted under `/accounts`.
pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/signin/", post(sign_in))
        .route("/signout/", post(sign_out))
}
