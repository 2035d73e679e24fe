/*
 * Responsibility
 * - /accounts (signin/signout) の request/response DTO
 */
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SignInResponse {
    pub message: &'static str,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SignOutResponse {
    pub message: &'static str,
    // number of tokens removed for the user
    pub revoked: u64,
}
