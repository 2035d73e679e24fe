use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub message: &'static str,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}
