use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::services::auth::token_store::{StoreError, Token, TokenStore};

/// Why a presented token was not accepted.
///
/// The distinction is for logs only; every variant is the same denial to
/// the client.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("no token presented")]
    Missing,

    #[error("token not found")]
    NotFound,

    #[error("token expired")]
    Expired,

    #[error("request body is not valid JSON")]
    MalformedBody,

    #[error("token store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

/// Validates raw token values against the store.
///
/// A live token has its expiry pushed to `now + lifetime` on every successful
/// validation. An expired token is deleted the moment it is seen.
#[derive(Clone, Debug)]
pub struct TokenValidator {
    store: TokenStore,
}

impl TokenValidator {
    pub fn new(store: TokenStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub async fn validate(&self, raw: Option<&str>) -> Result<Token, Rejection> {
        let value = match raw.map(str::trim) {
            Some(v) if !v.is_empty() => v,
            _ => return Err(Rejection::Missing),
        };

        let now = Utc::now();

        let refreshed = self.store.extend_if_live(value, now).await.map_err(|e| {
            warn!(error = ?e, "Token lookup failed");
            Rejection::from(e)
        })?;

        if let Some(token) = refreshed {
            debug!(token_id = %token.id, user_id = %token.owner_id, expires_at = %token.expires_at, "Token accepted");
            return Ok(token);
        }

        let expired = self.store.delete_if_expired(value, now).await.map_err(|e| {
            warn!(error = ?e, "Expired token cleanup failed");
            Rejection::from(e)
        })?;

        if expired {
            debug!("Expired token removed");
            Err(Rejection::Expired)
        } else {
            debug!("Token not found");
            Err(Rejection::NotFound)
        }
    }
}
