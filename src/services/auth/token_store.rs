use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::repos::error::RepoError;
use crate::repos::token_repo::{TokenRepo, TokenRow};
use crate::services::auth::lifetime::TokenLifetime;

/// The token entity as seen by services and middleware.
pub type Token = TokenRow;

// attempts on a value collision (unique index on `value`)
const MAX_VALUE_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error("entropy source failure: {0}")]
    Entropy(getrandom::Error),

    #[error("expiry out of range for lifetime {0}")]
    ExpiryOutOfRange(TokenLifetime),
}

/// Owns the token lifecycle: issuance, lookup, sliding refresh and removal.
///
/// Expiry is always `now + lifetime` at the moment of creation or refresh.
#[derive(Clone)]
pub struct TokenStore {
    repo: Arc<dyn TokenRepo>,
    lifetime: TokenLifetime,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("backend", &self.repo.backend_name())
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

impl TokenStore {
    pub fn new(repo: Arc<dyn TokenRepo>, lifetime: TokenLifetime) -> Self {
        Self { repo, lifetime }
    }

    pub fn lifetime(&self) -> TokenLifetime {
        self.lifetime
    }

    /// Return the user's live token with its expiry pushed forward, or issue a
    /// new one if the user has none or only an expired one.
    ///
    /// Absence is never an error here; only storage failures are.
    pub async fn get_or_create(&self, user_id: Uuid) -> Result<Token, StoreError> {
        for attempt in 1..=MAX_VALUE_ATTEMPTS {
            let now = Utc::now();
            let candidate = self.candidate(user_id, now)?;
            let candidate_id = candidate.id;

            match self.repo.upsert_for_owner(candidate, now).await {
                Ok(token) => {
                    if token.id == candidate_id {
                        debug!(user_id = %user_id, token_id = %token.id, expires_at = %token.expires_at, "Issued token");
                    } else {
                        debug!(user_id = %user_id, token_id = %token.id, expires_at = %token.expires_at, "Refreshed existing token");
                    }
                    return Ok(token);
                }
                Err(RepoError::Conflict) if attempt < MAX_VALUE_ATTEMPTS => {
                    warn!(user_id = %user_id, attempt, "Token value collision, regenerating");
                }
                Err(e) => {
                    error!(user_id = %user_id, error = ?e, "Failed to get or create token");
                    return Err(e.into());
                }
            }
        }

        Err(RepoError::Conflict.into())
    }

    /// Issue a brand new token for the user, replacing any token they hold.
    pub async fn create(&self, user_id: Uuid) -> Result<Token, StoreError> {
        for attempt in 1..=MAX_VALUE_ATTEMPTS {
            let candidate = self.candidate(user_id, Utc::now())?;

            match self.repo.replace_for_owner(candidate).await {
                Ok(token) => {
                    debug!(user_id = %user_id, token_id = %token.id, expires_at = %token.expires_at, "Issued token");
                    return Ok(token);
                }
                Err(RepoError::Conflict) if attempt < MAX_VALUE_ATTEMPTS => {
                    warn!(user_id = %user_id, attempt, "Token value collision, regenerating");
                }
                Err(e) => {
                    error!(user_id = %user_id, error = ?e, "Failed to create token");
                    return Err(e.into());
                }
            }
        }

        Err(RepoError::Conflict.into())
    }

    /// Set the token's expiry to `now + lifetime`.
    ///
    /// Returns `None` if the token no longer exists.
    pub async fn refresh(&self, token: &Token) -> Result<Option<Token>, StoreError> {
        let expires_at = self.expiry_from(Utc::now())?;

        self.repo
            .set_expiry(token.id, expires_at)
            .await
            .map_err(|e| {
                error!(token_id = %token.id, error = ?e, "Failed to refresh token");
                StoreError::from(e)
            })
    }

    pub async fn delete(&self, token: &Token) -> Result<bool, StoreError> {
        let deleted = self.repo.delete_by_id(token.id).await?;
        Ok(deleted > 0)
    }

    /// Remove every token the user owns (logout / expire-all).
    pub async fn delete_all_for(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let deleted = self.repo.delete_by_owner(user_id).await.map_err(|e| {
            error!(user_id = %user_id, error = ?e, "Failed to delete tokens");
            StoreError::from(e)
        })?;

        debug!(user_id = %user_id, deleted, "Deleted tokens");
        Ok(deleted)
    }

    pub async fn find_by_value(&self, value: &str) -> Result<Option<Token>, StoreError> {
        Ok(self.repo.find_by_value(value).await?)
    }

    pub async fn find_by_owner(&self, user_id: Uuid) -> Result<Option<Token>, StoreError> {
        Ok(self.repo.find_by_owner(user_id).await?)
    }

    /// Push the expiry of a still-live token forward in one step.
    pub(crate) async fn extend_if_live(
        &self,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Token>, StoreError> {
        let expires_at = self.expiry_from(now)?;
        Ok(self.repo.extend_if_live(value, now, expires_at).await?)
    }

    /// Delete the token only if it has expired at `now`.
    pub(crate) async fn delete_if_expired(
        &self,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self.repo.delete_if_expired(value, now).await? > 0)
    }

    fn candidate(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<TokenRow, StoreError> {
        Ok(TokenRow {
            id: Uuid::new_v4(),
            value: generate_token_value()?,
            owner_id: user_id,
            expires_at: self.expiry_from(now)?,
        })
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        self.lifetime
            .expires_from(now)
            .ok_or(StoreError::ExpiryOutOfRange(self.lifetime))
    }
}

fn generate_token_value() -> Result<String, StoreError> {
    // 32 bytes of entropy -> URL-safe base64 without padding.
    let mut bytes = [0u8; 32];
    getrandom::fill(&mut bytes).map_err(StoreError::Entropy)?;

    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repos::MemoryTokenRepo;
    use crate::services::auth::lifetime::TimeUnit;
    use chrono::Duration;

    fn store() -> (Arc<MemoryTokenRepo>, TokenStore) {
        let repo = Arc::new(MemoryTokenRepo::new());
        let store = TokenStore::new(repo.clone(), TokenLifetime::new(1, TimeUnit::Hours));
        (repo, store)
    }

    #[test]
    fn generated_values_are_url_safe_and_distinct() {
        let a = generate_token_value().unwrap();
        let b = generate_token_value().unwrap();
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn get_or_create_twice_returns_same_value() {
        let (_, store) = store();
        let user = Uuid::new_v4();

        let first = store.get_or_create(user).await.unwrap();
        let second = store.get_or_create(user).await.unwrap();

        assert_eq!(first.value, second.value);
        assert_eq!(first.id, second.id);
        assert!(second.expires_at >= first.expires_at);
    }

    #[tokio::test]
    async fn get_or_create_after_expiry_issues_new_value() {
        let (repo, store) = store();
        let user = Uuid::new_v4();

        let first = store.get_or_create(user).await.unwrap();
        assert!(
            repo.force_expiry(&first.value, Utc::now() - Duration::seconds(1))
                .await
        );
        let second = store.get_or_create(user).await.unwrap();

        assert_ne!(first.value, second.value);
        assert!(store.find_by_value(&first.value).await.unwrap().is_none());
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn create_rotates_existing_token() {
        let (_, store) = store();
        let user = Uuid::new_v4();

        let first = store.create(user).await.unwrap();
        let second = store.create(user).await.unwrap();

        assert_ne!(first.value, second.value);
        assert!(store.find_by_value(&first.value).await.unwrap().is_none());
        assert_eq!(
            store.find_by_owner(user).await.unwrap().map(|t| t.value),
            Some(second.value)
        );
    }

    #[tokio::test]
    async fn refresh_sets_expiry_from_now() {
        let (repo, store) = store();
        let user = Uuid::new_v4();

        let token = store.create(user).await.unwrap();
        let soon = Utc::now() + Duration::minutes(1);
        repo.force_expiry(&token.value, soon).await;

        let refreshed = store.refresh(&token).await.unwrap().unwrap();
        assert!(refreshed.expires_at > soon);
        assert!(refreshed.expires_at <= Utc::now() + Duration::hours(1));
    }

    #[tokio::test]
    async fn refresh_of_deleted_token_is_none() {
        let (_, store) = store();
        let token = store.create(Uuid::new_v4()).await.unwrap();

        assert!(store.delete(&token).await.unwrap());
        assert!(store.refresh(&token).await.unwrap().is_none());
        assert!(!store.delete(&token).await.unwrap());
    }

    #[tokio::test]
    async fn delete_all_for_removes_only_that_user() {
        let (repo, store) = store();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        store.create(alice).await.unwrap();
        let bobs = store.create(bob).await.unwrap();

        assert_eq!(store.delete_all_for(alice).await.unwrap(), 1);
        assert_eq!(store.delete_all_for(alice).await.unwrap(), 0);
        assert!(store.find_by_owner(alice).await.unwrap().is_none());
        assert_eq!(
            store.find_by_value(&bobs.value).await.unwrap().map(|t| t.owner_id),
            Some(bob)
        );
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_get_or_create_settles_on_one_token() {
        let (repo, store) = store();
        let user = Uuid::new_v4();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..32 {
            let store = store.clone();
            tasks.spawn(async move { store.get_or_create(user).await.unwrap() });
        }

        let mut values = std::collections::HashSet::new();
        while let Some(token) = tasks.join_next().await {
            values.insert(token.unwrap().value);
        }

        assert_eq!(values.len(), 1);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn out_of_range_lifetime_is_an_error_not_a_panic() {
        let repo = Arc::new(MemoryTokenRepo::new());
        let store = TokenStore::new(repo.clone(), TokenLifetime::new(u32::MAX, TimeUnit::Days));
        let user = Uuid::new_v4();

        assert!(matches!(
            store.get_or_create(user).await,
            Err(StoreError::ExpiryOutOfRange(_))
        ));
        assert!(matches!(
            store.create(user).await,
            Err(StoreError::ExpiryOutOfRange(_))
        ));
        assert!(repo.is_empty().await);
    }
}
