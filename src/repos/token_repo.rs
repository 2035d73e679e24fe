//! Token persistence interface used by the token store.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::repos::error::RepoResult;

/// A persisted token row.
///
/// `value` is the bearer credential itself, so `Debug` never prints it.
#[derive(Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TokenRow {
    pub id: Uuid,
    pub value: String,
    pub owner_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl TokenRow {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl std::fmt::Debug for TokenRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRow")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Storage operations for tokens.
///
/// Every check-then-act sequence the validator and store rely on is a single
/// operation here, so implementations can make it atomic (one SQL statement,
/// or one lock scope). Callers never read a row and write it back.
///
/// Each owner holds at most one row.
#[async_trait]
pub trait TokenRepo: Send + Sync + 'static {
    // Returns the backend name (for logging).
    fn backend_name(&self) -> &'static str;

    async fn find_by_value(&self, value: &str) -> RepoResult<Option<TokenRow>>;

    async fn find_by_owner(&self, owner_id: Uuid) -> RepoResult<Option<TokenRow>>;

    // Owner has a live row (`expires_at > now`): keep id and value, set expiry
    // to `candidate.expires_at`.
    // Otherwise: the owner's row becomes `candidate`.
    async fn upsert_for_owner(&self, candidate: TokenRow, now: DateTime<Utc>)
    -> RepoResult<TokenRow>;

    // The owner's row becomes `candidate` unconditionally.
    async fn replace_for_owner(&self, candidate: TokenRow) -> RepoResult<TokenRow>;

    // Sets `expires_at` only if the row is still live at `now`.
    // Returns the updated row, or `None` if no live row has that value.
    async fn extend_if_live(
        &self,
        value: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> RepoResult<Option<TokenRow>>;

    async fn set_expiry(&self, id: Uuid, expires_at: DateTime<Utc>) -> RepoResult<Option<TokenRow>>;

    // Deletes the row only if it is expired at `now`. Returns rows deleted.
    async fn delete_if_expired(&self, value: &str, now: DateTime<Utc>) -> RepoResult<u64>;

    async fn delete_by_id(&self, id: Uuid) -> RepoResult<u64>;

    async fn delete_by_owner(&self, owner_id: Uuid) -> RepoResult<u64>;
}
