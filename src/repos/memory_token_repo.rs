//! In-process token storage.
//!
//! Used when no `DATABASE_URL` is configured (local development) and by tests.
//! Each operation runs under a single write guard, which gives it the same
//! all-or-nothing behavior as the single-statement SQL in `PgTokenRepo`.
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::repos::error::{RepoError, RepoResult};
use crate::repos::token_repo::{TokenRepo, TokenRow};

#[derive(Debug, Default)]
pub struct MemoryTokenRepo {
    // keyed by owner: one row per owner
    rows: RwLock<HashMap<Uuid, TokenRow>>,
}

impl MemoryTokenRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves a token's expiry to `expires_at` regardless of its state.
    ///
    /// Returns `false` if no row carries `value`.
    pub async fn force_expiry(&self, value: &str, expires_at: DateTime<Utc>) -> bool {
        let mut rows = self.rows.write().await;
        match rows.values_mut().find(|r| r.value == value) {
            Some(row) => {
                row.expires_at = expires_at;
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

fn value_taken(rows: &HashMap<Uuid, TokenRow>, candidate: &TokenRow) -> bool {
    rows.values()
        .any(|r| r.value == candidate.value && r.owner_id != candidate.owner_id)
}

#[async_trait]
impl TokenRepo for MemoryTokenRepo {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn find_by_value(&self, value: &str) -> RepoResult<Option<TokenRow>> {
        let rows = self.rows.read().await;
        Ok(rows.values().find(|r| r.value == value).cloned())
    }

    async fn find_by_owner(&self, owner_id: Uuid) -> RepoResult<Option<TokenRow>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&owner_id).cloned())
    }

    async fn upsert_for_owner(
        &self,
        candidate: TokenRow,
        now: DateTime<Utc>,
    ) -> RepoResult<TokenRow> {
        let mut rows = self.rows.write().await;

        if let Some(existing) = rows.get_mut(&candidate.owner_id)
            && existing.is_live(now)
        {
            existing.expires_at = candidate.expires_at;
            return Ok(existing.clone());
        }

        if value_taken(&rows, &candidate) {
            return Err(RepoError::Conflict);
        }
        rows.insert(candidate.owner_id, candidate.clone());
        Ok(candidate)
    }

    async fn replace_for_owner(&self, candidate: TokenRow) -> RepoResult<TokenRow> {
        let mut rows = self.rows.write().await;

        if value_taken(&rows, &candidate) {
            return Err(RepoError::Conflict);
        }
        rows.insert(candidate.owner_id, candidate.clone());
        Ok(candidate)
    }

    async fn extend_if_live(
        &self,
        value: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> RepoResult<Option<TokenRow>> {
        let mut rows = self.rows.write().await;
        let row = rows
            .values_mut()
            .find(|r| r.value == value && r.is_live(now))
            .map(|r| {
                r.expires_at = expires_at;
                r.clone()
            });

        Ok(row)
    }

    async fn set_expiry(
        &self,
        id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> RepoResult<Option<TokenRow>> {
        let mut rows = self.rows.write().await;
        let row = rows.values_mut().find(|r| r.id == id).map(|r| {
            r.expires_at = expires_at;
            r.clone()
        });

        Ok(row)
    }

    async fn delete_if_expired(&self, value: &str, now: DateTime<Utc>) -> RepoResult<u64> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, r| !(r.value == value && !r.is_live(now)));
        Ok((before - rows.len()) as u64)
    }

    async fn delete_by_id(&self, id: Uuid) -> RepoResult<u64> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, r| r.id != id);
        Ok((before - rows.len()) as u64)
    }

    async fn delete_by_owner(&self, owner_id: Uuid) -> RepoResult<u64> {
        let mut rows = self.rows.write().await;
        Ok(rows.remove(&owner_id).map_or(0, |_| 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row(owner_id: Uuid, value: &str, expires_at: DateTime<Utc>) -> TokenRow {
        TokenRow {
            id: Uuid::new_v4(),
            value: value.to_string(),
            owner_id,
            expires_at,
        }
    }

    #[tokio::test]
    async fn upsert_keeps_live_value_and_moves_expiry() {
        let repo = MemoryTokenRepo::new();
        let owner = Uuid::new_v4();
        let now = Utc::now();

        let first = repo
            .upsert_for_owner(row(owner, "a", now + Duration::hours(1)), now)
            .await
            .unwrap();
        let second = repo
            .upsert_for_owner(row(owner, "b", now + Duration::hours(2)), now)
            .await
            .unwrap();

        assert_eq!(second.value, "a");
        assert_eq!(second.id, first.id);
        assert_eq!(second.expires_at, now + Duration::hours(2));
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn upsert_replaces_expired_row() {
        let repo = MemoryTokenRepo::new();
        let owner = Uuid::new_v4();
        let now = Utc::now();

        repo.upsert_for_owner(row(owner, "old", now - Duration::seconds(1)), now)
            .await
            .unwrap();
        let fresh = repo
            .upsert_for_owner(row(owner, "new", now + Duration::hours(1)), now)
            .await
            .unwrap();

        assert_eq!(fresh.value, "new");
        assert!(repo.find_by_value("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn value_collision_across_owners_is_a_conflict() {
        let repo = MemoryTokenRepo::new();
        let now = Utc::now();

        repo.replace_for_owner(row(Uuid::new_v4(), "same", now + Duration::hours(1)))
            .await
            .unwrap();
        let err = repo
            .replace_for_owner(row(Uuid::new_v4(), "same", now + Duration::hours(1)))
            .await
            .unwrap_err();

        assert!(matches!(err, RepoError::Conflict));
    }

    #[tokio::test]
    async fn extend_and_delete_respect_expiry() {
        let repo = MemoryTokenRepo::new();
        let owner = Uuid::new_v4();
        let now = Utc::now();

        repo.replace_for_owner(row(owner, "v", now - Duration::minutes(5)))
            .await
            .unwrap();

        let extended = repo
            .extend_if_live("v", now, now + Duration::hours(1))
            .await
            .unwrap();
        assert!(extended.is_none());

        assert_eq!(repo.delete_if_expired("v", now).await.unwrap(), 1);
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn delete_if_expired_leaves_live_rows() {
        let repo = MemoryTokenRepo::new();
        let now = Utc::now();

        repo.replace_for_owner(row(Uuid::new_v4(), "live", now + Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(repo.delete_if_expired("live", now).await.unwrap(), 0);
        assert_eq!(repo.len().await, 1);
    }
}
