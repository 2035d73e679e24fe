/*
 * Responsibility
 * - tokens テーブル向け SQLx 操作
 * - check-then-act は 1 文の SQL で行い、同一トークン行への同時アクセスでも勝者は 1 つ
 * - DB エラーは RepoError に変換して返す
 */
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::repos::error::{RepoError, RepoResult};
use crate::repos::token_repo::{TokenRepo, TokenRow};

/// Schema (see `migrations/`):
/// - tokens.id (uuid, pk)
/// - tokens.value (text, unique)
/// - tokens.owner_id (uuid, unique)
/// - tokens.expires_at (timestamptz)
#[derive(Clone, Debug)]
pub struct PgTokenRepo {
    pool: PgPool,
}

impl PgTokenRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRepo for PgTokenRepo {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn find_by_value(&self, value: &str) -> RepoResult<Option<TokenRow>> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT id, value, owner_id, expires_at
            FROM tokens
            WHERE value = $1
            "#,
        )
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_by_owner(&self, owner_id: Uuid) -> RepoResult<Option<TokenRow>> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT id, value, owner_id, expires_at
            FROM tokens
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn upsert_for_owner(
        &self,
        candidate: TokenRow,
        now: DateTime<Utc>,
    ) -> RepoResult<TokenRow> {
        // SET expressions see the pre-update row, so every CASE branches on
        // the old expires_at.
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            INSERT INTO tokens (id, value, owner_id, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (owner_id) DO UPDATE
            SET
                id = CASE WHEN tokens.expires_at > $5 THEN tokens.id ELSE EXCLUDED.id END,
                value = CASE WHEN tokens.expires_at > $5 THEN tokens.value ELSE EXCLUDED.value END,
                expires_at = EXCLUDED.expires_at
            RETURNING id, value, owner_id, expires_at
            "#,
        )
        .bind(candidate.id)
        .bind(&candidate.value)
        .bind(candidate.owner_id)
        .bind(candidate.expires_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(RepoError::from_sqlx)?;

        Ok(row)
    }

    async fn replace_for_owner(&self, candidate: TokenRow) -> RepoResult<TokenRow> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            INSERT INTO tokens (id, value, owner_id, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (owner_id) DO UPDATE
            SET
                id = EXCLUDED.id,
                value = EXCLUDED.value,
                expires_at = EXCLUDED.expires_at
            RETURNING id, value, owner_id, expires_at
            "#,
        )
        .bind(candidate.id)
        .bind(&candidate.value)
        .bind(candidate.owner_id)
        .bind(candidate.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(RepoError::from_sqlx)?;

        Ok(row)
    }

    async fn extend_if_live(
        &self,
        value: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> RepoResult<Option<TokenRow>> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            UPDATE tokens
            SET expires_at = $3
            WHERE value = $1
                AND expires_at > $2
            RETURNING id, value, owner_id, expires_at
            "#,
        )
        .bind(value)
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn set_expiry(
        &self,
        id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> RepoResult<Option<TokenRow>> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            UPDATE tokens
            SET expires_at = $2
            WHERE id = $1
            RETURNING id, value, owner_id, expires_at
            "#,
        )
        .bind(id)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn delete_if_expired(&self, value: &str, now: DateTime<Utc>) -> RepoResult<u64> {
        let done = sqlx::query(
            r#"
            DELETE FROM tokens
            WHERE value = $1
                AND expires_at <= $2
            "#,
        )
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected())
    }

    async fn delete_by_id(&self, id: Uuid) -> RepoResult<u64> {
        let done = sqlx::query(
            r#"
            DELETE FROM tokens
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected())
    }

    async fn delete_by_owner(&self, owner_id: Uuid) -> RepoResult<u64> {
        let done = sqlx::query(
            r#"
            DELETE FROM tokens
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected())
    }
}
