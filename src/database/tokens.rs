use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;

use super::error::StoreError;
use super::optimistic::with_deadline;
use crate::auth::token::{AuthToken, Scope};

#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Persists the hash only; the plaintext never reaches the store.
    async fn insert(&self, token: &AuthToken) -> Result<(), StoreError>;

    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> Result<(), StoreError>;

    /// Removes every token whose expiry has passed and returns how many went.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

pub struct PgTokenRepository {
    pool: PgPool,
    timeout: Duration,
}

impl PgTokenRepository {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn insert(&self, token: &AuthToken) -> Result<(), StoreError> {
        with_deadline(self.timeout, async {
            sqlx::query(
                r#"
                INSERT INTO tokens (hash, user_id, expiry, scope)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&token.hash)
            .bind(token.user_id)
            .bind(token.expiry)
            .bind(token.scope.as_str())
            .execute(&self.pool)
            .await?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> Result<(), StoreError> {
        with_deadline(self.timeout, async {
            sqlx::query("DELETE FROM tokens WHERE scope = $1 AND user_id = $2")
                .bind(scope.as_str())
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        with_deadline(self.timeout, async {
            let result = sqlx::query("DELETE FROM tokens WHERE expiry <= $1")
                .bind(now)
                .execute(&self.pool)
                .await?;
            Ok::<_, StoreError>(result.rows_affected())
        })
        .await
    }
}
