use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::time::Duration;

use super::error::StoreError;
use super::models::user::{normalize_email, User};
use super::optimistic::{apply_returned_version, with_deadline};
use crate::auth::token::Scope;

const EMAIL_UNIQUE_CONSTRAINT: &str = "users_email_key";

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn insert(&self, user: &mut User) -> Result<(), StoreError>;

    async fn get_by_email(&self, email: &str) -> Result<User, StoreError>;

    /// Version-checked write, same protocol as movies.
    async fn update(&self, user: &mut User) -> Result<(), StoreError>;

    /// The owner of an unexpired token with this hash and scope.
    async fn get_for_token(&self, scope: Scope, hash: &[u8], now: DateTime<Utc>) -> Result<User, StoreError>;
}

pub struct PgUserRepository {
    pool: PgPool,
    timeout: Duration,
}

impl PgUserRepository {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[derive(FromRow)]
struct InsertedRow {
    id: i64,
    created_at: DateTime<Utc>,
    version: i32,
}

fn map_unique_violation(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.constraint() == Some(EMAIL_UNIQUE_CONSTRAINT) => StoreError::DuplicateEmail,
        _ => StoreError::Sqlx(err),
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn insert(&self, user: &mut User) -> Result<(), StoreError> {
        let row = with_deadline(self.timeout, async {
            sqlx::query_as::<_, InsertedRow>(
                r#"
                INSERT INTO users (name, email, password_hash, activated)
                VALUES ($1, $2, $3, $4)
                RETURNING id, created_at, version
                "#,
            )
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.activated)
            .fetch_one(&self.pool)
            .await
            .map_err(map_unique_violation)
        })
        .await?;

        user.id = row.id;
        user.created_at = row.created_at;
        user.version = row.version;
        Ok(())
    }

    async fn get_by_email(&self, email: &str) -> Result<User, StoreError> {
        let email = normalize_email(email);
        with_deadline(self.timeout, async {
            let user = sqlx::query_as::<_, User>(
                r#"
                SELECT id, created_at, name, email, password_hash, activated, version
                FROM users
                WHERE email = $1
                "#,
            )
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?;
            user.ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn update(&self, user: &mut User) -> Result<(), StoreError> {
        let returned = with_deadline(self.timeout, async {
            sqlx::query_scalar::<_, i32>(
                r#"
                UPDATE users
                SET name = $1, email = $2, password_hash = $3, activated = $4, version = version + 1
                WHERE id = $5 AND version = $6
                RETURNING version
                "#,
            )
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.activated)
            .bind(user.id)
            .bind(user.version)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_unique_violation)
        })
        .await?;

        apply_returned_version(user, returned)
    }

    async fn get_for_token(&self, scope: Scope, hash: &[u8], now: DateTime<Utc>) -> Result<User, StoreError> {
        with_deadline(self.timeout, async {
            let user = sqlx::query_as::<_, User>(
                r#"
                SELECT users.id, users.created_at, users.name, users.email,
                       users.password_hash, users.activated, users.version
                FROM users
                INNER JOIN tokens ON users.id = tokens.user_id
                WHERE tokens.hash = $1
                AND tokens.scope = $2
                AND tokens.expiry > $3
                "#,
            )
            .bind(hash)
            .bind(scope.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
            user.ok_or(StoreError::NotFound)
        })
        .await
    }
}
