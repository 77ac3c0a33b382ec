use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;

use super::error::StoreError;
use super::optimistic::with_deadline;
use crate::auth::principal::PermissionSet;

#[async_trait]
pub trait PermissionRepository: Send + Sync {
    async fn get_all_for_user(&self, user_id: i64) -> Result<PermissionSet, StoreError>;

    /// Grants each code; codes already held are ignored.
    async fn add_for_user(&self, user_id: i64, codes: &[String]) -> Result<(), StoreError>;
}

pub struct PgPermissionRepository {
    pool: PgPool,
    timeout: Duration,
}

impl PgPermissionRepository {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl PermissionRepository for PgPermissionRepository {
    async fn get_all_for_user(&self, user_id: i64) -> Result<PermissionSet, StoreError> {
        with_deadline(self.timeout, async {
            let codes = sqlx::query_scalar::<_, String>(
                r#"
                SELECT permissions.code
                FROM permissions
                INNER JOIN users_permissions ON users_permissions.permission_id = permissions.id
                WHERE users_permissions.user_id = $1
                "#,
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
            Ok::<_, StoreError>(codes.into_iter().collect())
        })
        .await
    }

    async fn add_for_user(&self, user_id: i64, codes: &[String]) -> Result<(), StoreError> {
        with_deadline(self.timeout, async {
            sqlx::query(
                r#"
                INSERT INTO users_permissions (user_id, permission_id)
                SELECT $1, permissions.id FROM permissions WHERE permissions.code = ANY($2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(user_id)
            .bind(codes)
            .execute(&self.pool)
            .await?;
            Ok::<_, StoreError>(())
        })
        .await
    }
}
