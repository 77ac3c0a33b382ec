use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::memory::MemoryStore;
use super::movies::{MovieRepository, PgMovieRepository};
use super::permissions::{PermissionRepository, PgPermissionRepository};
use super::tokens::{PgTokenRepository, TokenRepository};
use super::users::{PgUserRepository, UserRepository};
use crate::config::DatabaseConfig;

const PING_DEADLINE: Duration = Duration::from_secs(5);

/// Errors raised while opening the pool
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("database did not answer within {0:?}")]
    PingTimeout(Duration),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Open the pool and confirm the server answers before returning it.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    let dsn = config
        .dsn
        .as_deref()
        .ok_or(DatabaseError::ConfigMissing("GREENLIGHT_DB_DSN"))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_open_conns)
        .idle_timeout(config.max_idle_time())
        .acquire_timeout(config.query_timeout())
        .connect_lazy(dsn)?;

    tokio::time::timeout(PING_DEADLINE, sqlx::query("SELECT 1").execute(&pool))
        .await
        .map_err(|_| DatabaseError::PingTimeout(PING_DEADLINE))??;

    info!(max_open_conns = config.max_open_conns, "database connection pool established");
    Ok(pool)
}

/// The repositories the application talks to.
#[derive(Clone)]
pub struct Stores {
    pub movies: Arc<dyn MovieRepository>,
    pub users: Arc<dyn UserRepository>,
    pub tokens: Arc<dyn TokenRepository>,
    pub permissions: Arc<dyn PermissionRepository>,
}

impl Stores {
    pub fn postgres(pool: PgPool, timeout: Duration) -> Self {
        Self {
            movies: Arc::new(PgMovieRepository::new(pool.clone(), timeout)),
            users: Arc::new(PgUserRepository::new(pool.clone(), timeout)),
            tokens: Arc::new(PgTokenRepository::new(pool.clone(), timeout)),
            permissions: Arc::new(PgPermissionRepository::new(pool, timeout)),
        }
    }

    pub fn memory() -> Self {
        Self::from_memory(Arc::new(MemoryStore::new()))
    }

    /// All four repositories backed by one shared in-process store.
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            movies: store.clone(),
            users: store.clone(),
            tokens: store.clone(),
            permissions: store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn connect_requires_a_dsn() {
        let config = AppConfig::development().database;
        let err = connect(&config).await.unwrap_err();
        assert!(matches!(err, DatabaseError::ConfigMissing(_)));
    }

    #[tokio::test]
    async fn memory_stores_share_state() {
        let stores = Stores::memory();
        let mut user = crate::database::models::User::new("A".into(), "a@example.com".into(), "h".into());
        stores.users.insert(&mut user).await.unwrap();
        stores
            .permissions
            .add_for_user(user.id, &["movies:read".to_string()])
            .await
            .unwrap();
        assert!(stores.permissions.get_all_for_user(user.id).await.unwrap().include("movies:read"));
    }
}
