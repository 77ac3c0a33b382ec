#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use greenlight::auth::{password, AuthToken, Scope};
use greenlight::config::AppConfig;
use greenlight::database::models::User;
use greenlight::database::{MemoryStore, PermissionRepository, Stores, TokenRepository, UserRepository};
use greenlight::mailer::LogMailer;
use greenlight::{app, AppState};
use tokio::task::JoinHandle;

pub const PASSWORD: &str = "pa55word-long";

/// One in-process server per test, backed by its own memory store.
pub struct TestServer {
    pub base_url: String,
    pub store: Arc<MemoryStore>,
    pub client: reqwest::Client,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Limiter off so request counts never interfere with the scenario under test.
    pub async fn start() -> Result<Self> {
        Self::start_with(|config| config.limiter.enabled = false).await
    }

    pub async fn start_with(tweak: impl FnOnce(&mut AppConfig)) -> Result<Self> {
        let mut config = AppConfig::development();
        config.security.bcrypt_cost = 4;
        tweak(&mut config);

        let store = Arc::new(MemoryStore::new());
        let stores = Stores::from_memory(Arc::clone(&store));
        let state = AppState::new(config, stores, Arc::new(LogMailer::default()), None);

        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .context("failed to bind test listener")?;

        let handle = tokio::spawn(async move {
            let service = app(state).into_make_service_with_connect_info::<SocketAddr>();
            let _ = axum::serve(listener, service).await;
        });

        Ok(Self {
            base_url: format!("http://127.0.0.1:{}", port),
            store,
            client: reqwest::Client::new(),
            handle,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Insert a user directly into the store with the given activation state and grants.
    pub async fn seed_user(&self, email: &str, activated: bool, permissions: &[&str]) -> Result<User> {
        let hash = password::hash(PASSWORD.to_string(), 4).await?;
        let mut user = User::new("Test User".to_string(), email.to_string(), hash);
        user.activated = activated;
        UserRepository::insert(self.store.as_ref(), &mut user).await?;

        if !permissions.is_empty() {
            let codes: Vec<String> = permissions.iter().map(|c| c.to_string()).collect();
            PermissionRepository::add_for_user(self.store.as_ref(), user.id, &codes).await?;
        }
        Ok(user)
    }

    /// Mint a token for `user_id` and return its plaintext.
    pub async fn issue_token(&self, user_id: i64, scope: Scope, ttl: chrono::Duration) -> Result<String> {
        let token = AuthToken::generate(user_id, ttl, scope);
        TokenRepository::insert(self.store.as_ref(), &token).await?;
        Ok(token.plaintext)
    }

    pub async fn bearer_for(&self, user_id: i64) -> Result<String> {
        let token = self
            .issue_token(user_id, Scope::Authentication, chrono::Duration::hours(1))
            .await?;
        Ok(format!("Bearer {}", token))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
