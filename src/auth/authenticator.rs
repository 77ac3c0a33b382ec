use chrono::Utc;
use std::sync::Arc;

use super::principal::Principal;
use super::token::{hash_plaintext, is_well_formed, Scope};
use super::AuthError;
use crate::database::{StoreError, UserRepository};

/// Resolves the `Authorization` header into a [`Principal`].
pub struct TokenAuthenticator {
    users: Arc<dyn UserRepository>,
}

impl TokenAuthenticator {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    /// No header resolves to the anonymous principal. Shape checks run before any store access.
    pub async fn resolve(&self, header: Option<&str>) -> Result<Principal, AuthError> {
        let value = match header {
            None => return Ok(Principal::Anonymous),
            Some(v) if v.is_empty() => return Ok(Principal::Anonymous),
            Some(v) => v,
        };

        let token = bearer_token(value)?;
        if !is_well_formed(token) {
            return Err(AuthError::Malformed);
        }

        let hash = hash_plaintext(token);
        match self.users.get_for_token(Scope::Authentication, &hash, Utc::now()).await {
            Ok(user) => Ok(Principal::User(user)),
            Err(StoreError::NotFound) => {
                tracing::debug!("authentication token did not match a live token");
                Err(AuthError::InvalidToken)
            }
            Err(err) => {
                tracing::error!(error = %err, "token lookup failed");
                Err(AuthError::Unavailable(err))
            }
        }
    }
}

fn bearer_token(value: &str) -> Result<&str, AuthError> {
    let parts: Vec<&str> = value.split(' ').collect();
    match parts.as_slice() {
        ["Bearer", token] => Ok(*token),
        _ => Err(AuthError::Malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::{AuthToken, PLAINTEXT_LEN};
    use crate::database::models::User;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Counts lookups and answers from a fixed list of `(hash, expiry)` rows.
    #[derive(Default)]
    struct CountingUsers {
        calls: AtomicUsize,
        rows: Mutex<Vec<(Vec<u8>, DateTime<Utc>)>>,
        fail: bool,
    }

    impl CountingUsers {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn alice() -> User {
        let mut user = User::new("Alice".into(), "alice@example.com".into(), "hash".into());
        user.id = 1;
        user.activated = true;
        user
    }

    #[async_trait]
    impl UserRepository for CountingUsers {
        async fn insert(&self, _user: &mut User) -> Result<(), StoreError> {
            unimplemented!()
        }

        async fn get_by_email(&self, _email: &str) -> Result<User, StoreError> {
            unimplemented!()
        }

        async fn update(&self, _user: &mut User) -> Result<(), StoreError> {
            unimplemented!()
        }

        async fn get_for_token(&self, scope: Scope, hash: &[u8], now: DateTime<Utc>) -> Result<User, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StoreError::Timeout(std::time::Duration::from_secs(3)));
            }
            assert_eq!(scope, Scope::Authentication);
            let rows = self.rows.lock().unwrap();
            rows.iter()
                .find(|(h, expiry)| h.as_slice() == hash && *expiry > now)
                .map(|_| alice())
                .ok_or(StoreError::NotFound)
        }
    }

    fn authenticator_with(store: Arc<CountingUsers>) -> TokenAuthenticator {
        TokenAuthenticator::new(store)
    }

    #[tokio::test]
    async fn missing_header_is_anonymous() {
        let store = Arc::new(CountingUsers::default());
        let auth = authenticator_with(store.clone());
        assert_eq!(auth.resolve(None).await.unwrap(), Principal::Anonymous);
        assert_eq!(auth.resolve(Some("")).await.unwrap(), Principal::Anonymous);
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_headers_never_reach_the_store() {
        let store = Arc::new(CountingUsers::default());
        let auth = authenticator_with(store.clone());
        let token = "A".repeat(PLAINTEXT_LEN);
        for header in [
            token.clone(),
            format!("Basic {token}"),
            format!("Bearer {token} extra"),
            format!("bearer {token}"),
            "Bearer short".to_string(),
            format!("Bearer {}", "a".repeat(PLAINTEXT_LEN)),
            "Bearer ".to_string(),
        ] {
            let err = auth.resolve(Some(&header)).await.unwrap_err();
            assert!(matches!(err, AuthError::Malformed), "header {header:?} gave {err:?}");
        }
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn live_token_resolves_user() {
        let token = AuthToken::generate(1, chrono::Duration::hours(1), Scope::Authentication);
        let store = Arc::new(CountingUsers::default());
        store.rows.lock().unwrap().push((token.hash.clone(), token.expiry));
        let auth = authenticator_with(store.clone());

        let principal = auth
            .resolve(Some(&format!("Bearer {}", token.plaintext)))
            .await
            .unwrap();
        assert_eq!(principal.id(), 1);
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn expired_token_is_invalid_even_when_hash_matches() {
        let token = AuthToken::generate(1, chrono::Duration::hours(-1), Scope::Authentication);
        let store = Arc::new(CountingUsers::default());
        store.rows.lock().unwrap().push((token.hash.clone(), token.expiry));
        let auth = authenticator_with(store.clone());

        let err = auth
            .resolve(Some(&format!("Bearer {}", token.plaintext)))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn store_failure_is_unavailable_not_invalid() {
        let store = Arc::new(CountingUsers { fail: true, ..Default::default() });
        let auth = authenticator_with(store);
        let token = AuthToken::generate(1, chrono::Duration::hours(1), Scope::Authentication);

        let err = auth
            .resolve(Some(&format!("Bearer {}", token.plaintext)))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unavailable(_)));
    }
}
