//! In-process store used by tests and by local runs without a DSN.
//!
//! All tables live behind one mutex. Every operation takes it once and never
//! holds it across an await, so conditional updates are as atomic as the SQL ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::error::StoreError;
use super::filters::{Metadata, MovieQuery, SortColumn};
use super::models::{Movie, User};
use super::movies::MovieRepository;
use super::optimistic::{apply_returned_version, ensure_valid_id, expect_deleted, INITIAL_VERSION};
use super::permissions::PermissionRepository;
use super::tokens::TokenRepository;
use super::users::UserRepository;
use crate::auth::principal::PermissionSet;
use crate::auth::token::{AuthToken, Scope};

struct TokenRow {
    user_id: i64,
    expiry: DateTime<Utc>,
    scope: Scope,
}

#[derive(Default)]
struct Tables {
    movies: BTreeMap<i64, Movie>,
    next_movie_id: i64,
    users: BTreeMap<i64, User>,
    next_user_id: i64,
    tokens: HashMap<Vec<u8>, TokenRow>,
    permissions: HashMap<i64, HashSet<String>>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn title_matches(title: &str, needle: &str) -> bool {
    let words: HashSet<String> = title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    needle
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .all(|w| words.contains(&w.to_lowercase()))
}

#[async_trait]
impl MovieRepository for MemoryStore {
    async fn insert(&self, movie: &mut Movie) -> Result<(), StoreError> {
        let mut tables = self.lock();
        tables.next_movie_id += 1;
        movie.id = tables.next_movie_id;
        movie.created_at = Utc::now();
        movie.version = INITIAL_VERSION;
        tables.movies.insert(movie.id, movie.clone());
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Movie, StoreError> {
        ensure_valid_id(id)?;
        self.lock().movies.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn update(&self, movie: &mut Movie) -> Result<(), StoreError> {
        let returned = {
            let mut tables = self.lock();
            match tables.movies.get_mut(&movie.id) {
                Some(stored) if stored.version == movie.version => {
                    let version = stored.version + 1;
                    *stored = Movie { version, created_at: stored.created_at, ..movie.clone() };
                    Some(version)
                }
                _ => None,
            }
        };
        apply_returned_version(movie, returned)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        ensure_valid_id(id)?;
        let removed = self.lock().movies.remove(&id);
        expect_deleted(u64::from(removed.is_some()))
    }

    async fn get_all(&self, query: &MovieQuery) -> Result<(Vec<Movie>, Metadata), StoreError> {
        let filters = &query.filters;
        let mut matched: Vec<Movie> = self
            .lock()
            .movies
            .values()
            .filter(|m| query.title.is_empty() || title_matches(&m.title, &query.title))
            .filter(|m| query.genres.iter().all(|g| m.genres.contains(g)))
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            let primary = match filters.sort.column {
                SortColumn::Id => a.id.cmp(&b.id),
                SortColumn::Title => a.title.cmp(&b.title),
                SortColumn::Year => a.year.cmp(&b.year),
                SortColumn::Runtime => a.runtime.cmp(&b.runtime),
            };
            let primary = if filters.sort.descending { primary.reverse() } else { primary };
            primary.then(a.id.cmp(&b.id))
        });

        let total = matched.len() as i64;
        let page: Vec<Movie> = matched
            .into_iter()
            .skip(filters.offset().max(0) as usize)
            .take(filters.limit().max(0) as usize)
            .collect();
        let metadata = if page.is_empty() {
            Metadata::default()
        } else {
            Metadata::calculate(total, filters.page, filters.page_size)
        };
        Ok((page, metadata))
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn insert(&self, user: &mut User) -> Result<(), StoreError> {
        let mut tables = self.lock();
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::DuplicateEmail);
        }
        tables.next_user_id += 1;
        user.id = tables.next_user_id;
        user.created_at = Utc::now();
        user.version = INITIAL_VERSION;
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_by_email(&self, email: &str) -> Result<User, StoreError> {
        let email = super::models::user::normalize_email(email);
        self.lock()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update(&self, user: &mut User) -> Result<(), StoreError> {
        let returned = {
            let mut tables = self.lock();
            if tables.users.values().any(|u| u.id != user.id && u.email == user.email) {
                return Err(StoreError::DuplicateEmail);
            }
            match tables.users.get_mut(&user.id) {
                Some(stored) if stored.version == user.version => {
                    let version = stored.version + 1;
                    *stored = User { version, created_at: stored.created_at, ..user.clone() };
                    Some(version)
                }
                _ => None,
            }
        };
        apply_returned_version(user, returned)
    }

    async fn get_for_token(&self, scope: Scope, hash: &[u8], now: DateTime<Utc>) -> Result<User, StoreError> {
        let tables = self.lock();
        let row = tables
            .tokens
            .get(hash)
            .filter(|t| t.scope == scope && t.expiry > now)
            .ok_or(StoreError::NotFound)?;
        tables.users.get(&row.user_id).cloned().ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn insert(&self, token: &AuthToken) -> Result<(), StoreError> {
        self.lock().tokens.insert(
            token.hash.clone(),
            TokenRow { user_id: token.user_id, expiry: token.expiry, scope: token.scope },
        );
        Ok(())
    }

    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> Result<(), StoreError> {
        self.lock()
            .tokens
            .retain(|_, t| !(t.scope == scope && t.user_id == user_id));
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.lock();
        let before = tables.tokens.len();
        tables.tokens.retain(|_, t| t.expiry > now);
        Ok((before - tables.tokens.len()) as u64)
    }
}

#[async_trait]
impl PermissionRepository for MemoryStore {
    async fn get_all_for_user(&self, user_id: i64) -> Result<PermissionSet, StoreError> {
        let tables = self.lock();
        Ok(tables
            .permissions
            .get(&user_id)
            .map(|codes| codes.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_for_user(&self, user_id: i64, codes: &[String]) -> Result<(), StoreError> {
        self.lock()
            .permissions
            .entry(user_id)
            .or_default()
            .extend(codes.iter().cloned());
        Ok(())
    }
}
