use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use std::time::Duration;

use super::error::StoreError;
use super::filters::{Metadata, MovieQuery};
use super::models::movie::{Movie, MovieRow};
use super::optimistic::{apply_returned_version, ensure_valid_id, expect_deleted, with_deadline};

#[async_trait]
pub trait MovieRepository: Send + Sync {
    /// Inserts the movie and fills in its id, creation time and initial version.
    async fn insert(&self, movie: &mut Movie) -> Result<(), StoreError>;

    async fn get(&self, id: i64) -> Result<Movie, StoreError>;

    /// Writes `movie` if the stored row is still at `movie.version`; advances the version on success.
    async fn update(&self, movie: &mut Movie) -> Result<(), StoreError>;

    async fn delete(&self, id: i64) -> Result<(), StoreError>;

    async fn get_all(&self, query: &MovieQuery) -> Result<(Vec<Movie>, Metadata), StoreError>;
}

pub struct PgMovieRepository {
    pool: PgPool,
    timeout: Duration,
}

impl PgMovieRepository {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[derive(FromRow)]
struct InsertedRow {
    id: i64,
    created_at: chrono::DateTime<chrono::Utc>,
    version: i32,
}

#[derive(FromRow)]
struct MovieListRow {
    total: i64,
    #[sqlx(flatten)]
    movie: MovieRow,
}

#[async_trait]
impl MovieRepository for PgMovieRepository {
    async fn insert(&self, movie: &mut Movie) -> Result<(), StoreError> {
        let row = with_deadline(self.timeout, async {
            let row = sqlx::query_as::<_, InsertedRow>(
                r#"
                INSERT INTO movies (title, year, runtime, genres)
                VALUES ($1, $2, $3, $4)
                RETURNING id, created_at, version
                "#,
            )
            .bind(&movie.title)
            .bind(movie.year)
            .bind(movie.runtime.minutes())
            .bind(&movie.genres)
            .fetch_one(&self.pool)
            .await?;
            Ok::<_, StoreError>(row)
        })
        .await?;

        movie.id = row.id;
        movie.created_at = row.created_at;
        movie.version = row.version;
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Movie, StoreError> {
        ensure_valid_id(id)?;

        with_deadline(self.timeout, async {
            let row = sqlx::query_as::<_, MovieRow>(
                r#"
                SELECT id, created_at, title, year, runtime, genres, version
                FROM movies
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            row.map(Movie::from).ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn update(&self, movie: &mut Movie) -> Result<(), StoreError> {
        let returned = with_deadline(self.timeout, async {
            let version = sqlx::query_scalar::<_, i32>(
                r#"
                UPDATE movies
                SET title = $1, year = $2, runtime = $3, genres = $4, version = version + 1
                WHERE id = $5 AND version = $6
                RETURNING version
                "#,
            )
            .bind(&movie.title)
            .bind(movie.year)
            .bind(movie.runtime.minutes())
            .bind(&movie.genres)
            .bind(movie.id)
            .bind(movie.version)
            .fetch_optional(&self.pool)
            .await?;
            Ok::<_, StoreError>(version)
        })
        .await?;

        apply_returned_version(movie, returned)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        ensure_valid_id(id)?;

        let rows = with_deadline(self.timeout, async {
            let result = sqlx::query("DELETE FROM movies WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok::<_, StoreError>(result.rows_affected())
        })
        .await?;

        expect_deleted(rows)
    }

    async fn get_all(&self, query: &MovieQuery) -> Result<(Vec<Movie>, Metadata), StoreError> {
        let filters = &query.filters;
        // The sort column comes from a closed enum, never from user text.
        let sql = format!(
            r#"
            SELECT count(*) OVER() AS total, id, created_at, title, year, runtime, genres, version
            FROM movies
            WHERE (to_tsvector('simple', title) @@ plainto_tsquery('simple', $1) OR $1 = '')
            AND (genres @> $2 OR $2 = '{{}}')
            ORDER BY {} {}, id ASC
            LIMIT $3 OFFSET $4
            "#,
            filters.sort.column.as_sql(),
            filters.sort.direction_sql(),
        );

        let rows = with_deadline(self.timeout, async {
            let rows = sqlx::query_as::<_, MovieListRow>(&sql)
                .bind(&query.title)
                .bind(&query.genres)
                .bind(filters.limit())
                .bind(filters.offset())
                .fetch_all(&self.pool)
                .await?;
            Ok::<_, StoreError>(rows)
        })
        .await?;

        let total = rows.first().map(|r| r.total).unwrap_or(0);
        let movies = rows.into_iter().map(|r| Movie::from(r.movie)).collect();
        Ok((movies, Metadata::calculate(total, filters.page, filters.page_size)))
    }
}
