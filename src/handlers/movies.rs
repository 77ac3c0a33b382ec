use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::database::filters::{Filters, MovieQuery, Sort};
use crate::database::models::{Movie, Runtime};
use crate::error::ApiError;
use crate::middleware::authorize::{Authorized, MoviesRead, MoviesWrite};
use crate::middleware::response::{ApiResponse, ApiResult, ValidJson};
use crate::state::AppState;
use crate::validator::Validator;

const EXPECTED_VERSION_HEADER: &str = "x-expected-version";

/// Ids are positive integers; anything else cannot name a movie.
pub fn parse_id(raw: &str) -> Result<i64, ApiError> {
    match raw.parse::<i64>() {
        Ok(id) if id >= 1 => Ok(id),
        _ => Err(ApiError::resource_not_found()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListMoviesParams {
    pub title: Option<String>,
    pub genres: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub sort: Option<String>,
}

fn read_int(v: &mut Validator, key: &str, raw: Option<&str>, default: i64) -> i64 {
    match raw {
        None | Some("") => default,
        Some(s) => s.parse().unwrap_or_else(|_| {
            v.add_error(key, "must be an integer value");
            default
        }),
    }
}

impl ListMoviesParams {
    pub fn into_query(self) -> Result<MovieQuery, Validator> {
        let mut v = Validator::new();
        let page = read_int(&mut v, "page", self.page.as_deref(), 1);
        let page_size = read_int(&mut v, "page_size", self.page_size.as_deref(), 20);
        let sort = match self.sort.as_deref() {
            None | Some("") => Sort::default(),
            Some(raw) => raw.parse::<Sort>().unwrap_or_else(|_| {
                v.add_error("sort", "invalid sort value");
                Sort::default()
            }),
        };

        let filters = Filters { page, page_size, sort };
        filters.validate(&mut v);
        if !v.valid() {
            return Err(v);
        }

        let genres = self
            .genres
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect();

        Ok(MovieQuery {
            title: self.title.unwrap_or_default(),
            genres,
            filters,
        })
    }
}

pub async fn list_movies(
    _auth: Authorized<MoviesRead>,
    State(state): State<AppState>,
    Query(params): Query<ListMoviesParams>,
) -> ApiResult<Value> {
    let query = params.into_query()?;
    let (movies, metadata) = state.stores.movies.get_all(&query).await?;
    Ok(ApiResponse::success(json!({ "movies": movies, "metadata": metadata })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateMovieInput {
    pub title: String,
    pub year: i32,
    pub runtime: Runtime,
    pub genres: Vec<String>,
}

pub async fn create_movie(
    auth: Authorized<MoviesWrite>,
    State(state): State<AppState>,
    ValidJson(input): ValidJson<CreateMovieInput>,
) -> ApiResult<Value> {
    let mut movie = Movie::new(input.title, input.year, input.runtime, input.genres);

    let mut v = Validator::new();
    movie.validate(&mut v);
    if !v.valid() {
        return Err(v.into());
    }

    state.stores.movies.insert(&mut movie).await?;
    tracing::info!(movie_id = movie.id, user_id = auth.user.id, "movie created");

    let location = format!("/v1/movies/{}", movie.id);
    Ok(ApiResponse::created(json!({ "movie": movie }), location))
}

pub async fn show_movie(
    _auth: Authorized<MoviesRead>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let id = parse_id(&id)?;
    let movie = state.stores.movies.get(id).await?;
    Ok(ApiResponse::success(json!({ "movie": movie })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateMovieInput {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub runtime: Option<Runtime>,
    pub genres: Option<Vec<String>>,
    /// Version the client last saw. Defaults to the version just read.
    pub version: Option<i32>,
}

fn expected_version_header(headers: &HeaderMap) -> Result<Option<i32>, ApiError> {
    match headers.get(EXPECTED_VERSION_HEADER) {
        None => Ok(None),
        Some(raw) => raw
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<i32>().ok())
            .map(Some)
            .ok_or_else(|| ApiError::bad_request("X-Expected-Version must be an integer")),
    }
}

pub async fn update_movie(
    _auth: Authorized<MoviesWrite>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    ValidJson(input): ValidJson<UpdateMovieInput>,
) -> ApiResult<Value> {
    let id = parse_id(&id)?;
    let header_version = expected_version_header(&headers)?;
    let mut movie = state.stores.movies.get(id).await?;

    if let Some(expected) = input.version.or(header_version) {
        // The conditional write rejects this if the row has moved on.
        movie.version = expected;
    }
    if let Some(title) = input.title {
        movie.title = title;
    }
    if let Some(year) = input.year {
        movie.year = year;
    }
    if let Some(runtime) = input.runtime {
        movie.runtime = runtime;
    }
    if let Some(genres) = input.genres {
        movie.genres = genres;
    }

    let mut v = Validator::new();
    movie.validate(&mut v);
    if !v.valid() {
        return Err(v.into());
    }

    state.stores.movies.update(&mut movie).await?;
    Ok(ApiResponse::success(json!({ "movie": movie })))
}

pub async fn delete_movie(
    _auth: Authorized<MoviesWrite>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let id = parse_id(&id)?;
    state.stores.movies.delete(id).await?;
    Ok(ApiResponse::success(json!({ "message": "movie successfully deleted" })))
}
