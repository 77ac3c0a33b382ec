use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::SecurityConfig;
use crate::handlers::{health, movies, tokens, users};
use crate::middleware::{metrics::normalize_method_not_allowed, metrics::track_metrics, panic::panic_barrier};
use crate::middleware::request_pipeline;
use crate::state::AppState;

/// Build the full application.
///
/// Layers listed last run first, so a request meets them in this order:
/// metrics, panic barrier, trace, CORS, request pipeline (rate limit, authenticate), router.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.security);

    Router::new()
        .route("/v1/healthcheck", get(health::healthcheck))
        .route("/v1/movies", get(movies::list_movies).post(movies::create_movie))
        .route(
            "/v1/movies/:id",
            get(movies::show_movie)
                .patch(movies::update_movie)
                .delete(movies::delete_movie),
        )
        .route("/v1/users", post(users::register_user))
        .route("/v1/users/activated", put(users::activate_user))
        .route(
            "/v1/tokens/authentication",
            post(tokens::create_authentication_token).delete(tokens::delete_authentication_tokens),
        )
        .route("/debug/metrics", get(health::metrics))
        .fallback(health::not_found)
        .layer(middleware::map_response(normalize_method_not_allowed))
        .layer(middleware::from_fn_with_state(state.clone(), request_pipeline))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(panic_barrier))
        .layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

fn cors_layer(config: &SecurityConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if config.cors_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
