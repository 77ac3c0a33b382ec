use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;

use crate::error::ApiError;

/// Request counters and latency histogram. Sits outside the panic barrier so recovered panics are counted as 500s.
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let started = Instant::now();
    metrics::counter!("http_requests_received_total").increment(1);

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!("http_responses_sent_total", "status" => status).increment(1);
    metrics::histogram!("http_request_duration_seconds").record(started.elapsed().as_secs_f64());
    response
}

/// Give the router's bare 405 the same JSON envelope as every other error.
pub async fn normalize_method_not_allowed(response: Response) -> Response {
    if response.status() != StatusCode::METHOD_NOT_ALLOWED {
        return response;
    }
    let (parts, _) = response.into_parts();
    let mut normalized =
        ApiError::method_not_allowed("the requested method is not supported for this resource").into_response();
    if let Some(allow) = parts.headers.get(axum::http::header::ALLOW) {
        normalized.headers_mut().insert(axum::http::header::ALLOW, allow.clone());
    }
    normalized
}
