use axum::{
    extract::Request,
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;

use crate::error::ApiError;

/// A panic payload turned into something loggable.
#[derive(Debug, thiserror::Error)]
#[error("request handler panicked: {message}")]
pub struct Fault {
    pub message: String,
}

impl Fault {
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self { message }
    }
}

/// Outermost fault boundary: a panic anywhere below becomes a generic 500 and the connection is closed.
pub async fn panic_barrier(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();

    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            let fault = Fault::from_payload(payload);
            let backtrace = Backtrace::force_capture();
            tracing::error!(
                %method,
                %uri,
                error = %fault,
                backtrace = %backtrace,
                "recovered from panic"
            );
            metrics::counter!("panics_recovered_total").increment(1);

            let mut response = ApiError::server_fault().into_response();
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
            response
        }
    }
}
