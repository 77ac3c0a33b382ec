// Ordered request-stage pipeline.
// Stages run in registration order and the first rejection stops the chain.

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::auth::Principal;
use crate::config::LimiterScope;
use crate::error::ApiError;
use crate::state::AppState;

/// Per-request values threaded through every stage and then into handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub client_key: String,
    pub authorization: Option<String>,
    pub principal: Principal,
    pub vary_authorization: bool,
}

impl RequestContext {
    pub fn new(client_key: impl Into<String>, authorization: Option<String>) -> Self {
        Self {
            client_key: client_key.into(),
            authorization,
            principal: Principal::Anonymous,
            vary_authorization: false,
        }
    }
}

/// Why a stage refused the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    RateLimited,
    InvalidToken,
    Unauthenticated,
    InactiveAccount,
    Forbidden,
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::RateLimited => ApiError::too_many_requests("rate limit exceeded"),
            Rejection::InvalidToken => ApiError::invalid_token(),
            Rejection::Unauthenticated => {
                ApiError::unauthorized("you must be authenticated to access this resource")
            }
            Rejection::InactiveAccount => {
                ApiError::forbidden("your user account must be activated to access this resource")
            }
            Rejection::Forbidden => ApiError::forbidden(
                "your user account doesn't have the necessary permissions to access this resource",
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Reject(Rejection),
}

/// One check in the request path.
///
/// A denial is returned as `Ok(Verdict::Reject(..))`; `Err` is reserved for
/// infrastructure failures such as an unreachable store.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(&self, ctx: &mut RequestContext) -> Result<Verdict, ApiError>;

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        tracing::debug!(stage = stage.name(), "registered request stage");
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, ctx: &mut RequestContext) -> Result<Verdict, ApiError> {
        for stage in &self.stages {
            let verdict = run_stage(stage.as_ref(), ctx).await?;
            if let Verdict::Reject(rejection) = verdict {
                tracing::debug!(stage = stage.name(), ?rejection, "request rejected");
                return Ok(verdict);
            }
        }
        Ok(Verdict::Pass)
    }
}

/// Evaluate one stage under its deadline.
pub async fn run_stage(stage: &dyn Stage, ctx: &mut RequestContext) -> Result<Verdict, ApiError> {
    let started = Instant::now();
    match timeout(stage.timeout(), stage.evaluate(ctx)).await {
        Ok(result) => {
            tracing::trace!(stage = stage.name(), elapsed = ?started.elapsed(), "stage finished");
            result
        }
        Err(_) => {
            tracing::error!(stage = stage.name(), timeout = ?stage.timeout(), "request stage timed out");
            Err(ApiError::server_fault())
        }
    }
}

const UNKNOWN_CLIENT: &str = "unknown";

/// Client identity used as the rate-limit key.
fn client_key(req: &Request, scope: LimiterScope) -> String {
    match scope {
        LimiterScope::Global => "*".to_string(),
        LimiterScope::PerClient => match req.extensions().get::<ConnectInfo<SocketAddr>>() {
            Some(ConnectInfo(addr)) => addr.ip().to_string(),
            None => {
                // Every such request shares one bucket.
                tracing::warn!(
                    key = UNKNOWN_CLIENT,
                    "peer address unavailable; serve with into_make_service_with_connect_info"
                );
                UNKNOWN_CLIENT.to_string()
            }
        },
    }
}

/// Runs the shared pipeline and stores the resulting context for the handlers.
pub async fn request_pipeline(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
    let mut ctx = RequestContext::new(client_key(&req, state.config.limiter.scope), authorization);

    let mut response = match state.pipeline.run(&mut ctx).await {
        Ok(Verdict::Pass) => {
            let vary = ctx.vary_authorization;
            req.extensions_mut().insert(ctx);
            let mut response = next.run(req).await;
            if vary {
                add_vary_authorization(&mut response);
            }
            return response;
        }
        Ok(Verdict::Reject(rejection)) => ApiError::from(rejection).into_response(),
        Err(err) => err.into_response(),
    };

    if ctx.vary_authorization {
        add_vary_authorization(&mut response);
    }
    response
}

fn add_vary_authorization(response: &mut Response) {
    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Fixed {
        name: &'static str,
        verdict: Verdict,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Stage for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn evaluate(&self, _ctx: &mut RequestContext) -> Result<Verdict, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.verdict)
        }
    }

    struct Slow;

    #[async_trait]
    impl Stage for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn evaluate(&self, _ctx: &mut RequestContext) -> Result<Verdict, ApiError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Verdict::Pass)
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(20)
        }
    }

    fn fixed(name: &'static str, verdict: Verdict) -> (Fixed, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Fixed { name, verdict, calls: calls.clone() }, calls)
    }

    #[tokio::test]
    async fn first_rejection_short_circuits() {
        let (a, a_calls) = fixed("a", Verdict::Pass);
        let (b, b_calls) = fixed("b", Verdict::Reject(Rejection::RateLimited));
        let (c, c_calls) = fixed("c", Verdict::Pass);
        let pipeline = Pipeline::new().stage(a).stage(b).stage(c);
        assert_eq!(pipeline.stage_names(), vec!["a", "b", "c"]);

        let mut ctx = RequestContext::new("127.0.0.1", None);
        let verdict = pipeline.run(&mut ctx).await.unwrap();
        assert_eq!(verdict, Verdict::Reject(Rejection::RateLimited));
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_pipeline_passes() {
        let mut ctx = RequestContext::new("127.0.0.1", None);
        assert_eq!(Pipeline::new().run(&mut ctx).await.unwrap(), Verdict::Pass);
    }

    #[tokio::test]
    async fn stage_deadline_is_a_server_fault() {
        let pipeline = Pipeline::new().stage(Slow);
        let mut ctx = RequestContext::new("127.0.0.1", None);
        let err = pipeline.run(&mut ctx).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn missing_peer_address_is_keyed_and_reported() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut req = Request::new(axum::body::Body::empty());
        assert_eq!(client_key(&req, LimiterScope::PerClient), UNKNOWN_CLIENT);
        assert_eq!(client_key(&req, LimiterScope::Global), "*");
        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("WARN"));
        assert!(output.contains("peer address unavailable"));

        captured.0.lock().unwrap().clear();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 1, 2, 3], 5555))));
        assert_eq!(client_key(&req, LimiterScope::PerClient), "10.1.2.3");
        assert!(captured.0.lock().unwrap().is_empty());
    }

    #[test]
    fn rejections_map_to_statuses() {
        use axum::http::StatusCode;
        let cases = [
            (Rejection::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (Rejection::InvalidToken, StatusCode::UNAUTHORIZED),
            (Rejection::Unauthenticated, StatusCode::UNAUTHORIZED),
            (Rejection::InactiveAccount, StatusCode::FORBIDDEN),
            (Rejection::Forbidden, StatusCode::FORBIDDEN),
        ];
        for (rejection, status) in cases {
            assert_eq!(ApiError::from(rejection).status_code(), status);
        }
    }
}
