use futures::FutureExt;
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

use crate::auth::{PermissionAuthorizer, TokenAuthenticator};
use crate::config::AppConfig;
use crate::database::Stores;
use crate::mailer::Mailer;
use crate::middleware::authenticate::AuthenticateStage;
use crate::middleware::pipeline::Pipeline;
use crate::middleware::rate_limit::{RateLimitStage, RateLimiter};

/// Everything a request may reach, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub stores: Stores,
    pub limiter: Arc<RateLimiter>,
    pub authorizer: Arc<PermissionAuthorizer>,
    pub pipeline: Arc<Pipeline>,
    pub mailer: Arc<dyn Mailer>,
    pub background: TaskTracker,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: AppConfig, stores: Stores, mailer: Arc<dyn Mailer>, metrics: Option<PrometheusHandle>) -> Self {
        let limiter = Arc::new(RateLimiter::new(&config.limiter));
        let authenticator = Arc::new(TokenAuthenticator::new(Arc::clone(&stores.users)));
        let authorizer = Arc::new(PermissionAuthorizer::new(Arc::clone(&stores.permissions)));

        // Rate limiting runs first so throttled clients cost no token lookup.
        let pipeline = Pipeline::new()
            .stage(RateLimitStage::new(Arc::clone(&limiter)))
            .stage(AuthenticateStage::new(authenticator));

        Self {
            config: Arc::new(config),
            stores,
            limiter,
            authorizer,
            pipeline: Arc::new(pipeline),
            mailer,
            background: TaskTracker::new(),
            metrics,
        }
    }

    /// Run work after the response is sent. Shutdown waits for tracked tasks; a panic is logged, not propagated.
    pub fn spawn_background<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.background.spawn(async move {
            if let Err(payload) = AssertUnwindSafe(task).catch_unwind().await {
                let fault = crate::middleware::panic::Fault::from_payload(payload);
                tracing::error!(task = name, error = %fault, "background task panicked");
                metrics::counter!("panics_recovered_total").increment(1);
            }
        });
    }
}
