//! Token-bucket admission control keyed by client.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::pipeline::{Rejection, RequestContext, Stage, Verdict};
use crate::config::LimiterConfig;
use crate::error::ApiError;

/// One client's bucket.
struct ClientBucket {
    tokens: f64,
    last_refill: Instant,
}

impl ClientBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        // Callers read the clock before taking the lock; the bucket clock never moves back.
        let now = self.last_refill.max(now);
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        // Continuous refill, capped at capacity
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct RateLimiter {
    rps: f64,
    burst: f64,
    enabled: bool,
    idle_ttl: Duration,
    buckets: Mutex<HashMap<String, ClientBucket>>,
}

impl RateLimiter {
    pub fn new(config: &LimiterConfig) -> Self {
        Self {
            rps: config.rps,
            burst: f64::from(config.burst),
            enabled: config.enabled,
            idle_ttl: config.idle_ttl(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ClientBucket>> {
        self.buckets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn allow(&self, client_key: &str) -> bool {
        self.allow_at(client_key, Instant::now())
    }

    pub fn allow_at(&self, client_key: &str, now: Instant) -> bool {
        if !self.enabled {
            return true;
        }
        let mut buckets = self.lock();
        let bucket = buckets
            .entry(client_key.to_string())
            .or_insert_with(|| ClientBucket::full(self.burst, now));
        bucket.try_acquire(self.burst, self.rps, now)
    }

    /// Drop buckets untouched for longer than the idle window. Returns how many were removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, b| now.saturating_duration_since(b.last_refill) <= self.idle_ttl);
        before - buckets.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }

    /// Start the periodic idle sweep. The lock is only taken for each sweep, never across the wait.
    pub fn start_sweep(self: &Arc<Self>, every: Duration) -> SweepHandle {
        let limiter = Arc::clone(self);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let removed = limiter.sweep_at(Instant::now());
                        if removed > 0 {
                            tracing::debug!(removed, remaining = limiter.tracked_clients(), "swept idle rate-limit buckets");
                        }
                    }
                }
            }
        });

        SweepHandle { stop: Some(stop_tx), task }
    }
}

/// Owner of a running sweep task.
pub struct SweepHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(err) = (&mut self.task).await {
            tracing::warn!(error = %err, "rate-limit sweep task ended abnormally");
        }
    }
}

pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn evaluate(&self, ctx: &mut RequestContext) -> Result<Verdict, ApiError> {
        if self.limiter.allow(&ctx.client_key) {
            return Ok(Verdict::Pass);
        }
        tracing::warn!(client = %ctx.client_key, "rate limit exceeded");
        metrics::counter!("rate_limited_total").increment(1);
        Ok(Verdict::Reject(Rejection::RateLimited))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn limiter(rps: f64, burst: u32) -> RateLimiter {
        let mut config = AppConfig::development().limiter;
        config.rps = rps;
        config.burst = burst;
        RateLimiter::new(&config)
    }

    #[test]
    fn burst_then_reject_at_same_instant() {
        let limiter = limiter(2.0, 4);
        let now = Instant::now();
        let admitted = (0..5).filter(|_| limiter.allow_at("10.0.0.1", now)).count();
        assert_eq!(admitted, 4);
    }

    #[test]
    fn stale_instants_do_not_rewind_the_bucket() {
        let limiter = limiter(2.0, 4);
        let t0 = Instant::now();
        for _ in 0..4 {
            assert!(limiter.allow_at("c", t0));
        }

        let t9 = t0 + Duration::from_secs(9);
        let t10 = t0 + Duration::from_secs(10);
        let mut admitted = 0;
        if limiter.allow_at("c", t10) {
            admitted += 1;
        }
        // A caller that read the clock earlier but won the lock later.
        if limiter.allow_at("c", t9) {
            admitted += 1;
        }
        admitted += (0..10).filter(|_| limiter.allow_at("c", t10)).count();
        assert_eq!(admitted, 4);
    }

    #[test]
    fn refill_is_continuous() {
        let limiter = limiter(2.0, 4);
        let start = Instant::now();
        for _ in 0..4 {
            assert!(limiter.allow_at("c", start));
        }
        assert!(!limiter.allow_at("c", start + Duration::from_millis(250)));
        // 0.5 tokens carried from the rejected call plus 0.5 more
        assert!(limiter.allow_at("c", start + Duration::from_millis(500)));
        assert!(!limiter.allow_at("c", start + Duration::from_millis(500)));
    }

    #[test]
    fn sustained_rate_converges_to_rps() {
        let limiter = limiter(2.0, 4);
        let start = Instant::now();
        let mut admitted = 0;
        // One attempt every 100ms for 10s
        for step in 0..100 {
            if limiter.allow_at("c", start + Duration::from_millis(step * 100)) {
                admitted += 1;
            }
        }
        // initial burst of 4 plus about 2 per second
        assert!((22..=24).contains(&admitted), "admitted {admitted}");
    }

    #[test]
    fn clients_have_independent_buckets() {
        let limiter = limiter(1.0, 1);
        let now = Instant::now();
        assert!(limiter.allow_at("a", now));
        assert!(!limiter.allow_at("a", now));
        assert!(limiter.allow_at("b", now));
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let mut config = AppConfig::development().limiter;
        config.enabled = false;
        config.burst = 1;
        let limiter = RateLimiter::new(&config);
        let now = Instant::now();
        assert!((0..100).all(|_| limiter.allow_at("c", now)));
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn sweep_drops_only_idle_buckets() {
        let limiter = limiter(2.0, 4);
        let start = Instant::now();
        limiter.allow_at("idle", start);
        limiter.allow_at("busy", start + Duration::from_secs(170));
        assert_eq!(limiter.sweep_at(start + Duration::from_secs(181)), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[tokio::test]
    async fn sweep_task_stops_cleanly() {
        let limiter = Arc::new(limiter(2.0, 4));
        let handle = limiter.start_sweep(Duration::from_millis(10));
        limiter.allow("c");
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.stop().await;
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[tokio::test]
    async fn stage_rejects_when_bucket_is_empty() {
        let stage = RateLimitStage::new(Arc::new(limiter(1.0, 1)));
        let mut ctx = RequestContext::new("10.0.0.9", None);
        assert_eq!(stage.evaluate(&mut ctx).await.unwrap(), Verdict::Pass);
        assert_eq!(
            stage.evaluate(&mut ctx).await.unwrap(),
            Verdict::Reject(Rejection::RateLimited)
        );
    }
}
