//! Token-bucket rate limiter shared across the client
//!
//! The request path never gates on the bucket; throttled responses schedule a
//! detached `acquire` that drains tokens so repeated throttling eventually
//! waits. The wait races with the caller's next request, so throttling is
//! best-effort for the immediately following call.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared token bucket: `burst` capacity, `rate` tokens refilled per second.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<Bucket>>,
    rate: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(rate: u32, burst: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Bucket {
                tokens: f64::from(burst),
                last_refill: Instant::now(),
            })),
            rate: f64::from(rate),
            burst: f64::from(burst),
        }
    }

    /// Wait until `n` tokens are available, then remove them.
    pub async fn acquire(&self, n: u32) {
        let need = f64::from(n.min(self.burst as u32));
        loop {
            let wait = {
                let mut bucket = self.inner.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
                bucket.last_refill = now;

                if bucket.tokens >= need {
                    bucket.tokens -= need;
                    return;
                }
                Duration::from_secs_f64((need - bucket.tokens) / self.rate)
            };
            tokio::time::sleep(wait).await;
        }
    }
}
