//! Per-license token-bucket rate limiter with warm-up (§4.2).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::config::LimiterConfig;

const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BucketKey {
    license_id: [u8; 32],
    max_sessions: u32,
}

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    last_touched: Instant,
}

impl Bucket {
    fn new(effective_interval: Duration, burst: f64, session_every_init: Duration) -> Self {
        let now = Instant::now();
        let warm_up = effective_interval.as_secs_f64() / session_every_init.as_secs_f64();
        Bucket {
            tokens: warm_up.min(burst),
            capacity: burst,
            refill_per_sec: 1.0 / effective_interval.as_secs_f64(),
            last_refill: now,
            last_touched: now,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Attempt to consume one token. Returns whether the call is allowed.
    fn allow(&mut self) -> bool {
        self.refill();
        self.last_touched = Instant::now();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// A process-local cache of per-`(licenseId, maxSessions)` token buckets.
///
/// The read path (an existing bucket's `allow`) only needs the bucket's own
/// lock; allocating a new bucket takes the cache's exclusive lock. A
/// background sweep drops buckets untouched for longer than [`CACHE_TTL`].
pub struct RateLimiter {
    buckets: RwLock<HashMap<BucketKey, Bucket>>,
    last_sweep: RwLock<Instant>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            last_sweep: RwLock::new(Instant::now()),
        }
    }

    /// Attempt to admit one new session for `license_id` under `max_sessions`,
    /// allocating a fresh bucket (at warm-up capacity) if this is the first
    /// call for this `(license_id, max_sessions)` pair or the old bucket
    /// aged out.
    pub async fn allow(&self, license_id: [u8; 32], max_sessions: u32, config: &LimiterConfig) -> bool {
        self.maybe_sweep().await;

        let key = BucketKey {
            license_id,
            max_sessions: max_sessions.max(1),
        };

        {
            let mut buckets = self.buckets.write().await;
            let bucket = buckets.entry(key).or_insert_with(|| {
                let effective_interval = config.session_every / max_sessions.max(1);
                let burst = config.burst_total.as_secs_f64() / effective_interval.as_secs_f64();
                Bucket::new(effective_interval, burst, config.session_every_init)
            });
            bucket.allow()
        }
    }

    async fn maybe_sweep(&self) {
        let should_sweep = {
            let last = self.last_sweep.read().await;
            last.elapsed() >= SWEEP_INTERVAL
        };
        if !should_sweep {
            return;
        }
        let mut last = self.last_sweep.write().await;
        if last.elapsed() < SWEEP_INTERVAL {
            return;
        }
        let mut buckets = self.buckets.write().await;
        buckets.retain(|_, bucket| bucket.last_touched.elapsed() < CACHE_TTL);
        *last = Instant::now();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
