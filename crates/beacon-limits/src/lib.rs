// Non-blocking limiters: token bucket, fixed counter, and a byte-sized
// rolling-window variant built on the bucket.
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub type Result<T> = std::result::Result<T, LimitReached>;

/// Returned by every limiter when a request would exceed the limit. The
/// request is not partially admitted; callers decide whether to retry.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("limit reached")]
pub struct LimitReached;

/// Common surface for all limiter flavors.
///
/// `allow_n` admits or rejects without blocking. Negative `n` gives tokens
/// back (used for connection counting). `value` is a diagnostics snapshot.
pub trait Limiter: Send + Sync {
    fn allow_n(&self, n: i64) -> Result<()>;

    fn allow(&self) -> Result<()> {
        self.allow_n(1)
    }

    fn value(&self) -> i64;
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Continuous-time token bucket.
///
/// ```
/// use beacon_limits::{Limiter, RateLimiter};
/// use std::time::Duration;
///
/// let limiter = RateLimiter::new(Duration::from_secs(5), 2);
/// assert!(limiter.allow().is_ok());
/// assert!(limiter.allow().is_ok());
/// assert!(limiter.allow().is_err());
/// ```
pub struct RateLimiter {
    // Tokens added per second.
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// One token every `replenish`, up to `burst` tokens banked.
    pub fn new(replenish: Duration, burst: u64) -> Self {
        let secs = replenish.as_secs_f64();
        let rate = if secs > 0.0 { 1.0 / secs } else { f64::MAX };
        Self::with_rate(rate, burst)
    }

    /// `rate` tokens per second, up to `burst` banked. The bucket starts full.
    pub fn with_rate(rate: f64, burst: u64) -> Self {
        Self {
            rate,
            burst: burst as f64,
            bucket: Mutex::new(Bucket {
                tokens: burst as f64,
                last: Instant::now(),
            }),
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last = now;
    }
}

impl Limiter for RateLimiter {
    fn allow_n(&self, n: i64) -> Result<()> {
        let mut bucket = self.bucket.lock().expect("bucket lock");
        self.refill(&mut bucket);
        let n = n as f64;
        if bucket.tokens < n {
            return Err(LimitReached);
        }
        bucket.tokens -= n;
        Ok(())
    }

    fn value(&self) -> i64 {
        let mut bucket = self.bucket.lock().expect("bucket lock");
        self.refill(&mut bucket);
        bucket.tokens as i64
    }
}

/// Counter with a hard ceiling; `allow_n(-1)` releases. Used to track
/// active subscriptions per visitor.
pub struct FixedLimiter {
    limit: i64,
    value: Mutex<i64>,
}

impl FixedLimiter {
    pub fn new(limit: i64) -> Self {
        Self::with_value(limit, 0)
    }

    pub fn with_value(limit: i64, value: i64) -> Self {
        Self {
            limit,
            value: Mutex::new(value),
        }
    }
}

impl Limiter for FixedLimiter {
    fn allow_n(&self, n: i64) -> Result<()> {
        let mut value = self.value.lock().expect("value lock");
        if *value + n > self.limit {
            return Err(LimitReached);
        }
        *value = (*value + n).max(0);
        Ok(())
    }

    fn value(&self) -> i64 {
        *self.value.lock().expect("value lock")
    }
}

/// Byte-aware rolling-window limiter: a bucket holding `limit` bytes that
/// refills over `window`, consumed in chunk-sized gulps.
pub struct BytesLimiter {
    inner: RateLimiter,
}

impl BytesLimiter {
    pub fn new(limit: u64, window: Duration) -> Self {
        let secs = window.as_secs_f64();
        let rate = if secs > 0.0 {
            limit as f64 / secs
        } else {
            f64::MAX
        };
        Self {
            inner: RateLimiter::with_rate(rate, limit),
        }
    }
}

impl Limiter for BytesLimiter {
    fn allow_n(&self, n: i64) -> Result<()> {
        self.inner.allow_n(n)
    }

    fn value(&self) -> i64 {
        self.inner.value()
    }
}
