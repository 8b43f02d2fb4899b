// Per-identity bundle of limiters and liveness.
use beacon_limits::{BytesLimiter, FixedLimiter, Limiter, RateLimiter, Result};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

const ONE_DAY: Duration = Duration::from_secs(24 * 3600);

/// Effective limits for one visitor. Defaults mirror the server's shipped
/// configuration.
#[derive(Debug, Clone)]
pub struct VisitorLimits {
    pub request_burst: u64,
    pub request_replenish: Duration,
    pub email_burst: u64,
    pub email_replenish: Duration,
    pub subscription_limit: i64,
    /// Attachment download/upload bytes per rolling day.
    pub bandwidth_limit: u64,
    /// Lower bound on how long a visitor stays in memory.
    pub stale_min: Duration,
}

impl Default for VisitorLimits {
    fn default() -> Self {
        Self {
            request_burst: 60,
            request_replenish: Duration::from_secs(5),
            email_burst: 16,
            email_replenish: Duration::from_secs(3600),
            subscription_limit: 30,
            bandwidth_limit: 500 * 1024 * 1024,
            stale_min: ONE_DAY,
        }
    }
}

struct Limiters {
    request: RateLimiter,
    email: RateLimiter,
    subscriptions: FixedLimiter,
    bandwidth: Arc<BytesLimiter>,
}

impl Limiters {
    fn new(limits: &VisitorLimits) -> Self {
        Self {
            request: RateLimiter::new(limits.request_replenish, limits.request_burst),
            email: RateLimiter::new(limits.email_replenish, limits.email_burst),
            subscriptions: FixedLimiter::new(limits.subscription_limit),
            bandwidth: Arc::new(BytesLimiter::new(limits.bandwidth_limit, ONE_DAY)),
        }
    }
}

/// One API user, keyed by IP (or forwarded address behind a proxy).
///
/// The whole limiter set sits behind a read-write lock so it can be swapped
/// atomically when a visitor's effective limits change; readers always see
/// a consistent snapshot.
pub struct Visitor {
    ip: String,
    stale_after: Duration,
    limiters: RwLock<Limiters>,
    seen: Mutex<Instant>,
}

impl Visitor {
    pub fn new(ip: impl Into<String>, limits: &VisitorLimits) -> Self {
        // A visitor must outlive one full refill of its request bucket,
        // otherwise expiry would hand out fresh burst allowances.
        let full_refill = limits.request_replenish * limits.request_burst as u32;
        Self {
            ip: ip.into(),
            stale_after: full_refill.max(limits.stale_min),
            limiters: RwLock::new(Limiters::new(limits)),
            seen: Mutex::new(Instant::now()),
        }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn request_allowed(&self) -> Result<()> {
        self.limiters.read().expect("limiters lock").request.allow()
    }

    pub fn email_allowed(&self) -> Result<()> {
        self.limiters.read().expect("limiters lock").email.allow()
    }

    pub fn subscription_allowed(&self) -> Result<()> {
        self.limiters
            .read()
            .expect("limiters lock")
            .subscriptions
            .allow()
    }

    pub fn remove_subscription(&self) {
        let _ = self
            .limiters
            .read()
            .expect("limiters lock")
            .subscriptions
            .allow_n(-1);
    }

    /// Shared handle to the bandwidth limiter, valid across a limiter swap
    /// for the transfer that grabbed it.
    pub fn bandwidth_limiter(&self) -> Arc<BytesLimiter> {
        Arc::clone(&self.limiters.read().expect("limiters lock").bandwidth)
    }

    /// Atomically replaces every limiter, e.g. after a tier change.
    pub fn replace_limits(&self, limits: &VisitorLimits) {
        *self.limiters.write().expect("limiters lock") = Limiters::new(limits);
    }

    pub fn keepalive(&self) {
        *self.seen.lock().expect("seen lock") = Instant::now();
    }

    pub fn stale(&self) -> bool {
        self.seen.lock().expect("seen lock").elapsed() > self.stale_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_limits() -> VisitorLimits {
        VisitorLimits {
            request_burst: 2,
            request_replenish: Duration::from_millis(20),
            email_burst: 1,
            email_replenish: Duration::from_secs(3600),
            subscription_limit: 2,
            bandwidth_limit: 100,
            stale_min: Duration::from_millis(50),
        }
    }

    #[test]
    fn requests_exhaust_burst() {
        let v = Visitor::new("1.2.3.4", &small_limits());
        assert!(v.request_allowed().is_ok());
        assert!(v.request_allowed().is_ok());
        assert!(v.request_allowed().is_err());
    }

    #[test]
    fn subscriptions_count_up_and_release() {
        let v = Visitor::new("1.2.3.4", &small_limits());
        assert!(v.subscription_allowed().is_ok());
        assert!(v.subscription_allowed().is_ok());
        assert!(v.subscription_allowed().is_err());
        v.remove_subscription();
        assert!(v.subscription_allowed().is_ok());
    }

    #[test]
    fn stale_after_full_refill_or_minimum() {
        let v = Visitor::new("1.2.3.4", &small_limits());
        assert!(!v.stale());
        std::thread::sleep(Duration::from_millis(60));
        assert!(v.stale());
        v.keepalive();
        assert!(!v.stale());
    }

    #[test]
    fn replace_limits_resets_the_whole_set() {
        let v = Visitor::new("1.2.3.4", &small_limits());
        assert!(v.request_allowed().is_ok());
        assert!(v.request_allowed().is_ok());
        assert!(v.request_allowed().is_err());
        let mut generous = small_limits();
        generous.request_burst = 10;
        v.replace_limits(&generous);
        assert!(v.request_allowed().is_ok());
    }

    #[test]
    fn bandwidth_limiter_survives_swap_for_holders() {
        let v = Visitor::new("1.2.3.4", &small_limits());
        let held = v.bandwidth_limiter();
        v.replace_limits(&small_limits());
        assert!(held.allow_n(100).is_ok());
        assert!(held.allow_n(1).is_err());
        // The fresh limiter is independent of the held one.
        assert!(v.bandwidth_limiter().allow_n(100).is_ok());
    }
}
