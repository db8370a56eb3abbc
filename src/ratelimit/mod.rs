//! Per-IP token-bucket rate limiting
//!
//! Buckets are keyed by the normalised address (`/64` for IPv6) and refill
//! continuously at `limit / period`. CIDR deny entries short-circuit to a
//! refusal; allow entries pass unmetered. A janitor task drops idle buckets
//! and bounds the table size.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::cidr::{normalize_ipv6_to_64, CidrList};

/// Sweep cadence for the janitor task.
const JANITOR_INTERVAL: Duration = Duration::from_secs(20 * 60);
/// Buckets untouched for this long are dropped.
const IDLE_EXPIRY: Duration = Duration::from_secs(2 * 60 * 60);
/// Hard bound on the bucket table; beyond this the table is cleared whole.
const MAX_BUCKETS: usize = 10_000;

/// Admission outcome for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Address is on the deny list.
    Denied,
    /// Bucket exhausted.
    Limited,
}

#[derive(Debug)]
struct IpBucket {
    tokens: f64,
    last_refill: Instant,
    last_access: Instant,
}

/// Token-bucket rate limiter over normalised client addresses.
#[derive(Debug)]
pub struct RateLimiter {
    limit: f64,
    period: Duration,
    allow: CidrList,
    deny: CidrList,
    buckets: DashMap<String, IpBucket>,
}

impl RateLimiter {
    pub fn new(request_limit: u32, period: Duration, allow: CidrList, deny: CidrList) -> Self {
        Self {
            limit: f64::from(request_limit.max(1)),
            period,
            allow,
            deny,
            buckets: DashMap::new(),
        }
    }

    /// Admit or refuse one request from `ip`.
    pub fn check(&self, ip: IpAddr) -> Decision {
        if self.deny.contains(ip) {
            return Decision::Denied;
        }
        if self.allow.contains(ip) {
            return Decision::Allowed;
        }

        let key = normalize_ipv6_to_64(ip);
        let now = Instant::now();
        let mut bucket = self.buckets.entry(key).or_insert_with(|| IpBucket {
            tokens: self.limit,
            last_refill: now,
            last_access: now,
        });

        let elapsed = now.duration_since(bucket.last_refill);
        let refill = elapsed.as_secs_f64() * self.limit / self.period.as_secs_f64();
        bucket.tokens = (bucket.tokens + refill).min(self.limit);
        bucket.last_refill = now;
        bucket.last_access = now;

        if bucket.tokens < 1.0 {
            return Decision::Limited;
        }
        bucket.tokens -= 1.0;
        Decision::Allowed
    }

    /// Drop idle buckets; clear the table whole if it is still oversized.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.buckets
            .retain(|_, b| now.duration_since(b.last_access) <= IDLE_EXPIRY);

        if self.buckets.len() > MAX_BUCKETS {
            warn!(
                buckets = self.buckets.len(),
                "bucket table over limit, clearing"
            );
            self.buckets.clear();
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Run the periodic sweep until the process exits.
    pub fn spawn_janitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(JANITOR_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            tick.tick().await;
            loop {
                tick.tick().await;
                let before = limiter.bucket_count();
                limiter.sweep();
                debug!(before, after = limiter.bucket_count(), "rate-limit sweep");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, period: Duration) -> RateLimiter {
        RateLimiter::new(limit, period, CidrList::default(), CidrList::default())
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    // Test 1: Requests within the limit are admitted
    #[test]
    fn test_admits_within_limit() {
        let l = limiter(2, Duration::from_secs(3600));
        assert_eq!(l.check(ip("203.0.113.5")), Decision::Allowed);
        assert_eq!(l.check(ip("203.0.113.5")), Decision::Allowed);
    }

    // Test 2: The request after exhaustion is limited
    #[test]
    fn test_limits_after_exhaustion() {
        let l = limiter(2, Duration::from_secs(3600));
        l.check(ip("203.0.113.5"));
        l.check(ip("203.0.113.5"));
        assert_eq!(l.check(ip("203.0.113.5")), Decision::Limited);
    }

    // Test 3: Continuous refill readmits after enough elapsed time
    #[test]
    fn test_refill() {
        let l = limiter(2, Duration::from_millis(100));
        l.check(ip("203.0.113.5"));
        l.check(ip("203.0.113.5"));
        assert_eq!(l.check(ip("203.0.113.5")), Decision::Limited);

        // Half the period refills one token.
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(l.check(ip("203.0.113.5")), Decision::Allowed);
    }

    // Test 4: Tokens never exceed the limit after long idleness
    #[test]
    fn test_refill_capped_at_limit() {
        let l = limiter(2, Duration::from_millis(10));
        l.check(ip("203.0.113.5"));
        std::thread::sleep(Duration::from_millis(50));

        // Refill is capped at limit, so exactly two more are admitted.
        assert_eq!(l.check(ip("203.0.113.5")), Decision::Allowed);
        assert_eq!(l.check(ip("203.0.113.5")), Decision::Allowed);
        assert_eq!(l.check(ip("203.0.113.5")), Decision::Limited);
    }

    // Test 5: Deny list refuses before any accounting
    #[test]
    fn test_deny_list() {
        let l = RateLimiter::new(
            100,
            Duration::from_secs(3600),
            CidrList::default(),
            CidrList::from_strings(["203.0.113.0/24"]),
        );
        assert_eq!(l.check(ip("203.0.113.5")), Decision::Denied);
        assert_eq!(l.bucket_count(), 0);
    }

    // Test 6: Allow list passes unmetered
    #[test]
    fn test_allow_list_unmetered() {
        let l = RateLimiter::new(
            1,
            Duration::from_secs(3600),
            CidrList::from_strings(["10.0.0.0/8"]),
            CidrList::default(),
        );
        for _ in 0..10 {
            assert_eq!(l.check(ip("10.1.2.3")), Decision::Allowed);
        }
        assert_eq!(l.bucket_count(), 0);
    }

    // Test 7: Deny wins over allow
    #[test]
    fn test_deny_wins_over_allow() {
        let l = RateLimiter::new(
            100,
            Duration::from_secs(3600),
            CidrList::from_strings(["10.0.0.0/8"]),
            CidrList::from_strings(["10.1.0.0/16"]),
        );
        assert_eq!(l.check(ip("10.1.2.3")), Decision::Denied);
        assert_eq!(l.check(ip("10.2.2.3")), Decision::Allowed);
    }

    // Test 8: IPv6 addresses in one /64 share a bucket
    #[test]
    fn test_ipv6_shares_slash64_bucket() {
        let l = limiter(2, Duration::from_secs(3600));
        assert_eq!(l.check(ip("2001:db8::1")), Decision::Allowed);
        assert_eq!(l.check(ip("2001:db8::ffff")), Decision::Allowed);
        assert_eq!(l.check(ip("2001:db8::2")), Decision::Limited);

        // A different /64 has its own bucket.
        assert_eq!(l.check(ip("2001:db8:1::1")), Decision::Allowed);
        assert_eq!(l.bucket_count(), 2);
    }

    // Test 9: Distinct IPv4 addresses get distinct buckets
    #[test]
    fn test_ipv4_distinct_buckets() {
        let l = limiter(1, Duration::from_secs(3600));
        assert_eq!(l.check(ip("203.0.113.5")), Decision::Allowed);
        assert_eq!(l.check(ip("203.0.113.6")), Decision::Allowed);
        assert_eq!(l.check(ip("203.0.113.5")), Decision::Limited);
    }

    // Test 10: Sweep keeps recently active buckets
    #[test]
    fn test_sweep_keeps_active() {
        let l = limiter(10, Duration::from_secs(3600));
        l.check(ip("203.0.113.5"));
        l.sweep();
        assert_eq!(l.bucket_count(), 1);
    }

    // Test 11: Bucket tokens stay within [0, limit]
    #[test]
    fn test_token_bounds() {
        let l = limiter(3, Duration::from_millis(50));
        for _ in 0..20 {
            l.check(ip("203.0.113.5"));
            let b = l.buckets.get("203.0.113.5").unwrap();
            assert!(b.tokens >= 0.0);
            assert!(b.tokens <= 3.0);
        }
    }
}
