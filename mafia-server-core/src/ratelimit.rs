//! Per-player intent rate limiting (spec §5 "Resource policy": 20/sec burst,
//! 5/sec sustained; excess dropped with `RATE_LIMITED`).

use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use mafia_protocol::PlayerId;

use crate::clock::Clock;
use crate::consts::INTENT_RATE_LIMIT_BURST_PER_SEC;
use crate::consts::INTENT_RATE_LIMIT_SUSTAINED_PER_SEC;
use crate::error::MafiaGameError;

/// Token bucket: capacity is the burst allowance, refilled at the sustained
/// rate. Lazily created per player on first intent.
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(now: Instant) -> Self {
        Self { tokens: INTENT_RATE_LIMIT_BURST_PER_SEC as f64, last_refill: now }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * INTENT_RATE_LIMIT_SUSTAINED_PER_SEC as f64)
            .min(INTENT_RATE_LIMIT_BURST_PER_SEC as f64);
        self.last_refill = now;
    }
}

#[derive(Default)]
pub struct RateLimiter {
    buckets: HashMap<PlayerId, Bucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one token for `id`, returning `Err(RateLimited)` if none are
    /// available. Excess intents are dropped by the caller, not queued
    /// (spec §5: "excess is dropped with a `RATE_LIMITED` response").
    pub fn check(&mut self, id: &PlayerId, clock: &dyn Clock) -> Result<(), MafiaGameError> {
        let now = clock.now();
        let bucket = self
            .buckets
            .entry(id.clone())
            .or_insert_with(|| Bucket::new(now));

        bucket.refill(now);

        if bucket.tokens < 1.0 {
            return Err(MafiaGameError::RateLimited);
        }

        bucket.tokens -= 1.0;
        Ok(())
    }

    pub fn remove(&mut self, id: &PlayerId) {
        self.buckets.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;

    #[test]
    fn burst_then_throttled() {
        let clock = TestClock::new();
        let mut limiter = RateLimiter::new();
        let id = PlayerId::new("p1");

        for _ in 0..INTENT_RATE_LIMIT_BURST_PER_SEC {
            limiter.check(&id, &clock).unwrap();
        }
        assert!(matches!(limiter.check(&id, &clock), Err(MafiaGameError::RateLimited)));
    }

    #[test]
    fn refills_at_sustained_rate() {
        let clock = TestClock::new();
        let mut limiter = RateLimiter::new();
        let id = PlayerId::new("p1");

        for _ in 0..INTENT_RATE_LIMIT_BURST_PER_SEC {
            limiter.check(&id, &clock).unwrap();
        }
        clock.advance(Duration::from_secs(1));
        for _ in 0..INTENT_RATE_LIMIT_SUSTAINED_PER_SEC {
            limiter.check(&id, &clock).unwrap();
        }
        assert!(matches!(limiter.check(&id, &clock), Err(MafiaGameError::RateLimited)));
    }
}
