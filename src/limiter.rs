//! Token-bucket admission control.
//!
//! A continuous bucket: capacity accrues at `refill_rate` tokens per second,
//! fractional amounts included, clamped to `capacity`. Each admitted request
//! consumes one whole token. Refill is lazy, computed from elapsed wall time
//! on every check, so burst behavior is independent of check frequency.

use std::sync::Mutex;
use std::time::Instant;

/// Per-process request rate limiter.
///
/// The bucket is the only cross-request shared mutable state in the process.
/// Check-and-decrement runs as one critical section under the mutex; the
/// section is O(1) and never touches I/O, so contention stays negligible.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter admitting `requests_per_second` sustained, with an
    /// equal burst capacity. The bucket starts full.
    pub fn new(requests_per_second: f64) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: requests_per_second,
                capacity: requests_per_second,
                refill_rate: requests_per_second,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to admit one request. Returns false without blocking when the
    /// bucket is empty.
    pub fn try_consume(&self) -> bool {
        self.try_consume_at(Instant::now())
    }

    fn try_consume_at(&self, now: Instant) -> bool {
        let mut bucket = self.bucket.lock().expect("rate limiter mutex poisoned");

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * bucket.refill_rate).min(bucket.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
