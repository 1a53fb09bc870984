//! Per-key token-bucket rate limiting for webhook ingress.
//!
//! Each key (pipeline id) gets its own bucket that refills continuously
//! at `capacity / window`. Time is passed in by the caller, so tests
//! drive the clock instead of sleeping.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    capacity: u32,
    window: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucket {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token for `key` at time `now`. Returns false when the
    /// bucket is exhausted.
    pub fn try_acquire(&self, key: &str, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity as f64,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let refill = elapsed.as_secs_f64() / self.window.as_secs_f64() * self.capacity as f64;
        bucket.tokens = (bucket.tokens + refill).min(self.capacity as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_capacity_then_rejects() {
        let bucket = TokenBucket::new(3, Duration::from_secs(60));
        let now = Instant::now();

        assert!(bucket.try_acquire("p1", now));
        assert!(bucket.try_acquire("p1", now));
        assert!(bucket.try_acquire("p1", now));
        assert!(!bucket.try_acquire("p1", now));
    }

    #[test]
    fn keys_are_independent() {
        let bucket = TokenBucket::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(bucket.try_acquire("p1", now));
        assert!(!bucket.try_acquire("p1", now));
        assert!(bucket.try_acquire("p2", now));
    }

    #[test]
    fn refills_over_time() {
        let bucket = TokenBucket::new(60, Duration::from_secs(60));
        let start = Instant::now();

        for _ in 0..60 {
            assert!(bucket.try_acquire("p1", start));
        }
        assert!(!bucket.try_acquire("p1", start));

        // One token per second at this capacity/window
        assert!(bucket.try_acquire("p1", start + Duration::from_secs(1)));
        assert!(!bucket.try_acquire("p1", start + Duration::from_secs(1)));

        // A long idle period refills to capacity, not beyond
        let later = start + Duration::from_secs(600);
        for _ in 0..60 {
            assert!(bucket.try_acquire("p1", later));
        }
        assert!(!bucket.try_acquire("p1", later));
    }
}
