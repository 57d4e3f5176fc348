//! Rate Limiter (Token Bucket Algorithm)
//!
//! Bounds how fast callers can start work on the daemon (backups,
//! restores, deletions). Tokens are tracked in thousandths so slow refill
//! rates still accrue between closely spaced requests.

use std::sync::Mutex;
use std::time::Instant;

const MILLI: u64 = 1000;

pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    /// Burst size, in milli-tokens
    capacity: u64,
    /// Milli-tokens added per second
    refill_per_sec: u64,
}

struct Bucket {
    tokens: u64,
    last_refill: Instant,
}

impl RateLimiter {
    /// # Arguments
    /// * `burst` - Maximum requests accepted back to back
    /// * `per_second` - Sustained requests per second
    pub fn new(burst: u32, per_second: u32) -> Self {
        let capacity = u64::from(burst) * MILLI;
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: u64::from(per_second) * MILLI,
        }
    }

    /// Consume one request's worth of tokens; false when throttled
    pub fn try_acquire(&self) -> bool {
        let mut bucket = match self.bucket.lock() {
            Ok(bucket) => bucket,
            Err(poisoned) => poisoned.into_inner(),
        };

        let now = Instant::now();
        let elapsed_ms = now.duration_since(bucket.last_refill).as_millis() as u64;
        let earned = elapsed_ms * self.refill_per_sec / 1000;
        if earned > 0 {
            bucket.tokens = (bucket.tokens + earned).min(self.capacity);
            bucket.last_refill = now;
        }

        if bucket.tokens >= MILLI {
            bucket.tokens -= MILLI;
            true
        } else {
            false
        }
    }

    /// Whole requests currently available
    pub fn remaining(&self) -> u64 {
        match self.bucket.lock() {
            Ok(bucket) => bucket.tokens / MILLI,
            Err(poisoned) => poisoned.into_inner().tokens / MILLI,
        }
    }
}
