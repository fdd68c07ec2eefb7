// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Token bucket rate limiter for read delivery.
//!
//! Tokens are bytes. They refill linearly at `rate` per second up to
//! `capacity`. A rate of zero disables limiting entirely. The bucket never
//! blocks; callers poll [`TokenBucket::consume`] and may sleep for
//! [`TokenBucket::time_until_available`] in between.

use std::time::{Duration, Instant};

/// Capacity floor: one maximum-size reassembled message must always fit.
pub const MIN_CAPACITY: u64 = 64 * 1024;

/// Token bucket rate limiter.
#[derive(Debug)]
pub struct TokenBucket {
    /// Current token count (in bytes).
    tokens: u64,

    /// Maximum token capacity (burst size in bytes).
    capacity: u64,

    /// Token refill rate (bytes per second), 0 = unlimited.
    rate: u64,

    /// Last refill timestamp.
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a bucket refilling at `rate` bytes/s with the requested burst.
    ///
    /// The capacity is raised to at least `rate` and to [`MIN_CAPACITY`].
    /// The bucket starts with one second worth of tokens.
    pub fn new(rate: u64, burst: u64) -> Self {
        let capacity = burst.max(rate).max(MIN_CAPACITY);
        Self {
            tokens: rate.min(capacity),
            capacity,
            rate,
            last_refill: Instant::now(),
        }
    }

    /// A bucket that never refuses.
    pub fn unlimited() -> Self {
        Self::new(0, 0)
    }

    pub fn is_unlimited(&self) -> bool {
        self.rate == 0
    }

    /// Take `n` tokens if that many are available right now.
    pub fn consume(&mut self, n: u64) -> bool {
        if self.is_unlimited() {
            return true;
        }
        self.refill();
        if n <= self.tokens {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Tokens available right now.
    pub fn available(&mut self) -> u64 {
        if self.is_unlimited() {
            return u64::MAX;
        }
        self.refill();
        self.tokens
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Time until `n` tokens will be available.
    ///
    /// Returns `Duration::ZERO` if already available. Requests above the
    /// capacity can never be met and report `Duration::MAX`.
    pub fn time_until_available(&mut self, n: u64) -> Duration {
        if self.is_unlimited() {
            return Duration::ZERO;
        }
        if n > self.capacity {
            return Duration::MAX;
        }
        self.refill();
        if self.tokens >= n {
            return Duration::ZERO;
        }
        let needed = n - self.tokens;
        Duration::from_secs_f64(needed as f64 / self.rate as f64)
    }

    /// Refill tokens based on elapsed time.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);

        if elapsed.is_zero() {
            return;
        }

        let add = (elapsed.as_secs_f64() * self.rate as f64) as u64;

        // Fractional tokens carry over to the next refill.
        if add > 0 {
            self.tokens = (self.tokens + add).min(self.capacity);
            self.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_rate_seventy_burst_zero() {
        let mut bucket = TokenBucket::new(70, 0);
        assert!(bucket.consume(70));
        assert!(!bucket.consume(1));

        thread::sleep(Duration::from_millis(1100));
        assert!(bucket.consume(70));
    }

    #[test]
    fn test_capacity_raised() {
        let bucket = TokenBucket::new(100_000, 10);
        assert_eq!(bucket.capacity(), 100_000);

        let bucket = TokenBucket::new(10, 10);
        assert_eq!(bucket.capacity(), MIN_CAPACITY);
    }

    #[test]
    fn test_refill_capped_at_capacity() {
        let mut bucket = TokenBucket::new(1_000_000, 0);
        thread::sleep(Duration::from_millis(50));
        assert!(bucket.available() <= bucket.capacity());
    }

    #[test]
    fn test_failed_consume_takes_nothing() {
        let mut bucket = TokenBucket::new(100, 0);
        assert!(!bucket.consume(101));
        assert!(bucket.consume(100));
    }

    #[test]
    fn test_unlimited() {
        let mut bucket = TokenBucket::unlimited();
        assert!(bucket.consume(u64::MAX / 2));
        assert!(bucket.consume(u64::MAX / 2));
        assert_eq!(bucket.time_until_available(1 << 40), Duration::ZERO);
    }

    #[test]
    fn test_time_until_available() {
        let mut bucket = TokenBucket::new(1000, 0);
        assert!(bucket.consume(1000));
        let wait = bucket.time_until_available(500);
        assert!(wait > Duration::from_millis(400) && wait <= Duration::from_millis(500));
        assert_eq!(bucket.time_until_available(MIN_CAPACITY + 1), Duration::MAX);
    }
}
