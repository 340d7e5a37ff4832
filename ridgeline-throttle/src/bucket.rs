//! A single lock-free token bucket: `(tokens, lastRefillNs)` refilled by
//! elapsed wall-clock time, consumed by reservation (debt allowed to go
//! negative so the deficit doubles as the caller's required sleep).

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// One producer- or consumer-direction bucket. All fields are independent
/// atomics; refill and reservation each resolve with a single
/// compare-and-swap retry loop, never a lock.
pub struct TokenBucket {
    epoch: Instant,
    rate_bytes_per_sec: AtomicI64,
    burst_bytes: AtomicI64,
    tokens: AtomicI64,
    last_refill_ns: AtomicI64,
}

impl TokenBucket {
    pub fn new(rate_bytes_per_sec: i64, burst_bytes: i64) -> Self {
        Self {
            epoch: Instant::now(),
            rate_bytes_per_sec: AtomicI64::new(rate_bytes_per_sec),
            burst_bytes: AtomicI64::new(burst_bytes.max(1)),
            tokens: AtomicI64::new(burst_bytes.max(1)),
            last_refill_ns: AtomicI64::new(0),
        }
    }

    pub fn rate(&self) -> i64 {
        self.rate_bytes_per_sec.load(Ordering::Relaxed)
    }

    pub fn is_enabled(&self) -> bool {
        self.rate() > 0
    }

    pub fn set_rate(&self, rate_bytes_per_sec: i64) {
        self.rate_bytes_per_sec.store(rate_bytes_per_sec, Ordering::Relaxed);
    }

    fn now_ns(&self) -> i64 {
        self.epoch.elapsed().as_nanos() as i64
    }

    /// Refill by elapsed time since the last successful refill. Only one
    /// racing caller actually applies the refill (the `last_refill_ns` CAS
    /// winner); everyone else sees the winner's result on their next read.
    fn refill(&self) {
        let rate = self.rate();
        if rate <= 0 {
            return;
        }
        loop {
            let last = self.last_refill_ns.load(Ordering::Acquire);
            let now = self.now_ns();
            let elapsed_ns = now.saturating_sub(last);
            if elapsed_ns <= 0 {
                return;
            }
            let added = (elapsed_ns as i128 * rate as i128 / 1_000_000_000i128) as i64;
            if added == 0 {
                return;
            }
            if self
                .last_refill_ns
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let burst = self.burst_bytes.load(Ordering::Relaxed);
                let _ = self.tokens.fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| {
                    Some((t + added).min(burst))
                });
                return;
            }
            // Lost the race: another thread just refilled, retry against the new state.
        }
    }

    /// Refill, then reserve `n` tokens (allowed to go negative). Returns the
    /// post-reservation token count; a negative value is the caller's
    /// deficit, `deficit / rate` seconds of required wait.
    pub fn reserve(&self, n: i64) -> i64 {
        self.refill();
        self.tokens.fetch_sub(n, Ordering::AcqRel) - n
    }

    #[cfg(test)]
    pub fn tokens(&self) -> i64 {
        self.tokens.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn disabled_bucket_has_zero_rate() {
        let bucket = TokenBucket::new(0, 100);
        assert!(!bucket.is_enabled());
    }

    #[test]
    fn reservation_within_burst_does_not_go_negative() {
        let bucket = TokenBucket::new(1000, 100);
        assert!(bucket.reserve(50) >= 0);
    }

    #[test]
    fn reservation_past_burst_reports_deficit() {
        let bucket = TokenBucket::new(1000, 100);
        let remaining = bucket.reserve(150);
        assert!(remaining < 0);
        assert_eq!(remaining, -50);
    }

    #[test]
    fn refill_restores_tokens_over_time() {
        let bucket = TokenBucket::new(1_000_000, 1000);
        bucket.reserve(1000);
        assert_eq!(bucket.tokens(), 0);
        thread::sleep(Duration::from_millis(50));
        bucket.refill();
        assert!(bucket.tokens() > 0);
    }
}
