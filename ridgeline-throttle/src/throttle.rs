//! `Throttle`: the producer/consumer token bucket pair plus the optional
//! feedback loop that nudges rates toward a target utilization.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ridgeline_common::config::ThrottleConfig;
use ridgeline_common::metrics;
use tokio_util::sync::CancellationToken;

use crate::bucket::TokenBucket;

#[derive(Debug, thiserror::Error)]
pub enum ThrottleError {
    #[error("throttle wait cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Producer,
    Consumer,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Producer => "producer",
            Direction::Consumer => "consumer",
        }
    }
}

struct Bucket {
    inner: TokenBucket,
    allowed_in_window: AtomicU64,
}

impl Bucket {
    fn new(rate: i64, burst: i64) -> Self {
        Self {
            inner: TokenBucket::new(rate, burst),
            allowed_in_window: AtomicU64::new(0),
        }
    }
}

/// Owns the producer and consumer token buckets and (if configured) the
/// background feedback task that retunes their rates. `Allow` is the only
/// back-pressure mechanism on the request hot path; it delays, it never
/// rejects (spec §5).
pub struct Throttle {
    config: ThrottleConfig,
    producer: Bucket,
    consumer: Bucket,
}

impl Throttle {
    pub fn new(config: ThrottleConfig) -> Self {
        let producer = Bucket::new(config.producer_rate_bytes_per_sec, config.producer_burst_bytes);
        let consumer = Bucket::new(config.consumer_rate_bytes_per_sec, config.consumer_burst_bytes);
        metrics::set_throttle_rate("producer", producer.inner.rate());
        metrics::set_throttle_rate("consumer", consumer.inner.rate());
        Self { config, producer, consumer }
    }

    fn bucket(&self, direction: Direction) -> &Bucket {
        match direction {
            Direction::Producer => &self.producer,
            Direction::Consumer => &self.consumer,
        }
    }

    /// Account for `n` bytes against `direction`'s bucket, sleeping (or
    /// returning immediately if disabled) until the bucket is no longer in
    /// deficit. Cancellable via `cancel` so a closing connection doesn't
    /// leave a task parked in `tokio::time::sleep` forever.
    pub async fn allow(
        &self,
        direction: Direction,
        n: u64,
        cancel: &CancellationToken,
    ) -> Result<(), ThrottleError> {
        let bucket = self.bucket(direction);
        if !bucket.inner.is_enabled() {
            return Ok(());
        }

        let n = n as i64;
        let remaining = bucket.inner.reserve(n);
        bucket.allowed_in_window.fetch_add(n as u64, Ordering::Relaxed);

        if remaining >= 0 {
            return Ok(());
        }

        let deficit = -remaining;
        let rate = bucket.inner.rate().max(1);
        let sleep_secs = deficit as f64 / rate as f64;
        metrics::record_throttle_delay_ms(direction.as_str(), sleep_secs * 1000.0);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs_f64(sleep_secs)) => Ok(()),
            _ = cancel.cancelled() => Err(ThrottleError::Cancelled),
        }
    }

    /// Run the feedback loop until `cancel` fires. Each tick measures
    /// `utilization = allowedBytes / (rate * interval)` for each direction;
    /// at or above `targetUtilization` the rate grows by `(1 + step)`, below
    /// half the target it shrinks by the same factor, clamped to
    /// `[min, max]` (spec §4.3).
    pub async fn run_feedback_loop(&self, cancel: CancellationToken) {
        if !self.config.feedback_enabled {
            return;
        }
        let interval = Duration::from_millis(self.config.feedback_interval_ms);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => return,
            }
            self.retune(Direction::Producer, interval);
            self.retune(Direction::Consumer, interval);
        }
    }

    fn retune(&self, direction: Direction, interval: Duration) {
        let bucket = self.bucket(direction);
        let rate = bucket.inner.rate();
        if rate <= 0 {
            bucket.allowed_in_window.store(0, Ordering::Relaxed);
            return;
        }

        let allowed = bucket.allowed_in_window.swap(0, Ordering::Relaxed) as f64;
        let capacity = rate as f64 * interval.as_secs_f64();
        if capacity <= 0.0 {
            return;
        }
        let utilization = allowed / capacity;

        let factor = 1.0 + self.config.feedback_step;
        let new_rate = if utilization >= self.config.target_utilization {
            (rate as f64 * factor) as i64
        } else if utilization < self.config.target_utilization / 2.0 {
            (rate as f64 / factor) as i64
        } else {
            rate
        };
        let clamped = new_rate.clamp(self.config.min_rate_bytes_per_sec, self.config.max_rate_bytes_per_sec);
        if clamped != rate {
            bucket.inner.set_rate(clamped);
            tracing::info!(direction = direction.as_str(), old_rate = rate, new_rate = clamped, utilization, "throttle feedback retuned rate");
        }
        metrics::set_throttle_rate(direction.as_str(), bucket.inner.rate());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ThrottleConfig {
        ThrottleConfig {
            producer_rate_bytes_per_sec: 1000,
            producer_burst_bytes: 100,
            consumer_rate_bytes_per_sec: 0,
            consumer_burst_bytes: 100,
            feedback_enabled: false,
            feedback_interval_ms: 1000,
            target_utilization: 0.8,
            feedback_step: 0.1,
            min_rate_bytes_per_sec: 100,
            max_rate_bytes_per_sec: 10_000,
        }
    }

    #[tokio::test]
    async fn disabled_direction_never_waits() {
        let throttle = Throttle::new(config());
        let cancel = CancellationToken::new();
        throttle.allow(Direction::Consumer, 10_000_000, &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn within_burst_does_not_wait() {
        let throttle = Throttle::new(config());
        let cancel = CancellationToken::new();
        throttle.allow(Direction::Producer, 50, &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn over_burst_waits_then_succeeds() {
        let throttle = Throttle::new(config());
        let cancel = CancellationToken::new();
        let start = std::time::Instant::now();
        throttle.allow(Direction::Producer, 200, &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let throttle = Throttle::new(config());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = throttle.allow(Direction::Producer, 10_000, &cancel).await;
        assert!(matches!(result, Err(ThrottleError::Cancelled)));
    }

    #[tokio::test]
    async fn feedback_loop_grows_rate_under_saturation() {
        let mut cfg = config();
        cfg.feedback_enabled = true;
        cfg.feedback_interval_ms = 20;
        cfg.producer_rate_bytes_per_sec = 1000;
        cfg.producer_burst_bytes = 1_000_000;
        let throttle = Throttle::new(cfg);
        let cancel = CancellationToken::new();

        // Saturate the window, then let one tick of the feedback loop run.
        throttle.producer.allowed_in_window.store(1000, Ordering::Relaxed);
        throttle.retune(Direction::Producer, Duration::from_millis(20));
        assert!(throttle.producer.inner.rate() > 1000);

        cancel.cancel();
    }
}
