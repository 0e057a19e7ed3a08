//! Rate limiting for upstream API calls
//!
//! RTM enforces roughly 1 request/second sustained with a burst of 3.
//! Every upstream call — authentication or data — crosses this limiter,
//! which is the single serialization point for the quota.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Token bucket state
#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    backoff_until: Option<Instant>,
    consecutive_503: u32,
}

impl BucketState {
    fn refill(&mut self, capacity: f64, refill_rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * refill_rate).min(capacity);
        self.last_refill = now;
    }
}

/// Counter snapshot for observability
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterMetrics {
    /// Total successful acquisitions
    pub acquired: u64,
    /// Acquisitions that had to wait
    pub blocked: u64,
    /// 503 responses reported by the transport
    pub upstream_503: u64,
    /// Acquisitions served from burst capacity (no wait)
    pub burst_served: u64,
    /// Mean wait per acquisition
    pub avg_wait: Duration,
}

/// Token-bucket rate limiter with 503-driven exponential backoff
///
/// Capacity 3, refill 1 token/second, fractional tokens permitted.
/// `acquire` is cancel-safe: dropping the future before it resolves
/// consumes no token and mutates no state.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_rate: f64,
    max_backoff: Duration,
    state: Mutex<BucketState>,
    acquired_total: AtomicU64,
    blocked_total: AtomicU64,
    upstream_503_total: AtomicU64,
    burst_served_total: AtomicU64,
    wait_micros_total: AtomicU64,
}

impl RateLimiter {
    /// Limiter matching the upstream quota: burst 3, 1 req/s sustained.
    pub fn new() -> Self {
        Self::with_rate(3.0, 1.0)
    }

    pub fn with_rate(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            max_backoff: Duration::from_secs(60),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
                backoff_until: None,
                consecutive_503: 0,
            }),
            acquired_total: AtomicU64::new(0),
            blocked_total: AtomicU64::new(0),
            upstream_503_total: AtomicU64::new(0),
            burst_served_total: AtomicU64::new(0),
            wait_micros_total: AtomicU64::new(0),
        }
    }

    /// Wait until a token is available and no backoff is in force, then
    /// consume one token.
    ///
    /// The lock is never held across a sleep; under contention the sleep
    /// is re-checked, so a woken waiter that lost the race waits again.
    pub async fn acquire(&self) {
        let started = Instant::now();
        let mut waited = false;
        loop {
            let sleep_for = {
                let mut state = self.state.lock().await;
                state.refill(self.capacity, self.refill_rate);

                let now = Instant::now();
                let backoff_wait = match state.backoff_until {
                    Some(until) if now < until => Some(until - now),
                    _ => {
                        state.backoff_until = None;
                        None
                    }
                };

                match backoff_wait {
                    None if state.tokens >= 1.0 => {
                        state.tokens -= 1.0;
                        self.acquired_total.fetch_add(1, Ordering::Relaxed);
                        if !waited {
                            self.burst_served_total.fetch_add(1, Ordering::Relaxed);
                        }
                        self.wait_micros_total
                            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
                        return;
                    }
                    None => {
                        // Time for the bucket to reach one full token.
                        Duration::from_secs_f64((1.0 - state.tokens) / self.refill_rate)
                    }
                    Some(wait) => wait,
                }
            };

            if !waited {
                waited = true;
                self.blocked_total.fetch_add(1, Ordering::Relaxed);
                debug!(wait = ?sleep_for, "rate limiter blocking");
            }
            tokio::time::sleep(sleep_for).await;
        }
    }

    /// Record an upstream 503: double the backoff (capped at 60 s) and
    /// empty the bucket.
    pub async fn handle_503(&self) {
        self.upstream_503_total.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().await;
        state.consecutive_503 = state.consecutive_503.saturating_add(1);
        let exp = Duration::from_secs(2u64.saturating_pow(state.consecutive_503.min(6)));
        let backoff = exp.min(self.max_backoff);
        state.backoff_until = Some(Instant::now() + backoff);
        state.tokens = 0.0;
        warn!(consecutive = state.consecutive_503, ?backoff, "upstream 503, backing off");
    }

    /// Clear backoff after any upstream success.
    pub async fn reset_backoff(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_503 = 0;
        state.backoff_until = None;
    }

    /// Remaining backoff, if any. Drives `Retry-After` headers.
    pub async fn backoff_remaining(&self) -> Option<Duration> {
        let state = self.state.lock().await;
        state
            .backoff_until
            .and_then(|until| until.checked_duration_since(Instant::now()))
    }

    /// Estimated wall time to perform `n` upstream calls from the current
    /// bucket level: `max(0, n - floor(tokens))` seconds plus 100 ms of
    /// slack.
    pub async fn estimate_duration(&self, n: usize) -> Duration {
        let mut state = self.state.lock().await;
        state.refill(self.capacity, self.refill_rate);
        let ready = state.tokens.floor() as usize;
        Duration::from_secs(n.saturating_sub(ready) as u64) + Duration::from_millis(100)
    }

    /// Pace a batch of `n` operations: the returned channel yields one
    /// ready signal per `acquire`, from a detached task. Dropping the
    /// receiver stops the pacing.
    pub fn acquire_batch(self: &std::sync::Arc<Self>, n: usize) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        let limiter = self.clone();
        tokio::spawn(async move {
            for _ in 0..n {
                limiter.acquire().await;
                if tx.send(()).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    pub fn metrics(&self) -> RateLimiterMetrics {
        let acquired = self.acquired_total.load(Ordering::Relaxed);
        let wait_micros = self.wait_micros_total.load(Ordering::Relaxed);
        RateLimiterMetrics {
            acquired,
            blocked: self.blocked_total.load(Ordering::Relaxed),
            upstream_503: self.upstream_503_total.load(Ordering::Relaxed),
            burst_served: self.burst_served_total.load(Ordering::Relaxed),
            avg_wait: if acquired == 0 {
                Duration::ZERO
            } else {
                Duration::from_micros(wait_micros / acquired)
            },
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_sustained_rate() {
        let limiter = RateLimiter::new();

        // Full bucket: three acquisitions complete without waiting.
        for _ in 0..3 {
            limiter.acquire().await;
        }
        let metrics = limiter.metrics();
        assert_eq!(metrics.acquired, 3);
        assert_eq!(metrics.burst_served, 3);
        assert_eq!(metrics.blocked, 0);

        // Fourth must wait about a second for the refill.
        let before = Instant::now();
        limiter.acquire().await;
        let waited = before.elapsed();
        assert!(waited >= Duration::from_millis(900), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(1500), "waited {waited:?}");
        assert_eq!(limiter.metrics().blocked, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_503_backoff_doubles_and_caps() {
        let limiter = RateLimiter::new();

        limiter.handle_503().await;
        let first = limiter.backoff_remaining().await.unwrap();
        assert!(first >= Duration::from_millis(1900) && first <= Duration::from_secs(2));

        limiter.handle_503().await;
        let second = limiter.backoff_remaining().await.unwrap();
        assert!(second >= Duration::from_millis(3900) && second <= Duration::from_secs(4));

        for _ in 0..10 {
            limiter.handle_503().await;
        }
        let capped = limiter.backoff_remaining().await.unwrap();
        assert!(capped <= Duration::from_secs(60));

        limiter.reset_backoff().await;
        assert!(limiter.backoff_remaining().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_503_blocks_subsequent_acquire() {
        let limiter = RateLimiter::new();
        limiter.handle_503().await;

        // Bucket cleared and backoff in force: at least 2 s before the
        // next acquisition returns.
        let before = Instant::now();
        limiter.acquire().await;
        assert!(before.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_consumes_nothing() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            limiter.acquire().await;
        }

        // Give up before a token is available.
        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(cancelled.is_err());
        assert_eq!(limiter.metrics().acquired, 3);

        // The abandoned wait did not consume the refilling token.
        limiter.acquire().await;
        assert_eq!(limiter.metrics().acquired, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_estimate_duration() {
        let limiter = RateLimiter::new();
        // Full bucket: 5 calls need 2 extra seconds.
        let estimate = limiter.estimate_duration(5).await;
        assert_eq!(estimate, Duration::from_secs(2) + Duration::from_millis(100));

        for _ in 0..3 {
            limiter.acquire().await;
        }
        let estimate = limiter.estimate_duration(2).await;
        assert_eq!(estimate, Duration::from_secs(2) + Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_batch_paces_signals() {
        let limiter = Arc::new(RateLimiter::new());
        let mut rx = limiter.acquire_batch(5);

        let before = Instant::now();
        for _ in 0..5 {
            rx.recv().await.unwrap();
        }
        // 3 from the burst, then one per second.
        assert!(before.elapsed() >= Duration::from_secs(2));
        assert_eq!(limiter.metrics().acquired, 5);
    }
}
