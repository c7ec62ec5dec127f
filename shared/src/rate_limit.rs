use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;

/// Per-connection token bucket. Capacity `N`, refill rate `N` tokens per
/// second (`spec.md` §4.1). `allow()` is non-blocking and safe to call
/// from a hot message-handling path; the refill runs on a background
/// task that stops as soon as the limiter is dropped.
pub struct RateLimiter {
    tokens: Arc<AtomicU32>,
    capacity: u32,
    cancel: CancellationToken,
}

impl RateLimiter {
    pub fn new(capacity: u32) -> Self {
        Self::with_refill_rate(capacity, capacity)
    }

    /// Same as `new`, but lets tests decouple bucket size from refill
    /// rate (the universal-properties test harness wants a fast refill
    /// without needing a huge bucket).
    pub fn with_refill_rate(capacity: u32, refill_per_sec: u32) -> Self {
        let tokens = Arc::new(AtomicU32::new(capacity));
        let cancel = CancellationToken::new();

        let refill_tokens = tokens.clone();
        let refill_cancel = cancel.clone();
        let refill_rate = refill_per_sec.max(1);
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs_f64(1.0 / refill_rate as f64));
            loop {
                tokio::select! {
                    _ = refill_cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let _ = refill_tokens.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                            if t < capacity { Some(t + 1) } else { None }
                        });
                    }
                }
            }
        });

        Self {
            tokens,
            capacity,
            cancel,
        }
    }

    /// Atomically takes a token if one is available.
    pub fn allow(&self) -> bool {
        self.tokens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                if t > 0 { Some(t - 1) } else { None }
            })
            .is_ok()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_capacity_then_denies() {
        let limiter = RateLimiter::with_refill_rate(10, 10);
        for _ in 0..10 {
            assert!(limiter.allow());
        }
        assert!(!limiter.allow());
    }

    #[tokio::test]
    async fn refills_over_time() {
        let limiter = RateLimiter::with_refill_rate(10, 10);
        for _ in 0..10 {
            assert!(limiter.allow());
        }
        assert!(!limiter.allow());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(limiter.allow());
    }

    #[tokio::test]
    async fn refill_stops_when_limiter_dropped() {
        let limiter = RateLimiter::with_refill_rate(2, 100);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
        drop(limiter);
        // No assertion beyond: the background task must not panic or
        // leak past drop. Cancellation is exercised via the token.
    }
}
