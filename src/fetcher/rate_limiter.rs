use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Process-wide "at most one upstream call per `min_delay`" gate.
///
/// Callers await [`RateLimiter::turn`] immediately before each upstream request. The lock is
/// held across the sleep, so concurrent callers queue behind each other instead of all waking
/// at the same deadline.
#[derive(Debug)]
pub struct RateLimiter {
    min_delay: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_call: Mutex::new(None),
        }
    }

    /// Waits until `min_delay` has passed since the previous turn, then records this one.
    /// Every attempt counts, whether or not the request that follows succeeds.
    pub async fn turn(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_delay {
                let wait = self.min_delay - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "[UPSTREAM] rate limit wait");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn first_turn_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        let start = Instant::now();
        limiter.turn().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_turns_are_spaced_by_min_delay() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        let start = Instant::now();
        limiter.turn().await;
        limiter.turn().await;
        limiter.turn().await;
        assert!(start.elapsed() >= Duration::from_secs(10), "elapsed={:?}", start.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn time_already_elapsed_is_credited() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        limiter.turn().await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        let before = Instant::now();
        limiter.turn().await;
        let waited = before.elapsed();
        assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(3), "waited={waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_are_serialized() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(2)));
        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.turn().await })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_secs(6), "elapsed={:?}", start.elapsed());
    }
}
