//! Polling with exponential backoff.
//!
//! Used for readiness: a deployment is provisioned asynchronously, so each
//! requirement is polled until it holds or the readiness timeout expires.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// First delay between polls.
pub const INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Longest delay between polls.
pub const MAX_DELAY: Duration = Duration::from_secs(2);

/// Poll `condition` until it returns true or `timeout` elapses.
///
/// Backoff strategy:
/// - Initial delay: 500ms
/// - Exponential multiplier: 2x
/// - Delay capped at 2s and at the remaining time
///
/// Returns whether the condition was met. The condition is always polled at
/// least once, even with a zero timeout.
pub async fn eventually<F, Fut>(timeout: Duration, condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    eventually_with_delay(timeout, INITIAL_DELAY, condition).await
}

pub(crate) async fn eventually_with_delay<F, Fut>(
    timeout: Duration,
    initial_delay: Duration,
    mut condition: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut delay = initial_delay;
    let start = Instant::now();

    loop {
        if condition().await {
            return true;
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return false;
        }

        let remaining = timeout.saturating_sub(elapsed);
        sleep(delay.min(remaining)).await;

        delay = next_delay(delay);
    }
}

fn next_delay(delay: Duration) -> Duration {
    delay.saturating_mul(2).min(MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let mut delay = INITIAL_DELAY;
        let mut delays = Vec::new();
        for _ in 0..5 {
            delays.push(delay);
            delay = next_delay(delay);
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(2),
                Duration::from_secs(2),
            ]
        );
    }

    #[tokio::test]
    async fn test_condition_met_after_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let met = eventually_with_delay(Duration::from_secs(5), Duration::from_millis(5), || {
            let counter = Arc::clone(&counter);
            async move { counter.fetch_add(1, Ordering::SeqCst) >= 2 }
        })
        .await;

        assert!(met);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_condition_never_met() {
        let start = Instant::now();
        let met = eventually_with_delay(Duration::from_millis(50), Duration::from_millis(10), || async {
            false
        })
        .await;

        assert!(!met);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_zero_timeout_polls_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let met = eventually(Duration::ZERO, || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                false
            }
        })
        .await;

        assert!(!met);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
