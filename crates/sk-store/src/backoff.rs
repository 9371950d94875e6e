//! Bounded retry loop with a caller supplied delay schedule.

use std::future::Future;
use std::time::Duration;

/// Result of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// Stop and return this value
    Done(T),
    /// Try again; the value is returned if this was the last attempt
    Again(T),
}

/// Run `operation` up to `max_attempts` times (at least once).
///
/// `operation` receives the 1-based attempt number. Between attempts the loop
/// sleeps for `delay(attempt)` where `attempt` is the one that just failed.
pub async fn retry<T, F, Fut, D>(max_attempts: u32, delay: D, mut operation: F) -> T
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Step<T>>,
    D: Fn(u32) -> Duration,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Step::Done(value) => return value,
            Step::Again(value) if attempt >= max_attempts => return value,
            Step::Again(_) => {
                let wait = delay(attempt);
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_done() {
        let calls = Cell::new(0);
        let value = retry(
            3,
            |n| Duration::from_millis(100 * u64::from(n)),
            |attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt == 2 {
                        Step::Done("found")
                    } else {
                        Step::Again("missing")
                    }
                }
            },
        )
        .await;

        assert_eq!(value, "found");
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_delays_until_exhausted() {
        let start = Instant::now();
        let value: Option<u32> = retry(
            4,
            |n| Duration::from_millis(100 * u64::from(n)),
            |_| async { Step::Again(None) },
        )
        .await;

        assert_eq!(value, None);
        // 100 + 200 + 300 between four attempts
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(600));
        assert!(elapsed < Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let calls = Cell::new(0);
        let value = retry(0, |_| Duration::ZERO, |_| {
            calls.set(calls.get() + 1);
            async { Step::Again(7) }
        })
        .await;

        assert_eq!(value, 7);
        assert_eq!(calls.get(), 1);
    }
}
