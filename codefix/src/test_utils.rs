//! Polling helpers for async tests
//!
//! Daemon behavior (sweeps, channel teardown, shutdown) happens on its own
//! schedule, so tests wait for a condition instead of sleeping a fixed time.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Retry `f` every `interval` until it returns `Ok`, panicking after `timeout`.
///
/// The panic message carries `desc`, the elapsed time, the attempt count and
/// the last error, which is usually enough to tell a slow daemon from a
/// broken one.
///
/// ```rust,ignore
/// use codefix_lib::test_utils::assert_eventually;
///
/// assert_eventually(
///     "session to be swept",
///     Duration::from_secs(3),
///     Duration::from_millis(50),
///     || async {
///         if state.registry.read().await.is_empty() {
///             Ok(())
///         } else {
///             Err("session still registered")
///         }
///     },
/// )
/// .await;
/// ```
pub async fn assert_eventually<F, Fut, T, E>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut f: F,
) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let start = std::time::Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return value,
            Err(e) => {
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    panic!(
                        "Timeout waiting for {}\n\
                         Duration: {:?}\n\
                         Attempts: {}\n\
                         Last error: {}",
                        desc, elapsed, attempt, e
                    );
                }
                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// Boolean form of [`assert_eventually`]
pub async fn assert_eventually_bool<F, Fut>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut f: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    assert_eventually(desc, timeout, interval, || {
        let check = f();
        async move {
            if check.await {
                Ok(())
            } else {
                Err("condition never became true")
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_returns_first_success() {
        let value = assert_eventually(
            "immediate success",
            Duration::from_secs(1),
            Duration::from_millis(10),
            || async { Ok::<_, &str>(7) },
        )
        .await;
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();

        assert_eventually_bool(
            "third attempt",
            Duration::from_secs(2),
            Duration::from_millis(10),
            move || {
                let c = seen.clone();
                async move { c.fetch_add(1, Ordering::SeqCst) >= 2 }
            },
        )
        .await;

        assert!(counter.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    #[should_panic(expected = "Timeout waiting for never ready")]
    async fn test_times_out_with_description() {
        assert_eventually_bool(
            "never ready",
            Duration::from_millis(100),
            Duration::from_millis(20),
            || async { false },
        )
        .await;
    }
}
