//! Polling assertions for async tests.
//!
//! The monitor writes its status file from inside a running loop, so tests
//! that watch it from outside retry a check until it passes instead of
//! sleeping for a guessed duration.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

/// Retry `check` every `interval` until it returns `Ok`, panicking after
/// `timeout` with the last error.
///
/// ```rust,ignore
/// use portal_watch_lib::test_utils::assert_eventually;
///
/// let file = &status_file;
/// let status = assert_eventually(
///     "status file to report two cycles",
///     Duration::from_secs(2),
///     Duration::from_millis(20),
///     move || async move {
///         match file.read() {
///             Ok(Some(s)) if s.cycles >= 2 => Ok(s),
///             Ok(_) => Err("fewer than two cycles".to_string()),
///             Err(e) => Err(e.to_string()),
///         }
///     },
/// )
/// .await;
/// ```
pub async fn assert_eventually<F, Fut, T, E>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let last_error = match check().await {
            Ok(value) => return value,
            Err(e) => e.to_string(),
        };

        if start.elapsed() >= timeout {
            panic!(
                "Timeout waiting for {} after {} attempts ({:?}): {}",
                desc,
                attempts,
                start.elapsed(),
                last_error
            );
        }
        tokio::time::sleep(interval).await;
    }
}

/// Boolean form of [`assert_eventually`].
pub async fn assert_eventually_bool<F, Fut>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    assert_eventually(desc, timeout, interval, || {
        let fut = check();
        async move {
            if fut.await {
                Ok(())
            } else {
                Err("condition still false")
            }
        }
    })
    .await
}
