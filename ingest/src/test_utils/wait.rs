//! Polling helpers for asynchronous test assertions.

use std::future::Future;
use std::time::Duration;

/// How long [`wait_until`] keeps polling before giving up.
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Polling interval of [`wait_until`].
const WAIT_INTERVAL: Duration = Duration::from_millis(10);

/// Polls an asynchronous condition until it turns true.
///
/// Panics with the given description after a timeout, so a hanging condition
/// fails the test with a readable message instead of a join error.
pub async fn wait_until<F, Fut>(description: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;

    loop {
        if condition().await {
            return;
        }

        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting until {description}");
        }

        tokio::time::sleep(WAIT_INTERVAL).await;
    }
}
