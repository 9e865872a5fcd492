//! Polling assertions for state that changes on background tasks.

use std::time::Duration;

use tokio::time::{Instant, sleep};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls `condition` until it holds or `timeout` elapses.
///
/// Returns whether the condition held. Use this where no latch can observe
/// the transition, e.g. a pool reporting its connection as established.
///
/// # Example
///
/// ```no_run
/// use std::{
///     sync::{
///         Arc,
///         atomic::{AtomicUsize, Ordering},
///     },
///     time::Duration,
/// };
///
/// use quire_test_utils::assert_eventually;
///
/// # async fn example() {
/// let served = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&served);
/// tokio::spawn(async move {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// assert!(assert_eventually(Duration::from_secs(1), || served.load(Ordering::SeqCst) == 1).await);
/// # }
/// ```
pub async fn assert_eventually<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(POLL_INTERVAL).await;
    }
}
