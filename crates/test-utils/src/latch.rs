//! Countdown latch for waiting on callback-style completions.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tokio::sync::Notify;

#[derive(Debug)]
struct Inner {
    remaining: AtomicUsize,
    notify: Notify,
}

/// Releases waiters once [`count_down`](Self::count_down) has been called
/// `n` times.
///
/// Clones share the same count, so one clone can move into each callback.
#[derive(Debug, Clone)]
pub struct CountdownLatch {
    inner: Arc<Inner>,
}

impl CountdownLatch {
    /// Creates a latch that opens after `count` count-downs. A zero count
    /// starts open.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self { inner: Arc::new(Inner { remaining: AtomicUsize::new(count), notify: Notify::new() }) }
    }

    /// Decrements the count, waking waiters when it reaches zero. Extra
    /// count-downs are ignored.
    pub fn count_down(&self) {
        let previous = self
            .inner
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Remaining count-downs.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.remaining.load(Ordering::Acquire)
    }

    /// Waits until the count reaches zero.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn zero_count_is_open() {
        CountdownLatch::new(0).wait().await;
    }

    #[tokio::test]
    async fn opens_after_last_count_down() {
        let latch = CountdownLatch::new(3);
        for _ in 0..3 {
            let latch = latch.clone();
            tokio::spawn(async move { latch.count_down() });
        }
        tokio::time::timeout(Duration::from_secs(5), latch.wait()).await.expect("latch opened");
        assert_eq!(latch.count(), 0);
    }

    #[tokio::test]
    async fn extra_count_downs_saturate() {
        let latch = CountdownLatch::new(1);
        latch.count_down();
        latch.count_down();
        assert_eq!(latch.count(), 0);
        latch.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stays_closed_until_counted() {
        let latch = CountdownLatch::new(2);
        latch.count_down();
        let waited = tokio::time::timeout(Duration::from_millis(50), latch.wait()).await;
        assert!(waited.is_err());
    }
}
