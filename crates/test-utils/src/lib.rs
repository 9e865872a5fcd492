//! Shared test utilities for Quire crates.
//!
//! - [`CountdownLatch`] - Wait for a fixed number of callback completions
//! - [`assert_eventually`] - Poll a condition until it's true or timeout
//! - [`init_tracing`] - Route `tracing` output to the test harness
//! - [`strategies`] - Proptest generators for ids, payloads, and quorums

#![deny(unsafe_code)]
// Test utilities are allowed to use unwrap for simplicity
#![cfg_attr(test, allow(clippy::disallowed_methods))]

mod assertions;
pub use assertions::assert_eventually;

mod latch;
pub use latch::CountdownLatch;

pub mod strategies;

/// Installs a test-writer subscriber filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn assert_eventually_sees_background_change() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&flag);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            setter.store(true, Ordering::SeqCst);
        });
        assert!(assert_eventually(Duration::from_secs(2), || flag.load(Ordering::SeqCst)).await);
    }

    #[tokio::test]
    async fn assert_eventually_gives_up() {
        assert!(!assert_eventually(Duration::from_millis(30), || false).await);
    }

    #[test]
    fn init_tracing_is_repeatable() {
        init_tracing();
        init_tracing();
    }
}
