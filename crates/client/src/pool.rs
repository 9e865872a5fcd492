//! Per-bookie connection pool.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use quire_types::{BookieId, LedgerId};
use snafu::ensure;
use tracing::info;

use crate::{
    connection::{BookieConnection, ConnectionContext, ConnectionState},
    error::{InvalidConfigSnafu, Result},
    executor::sign_safe_mod,
    fault::ErrorCounter,
    resolver::SecurityHandlerFactory,
};

/// Aggregate state of a pool, derived from its connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// No connection is up or being established. A pool whose connections
    /// all dropped returns here; the next request reconnects.
    Uninitialized,
    /// At least one connect is in progress and none is up.
    Connecting,
    /// Every established connection is writable.
    Ready,
    /// Some established connection is over its write high-water mark.
    Degraded,
    /// The pool was closed.
    Closed,
}

/// Connections to one bookie plus its error counter.
///
/// Requests are spread over the connections by key, so requests for the same
/// ledger always share a connection and keep their relative order.
pub struct ConnectionPool {
    bookie: BookieId,
    connections: Vec<BookieConnection>,
    errors: Arc<ErrorCounter>,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Builds a pool with `num_channels_per_bookie` lazy connections.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`](crate::ClientError::InvalidConfig)
    /// when `num_channels_per_bookie` is 0.
    pub(crate) fn new(
        bookie: BookieId,
        ctx: &ConnectionContext,
        security: Option<Arc<dyn SecurityHandlerFactory>>,
    ) -> Result<Self> {
        let channels = ctx.config.num_channels_per_bookie;
        ensure!(
            channels > 0,
            InvalidConfigSnafu {
                message: format!("num_channels_per_bookie must be > 0 (bookie {bookie})"),
            }
        );

        let errors = Arc::new(ErrorCounter::new(ctx.config.bookie_error_interval));
        let connections = (0..channels)
            .map(|_| {
                BookieConnection::new(
                    bookie.clone(),
                    ctx.clone(),
                    Arc::clone(&errors),
                    security.clone(),
                    ctx.config.protocol_version,
                )
            })
            .collect();
        info!(bookie = %bookie, channels, "created connection pool");
        Ok(Self { bookie, connections, errors, closed: AtomicBool::new(false) })
    }

    /// Bookie served by this pool.
    #[must_use]
    pub fn bookie(&self) -> &BookieId {
        &self.bookie
    }

    /// Number of physical connections.
    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.connections.len()
    }

    /// Connection that carries requests for `key`.
    #[must_use]
    pub fn connection_for(&self, key: i64) -> &BookieConnection {
        &self.connections[sign_safe_mod(key, self.connections.len())]
    }

    /// Current aggregate state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        if self.is_closed() {
            return PoolState::Closed;
        }
        let mut connecting = false;
        let mut connected = false;
        let mut degraded = false;
        for conn in &self.connections {
            match conn.state() {
                ConnectionState::Connected => {
                    connected = true;
                    degraded |= !conn.is_writable();
                },
                ConnectionState::Connecting => connecting = true,
                ConnectionState::Disconnected => {},
                ConnectionState::Closed => return PoolState::Closed,
            }
        }
        match (connected, degraded, connecting) {
            (true, true, _) => PoolState::Degraded,
            (true, false, _) => PoolState::Ready,
            (false, _, true) => PoolState::Connecting,
            (false, _, false) => PoolState::Uninitialized,
        }
    }

    pub(crate) fn errors(&self) -> Arc<ErrorCounter> {
        Arc::clone(&self.errors)
    }

    /// Records one bookie error.
    pub fn record_error(&self) {
        self.errors.record_error();
    }

    /// Errors recorded in the current interval.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.errors.count()
    }

    /// Whether the error count has reached `threshold` (0 disables).
    #[must_use]
    pub fn is_faulty(&self, threshold: u64) -> bool {
        self.errors.is_faulty(threshold)
    }

    /// Writability of the connection carrying `key`.
    #[must_use]
    pub fn is_writable(&self, key: i64) -> bool {
        !self.is_closed() && self.connection_for(key).is_writable()
    }

    /// In-flight requests for `ledger_id`.
    #[must_use]
    pub fn num_pending(&self, ledger_id: LedgerId) -> u64 {
        self.connection_for(ledger_id.value()).num_pending(ledger_id)
    }

    /// Waits until at most `limit` requests for `ledger_id` are in flight.
    pub async fn wait_pending_at_most(&self, ledger_id: LedgerId, limit: u64) {
        self.connection_for(ledger_id.value()).wait_pending_at_most(ledger_id, limit).await;
    }

    /// Times out expired requests on every connection.
    pub fn check_timeouts(&self, now: Instant) -> usize {
        self.connections.iter().map(|conn| conn.check_timeouts(now)).sum()
    }

    /// Closes every connection. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for conn in &self.connections {
            conn.close();
        }
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("bookie", &self.bookie)
            .field("channels", &self.connections.len())
            .field("errors", &self.errors.count())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use quire_types::config::ClientConfig;
    use tokio::runtime::Handle;

    use super::*;
    use crate::{error::ClientError, executor::OrderedExecutor, resolver::StaticResolver};

    fn context(config: ClientConfig) -> ConnectionContext {
        ConnectionContext {
            config: Arc::new(config),
            executor: Arc::new(OrderedExecutor::new(1, &Handle::current())),
            resolver: Arc::new(StaticResolver::new()),
            runtime: Handle::current(),
        }
    }

    fn bookie() -> BookieId {
        BookieId::parse("bookie-1:3181").unwrap()
    }

    #[tokio::test]
    async fn zero_channels_is_rejected() {
        let config = ClientConfig::builder().num_channels_per_bookie(0).build().unwrap();
        let err = ConnectionPool::new(bookie(), &context(config), None).unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn same_key_maps_to_same_connection() {
        let config = ClientConfig::builder().num_channels_per_bookie(4).build().unwrap();
        let pool = ConnectionPool::new(bookie(), &context(config), None).unwrap();
        assert_eq!(pool.num_channels(), 4);

        let first = pool.connection_for(10) as *const BookieConnection;
        let again = pool.connection_for(10) as *const BookieConnection;
        let wrapped = pool.connection_for(14) as *const BookieConnection;
        let negative = pool.connection_for(-2) as *const BookieConnection;
        assert_eq!(first, again);
        assert_eq!(first, wrapped);
        assert_eq!(first, negative);
    }

    #[tokio::test]
    async fn fresh_pool_is_uninitialized_then_closed() {
        let pool = ConnectionPool::new(bookie(), &context(ClientConfig::default()), None).unwrap();
        assert_eq!(pool.state(), PoolState::Uninitialized);
        assert!(!pool.is_writable(0));

        pool.close();
        pool.close();
        assert_eq!(pool.state(), PoolState::Closed);
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn errors_accumulate_per_pool() {
        let config = ClientConfig::builder().num_channels_per_bookie(2).build().unwrap();
        let pool = ConnectionPool::new(bookie(), &context(config), None).unwrap();
        pool.record_error();
        pool.record_error();
        assert_eq!(pool.error_count(), 2);
        assert!(pool.is_faulty(2));
        assert!(!pool.is_faulty(3));
        assert!(!pool.is_faulty(0));
    }
}
