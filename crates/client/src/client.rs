//! Bookie client: the RPC surface over per-bookie connection pools.
//!
//! Every RPC is asynchronous. The call itself only validates its arguments
//! and queues the request; the outcome is delivered to the callback on the
//! ordered executor, keyed by ledger id. The `*_async` variants wrap the same
//! path in a future that resolves to `Result<T, ResultCode>`.
//!
//! Failures reach the caller through exactly one channel:
//!
//! | Failure                                  | Channel                               |
//! |------------------------------------------|---------------------------------------|
//! | Negative ledger id, invalid pool config  | `Err(ClientError)` from the call      |
//! | Empty payload on add / write-LAC         | callback with `WriteException`        |
//! | Client closed                            | callback with `ClientClosed`          |
//! | Executor shut down                       | callback, inline, with `Interrupted`  |
//! | Bookie unreachable or disconnected       | callback with `BookieHandleNotAvailable` |
//! | Bookie-reported failure                  | callback with the mapped code         |
//! | No response in time                      | callback with `Timeout`               |

use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::{Mutex, RwLock};
use quire_types::{
    AddFlags, BookieId, EntryId, LedgerId, ReadFlags, RequestBody, ResponseBody, ResultCode,
    WriteFlags, config::ClientConfig,
};
use snafu::ensure;
use tokio::{runtime::Handle, sync::oneshot, task::AbortHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    completion::{Completion, deliver},
    connection::{BookieConnection, ConnectionContext},
    error::{InvalidArgumentSnafu, InvalidConfigSnafu, Result},
    executor::OrderedExecutor,
    pool::ConnectionPool,
    resolver::{BookieAddressResolver, HostPortResolver, SecurityHandlerFactory},
};

/// Outcome of an asynchronous RPC: the value on success, the code otherwise.
pub type OpResult<T> = std::result::Result<T, ResultCode>;

/// Entry returned by a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadEntryResult {
    /// Entry payload.
    pub data: Bytes,
    /// Last-add-confirmed the bookie knows for the ledger.
    pub last_add_confirmed: EntryId,
}

/// Explicit last-add-confirmed returned by a LAC read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadLacResult {
    /// Published LAC.
    pub lac: EntryId,
    /// Opaque payload stored with the LAC.
    pub lac_buffer: Bytes,
}

/// Client for many bookies.
///
/// Pools are created lazily on first contact with a bookie and live until the
/// client is closed.
pub struct BookieClient {
    ctx: ConnectionContext,
    security: Option<Arc<dyn SecurityHandlerFactory>>,
    pools: DashMap<BookieId, Arc<ConnectionPool>>,
    /// Dispatch holds read access while it resolves a pool and queues a
    /// request; close takes write access to flip `closed`.
    close_lock: RwLock<()>,
    closed: AtomicBool,
    monitor: Mutex<Option<AbortHandle>>,
}

#[bon::bon]
impl BookieClient {
    /// Creates a client and starts its timeout monitor.
    ///
    /// Without an explicit `runtime` the current tokio runtime is used.
    /// Without an explicit `executor` the client creates one with
    /// `config.executor_threads` workers.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`](crate::ClientError::InvalidConfig) if the
    /// configuration fails
    /// validation or no tokio runtime is available.
    #[builder]
    pub fn new(
        #[builder(default)] config: ClientConfig,
        resolver: Option<Arc<dyn BookieAddressResolver>>,
        executor: Option<Arc<OrderedExecutor>>,
        security: Option<Arc<dyn SecurityHandlerFactory>>,
        runtime: Option<Handle>,
    ) -> Result<Arc<Self>> {
        config.validate().map_err(|err| InvalidConfigSnafu { message: err.to_string() }.build())?;
        let runtime = match runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|err| {
                InvalidConfigSnafu { message: format!("bookie client needs a tokio runtime: {err}") }
                    .build()
            })?,
        };
        let executor = executor
            .unwrap_or_else(|| Arc::new(OrderedExecutor::new(config.executor_threads, &runtime)));
        let resolver = resolver.unwrap_or_else(|| Arc::new(HostPortResolver));
        let interval = config.timeout_task_interval;

        info!(
            channels = config.num_channels_per_bookie,
            version = ?config.protocol_version,
            error_threshold = config.bookie_error_threshold_per_interval,
            "starting bookie client"
        );

        let client = Arc::new(Self {
            ctx: ConnectionContext {
                config: Arc::new(config),
                executor,
                resolver,
                runtime: runtime.clone(),
            },
            security,
            pools: DashMap::new(),
            close_lock: RwLock::new(()),
            closed: AtomicBool::new(false),
            monitor: Mutex::new(None),
        });

        let weak = Arc::downgrade(&client);
        let monitor = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(client) = weak.upgrade() else { break };
                if client.is_closed() {
                    break;
                }
                client.monitor_pending_operations();
            }
        });
        *client.monitor.lock() = Some(monitor.abort_handle());
        Ok(client)
    }
}

impl BookieClient {
    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.ctx.config
    }

    /// Executor completions run on.
    #[must_use]
    pub fn executor(&self) -> &Arc<OrderedExecutor> {
        &self.ctx.executor
    }

    /// Runtime connection tasks are spawned on.
    #[must_use]
    pub fn runtime(&self) -> &Handle {
        &self.ctx.runtime
    }

    /// Returns the pool for `bookie`, creating it on first use.
    ///
    /// Returns `Ok(None)` once the client is closed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`](crate::ClientError::InvalidConfig) if a pool cannot
    /// be built from
    /// the configuration (zero channels per bookie).
    pub fn lookup_client(&self, bookie: &BookieId) -> Result<Option<Arc<ConnectionPool>>> {
        let _guard = self.close_lock.read();
        self.lookup_locked(bookie)
    }

    fn lookup_locked(&self, bookie: &BookieId) -> Result<Option<Arc<ConnectionPool>>> {
        if self.is_closed() {
            return Ok(None);
        }
        if let Some(pool) = self.pools.get(bookie) {
            return Ok(Some(Arc::clone(pool.value())));
        }
        let pool = match self.pools.entry(bookie.clone()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let pool = ConnectionPool::new(bookie.clone(), &self.ctx, self.security.clone())?;
                Arc::clone(entry.insert(Arc::new(pool)).value())
            },
        };
        Ok(Some(pool))
    }

    /// Creates a standalone connection to `bookie` sharing `pool`'s error
    /// counter.
    ///
    /// `force_v3` selects [`ProtocolVersion::V3`](quire_types::ProtocolVersion::V3)
    /// regardless of configuration. The connection is lazy; nothing is sent
    /// until the first request.
    #[must_use]
    pub fn create(
        &self,
        bookie: &BookieId,
        pool: &ConnectionPool,
        security: Option<Arc<dyn SecurityHandlerFactory>>,
        force_v3: bool,
    ) -> BookieConnection {
        let version = if force_v3 {
            quire_types::ProtocolVersion::V3
        } else {
            self.ctx.config.protocol_version
        };
        BookieConnection::new(bookie.clone(), self.ctx.clone(), pool.errors(), security, version)
    }

    /// Appends one entry to `bookie`.
    ///
    /// `callback` receives the result code, ledger id, entry id, and bookie.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidArgument`](crate::ClientError::InvalidArgument) for a
    /// negative ledger id and
    /// [`ClientError::InvalidConfig`](crate::ClientError::InvalidConfig) if the bookie's pool
    /// cannot be built.
    #[allow(clippy::too_many_arguments)]
    pub fn add_entry<F>(
        &self,
        bookie: &BookieId,
        ledger_id: LedgerId,
        master_key: Bytes,
        entry_id: EntryId,
        payload: Bytes,
        flags: AddFlags,
        write_flags: WriteFlags,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(ResultCode, LedgerId, EntryId, BookieId) + Send + 'static,
    {
        check_ledger_id(ledger_id)?;
        let responder = bookie.clone();
        let completion =
            Completion::new(move |rc, _| callback(rc, ledger_id, entry_id, responder));
        if payload.is_empty() {
            return self.reject_empty_payload(ledger_id, completion);
        }
        let body = RequestBody::AddEntry {
            ledger_id,
            entry_id,
            master_key,
            flags,
            write_flags,
            payload,
        };
        self.dispatch(bookie, ledger_id, body, completion)
    }

    /// Future form of [`add_entry`](Self::add_entry).
    ///
    /// # Errors
    ///
    /// Same synchronous errors as [`add_entry`](Self::add_entry).
    #[allow(clippy::too_many_arguments)]
    pub fn add_entry_async(
        &self,
        bookie: &BookieId,
        ledger_id: LedgerId,
        master_key: Bytes,
        entry_id: EntryId,
        payload: Bytes,
        flags: AddFlags,
        write_flags: WriteFlags,
    ) -> Result<impl Future<Output = OpResult<()>> + Send + 'static> {
        let (tx, rx) = oneshot::channel();
        self.add_entry(
            bookie,
            ledger_id,
            master_key,
            entry_id,
            payload,
            flags,
            write_flags,
            move |rc, _, _, _| {
                let _ = tx.send(outcome(rc, ()));
            },
        )?;
        Ok(await_outcome(rx))
    }

    /// Reads one entry from `bookie`.
    ///
    /// `master_key` is required when `flags` contains
    /// [`ReadFlags::FENCE_LEDGER`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidArgument`](crate::ClientError::InvalidArgument) for a
    /// negative ledger id, or a
    /// fencing read without a master key.
    pub fn read_entry<F>(
        &self,
        bookie: &BookieId,
        ledger_id: LedgerId,
        entry_id: EntryId,
        flags: ReadFlags,
        master_key: Option<Bytes>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(ResultCode, LedgerId, EntryId, Option<ReadEntryResult>) + Send + 'static,
    {
        check_ledger_id(ledger_id)?;
        ensure!(
            !flags.contains(ReadFlags::FENCE_LEDGER) || master_key.is_some(),
            InvalidArgumentSnafu { message: "fencing read requires the master key" }
        );
        let completion = Completion::new(move |rc, body| {
            let (rc, result) = match (rc, body) {
                (ResultCode::Ok, ResponseBody::ReadEntry { data, last_add_confirmed }) => {
                    (rc, Some(ReadEntryResult { data, last_add_confirmed }))
                },
                (ResultCode::Ok, _) => (ResultCode::ReadException, None),
                (rc, _) => (rc, None),
            };
            callback(rc, ledger_id, entry_id, result);
        });
        let body = RequestBody::ReadEntry { ledger_id, entry_id, flags, master_key };
        self.dispatch(bookie, ledger_id, body, completion)
    }

    /// Future form of [`read_entry`](Self::read_entry).
    ///
    /// # Errors
    ///
    /// Same synchronous errors as [`read_entry`](Self::read_entry).
    pub fn read_entry_async(
        &self,
        bookie: &BookieId,
        ledger_id: LedgerId,
        entry_id: EntryId,
        flags: ReadFlags,
        master_key: Option<Bytes>,
    ) -> Result<impl Future<Output = OpResult<ReadEntryResult>> + Send + 'static> {
        let (tx, rx) = oneshot::channel();
        self.read_entry(bookie, ledger_id, entry_id, flags, master_key, move |rc, _, _, result| {
            let _ = tx.send(outcome_with(rc, result));
        })?;
        Ok(await_outcome(rx))
    }

    /// Publishes an explicit last-add-confirmed on `bookie`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidArgument`](crate::ClientError::InvalidArgument) for a
    /// negative ledger id.
    pub fn write_lac<F>(
        &self,
        bookie: &BookieId,
        ledger_id: LedgerId,
        master_key: Bytes,
        lac: EntryId,
        payload: Bytes,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(ResultCode, LedgerId, BookieId) + Send + 'static,
    {
        check_ledger_id(ledger_id)?;
        let responder = bookie.clone();
        let completion = Completion::new(move |rc, _| callback(rc, ledger_id, responder));
        if payload.is_empty() {
            return self.reject_empty_payload(ledger_id, completion);
        }
        let body = RequestBody::WriteLac { ledger_id, lac, master_key, payload };
        self.dispatch(bookie, ledger_id, body, completion)
    }

    /// Future form of [`write_lac`](Self::write_lac).
    ///
    /// # Errors
    ///
    /// Same synchronous errors as [`write_lac`](Self::write_lac).
    pub fn write_lac_async(
        &self,
        bookie: &BookieId,
        ledger_id: LedgerId,
        master_key: Bytes,
        lac: EntryId,
        payload: Bytes,
    ) -> Result<impl Future<Output = OpResult<()>> + Send + 'static> {
        let (tx, rx) = oneshot::channel();
        self.write_lac(bookie, ledger_id, master_key, lac, payload, move |rc, _, _| {
            let _ = tx.send(outcome(rc, ()));
        })?;
        Ok(await_outcome(rx))
    }

    /// Reads the explicit last-add-confirmed from `bookie`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidArgument`](crate::ClientError::InvalidArgument) for a
    /// negative ledger id.
    pub fn read_lac<F>(&self, bookie: &BookieId, ledger_id: LedgerId, callback: F) -> Result<()>
    where
        F: FnOnce(ResultCode, LedgerId, Option<ReadLacResult>) + Send + 'static,
    {
        check_ledger_id(ledger_id)?;
        let completion = Completion::new(move |rc, body| {
            let (rc, result) = match (rc, body) {
                (ResultCode::Ok, ResponseBody::ReadLac { lac_buffer, lac }) => {
                    (rc, Some(ReadLacResult { lac, lac_buffer }))
                },
                (ResultCode::Ok, _) => (ResultCode::ReadException, None),
                (rc, _) => (rc, None),
            };
            callback(rc, ledger_id, result);
        });
        self.dispatch(bookie, ledger_id, RequestBody::ReadLac { ledger_id }, completion)
    }

    /// Future form of [`read_lac`](Self::read_lac).
    ///
    /// # Errors
    ///
    /// Same synchronous errors as [`read_lac`](Self::read_lac).
    pub fn read_lac_async(
        &self,
        bookie: &BookieId,
        ledger_id: LedgerId,
    ) -> Result<impl Future<Output = OpResult<ReadLacResult>> + Send + 'static> {
        let (tx, rx) = oneshot::channel();
        self.read_lac(bookie, ledger_id, move |rc, _, result| {
            let _ = tx.send(outcome_with(rc, result));
        })?;
        Ok(await_outcome(rx))
    }

    /// Asks `bookie` to persist every entry of a deferred-sync ledger.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidArgument`](crate::ClientError::InvalidArgument) for a
    /// negative ledger id.
    pub fn force_ledger<F>(&self, bookie: &BookieId, ledger_id: LedgerId, callback: F) -> Result<()>
    where
        F: FnOnce(ResultCode, LedgerId, BookieId) + Send + 'static,
    {
        check_ledger_id(ledger_id)?;
        let responder = bookie.clone();
        let completion = Completion::new(move |rc, _| callback(rc, ledger_id, responder));
        self.dispatch(bookie, ledger_id, RequestBody::ForceLedger { ledger_id }, completion)
    }

    /// Future form of [`force_ledger`](Self::force_ledger).
    ///
    /// # Errors
    ///
    /// Same synchronous errors as [`force_ledger`](Self::force_ledger).
    pub fn force_ledger_async(
        &self,
        bookie: &BookieId,
        ledger_id: LedgerId,
    ) -> Result<impl Future<Output = OpResult<()>> + Send + 'static> {
        let (tx, rx) = oneshot::channel();
        self.force_ledger(bookie, ledger_id, move |rc, _, _| {
            let _ = tx.send(outcome(rc, ()));
        })?;
        Ok(await_outcome(rx))
    }

    /// Lists the entry ids `bookie` stores for `ledger_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidArgument`](crate::ClientError::InvalidArgument) for a
    /// negative ledger id.
    pub fn get_list_of_entries_of_ledger<F>(
        &self,
        bookie: &BookieId,
        ledger_id: LedgerId,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(ResultCode, LedgerId, Option<Vec<EntryId>>) + Send + 'static,
    {
        check_ledger_id(ledger_id)?;
        let completion = Completion::new(move |rc, body| {
            let (rc, entries) = match (rc, body) {
                (ResultCode::Ok, ResponseBody::ListOfEntries { entries }) => (rc, Some(entries)),
                (ResultCode::Ok, _) => (ResultCode::ReadException, None),
                (rc, _) => (rc, None),
            };
            callback(rc, ledger_id, entries);
        });
        let body = RequestBody::GetListOfEntriesOfLedger { ledger_id };
        self.dispatch(bookie, ledger_id, body, completion)
    }

    /// Future form of
    /// [`get_list_of_entries_of_ledger`](Self::get_list_of_entries_of_ledger).
    ///
    /// # Errors
    ///
    /// Same synchronous errors as the callback form.
    pub fn get_list_of_entries_of_ledger_async(
        &self,
        bookie: &BookieId,
        ledger_id: LedgerId,
    ) -> Result<impl Future<Output = OpResult<Vec<EntryId>>> + Send + 'static> {
        let (tx, rx) = oneshot::channel();
        self.get_list_of_entries_of_ledger(bookie, ledger_id, move |rc, _, entries| {
            let _ = tx.send(outcome_with(rc, entries));
        })?;
        Ok(await_outcome(rx))
    }

    /// In-flight requests for `ledger_id` on `bookie`.
    ///
    /// Returns 0 for a bookie never contacted and after close.
    #[must_use]
    pub fn get_num_pending_requests(&self, bookie: &BookieId, ledger_id: LedgerId) -> u64 {
        self.pools.get(bookie).map_or(0, |pool| pool.num_pending(ledger_id))
    }

    /// Waits until at most `limit` requests for `ledger_id` are in flight on
    /// `bookie`.
    pub async fn wait_for_pending_at_most(
        &self,
        bookie: &BookieId,
        ledger_id: LedgerId,
        limit: u64,
    ) {
        let pool = self.pools.get(bookie).map(|pool| Arc::clone(pool.value()));
        if let Some(pool) = pool {
            pool.wait_pending_at_most(ledger_id, limit).await;
        }
    }

    /// Whether the connection that would carry `key` to `bookie` is writable.
    ///
    /// An unknown bookie gets a pool whose connections are not up yet, so the
    /// answer is the configured `writable_when_disconnected` default.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`](crate::ClientError::InvalidConfig) if the bookie's
    /// pool cannot be
    /// built.
    pub fn is_writable(&self, bookie: &BookieId, key: i64) -> Result<bool> {
        Ok(self.lookup_client(bookie)?.is_some_and(|pool| pool.is_writable(key)))
    }

    /// Bookies whose error count reached the configured threshold in the
    /// current interval, sorted by identity.
    #[must_use]
    pub fn get_faulty_bookies(&self) -> Vec<BookieId> {
        let threshold = self.ctx.config.bookie_error_threshold_per_interval;
        if threshold == 0 {
            return Vec::new();
        }
        let mut faulty: Vec<BookieId> = self
            .pools
            .iter()
            .filter(|entry| entry.value().is_faulty(threshold))
            .map(|entry| entry.key().clone())
            .collect();
        faulty.sort();
        if !faulty.is_empty() {
            debug!(count = faulty.len(), threshold, "faulty bookies");
        }
        faulty
    }

    /// Runs one timeout scan over every pool. Returns the number of requests
    /// timed out.
    pub fn monitor_pending_operations(&self) -> usize {
        let pools: Vec<Arc<ConnectionPool>> =
            self.pools.iter().map(|entry| Arc::clone(entry.value())).collect();
        let now = Instant::now();
        pools.iter().map(|pool| pool.check_timeouts(now)).sum()
    }

    /// Closes every pool and fails outstanding requests with
    /// [`ResultCode::ClientClosed`]. Idempotent.
    ///
    /// The executor keeps running so that late completions still reach their
    /// callbacks.
    pub fn close(&self) {
        let pools: Vec<Arc<ConnectionPool>> = {
            let _guard = self.close_lock.write();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            let bookies: Vec<BookieId> = self.pools.iter().map(|e| e.key().clone()).collect();
            bookies.iter().filter_map(|bookie| self.pools.remove(bookie)).map(|(_, p)| p).collect()
        };
        for pool in &pools {
            pool.close();
        }
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.abort();
        }
        info!(pools = pools.len(), "bookie client closed");
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn dispatch(
        &self,
        bookie: &BookieId,
        ledger_id: LedgerId,
        body: RequestBody,
        completion: Completion,
    ) -> Result<()> {
        let rejected = {
            let _guard = self.close_lock.read();
            match self.lookup_locked(bookie)? {
                Some(pool) => pool.connection_for(ledger_id.value()).send(body, completion),
                None => Some((completion, ResultCode::ClientClosed)),
            }
        };
        if let Some((completion, rc)) = rejected {
            debug!(bookie = %bookie, ledger_id = %ledger_id, rc = %rc, "request rejected");
            deliver(&self.ctx.executor, ledger_id, completion, rc, ResponseBody::Empty);
        }
        Ok(())
    }

    fn reject_empty_payload(&self, ledger_id: LedgerId, completion: Completion) -> Result<()> {
        let rc =
            if self.is_closed() { ResultCode::ClientClosed } else { ResultCode::WriteException };
        warn!(ledger_id = %ledger_id, rc = %rc, "rejecting write with empty payload");
        deliver(&self.ctx.executor, ledger_id, completion, rc, ResponseBody::Empty);
        Ok(())
    }
}

impl Drop for BookieClient {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.get_mut().take() {
            monitor.abort();
        }
    }
}

impl fmt::Debug for BookieClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BookieClient")
            .field("pools", &self.pools.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn check_ledger_id(ledger_id: LedgerId) -> Result<()> {
    ensure!(
        ledger_id.is_valid(),
        InvalidArgumentSnafu { message: format!("ledger id must be non-negative, got {ledger_id}") }
    );
    Ok(())
}

fn outcome<T>(rc: ResultCode, value: T) -> OpResult<T> {
    if rc.is_ok() { Ok(value) } else { Err(rc) }
}

fn outcome_with<T>(rc: ResultCode, value: Option<T>) -> OpResult<T> {
    match value {
        Some(value) if rc.is_ok() => Ok(value),
        _ if rc.is_ok() => Err(ResultCode::ReadException),
        _ => Err(rc),
    }
}

async fn await_outcome<T>(rx: oneshot::Receiver<OpResult<T>>) -> OpResult<T> {
    // A dropped sender means the completion was discarded without running.
    rx.await.unwrap_or(Err(ResultCode::Interrupted))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::{error::ClientError, resolver::StaticResolver};

    fn client(config: ClientConfig) -> Arc<BookieClient> {
        BookieClient::builder()
            .config(config)
            .resolver(Arc::new(StaticResolver::new()) as Arc<dyn BookieAddressResolver>)
            .build()
            .unwrap()
    }

    fn bookie(name: &str) -> BookieId {
        BookieId::parse(name).unwrap()
    }

    #[tokio::test]
    async fn negative_ledger_id_is_rejected_synchronously() {
        let client = client(ClientConfig::default());
        let err = client
            .read_lac(&bookie("b1"), LedgerId::INVALID, |_, _, _| {})
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn fencing_read_requires_master_key() {
        let client = client(ClientConfig::default());
        let err = client
            .read_entry(
                &bookie("b1"),
                LedgerId::new(1),
                EntryId::new(0),
                ReadFlags::FENCE_LEDGER,
                None,
                |_, _, _, _| {},
            )
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn empty_payload_is_a_write_exception() {
        let client = client(ClientConfig::default());
        let result = client
            .add_entry_async(
                &bookie("b1"),
                LedgerId::new(1),
                Bytes::from_static(b"key"),
                EntryId::new(0),
                Bytes::new(),
                AddFlags::empty(),
                WriteFlags::empty(),
            )
            .unwrap()
            .await;
        assert_eq!(result, Err(ResultCode::WriteException));
        // Rejected before any pool was needed.
        assert!(client.pools.is_empty());
    }

    #[tokio::test]
    async fn unknown_bookie_is_not_writable() {
        let client = client(ClientConfig::default());
        assert!(!client.is_writable(&bookie("never-seen:3181"), 0).unwrap());
    }

    #[tokio::test]
    async fn zero_channels_fails_at_pool_construction() {
        let config = ClientConfig::builder().num_channels_per_bookie(0).build().unwrap();
        let client = client(config);
        assert!(matches!(
            client.lookup_client(&bookie("b1")),
            Err(ClientError::InvalidConfig { .. })
        ));
        assert!(client.is_writable(&bookie("b1"), 0).is_err());
        assert!(client.force_ledger(&bookie("b1"), LedgerId::new(1), |_, _, _| {}).is_err());
    }

    #[tokio::test]
    async fn lookup_reuses_pool() {
        let client = client(ClientConfig::default());
        let first = client.lookup_client(&bookie("b1")).unwrap().unwrap();
        let second = client.lookup_client(&bookie("b1")).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(client.get_num_pending_requests(&bookie("b1"), LedgerId::new(1)), 0);
    }

    #[tokio::test]
    async fn create_honors_forced_v3() {
        let config = ClientConfig::builder()
            .protocol_version(quire_types::ProtocolVersion::V2)
            .build()
            .unwrap();
        let client = client(config);
        let id = bookie("b1");
        let pool = client.lookup_client(&id).unwrap().unwrap();

        let forced = client.create(&id, &pool, None, true);
        let default = client.create(&id, &pool, None, false);
        assert_eq!(forced.protocol_version(), quire_types::ProtocolVersion::V3);
        assert_eq!(default.protocol_version(), quire_types::ProtocolVersion::V2);
        assert_eq!(forced.bookie(), &id);
    }

    #[tokio::test]
    async fn closed_client_completes_with_client_closed() {
        let client = client(ClientConfig::default());
        client.close();
        assert!(client.lookup_client(&bookie("b1")).unwrap().is_none());

        let result = client.force_ledger_async(&bookie("b1"), LedgerId::new(1)).unwrap().await;
        assert_eq!(result, Err(ResultCode::ClientClosed));
    }

    #[tokio::test]
    async fn faulty_bookies_are_sorted_and_thresholded() {
        let config =
            ClientConfig::builder().bookie_error_threshold_per_interval(2).build().unwrap();
        let client = client(config);
        for (name, errors) in [("c:1", 2), ("a:1", 3), ("b:1", 1)] {
            let pool = client.lookup_client(&bookie(name)).unwrap().unwrap();
            for _ in 0..errors {
                pool.record_error();
            }
        }
        assert_eq!(client.get_faulty_bookies(), vec![bookie("a:1"), bookie("c:1")]);
    }

    #[tokio::test]
    async fn zero_threshold_disables_fault_reports() {
        let config =
            ClientConfig::builder().bookie_error_threshold_per_interval(0).build().unwrap();
        let client = client(config);
        let pool = client.lookup_client(&bookie("a:1")).unwrap().unwrap();
        pool.record_error();
        assert!(client.get_faulty_bookies().is_empty());
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(32))]

        #[test]
        fn faulty_list_is_exactly_the_sorted_threshold_set(
            errors in proptest::collection::btree_map("[a-e]{1,3}", 0u64..5, 1..6),
            threshold in 1u64..4,
        ) {
            let runtime =
                tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let faulty = runtime.block_on(async {
                let config = ClientConfig::builder()
                    .bookie_error_threshold_per_interval(threshold)
                    .build()
                    .unwrap();
                let client = client(config);
                // Record in reverse identity order; the report must not depend on it.
                for (name, count) in errors.iter().rev() {
                    let pool = client.lookup_client(&bookie(&format!("{name}:1"))).unwrap();
                    let pool = pool.unwrap();
                    for _ in 0..*count {
                        pool.record_error();
                    }
                }
                client.get_faulty_bookies()
            });
            let expected: Vec<BookieId> = errors
                .iter()
                .filter(|(_, count)| **count >= threshold)
                .map(|(name, _)| bookie(&format!("{name}:1")))
                .collect();
            proptest::prop_assert_eq!(faulty, expected);
        }
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let client = client(ClientConfig::default());
        client.lookup_client(&bookie("b1")).unwrap();
        client.close();
        client.close();
        assert!(client.is_closed());
        assert!(client.pools.is_empty());
        assert!(client.get_faulty_bookies().is_empty());
    }
}
