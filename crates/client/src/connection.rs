//! One physical connection to a bookie.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──first request──▶ Connecting ──▶ Connected
//!      ▲                              │              │
//!      └────── connect failure ───────┘              │
//!      └──────────────── I/O error ──────────────────┘
//! any state ──close()──▶ Closed
//! ```
//!
//! Connections are established lazily. Requests issued while connecting are
//! queued and flushed once the socket is up. Every request is registered in
//! the in-flight table before its frame is queued, and leaves the table
//! exactly once: on its response, on timeout, on disconnect, or on close.

use std::{
    collections::VecDeque,
    fmt, io, mem,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use quire_types::{
    BookieId, LedgerId, OperationType, ProtocolVersion, Request, RequestBody, RequestKey,
    Response, ResponseBody, ResultCode, codec, config::ClientConfig,
};
use snafu::ResultExt;
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    runtime::Handle,
    sync::{Notify, mpsc},
    task::AbortHandle,
};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::{
    completion::{Completion, deliver},
    error::{ConnectSnafu, Result},
    executor::OrderedExecutor,
    fault::ErrorCounter,
    resolver::{BookieAddressResolver, SecurityHandlerFactory},
};

/// Observable state of a [`BookieConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; the next request starts a connect.
    Disconnected,
    /// A connect is in progress; requests are queued.
    Connecting,
    /// The socket is up.
    Connected,
    /// Closed for good.
    Closed,
}

/// Dependencies shared by every connection a client creates.
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub(crate) config: Arc<ClientConfig>,
    pub(crate) executor: Arc<OrderedExecutor>,
    pub(crate) resolver: Arc<dyn BookieAddressResolver>,
    pub(crate) runtime: Handle,
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("resolver", &self.resolver)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

/// A request waiting for its response.
struct PendingOp {
    key: RequestKey,
    completion: Completion,
    deadline: Instant,
}

enum Link {
    Idle,
    Connecting { generation: u64, queued: Vec<Bytes> },
    Connected { generation: u64, frames: mpsc::UnboundedSender<Bytes>, reader: AbortHandle },
    Closed,
}

/// Handle to one physical connection. Cheap to clone.
#[derive(Clone)]
pub struct BookieConnection {
    inner: Arc<Inner>,
}

struct Inner {
    bookie: BookieId,
    ctx: ConnectionContext,
    version: ProtocolVersion,
    security: Option<Arc<dyn SecurityHandlerFactory>>,
    errors: Arc<ErrorCounter>,
    link: Mutex<Link>,
    generation: AtomicU64,
    next_txn_id: AtomicU64,
    pending: DashMap<RequestKey, VecDeque<PendingOp>>,
    pending_write_bytes: AtomicUsize,
    drained: Notify,
}

impl BookieConnection {
    pub(crate) fn new(
        bookie: BookieId,
        ctx: ConnectionContext,
        errors: Arc<ErrorCounter>,
        security: Option<Arc<dyn SecurityHandlerFactory>>,
        version: ProtocolVersion,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                bookie,
                ctx,
                version,
                security,
                errors,
                link: Mutex::new(Link::Idle),
                generation: AtomicU64::new(0),
                next_txn_id: AtomicU64::new(1),
                pending: DashMap::new(),
                pending_write_bytes: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
        }
    }

    /// Bookie this connection talks to.
    #[must_use]
    pub fn bookie(&self) -> &BookieId {
        &self.inner.bookie
    }

    /// Protocol revision used for requests on this connection.
    #[must_use]
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.inner.version
    }

    /// Name of the security protocol this connection was created with.
    #[must_use]
    pub fn security_protocol(&self) -> Option<&str> {
        self.inner.security.as_deref().map(SecurityHandlerFactory::protocol_name)
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        match &*self.inner.link.lock() {
            Link::Idle => ConnectionState::Disconnected,
            Link::Connecting { .. } => ConnectionState::Connecting,
            Link::Connected { .. } => ConnectionState::Connected,
            Link::Closed => ConnectionState::Closed,
        }
    }

    /// Whether new requests can be written without piling up.
    ///
    /// A connected socket is writable while its unflushed bytes stay below the
    /// configured high-water mark. A connection that is not up yet reports the
    /// configured default; a closed one is never writable.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        let config = &self.inner.ctx.config;
        match &*self.inner.link.lock() {
            Link::Connected { .. } => {
                self.inner.pending_write_bytes.load(Ordering::Acquire)
                    < config.write_buffer_high_water_mark
            },
            Link::Idle | Link::Connecting { .. } => config.writable_when_disconnected,
            Link::Closed => false,
        }
    }

    /// Bytes queued for the socket but not flushed yet.
    #[must_use]
    pub fn pending_write_bytes(&self) -> usize {
        self.inner.pending_write_bytes.load(Ordering::Acquire)
    }

    /// Requests for `ledger_id` awaiting a response.
    #[must_use]
    pub fn num_pending(&self, ledger_id: LedgerId) -> u64 {
        self.inner
            .pending
            .iter()
            .filter(|entry| entry.key().ledger_id == ledger_id)
            .map(|entry| entry.value().len() as u64)
            .sum()
    }

    /// Requests awaiting a response across all ledgers.
    #[must_use]
    pub fn total_pending(&self) -> u64 {
        self.inner.pending.iter().map(|entry| entry.value().len() as u64).sum()
    }

    /// Waits until at most `limit` requests for `ledger_id` are in flight.
    pub async fn wait_pending_at_most(&self, ledger_id: LedgerId, limit: u64) {
        loop {
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.num_pending(ledger_id) <= limit {
                return;
            }
            notified.await;
        }
    }

    /// Registers and queues a request.
    ///
    /// Returns the completion and the code to fail it with when the request
    /// cannot be queued at all; the caller decides where to complete it.
    pub(crate) fn send(
        &self,
        body: RequestBody,
        completion: Completion,
    ) -> Option<(Completion, ResultCode)> {
        let inner = &self.inner;
        let txn_id = match inner.version {
            ProtocolVersion::V2 => 0,
            ProtocolVersion::V3 => inner.next_txn_id.fetch_add(1, Ordering::Relaxed),
        };
        let request = Request { version: inner.version, txn_id, body };
        let key = request.key();

        let frame = match codec::encode_request(&request, inner.ctx.config.max_frame_size) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(
                    bookie = %inner.bookie,
                    ledger_id = %key.ledger_id,
                    error = %err,
                    "failed to encode request"
                );
                let rc = if key.op.is_write() {
                    ResultCode::WriteException
                } else {
                    ResultCode::ReadException
                };
                return Some((completion, rc));
            },
        };
        let deadline = Instant::now() + inner.timeout_for(key.op);

        let mut link = inner.link.lock();
        match &mut *link {
            Link::Closed => return Some((completion, ResultCode::ClientClosed)),
            Link::Connected { frames, .. } => {
                inner.register(key, completion, deadline);
                inner.pending_write_bytes.fetch_add(frame.len(), Ordering::AcqRel);
                // A failed send means the writer already exited; its disconnect
                // handling fails the op just registered.
                let _ = frames.send(frame);
            },
            Link::Connecting { queued, .. } => {
                inner.register(key, completion, deadline);
                queued.push(frame);
            },
            Link::Idle => {
                inner.register(key, completion, deadline);
                let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
                *link = Link::Connecting { generation, queued: vec![frame] };
                debug!(bookie = %inner.bookie, generation, "connecting to bookie");
                inner.ctx.runtime.spawn(Arc::clone(inner).connect(generation));
            },
        }
        None
    }

    /// Fails every request whose deadline is at or before `now` with
    /// [`ResultCode::Timeout`]. Returns the number of requests timed out.
    pub fn check_timeouts(&self, now: Instant) -> usize {
        let inner = &self.inner;
        let mut expired = Vec::new();
        for mut entry in inner.pending.iter_mut() {
            let queue = entry.value_mut();
            while queue.front().is_some_and(|op| op.deadline <= now) {
                if let Some(op) = queue.pop_front() {
                    expired.push(op);
                }
            }
        }
        inner.pending.retain(|_, queue| !queue.is_empty());

        let count = expired.len();
        for op in expired {
            warn!(
                bookie = %inner.bookie,
                ledger_id = %op.key.ledger_id,
                entry_id = %op.key.entry_id,
                op = ?op.key.op,
                "request timed out"
            );
            inner.complete(op, ResultCode::Timeout, ResponseBody::Empty);
        }
        if count > 0 {
            inner.drained.notify_waiters();
        }
        count
    }

    /// Closes the connection and fails outstanding requests with
    /// [`ResultCode::ClientClosed`]. Idempotent.
    pub fn close(&self) {
        let inner = &self.inner;
        let failed = {
            let mut link = inner.link.lock();
            match mem::replace(&mut *link, Link::Closed) {
                Link::Closed => return,
                Link::Connected { reader, .. } => reader.abort(),
                Link::Idle | Link::Connecting { .. } => {},
            }
            inner.pending_write_bytes.store(0, Ordering::Release);
            inner.drain_pending()
        };
        debug!(bookie = %inner.bookie, failed = failed.len(), "connection closed");
        inner.fail_all(failed, ResultCode::ClientClosed);
    }
}

impl fmt::Debug for BookieConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BookieConnection")
            .field("bookie", &self.inner.bookie)
            .field("version", &self.inner.version)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn timeout_for(&self, op: OperationType) -> Duration {
        if op.is_write() {
            self.ctx.config.add_entry_timeout
        } else {
            self.ctx.config.read_entry_timeout
        }
    }

    fn register(&self, key: RequestKey, completion: Completion, deadline: Instant) {
        self.pending.entry(key).or_default().push_back(PendingOp { key, completion, deadline });
    }

    /// Removes the oldest request registered under `key`.
    fn take_pending(&self, key: &RequestKey) -> Option<PendingOp> {
        let op = {
            let mut queue = self.pending.get_mut(key)?;
            queue.pop_front()
        };
        self.pending.remove_if(key, |_, queue| queue.is_empty());
        op
    }

    fn drain_pending(&self) -> Vec<PendingOp> {
        let keys: Vec<RequestKey> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut ops = Vec::new();
        for key in keys {
            if let Some((_, queue)) = self.pending.remove(&key) {
                ops.extend(queue);
            }
        }
        ops
    }

    fn complete(&self, op: PendingOp, rc: ResultCode, body: ResponseBody) {
        if rc.counts_as_bookie_error() {
            self.errors.record_error();
        }
        deliver(&self.ctx.executor, op.key.ledger_id, op.completion, rc, body);
    }

    fn fail_all(&self, ops: Vec<PendingOp>, rc: ResultCode) {
        for op in ops {
            self.complete(op, rc, ResponseBody::Empty);
        }
        self.drained.notify_waiters();
    }

    async fn connect(self: Arc<Self>, generation: u64) {
        match self.establish().await {
            Ok(stream) => self.on_connected(stream, generation),
            Err(err) => {
                warn!(bookie = %self.bookie, error = %err, "could not connect to bookie");
                self.on_disconnected(generation);
            },
        }
    }

    async fn establish(&self) -> Result<TcpStream> {
        let timeout = self.ctx.config.connect_timeout;
        let timed_out = || io::Error::new(io::ErrorKind::TimedOut, "connect timed out");

        let addr = tokio::time::timeout(timeout, self.ctx.resolver.resolve(&self.bookie))
            .await
            .map_err(|_| timed_out())
            .and_then(|resolved| resolved)
            .context(ConnectSnafu { bookie: self.bookie.clone() })?;
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| timed_out())
            .and_then(|connected| connected)
            .context(ConnectSnafu { bookie: self.bookie.clone() })?;
        stream.set_nodelay(true).context(ConnectSnafu { bookie: self.bookie.clone() })?;
        Ok(stream)
    }

    fn on_connected(self: Arc<Self>, stream: TcpStream, generation: u64) {
        let mut link = self.link.lock();
        let queued = match &mut *link {
            Link::Connecting { generation: current, queued } if *current == generation => {
                mem::take(queued)
            },
            // Closed, or superseded while connecting; dropping the stream closes it.
            _ => return,
        };

        let codec = codec::frame_codec(self.ctx.config.max_frame_size);
        let (read_half, write_half) = stream.into_split();
        let (frames, outbound) = mpsc::unbounded_channel();
        for frame in queued {
            self.pending_write_bytes.fetch_add(frame.len(), Ordering::AcqRel);
            let _ = frames.send(frame);
        }

        let reader = self.ctx.runtime.spawn(Arc::clone(&self).read_loop(
            FramedRead::new(read_half, codec.clone()),
            generation,
        ));
        self.ctx.runtime.spawn(Arc::clone(&self).write_loop(
            FramedWrite::new(write_half, codec),
            outbound,
            generation,
        ));
        *link = Link::Connected { generation, frames, reader: reader.abort_handle() };
        drop(link);

        info!(
            bookie = %self.bookie,
            version = ?self.version,
            security = ?self.security.as_deref().map(SecurityHandlerFactory::protocol_name),
            "connected to bookie"
        );
    }

    async fn read_loop(
        self: Arc<Self>,
        mut frames: FramedRead<OwnedReadHalf, LengthDelimitedCodec>,
        generation: u64,
    ) {
        while let Some(frame) = frames.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(bookie = %self.bookie, error = %err, "read from bookie failed");
                    break;
                },
            };
            match codec::decode_response(&frame) {
                Ok(response) => self.on_response(response),
                Err(err) => {
                    warn!(bookie = %self.bookie, error = %err, "undecodable response from bookie");
                    break;
                },
            }
        }
        self.on_disconnected(generation);
    }

    async fn write_loop(
        self: Arc<Self>,
        mut sink: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
        mut outbound: mpsc::UnboundedReceiver<Bytes>,
        generation: u64,
    ) {
        while let Some(frame) = outbound.recv().await {
            let len = frame.len();
            let result = sink.send(frame).await;
            let _ = self.pending_write_bytes.fetch_update(
                Ordering::AcqRel,
                Ordering::Acquire,
                |bytes| Some(bytes.saturating_sub(len)),
            );
            if let Err(err) = result {
                warn!(bookie = %self.bookie, error = %err, "write to bookie failed");
                self.on_disconnected(generation);
                return;
            }
        }
        let _ = SinkExt::<Bytes>::close(&mut sink).await;
    }

    fn on_response(&self, response: Response) {
        let key = response.key();
        let Some(op) = self.take_pending(&key) else {
            debug!(
                bookie = %self.bookie,
                ledger_id = %key.ledger_id,
                entry_id = %key.entry_id,
                op = ?key.op,
                "dropping response with no pending request"
            );
            return;
        };
        let rc = response.status.to_result_code(response.op);
        debug!(
            bookie = %self.bookie,
            ledger_id = %key.ledger_id,
            entry_id = %key.entry_id,
            rc = %rc,
            "request completed"
        );
        self.complete(op, rc, response.body);
        self.drained.notify_waiters();
    }

    /// Drops the socket of `generation` and fails its requests with
    /// [`ResultCode::BookieHandleNotAvailable`].
    fn on_disconnected(&self, generation: u64) {
        let failed = {
            let mut link = self.link.lock();
            let current = match &*link {
                Link::Connecting { generation: g, .. } | Link::Connected { generation: g, .. } => {
                    *g == generation
                },
                Link::Idle | Link::Closed => false,
            };
            if !current {
                return;
            }
            if let Link::Connected { reader, .. } = &*link {
                reader.abort();
            }
            *link = Link::Idle;
            self.pending_write_bytes.store(0, Ordering::Release);
            self.drain_pending()
        };
        if !failed.is_empty() {
            warn!(bookie = %self.bookie, failed = failed.len(), "bookie connection lost");
        }
        self.fail_all(failed, ResultCode::BookieHandleNotAvailable);
    }
}
