//! In-process mock bookie for client integration testing.
//!
//! [`MockBookie`] serves the bookie wire protocol over TCP on an ephemeral
//! localhost port. Its identity is the `host:port` it listens on, so the
//! default [`HostPortResolver`](crate::HostPortResolver) reaches it.
//!
//! # Features
//!
//! - **Entry storage**: appends, reads, explicit LAC, entry listing
//! - **Master key binding**: the first write binds a ledger's key; later
//!   writes with a different key get `Unauthorized`
//! - **Fencing and read-only mode**
//! - **Failure injection**: per-operation status overrides, response delay,
//!   dropped responses
//! - **Request counting** for verification
//!
//! # Example
//!
//! ```no_run
//! use quire_client::{BookieClient, mock::MockBookie};
//! use quire_types::{AddFlags, EntryId, LedgerId, WriteFlags};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bookie = MockBookie::start().await?;
//! let client = BookieClient::builder().build()?;
//!
//! client
//!     .add_entry_async(
//!         bookie.id(),
//!         LedgerId::new(1),
//!         bytes::Bytes::from_static(b"key"),
//!         EntryId::new(0),
//!         bytes::Bytes::from_static(b"hello"),
//!         AddFlags::empty(),
//!         WriteFlags::empty(),
//!     )?
//!     .await
//!     .map_err(|rc| rc.to_string())?;
//! # Ok(())
//! # }
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use quire_types::{
    AddFlags, BookieId, EntryId, LedgerId, OperationType, ReadFlags, Request, RequestBody,
    Response, ResponseBody, StatusCode, codec,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::{codec::Framed, sync::CancellationToken};
use tracing::{debug, warn};

/// Frame limit of the mock's codec.
const MAX_FRAME_SIZE: usize = 5 * 1024 * 1024;

/// Ledger state held by the mock.
#[derive(Debug, Default)]
struct LedgerData {
    master_key: Bytes,
    entries: BTreeMap<EntryId, Bytes>,
    lac: Option<(EntryId, Bytes)>,
    fenced: bool,
}

/// Shared state for the mock bookie.
#[derive(Debug, Default)]
struct MockState {
    ledgers: RwLock<HashMap<LedgerId, LedgerData>>,

    /// Status returned for every request of an operation, instead of
    /// processing it.
    injected: RwLock<HashMap<OperationType, StatusCode>>,

    read_only: AtomicBool,

    /// Delay before each response (milliseconds)
    delay_ms: AtomicU64,

    /// Process requests but never answer them.
    drop_responses: AtomicBool,

    /// Total requests received
    request_count: AtomicUsize,

    /// Total add requests received
    add_count: AtomicUsize,

    /// Total read requests received
    read_count: AtomicUsize,
}

impl MockState {
    fn handle(&self, request: &Request) -> Response {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        let op = request.body.op();
        match op {
            OperationType::AddEntry => self.add_count.fetch_add(1, Ordering::SeqCst),
            OperationType::ReadEntry => self.read_count.fetch_add(1, Ordering::SeqCst),
            _ => 0,
        };

        if let Some(status) = self.injected.read().get(&op).copied() {
            return Response::for_request(request, status);
        }

        let (status, body) = self.process(&request.body);
        Response::for_request(request, status).with_body(body)
    }

    fn process(&self, body: &RequestBody) -> (StatusCode, ResponseBody) {
        let read_only = self.read_only.load(Ordering::SeqCst);
        match body {
            RequestBody::AddEntry { ledger_id, entry_id, master_key, flags, payload, .. } => {
                if read_only {
                    return (StatusCode::ReadOnly, ResponseBody::Empty);
                }
                let mut ledgers = self.ledgers.write();
                let ledger = ledgers.entry(*ledger_id).or_insert_with(|| LedgerData {
                    master_key: master_key.clone(),
                    ..Default::default()
                });
                if ledger.master_key != *master_key {
                    return (StatusCode::Unauthorized, ResponseBody::Empty);
                }
                if ledger.fenced && !flags.contains(AddFlags::RECOVERY_ADD) {
                    return (StatusCode::Fenced, ResponseBody::Empty);
                }
                ledger.entries.insert(*entry_id, payload.clone());
                (StatusCode::Ok, ResponseBody::Empty)
            },
            RequestBody::ReadEntry { ledger_id, entry_id, flags, master_key } => {
                let mut ledgers = self.ledgers.write();
                let Some(ledger) = ledgers.get_mut(ledger_id) else {
                    return (StatusCode::NoLedger, ResponseBody::Empty);
                };
                if flags.contains(ReadFlags::FENCE_LEDGER) {
                    if master_key.as_ref() != Some(&ledger.master_key) {
                        return (StatusCode::Unauthorized, ResponseBody::Empty);
                    }
                    ledger.fenced = true;
                }
                let last_add_confirmed =
                    ledger.lac.as_ref().map_or(EntryId::INVALID, |(lac, _)| *lac);
                match ledger.entries.get(entry_id) {
                    Some(data) => (
                        StatusCode::Ok,
                        ResponseBody::ReadEntry { data: data.clone(), last_add_confirmed },
                    ),
                    None => (StatusCode::NoEntry, ResponseBody::Empty),
                }
            },
            RequestBody::WriteLac { ledger_id, lac, master_key, payload } => {
                if read_only {
                    return (StatusCode::ReadOnly, ResponseBody::Empty);
                }
                let mut ledgers = self.ledgers.write();
                let ledger = ledgers.entry(*ledger_id).or_insert_with(|| LedgerData {
                    master_key: master_key.clone(),
                    ..Default::default()
                });
                if ledger.master_key != *master_key {
                    return (StatusCode::Unauthorized, ResponseBody::Empty);
                }
                ledger.lac = Some((*lac, payload.clone()));
                (StatusCode::Ok, ResponseBody::Empty)
            },
            RequestBody::ReadLac { ledger_id } => {
                let ledgers = self.ledgers.read();
                match ledgers.get(ledger_id) {
                    None => (StatusCode::NoLedger, ResponseBody::Empty),
                    Some(LedgerData { lac: None, .. }) => {
                        (StatusCode::NoEntry, ResponseBody::Empty)
                    },
                    Some(LedgerData { lac: Some((lac, buffer)), .. }) => (
                        StatusCode::Ok,
                        ResponseBody::ReadLac { lac_buffer: buffer.clone(), lac: *lac },
                    ),
                }
            },
            // Entries are held in memory, so a force has nothing to flush.
            RequestBody::ForceLedger { .. } => {
                if read_only {
                    (StatusCode::ReadOnly, ResponseBody::Empty)
                } else {
                    (StatusCode::Ok, ResponseBody::Empty)
                }
            },
            RequestBody::GetListOfEntriesOfLedger { ledger_id } => {
                match self.ledgers.read().get(ledger_id) {
                    None => (StatusCode::NoLedger, ResponseBody::Empty),
                    Some(ledger) => (
                        StatusCode::Ok,
                        ResponseBody::ListOfEntries {
                            entries: ledger.entries.keys().copied().collect(),
                        },
                    ),
                }
            },
        }
    }
}

/// Controllable in-process bookie.
pub struct MockBookie {
    state: Arc<MockState>,
    id: BookieId,
    addr: SocketAddr,
    shutdown: CancellationToken,
}

impl MockBookie {
    /// Starts a mock bookie on an ephemeral localhost port.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if binding fails.
    pub async fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(MockState::default());
        let shutdown = CancellationToken::new();

        tokio::spawn(accept_loop(listener, Arc::clone(&state), shutdown.clone()));
        debug!(addr = %addr, "mock bookie listening");

        Ok(Self { state, id: BookieId::from_socket_addr(addr), addr, shutdown })
    }

    /// Identity clients use to reach this bookie.
    #[must_use]
    pub fn id(&self) -> &BookieId {
        &self.id
    }

    /// Listening address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Makes every request of `op` answer with `status` until cleared.
    pub fn inject_status(&self, op: OperationType, status: StatusCode) {
        self.state.injected.write().insert(op, status);
    }

    /// Removes every injected status.
    pub fn clear_injected(&self) {
        self.state.injected.write().clear();
    }

    /// Rejects writes with `ReadOnly` while set.
    pub fn set_read_only(&self, read_only: bool) {
        self.state.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Delays every response. Zero disables the delay.
    pub fn inject_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.state.delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Stops answering requests (they are still processed) while set.
    pub fn drop_responses(&self, drop: bool) {
        self.state.drop_responses.store(drop, Ordering::SeqCst);
    }

    /// Fences `ledger_id` so that non-recovery appends fail.
    pub fn fence(&self, ledger_id: LedgerId) {
        if let Some(ledger) = self.state.ledgers.write().get_mut(&ledger_id) {
            ledger.fenced = true;
        }
    }

    /// Stored payload of one entry.
    #[must_use]
    pub fn entry(&self, ledger_id: LedgerId, entry_id: EntryId) -> Option<Bytes> {
        self.state.ledgers.read().get(&ledger_id)?.entries.get(&entry_id).cloned()
    }

    /// Number of entries stored for `ledger_id`.
    #[must_use]
    pub fn entry_count(&self, ledger_id: LedgerId) -> usize {
        self.state.ledgers.read().get(&ledger_id).map_or(0, |ledger| ledger.entries.len())
    }

    /// Explicit LAC stored for `ledger_id`.
    #[must_use]
    pub fn lac(&self, ledger_id: LedgerId) -> Option<EntryId> {
        self.state.ledgers.read().get(&ledger_id)?.lac.as_ref().map(|(lac, _)| *lac)
    }

    /// Returns the total number of requests received.
    pub fn request_count(&self) -> usize {
        self.state.request_count.load(Ordering::SeqCst)
    }

    /// Returns the total number of add requests received.
    pub fn add_count(&self) -> usize {
        self.state.add_count.load(Ordering::SeqCst)
    }

    /// Returns the total number of read requests received.
    pub fn read_count(&self) -> usize {
        self.state.read_count.load(Ordering::SeqCst)
    }

    /// Stops listening and drops every open connection.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for MockBookie {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<MockState>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "mock bookie accepted connection");
                    tokio::spawn(serve(stream, Arc::clone(&state), shutdown.clone()));
                },
                Err(err) => {
                    warn!(error = %err, "mock bookie accept failed");
                    break;
                },
            },
        }
    }
}

async fn serve(stream: TcpStream, state: Arc<MockState>, shutdown: CancellationToken) {
    let _ = stream.set_nodelay(true);
    let mut framed = Framed::new(stream, codec::frame_codec(MAX_FRAME_SIZE));
    loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => return,
            frame = framed.next() => frame,
        };
        let Some(Ok(frame)) = frame else { return };
        let request = match codec::decode_request(&frame) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "mock bookie received undecodable request");
                return;
            },
        };

        let response = state.handle(&request);

        let delay = state.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep(Duration::from_millis(delay)) => {},
            }
        }
        if state.drop_responses.load(Ordering::SeqCst) {
            continue;
        }

        let encoded = match codec::encode_response(&response, MAX_FRAME_SIZE) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "mock bookie failed to encode response");
                return;
            },
        };
        if framed.send(encoded).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use quire_types::{ProtocolVersion, WriteFlags};

    use super::*;

    fn request(body: RequestBody) -> Request {
        Request { version: ProtocolVersion::V3, txn_id: 1, body }
    }

    fn add(ledger: i64, entry: i64, key: &'static [u8]) -> Request {
        request(RequestBody::AddEntry {
            ledger_id: LedgerId::new(ledger),
            entry_id: EntryId::new(entry),
            master_key: Bytes::from_static(key),
            flags: AddFlags::empty(),
            write_flags: WriteFlags::empty(),
            payload: Bytes::from_static(b"payload"),
        })
    }

    #[test]
    fn first_write_binds_master_key() {
        let state = MockState::default();
        assert_eq!(state.handle(&add(1, 0, b"right")).status, StatusCode::Ok);
        assert_eq!(state.handle(&add(1, 1, b"wrong")).status, StatusCode::Unauthorized);

        let lac = request(RequestBody::WriteLac {
            ledger_id: LedgerId::new(1),
            lac: EntryId::new(0),
            master_key: Bytes::from_static(b"wrong"),
            payload: Bytes::from_static(b"lac"),
        });
        assert_eq!(state.handle(&lac).status, StatusCode::Unauthorized);
    }

    #[test]
    fn fenced_ledger_rejects_plain_appends() {
        let state = MockState::default();
        state.handle(&add(2, 0, b"k"));

        let fence = request(RequestBody::ReadEntry {
            ledger_id: LedgerId::new(2),
            entry_id: EntryId::new(0),
            flags: ReadFlags::FENCE_LEDGER,
            master_key: Some(Bytes::from_static(b"k")),
        });
        assert_eq!(state.handle(&fence).status, StatusCode::Ok);
        assert_eq!(state.handle(&add(2, 1, b"k")).status, StatusCode::Fenced);
    }

    #[test]
    fn missing_ledger_and_entry_statuses() {
        let state = MockState::default();
        let read = |ledger, entry| {
            request(RequestBody::ReadEntry {
                ledger_id: LedgerId::new(ledger),
                entry_id: EntryId::new(entry),
                flags: ReadFlags::empty(),
                master_key: None,
            })
        };
        assert_eq!(state.handle(&read(9, 0)).status, StatusCode::NoLedger);
        state.handle(&add(9, 0, b"k"));
        assert_eq!(state.handle(&read(9, 5)).status, StatusCode::NoEntry);
        assert_eq!(state.read_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn injected_status_overrides_processing() {
        let state = MockState::default();
        state.injected.write().insert(OperationType::AddEntry, StatusCode::TooManyRequests);
        assert_eq!(state.handle(&add(1, 0, b"k")).status, StatusCode::TooManyRequests);
        assert!(state.ledgers.read().is_empty());
    }

    #[test]
    fn read_only_rejects_writes() {
        let state = MockState::default();
        state.read_only.store(true, Ordering::SeqCst);
        assert_eq!(state.handle(&add(1, 0, b"k")).status, StatusCode::ReadOnly);
    }

    #[tokio::test]
    async fn identity_is_listening_address() {
        let bookie = MockBookie::start().await.unwrap();
        assert_eq!(bookie.id().as_str(), bookie.addr().to_string());
        bookie.shutdown();
    }
}
