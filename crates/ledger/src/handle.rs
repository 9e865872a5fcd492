//! Read/write handle over one ledger.
//!
//! A writer stripes each entry over its write set and confirms it once the
//! ack quorum has acknowledged. Appends through one handle are serialized, so
//! the last-add-confirmed only ever moves forward by whole entries.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use futures::{
    FutureExt,
    future::{self, BoxFuture},
    stream::{FuturesUnordered, StreamExt},
};
use parking_lot::RwLock;
use quire_client::{BookieClient, OpResult};
use quire_types::{AddFlags, BookieId, EntryId, LedgerId, ReadFlags, ResultCode, WriteFlags};
use snafu::ResultExt;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::{
    distribution::{AckSet, RoundRobinDistributionSchedule},
    error::{ClientSnafu, LedgerError, MetadataSnafu, Result},
    manager::LedgerManager,
    metadata::{LedgerMetadata, MasterKey, Versioned},
};

/// What a handle may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandleMode {
    /// Appends with sequential, handle-assigned entry ids.
    Writer,
    /// Appends with caller-assigned entry ids.
    AdvertisedWriter,
    /// Reads only.
    Reader,
}

struct Inner {
    ledger_id: LedgerId,
    metadata: RwLock<Versioned<LedgerMetadata>>,
    schedule: RoundRobinDistributionSchedule,
    master_key: MasterKey,
    write_flags: WriteFlags,
    mode: HandleMode,
    bookie_client: Arc<BookieClient>,
    manager: Arc<dyn LedgerManager>,
    /// Held for the duration of every append and for close.
    next_entry: AsyncMutex<EntryId>,
    last_add_confirmed: AtomicI64,
    length: AtomicU64,
    closed: AtomicBool,
}

/// Handle to an open or closed ledger.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LedgerHandle {
    inner: Arc<Inner>,
}

impl LedgerHandle {
    pub(crate) fn new(
        bookie_client: Arc<BookieClient>,
        manager: Arc<dyn LedgerManager>,
        metadata: Versioned<LedgerMetadata>,
        mode: HandleMode,
    ) -> Self {
        let md = &metadata.value;
        let schedule = RoundRobinDistributionSchedule::new(
            md.ensemble_size as usize,
            md.write_quorum_size as usize,
            md.ack_quorum_size as usize,
        );
        let next_entry = if md.is_closed() { md.last_entry_id.next() } else { EntryId::new(0) };
        let inner = Inner {
            ledger_id: md.ledger_id,
            schedule,
            master_key: MasterKey::generate(&md.password),
            write_flags: md.write_flags,
            mode,
            bookie_client,
            manager,
            next_entry: AsyncMutex::new(next_entry),
            last_add_confirmed: AtomicI64::new(md.last_entry_id.value()),
            length: AtomicU64::new(md.length),
            closed: AtomicBool::new(md.is_closed()),
            metadata: RwLock::new(metadata),
        };
        Self { inner: Arc::new(inner) }
    }

    /// Ledger id.
    #[must_use]
    pub fn id(&self) -> LedgerId {
        self.inner.ledger_id
    }

    /// Snapshot of the ledger metadata as last read or written.
    #[must_use]
    pub fn metadata(&self) -> LedgerMetadata {
        self.inner.metadata.read().value.clone()
    }

    /// Bookies new entries are written to.
    #[must_use]
    pub fn ensemble(&self) -> Vec<BookieId> {
        self.inner.metadata.read().value.current_ensemble().map(<[_]>::to_vec).unwrap_or_default()
    }

    /// Highest entry confirmed through this handle, or [`EntryId::INVALID`].
    #[must_use]
    pub fn last_add_confirmed(&self) -> EntryId {
        EntryId::new(self.inner.last_add_confirmed.load(Ordering::Acquire))
    }

    /// Payload bytes confirmed through this handle.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.inner.length.load(Ordering::Acquire)
    }

    /// Flags applied to every write.
    #[must_use]
    pub fn write_flags(&self) -> WriteFlags {
        self.inner.write_flags
    }

    /// Whether the ledger is sealed or this handle was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Whether this handle was opened for reading only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.inner.mode == HandleMode::Reader
    }

    /// Whether entry ids are assigned by the caller.
    #[must_use]
    pub fn is_advertised(&self) -> bool {
        self.inner.mode == HandleMode::AdvertisedWriter
    }

    /// Appends `data` as the next entry and returns its id.
    ///
    /// # Errors
    ///
    /// Fails with `IllegalOp` on read-only and advertised handles,
    /// `LedgerClosed` after close, and the bookies' code when the ack quorum
    /// cannot be met.
    pub async fn add_entry(&self, data: Bytes) -> Result<EntryId> {
        self.check_mode(HandleMode::Writer)?;
        let mut next = self.inner.next_entry.lock().await;
        self.check_open()?;
        let entry_id = *next;
        self.write_entry(entry_id, data).await?;
        *next = entry_id.next();
        Ok(entry_id)
    }

    /// Appends `data` under a caller-chosen `entry_id`.
    ///
    /// # Errors
    ///
    /// Fails with `IllegalOp` unless the ledger was created with a
    /// caller-supplied id, `IncorrectParameter` for a negative entry id, and
    /// otherwise as [`add_entry`](Self::add_entry).
    pub async fn add_entry_with_id(&self, entry_id: EntryId, data: Bytes) -> Result<()> {
        self.check_mode(HandleMode::AdvertisedWriter)?;
        if !entry_id.is_valid() {
            return Err(self.failure(ResultCode::IncorrectParameter));
        }
        let _serialized = self.inner.next_entry.lock().await;
        self.check_open()?;
        self.write_entry(entry_id, data).await
    }

    /// Reads one confirmed entry from the first write-set member that has it.
    ///
    /// # Errors
    ///
    /// Fails with `IncorrectParameter` for a negative id, `ReadException` for
    /// an entry past the last-add-confirmed, and the last bookie's code when
    /// no member could serve it.
    pub async fn read_entry(&self, entry_id: EntryId) -> Result<Bytes> {
        if !entry_id.is_valid() {
            return Err(self.failure(ResultCode::IncorrectParameter));
        }
        if entry_id > self.last_add_confirmed() {
            return Err(self.failure(ResultCode::ReadException));
        }
        let bookies = self.write_set_bookies(entry_id);
        let mut last = ResultCode::ReadException;
        for bookie in &bookies {
            let read = self
                .inner
                .bookie_client
                .read_entry_async(bookie, self.id(), entry_id, ReadFlags::empty(), None)
                .context(ClientSnafu)?;
            match read.await {
                Ok(entry) => return Ok(entry.data),
                Err(rc) => {
                    debug!(
                        ledger_id = %self.id(),
                        entry_id = %entry_id,
                        bookie = %bookie,
                        rc = %rc,
                        "read failed, trying next replica"
                    );
                    last = rc;
                },
            }
        }
        Err(self.failure(last))
    }

    /// Refreshes the last-add-confirmed from the explicit LAC every ensemble
    /// member stores, and returns it.
    ///
    /// Bookies that hold no LAC are ignored. A sealed ledger answers from its
    /// metadata without contacting bookies.
    ///
    /// # Errors
    ///
    /// Fails only when the bookie client rejects a request locally.
    pub async fn read_last_add_confirmed(&self) -> Result<EntryId> {
        if self.inner.metadata.read().value.is_closed() {
            return Ok(self.last_add_confirmed());
        }
        let mut reads = Vec::new();
        for bookie in self.ensemble() {
            reads.push(
                self.inner.bookie_client.read_lac_async(&bookie, self.id()).context(ClientSnafu)?,
            );
        }
        let highest = future::join_all(reads)
            .await
            .into_iter()
            .filter_map(|result| result.ok().map(|lac| lac.lac))
            .max();
        if let Some(lac) = highest {
            self.inner.last_add_confirmed.fetch_max(lac.value(), Ordering::AcqRel);
        }
        Ok(self.last_add_confirmed())
    }

    /// Publishes this writer's last-add-confirmed to the ensemble.
    ///
    /// # Errors
    ///
    /// Fails with `IllegalOp` on read-only handles and the bookies' code when
    /// fewer than the ack quorum stored it.
    pub async fn write_last_add_confirmed(&self) -> Result<EntryId> {
        if self.is_read_only() {
            return Err(self.failure(ResultCode::IllegalOp));
        }
        let lac = self.last_add_confirmed();
        if !lac.is_valid() {
            return Ok(lac);
        }
        let payload = Bytes::copy_from_slice(&lac.value().to_be_bytes());
        let mut writes = Vec::new();
        for (index, bookie) in self.ensemble().iter().enumerate() {
            let write = self
                .inner
                .bookie_client
                .write_lac_async(
                    bookie,
                    self.id(),
                    self.inner.master_key.as_bytes().clone(),
                    lac,
                    payload.clone(),
                )
                .context(ClientSnafu)?;
            writes.push(tag(index, write));
        }
        let acks = self.inner.schedule.new_ack_set();
        await_quorum(writes, acks).await.map_err(|rc| self.failure(rc))?;
        Ok(lac)
    }

    /// Makes every confirmed entry of a deferred-sync ledger durable.
    ///
    /// # Errors
    ///
    /// Fails with `IllegalOp` unless the ledger was created with
    /// [`WriteFlags::DEFERRED_SYNC`], and with the first bookie failure.
    pub async fn force(&self) -> Result<()> {
        if self.is_read_only() || !self.inner.write_flags.contains(WriteFlags::DEFERRED_SYNC) {
            return Err(self.failure(ResultCode::IllegalOp));
        }
        let ensemble = self.ensemble();
        let mut forces = Vec::new();
        for (index, bookie) in ensemble.iter().enumerate() {
            let force = self
                .inner
                .bookie_client
                .force_ledger_async(bookie, self.id())
                .context(ClientSnafu)?;
            forces.push(tag(index, force));
        }
        await_quorum(forces, AckSet::new(ensemble.len())).await.map_err(|rc| self.failure(rc))
    }

    /// Seals the ledger at its last-add-confirmed. Idempotent.
    ///
    /// Waits for in-flight appends. Read-only handles close locally.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Metadata`] if the sealed metadata cannot be
    /// written. The handle is closed regardless.
    pub async fn close(&self) -> Result<()> {
        if self.is_read_only() {
            self.inner.closed.store(true, Ordering::Release);
            return Ok(());
        }
        let _serialized = self.inner.next_entry.lock().await;
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let (sealed, version) = {
            let current = self.inner.metadata.read();
            let sealed = current.value.closed_at(self.last_add_confirmed(), self.length());
            (sealed, current.version)
        };
        let written = self
            .inner
            .manager
            .write_ledger_metadata(self.id(), sealed, version)
            .await
            .context(MetadataSnafu)?;
        info!(
            ledger_id = %self.id(),
            last_entry_id = %written.value.last_entry_id,
            length = written.value.length,
            "ledger closed"
        );
        *self.inner.metadata.write() = written;
        Ok(())
    }

    async fn write_entry(&self, entry_id: EntryId, data: Bytes) -> Result<()> {
        let len = data.len() as u64;
        let ensemble = self.ensemble();
        let mut writes = Vec::new();
        for index in self.inner.schedule.write_set(entry_id) {
            let Some(bookie) = ensemble.get(index) else { continue };
            let write = self
                .inner
                .bookie_client
                .add_entry_async(
                    bookie,
                    self.id(),
                    self.inner.master_key.as_bytes().clone(),
                    entry_id,
                    data.clone(),
                    AddFlags::empty(),
                    self.inner.write_flags,
                )
                .context(ClientSnafu)?;
            writes.push(tag(index, write));
        }

        let acks = self.inner.schedule.new_ack_set();
        if let Err(rc) = await_quorum(writes, acks).await {
            warn!(ledger_id = %self.id(), entry_id = %entry_id, rc = %rc, "entry not confirmed");
            return Err(self.failure(rc));
        }
        self.inner.last_add_confirmed.fetch_max(entry_id.value(), Ordering::AcqRel);
        self.inner.length.fetch_add(len, Ordering::AcqRel);
        debug!(ledger_id = %self.id(), entry_id = %entry_id, "entry confirmed");
        Ok(())
    }

    fn write_set_bookies(&self, entry_id: EntryId) -> Vec<BookieId> {
        let metadata = self.inner.metadata.read();
        let Some(ensemble) = metadata.value.ensemble_at(entry_id) else { return Vec::new() };
        self.inner
            .schedule
            .write_set(entry_id)
            .into_iter()
            .filter_map(|index| ensemble.get(index).cloned())
            .collect()
    }

    fn check_mode(&self, required: HandleMode) -> Result<()> {
        if self.inner.mode == required {
            Ok(())
        } else {
            Err(self.failure(ResultCode::IllegalOp))
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() { Err(self.failure(ResultCode::LedgerClosed)) } else { Ok(()) }
    }

    fn failure(&self, rc: ResultCode) -> LedgerError {
        LedgerError::Operation { ledger_id: self.id(), rc }
    }
}

impl fmt::Debug for LedgerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerHandle")
            .field("ledger_id", &self.id())
            .field("mode", &self.inner.mode)
            .field("last_add_confirmed", &self.last_add_confirmed())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Pairs a per-bookie request with the ensemble index it was sent to.
fn tag<F>(index: usize, request: F) -> BoxFuture<'static, (usize, OpResult<()>)>
where
    F: Future<Output = OpResult<()>> + Send + 'static,
{
    request.map(move |result| (index, result)).boxed()
}

/// Waits until `acks` completes, or until it no longer can. Returns the
/// first failure in the latter case.
async fn await_quorum(
    requests: Vec<BoxFuture<'static, (usize, OpResult<()>)>>,
    mut acks: AckSet,
) -> std::result::Result<(), ResultCode> {
    let mut outstanding = requests.len();
    let mut pending: FuturesUnordered<_> = requests.into_iter().collect();
    let mut first_failure = None;

    while !acks.is_complete() {
        let Some((index, result)) = pending.next().await else { break };
        outstanding -= 1;
        match result {
            Ok(()) => {
                acks.complete_bookie_and_check(index);
            },
            Err(rc) => {
                first_failure.get_or_insert(rc);
                if outstanding < acks.missing() {
                    break;
                }
            },
        }
    }

    if acks.is_complete() {
        Ok(())
    } else {
        Err(first_failure.unwrap_or(ResultCode::NotEnoughBookies))
    }
}
