//! Ledger manager: id allocation and metadata persistence.
//!
//! [`LedgerManager`] is the seam to the metadata store. [`MemoryLedgerManager`]
//! keeps encoded records in memory and supports failure injection for tests.

use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
};

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use quire_types::{LedgerId, codec};
use tracing::debug;

use crate::{
    error::MetadataError,
    metadata::{LedgerMetadata, Version, Versioned},
};

/// Store of ledger ids and metadata.
pub trait LedgerManager: Send + Sync + fmt::Debug {
    /// Allocates a ledger id that has not been handed out before.
    fn allocate_ledger_id(&self) -> BoxFuture<'_, Result<LedgerId, MetadataError>>;

    /// Persists metadata for a new ledger.
    ///
    /// Fails with [`MetadataError::LedgerExists`] if `ledger_id` is taken.
    fn create_ledger_metadata(
        &self,
        ledger_id: LedgerId,
        metadata: LedgerMetadata,
    ) -> BoxFuture<'_, Result<Versioned<LedgerMetadata>, MetadataError>>;

    /// Reads the metadata of `ledger_id`.
    fn read_ledger_metadata(
        &self,
        ledger_id: LedgerId,
    ) -> BoxFuture<'_, Result<Versioned<LedgerMetadata>, MetadataError>>;

    /// Replaces the metadata of `ledger_id` if it is still at `expected`.
    fn write_ledger_metadata(
        &self,
        ledger_id: LedgerId,
        metadata: LedgerMetadata,
        expected: Version,
    ) -> BoxFuture<'_, Result<Versioned<LedgerMetadata>, MetadataError>>;

    /// Releases the manager. Later calls fail with
    /// [`MetadataError::MetaStore`].
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// In-memory ledger manager.
///
/// Records are stored encoded, as a remote store would hold them, so every
/// read returns an independent copy.
#[derive(Default)]
pub struct MemoryLedgerManager {
    next_id: AtomicI64,
    records: RwLock<HashMap<LedgerId, Versioned<Bytes>>>,
    /// One-shot failure for the next create.
    fail_next_create: Mutex<Option<MetadataError>>,
    fail_all: AtomicBool,
    create_attempts: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryLedgerManager {
    /// Creates an empty manager allocating ids from 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty manager allocating ids from `first`.
    #[must_use]
    pub fn starting_at(first: LedgerId) -> Self {
        Self { next_id: AtomicI64::new(first.value()), ..Self::default() }
    }

    /// Makes the next create fail with `error`.
    pub fn fail_next_create(&self, error: MetadataError) {
        *self.fail_next_create.lock() = Some(error);
    }

    /// Makes every operation fail with a store error while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_all.store(unavailable, Ordering::SeqCst);
    }

    /// Number of create calls received, including failed ones.
    #[must_use]
    pub fn create_attempts(&self) -> usize {
        self.create_attempts.load(Ordering::SeqCst)
    }

    /// Number of stored ledgers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether no ledger is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Whether metadata exists for `ledger_id`.
    #[must_use]
    pub fn contains(&self, ledger_id: LedgerId) -> bool {
        self.records.read().contains_key(&ledger_id)
    }

    fn check_available(&self) -> Result<(), MetadataError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MetadataError::MetaStore { message: "ledger manager is closed".into() });
        }
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(MetadataError::MetaStore { message: "metadata store unavailable".into() });
        }
        Ok(())
    }

    fn create_now(
        &self,
        ledger_id: LedgerId,
        metadata: LedgerMetadata,
    ) -> Result<Versioned<LedgerMetadata>, MetadataError> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if let Some(error) = self.fail_next_create.lock().take() {
            return Err(error);
        }
        let encoded = encode(&metadata)?;
        let mut records = self.records.write();
        if records.contains_key(&ledger_id) {
            return Err(MetadataError::LedgerExists { ledger_id });
        }
        records.insert(ledger_id, Versioned::new(encoded, Version::INITIAL));
        debug!(ledger_id = %ledger_id, "stored ledger metadata");
        Ok(Versioned::new(metadata, Version::INITIAL))
    }

    fn read_now(&self, ledger_id: LedgerId) -> Result<Versioned<LedgerMetadata>, MetadataError> {
        self.check_available()?;
        let records = self.records.read();
        let record = records.get(&ledger_id).ok_or(MetadataError::NoSuchLedger { ledger_id })?;
        Ok(Versioned::new(decode(&record.value)?, record.version))
    }

    fn write_now(
        &self,
        ledger_id: LedgerId,
        metadata: LedgerMetadata,
        expected: Version,
    ) -> Result<Versioned<LedgerMetadata>, MetadataError> {
        self.check_available()?;
        let encoded = encode(&metadata)?;
        let mut records = self.records.write();
        let record = records.get_mut(&ledger_id).ok_or(MetadataError::NoSuchLedger { ledger_id })?;
        if record.version != expected {
            return Err(MetadataError::BadVersion { ledger_id, expected, actual: record.version });
        }
        let version = record.version.next();
        *record = Versioned::new(encoded, version);
        Ok(Versioned::new(metadata, version))
    }
}

impl LedgerManager for MemoryLedgerManager {
    fn allocate_ledger_id(&self) -> BoxFuture<'_, Result<LedgerId, MetadataError>> {
        let result = self.check_available().and_then(|()| {
            self.next_id
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
                .map(LedgerId::new)
                .map_err(|_| MetadataError::IdOverflow)
        });
        futures::future::ready(result).boxed()
    }

    fn create_ledger_metadata(
        &self,
        ledger_id: LedgerId,
        metadata: LedgerMetadata,
    ) -> BoxFuture<'_, Result<Versioned<LedgerMetadata>, MetadataError>> {
        futures::future::ready(self.create_now(ledger_id, metadata)).boxed()
    }

    fn read_ledger_metadata(
        &self,
        ledger_id: LedgerId,
    ) -> BoxFuture<'_, Result<Versioned<LedgerMetadata>, MetadataError>> {
        futures::future::ready(self.read_now(ledger_id)).boxed()
    }

    fn write_ledger_metadata(
        &self,
        ledger_id: LedgerId,
        metadata: LedgerMetadata,
        expected: Version,
    ) -> BoxFuture<'_, Result<Versioned<LedgerMetadata>, MetadataError>> {
        futures::future::ready(self.write_now(ledger_id, metadata, expected)).boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        self.closed.store(true, Ordering::SeqCst);
        futures::future::ready(()).boxed()
    }
}

impl fmt::Debug for MemoryLedgerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLedgerManager")
            .field("ledgers", &self.len())
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

fn encode(metadata: &LedgerMetadata) -> Result<Bytes, MetadataError> {
    codec::encode(metadata)
        .map(Bytes::from)
        .map_err(|err| MetadataError::MetaStore { message: err.to_string() })
}

fn decode(bytes: &[u8]) -> Result<LedgerMetadata, MetadataError> {
    codec::decode(bytes).map_err(|err| MetadataError::MetaStore { message: err.to_string() })
}
