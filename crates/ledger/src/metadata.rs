//! Ledger metadata as persisted by the ledger manager.
//!
//! Metadata is fixed at creation except for the ensemble history (which only
//! grows) and the state/last-entry fields written when the ledger closes.

use std::{collections::BTreeMap, fmt};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use quire_types::{BookieId, EntryId, LedgerId, WriteFlags};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Prefix mixed into the master-key digest.
const MASTER_KEY_DOMAIN: &[u8] = b"ledger";

/// Checksum scheme entries are written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DigestType {
    /// CRC-32.
    #[default]
    Crc32,
    /// CRC-32C (Castagnoli).
    Crc32c,
    /// HMAC keyed by the ledger password.
    Mac,
    /// No checksum.
    Dummy,
}

/// Lifecycle state of a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LedgerState {
    /// Accepting appends.
    #[default]
    Open,
    /// Being recovered by a reader after the writer disappeared.
    InRecovery,
    /// Sealed; `last_entry_id` and `length` are final.
    Closed,
}

/// Version of a stored metadata record, bumped on every write.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Version of a freshly created record.
    pub const INITIAL: Self = Self(0);

    /// Creates a version from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Version that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A value together with the store version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// Stored value.
    pub value: T,
    /// Version of `value` in the store.
    pub version: Version,
}

impl<T> Versioned<T> {
    /// Pairs `value` with `version`.
    pub fn new(value: T, version: Version) -> Self {
        Self { value, version }
    }
}

/// Secret bound to a ledger on every bookie that stores it.
///
/// Derived from the ledger password as `SHA-256("ledger" || password)`.
#[derive(Clone, PartialEq, Eq)]
pub struct MasterKey(Bytes);

impl MasterKey {
    /// Derives the master key for `password`.
    #[must_use]
    pub fn generate(password: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(MASTER_KEY_DOMAIN);
        hasher.update(password);
        Self(Bytes::copy_from_slice(&hasher.finalize()))
    }

    /// Key bytes as sent to bookies.
    #[must_use]
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// Persisted description of one ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct LedgerMetadata {
    /// Ledger identifier.
    #[builder(default = LedgerId::INVALID)]
    pub ledger_id: LedgerId,
    /// Number of bookies the ledger is striped over.
    pub ensemble_size: u32,
    /// Bookies each entry is written to.
    pub write_quorum_size: u32,
    /// Acknowledgements required before an entry is confirmed.
    pub ack_quorum_size: u32,
    /// Checksum scheme.
    #[builder(default)]
    pub digest_type: DigestType,
    /// Ledger password; the master key is derived from it.
    #[builder(default)]
    pub password: Bytes,
    /// Flags applied to every write.
    #[builder(default)]
    pub write_flags: WriteFlags,
    /// Ensemble history keyed by the first entry each ensemble stores.
    #[builder(default)]
    pub ensembles: BTreeMap<EntryId, Vec<BookieId>>,
    /// Lifecycle state.
    #[builder(default)]
    pub state: LedgerState,
    /// Last entry of a closed ledger, [`EntryId::INVALID`] otherwise.
    #[builder(default = EntryId::INVALID)]
    pub last_entry_id: EntryId,
    /// Total payload bytes of a closed ledger.
    #[builder(default)]
    pub length: u64,
    /// Creation time, when recorded.
    pub ctime: Option<DateTime<Utc>>,
    /// Application-defined properties.
    #[builder(default)]
    pub custom_metadata: BTreeMap<String, Bytes>,
}

impl LedgerMetadata {
    /// Ensemble that stores `entry_id`.
    #[must_use]
    pub fn ensemble_at(&self, entry_id: EntryId) -> Option<&[BookieId]> {
        self.ensembles.range(..=entry_id).next_back().map(|(_, ensemble)| ensemble.as_slice())
    }

    /// Ensemble new entries are written to.
    #[must_use]
    pub fn current_ensemble(&self) -> Option<&[BookieId]> {
        self.ensembles.last_key_value().map(|(_, ensemble)| ensemble.as_slice())
    }

    /// Whether the ledger has been sealed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == LedgerState::Closed
    }

    /// Returns a copy sealed at `last_entry_id` with `length` bytes.
    #[must_use]
    pub fn closed_at(&self, last_entry_id: EntryId, length: u64) -> Self {
        Self { state: LedgerState::Closed, last_entry_id, length, ..self.clone() }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn bookies(names: &[&str]) -> Vec<BookieId> {
        names.iter().map(|name| BookieId::parse(name).unwrap()).collect()
    }

    #[test]
    fn master_key_is_deterministic_per_password() {
        let first = MasterKey::generate(b"secret");
        assert_eq!(first, MasterKey::generate(b"secret"));
        assert_ne!(first, MasterKey::generate(b"other"));
        assert_eq!(first.as_bytes().len(), 32);
        // The domain prefix keeps the key distinct from a bare digest.
        let bare: [u8; 32] = Sha256::digest(b"secret").into();
        assert_ne!(first.as_bytes().as_ref(), bare.as_slice());
        assert_eq!(format!("{first:?}"), "MasterKey(<redacted>)");
    }

    #[test]
    fn ensemble_lookup_follows_history() {
        let mut ensembles = BTreeMap::new();
        ensembles.insert(EntryId::new(0), bookies(&["a:1", "b:1", "c:1"]));
        ensembles.insert(EntryId::new(10), bookies(&["a:1", "d:1", "c:1"]));
        let metadata = LedgerMetadata::builder()
            .ensemble_size(3)
            .write_quorum_size(2)
            .ack_quorum_size(2)
            .ensembles(ensembles)
            .build();

        assert_eq!(metadata.ensemble_at(EntryId::new(9)).unwrap()[1].as_str(), "b:1");
        assert_eq!(metadata.ensemble_at(EntryId::new(10)).unwrap()[1].as_str(), "d:1");
        assert_eq!(metadata.current_ensemble().unwrap()[1].as_str(), "d:1");
        assert!(metadata.ensemble_at(EntryId::new(-1)).is_none());
    }

    #[test]
    fn closing_keeps_everything_else() {
        let metadata = LedgerMetadata::builder()
            .ledger_id(LedgerId::new(4))
            .ensemble_size(1)
            .write_quorum_size(1)
            .ack_quorum_size(1)
            .build();
        assert!(!metadata.is_closed());
        assert_eq!(metadata.last_entry_id, EntryId::INVALID);

        let closed = metadata.closed_at(EntryId::new(7), 128);
        assert!(closed.is_closed());
        assert_eq!(closed.last_entry_id, EntryId::new(7));
        assert_eq!(closed.length, 128);
        assert_eq!(closed.ledger_id, metadata.ledger_id);
    }

    #[test]
    fn versions_advance() {
        assert_eq!(Version::INITIAL.next(), Version::new(1));
        assert_eq!(Version::new(3).to_string(), "v3");
    }
}
