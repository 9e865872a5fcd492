//! Bookie RPC wire contract.
//!
//! Requests and responses are postcard-encoded (see [`crate::codec`]) and
//! carried in length-delimited frames. Each response echoes the request's
//! [`RequestKey`], which is how a connection matches it to the waiting
//! completion.

use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    ids::{EntryId, LedgerId},
    result_code::ResultCode,
};

/// Protocol revision spoken on a connection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, schemars::JsonSchema,
)]
pub enum ProtocolVersion {
    /// Completions are keyed by `(ledger, entry, operation)`; concurrent
    /// requests with the same key complete in FIFO order.
    V2,
    /// Completions are keyed by a per-connection transaction id.
    #[default]
    V3,
}

/// Kind of RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    /// Append one entry.
    AddEntry,
    /// Read one entry.
    ReadEntry,
    /// Store an explicit last-add-confirmed value.
    WriteLac,
    /// Read the explicit last-add-confirmed value.
    ReadLac,
    /// Persist all entries of a deferred-sync ledger.
    ForceLedger,
    /// List the entry ids stored for a ledger.
    GetListOfEntriesOfLedger,
}

impl OperationType {
    /// Whether the operation mutates bookie state.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::AddEntry | Self::WriteLac | Self::ForceLedger)
    }
}

/// Correlates an outbound request with its completion.
///
/// Under [`ProtocolVersion::V2`] `txn_id` is always zero, so two in-flight
/// requests for the same `(ledger, entry, op)` share a key. Under
/// [`ProtocolVersion::V3`] every request on a connection gets a fresh `txn_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    /// Per-connection transaction id (V3), or zero (V2).
    pub txn_id: u64,
    /// Target ledger.
    pub ledger_id: LedgerId,
    /// Target entry, or [`EntryId::INVALID`] for ledger-scoped operations.
    pub entry_id: EntryId,
    /// Operation kind.
    pub op: OperationType,
}

bitflags! {
    /// Flags chosen when a ledger is created. They apply to every write.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct WriteFlags: u8 {
        /// The bookie may acknowledge before entries are durable; durability
        /// is requested explicitly with a force call.
        const DEFERRED_SYNC = 0b0000_0001;
    }
}

bitflags! {
    /// Per-request flags for appends.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct AddFlags: u8 {
        /// The append is issued by ledger recovery and may write to a fenced ledger.
        const RECOVERY_ADD = 0b0000_0001;
    }
}

bitflags! {
    /// Per-request flags for reads.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ReadFlags: u8 {
        /// Fence the ledger so that no further non-recovery appends succeed.
        /// Requires the master key.
        const FENCE_LEDGER = 0b0000_0001;
    }
}

/// Outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Protocol revision this request was built for.
    pub version: ProtocolVersion,
    /// Transaction id (zero under V2).
    pub txn_id: u64,
    /// Operation payload.
    pub body: RequestBody,
}

/// Operation-specific request fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestBody {
    /// Append one entry.
    AddEntry {
        /// Target ledger.
        ledger_id: LedgerId,
        /// Entry being appended.
        entry_id: EntryId,
        /// Ledger master key.
        master_key: Bytes,
        /// Append flags.
        flags: AddFlags,
        /// Ledger-wide write flags.
        write_flags: WriteFlags,
        /// Entry payload.
        payload: Bytes,
    },
    /// Read one entry.
    ReadEntry {
        /// Target ledger.
        ledger_id: LedgerId,
        /// Entry to read.
        entry_id: EntryId,
        /// Read flags.
        flags: ReadFlags,
        /// Master key, required when fencing.
        master_key: Option<Bytes>,
    },
    /// Store an explicit last-add-confirmed.
    WriteLac {
        /// Target ledger.
        ledger_id: LedgerId,
        /// Last-add-confirmed value being published.
        lac: EntryId,
        /// Ledger master key.
        master_key: Bytes,
        /// Opaque LAC payload.
        payload: Bytes,
    },
    /// Read the explicit last-add-confirmed.
    ReadLac {
        /// Target ledger.
        ledger_id: LedgerId,
    },
    /// Force a deferred-sync ledger to disk.
    ForceLedger {
        /// Target ledger.
        ledger_id: LedgerId,
    },
    /// List the entries stored for a ledger.
    GetListOfEntriesOfLedger {
        /// Target ledger.
        ledger_id: LedgerId,
    },
}

impl RequestBody {
    /// Returns the operation type of this request.
    #[must_use]
    pub const fn op(&self) -> OperationType {
        match self {
            Self::AddEntry { .. } => OperationType::AddEntry,
            Self::ReadEntry { .. } => OperationType::ReadEntry,
            Self::WriteLac { .. } => OperationType::WriteLac,
            Self::ReadLac { .. } => OperationType::ReadLac,
            Self::ForceLedger { .. } => OperationType::ForceLedger,
            Self::GetListOfEntriesOfLedger { .. } => OperationType::GetListOfEntriesOfLedger,
        }
    }

    /// Returns the ledger this request targets.
    #[must_use]
    pub const fn ledger_id(&self) -> LedgerId {
        match self {
            Self::AddEntry { ledger_id, .. }
            | Self::ReadEntry { ledger_id, .. }
            | Self::WriteLac { ledger_id, .. }
            | Self::ReadLac { ledger_id }
            | Self::ForceLedger { ledger_id }
            | Self::GetListOfEntriesOfLedger { ledger_id } => *ledger_id,
        }
    }

    /// Returns the entry this request targets, or [`EntryId::INVALID`].
    #[must_use]
    pub const fn entry_id(&self) -> EntryId {
        match self {
            Self::AddEntry { entry_id, .. } | Self::ReadEntry { entry_id, .. } => *entry_id,
            _ => EntryId::INVALID,
        }
    }
}

impl Request {
    /// Returns the completion key for this request.
    #[must_use]
    pub fn key(&self) -> RequestKey {
        RequestKey {
            txn_id: self.txn_id,
            ledger_id: self.body.ledger_id(),
            entry_id: self.body.entry_id(),
            op: self.body.op(),
        }
    }
}

/// Status reported by a bookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// Success.
    Ok,
    /// The ledger is unknown to the bookie.
    NoLedger,
    /// The entry is unknown to the bookie.
    NoEntry,
    /// The request was malformed.
    BadRequest,
    /// The bookie hit an I/O error.
    Io,
    /// The master key did not match.
    Unauthorized,
    /// The protocol version is not supported.
    BadVersion,
    /// The ledger is fenced.
    Fenced,
    /// The bookie is read-only.
    ReadOnly,
    /// The bookie is overloaded.
    TooManyRequests,
}

impl StatusCode {
    /// Maps a bookie status to the caller-visible code for `op`.
    ///
    /// Generic failures split on the operation: writes surface as
    /// [`ResultCode::WriteException`], reads as [`ResultCode::ReadException`].
    #[must_use]
    pub const fn to_result_code(self, op: OperationType) -> ResultCode {
        match self {
            Self::Ok => ResultCode::Ok,
            Self::NoLedger => ResultCode::NoSuchLedgerExists,
            Self::NoEntry => ResultCode::NoSuchEntry,
            Self::BadRequest | Self::Io => {
                if op.is_write() {
                    ResultCode::WriteException
                } else {
                    ResultCode::ReadException
                }
            },
            Self::Unauthorized => ResultCode::UnauthorizedAccess,
            Self::BadVersion => ResultCode::ProtocolVersion,
            Self::Fenced => ResultCode::LedgerFenced,
            Self::ReadOnly => ResultCode::WriteOnReadOnlyBookie,
            Self::TooManyRequests => ResultCode::TooManyRequests,
        }
    }
}

/// Inbound response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Protocol revision of the matching request.
    pub version: ProtocolVersion,
    /// Echoed transaction id.
    pub txn_id: u64,
    /// Echoed operation kind.
    pub op: OperationType,
    /// Bookie status.
    pub status: StatusCode,
    /// Echoed ledger id.
    pub ledger_id: LedgerId,
    /// Echoed entry id, or [`EntryId::INVALID`].
    pub entry_id: EntryId,
    /// Operation-specific payload.
    pub body: ResponseBody,
}

impl Response {
    /// Returns the completion key this response resolves.
    #[must_use]
    pub fn key(&self) -> RequestKey {
        RequestKey {
            txn_id: self.txn_id,
            ledger_id: self.ledger_id,
            entry_id: self.entry_id,
            op: self.op,
        }
    }

    /// Builds an empty-bodied response to `request` with the given status.
    #[must_use]
    pub fn for_request(request: &Request, status: StatusCode) -> Self {
        Self {
            version: request.version,
            txn_id: request.txn_id,
            op: request.body.op(),
            status,
            ledger_id: request.body.ledger_id(),
            entry_id: request.body.entry_id(),
            body: ResponseBody::Empty,
        }
    }

    /// Replaces the response body.
    #[must_use]
    pub fn with_body(mut self, body: ResponseBody) -> Self {
        self.body = body;
        self
    }
}

/// Operation-specific response fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResponseBody {
    /// No payload (writes, failures).
    #[default]
    Empty,
    /// Entry payload.
    ReadEntry {
        /// Stored entry bytes.
        data: Bytes,
        /// Highest entry id the bookie has seen confirmed for the ledger.
        last_add_confirmed: EntryId,
    },
    /// Explicit last-add-confirmed.
    ReadLac {
        /// Opaque LAC payload as written by the writer.
        lac_buffer: Bytes,
        /// Published LAC value.
        lac: EntryId,
    },
    /// Stored entry ids in ascending order.
    ListOfEntries {
        /// Entry ids.
        entries: Vec<EntryId>,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn add_request(txn_id: u64) -> Request {
        Request {
            version: ProtocolVersion::V3,
            txn_id,
            body: RequestBody::AddEntry {
                ledger_id: LedgerId::new(5),
                entry_id: EntryId::new(9),
                master_key: Bytes::from_static(b"key"),
                flags: AddFlags::empty(),
                write_flags: WriteFlags::empty(),
                payload: Bytes::from_static(b"data"),
            },
        }
    }

    #[test]
    fn response_key_matches_request_key() {
        let request = add_request(17);
        let response = Response::for_request(&request, StatusCode::Ok);
        assert_eq!(request.key(), response.key());
        assert_eq!(response.op, OperationType::AddEntry);
    }

    #[test]
    fn ledger_scoped_operations_use_invalid_entry() {
        let body = RequestBody::ReadLac { ledger_id: LedgerId::new(3) };
        assert_eq!(body.entry_id(), EntryId::INVALID);
        assert_eq!(body.ledger_id(), LedgerId::new(3));
        assert_eq!(body.op(), OperationType::ReadLac);
    }

    #[test]
    fn generic_failures_split_on_operation() {
        assert_eq!(
            StatusCode::Io.to_result_code(OperationType::AddEntry),
            ResultCode::WriteException
        );
        assert_eq!(
            StatusCode::Io.to_result_code(OperationType::ReadEntry),
            ResultCode::ReadException
        );
        assert_eq!(
            StatusCode::BadRequest.to_result_code(OperationType::WriteLac),
            ResultCode::WriteException
        );
    }

    #[test]
    fn specific_statuses_map_one_to_one() {
        let op = OperationType::ReadEntry;
        assert_eq!(StatusCode::Ok.to_result_code(op), ResultCode::Ok);
        assert_eq!(StatusCode::NoLedger.to_result_code(op), ResultCode::NoSuchLedgerExists);
        assert_eq!(StatusCode::NoEntry.to_result_code(op), ResultCode::NoSuchEntry);
        assert_eq!(StatusCode::Unauthorized.to_result_code(op), ResultCode::UnauthorizedAccess);
        assert_eq!(StatusCode::Fenced.to_result_code(op), ResultCode::LedgerFenced);
        assert_eq!(
            StatusCode::ReadOnly.to_result_code(OperationType::AddEntry),
            ResultCode::WriteOnReadOnlyBookie
        );
    }

    #[test]
    fn write_classification() {
        assert!(OperationType::AddEntry.is_write());
        assert!(OperationType::WriteLac.is_write());
        assert!(OperationType::ForceLedger.is_write());
        assert!(!OperationType::ReadEntry.is_write());
        assert!(!OperationType::GetListOfEntriesOfLedger.is_write());
    }
}
