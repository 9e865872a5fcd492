//! Caller-visible result codes.
//!
//! Every asynchronous operation completes with a [`ResultCode`]. The numeric
//! values are part of the public contract and never change; new codes are added
//! with previously unused values only.
//!
//! | Range        | Domain                                          |
//! |--------------|-------------------------------------------------|
//! | 0            | Success                                         |
//! | -1 ..= -25   | Client, metadata, and bookie failures           |
//! | -100 ..= -106| Operation-level rejections reported by bookies  |

use core::fmt;

use serde::{Deserialize, Serialize};

/// Result code delivered to completion callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ResultCode {
    /// Operation succeeded.
    Ok = 0,
    /// A read failed on the bookie.
    ReadException = -1,
    /// Not enough bookies are available to form the requested ensemble.
    NotEnoughBookies = -6,
    /// The ledger does not exist.
    NoSuchLedgerExists = -7,
    /// The bookie could not be reached.
    BookieHandleNotAvailable = -8,
    /// The metadata store failed.
    MetadataStoreException = -9,
    /// The ledger is closed for writes.
    LedgerClosed = -11,
    /// A write failed, including writes of an empty payload.
    WriteException = -12,
    /// The entry does not exist.
    NoSuchEntry = -13,
    /// A parameter was rejected.
    IncorrectParameter = -14,
    /// The operation was interrupted, typically by executor shutdown.
    Interrupted = -15,
    /// The bookie does not speak the requested protocol version.
    ProtocolVersion = -16,
    /// A metadata write raced with another writer.
    MetadataVersion = -17,
    /// The client was closed.
    ClientClosed = -19,
    /// A ledger with the requested id already exists.
    LedgerExist = -20,
    /// The operation timed out.
    Timeout = -23,
    /// The operation is not allowed on this handle.
    IllegalOp = -100,
    /// The ledger was fenced by a recovering reader.
    LedgerFenced = -101,
    /// The master key did not match the ledger's key.
    UnauthorizedAccess = -102,
    /// The bookie is in read-only mode.
    WriteOnReadOnlyBookie = -104,
    /// The bookie is shedding load.
    TooManyRequests = -105,
    /// Ledger id allocation ran past the id space.
    LedgerIdOverflow = -106,
}

impl ResultCode {
    /// Returns the numeric code value.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Converts a numeric code to a `ResultCode`, returning `None` for unknown values.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            -1 => Some(Self::ReadException),
            -6 => Some(Self::NotEnoughBookies),
            -7 => Some(Self::NoSuchLedgerExists),
            -8 => Some(Self::BookieHandleNotAvailable),
            -9 => Some(Self::MetadataStoreException),
            -11 => Some(Self::LedgerClosed),
            -12 => Some(Self::WriteException),
            -13 => Some(Self::NoSuchEntry),
            -14 => Some(Self::IncorrectParameter),
            -15 => Some(Self::Interrupted),
            -16 => Some(Self::ProtocolVersion),
            -17 => Some(Self::MetadataVersion),
            -19 => Some(Self::ClientClosed),
            -20 => Some(Self::LedgerExist),
            -23 => Some(Self::Timeout),
            -100 => Some(Self::IllegalOp),
            -101 => Some(Self::LedgerFenced),
            -102 => Some(Self::UnauthorizedAccess),
            -104 => Some(Self::WriteOnReadOnlyBookie),
            -105 => Some(Self::TooManyRequests),
            -106 => Some(Self::LedgerIdOverflow),
            _ => None,
        }
    }

    /// Returns true for [`ResultCode::Ok`].
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Whether a failure with this code counts against the bookie's health.
    ///
    /// Only failures attributable to the bookie itself are counted. Missing
    /// ledgers or entries, authorization failures, and client-side shutdown
    /// are not the bookie's fault.
    #[must_use]
    pub const fn counts_as_bookie_error(self) -> bool {
        matches!(
            self,
            Self::BookieHandleNotAvailable
                | Self::Timeout
                | Self::ReadException
                | Self::WriteException
                | Self::TooManyRequests
        )
    }

    /// Human-readable description, stable across releases.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Ok => "No problem",
            Self::ReadException => "Error while reading ledger",
            Self::NotEnoughBookies => "Not enough non-faulty bookies available",
            Self::NoSuchLedgerExists => "No such ledger exists on bookies",
            Self::BookieHandleNotAvailable => "Bookie handle is not available",
            Self::MetadataStoreException => "Error while using the metadata store",
            Self::LedgerClosed => "Attempt to write to a closed ledger",
            Self::WriteException => "Write failed on bookie",
            Self::NoSuchEntry => "No such entry",
            Self::IncorrectParameter => "Incorrect parameter input",
            Self::Interrupted => "Interrupted while waiting for permit",
            Self::ProtocolVersion => "Bookie protocol version on server is incompatible with client",
            Self::MetadataVersion => "Bad ledger metadata version",
            Self::ClientClosed => "Ledger client is closed",
            Self::LedgerExist => "Ledger existed",
            Self::Timeout => "Bookie operation timeout",
            Self::IllegalOp => "Invalid operation",
            Self::LedgerFenced => "Ledger has been fenced off. Some other client must have opened it to read",
            Self::UnauthorizedAccess => "Attempted to access ledger using the wrong password",
            Self::WriteOnReadOnlyBookie => "Attempting to write on ReadOnly bookie",
            Self::TooManyRequests => "Too many requests to the same bookie",
            Self::LedgerIdOverflow => "Next ledger id is out of range",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}
