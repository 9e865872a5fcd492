//! Error types for ledger creation, metadata, placement, and handles.
//!
//! Each error that can travel through a completion callback maps to a
//! caller-visible [`ResultCode`] via `to_result_code`.

use quire_client::ClientError;
use quire_types::{LedgerId, ResultCode, config::ConfigError};
use snafu::{Location, Snafu};

use crate::metadata::Version;

/// Result type alias for ledger handle operations.
pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

/// Synchronous validation failures of ledger creation.
///
/// These are returned before any network or metadata I/O. The completion
/// callback is never invoked for them.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CreateError {
    /// A creation parameter is missing or out of range.
    #[snafu(display("Invalid argument at {location}: {message}"))]
    InvalidArgument {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },
}

impl CreateError {
    /// Caller-visible code for this failure.
    #[must_use]
    pub fn to_result_code(&self) -> ResultCode {
        match self {
            Self::InvalidArgument { .. } => ResultCode::IncorrectParameter,
        }
    }
}

/// Failures reported by a [`LedgerManager`](crate::LedgerManager).
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum MetadataError {
    /// Metadata for the ledger id already exists.
    #[snafu(display("Ledger {ledger_id} already exists"))]
    LedgerExists {
        /// Colliding ledger id.
        ledger_id: LedgerId,
    },

    /// No metadata exists for the ledger id.
    #[snafu(display("Ledger {ledger_id} does not exist"))]
    NoSuchLedger {
        /// Missing ledger id.
        ledger_id: LedgerId,
    },

    /// A conditional write lost against a concurrent writer.
    #[snafu(display("Ledger {ledger_id} metadata is at version {actual}, expected {expected}"))]
    BadVersion {
        /// Ledger being written.
        ledger_id: LedgerId,
        /// Version the writer based its update on.
        expected: Version,
        /// Version currently stored.
        actual: Version,
    },

    /// The id space is exhausted.
    #[snafu(display("Ledger id space exhausted"))]
    IdOverflow,

    /// The metadata store failed or is unavailable.
    #[snafu(display("Metadata store failure: {message}"))]
    MetaStore {
        /// Error description.
        message: String,
    },
}

impl MetadataError {
    /// Caller-visible code for this failure.
    #[must_use]
    pub fn to_result_code(&self) -> ResultCode {
        match self {
            Self::LedgerExists { .. } => ResultCode::LedgerExist,
            Self::NoSuchLedger { .. } => ResultCode::NoSuchLedgerExists,
            Self::BadVersion { .. } => ResultCode::MetadataVersion,
            Self::IdOverflow => ResultCode::LedgerIdOverflow,
            Self::MetaStore { .. } => ResultCode::MetadataStoreException,
        }
    }
}

/// Failures of an [`EnsemblePlacementPolicy`](crate::EnsemblePlacementPolicy).
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum PlacementError {
    /// Fewer eligible bookies are known than the ensemble needs.
    #[snafu(display("Not enough bookies: need {required}, have {available}"))]
    NotEnoughBookies {
        /// Requested ensemble size.
        required: usize,
        /// Eligible bookies.
        available: usize,
    },
}

impl PlacementError {
    /// Caller-visible code for this failure.
    #[must_use]
    pub fn to_result_code(&self) -> ResultCode {
        match self {
            Self::NotEnoughBookies { .. } => ResultCode::NotEnoughBookies,
        }
    }
}

/// Failures of ledger client and handle operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LedgerError {
    /// An operation completed with a failure code.
    #[snafu(display("Ledger {ledger_id} operation failed: {rc}"))]
    Operation {
        /// Ledger operated on, or [`LedgerId::INVALID`] before allocation.
        ledger_id: LedgerId,
        /// Failure code.
        rc: ResultCode,
    },

    /// Creation parameters were rejected.
    #[snafu(display("Ledger creation rejected: {source}"))]
    Create {
        /// Validation failure.
        source: CreateError,
    },

    /// The bookie client rejected a request before dispatch.
    #[snafu(display("Bookie client rejected request: {source}"))]
    Client {
        /// Client failure.
        source: ClientError,
    },

    /// The ledger manager failed.
    #[snafu(display("Ledger metadata operation failed: {source}"))]
    Metadata {
        /// Manager failure.
        source: MetadataError,
    },

    /// The ledger configuration failed validation.
    #[snafu(display("Invalid ledger configuration: {source}"))]
    Config {
        /// Validation failure.
        source: ConfigError,
    },
}

impl LedgerError {
    /// Caller-visible code for this failure.
    #[must_use]
    pub fn result_code(&self) -> ResultCode {
        match self {
            Self::Operation { rc, .. } => *rc,
            Self::Create { source } => source.to_result_code(),
            Self::Metadata { source } => source.to_result_code(),
            Self::Client { .. } | Self::Config { .. } => ResultCode::IncorrectParameter,
        }
    }
}
