//! Core types for Quire ledger clients.
//!
//! This crate provides the foundational types shared by the bookie client and
//! the ledger layer:
//! - Identifiers for ledgers, entries, and bookies
//! - The caller-visible result-code taxonomy
//! - The bookie wire protocol and its frame codec
//! - Client and ledger configuration

pub mod codec;
pub mod config;
pub mod ids;
pub mod protocol;
pub mod result_code;

// Re-export commonly used types at crate root
pub use codec::CodecError;
pub use ids::{BookieId, BookieIdError, EntryId, LedgerId};
pub use protocol::{
    AddFlags, OperationType, ProtocolVersion, ReadFlags, Request, RequestBody, RequestKey,
    Response, ResponseBody, StatusCode, WriteFlags,
};
pub use result_code::ResultCode;
