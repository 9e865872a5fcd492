//! Ledger creation, placement, and read/write handles for Quire.
//!
//! A ledger is an append-only sequence of entries striped over an ensemble
//! of bookies. This crate decides where a new ledger lives, records that
//! decision through a [`LedgerManager`], and hands back a [`LedgerHandle`]
//! that writes entries to their write sets through a
//! [`BookieClient`](quire_client::BookieClient).
//!
//! # Features
//!
//! - **Validated creation**: quorum sizes are checked before any I/O
//! - **Single completion**: every accepted creation reports exactly once
//! - **Fault-aware placement**: bookies currently faulty are avoided when
//!   enough healthy ones exist
//! - **Advertised ledgers**: callers may choose ledger and entry ids
//! - **Id collision retry**: system-allocated ids that already exist are
//!   regenerated a configurable number of times
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                LedgerClient (Public API)                 │
//! │    create_ledger │ create_ledger_adv │ open_ledger       │
//! ├──────────────────────────────────────────────────────────┤
//! │                    LedgerCreateOp                        │
//! │  validate │ place │ confirm │ allocate id │ persist      │
//! ├─────────────────────────┬────────────────────────────────┤
//! │ EnsemblePlacementPolicy │         LedgerManager          │
//! ├─────────────────────────┴────────────────────────────────┤
//! │         LedgerHandle + RoundRobinDistributionSchedule    │
//! │         add │ read │ LAC │ force │ close                 │
//! └──────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod create;
mod distribution;
mod error;
mod handle;
mod manager;
mod metadata;
mod placement;

pub use client::LedgerClient;
pub use create::{CreateCallback, CreateRequest, LedgerCreateOp, LedgerServices};
pub use distribution::{AckSet, RoundRobinDistributionSchedule};
pub use error::{CreateError, LedgerError, MetadataError, PlacementError, Result};
pub use handle::LedgerHandle;
pub use manager::{LedgerManager, MemoryLedgerManager};
pub use metadata::{DigestType, LedgerMetadata, LedgerState, MasterKey, Version, Versioned};
pub use placement::{DefaultEnsemblePlacementPolicy, EnsemblePlacementPolicy};
