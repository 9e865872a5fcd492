//! Pooled, fault-tracking RPC client for Quire bookies.
//!
//! A [`BookieClient`] multiplexes appends, reads, and last-add-confirmed
//! traffic for many ledgers over a small set of TCP connections per bookie.
//! It counts bookie errors per interval so that placement logic can avoid
//! bookies that are misbehaving right now.
//!
//! # Features
//!
//! - **Lazy pools**: connections open on first use and reconnect on demand
//! - **Ordered completions**: callbacks for one ledger run in submission order
//! - **Exactly-once completion**: a response, a timeout, a disconnect, or a
//!   close resolves each request, and only the first of them counts
//! - **Fault tracking**: per-bookie error counters with fixed intervals
//! - **Backpressure**: per-connection writability from a write high-water mark
//!
//! # Quick Start
//!
//! ```no_run
//! use bytes::Bytes;
//! use quire_client::BookieClient;
//! use quire_types::{BookieId, EntryId, LedgerId, ReadFlags};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = BookieClient::builder().build()?;
//! let bookie = BookieId::parse("bookie-1:3181")?;
//!
//! let entry = client
//!     .read_entry_async(&bookie, LedgerId::new(7), EntryId::new(0), ReadFlags::empty(), None)?
//!     .await;
//! match entry {
//!     Ok(entry) => println!("read {} bytes", entry.data.len()),
//!     Err(rc) => println!("read failed: {rc}"),
//! }
//! client.close();
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 BookieClient (Public API)                │
//! │  add_entry │ read_entry │ write_lac │ read_lac │ force   │
//! ├──────────────────────────────────────────────────────────┤
//! │              ConnectionPool (one per bookie)             │
//! │   key % channels routing │ ErrorCounter │ writability    │
//! ├──────────────────────────────────────────────────────────┤
//! │                    BookieConnection                      │
//! │   lazy connect │ pending map │ timeouts │ reconnect      │
//! ├──────────────────────────────────────────────────────────┤
//! │           OrderedExecutor (completion delivery)          │
//! └──────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod completion;
mod connection;
mod error;
mod executor;
mod fault;
pub mod mock;
mod pool;
mod resolver;

// Public API exports
pub use client::{BookieClient, OpResult, ReadEntryResult, ReadLacResult};
pub use connection::{BookieConnection, ConnectionState};
pub use error::{ClientError, Result};
pub use executor::OrderedExecutor;
pub use fault::ErrorCounter;
pub use pool::{ConnectionPool, PoolState};
pub use resolver::{
    BookieAddressResolver, HostPortResolver, SecurityHandlerFactory, StaticResolver,
};
