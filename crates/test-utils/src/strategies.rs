//! Proptest strategies for Quire domain types.
//!
//! Reusable generators for property-based testing across crates.
//!
//! # Usage
//!
//! ```no_run
//! use proptest::prelude::*;
//! use quire_test_utils::strategies;
//!
//! proptest! {
//!     #[test]
//!     fn quorums_are_ordered((ens, wq, aq) in strategies::arb_valid_quorums()) {
//!         prop_assert!(ens >= wq && wq >= aq && aq >= 1);
//!     }
//! }
//! ```

use bytes::Bytes;
use proptest::prelude::*;
use quire_types::{BookieId, EntryId, LedgerId};

/// Largest ensemble the strategies generate.
pub const MAX_ENSEMBLE: u32 = 9;

/// Generates a non-negative ledger id.
pub fn arb_ledger_id() -> impl Strategy<Value = LedgerId> {
    (0..i64::MAX).prop_map(LedgerId::new)
}

/// Generates a negative, and therefore invalid, ledger id.
pub fn arb_negative_ledger_id() -> impl Strategy<Value = LedgerId> {
    (i64::MIN..0).prop_map(LedgerId::new)
}

/// Generates an entry id in a range small enough for in-memory ledgers.
pub fn arb_entry_id() -> impl Strategy<Value = EntryId> {
    (0..10_000i64).prop_map(EntryId::new)
}

/// Generates a well-formed `host:port` bookie identity.
pub fn arb_bookie_id() -> impl Strategy<Value = BookieId> {
    ("[a-z][a-z0-9-]{0,15}", 1u16..).prop_filter_map("reserved identity", |(host, port)| {
        BookieId::parse(&format!("{host}:{port}")).ok()
    })
}

/// Generates a non-empty entry payload.
pub fn arb_payload() -> impl Strategy<Value = Bytes> {
    proptest::collection::vec(any::<u8>(), 1..256).prop_map(Bytes::from)
}

/// Generates a master key of up to 32 bytes. Empty keys are allowed.
pub fn arb_master_key() -> impl Strategy<Value = Bytes> {
    proptest::collection::vec(any::<u8>(), 0..32).prop_map(Bytes::from)
}

/// Generates `(ensemble, write_quorum, ack_quorum)` with
/// `ensemble >= write_quorum >= ack_quorum >= 1`.
pub fn arb_valid_quorums() -> impl Strategy<Value = (u32, u32, u32)> {
    (1..=MAX_ENSEMBLE)
        .prop_flat_map(|ens| (Just(ens), 1..=ens))
        .prop_flat_map(|(ens, wq)| (Just(ens), Just(wq), 1..=wq))
}

/// Generates quorum triples that break at least one ordering constraint.
pub fn arb_invalid_quorums() -> impl Strategy<Value = (u32, u32, u32)> {
    (0..=MAX_ENSEMBLE + 2, 0..=MAX_ENSEMBLE + 2, 0..=MAX_ENSEMBLE + 2)
        .prop_filter("valid triple", |&(ens, wq, aq)| !(ens >= wq && wq >= aq && aq >= 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn valid_quorums_are_ordered((ens, wq, aq) in arb_valid_quorums()) {
            prop_assert!(ens <= MAX_ENSEMBLE);
            prop_assert!(ens >= wq);
            prop_assert!(wq >= aq);
            prop_assert!(aq >= 1);
        }

        #[test]
        fn invalid_quorums_break_ordering((ens, wq, aq) in arb_invalid_quorums()) {
            prop_assert!(ens < wq || wq < aq || aq == 0);
        }

        #[test]
        fn bookie_ids_carry_a_port(id in arb_bookie_id()) {
            prop_assert!(id.as_str().contains(':'));
        }

        #[test]
        fn payloads_are_never_empty(payload in arb_payload()) {
            prop_assert!(!payload.is_empty());
        }
    }
}
