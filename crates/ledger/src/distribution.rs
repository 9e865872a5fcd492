//! Round-robin striping of entries over an ensemble.

use std::collections::BTreeSet;

use quire_types::EntryId;

/// Maps entries to the ensemble members that store them.
///
/// Entry `e` goes to members `(e + i) mod E` for `i in 0..Wq`, so consecutive
/// entries rotate through the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundRobinDistributionSchedule {
    ensemble_size: usize,
    write_quorum_size: usize,
    ack_quorum_size: usize,
}

impl RoundRobinDistributionSchedule {
    /// Creates a schedule. Callers validate `E >= Wq >= Aq >= 1` first.
    #[must_use]
    pub fn new(ensemble_size: usize, write_quorum_size: usize, ack_quorum_size: usize) -> Self {
        Self { ensemble_size, write_quorum_size, ack_quorum_size }
    }

    /// Ensemble size.
    #[must_use]
    pub fn ensemble_size(&self) -> usize {
        self.ensemble_size
    }

    /// Write quorum size.
    #[must_use]
    pub fn write_quorum_size(&self) -> usize {
        self.write_quorum_size
    }

    /// Ack quorum size.
    #[must_use]
    pub fn ack_quorum_size(&self) -> usize {
        self.ack_quorum_size
    }

    /// Ensemble indexes that store `entry_id`, in write order.
    #[must_use]
    pub fn write_set(&self, entry_id: EntryId) -> Vec<usize> {
        if self.ensemble_size == 0 {
            return Vec::new();
        }
        let start = entry_id.value().rem_euclid(self.ensemble_size as i64) as usize;
        (0..self.write_quorum_size).map(|i| (start + i) % self.ensemble_size).collect()
    }

    /// A fresh acknowledgement tracker for one entry.
    #[must_use]
    pub fn new_ack_set(&self) -> AckSet {
        AckSet::new(self.ack_quorum_size)
    }
}

/// Distinct acknowledgements received for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckSet {
    required: usize,
    acked: BTreeSet<usize>,
}

impl AckSet {
    /// A tracker that completes at `required` distinct acknowledgements.
    #[must_use]
    pub fn new(required: usize) -> Self {
        Self { required, acked: BTreeSet::new() }
    }

    /// Records an acknowledgement from ensemble member `index` and returns
    /// whether the ack quorum is now met. Repeated acks count once.
    pub fn complete_bookie_and_check(&mut self, index: usize) -> bool {
        self.acked.insert(index);
        self.is_complete()
    }

    /// Acknowledgements still missing.
    #[must_use]
    pub fn missing(&self) -> usize {
        self.required.saturating_sub(self.acked.len())
    }

    /// Whether the ack quorum is met.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.acked.len() >= self.required
    }

    /// Acknowledgements received so far.
    #[must_use]
    pub fn acked(&self) -> usize {
        self.acked.len()
    }
}
