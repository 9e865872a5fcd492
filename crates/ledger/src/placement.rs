//! Ensemble placement: choosing which bookies store a new ledger.

use std::{collections::BTreeSet, fmt};

use parking_lot::RwLock;
use quire_types::BookieId;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::error::PlacementError;

/// Chooses ensembles from the bookies currently known to the cluster.
pub trait EnsemblePlacementPolicy: Send + Sync + fmt::Debug {
    /// Replaces the known bookie sets.
    fn on_cluster_changed(&self, writable: BTreeSet<BookieId>, read_only: BTreeSet<BookieId>);

    /// Picks `ensemble_size` distinct writable bookies, none of them in
    /// `excluded`.
    ///
    /// # Errors
    ///
    /// Returns [`PlacementError::NotEnoughBookies`] when fewer eligible
    /// bookies exist than requested.
    fn new_ensemble(
        &self,
        ensemble_size: usize,
        write_quorum_size: usize,
        ack_quorum_size: usize,
        excluded: &BTreeSet<BookieId>,
    ) -> Result<Vec<BookieId>, PlacementError>;
}

#[derive(Debug, Default)]
struct Cluster {
    writable: BTreeSet<BookieId>,
    read_only: BTreeSet<BookieId>,
}

/// Uniformly random placement over writable bookies.
#[derive(Debug, Default)]
pub struct DefaultEnsemblePlacementPolicy {
    cluster: RwLock<Cluster>,
}

impl DefaultEnsemblePlacementPolicy {
    /// Creates a policy with no known bookies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy that knows `bookies` as writable.
    #[must_use]
    pub fn with_bookies(bookies: impl IntoIterator<Item = BookieId>) -> Self {
        let policy = Self::new();
        policy.on_cluster_changed(bookies.into_iter().collect(), BTreeSet::new());
        policy
    }

    /// Known writable bookies.
    #[must_use]
    pub fn writable_bookies(&self) -> BTreeSet<BookieId> {
        self.cluster.read().writable.clone()
    }
}

impl EnsemblePlacementPolicy for DefaultEnsemblePlacementPolicy {
    fn on_cluster_changed(&self, writable: BTreeSet<BookieId>, read_only: BTreeSet<BookieId>) {
        debug!(writable = writable.len(), read_only = read_only.len(), "cluster changed");
        let mut cluster = self.cluster.write();
        // A bookie reported in both sets is read-only.
        cluster.writable = writable.difference(&read_only).cloned().collect();
        cluster.read_only = read_only;
    }

    fn new_ensemble(
        &self,
        ensemble_size: usize,
        _write_quorum_size: usize,
        _ack_quorum_size: usize,
        excluded: &BTreeSet<BookieId>,
    ) -> Result<Vec<BookieId>, PlacementError> {
        let candidates: Vec<BookieId> =
            self.cluster.read().writable.difference(excluded).cloned().collect();
        if candidates.len() < ensemble_size {
            return Err(PlacementError::NotEnoughBookies {
                required: ensemble_size,
                available: candidates.len(),
            });
        }
        Ok(candidates.choose_multiple(&mut rand::thread_rng(), ensemble_size).cloned().collect())
    }
}
