//! Test harness for ledger integration tests.
//!
//! Starts a set of mock bookies and a [`LedgerClient`] whose placement policy
//! knows all of them.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use std::{collections::BTreeSet, sync::Arc};

use bytes::Bytes;
use quire_client::{BookieClient, mock::MockBookie};
use quire_ledger::{
    CreateCallback, CreateRequest, DefaultEnsemblePlacementPolicy, LedgerClient, LedgerHandle,
    MemoryLedgerManager,
};
use quire_test_utils::init_tracing;
use quire_types::{
    BookieId, LedgerId, ResultCode,
    config::{ClientConfig, LedgerConfig},
};
use tokio::sync::oneshot;

/// Password used by [`request`].
pub const PASSWORD: &[u8] = b"secret";

/// Mock bookies plus a ledger client over them.
pub struct TestCluster {
    /// Running bookies.
    pub bookies: Vec<MockBookie>,
    /// Metadata store shared with the client.
    pub manager: Arc<MemoryLedgerManager>,
    /// Client under test.
    pub client: LedgerClient,
}

impl TestCluster {
    /// Starts `size` bookies with default configuration.
    pub async fn new(size: usize) -> Self {
        Self::builder(size).start().await
    }

    /// Configurable cluster of `size` bookies.
    pub fn builder(size: usize) -> TestClusterBuilder {
        TestClusterBuilder {
            size,
            ledger_config: LedgerConfig::default(),
            client_config: ClientConfig::default(),
            manager: MemoryLedgerManager::new(),
        }
    }

    /// Identities of every bookie.
    pub fn bookie_ids(&self) -> BTreeSet<BookieId> {
        self.bookies.iter().map(|bookie| bookie.id().clone()).collect()
    }

    /// Bookie with identity `id`.
    pub fn bookie(&self, id: &BookieId) -> &MockBookie {
        self.bookies.iter().find(|bookie| bookie.id() == id).expect("bookie in cluster")
    }

    /// Entries of `ledger_id` stored across all bookies.
    pub fn stored_entries(&self, ledger_id: LedgerId) -> usize {
        self.bookies.iter().map(|bookie| bookie.entry_count(ledger_id)).sum()
    }
}

/// Builder for [`TestCluster`].
pub struct TestClusterBuilder {
    size: usize,
    ledger_config: LedgerConfig,
    client_config: ClientConfig,
    manager: MemoryLedgerManager,
}

impl TestClusterBuilder {
    /// Uses `config` for ledger creation.
    pub fn ledger_config(mut self, config: LedgerConfig) -> Self {
        self.ledger_config = config;
        self
    }

    /// Uses `config` for the bookie client.
    pub fn client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = config;
        self
    }

    /// Uses `manager` as the metadata store.
    pub fn manager(mut self, manager: MemoryLedgerManager) -> Self {
        self.manager = manager;
        self
    }

    /// Starts the bookies and the client.
    pub async fn start(self) -> TestCluster {
        init_tracing();
        let mut bookies = Vec::with_capacity(self.size);
        for _ in 0..self.size {
            bookies.push(MockBookie::start().await.unwrap());
        }
        let placement = Arc::new(DefaultEnsemblePlacementPolicy::with_bookies(
            bookies.iter().map(|bookie| bookie.id().clone()),
        ));
        let manager = Arc::new(self.manager);
        let bookie_client = BookieClient::builder().config(self.client_config).build().unwrap();
        let client = LedgerClient::builder()
            .bookie_client(bookie_client)
            .placement(placement)
            .manager(manager.clone())
            .config(self.ledger_config)
            .build()
            .unwrap();
        TestCluster { bookies, manager, client }
    }
}

/// Request for an `ensemble`/`write_quorum`/`ack_quorum` ledger with
/// [`PASSWORD`].
pub fn request(ensemble: u32, write_quorum: u32, ack_quorum: u32) -> CreateRequest {
    CreateRequest::builder()
        .ensemble_size(ensemble)
        .write_quorum_size(write_quorum)
        .ack_quorum_size(ack_quorum)
        .password(Bytes::from_static(PASSWORD))
        .build()
}

/// Outcome delivered to a creation callback.
pub type Outcome<C> = (ResultCode, Option<LedgerHandle>, C);

/// A callback that forwards its outcome to the returned receiver.
pub fn capture<C: Send + 'static>() -> (CreateCallback<C>, oneshot::Receiver<Outcome<C>>) {
    let (tx, rx) = oneshot::channel();
    let callback: CreateCallback<C> = Box::new(move |rc, handle, ctx| {
        let _ = tx.send((rc, handle, ctx));
    });
    (callback, rx)
}
