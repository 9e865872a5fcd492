//! Ledger client: creation and opening of ledgers over one bookie client.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use quire_client::BookieClient;
use quire_types::{LedgerId, ResultCode, config::LedgerConfig};
use snafu::ResultExt;
use tracing::{debug, info};

use crate::{
    create::{CreateCallback, CreateRequest, LedgerCreateOp, LedgerServices},
    error::{ConfigSnafu, CreateError, CreateSnafu, LedgerError, MetadataSnafu, Result},
    handle::{HandleMode, LedgerHandle},
    manager::LedgerManager,
    metadata::DigestType,
    placement::EnsemblePlacementPolicy,
};

/// Entry point for creating and opening ledgers.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use quire_client::BookieClient;
/// use quire_ledger::{
///     CreateRequest, DefaultEnsemblePlacementPolicy, LedgerClient, MemoryLedgerManager,
/// };
/// use quire_types::BookieId;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bookies = ["bookie-1:3181", "bookie-2:3181", "bookie-3:3181"]
///     .into_iter()
///     .map(BookieId::parse)
///     .collect::<Result<Vec<_>, _>>()?;
/// let client = LedgerClient::builder()
///     .bookie_client(BookieClient::builder().build()?)
///     .placement(Arc::new(DefaultEnsemblePlacementPolicy::with_bookies(bookies)))
///     .manager(Arc::new(MemoryLedgerManager::new()))
///     .build()?;
///
/// let request =
///     CreateRequest::builder().ensemble_size(3).write_quorum_size(2).ack_quorum_size(2).build();
/// let ledger = client.create_ledger(request).await?;
/// ledger.add_entry("hello".into()).await?;
/// ledger.close().await?;
/// client.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LedgerClient {
    services: LedgerServices,
    closed: AtomicBool,
}

#[bon::bon]
impl LedgerClient {
    /// Creates a ledger client.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Config`] if `config` fails validation.
    #[builder]
    pub fn new(
        bookie_client: Arc<BookieClient>,
        placement: Arc<dyn EnsemblePlacementPolicy>,
        manager: Arc<dyn LedgerManager>,
        #[builder(default)] config: LedgerConfig,
    ) -> Result<Self> {
        config.validate().context(ConfigSnafu)?;
        debug!(
            min_advertised_ledger_id = config.min_advertised_ledger_id,
            ledger_id_retries = config.ledger_id_retries,
            "ledger client ready"
        );
        Ok(Self {
            services: LedgerServices {
                bookie_client,
                placement,
                manager,
                config: Arc::new(config),
            },
            closed: AtomicBool::new(false),
        })
    }
}

impl LedgerClient {
    /// Collaborators shared by every creation.
    #[must_use]
    pub fn services(&self) -> &LedgerServices {
        &self.services
    }

    /// Underlying bookie client.
    #[must_use]
    pub fn bookie_client(&self) -> &Arc<BookieClient> {
        &self.services.bookie_client
    }

    /// Callback form of [`create_ledger`](Self::create_ledger).
    ///
    /// # Errors
    ///
    /// See [`LedgerCreateOp::initiate`].
    pub fn initiate_create<C>(
        &self,
        request: CreateRequest,
        callback: Option<CreateCallback<C>>,
        ctx: C,
    ) -> std::result::Result<(), CreateError>
    where
        C: Send + 'static,
    {
        LedgerCreateOp::initiate(&self.services, request, callback, ctx)
    }

    /// Callback form of [`create_ledger_adv`](Self::create_ledger_adv).
    ///
    /// # Errors
    ///
    /// See [`LedgerCreateOp::initiate_advertised`].
    pub fn initiate_create_advertised<C>(
        &self,
        ledger_id: Option<LedgerId>,
        request: CreateRequest,
        callback: Option<CreateCallback<C>>,
        ctx: C,
    ) -> std::result::Result<(), CreateError>
    where
        C: Send + 'static,
    {
        LedgerCreateOp::initiate_advertised(&self.services, ledger_id, request, callback, ctx)
    }

    /// Creates a ledger with a system-allocated id.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Create`] for rejected parameters and
    /// [`LedgerError::Operation`] with the failure code otherwise.
    pub async fn create_ledger(&self, request: CreateRequest) -> Result<LedgerHandle> {
        self.check_open(LedgerId::INVALID)?;
        let pending = LedgerCreateOp::create(&self.services, request).context(CreateSnafu)?;
        pending.await.map_err(|rc| LedgerError::Operation { ledger_id: LedgerId::INVALID, rc })
    }

    /// Creates a ledger under `ledger_id` whose entry ids the caller assigns.
    ///
    /// # Errors
    ///
    /// As [`create_ledger`](Self::create_ledger); an existing `ledger_id`
    /// fails with `LedgerExist`.
    pub async fn create_ledger_adv(
        &self,
        ledger_id: LedgerId,
        request: CreateRequest,
    ) -> Result<LedgerHandle> {
        self.check_open(ledger_id)?;
        let pending = LedgerCreateOp::create_advertised(&self.services, Some(ledger_id), request)
            .context(CreateSnafu)?;
        pending.await.map_err(|rc| LedgerError::Operation { ledger_id, rc })
    }

    /// Opens an existing ledger for reading.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Metadata`] if the metadata cannot be read and
    /// `UnauthorizedAccess` if `digest_type` or `password` do not match the
    /// ones the ledger was created with.
    pub async fn open_ledger(
        &self,
        ledger_id: LedgerId,
        digest_type: DigestType,
        password: &[u8],
    ) -> Result<LedgerHandle> {
        self.check_open(ledger_id)?;
        let metadata =
            self.services.manager.read_ledger_metadata(ledger_id).await.context(MetadataSnafu)?;
        if metadata.value.digest_type != digest_type || metadata.value.password != password {
            return Err(LedgerError::Operation { ledger_id, rc: ResultCode::UnauthorizedAccess });
        }
        debug!(ledger_id = %ledger_id, closed = metadata.value.is_closed(), "ledger opened");
        Ok(LedgerHandle::new(
            Arc::clone(&self.services.bookie_client),
            Arc::clone(&self.services.manager),
            metadata,
            HandleMode::Reader,
        ))
    }

    /// Releases the ledger manager, the bookie client, and its executor.
    /// Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.services.manager.close().await;
        self.services.bookie_client.close();
        self.services.bookie_client.executor().shutdown();
        info!("ledger client closed");
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self, ledger_id: LedgerId) -> Result<()> {
        if self.is_closed() {
            Err(LedgerError::Operation { ledger_id, rc: ResultCode::ClientClosed })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::{manager::MemoryLedgerManager, placement::DefaultEnsemblePlacementPolicy};

    fn client(config: LedgerConfig) -> Result<LedgerClient> {
        LedgerClient::builder()
            .bookie_client(BookieClient::builder().build().unwrap())
            .placement(Arc::new(DefaultEnsemblePlacementPolicy::new()))
            .manager(Arc::new(MemoryLedgerManager::new()))
            .config(config)
            .build()
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = LedgerConfig { min_advertised_ledger_id: -5, ..LedgerConfig::default() };
        let err = client(config).unwrap_err();
        assert!(matches!(err, LedgerError::Config { .. }));
    }

    #[tokio::test]
    async fn closed_client_refuses_work() {
        let client = client(LedgerConfig::default()).unwrap();
        client.close().await;
        client.close().await;
        assert!(client.is_closed());
        assert!(client.bookie_client().is_closed());

        let request = CreateRequest::builder()
            .ensemble_size(1)
            .write_quorum_size(1)
            .ack_quorum_size(1)
            .password(Bytes::from_static(b"pw"))
            .build();
        let err = client.create_ledger(request).await.unwrap_err();
        assert_eq!(err.result_code(), ResultCode::ClientClosed);
    }
}
