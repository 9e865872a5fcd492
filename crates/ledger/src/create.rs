//! Ledger creation.
//!
//! [`LedgerCreateOp`] checks the quorum parameters on the caller's thread and
//! then runs placement, id allocation, and metadata persistence on the bookie
//! client's runtime. The outcome reaches the caller exactly once:
//!
//! | Outcome                              | Channel                                  |
//! |--------------------------------------|------------------------------------------|
//! | Missing or inconsistent quorum sizes | `Err(CreateError)` from `initiate*`      |
//! | Missing or too small advertised id   | `Err(CreateError)` from `initiate*`      |
//! | Too few bookies                      | callback with `NotEnoughBookies`         |
//! | Bookie client closed                 | callback with `ClientClosed`             |
//! | Metadata store failure               | callback with the mapped code            |
//! | Success                              | callback with `Ok` and the handle        |
//!
//! The callback is never invoked when `initiate*` returns `Err`, so callers
//! that only watch the callback must check the returned result too.
//!
//! Nothing is persisted unless an ensemble was found and confirmed.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    future::Future,
    sync::Arc,
};

use bytes::Bytes;
use chrono::Utc;
use quire_client::BookieClient;
use quire_types::{BookieId, EntryId, LedgerId, ResultCode, WriteFlags, config::LedgerConfig};
use snafu::ensure;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use crate::{
    error::{CreateError, InvalidArgumentSnafu, MetadataError, PlacementError},
    handle::{HandleMode, LedgerHandle},
    manager::LedgerManager,
    metadata::{DigestType, LedgerMetadata, Versioned},
    placement::EnsemblePlacementPolicy,
};

/// Completion of a ledger creation: the result code, the handle on success,
/// and the caller's context.
pub type CreateCallback<C> = Box<dyn FnOnce(ResultCode, Option<LedgerHandle>, C) + Send>;

/// Collaborators a creation runs against.
#[derive(Clone)]
pub struct LedgerServices {
    /// RPC client used to confirm the ensemble and by the resulting handle.
    pub bookie_client: Arc<BookieClient>,
    /// Chooses the ensemble.
    pub placement: Arc<dyn EnsemblePlacementPolicy>,
    /// Allocates ids and stores metadata.
    pub manager: Arc<dyn LedgerManager>,
    /// Creation settings.
    pub config: Arc<LedgerConfig>,
}

impl fmt::Debug for LedgerServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerServices")
            .field("placement", &self.placement)
            .field("manager", &self.manager)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Parameters of a new ledger.
///
/// The three quorum sizes are optional so that a missing one is reported as
/// an invalid argument rather than silently defaulted.
#[derive(Debug, Clone, Default, bon::Builder)]
pub struct CreateRequest {
    /// Number of bookies the ledger is striped over.
    pub ensemble_size: Option<u32>,
    /// Bookies each entry is written to.
    pub write_quorum_size: Option<u32>,
    /// Acknowledgements required before an entry is confirmed.
    pub ack_quorum_size: Option<u32>,
    /// Checksum scheme.
    #[builder(default)]
    pub digest_type: DigestType,
    /// Ledger password.
    #[builder(default)]
    pub password: Bytes,
    /// Flags applied to every write.
    #[builder(default)]
    pub write_flags: WriteFlags,
    /// Application-defined properties stored with the metadata.
    #[builder(default)]
    pub custom_metadata: BTreeMap<String, Bytes>,
}

/// Validated quorum sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Quorums {
    pub(crate) ensemble_size: u32,
    pub(crate) write_quorum_size: u32,
    pub(crate) ack_quorum_size: u32,
}

/// Checks `E >= Wq >= Aq >= 1` with all three present.
pub(crate) fn validate_quorums(request: &CreateRequest) -> Result<Quorums, CreateError> {
    let (Some(ensemble_size), Some(write_quorum_size), Some(ack_quorum_size)) =
        (request.ensemble_size, request.write_quorum_size, request.ack_quorum_size)
    else {
        return InvalidArgumentSnafu {
            message: format!(
                "ensemble, write quorum, and ack quorum sizes are required, got {:?}/{:?}/{:?}",
                request.ensemble_size, request.write_quorum_size, request.ack_quorum_size
            ),
        }
        .fail();
    };
    ensure!(
        ack_quorum_size >= 1,
        InvalidArgumentSnafu { message: "ack quorum size must be at least 1".to_string() }
    );
    ensure!(
        write_quorum_size <= ensemble_size,
        InvalidArgumentSnafu {
            message: format!(
                "write quorum size {write_quorum_size} exceeds ensemble size {ensemble_size}"
            ),
        }
    );
    ensure!(
        ack_quorum_size <= write_quorum_size,
        InvalidArgumentSnafu {
            message: format!(
                "ack quorum size {ack_quorum_size} exceeds write quorum size {write_quorum_size}"
            ),
        }
    );
    Ok(Quorums { ensemble_size, write_quorum_size, ack_quorum_size })
}

/// Checks a caller-supplied ledger id against `floor`.
///
/// Returns `None` when the id is [`LedgerId::INVALID`] and the floor admits
/// it, in which case the system allocates the id.
pub(crate) fn validate_advertised_id(
    ledger_id: Option<LedgerId>,
    floor: i64,
) -> Result<Option<LedgerId>, CreateError> {
    let Some(ledger_id) = ledger_id else {
        return InvalidArgumentSnafu { message: "advertised ledger id is required".to_string() }
            .fail();
    };
    ensure!(
        ledger_id.value() >= floor,
        InvalidArgumentSnafu {
            message: format!("advertised ledger id {ledger_id} is below the minimum {floor}"),
        }
    );
    Ok((ledger_id != LedgerId::INVALID).then_some(ledger_id))
}

/// One ledger creation, validated and ready to run.
pub struct LedgerCreateOp {
    services: LedgerServices,
    request: CreateRequest,
    quorums: Quorums,
    /// Caller-supplied id, or `None` to allocate one.
    ledger_id: Option<LedgerId>,
    mode: HandleMode,
}

impl LedgerCreateOp {
    /// Starts creating a ledger with a system-allocated id.
    ///
    /// Returns once the parameters are validated. `callback` runs once on the
    /// bookie client's runtime with the outcome and `ctx`. Without a callback
    /// the ledger is still created and the outcome is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CreateError::InvalidArgument`] if a quorum size is missing or
    /// the sizes violate `E >= Wq >= Aq >= 1`. The callback is not invoked.
    pub fn initiate<C>(
        services: &LedgerServices,
        request: CreateRequest,
        callback: Option<CreateCallback<C>>,
        ctx: C,
    ) -> Result<(), CreateError>
    where
        C: Send + 'static,
    {
        let quorums = validate_quorums(&request)?;
        let op = Self {
            services: services.clone(),
            request,
            quorums,
            ledger_id: None,
            mode: HandleMode::Writer,
        };
        op.spawn(callback, ctx);
        Ok(())
    }

    /// Starts creating a ledger whose id, and whose entry ids, the caller
    /// chooses.
    ///
    /// `ledger_id` must be present and at least the configured
    /// `min_advertised_ledger_id`. A caller-supplied id that already exists
    /// fails with `LedgerExist` and is never replaced.
    ///
    /// # Errors
    ///
    /// Returns [`CreateError::InvalidArgument`] as [`initiate`](Self::initiate)
    /// does, and for a missing or too small `ledger_id`. The callback is not
    /// invoked.
    pub fn initiate_advertised<C>(
        services: &LedgerServices,
        ledger_id: Option<LedgerId>,
        request: CreateRequest,
        callback: Option<CreateCallback<C>>,
        ctx: C,
    ) -> Result<(), CreateError>
    where
        C: Send + 'static,
    {
        let quorums = validate_quorums(&request)?;
        let ledger_id =
            validate_advertised_id(ledger_id, services.config.min_advertised_ledger_id)?;
        let op = Self {
            services: services.clone(),
            request,
            quorums,
            ledger_id,
            mode: HandleMode::AdvertisedWriter,
        };
        op.spawn(callback, ctx);
        Ok(())
    }

    /// Future form of [`initiate`](Self::initiate).
    ///
    /// # Errors
    ///
    /// Returns validation failures synchronously; the future resolves to the
    /// handle or the failure code.
    pub fn create(
        services: &LedgerServices,
        request: CreateRequest,
    ) -> Result<impl Future<Output = Result<LedgerHandle, ResultCode>>, CreateError> {
        let (tx, rx) = oneshot::channel();
        Self::initiate(services, request, Some(reply_to(tx)), ())?;
        Ok(async move { rx.await.unwrap_or(Err(ResultCode::Interrupted)) })
    }

    /// Future form of [`initiate_advertised`](Self::initiate_advertised).
    ///
    /// # Errors
    ///
    /// Returns validation failures synchronously; the future resolves to the
    /// handle or the failure code.
    pub fn create_advertised(
        services: &LedgerServices,
        ledger_id: Option<LedgerId>,
        request: CreateRequest,
    ) -> Result<impl Future<Output = Result<LedgerHandle, ResultCode>>, CreateError> {
        let (tx, rx) = oneshot::channel();
        Self::initiate_advertised(services, ledger_id, request, Some(reply_to(tx)), ())?;
        Ok(async move { rx.await.unwrap_or(Err(ResultCode::Interrupted)) })
    }

    fn spawn<C>(self, callback: Option<CreateCallback<C>>, ctx: C)
    where
        C: Send + 'static,
    {
        let runtime = self.services.bookie_client.runtime().clone();
        runtime.spawn(async move {
            let outcome = run(self).await;
            let Some(callback) = callback else {
                debug!(ok = outcome.is_ok(), "ledger creation finished without a callback");
                return;
            };
            match outcome {
                Ok(handle) => callback(ResultCode::Ok, Some(handle), ctx),
                Err(rc) => callback(rc, None, ctx),
            }
        });
    }

    fn choose_ensemble(&self) -> Result<Vec<BookieId>, PlacementError> {
        let Quorums { ensemble_size, write_quorum_size, ack_quorum_size } = self.quorums;
        let (e, wq, aq) =
            (ensemble_size as usize, write_quorum_size as usize, ack_quorum_size as usize);
        let placement = &self.services.placement;
        let faulty: BTreeSet<BookieId> =
            self.services.bookie_client.get_faulty_bookies().into_iter().collect();
        match placement.new_ensemble(e, wq, aq, &faulty) {
            Err(PlacementError::NotEnoughBookies { available, .. }) if !faulty.is_empty() => {
                warn!(
                    faulty = faulty.len(),
                    healthy = available,
                    "not enough healthy bookies, including faulty ones"
                );
                placement.new_ensemble(e, wq, aq, &BTreeSet::new())
            },
            chosen => chosen,
        }
    }

    /// Opens a pool to every member so the first writes find them connected.
    fn confirm_ensemble(&self, ensemble: &[BookieId]) -> Result<(), ResultCode> {
        for bookie in ensemble {
            match self.services.bookie_client.lookup_client(bookie) {
                Ok(Some(_)) => {},
                Ok(None) => return Err(ResultCode::ClientClosed),
                Err(err) => {
                    warn!(bookie = %bookie, error = %err, "cannot open pool to ensemble member");
                    return Err(ResultCode::BookieHandleNotAvailable);
                },
            }
        }
        Ok(())
    }

    fn metadata(&self, ensemble: Vec<BookieId>) -> LedgerMetadata {
        let Quorums { ensemble_size, write_quorum_size, ack_quorum_size } = self.quorums;
        LedgerMetadata::builder()
            .ensemble_size(ensemble_size)
            .write_quorum_size(write_quorum_size)
            .ack_quorum_size(ack_quorum_size)
            .digest_type(self.request.digest_type)
            .password(self.request.password.clone())
            .write_flags(self.request.write_flags)
            .ensembles(BTreeMap::from([(EntryId::new(0), ensemble)]))
            .maybe_ctime(self.services.config.store_ctime.then(Utc::now))
            .custom_metadata(self.request.custom_metadata.clone())
            .build()
    }

    async fn persist(
        &self,
        metadata: LedgerMetadata,
    ) -> Result<Versioned<LedgerMetadata>, MetadataError> {
        let manager = &self.services.manager;
        if let Some(ledger_id) = self.ledger_id {
            return manager
                .create_ledger_metadata(ledger_id, LedgerMetadata { ledger_id, ..metadata })
                .await;
        }

        let retries = self.services.config.ledger_id_retries;
        let mut attempt = 0;
        loop {
            let ledger_id = manager.allocate_ledger_id().await?;
            let candidate = LedgerMetadata { ledger_id, ..metadata.clone() };
            match manager.create_ledger_metadata(ledger_id, candidate).await {
                Err(MetadataError::LedgerExists { .. }) if attempt < retries => {
                    attempt += 1;
                    debug!(ledger_id = %ledger_id, attempt, "allocated ledger id taken, retrying");
                },
                stored => return stored,
            }
        }
    }
}

impl fmt::Debug for LedgerCreateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerCreateOp")
            .field("quorums", &self.quorums)
            .field("ledger_id", &self.ledger_id)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[instrument(
    skip_all,
    fields(
        ensemble_size = op.quorums.ensemble_size,
        write_quorum_size = op.quorums.write_quorum_size,
        ack_quorum_size = op.quorums.ack_quorum_size,
        advertised = op.mode == HandleMode::AdvertisedWriter,
    )
)]
async fn run(op: LedgerCreateOp) -> Result<LedgerHandle, ResultCode> {
    let ensemble = op.choose_ensemble().map_err(|err| {
        warn!(error = %err, "cannot place ledger");
        err.to_result_code()
    })?;
    if op.services.config.confirm_ensemble {
        op.confirm_ensemble(&ensemble)?;
    }

    let metadata = op.metadata(ensemble);
    let stored = op.persist(metadata).await.map_err(|err| {
        warn!(error = %err, "cannot store ledger metadata");
        err.to_result_code()
    })?;

    let ledger_id = stored.value.ledger_id;
    let ensemble = stored.value.current_ensemble().map(<[_]>::to_vec).unwrap_or_default();
    info!(
        ledger_id = %ledger_id,
        ensemble = ?ensemble.iter().map(BookieId::as_str).collect::<Vec<_>>(),
        "ledger created"
    );
    Ok(LedgerHandle::new(
        Arc::clone(&op.services.bookie_client),
        Arc::clone(&op.services.manager),
        stored,
        op.mode,
    ))
}

fn reply_to(tx: oneshot::Sender<Result<LedgerHandle, ResultCode>>) -> CreateCallback<()> {
    Box::new(move |rc, handle, ()| {
        let _ = tx.send(handle.ok_or(rc));
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use proptest::prelude::*;
    use quire_test_utils::strategies::{arb_invalid_quorums, arb_valid_quorums};

    use super::*;

    fn request(ens: Option<u32>, wq: Option<u32>, aq: Option<u32>) -> CreateRequest {
        CreateRequest::builder()
            .maybe_ensemble_size(ens)
            .maybe_write_quorum_size(wq)
            .maybe_ack_quorum_size(aq)
            .build()
    }

    #[test]
    fn any_missing_size_is_rejected() {
        let cases = [(None, Some(2), Some(2)), (Some(3), None, Some(2)), (Some(3), Some(2), None)];
        for (ens, wq, aq) in cases {
            let err = validate_quorums(&request(ens, wq, aq)).unwrap_err();
            assert_eq!(err.to_result_code(), ResultCode::IncorrectParameter);
            assert!(err.to_string().contains("required"));
        }
    }

    #[test]
    fn ordering_violations_name_the_offending_size() {
        let err = validate_quorums(&request(Some(2), Some(3), Some(1))).unwrap_err();
        assert!(err.to_string().contains("write quorum size 3 exceeds ensemble size 2"));

        let err = validate_quorums(&request(Some(3), Some(2), Some(3))).unwrap_err();
        assert!(err.to_string().contains("ack quorum size 3 exceeds write quorum size 2"));

        let err = validate_quorums(&request(Some(3), Some(2), Some(0))).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn advertised_id_boundaries() {
        assert!(validate_advertised_id(None, 0).is_err());
        assert!(validate_advertised_id(Some(LedgerId::new(-2)), 0).is_err());
        assert!(validate_advertised_id(Some(LedgerId::INVALID), 0).is_err());
        assert_eq!(
            validate_advertised_id(Some(LedgerId::new(0)), 0).unwrap(),
            Some(LedgerId::new(0))
        );
        assert_eq!(validate_advertised_id(Some(LedgerId::INVALID), -1).unwrap(), None);
        assert!(validate_advertised_id(Some(LedgerId::new(-2)), -1).is_err());
        assert!(validate_advertised_id(Some(LedgerId::new(99)), 100).is_err());
    }

    proptest! {
        #[test]
        fn ordered_quorums_are_accepted((ens, wq, aq) in arb_valid_quorums()) {
            let quorums = validate_quorums(&request(Some(ens), Some(wq), Some(aq))).unwrap();
            prop_assert_eq!(quorums.ensemble_size, ens);
            prop_assert_eq!(quorums.write_quorum_size, wq);
            prop_assert_eq!(quorums.ack_quorum_size, aq);
        }

        #[test]
        fn unordered_quorums_are_rejected((ens, wq, aq) in arb_invalid_quorums()) {
            let err = validate_quorums(&request(Some(ens), Some(wq), Some(aq))).unwrap_err();
            prop_assert_eq!(err.to_result_code(), ResultCode::IncorrectParameter);
        }
    }
}
