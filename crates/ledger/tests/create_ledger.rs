//! Ledger creation against mock bookies.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

mod common;

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use common::{PASSWORD, TestCluster, capture, request};
use quire_ledger::{
    CreateCallback, CreateRequest, LedgerCreateOp, LedgerError, LedgerManager, LedgerMetadata,
    MemoryLedgerManager, MetadataError,
};
use quire_test_utils::assert_eventually;
use quire_types::{
    AddFlags, EntryId, LedgerId, ResultCode, WriteFlags,
    config::{ClientConfig, LedgerConfig},
};

fn counting_callback(calls: &Arc<AtomicUsize>) -> CreateCallback<()> {
    let calls = Arc::clone(calls);
    Box::new(move |_, _, ()| {
        calls.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test]
async fn ensemble_of_three_distinct_bookies_is_created() {
    let cluster = TestCluster::new(3).await;
    let (callback, outcome) = capture::<&'static str>();

    LedgerCreateOp::initiate(cluster.client.services(), request(3, 2, 2), Some(callback), "ctx-1")
        .unwrap();
    let (rc, handle, ctx) = outcome.await.unwrap();

    assert_eq!(rc, ResultCode::Ok);
    assert_eq!(ctx, "ctx-1");
    let handle = handle.unwrap();
    let ensemble: BTreeSet<_> = handle.ensemble().into_iter().collect();
    assert_eq!(ensemble, cluster.bookie_ids());
    assert!(cluster.manager.contains(handle.id()));

    let metadata = handle.metadata();
    assert_eq!(
        (metadata.ensemble_size, metadata.write_quorum_size, metadata.ack_quorum_size),
        (3, 2, 2)
    );
    assert!(metadata.ctime.is_some());
    assert!(!handle.is_closed());
    assert!(!handle.is_advertised());
}

#[tokio::test]
async fn too_few_bookies_fail_through_the_callback() {
    let cluster = TestCluster::new(3).await;
    let (callback, outcome) = capture::<u32>();

    LedgerCreateOp::initiate(cluster.client.services(), request(11, 10, 2), Some(callback), 7)
        .unwrap();
    let (rc, handle, ctx) = outcome.await.unwrap();

    assert_eq!(rc, ResultCode::NotEnoughBookies);
    assert!(handle.is_none());
    assert_eq!(ctx, 7);
    assert!(cluster.manager.is_empty());
    assert_eq!(cluster.manager.create_attempts(), 0);
}

#[tokio::test]
async fn invalid_quorums_fail_synchronously_without_callback() {
    let cluster = TestCluster::new(3).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let services = cluster.client.services();

    let cases = [
        CreateRequest::builder().write_quorum_size(2).ack_quorum_size(2).build(),
        CreateRequest::builder().ensemble_size(3).ack_quorum_size(2).build(),
        CreateRequest::builder().ensemble_size(3).write_quorum_size(2).build(),
        request(2, 3, 1),
        request(3, 2, 3),
        request(3, 2, 0),
    ];
    for case in cases {
        let err = LedgerCreateOp::initiate(services, case, Some(counting_callback(&calls)), ())
            .unwrap_err();
        assert_eq!(err.to_result_code(), ResultCode::IncorrectParameter);
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(cluster.manager.create_attempts(), 0);
}

#[tokio::test]
async fn advertised_id_boundaries_with_default_floor() {
    let cluster = TestCluster::new(3).await;
    let services = cluster.client.services();
    let calls = Arc::new(AtomicUsize::new(0));

    for ledger_id in [None, Some(LedgerId::new(-2)), Some(LedgerId::INVALID)] {
        let err = LedgerCreateOp::initiate_advertised(
            services,
            ledger_id,
            request(3, 2, 2),
            Some(counting_callback(&calls)),
            (),
        )
        .unwrap_err();
        assert_eq!(err.to_result_code(), ResultCode::IncorrectParameter);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let handle =
        cluster.client.create_ledger_adv(LedgerId::new(0), request(3, 2, 2)).await.unwrap();
    assert_eq!(handle.id(), LedgerId::new(0));
    assert!(handle.is_advertised());
}

#[tokio::test]
async fn lowered_floor_lets_the_sentinel_allocate() {
    let config = LedgerConfig::builder().min_advertised_ledger_id(-1).build().unwrap();
    let cluster = TestCluster::builder(3)
        .ledger_config(config)
        .manager(MemoryLedgerManager::starting_at(LedgerId::new(40)))
        .start()
        .await;

    let handle =
        cluster.client.create_ledger_adv(LedgerId::INVALID, request(3, 2, 2)).await.unwrap();
    assert_eq!(handle.id(), LedgerId::new(40));
    assert!(handle.is_advertised());

    let err = cluster.client.create_ledger_adv(LedgerId::new(-2), request(3, 2, 2)).await;
    assert!(matches!(err, Err(LedgerError::Create { .. })));
}

#[tokio::test]
async fn duplicate_advertised_id_is_not_retried() {
    let cluster = TestCluster::new(3).await;
    let id = LedgerId::new(12);
    cluster.client.create_ledger_adv(id, request(3, 2, 2)).await.unwrap();

    let err = cluster.client.create_ledger_adv(id, request(3, 2, 2)).await.unwrap_err();
    assert_eq!(err.result_code(), ResultCode::LedgerExist);
    assert_eq!(cluster.manager.create_attempts(), 2);
    assert_eq!(cluster.manager.len(), 1);
}

#[tokio::test]
async fn absent_callback_still_creates_the_ledger() {
    let cluster = TestCluster::new(3).await;
    let services = cluster.client.services();
    LedgerCreateOp::initiate(services, request(3, 3, 2), None::<CreateCallback<()>>, ()).unwrap();

    let manager = Arc::clone(&cluster.manager);
    assert!(assert_eventually(Duration::from_secs(5), || manager.len() == 1).await);
}

#[tokio::test]
async fn metadata_store_failure_is_reported() {
    let cluster = TestCluster::new(3).await;

    cluster.manager.set_unavailable(true);
    let err = cluster.client.create_ledger(request(3, 2, 2)).await.unwrap_err();
    assert_eq!(err.result_code(), ResultCode::MetadataStoreException);
    cluster.manager.set_unavailable(false);

    let expired = MetadataError::MetaStore { message: "session expired".into() };
    cluster.manager.fail_next_create(expired);
    let err = cluster.client.create_ledger(request(3, 2, 2)).await.unwrap_err();
    assert_eq!(err.result_code(), ResultCode::MetadataStoreException);
    assert!(cluster.manager.is_empty());

    cluster.client.create_ledger(request(3, 2, 2)).await.unwrap();
    assert_eq!(cluster.manager.len(), 1);
}

#[tokio::test]
async fn taken_system_id_is_regenerated() {
    let cluster = TestCluster::new(3).await;
    let taken = LedgerMetadata::builder()
        .ledger_id(LedgerId::new(0))
        .ensemble_size(1)
        .write_quorum_size(1)
        .ack_quorum_size(1)
        .build();
    cluster.manager.create_ledger_metadata(LedgerId::new(0), taken).await.unwrap();

    let handle = cluster.client.create_ledger(request(3, 2, 2)).await.unwrap();
    assert_eq!(handle.id(), LedgerId::new(1));
    assert_eq!(cluster.manager.create_attempts(), 3);
}

#[tokio::test]
async fn exhausted_id_retries_report_ledger_exist() {
    let config = LedgerConfig::builder().ledger_id_retries(0).build().unwrap();
    let cluster = TestCluster::builder(3).ledger_config(config).start().await;
    cluster.manager.fail_next_create(MetadataError::LedgerExists { ledger_id: LedgerId::new(0) });

    let err = cluster.client.create_ledger(request(3, 2, 2)).await.unwrap_err();
    assert_eq!(err.result_code(), ResultCode::LedgerExist);
    assert_eq!(cluster.manager.create_attempts(), 1);
}

#[tokio::test]
async fn faulty_bookies_are_avoided_while_enough_remain() {
    let config = ClientConfig::builder().bookie_error_threshold_per_interval(1).build().unwrap();
    let cluster = TestCluster::builder(4).client_config(config).start().await;
    let down = cluster.bookies[0].id().clone();
    cluster.bookies[0].shutdown();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let rc = cluster
        .client
        .bookie_client()
        .add_entry_async(
            &down,
            LedgerId::new(99),
            Bytes::from_static(PASSWORD),
            EntryId::new(0),
            Bytes::from_static(b"probe"),
            AddFlags::empty(),
            WriteFlags::empty(),
        )
        .unwrap()
        .await;
    assert_eq!(rc, Err(ResultCode::BookieHandleNotAvailable));
    assert_eq!(cluster.client.bookie_client().get_faulty_bookies(), vec![down.clone()]);

    for _ in 0..5 {
        let handle = cluster.client.create_ledger(request(3, 2, 2)).await.unwrap();
        assert!(!handle.ensemble().contains(&down));
    }

    // Four members need the faulty bookie too.
    let handle = cluster.client.create_ledger(request(4, 2, 2)).await.unwrap();
    assert!(handle.ensemble().contains(&down));
}

#[tokio::test]
async fn closed_bookie_client_reports_client_closed() {
    let cluster = TestCluster::new(3).await;
    cluster.client.bookie_client().close();

    let err = cluster.client.create_ledger(request(3, 2, 2)).await.unwrap_err();
    assert_eq!(err.result_code(), ResultCode::ClientClosed);
    assert!(cluster.manager.is_empty());
}

#[tokio::test]
async fn write_flags_and_custom_metadata_are_persisted() {
    let cluster = TestCluster::new(3).await;
    let request = CreateRequest::builder()
        .ensemble_size(3)
        .write_quorum_size(3)
        .ack_quorum_size(2)
        .password(Bytes::from_static(PASSWORD))
        .write_flags(WriteFlags::DEFERRED_SYNC)
        .custom_metadata([("application".to_string(), Bytes::from_static(b"journal"))].into())
        .build();

    let handle = cluster.client.create_ledger(request).await.unwrap();
    let stored = cluster.manager.read_ledger_metadata(handle.id()).await.unwrap().value;
    assert_eq!(stored.write_flags, WriteFlags::DEFERRED_SYNC);
    assert_eq!(stored.custom_metadata["application"], Bytes::from_static(b"journal"));
    assert_eq!(stored.password, Bytes::from_static(PASSWORD));
    assert_eq!(handle.write_flags(), WriteFlags::DEFERRED_SYNC);
}

#[tokio::test]
async fn every_ordered_quorum_succeeds_with_enough_bookies() {
    let cluster = TestCluster::new(5).await;
    for ensemble in 1..=5 {
        for write_quorum in 1..=ensemble {
            for ack_quorum in 1..=write_quorum {
                let handle = cluster
                    .client
                    .create_ledger(request(ensemble, write_quorum, ack_quorum))
                    .await
                    .unwrap();
                assert_eq!(handle.ensemble().len(), ensemble as usize);
            }
        }
    }
    assert_eq!(cluster.manager.len(), 35);
}
