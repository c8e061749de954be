//! Policy hook behavior against a counting fake backend
//!
//! Run with: cargo test --test policy_lifecycle

mod common;

use common::{init_tracing, CountingConnector};
use fraiseql_connect::{
    AsyncPolicy, ConnectionHandle, ConnectionPolicy, ConnectionState, DirectPolicy, Error,
    LazyPolicy, ManagedConnection, NullPolicy,
};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const INVALID_OPTIONS: &[&str] = &["bad=opts", "host", "dbname=app nonsense", "mode=refuse x"];

#[tokio::test]
async fn test_direct_invalid_options_fail_at_start() {
    init_tracing();
    for options in INVALID_OPTIONS {
        let connector = CountingConnector::default();
        let ledger = connector.ledger.clone();
        let mut policy = DirectPolicy::with_connector(*options, connector);

        let err = assert_err!(policy.start(ConnectionHandle::Empty).await);
        assert!(err.is_connect_failure(), "{}: {}", options, err);
        assert_eq!(ledger.open_count(), 0);
    }
}

#[tokio::test]
async fn test_lazy_invalid_options_fail_at_first_use() {
    init_tracing();
    for options in INVALID_OPTIONS {
        let mut policy = LazyPolicy::with_connector(*options, CountingConnector::default());

        let handle = assert_ok!(policy.start(ConnectionHandle::Empty).await);
        assert!(handle.is_empty());

        let err = assert_err!(policy.complete(handle).await);
        assert!(err.is_connect_failure(), "{}: {}", options, err);
    }
}

#[tokio::test]
async fn test_direct_construction_fails_without_leaking() {
    init_tracing();
    for options in INVALID_OPTIONS.iter().chain(&["mode=refuse"]) {
        let connector = CountingConnector::default();
        let ledger = connector.ledger.clone();

        let err = assert_err!(
            ManagedConnection::new(DirectPolicy::with_connector(*options, connector)).await
        );
        assert!(err.is_connect_failure(), "{}: {}", options, err);
        assert_eq!(ledger.open_count(), 0, "{}", options);
    }
}

#[tokio::test]
async fn test_lazy_construction_succeeds_then_first_use_fails() {
    init_tracing();
    for options in INVALID_OPTIONS {
        let connector = CountingConnector::default();
        let ledger = connector.ledger.clone();
        let mut conn = assert_ok!(
            ManagedConnection::new(LazyPolicy::with_connector(*options, connector)).await
        );
        assert_eq!(conn.state(), ConnectionState::NotStarted);

        let err = assert_err!(conn.activate().await);
        assert!(err.is_connect_failure(), "{}: {}", options, err);
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert_eq!(ledger.open_count(), 0);
    }
}

#[tokio::test]
async fn test_postgres_direct_rejects_bad_options_at_construction() {
    init_tracing();
    for options in ["bad=opts", "host", "port=0", "sslmode=maybe"] {
        let err = assert_err!(ManagedConnection::new(DirectPolicy::new(options)).await);
        assert!(err.is_connect_failure(), "{}: {}", options, err);
    }

    let err = assert_err!(ManagedConnection::new(DirectPolicy::new("bad=opts")).await);
    assert!(err.to_string().contains("invalid connection option \"bad\""));
}

#[tokio::test]
async fn test_postgres_lazy_reports_bad_options_on_activate() {
    init_tracing();
    let mut conn = assert_ok!(ManagedConnection::new(LazyPolicy::new("bad=opts")).await);
    assert_eq!(conn.state(), ConnectionState::NotStarted);

    let err = assert_err!(conn.activate().await);
    assert!(err.is_connect_failure());
    assert!(err.to_string().contains("invalid connection option \"bad\""));
    assert_eq!(conn.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn test_async_polling_reaches_ready_then_completes() {
    init_tracing();
    let connector = CountingConnector::with_delay(Duration::from_millis(25));
    let ledger = connector.ledger.clone();
    let mut policy = AsyncPolicy::with_connector("host=db dbname=app", connector);

    let handle = assert_ok!(policy.start(ConnectionHandle::Empty).await);
    assert!(handle.is_connecting());

    let mut saw_not_ready = false;
    let mut polls = 0;
    while !policy.is_ready(&handle) {
        saw_not_ready = true;
        polls += 1;
        assert!(polls < 2_000, "attempt never concluded");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(saw_not_ready);

    let handle = assert_ok!(policy.complete(handle).await);
    assert!(handle.is_connected());
    assert_eq!(ledger.open_count(), 1);
}

#[tokio::test]
async fn test_async_complete_matches_outcome_whenever_called() {
    init_tracing();
    // Completing immediately and completing after readiness agree
    for wait_first in [false, true] {
        for (options, succeeds) in [("dbname=app", true), ("mode=refuse", false)] {
            let connector = CountingConnector::with_delay(Duration::from_millis(5));
            let mut policy = AsyncPolicy::with_connector(options, connector);
            let handle = assert_ok!(policy.start(ConnectionHandle::Empty).await);

            if wait_first {
                while !policy.is_ready(&handle) {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }

            let outcome = policy.complete(handle).await;
            assert_eq!(outcome.is_ok(), succeeds, "{} wait_first={}", options, wait_first);
            if let Err(err) = outcome {
                assert!(err.is_connect_failure());
                assert!(err.to_string().contains("password authentication failed"));
            }
        }
    }
}

#[tokio::test]
async fn test_null_policy_always_fails() {
    init_tracing();
    for options in ["anything", "", "host=db dbname=app", "bad=opts"] {
        let mut policy = NullPolicy::<u32>::typed(options);

        let handle = assert_ok!(policy.start(ConnectionHandle::Empty).await);
        assert!(handle.is_empty());
        assert!(policy.is_ready(&handle));

        match policy.complete(handle).await {
            Err(Error::ConnectFailure(msg)) => assert_eq!(msg, "null policy"),
            other => panic!("expected null policy failure, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_start_then_drop_releases_everything() {
    init_tracing();

    let connector = CountingConnector::default();
    let ledger = connector.ledger.clone();
    let mut direct = DirectPolicy::with_connector("dbname=app", connector);
    let handle = assert_ok!(direct.start(ConnectionHandle::Empty).await);
    assert_eq!(ledger.open_count(), 1);
    assert!(direct.drop_connection(handle).is_empty());
    assert_eq!(ledger.open_count(), 0);

    let connector = CountingConnector::default();
    let ledger = connector.ledger.clone();
    let mut lazy = LazyPolicy::with_connector("dbname=app", connector);
    let handle = assert_ok!(lazy.start(ConnectionHandle::Empty).await);
    assert!(lazy.drop_connection(handle).is_empty());
    assert_eq!(ledger.total_opened(), 0);

    let connector = CountingConnector::with_delay(Duration::from_secs(60));
    let ledger = connector.ledger.clone();
    let mut asynchronous = AsyncPolicy::with_connector("dbname=app", connector);
    let handle = assert_ok!(asynchronous.start(ConnectionHandle::Empty).await);
    // Give the attempt time to acquire its socket
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(asynchronous.drop_connection(handle).is_empty());
    assert_eq!(ledger.settle().await, 0);

    let mut null = NullPolicy::<u32>::typed("dbname=app");
    let handle = assert_ok!(null.start(ConnectionHandle::Empty).await);
    assert!(null.drop_connection(handle).is_empty());
}

#[tokio::test]
async fn test_drop_is_idempotent_on_every_handle_state() {
    init_tracing();
    let connector = CountingConnector::with_delay(Duration::from_secs(60));
    let ledger = connector.ledger.clone();
    let mut policy = AsyncPolicy::with_connector("dbname=app", connector);

    // Not started
    let handle = policy.drop_connection(ConnectionHandle::Empty);
    assert!(policy.drop_connection(handle).is_empty());

    // Connecting
    let handle = assert_ok!(policy.start(ConnectionHandle::Empty).await);
    let handle = policy.drop_connection(handle);
    assert!(policy.drop_connection(handle).is_empty());
    assert_eq!(ledger.settle().await, 0);

    // Connected
    let connector = CountingConnector::default();
    let ledger = connector.ledger.clone();
    let mut policy = AsyncPolicy::with_connector("dbname=app", connector);
    let handle = assert_ok!(policy.start(ConnectionHandle::Empty).await);
    let handle = assert_ok!(policy.complete(handle).await);
    assert_eq!(ledger.open_count(), 1);
    let handle = policy.drop_connection(handle);
    assert_eq!(ledger.open_count(), 0);
    assert!(policy.drop_connection(handle).is_empty());

    // Failed: complete consumed the handle, the caller is left with an empty one
    let mut policy = AsyncPolicy::with_connector("mode=refuse", CountingConnector::default());
    let handle = assert_ok!(policy.start(ConnectionHandle::Empty).await);
    assert_err!(policy.complete(handle).await);
    let handle = policy.drop_connection(ConnectionHandle::Empty);
    assert!(policy.drop_connection(handle).is_empty());
}

#[tokio::test]
async fn test_async_requires_no_waiting_to_start() {
    init_tracing();
    let connector = CountingConnector::with_delay(Duration::from_secs(60));
    let mut policy = AsyncPolicy::with_connector("dbname=app", connector);

    // start returns long before the 60s connect would finish
    let started = tokio::time::timeout(
        Duration::from_secs(1),
        policy.start(ConnectionHandle::Empty),
    )
    .await;
    let handle = assert_ok!(assert_ok!(started));
    assert!(!policy.is_ready(&handle));
    policy.drop_connection(handle);
}
