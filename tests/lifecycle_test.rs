mod common;

use common::{MockProvider, RecordingHooks, credentials, mock_handle};
use dbcycle::db::DatabaseHandle;
use dbcycle::error::DbError;
use dbcycle::models::{BasicCredential, ConnectionStatus, CredentialStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_test::{assert_err, assert_ok};

/// The connection is present exactly while the handle is connected.
fn assert_connection_matches_status(handle: &DatabaseHandle<MockProvider>) {
    assert_eq!(
        handle.connection().is_some(),
        handle.status() == ConnectionStatus::Connected,
        "status {} with connection {:?}",
        handle.status(),
        handle.connection().map(|c| c.id)
    );
}

#[tokio::test]
async fn test_new_handle_is_disconnected() {
    let handle = mock_handle(RecordingHooks::default());
    assert_eq!(handle.status(), ConnectionStatus::Disconnected);
    assert!(!handle.is_connected());
    assert_eq!(handle.name(), "mock");
    assert_connection_matches_status(&handle);
}

#[tokio::test]
async fn test_connect_then_disconnect() {
    let hooks = RecordingHooks::default();
    let handle = mock_handle(hooks.clone());

    assert_ok!(handle.connect().await);
    assert_eq!(handle.status(), ConnectionStatus::Connected);
    assert!(handle.is_connected());
    assert_connection_matches_status(&handle);

    assert_ok!(handle.disconnect().await);
    assert_eq!(handle.status(), ConnectionStatus::Disconnected);
    assert!(!handle.is_connected());
    assert_connection_matches_status(&handle);

    assert_eq!(handle.provider().opened(), 1);
    assert_eq!(handle.provider().closed(), 1);
    assert_eq!(hooks.events(), vec!["connect", "disconnect"]);
}

#[tokio::test]
async fn test_connect_twice_is_rejected_without_side_effects() {
    let hooks = RecordingHooks::default();
    let handle = mock_handle(hooks.clone());
    handle.connect().await.unwrap();
    let first = handle.connection().unwrap().id;

    let err = assert_err!(handle.connect().await);
    assert!(matches!(err, DbError::AlreadyConnected { .. }));

    assert_eq!(handle.status(), ConnectionStatus::Connected);
    assert_eq!(handle.connection().unwrap().id, first);
    assert_eq!(handle.provider().opened(), 1);
    assert_eq!(hooks.events(), vec!["connect"]);
}

#[tokio::test]
async fn test_disconnect_when_disconnected_is_rejected() {
    let hooks = RecordingHooks::default();
    let handle = mock_handle(hooks.clone());

    let err = assert_err!(handle.disconnect().await);
    assert!(matches!(err, DbError::NotConnected { .. }));
    assert_eq!(handle.status(), ConnectionStatus::Disconnected);
    assert!(hooks.events().is_empty());
}

#[tokio::test]
async fn test_restart_yields_new_connection() {
    let hooks = RecordingHooks::default();
    let handle = mock_handle(hooks.clone());
    handle.connect().await.unwrap();
    let before = handle.connection().unwrap();

    assert_ok!(handle.restart().await);

    let after = handle.connection().unwrap();
    assert_ne!(before.id, after.id);
    assert!(!before.is_open());
    assert!(after.is_open());
    assert_eq!(handle.status(), ConnectionStatus::Connected);
    assert_eq!(
        hooks.events(),
        vec!["connect", "disconnect", "connect", "restart"]
    );
}

#[tokio::test]
async fn test_restart_when_disconnected_does_nothing() {
    let hooks = RecordingHooks::default();
    let handle = mock_handle(hooks.clone());

    let err = assert_err!(handle.restart().await);
    assert!(matches!(err, DbError::NotConnected { .. }));
    assert_eq!(handle.provider().opened(), 0);
    assert!(hooks.events().is_empty());
}

#[tokio::test]
async fn test_connect_without_credentials_fails_configuration() {
    let hooks = RecordingHooks::default();
    let handle = DatabaseHandle::new("mock", MockProvider::default(), hooks.clone());

    let err = assert_err!(handle.connect().await);
    assert!(matches!(err, DbError::InvalidConfiguration { .. }));
    assert_eq!(handle.status(), ConnectionStatus::Error);
    assert_eq!(handle.provider().opened(), 0);
    assert_connection_matches_status(&handle);
    assert!(hooks.events().is_empty());
}

#[tokio::test]
async fn test_connect_with_partial_credentials_names_missing_key() {
    let mut store = CredentialStore::new();
    store
        .add_text(BasicCredential::Url, "mock://localhost")
        .unwrap();
    let handle = DatabaseHandle::new("mock", MockProvider::default(), RecordingHooks::default())
        .with_credentials(store);

    let err = assert_err!(handle.connect().await);
    assert!(err.to_string().contains("username"));
}

#[tokio::test]
async fn test_open_failure_sets_error_and_recovers() {
    let hooks = RecordingHooks::default();
    let handle = mock_handle(hooks.clone());
    handle.provider().fail_open(true);

    let err = assert_err!(handle.connect().await);
    assert!(matches!(err, DbError::ConnectionFailed { .. }));
    assert_eq!(err.suggestion(), Some("Start the mock server"));
    assert!(std::error::Error::source(&err).is_some());
    assert_eq!(handle.status(), ConnectionStatus::Error);
    assert_connection_matches_status(&handle);

    // nothing to close after a failed connect
    assert_ok!(handle.disconnect().await);
    assert_eq!(handle.status(), ConnectionStatus::Error);
    assert!(hooks.events().is_empty());

    handle.provider().fail_open(false);
    assert_ok!(handle.connect().await);
    assert_eq!(handle.status(), ConnectionStatus::Connected);
    assert_connection_matches_status(&handle);
}

#[tokio::test]
async fn test_provider_closed_connection_is_not_connected() {
    let hooks = RecordingHooks::default();
    let handle = mock_handle(hooks.clone());
    handle.connect().await.unwrap();

    handle.connection().unwrap().force_close();
    assert_eq!(handle.status(), ConnectionStatus::Connected);
    assert!(!handle.is_connected());

    assert_ok!(handle.disconnect().await);
    assert_eq!(handle.status(), ConnectionStatus::Disconnected);
    assert_connection_matches_status(&handle);
    // the provider is not asked to close a dead connection
    assert_eq!(handle.provider().closed(), 0);
    assert_eq!(hooks.events(), vec!["connect", "disconnect"]);
}

#[tokio::test]
async fn test_close_failure_keeps_connection() {
    let hooks = RecordingHooks::default();
    let handle = mock_handle(hooks.clone());
    handle.connect().await.unwrap();
    handle.provider().fail_close(true);

    let err = assert_err!(handle.disconnect().await);
    assert!(matches!(err, DbError::ConnectionFailed { .. }));
    assert_eq!(handle.status(), ConnectionStatus::Connected);
    assert!(handle.is_connected());
    assert_connection_matches_status(&handle);
    assert_eq!(hooks.events(), vec!["connect"]);

    handle.provider().fail_close(false);
    assert_ok!(handle.disconnect().await);
}

#[tokio::test]
async fn test_hook_failure_does_not_roll_back() {
    let hooks = RecordingHooks::default();
    hooks.fail_connect(true);
    let handle = mock_handle(hooks.clone());

    let err = assert_err!(handle.connect().await);
    assert!(matches!(err, DbError::Service { .. }));
    assert_eq!(handle.status(), ConnectionStatus::Connected);
    assert!(handle.is_connected());
    assert_connection_matches_status(&handle);
}

#[tokio::test]
async fn test_credentials_can_be_replaced_between_connections() {
    let handle = mock_handle(RecordingHooks::default());
    handle.connect().await.unwrap();
    handle.disconnect().await.unwrap();

    let mut store = credentials();
    store
        .add_text(BasicCredential::Url, "mock://replica/zobe")
        .unwrap();
    handle.set_credentials(store);

    assert_eq!(
        handle
            .credentials()
            .get::<String>(BasicCredential::Url)
            .unwrap()
            .as_deref(),
        Some("mock://replica/zobe")
    );
    assert_ok!(handle.connect().await);
    assert_eq!(handle.connection().unwrap().id, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_and_connection_change_together() {
    let handle = Arc::new(mock_handle(RecordingHooks::default()));
    let stop = Arc::new(AtomicBool::new(false));

    let reader = {
        let handle = Arc::clone(&handle);
        let stop = Arc::clone(&stop);
        tokio::task::spawn_blocking(move || {
            let mut checks = 0u64;
            loop {
                let (status, connection) = handle.snapshot();
                assert_eq!(
                    connection.is_some(),
                    status == ConnectionStatus::Connected,
                    "status {} with connection {:?}",
                    status,
                    connection.map(|c| c.id)
                );
                checks += 1;
                if stop.load(Ordering::SeqCst) {
                    return checks;
                }
            }
        })
    };

    for _ in 0..200 {
        handle.connect().await.unwrap();
        handle.disconnect().await.unwrap();
    }
    stop.store(true, Ordering::SeqCst);

    assert!(reader.await.unwrap() > 0);
    assert_eq!(handle.provider().opened(), 200);
}
