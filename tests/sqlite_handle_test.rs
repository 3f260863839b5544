use dbcycle::config::PoolOptions;
use dbcycle::db::{DatabaseHandle, DbPool, LoggingHooks, NoopHooks, PooledSqlProvider, SqlProvider};
use dbcycle::models::{BasicCredential, ConnectionStatus, CredentialStore, PooledCredential};
use dbcycle::service::{
    CreateTableService, DispatchMode, InsertService, RetryPolicy, SelectService, Service,
    ServiceExecutor, WorkerPool,
};
use dbcycle::DbError;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

fn random_name() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

fn sqlite_credentials(file: &NamedTempFile) -> CredentialStore<BasicCredential> {
    let mut store = CredentialStore::new();
    store
        .add_text(
            BasicCredential::Url,
            format!("sqlite:{}", file.path().display()),
        )
        .unwrap();
    store.add_text(BasicCredential::Username, "zobe").unwrap();
    store.add_text(BasicCredential::Password, "easypass").unwrap();
    store
}

async fn connected_sqlite(file: &NamedTempFile) -> Arc<DatabaseHandle<SqlProvider>> {
    let handle = DatabaseHandle::new("sqlite", SqlProvider::new(PoolOptions::default()), LoggingHooks)
        .with_credentials(sqlite_credentials(file));
    handle.connect().await.unwrap();
    Arc::new(handle)
}

#[tokio::test]
async fn test_insert_and_select_round_trip() {
    let file = NamedTempFile::new().unwrap();
    let handle = connected_sqlite(&file).await;
    let executor = ServiceExecutor::new(WorkerPool::new(2).unwrap());

    executor
        .run(&handle, &CreateTableService::new("test").unwrap())
        .await
        .unwrap();

    let names: Vec<String> = (0..5).map(|_| random_name()).collect();
    for name in &names {
        let insert = InsertService::new("test", name.as_str()).unwrap();
        executor.run(&handle, &insert).await.unwrap();
    }

    let select = Arc::new(SelectService::new("test").unwrap());
    let service: Arc<dyn Service<SqlProvider>> = select.clone();
    executor
        .dispatch(Arc::clone(&handle), service, DispatchMode::Async)
        .await
        .await
        .unwrap();

    assert_eq!(select.records(), names);
    handle.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_async_inserts_in_retry_mode() {
    let file = NamedTempFile::new().unwrap();
    let handle = connected_sqlite(&file).await;
    let executor = ServiceExecutor::new(WorkerPool::new(4).unwrap());
    executor
        .run(&handle, &CreateTableService::new("people").unwrap())
        .await
        .unwrap();

    let mode = DispatchMode::Retry(RetryPolicy::new(3, Duration::from_millis(10)));
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let insert: Arc<dyn Service<SqlProvider>> =
            Arc::new(InsertService::new("people", random_name()).unwrap());
        tasks.push(executor.dispatch(Arc::clone(&handle), insert, mode).await);
    }
    for task in tasks {
        task.await.unwrap();
    }

    let select = SelectService::new("people").unwrap();
    executor.run(&handle, &select).await.unwrap();
    assert_eq!(select.records().len(), 8);

    executor.shutdown().await;
    handle.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_missing_table_is_database_error() {
    let file = NamedTempFile::new().unwrap();
    let handle = connected_sqlite(&file).await;
    let executor = ServiceExecutor::new(WorkerPool::new(1).unwrap());

    let select = SelectService::new("nowhere").unwrap();
    let err = executor.run(&handle, &select).await.unwrap_err();
    assert!(matches!(err, DbError::Database { .. }));
}

#[tokio::test]
async fn test_restart_replaces_pool_and_keeps_data() {
    let file = NamedTempFile::new().unwrap();
    let handle = connected_sqlite(&file).await;
    let executor = ServiceExecutor::new(WorkerPool::new(1).unwrap());
    executor
        .run(&handle, &CreateTableService::new("test").unwrap())
        .await
        .unwrap();
    executor
        .run(&handle, &InsertService::new("test", "before").unwrap())
        .await
        .unwrap();

    let old_pool = handle.connection().unwrap();
    handle.restart().await.unwrap();
    assert!(old_pool.is_closed());
    assert_eq!(handle.status(), ConnectionStatus::Connected);

    let select = SelectService::new("test").unwrap();
    executor.run(&handle, &select).await.unwrap();
    assert_eq!(select.records(), vec!["before".to_string()]);

    handle.disconnect().await.unwrap();
    assert!(old_pool.is_closed());
    assert!(handle.connection().is_none());
}

#[tokio::test]
async fn test_services_refuse_closed_handle() {
    let file = NamedTempFile::new().unwrap();
    let handle = connected_sqlite(&file).await;
    let executor = ServiceExecutor::new(WorkerPool::new(1).unwrap());
    handle.disconnect().await.unwrap();

    let insert = InsertService::new("test", "late").unwrap();
    let err = executor.run(&handle, &insert).await.unwrap_err();
    assert!(matches!(err, DbError::NotServable { .. }));
}

#[tokio::test]
async fn test_pooled_provider_opens_sqlite() {
    let file = NamedTempFile::new().unwrap();
    let mut store = CredentialStore::new();
    store
        .add_text(PooledCredential::Url, file.path().display().to_string())
        .unwrap();
    store.add_text(PooledCredential::Username, "zobe").unwrap();
    store.add_text(PooledCredential::Password, "easypass").unwrap();
    store.add_text(PooledCredential::Driver, "sqlite").unwrap();
    store.add(PooledCredential::Port, 1u16).unwrap();
    store.add(PooledCredential::MaxPoolSize, 2u32).unwrap();

    let handle = DatabaseHandle::new(
        "pooled",
        PooledSqlProvider::new(PoolOptions::default()),
        NoopHooks,
    )
    .with_credentials(store);

    handle.connect().await.unwrap();
    assert!(handle.is_connected());
    assert!(matches!(handle.connection(), Some(DbPool::SQLite(_))));
    handle.disconnect().await.unwrap();
    assert_eq!(handle.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_unreachable_server_reports_suggestion() {
    let mut store = CredentialStore::new();
    store
        .add_text(BasicCredential::Url, "postgres://127.0.0.1:1/zobe")
        .unwrap();
    store.add_text(BasicCredential::Username, "root").unwrap();
    store.add_text(BasicCredential::Password, "easypass").unwrap();

    let options = PoolOptions {
        acquire_timeout_secs: Some(2),
        ..PoolOptions::default()
    };
    let handle = DatabaseHandle::new("unreachable", SqlProvider::new(options), NoopHooks)
        .with_credentials(store);

    let err = handle.connect().await.unwrap_err();
    assert!(matches!(err, DbError::ConnectionFailed { .. }));
    let suggestion = err.suggestion().unwrap();
    assert!(
        suggestion.contains("PostgreSQL") || suggestion.contains("postgres://"),
        "suggestion: {}",
        suggestion
    );
    assert_eq!(handle.status(), ConnectionStatus::Error);
    assert!(handle.connection().is_none());
}
