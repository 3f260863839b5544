//! Shared fixtures: an in-memory connection provider and recording hooks.

#![allow(dead_code)]

use dbcycle::db::{ConnectionProvider, DatabaseHandle, LifecycleHooks};
use dbcycle::error::{DbError, DbResult};
use dbcycle::models::{BasicCredential, CredentialStore};
use futures_util::future::{self, BoxFuture, FutureExt};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Connection handed out by [`MockProvider`]. Clones share the open flag.
#[derive(Debug, Clone)]
pub struct MockConnection {
    pub id: u32,
    open: Arc<AtomicBool>,
}

impl MockConnection {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Simulate the server dropping the connection.
    pub fn force_close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, thiserror::Error)]
#[error("mock provider failure: {0}")]
pub struct MockError(pub String);

#[derive(Debug, Default)]
pub struct MockProvider {
    next_id: AtomicU32,
    closed: AtomicU32,
    fail_open: AtomicBool,
    fail_close: AtomicBool,
}

impl MockProvider {
    pub fn opened(&self) -> u32 {
        self.next_id.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }
}

impl ConnectionProvider for MockProvider {
    type Key = BasicCredential;
    type Config = String;
    type Connection = MockConnection;
    type Error = MockError;

    fn configure(&self, credentials: &CredentialStore<BasicCredential>) -> DbResult<String> {
        let url: String = credentials.require(BasicCredential::Url)?;
        let _: String = credentials.require(BasicCredential::Username)?;
        let _: String = credentials.require(BasicCredential::Password)?;
        Ok(url)
    }

    async fn open(&self, url: &String) -> Result<MockConnection, MockError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(MockError(format!("cannot reach {}", url)));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockConnection {
            id,
            open: Arc::new(AtomicBool::new(true)),
        })
    }

    fn is_open(&self, connection: &MockConnection) -> bool {
        connection.is_open()
    }

    async fn close(&self, connection: &MockConnection) -> Result<(), MockError> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(MockError("close rejected".to_string()));
        }
        connection.force_close();
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn suggestion(&self, _config: &String, _error: &MockError) -> String {
        "Start the mock server".to_string()
    }
}

/// Hooks that record the order in which they fire.
#[derive(Debug, Clone, Default)]
pub struct RecordingHooks {
    events: Arc<Mutex<Vec<&'static str>>>,
    fail_connect: Arc<AtomicBool>,
}

impl RecordingHooks {
    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    fn record(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }
}

impl LifecycleHooks<MockProvider> for RecordingHooks {
    fn on_connect<'a>(
        &'a self,
        handle: &'a DatabaseHandle<MockProvider>,
    ) -> BoxFuture<'a, DbResult<()>> {
        self.record("connect");
        // hooks observe the already-updated handle
        assert!(handle.connection().is_some());
        if self.fail_connect.load(Ordering::SeqCst) {
            return future::ready(Err(DbError::service("on_connect", "hook failed"))).boxed();
        }
        future::ready(Ok(())).boxed()
    }

    fn on_disconnect<'a>(
        &'a self,
        handle: &'a DatabaseHandle<MockProvider>,
    ) -> BoxFuture<'a, DbResult<()>> {
        self.record("disconnect");
        assert!(handle.connection().is_none());
        future::ready(Ok(())).boxed()
    }

    fn on_restart<'a>(
        &'a self,
        _handle: &'a DatabaseHandle<MockProvider>,
    ) -> BoxFuture<'a, DbResult<()>> {
        self.record("restart");
        future::ready(Ok(())).boxed()
    }
}

pub fn credentials() -> CredentialStore<BasicCredential> {
    let mut store = CredentialStore::new();
    store
        .add_text(BasicCredential::Url, "mock://localhost/zobe")
        .unwrap();
    store.add_text(BasicCredential::Username, "root").unwrap();
    store.add_text(BasicCredential::Password, "easypass").unwrap();
    store
}

/// A disconnected handle over a fresh mock provider with valid credentials.
pub fn mock_handle(hooks: RecordingHooks) -> DatabaseHandle<MockProvider> {
    DatabaseHandle::new("mock", MockProvider::default(), hooks).with_credentials(credentials())
}

/// Connected handle behind an `Arc`, ready for dispatch.
pub async fn connected_handle() -> Arc<DatabaseHandle<MockProvider>> {
    let handle = mock_handle(RecordingHooks::default());
    handle.connect().await.unwrap();
    Arc::new(handle)
}
