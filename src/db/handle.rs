//! Database handle state machine.
//!
//! A [`DatabaseHandle`] ties a credential store, a connection provider and a set
//! of lifecycle hooks together and owns the single live native connection.
//!
//! # State transitions
//!
//! ```text
//! Disconnected --connect--> Connected --disconnect--> Disconnected
//!       |                                  ^
//!       +--connect fails--> Error --connect+
//! ```
//!
//! The native connection is present exactly while the status is `Connected`.
//!
//! # Concurrency
//!
//! State lives behind `std::sync::RwLock`s that are never held across an await
//! point. Lifecycle transitions are not serialized against services that are
//! already running: callers must not disconnect or restart a handle while work
//! dispatched against it is in flight.

use crate::db::hooks::LifecycleHooks;
use crate::db::provider::ConnectionProvider;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionStatus, CredentialStore};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Slot holding the live native connection.
#[derive(Debug)]
pub struct ConnectionHandle<C> {
    connection: Option<C>,
}

impl<C> ConnectionHandle<C> {
    fn empty() -> Self {
        Self { connection: None }
    }

    pub fn get(&self) -> Option<&C> {
        self.connection.as_ref()
    }

    pub fn is_present(&self) -> bool {
        self.connection.is_some()
    }

    fn set(&mut self, connection: C) {
        self.connection = Some(connection);
    }

    fn clear(&mut self) -> Option<C> {
        self.connection.take()
    }
}

struct HandleState<C, K> {
    status: ConnectionStatus,
    connection: ConnectionHandle<C>,
    /// Configuration the live connection was opened with.
    config: Option<K>,
}

pub struct DatabaseHandle<P: ConnectionProvider> {
    name: String,
    provider: P,
    hooks: Box<dyn LifecycleHooks<P>>,
    state: RwLock<HandleState<P::Connection, P::Config>>,
    credentials: RwLock<CredentialStore<P::Key>>,
}

impl<P: ConnectionProvider> DatabaseHandle<P> {
    /// Create a disconnected handle with an empty credential store.
    pub fn new(name: impl Into<String>, provider: P, hooks: impl LifecycleHooks<P> + 'static) -> Self {
        Self {
            name: name.into(),
            provider,
            hooks: Box::new(hooks),
            state: RwLock::new(HandleState {
                status: ConnectionStatus::Disconnected,
                connection: ConnectionHandle::empty(),
                config: None,
            }),
            credentials: RwLock::new(CredentialStore::new()),
        }
    }

    /// Builder-style variant of [`set_credentials`](Self::set_credentials).
    pub fn with_credentials(self, credentials: CredentialStore<P::Key>) -> Self {
        self.set_credentials(credentials);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn status(&self) -> ConnectionStatus {
        self.read_state().status
    }

    /// Replace the credential store wholesale.
    pub fn set_credentials(&self, credentials: CredentialStore<P::Key>) {
        *self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = credentials;
    }

    /// Snapshot of the current credential store.
    pub fn credentials(&self) -> CredentialStore<P::Key> {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The live connection, if connected. Services must not close it.
    pub fn connection(&self) -> Option<P::Connection> {
        self.read_state().connection.get().cloned()
    }

    /// Status and connection read under one lock.
    pub fn snapshot(&self) -> (ConnectionStatus, Option<P::Connection>) {
        let state = self.read_state();
        (state.status, state.connection.get().cloned())
    }

    /// True only if the status is `Connected` and the provider still reports
    /// the connection as open.
    pub fn is_connected(&self) -> bool {
        let state = self.read_state();
        state.status.is_connected()
            && state
                .connection
                .get()
                .is_some_and(|connection| self.provider.is_open(connection))
    }

    /// Open the native connection and run the connect hook.
    ///
    /// A hook failure is returned after the handle has become connected.
    pub async fn connect(&self) -> DbResult<()> {
        if self.status() == ConnectionStatus::Connected {
            return Err(DbError::already_connected(&self.name));
        }

        let config = {
            let credentials = self
                .credentials
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            self.provider.configure(&credentials)
        };
        let config = match config {
            Ok(config) => config,
            Err(e) => {
                self.write_state().status = ConnectionStatus::Error;
                self.log_status(ConnectionStatus::Error);
                return Err(e);
            }
        };

        debug!(database = %self.name, "Opening connection");
        let connection = match self.provider.open(&config).await {
            Ok(connection) => connection,
            Err(e) => {
                self.write_state().status = ConnectionStatus::Error;
                self.log_status(ConnectionStatus::Error);
                let suggestion = self.provider.suggestion(&config, &e);
                return Err(DbError::connection_failed(
                    &self.name,
                    format!("Failed to connect: {}", e),
                    suggestion,
                    e,
                ));
            }
        };

        {
            let mut state = self.write_state();
            state.connection.set(connection);
            state.config = Some(config);
            state.status = ConnectionStatus::Connected;
        }
        self.log_status(ConnectionStatus::Connected);

        self.hooks.on_connect(self).await
    }

    /// Close the native connection and run the disconnect hook.
    ///
    /// Without a connection (e.g. after a failed connect) this is a no-op. A
    /// connection the provider already closed is dropped without calling
    /// `close` again.
    pub async fn disconnect(&self) -> DbResult<()> {
        let (status, connection) = self.snapshot();
        if status == ConnectionStatus::Disconnected {
            return Err(DbError::not_connected(&self.name));
        }

        let Some(connection) = connection else {
            debug!(database = %self.name, status = %status, "No connection to close");
            return Ok(());
        };

        if self.provider.is_open(&connection) {
            if let Err(e) = self.provider.close(&connection).await {
                warn!(database = %self.name, error = %e, "Failed to close connection");
                let suggestion = match &self.read_state().config {
                    Some(config) => self.provider.suggestion(config, &e),
                    None => "Check that the database server is reachable".to_string(),
                };
                return Err(DbError::connection_failed(
                    &self.name,
                    format!("Failed to disconnect: {}", e),
                    suggestion,
                    e,
                ));
            }
        } else {
            debug!(database = %self.name, "Connection was already closed by the provider");
        }

        {
            let mut state = self.write_state();
            state.connection.clear();
            state.config = None;
            state.status = ConnectionStatus::Disconnected;
        }
        self.log_status(ConnectionStatus::Disconnected);

        self.hooks.on_disconnect(self).await
    }

    /// Disconnect, connect again, then run the restart hook.
    ///
    /// The first failing step aborts the remaining ones.
    pub async fn restart(&self) -> DbResult<()> {
        info!(database = %self.name, "Restarting connection");
        self.disconnect().await?;
        self.connect().await?;
        self.hooks.on_restart(self).await
    }

    fn log_status(&self, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Connected => {
                info!(database = %self.name, "Connected to {} database successfully", self.name)
            }
            ConnectionStatus::Disconnected => {
                info!(database = %self.name, "Database connection to {} has been closed", self.name)
            }
            ConnectionStatus::Error => {
                warn!(database = %self.name, "Failed to connect to {} database", self.name)
            }
            ConnectionStatus::Idle => debug!(database = %self.name, "Handle is idle"),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, HandleState<P::Connection, P::Config>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, HandleState<P::Connection, P::Config>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P: ConnectionProvider> std::fmt::Debug for DatabaseHandle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read_state();
        f.debug_struct("DatabaseHandle")
            .field("name", &self.name)
            .field("status", &state.status)
            .field("has_connection", &state.connection.is_present())
            .field("credentials", &self.credentials())
            .finish_non_exhaustive()
    }
}
