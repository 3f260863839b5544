//! Connection provider abstraction.
//!
//! A provider turns a validated credential set into a native connection and
//! knows how to check and close it. The SQL providers live in [`super::pool`].

use crate::error::DbResult;
use crate::models::{CredentialKey, CredentialStore};
use std::future::Future;

/// Opens, checks and closes native connections for a [`DatabaseHandle`](super::DatabaseHandle).
pub trait ConnectionProvider: Send + Sync + 'static {
    /// Closed set of credential slots this provider reads.
    type Key: CredentialKey;
    /// Validated connection parameters extracted from the credential store.
    type Config: Send + Sync;
    /// The native connection handed to services. Clones share the same resource.
    type Connection: Clone + Send + Sync + 'static;
    /// Provider-specific failure.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Extract the required credentials.
    ///
    /// A missing or mistyped credential must fail with
    /// [`DbError::InvalidConfiguration`](crate::DbError::InvalidConfiguration).
    fn configure(&self, credentials: &CredentialStore<Self::Key>) -> DbResult<Self::Config>;

    /// Open a native connection.
    fn open(
        &self,
        config: &Self::Config,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;

    /// Whether the connection is still usable.
    fn is_open(&self, connection: &Self::Connection) -> bool;

    /// Close the connection.
    fn close(
        &self,
        connection: &Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Hint shown to the user when `open` or `close` fails for `config`.
    fn suggestion(&self, config: &Self::Config, error: &Self::Error) -> String {
        let _ = (config, error);
        "Check that the database server is reachable and the credentials are valid".to_string()
    }
}
