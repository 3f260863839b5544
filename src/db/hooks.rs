//! Lifecycle callbacks invoked by a database handle.
//!
//! Hooks receive the owning handle at call time instead of storing a
//! back-reference. A hook failure is returned to the caller of the transition
//! but never undoes it: after a failing `on_connect` the handle is still
//! connected.

use crate::db::handle::DatabaseHandle;
use crate::db::provider::ConnectionProvider;
use crate::error::DbResult;
use futures_util::future::{self, BoxFuture, FutureExt};
use tracing::info;

pub trait LifecycleHooks<P: ConnectionProvider>: Send + Sync {
    /// Called after the handle became connected.
    fn on_connect<'a>(&'a self, handle: &'a DatabaseHandle<P>) -> BoxFuture<'a, DbResult<()>> {
        let _ = handle;
        future::ready(Ok(())).boxed()
    }

    /// Called after the connection was closed.
    fn on_disconnect<'a>(&'a self, handle: &'a DatabaseHandle<P>) -> BoxFuture<'a, DbResult<()>> {
        let _ = handle;
        future::ready(Ok(())).boxed()
    }

    /// Called after a full disconnect/connect cycle.
    fn on_restart<'a>(&'a self, handle: &'a DatabaseHandle<P>) -> BoxFuture<'a, DbResult<()>> {
        let _ = handle;
        future::ready(Ok(())).boxed()
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl<P: ConnectionProvider> LifecycleHooks<P> for NoopHooks {}

/// Hooks that log every transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHooks;

impl<P: ConnectionProvider> LifecycleHooks<P> for LoggingHooks {
    fn on_connect<'a>(&'a self, handle: &'a DatabaseHandle<P>) -> BoxFuture<'a, DbResult<()>> {
        info!(database = %handle.name(), "Connect hook");
        future::ready(Ok(())).boxed()
    }

    fn on_disconnect<'a>(&'a self, handle: &'a DatabaseHandle<P>) -> BoxFuture<'a, DbResult<()>> {
        info!(database = %handle.name(), "Disconnect hook");
        future::ready(Ok(())).boxed()
    }

    fn on_restart<'a>(&'a self, handle: &'a DatabaseHandle<P>) -> BoxFuture<'a, DbResult<()>> {
        info!(database = %handle.name(), "Restart hook");
        future::ready(Ok(())).boxed()
    }
}
