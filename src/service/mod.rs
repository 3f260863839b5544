//! Units of work dispatched against a connected database handle.
//!
//! This module provides:
//! - The [`Service`] trait
//! - The [`ServiceExecutor`] and its dispatch modes
//! - The bounded [`WorkerPool`] backing asynchronous dispatches
//! - Example SQL services

pub mod executor;
pub mod sql;
pub mod task;
pub mod worker;

pub use executor::{DispatchMode, RetryPolicy, ServiceExecutor};
pub use sql::{CreateTableService, InsertService, SelectService};
pub use task::{DispatchState, ServiceTask};
pub use worker::WorkerPool;

use crate::db::{ConnectionProvider, DatabaseHandle};
use crate::error::DbResult;
use futures_util::future::BoxFuture;

/// A unit of work run against a database handle.
pub trait Service<P: ConnectionProvider>: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Whether the service may run against the handle right now.
    ///
    /// Checked once per dispatch, before `run`.
    fn can_run(&self, handle: &DatabaseHandle<P>) -> bool {
        handle.is_connected()
    }

    fn run<'a>(&'a self, handle: &'a DatabaseHandle<P>) -> BoxFuture<'a, DbResult<()>>;
}

/// Last path segment of a type name, without generic arguments.
fn short_type_name(full: &str) -> &str {
    let path = full.split('<').next().unwrap_or(full);
    path.rsplit("::").next().unwrap_or(path)
}
