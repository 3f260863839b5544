//! dbcycle library
//!
//! Database handle lifecycle (connect / disconnect / restart) over sqlx pools,
//! a typed credential store, and dispatch of services against a connected
//! handle in sync, async, timeout and retry modes.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod service;

pub use config::Config;
pub use db::{ConnectionProvider, DatabaseHandle, LifecycleHooks};
pub use error::{DbError, DbResult};
pub use models::{ConnectionStatus, CredentialStore};
pub use service::{DispatchMode, RetryPolicy, Service, ServiceExecutor, ServiceTask, WorkerPool};
