//! Database abstraction layer.
//!
//! This module provides the connection lifecycle:
//! - Connection provider trait and the sqlx-backed providers
//! - The database handle state machine and its connection slot
//! - Lifecycle hooks
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod handle;
pub mod hooks;
pub mod pool;
pub mod provider;

pub use handle::{ConnectionHandle, DatabaseHandle};
pub use hooks::{LifecycleHooks, LoggingHooks, NoopHooks};
pub use pool::{DbPool, PooledSqlProvider, SqlConfig, SqlProvider};
pub use provider::ConnectionProvider;
