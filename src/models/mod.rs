//! Data models for dbcycle.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod credentials;

// Re-export commonly used types
pub use connection::{ConnectionStatus, DatabaseType};
pub use credentials::{
    BasicCredential, CredentialKey, CredentialKind, CredentialStore, CredentialType,
    CredentialValue, PooledCredential,
};
