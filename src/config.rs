//! Configuration handling for dbcycle.
//!
//! This module provides configuration management via CLI arguments and environment variables.

use crate::error::{DbError, DbResult};
use crate::models::{BasicCredential, CredentialStore, PooledCredential};
use crate::service::{DispatchMode, RetryPolicy};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_TABLE: &str = "test";
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 100;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Connection pool tuning applied by the SQL providers.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 for MySQL/PostgreSQL, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// Get min_connections with default value, never above max_connections.
    pub fn min_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.min_connections
            .unwrap_or(DEFAULT_MIN_CONNECTIONS)
            .min(self.max_connections_or_default(is_sqlite))
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    /// Get test_before_acquire with default value.
    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        if let Some(min) = self.min_connections {
            if let Some(max) = self.max_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        Ok(())
    }
}

/// How the demo services are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ModeArg {
    /// Run inline on the caller's task
    #[default]
    Sync,
    /// Submit to the worker pool
    Async,
    /// Submit to the worker pool with a deadline
    Timeout,
    /// Submit to the worker pool with bounded retries
    Retry,
}

impl std::fmt::Display for ModeArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Async => write!(f, "async"),
            Self::Timeout => write!(f, "timeout"),
            Self::Retry => write!(f, "retry"),
        }
    }
}

/// Configuration for the dbcycle demo binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dbcycle",
    about = "Connect a database handle, dispatch services against it and cycle it",
    version,
    author
)]
pub struct Config {
    /// Database URL, e.g. mysql://localhost:3306/zobe or sqlite:data.db
    #[arg(short = 'd', long = "database-url", value_name = "URL", env = "DBCYCLE_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Database user name
    #[arg(short, long, env = "DBCYCLE_USERNAME")]
    pub username: Option<String>,

    /// Database password
    #[arg(short, long, env = "DBCYCLE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// JSON file holding a serialized credential store (overrides URL/user/password flags)
    #[arg(long, value_name = "PATH", env = "DBCYCLE_CREDENTIALS_FILE")]
    pub credentials_file: Option<PathBuf>,

    /// Use the pooled credential set (driver, port and max pool size are required)
    #[arg(long, env = "DBCYCLE_POOLED")]
    pub pooled: bool,

    /// Driver name for pooled mode (mysql, mariadb, postgres, sqlite)
    #[arg(long, env = "DBCYCLE_DRIVER")]
    pub driver: Option<String>,

    /// Server port for pooled mode
    #[arg(long, env = "DBCYCLE_PORT")]
    pub port: Option<u16>,

    /// Maximum pool size for pooled mode
    #[arg(long, env = "DBCYCLE_MAX_POOL_SIZE")]
    pub max_pool_size: Option<u32>,

    /// Minimum connections kept open by the pool
    #[arg(long, env = "DBCYCLE_MIN_CONNECTIONS")]
    pub min_connections: Option<u32>,

    /// Pool acquire timeout in seconds
    #[arg(long, env = "DBCYCLE_ACQUIRE_TIMEOUT")]
    pub acquire_timeout: Option<u64>,

    /// Worker pool size (0 = twice the available parallelism)
    #[arg(long, default_value_t = 0, env = "DBCYCLE_WORKERS")]
    pub workers: usize,

    /// Table used by the demo services
    #[arg(long, default_value = DEFAULT_TABLE, env = "DBCYCLE_TABLE")]
    pub table: String,

    /// Name rows inserted by the demo
    #[arg(long = "insert", value_name = "NAME", value_delimiter = ',')]
    pub names: Vec<String>,

    /// Dispatch mode for the demo services
    #[arg(short, long, value_enum, default_value = "sync", env = "DBCYCLE_MODE")]
    pub mode: ModeArg,

    /// Deadline for timeout mode in milliseconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS, env = "DBCYCLE_TIMEOUT_MS")]
    pub timeout_ms: u64,

    /// Maximum attempts for retry mode
    #[arg(long, default_value_t = DEFAULT_RETRY_ATTEMPTS, env = "DBCYCLE_RETRY_ATTEMPTS")]
    pub retry_attempts: u32,

    /// Base backoff delay for retry mode in milliseconds
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY_MS, env = "DBCYCLE_RETRY_DELAY_MS")]
    pub retry_delay_ms: u64,

    /// Restart the handle before disconnecting
    #[arg(long, env = "DBCYCLE_RESTART")]
    pub restart: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DBCYCLE_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DBCYCLE_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            database_url: None,
            username: None,
            password: None,
            credentials_file: None,
            pooled: false,
            driver: None,
            port: None,
            max_pool_size: None,
            min_connections: None,
            acquire_timeout: None,
            workers: 0,
            table: DEFAULT_TABLE.to_string(),
            names: Vec::new(),
            mode: ModeArg::Sync,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            restart: false,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Pool tuning derived from the flags.
    pub fn pool_options(&self) -> DbResult<PoolOptions> {
        let options = PoolOptions {
            max_connections: self.max_pool_size,
            min_connections: self.min_connections,
            acquire_timeout_secs: self.acquire_timeout,
            ..PoolOptions::default()
        };
        options.validate().map_err(DbError::invalid_configuration)?;
        Ok(options)
    }

    /// Dispatch mode selected on the command line.
    pub fn dispatch_mode(&self) -> DispatchMode {
        match self.mode {
            ModeArg::Sync => DispatchMode::Sync,
            ModeArg::Async => DispatchMode::Async,
            ModeArg::Timeout => DispatchMode::Timeout(Duration::from_millis(self.timeout_ms)),
            ModeArg::Retry => DispatchMode::Retry(RetryPolicy::new(
                self.retry_attempts,
                Duration::from_millis(self.retry_delay_ms),
            )),
        }
    }

    /// Build the basic credential set from a credentials file or the flags.
    pub fn basic_credentials(&self) -> DbResult<CredentialStore<BasicCredential>> {
        if let Some(path) = &self.credentials_file {
            return load_credentials(path);
        }
        let mut store = CredentialStore::new();
        if let Some(url) = &self.database_url {
            store.add_text(BasicCredential::Url, url.as_str())?;
        }
        if let Some(username) = &self.username {
            store.add_text(BasicCredential::Username, username.as_str())?;
        }
        if let Some(password) = &self.password {
            store.add_text(BasicCredential::Password, password.as_str())?;
        }
        Ok(store)
    }

    /// Build the pooled credential set from a credentials file or the flags.
    pub fn pooled_credentials(&self) -> DbResult<CredentialStore<PooledCredential>> {
        if let Some(path) = &self.credentials_file {
            return load_credentials(path);
        }
        let mut store = CredentialStore::new();
        if let Some(url) = &self.database_url {
            store.add_text(PooledCredential::Url, url.as_str())?;
        }
        if let Some(username) = &self.username {
            store.add_text(PooledCredential::Username, username.as_str())?;
        }
        if let Some(password) = &self.password {
            store.add_text(PooledCredential::Password, password.as_str())?;
        }
        if let Some(driver) = &self.driver {
            store.add_text(PooledCredential::Driver, driver.as_str())?;
        }
        if let Some(port) = self.port {
            store.add(PooledCredential::Port, port)?;
        }
        if let Some(max_pool_size) = self.max_pool_size {
            store.add(PooledCredential::MaxPoolSize, max_pool_size)?;
        }
        Ok(store)
    }

    /// Database URL with any password replaced, safe for logs.
    pub fn masked_database_url(&self) -> Option<String> {
        self.database_url.as_deref().map(mask_url)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Read a serialized credential store from a JSON file.
fn load_credentials<K>(path: &std::path::Path) -> DbResult<CredentialStore<K>>
where
    K: crate::models::CredentialKey + serde::de::DeserializeOwned,
{
    let content = std::fs::read_to_string(path).map_err(|e| {
        DbError::invalid_configuration(format!(
            "Cannot read credentials file {}: {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        DbError::invalid_configuration(format!(
            "Invalid credentials file {}: {}",
            path.display(),
            e
        ))
    })
}

/// Replace the password component of a URL with `****`.
pub fn mask_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("****")).is_ok() {
                url.to_string()
            } else {
                raw.to_string()
            }
        }
        _ => raw.to_string(),
    }
}
