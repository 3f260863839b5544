//! SQL connection providers.
//!
//! This module opens database-specific pools (MySqlPool, PgPool, SqlitePool) to
//! ensure full type support. The pool is the native connection a
//! [`DatabaseHandle`](super::DatabaseHandle) owns and services borrow.

use crate::config::PoolOptions;
use crate::db::provider::ConnectionProvider;
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::{
    BasicCredential, CredentialKey, CredentialStore, DatabaseType, PooledCredential,
};
use sqlx::{
    MySqlPool, PgPool, SqlitePool,
    mysql::{MySqlConnectOptions, MySqlPoolOptions},
    postgres::{PgConnectOptions, PgPoolOptions},
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.close().await,
            Postgres(pool) => pool.close().await,
            SQLite(pool) => pool.close().await,
        })
    }

    pub fn is_closed(&self) -> bool {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.is_closed(),
            Postgres(pool) => pool.is_closed(),
            SQLite(pool) => pool.is_closed(),
        })
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// Validated parameters for opening a SQL pool.
#[derive(Clone)]
pub struct SqlConfig {
    pub db_type: DatabaseType,
    /// Contains sensitive data - never log
    pub url: String,
    pub username: String,
    pub password: String,
    pub port: Option<u16>,
    pub pool_options: PoolOptions,
}

impl std::fmt::Debug for SqlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlConfig")
            .field("db_type", &self.db_type)
            .field("username", &self.username)
            .field("port", &self.port)
            .field("pool_options", &self.pool_options)
            .finish_non_exhaustive()
    }
}

/// Provider for the minimal credential set: url, username and password.
///
/// The backend is detected from the URL scheme.
#[derive(Debug, Clone, Default)]
pub struct SqlProvider {
    pool_options: PoolOptions,
}

impl SqlProvider {
    pub fn new(pool_options: PoolOptions) -> Self {
        Self { pool_options }
    }
}

impl ConnectionProvider for SqlProvider {
    type Key = BasicCredential;
    type Config = SqlConfig;
    type Connection = DbPool;
    type Error = sqlx::Error;

    fn configure(&self, credentials: &CredentialStore<BasicCredential>) -> DbResult<SqlConfig> {
        let url: String = credentials.require(BasicCredential::Url)?;
        let username = credentials.require(BasicCredential::Username)?;
        let password = credentials.require(BasicCredential::Password)?;

        let db_type = DatabaseType::from_connection_string(&url).ok_or_else(|| {
            DbError::invalid_configuration(
                "Unknown database type in URL; expected postgres://, mysql://, mariadb:// or sqlite:",
            )
        })?;

        Ok(SqlConfig {
            db_type,
            url,
            username,
            password,
            port: None,
            pool_options: self.pool_options.clone(),
        })
    }

    async fn open(&self, config: &SqlConfig) -> Result<DbPool, sqlx::Error> {
        open_pool(config).await
    }

    fn is_open(&self, connection: &DbPool) -> bool {
        !connection.is_closed()
    }

    async fn close(&self, connection: &DbPool) -> Result<(), sqlx::Error> {
        connection.close().await;
        Ok(())
    }

    fn suggestion(&self, config: &SqlConfig, error: &sqlx::Error) -> String {
        connection_suggestion(config.db_type, error)
    }
}

/// Provider for the pooled credential set.
///
/// Every slot is mandatory: url, username, password, driver, port and maximum
/// pool size. The driver name selects the backend.
#[derive(Debug, Clone, Default)]
pub struct PooledSqlProvider {
    pool_options: PoolOptions,
}

impl PooledSqlProvider {
    pub fn new(pool_options: PoolOptions) -> Self {
        Self { pool_options }
    }
}

impl ConnectionProvider for PooledSqlProvider {
    type Key = PooledCredential;
    type Config = SqlConfig;
    type Connection = DbPool;
    type Error = sqlx::Error;

    fn configure(&self, credentials: &CredentialStore<PooledCredential>) -> DbResult<SqlConfig> {
        let required = [
            PooledCredential::Url,
            PooledCredential::Username,
            PooledCredential::Password,
            PooledCredential::Driver,
            PooledCredential::Port,
            PooledCredential::MaxPoolSize,
        ];
        let mut missing = Vec::new();
        for key in required {
            let present = match key {
                PooledCredential::Port => credentials.get::<u16>(key)?.is_some(),
                PooledCredential::MaxPoolSize => credentials.get::<u32>(key)?.is_some(),
                _ => credentials.get::<String>(key)?.is_some(),
            };
            if !present {
                missing.push(key.name());
            }
        }
        if !missing.is_empty() {
            return Err(DbError::invalid_configuration(format!(
                "Missing required credentials: {}",
                missing.join(", ")
            )));
        }

        let driver: String = credentials.require(PooledCredential::Driver)?;
        let db_type = driver
            .parse::<DatabaseType>()
            .map_err(DbError::invalid_configuration)?;
        let max_pool_size: u32 = credentials.require(PooledCredential::MaxPoolSize)?;

        let pool_options = PoolOptions {
            max_connections: Some(max_pool_size),
            ..self.pool_options.clone()
        };
        pool_options
            .validate()
            .map_err(DbError::invalid_configuration)?;

        let url: String = credentials.require(PooledCredential::Url)?;

        Ok(SqlConfig {
            db_type,
            url: with_scheme(&url, db_type),
            username: credentials.require(PooledCredential::Username)?,
            password: credentials.require(PooledCredential::Password)?,
            port: Some(credentials.require(PooledCredential::Port)?),
            pool_options,
        })
    }

    async fn open(&self, config: &SqlConfig) -> Result<DbPool, sqlx::Error> {
        open_pool(config).await
    }

    fn is_open(&self, connection: &DbPool) -> bool {
        !connection.is_closed()
    }

    async fn close(&self, connection: &DbPool) -> Result<(), sqlx::Error> {
        connection.close().await;
        Ok(())
    }

    fn suggestion(&self, config: &SqlConfig, error: &sqlx::Error) -> String {
        connection_suggestion(config.db_type, error)
    }
}

/// Prefix a bare `host/database` URL with the scheme of `db_type`.
fn with_scheme(url: &str, db_type: DatabaseType) -> String {
    if url.contains("://") || url.starts_with("sqlite:") {
        return url.to_string();
    }
    match db_type {
        DatabaseType::PostgreSQL => format!("postgres://{}", url),
        DatabaseType::MySQL => format!("mysql://{}", url),
        DatabaseType::SQLite => format!("sqlite:{}", url),
    }
}

/// Create a connection pool for the given configuration.
pub async fn open_pool(config: &SqlConfig) -> Result<DbPool, sqlx::Error> {
    let pool_opts = &config.pool_options;
    let is_sqlite = config.db_type == DatabaseType::SQLite;
    let acquire_timeout = Duration::from_secs(pool_opts.acquire_timeout_or_default());
    let idle_timeout = Some(Duration::from_secs(pool_opts.idle_timeout_or_default()));
    let min_connections = pool_opts.min_connections_or_default(is_sqlite);
    let max_connections = pool_opts.max_connections_or_default(is_sqlite);

    debug!(
        db_type = %config.db_type,
        max_connections,
        "Creating connection pool"
    );

    let pool = match config.db_type {
        DatabaseType::MySQL => {
            // sqlx only understands the mysql:// scheme
            let url = config.url.replacen("mariadb://", "mysql://", 1);
            let mut options = MySqlConnectOptions::from_str(&url)?
                .username(&config.username)
                .password(&config.password)
                .charset("utf8mb4");
            if let Some(port) = config.port {
                options = options.port(port);
            }

            let pool = MySqlPoolOptions::new()
                .min_connections(min_connections)
                .max_connections(max_connections)
                .acquire_timeout(acquire_timeout)
                .idle_timeout(idle_timeout)
                .test_before_acquire(pool_opts.test_before_acquire_or_default())
                .connect_with(options)
                .await?;
            DbPool::MySql(pool)
        }
        DatabaseType::PostgreSQL => {
            let mut options = PgConnectOptions::from_str(&config.url)?
                .username(&config.username)
                .password(&config.password);
            if let Some(port) = config.port {
                options = options.port(port);
            }

            let pool = PgPoolOptions::new()
                .min_connections(min_connections)
                .max_connections(max_connections)
                .acquire_timeout(acquire_timeout)
                .idle_timeout(idle_timeout)
                .test_before_acquire(pool_opts.test_before_acquire_or_default())
                .connect_with(options)
                .await?;
            DbPool::Postgres(pool)
        }
        DatabaseType::SQLite => {
            // SQLite has no authentication; username and password are ignored
            let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);

            let pool = SqlitePoolOptions::new()
                .min_connections(min_connections)
                .max_connections(max_connections)
                .acquire_timeout(acquire_timeout)
                .idle_timeout(idle_timeout)
                .test_before_acquire(pool_opts.test_before_acquire_or_default())
                .connect_with(options)
                .await?;
            DbPool::SQLite(pool)
        }
    };

    info!(db_type = %config.db_type, "Connection pool opened");
    Ok(pool)
}

/// Generate a helpful suggestion for connection errors.
pub fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!("Check that the {} server is running and accessible", db_type);
    }

    if error_str.contains("authentication")
        || error_str.contains("password")
        || error_str.contains("access denied")
    {
        return "Verify the username and password credentials".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match db_type {
        DatabaseType::PostgreSQL => "Verify the URL format: postgres://host:5432/db".to_string(),
        DatabaseType::MySQL => "Verify the URL format: mysql://host:3306/db".to_string(),
        DatabaseType::SQLite => {
            "Verify the file path exists and is accessible: sqlite:path/to/db.sqlite".to_string()
        }
    }
}
