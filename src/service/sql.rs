//! Example services over the SQL pools: create a table, insert a name, read
//! all names back.
//!
//! Table names are interpolated into the SQL text, so they are validated as
//! plain identifiers. Values always go through bind parameters.

use crate::db::{ConnectionProvider, DatabaseHandle, DbPool};
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::DatabaseType;
use crate::service::Service;
use futures_util::future::{BoxFuture, FutureExt};
use sqlx::Row;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

const MAX_IDENTIFIER_LEN: usize = 64;

/// Check that `table` is safe to splice into SQL text.
pub fn validate_table_name(table: &str) -> DbResult<()> {
    if table.is_empty() {
        return Err(DbError::invalid_argument("Table name cannot be empty"));
    }
    if table.len() > MAX_IDENTIFIER_LEN {
        return Err(DbError::invalid_argument(format!(
            "Table name '{}' is longer than {} characters",
            table, MAX_IDENTIFIER_LEN
        )));
    }
    let mut chars = table.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DbError::invalid_argument(format!(
            "Table name '{}' must contain only letters, digits and underscores and not start with a digit",
            table
        )));
    }
    Ok(())
}

fn live_pool<P>(handle: &DatabaseHandle<P>) -> DbResult<DbPool>
where
    P: ConnectionProvider<Connection = DbPool>,
{
    handle
        .connection()
        .ok_or_else(|| DbError::not_connected(handle.name()))
}

/// Creates the `(id, name)` table if it does not exist.
#[derive(Debug, Clone)]
pub struct CreateTableService {
    table: String,
}

impl CreateTableService {
    pub fn new(table: impl Into<String>) -> DbResult<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn ddl(&self, db_type: DatabaseType) -> String {
        let id_column = match db_type {
            DatabaseType::PostgreSQL => "id SERIAL PRIMARY KEY",
            DatabaseType::MySQL => "id INT AUTO_INCREMENT PRIMARY KEY",
            DatabaseType::SQLite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
        };
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, name VARCHAR(255) NOT NULL)",
            self.table, id_column
        )
    }
}

impl<P> Service<P> for CreateTableService
where
    P: ConnectionProvider<Connection = DbPool>,
{
    fn name(&self) -> &str {
        "create_table"
    }

    fn run<'a>(&'a self, handle: &'a DatabaseHandle<P>) -> BoxFuture<'a, DbResult<()>> {
        async move {
            let pool = live_pool(handle)?;
            let sql = self.ddl(pool.db_type());
            debug!(table = %self.table, "Creating table");
            impl_db_dispatch!(&pool, {
                MySql(p) => sqlx::query(&sql).execute(p).await.map(|_| ()),
                Postgres(p) => sqlx::query(&sql).execute(p).await.map(|_| ()),
                SQLite(p) => sqlx::query(&sql).execute(p).await.map(|_| ()),
            })?;
            Ok(())
        }
        .boxed()
    }
}

/// Inserts one row holding `name`.
#[derive(Debug, Clone)]
pub struct InsertService {
    table: String,
    name: String,
}

impl InsertService {
    pub fn new(table: impl Into<String>, name: impl Into<String>) -> DbResult<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self {
            table,
            name: name.into(),
        })
    }

    pub fn value(&self) -> &str {
        &self.name
    }
}

impl<P> Service<P> for InsertService
where
    P: ConnectionProvider<Connection = DbPool>,
{
    fn name(&self) -> &str {
        "insert"
    }

    fn run<'a>(&'a self, handle: &'a DatabaseHandle<P>) -> BoxFuture<'a, DbResult<()>> {
        async move {
            let pool = live_pool(handle)?;
            let rows_affected = impl_db_dispatch!(&pool, {
                MySql(p) => {
                    let sql = format!("INSERT INTO {} (name) VALUES (?)", self.table);
                    sqlx::query(&sql).bind(&self.name).execute(p).await?.rows_affected()
                },
                Postgres(p) => {
                    let sql = format!("INSERT INTO {} (name) VALUES ($1)", self.table);
                    sqlx::query(&sql).bind(&self.name).execute(p).await?.rows_affected()
                },
                SQLite(p) => {
                    let sql = format!("INSERT INTO {} (name) VALUES (?)", self.table);
                    sqlx::query(&sql).bind(&self.name).execute(p).await?.rows_affected()
                },
            });
            info!(table = %self.table, rows_affected, "Inserted {} row(s) into {}", rows_affected, self.table);
            Ok(())
        }
        .boxed()
    }
}

/// Reads every `name` in the table and keeps them for the caller.
///
/// Each run replaces the records of the previous one.
#[derive(Debug)]
pub struct SelectService {
    table: String,
    records: Mutex<Vec<String>>,
}

impl SelectService {
    pub fn new(table: impl Into<String>) -> DbResult<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self {
            table,
            records: Mutex::new(Vec::new()),
        })
    }

    /// Names read by the last successful run.
    pub fn records(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<P> Service<P> for SelectService
where
    P: ConnectionProvider<Connection = DbPool>,
{
    fn name(&self) -> &str {
        "select"
    }

    fn run<'a>(&'a self, handle: &'a DatabaseHandle<P>) -> BoxFuture<'a, DbResult<()>> {
        async move {
            let pool = live_pool(handle)?;
            let sql = format!("SELECT name FROM {} ORDER BY id", self.table);
            let names = impl_db_dispatch!(&pool, {
                MySql(p) => sqlx::query(&sql)
                    .fetch_all(p)
                    .await?
                    .iter()
                    .map(|row| row.try_get::<String, _>("name"))
                    .collect::<Result<Vec<_>, _>>()?,
                Postgres(p) => sqlx::query(&sql)
                    .fetch_all(p)
                    .await?
                    .iter()
                    .map(|row| row.try_get::<String, _>("name"))
                    .collect::<Result<Vec<_>, _>>()?,
                SQLite(p) => sqlx::query(&sql)
                    .fetch_all(p)
                    .await?
                    .iter()
                    .map(|row| row.try_get::<String, _>("name"))
                    .collect::<Result<Vec<_>, _>>()?,
            });
            debug!(table = %self.table, count = names.len(), "Selected records");
            *self.records.lock().unwrap_or_else(PoisonError::into_inner) = names;
            Ok(())
        }
        .boxed()
    }
}
