//! dbcycle - Main entry point.
//!
//! Connects a database handle, inserts a few names and reads them back in the
//! configured dispatch mode, then optionally restarts and finally disconnects.

use dbcycle::config::Config;
use dbcycle::db::{ConnectionProvider, DatabaseHandle, DbPool, PooledSqlProvider, SqlProvider};
use dbcycle::error::DbResult;
use dbcycle::service::{
    CreateTableService, InsertService, SelectService, Service, ServiceExecutor, WorkerPool,
};
use dbcycle::{ConnectionStatus, LifecycleHooks};
use futures_util::future::{self, BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use uuid::Uuid;

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

/// Creates the demo table whenever the handle connects.
struct DemoHooks {
    create_table: CreateTableService,
    executor: ServiceExecutor,
}

impl<P> LifecycleHooks<P> for DemoHooks
where
    P: ConnectionProvider<Connection = DbPool>,
{
    fn on_connect<'a>(&'a self, handle: &'a DatabaseHandle<P>) -> BoxFuture<'a, DbResult<()>> {
        async move {
            let create_table: &dyn Service<P> = &self.create_table;
            self.executor.run(handle, create_table).await?;
            info!(table = %self.create_table.table(), "Create table process done");
            Ok(())
        }
        .boxed()
    }

    fn on_disconnect<'a>(&'a self, handle: &'a DatabaseHandle<P>) -> BoxFuture<'a, DbResult<()>> {
        info!(database = %handle.name(), "Goodbye");
        future::ready(Ok(())).boxed()
    }

    fn on_restart<'a>(&'a self, handle: &'a DatabaseHandle<P>) -> BoxFuture<'a, DbResult<()>> {
        info!(database = %handle.name(), "Restarted");
        future::ready(Ok(())).boxed()
    }
}

fn demo_names(config: &Config) -> Vec<String> {
    if !config.names.is_empty() {
        return config.names.clone();
    }
    (0..3)
        .map(|_| format!("user_{}", &Uuid::new_v4().simple().to_string()[..8]))
        .collect()
}

/// Connect, run the demo and always leave the handle disconnected.
///
/// The first error wins; a failing disconnect after an earlier error is only
/// logged.
async fn run<P>(
    handle: Arc<DatabaseHandle<P>>,
    executor: &ServiceExecutor,
    config: &Config,
) -> DbResult<()>
where
    P: ConnectionProvider<Connection = DbPool>,
{
    // a failing connect hook still leaves the handle connected
    let result = match handle.connect().await {
        Ok(()) => exercise(&handle, executor, config).await,
        Err(e) => Err(e),
    };

    if handle.status() != ConnectionStatus::Connected {
        return result;
    }
    match (result, handle.disconnect().await) {
        (Ok(()), closed) => closed,
        (Err(e), Err(close_err)) => {
            warn!(error = %close_err, "Disconnect after failure also failed");
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
    }
}

async fn exercise<P>(
    handle: &Arc<DatabaseHandle<P>>,
    executor: &ServiceExecutor,
    config: &Config,
) -> DbResult<()>
where
    P: ConnectionProvider<Connection = DbPool>,
{
    let mode = config.dispatch_mode();
    info!(mode = %mode, table = %config.table, "Dispatching services");

    let mut tasks = Vec::new();
    for name in demo_names(config) {
        let insert: Arc<dyn Service<P>> = Arc::new(InsertService::new(&config.table, name)?);
        tasks.push(executor.dispatch(Arc::clone(handle), insert, mode).await);
    }
    for task in tasks {
        let dispatch_id = task.id();
        if let Err(e) = task.await {
            error!(%dispatch_id, error = %e, "Insert failed");
        }
    }

    let select = Arc::new(SelectService::new(&config.table)?);
    let select_service: Arc<dyn Service<P>> = select.clone();
    executor
        .dispatch(Arc::clone(handle), select_service, mode)
        .await
        .await?;
    for record in select.records() {
        println!("Record: {}", record);
    }

    if config.restart {
        handle.restart().await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    if config.database_url.is_none() && config.credentials_file.is_none() {
        eprintln!("Error: A database URL or a credentials file must be given.");
        eprintln!();
        eprintln!("Usage: dbcycle --database-url <url> --username <user> --password <pass>");
        eprintln!("       dbcycle --credentials-file <path.json>");
        eprintln!();
        eprintln!("Examples:");
        eprintln!("  dbcycle -d sqlite:demo.db -u demo -p demo");
        eprintln!("  dbcycle -d mysql://localhost/app -u root -p secret --mode retry");
        eprintln!(
            "  dbcycle --pooled -d localhost/app --driver mariadb --port 3306 --max-pool-size 10 -u root -p secret"
        );
        std::process::exit(1);
    }

    info!(
        database = config.masked_database_url().as_deref().unwrap_or("<credentials file>"),
        "Starting dbcycle v{}",
        env!("CARGO_PKG_VERSION")
    );

    let workers = if config.workers == 0 {
        WorkerPool::with_default_size()?
    } else {
        WorkerPool::new(config.workers)?
    };
    let executor = ServiceExecutor::new(workers);
    let pool_options = config.pool_options()?;
    let hooks = DemoHooks {
        create_table: CreateTableService::new(&config.table)?,
        executor: executor.clone(),
    };

    let result = if config.pooled {
        let handle = DatabaseHandle::new("pooled", PooledSqlProvider::new(pool_options), hooks)
            .with_credentials(config.pooled_credentials()?);
        run(Arc::new(handle), &executor, &config).await
    } else {
        let handle = DatabaseHandle::new("sql", SqlProvider::new(pool_options), hooks)
            .with_credentials(config.basic_credentials()?);
        run(Arc::new(handle), &executor, &config).await
    };

    executor.shutdown().await;

    if let Err(e) = &result {
        error!(error = %e, suggestion = e.suggestion().unwrap_or_default(), "dbcycle failed");
    }
    result.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbcycle::config::PoolOptions;
    use dbcycle::db::NoopHooks;
    use dbcycle::models::{BasicCredential, CredentialStore};
    use tempfile::NamedTempFile;

    fn sqlite_handle<H>(file: &NamedTempFile, hooks: H) -> Arc<DatabaseHandle<SqlProvider>>
    where
        H: LifecycleHooks<SqlProvider> + 'static,
    {
        let mut store = CredentialStore::new();
        store
            .add_text(
                BasicCredential::Url,
                format!("sqlite:{}", file.path().display()),
            )
            .unwrap();
        store.add_text(BasicCredential::Username, "zobe").unwrap();
        store.add_text(BasicCredential::Password, "easypass").unwrap();
        let handle = DatabaseHandle::new("sql", SqlProvider::new(PoolOptions::default()), hooks)
            .with_credentials(store);
        Arc::new(handle)
    }

    #[tokio::test]
    async fn test_run_disconnects_after_failed_select() {
        let file = NamedTempFile::new().unwrap();
        // nothing creates the table, so the select fails
        let handle = sqlite_handle(&file, NoopHooks);
        let executor = ServiceExecutor::new(WorkerPool::new(1).unwrap());

        let result = run(Arc::clone(&handle), &executor, &Config::default()).await;
        assert!(result.is_err());
        assert_eq!(handle.status(), ConnectionStatus::Disconnected);
        assert!(handle.connection().is_none());
    }

    #[tokio::test]
    async fn test_run_round_trip_with_restart() {
        let file = NamedTempFile::new().unwrap();
        let executor = ServiceExecutor::new(WorkerPool::new(2).unwrap());
        let config = Config {
            names: vec!["zobe".to_string()],
            restart: true,
            ..Config::default()
        };
        let hooks = DemoHooks {
            create_table: CreateTableService::new(&config.table).unwrap(),
            executor: executor.clone(),
        };
        let handle = sqlite_handle(&file, hooks);

        run(Arc::clone(&handle), &executor, &config).await.unwrap();
        assert_eq!(handle.status(), ConnectionStatus::Disconnected);
    }
}
