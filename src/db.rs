use crate::config::AppConfig;
use crate::errors::ServiceError;
use metrics::{counter, gauge, histogram};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbErr,
    TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub type DbPool = DatabaseConnection;

/// Pool sizing and timeouts.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl DbConfig {
    /// An in-memory SQLite database lives and dies with its connection, so the
    /// pool must hold exactly one.
    pub fn sqlite_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

/// Opens a pool against `config.url`.
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    gauge!("custody_db.max_connections", config.max_connections as f64);
    debug!(?config, "opening database pool");

    match Database::connect(options).await {
        Ok(pool) => {
            info!(
                backend = ?pool.get_database_backend(),
                max_connections = config.max_connections,
                "database pool ready"
            );
            Ok(pool)
        }
        Err(e) => {
            error!(error = %e, "could not open database pool");
            Err(ServiceError::db_error(e))
        }
    }
}

pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    establish_connection_with_config(&DbConfig::from(cfg)).await
}

/// Applies pending migrations from [`crate::migrator::Migrator`].
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    let started = Instant::now();
    match crate::migrator::Migrator::up(pool, None).await {
        Ok(()) => {
            info!(elapsed = ?started.elapsed(), "schema up to date");
            Ok(())
        }
        Err(e) => {
            error!(elapsed = ?started.elapsed(), error = %e, "migrations failed");
            Err(ServiceError::db_error(e))
        }
    }
}

/// Round-trips a ping; used by the health endpoint.
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    let started = Instant::now();
    let outcome = pool.ping().await;
    let elapsed = started.elapsed();

    match outcome {
        Ok(()) => {
            gauge!("custody_db.ping_ms", elapsed.as_millis() as f64);
            debug!(?elapsed, "database ping ok");
            Ok(())
        }
        Err(e) => {
            counter!("custody_db.ping_failures", 1);
            error!(?elapsed, error = %e, "database ping failed");
            Err(ServiceError::db_error(e))
        }
    }
}

/// An open transaction tagged with the operation it belongs to.
///
/// Dropping it without [`Tx::commit`] rolls back, and is counted as such.
pub struct Tx {
    inner: Option<DatabaseTransaction>,
    operation: &'static str,
    started: Instant,
}

impl Tx {
    pub async fn begin(db: &DbPool, operation: &'static str) -> Result<Self, ServiceError> {
        let inner = db.begin().await.map_err(ServiceError::db_error)?;
        counter!("custody_db.transaction.started", 1, "operation" => operation);
        debug!(operation, "transaction started");
        Ok(Self {
            inner: Some(inner),
            operation,
            started: Instant::now(),
        })
    }

    pub async fn commit(mut self) -> Result<(), ServiceError> {
        let Some(txn) = self.inner.take() else {
            return Err(ServiceError::InternalError(
                "transaction already finished".to_string(),
            ));
        };
        let operation = self.operation;
        let result = txn.commit().await;
        histogram!("custody_db.transaction.duration", self.started.elapsed(), "operation" => operation);
        match result {
            Ok(()) => {
                counter!("custody_db.transaction.committed", 1, "operation" => operation);
                debug!(operation, "transaction committed");
                Ok(())
            }
            Err(e) => {
                counter!("custody_db.transaction.rolled_back", 1, "operation" => operation);
                error!(operation, error = %e, "transaction commit failed");
                Err(ServiceError::db_error(e))
            }
        }
    }

    /// Borrow the transaction as a connection for queries.
    pub fn conn(&self) -> Result<&DatabaseTransaction, ServiceError> {
        self.inner.as_ref().ok_or_else(|| {
            ServiceError::InternalError("transaction already finished".to_string())
        })
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        if self.inner.is_some() {
            counter!("custody_db.transaction.rolled_back", 1, "operation" => self.operation);
            warn!(
                operation = self.operation,
                "transaction rolled back after {:?}",
                self.started.elapsed()
            );
        }
    }
}

/// True when `err` came from a unique-constraint violation.
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(
        err.sql_err(),
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
    )
}
