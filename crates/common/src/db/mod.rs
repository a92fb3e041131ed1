//! Database layer for MedDesk
//!
//! Provides:
//! - SeaORM entity models
//! - Repository pattern for data access
//! - Connection pool management
//! - Schema migrations (sqlx)

pub mod models;
mod aggregates;
mod repository;

pub use aggregates::{
    count_for, CategoryCount, FlagKey, GroupKey, IntegrityCounts, ListKey, SizeStats, TableStats,
    TrackedTable, UnusedIndex,
};
pub use repository::{
    NewDocument, NewNote, NewPatient, NewUser, NoteChanges, Page, PatientChanges, Repository,
    UserChanges,
};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sqlx::migrate::{MigrateError, Migrator};
use std::time::Duration;
use tracing::info;

/// Reversible migrations under `migrations/` at the workspace root
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (for writes)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!(host = %config.host, database = %config.name, "Connecting to primary database...");

        let primary = connect(&config.connection_url(), config)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect to primary: {}", e)
            })?;

        // Connect to replica if configured
        let replica = if let Some(ref read_url) = config.read_url {
            info!("Connecting to read replica...");

            let replica_conn = connect(read_url, config)
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("Failed to connect to replica: {}", e)
                })?;

            Some(replica_conn)
        } else {
            None
        };

        info!("Database connections established");

        Ok(Self { primary, replica })
    }

    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Underlying sqlx pool of the primary, used by the migrator
    pub fn sqlx_pool(&self) -> &sqlx::PgPool {
        self.primary.get_postgres_connection_pool()
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        use sea_orm::ConnectionTrait;

        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Primary ping failed: {}", e),
            })?;

        if let Some(ref replica) = self.replica {
            replica
                .execute_unprepared("SELECT 1")
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("Replica ping failed: {}", e),
                })?;
        }

        Ok(())
    }

    /// Apply pending migrations, returning how many ran
    pub async fn run_migrations(&self) -> Result<usize> {
        let applied_before = self.applied_migrations().await?;
        MIGRATOR.run(self.sqlx_pool()).await?;
        let applied_after = self.applied_migrations().await?;
        Ok(applied_after.saturating_sub(applied_before))
    }

    /// Undo the most recently applied migration. Returns its version, or
    /// `None` when nothing is applied.
    pub async fn rollback_latest(&self) -> Result<Option<i64>> {
        let latest = match sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(version) FROM _sqlx_migrations WHERE success",
        )
        .fetch_one(self.sqlx_pool())
        .await
        {
            Ok(latest) => latest,
            Err(e) if is_undefined_table(&e) => None,
            Err(e) => return Err(MigrateError::Execute(e).into()),
        };

        let Some(latest) = latest else {
            return Ok(None);
        };

        let target = MIGRATOR
            .iter()
            .map(|m| m.version)
            .filter(|v| *v < latest)
            .max()
            .unwrap_or(0);

        MIGRATOR.undo(self.sqlx_pool(), target).await?;
        Ok(Some(latest))
    }

    async fn applied_migrations(&self) -> Result<usize> {
        // The bookkeeping table does not exist before the first run
        let count = match sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM _sqlx_migrations WHERE success",
        )
        .fetch_one(self.sqlx_pool())
        .await
        {
            Ok(count) => count,
            Err(e) if is_undefined_table(&e) => 0,
            Err(e) => return Err(MigrateError::Execute(e).into()),
        };

        Ok(count.max(0) as usize)
    }
}

/// SQLSTATE 42P01, raised for a missing `_sqlx_migrations`
fn is_undefined_table(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("42P01"))
}

async fn connect(url: &str, config: &DatabaseConfig) -> std::result::Result<DatabaseConnection, sea_orm::DbErr> {
    let mut opts = ConnectOptions::new(url);
    opts
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(false);

    Database::connect(opts).await
}
