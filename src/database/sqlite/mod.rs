use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::ThesaurusError;


pub mod models;
pub mod queries;

pub use models::{
    Domain, EmbeddingCandidate, NewTerm, SyncRun, SyncStatus, Term, TermSource, TermStatistics,
    UpsertOutcome,
};
pub use queries::{RunLockQueries, SyncRunQueries, SyncStateQueries, TermQueries};

pub type DbPool = Pool<Sqlite>;

/// File name of the term store inside the config directory
pub const DATABASE_FILE: &str = "thesaurus.db";

/// SyncState key holding the epoch of the last "all sources" sync
pub const LAST_SYNC_KEY: &str = "last_cron_sync";

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ThesaurusError::Database(format!("Failed to run schema migration: {e}")))?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    /// Open the store at `database_path`, creating its directory first
    #[inline]
    pub async fn initialize(database_path: &Path) -> Result<Self> {
        if let Some(parent) = database_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        Self::new(database_path).await
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        Self::initialize(&config_dir.join(DATABASE_FILE)).await
    }

    // Sync state
    #[inline]
    pub async fn last_sync(&self) -> Result<i64> {
        Ok(SyncStateQueries::get(&self.pool, LAST_SYNC_KEY)
            .await?
            .unwrap_or(0))
    }

    #[inline]
    pub async fn set_last_sync(&self, epoch: i64) -> Result<()> {
        SyncStateQueries::set(&self.pool, LAST_SYNC_KEY, epoch).await
    }

    // Term operations
    #[inline]
    pub async fn create_term(&self, term: NewTerm) -> Result<Term> {
        TermQueries::create(&self.pool, term).await
    }

    #[inline]
    pub async fn get_term(&self, term: &str, domain: Domain) -> Result<Option<Term>> {
        TermQueries::get_by_term(&self.pool, term, domain).await
    }

    #[inline]
    pub async fn upsert_external_term(&self, term: &NewTerm) -> Result<UpsertOutcome> {
        TermQueries::upsert_external(&self.pool, term).await
    }

    #[inline]
    pub async fn count_terms(&self) -> Result<i64> {
        TermQueries::count(&self.pool).await
    }

    #[inline]
    pub async fn term_statistics(&self) -> Result<TermStatistics> {
        TermQueries::statistics(&self.pool).await
    }

    // Sync run history
    #[inline]
    pub async fn recent_sync_runs(&self, limit: usize) -> Result<Vec<SyncRun>> {
        SyncRunQueries::recent(&self.pool, limit).await
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database storage");

        // Run VACUUM to reclaim space left by deleted rows
        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .context("Failed to vacuum database")?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .context("Failed to analyze database")?;

        debug!("Database optimization completed");
        Ok(())
    }
}
