//! Cross-invocation mutual exclusion.
//!
//! The orchestrator only sees [`ExecutionGuard`]. A file lock covers a single
//! host; the database lock lets several hosts sharing one term store
//! coordinate through the `run_lock` table.

pub mod database;
pub mod file;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{Config, LockBackend};
use crate::database::sqlite::Database;

pub use database::DatabaseLock;
pub use file::FileLock;

/// Name of the run lock row shared by every scheduled invocation
pub const RUN_LOCK_NAME: &str = "thesaurus-sync";

#[async_trait]
pub trait ExecutionGuard: Send + Sync {
    /// Try to take the guard without blocking. `Ok(false)` means another
    /// invocation holds it and the caller must do no work.
    async fn acquire(&mut self) -> Result<bool>;

    /// Give the guard back. Safe to call when not held.
    async fn release(&mut self) -> Result<()>;

    /// Human readable description for log lines
    fn describe(&self) -> String;
}

/// Build the guard selected by `lock.backend`
#[inline]
pub fn guard_from_config(config: &Config, database: &Database) -> Box<dyn ExecutionGuard> {
    match config.lock.backend {
        LockBackend::File => Box::new(FileLock::new(config.lock_file_path())),
        LockBackend::Database => Box::new(DatabaseLock::new(
            database.clone(),
            RUN_LOCK_NAME,
            std::time::Duration::from_secs(config.lock.stale_after_seconds),
            std::time::Duration::from_secs(config.lock.heartbeat_seconds),
        )),
    }
}
