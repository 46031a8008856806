//! Removal of synced terms nobody has refreshed within the retention window.
//! Local terms are never candidates.


use anyhow::{Result, anyhow};
use chrono::{Duration, NaiveDateTime, Utc};
use tracing::{info, warn};

use crate::database::sqlite::{Database, TermQueries};

pub struct RetentionCleaner<'a> {
    database: &'a Database,
    optimize: bool,
}

impl<'a> RetentionCleaner<'a> {
    #[inline]
    pub fn new(database: &'a Database) -> Self {
        Self {
            database,
            optimize: true,
        }
    }

    /// Run VACUUM/ANALYZE after a delete that removed rows
    #[inline]
    pub fn optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    #[inline]
    pub fn cutoff(retention_days: i64, now: NaiveDateTime) -> Result<NaiveDateTime> {
        Duration::try_days(retention_days)
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or_else(|| anyhow!("Retention window of {} days is out of range", retention_days))
    }

    /// Delete (or in a dry run, count) non-local terms last updated before
    /// `retention_days` ago. Storage optimization failures only warn.
    #[inline]
    pub async fn cleanup(&self, retention_days: i64, dry_run: bool) -> Result<u64> {
        let cutoff = Self::cutoff(retention_days, Utc::now().naive_utc())?;

        if dry_run {
            let count = TermQueries::count_expired(self.database.pool(), cutoff).await?;
            info!(
                "[DRY RUN] Would delete {} synced terms not updated since {}",
                count, cutoff
            );
            return Ok(u64::try_from(count).unwrap_or_default());
        }

        let deleted = TermQueries::delete_expired(self.database.pool(), cutoff).await?;
        info!(
            "Deleted {} synced terms not updated since {}",
            deleted, cutoff
        );

        if self.optimize && deleted > 0 {
            if let Err(e) = self.database.optimize().await {
                warn!("Database optimization after cleanup failed: {:#}", e);
            }
        }

        Ok(deleted)
    }
}
