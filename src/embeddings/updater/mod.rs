#[cfg(test)]
mod tests;

use anyhow::{Context, Result, anyhow};
use chrono::{Duration, NaiveDateTime, Utc};
use tracing::{debug, info, warn};

use super::EmbeddingProvider;
use crate::budget::{RunBudget, StopReason};
use crate::database::sqlite::{Database, TermQueries};

/// Outcome of one updater pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EmbeddingStats {
    /// Candidates selected for this pass (the dry-run answer)
    pub candidates: u64,
    pub updated: u64,
    /// Provider answered with an empty, non-finite or wrongly sized vector
    pub rejected: u64,
    /// Provider call errored
    pub failed: u64,
    /// Selected but not attempted because the run stopped
    pub remaining: u64,
    pub stopped: Option<StopReason>,
}

impl std::fmt::Display for EmbeddingStats {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} updated, {} rejected, {} failed, {} remaining",
            self.updated, self.rejected, self.failed, self.remaining
        )?;
        if let Some(reason) = self.stopped {
            write!(f, " (stopped: {reason})")?;
        }
        Ok(())
    }
}

pub struct EmbeddingUpdater<'a> {
    database: &'a Database,
    provider: &'a dyn EmbeddingProvider,
    stale_after_days: i64,
    dry_run: bool,
}

impl<'a> EmbeddingUpdater<'a> {
    #[inline]
    pub fn new(
        database: &'a Database,
        provider: &'a dyn EmbeddingProvider,
        stale_after_days: i64,
    ) -> Self {
        Self {
            database,
            provider,
            stale_after_days,
            dry_run: false,
        }
    }

    #[inline]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn stale_before(&self, now: NaiveDateTime) -> Result<NaiveDateTime> {
        Duration::try_days(self.stale_after_days)
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or_else(|| {
                anyhow!(
                    "Staleness threshold of {} days is out of range",
                    self.stale_after_days
                )
            })
    }

    /// Generate embeddings for up to `limit` terms that have none, have a
    /// stale one, or have one of the wrong width. The budget is checked
    /// after every provider call.
    #[inline]
    pub async fn update(&self, limit: usize, budget: &RunBudget) -> Result<EmbeddingStats> {
        let dimension = self.provider.dimension();
        let stale_before = self.stale_before(Utc::now().naive_utc())?;

        if self.dry_run {
            let pending =
                TermQueries::count_embedding_candidates(self.database.pool(), stale_before, dimension)
                    .await?;
            let candidates = u64::try_from(pending)
                .unwrap_or_default()
                .min(u64::try_from(limit).unwrap_or(u64::MAX));
            info!(
                "[DRY RUN] Would generate embeddings for {} terms ({} pending) with {}",
                candidates,
                pending,
                self.provider.model()
            );
            return Ok(EmbeddingStats {
                candidates,
                ..EmbeddingStats::default()
            });
        }

        let candidates =
            TermQueries::embedding_candidates(self.database.pool(), stale_before, dimension, limit)
                .await?;
        let mut stats = EmbeddingStats {
            candidates: candidates.len() as u64,
            ..EmbeddingStats::default()
        };

        if candidates.is_empty() {
            info!("All term embeddings are current");
            return Ok(stats);
        }

        self.provider
            .health_check()
            .context("Embedding provider is not available")?;

        info!(
            "Generating embeddings for {} terms with {}",
            candidates.len(),
            self.provider.model()
        );

        for (attempted, candidate) in candidates.iter().enumerate() {
            match self.provider.embed(&candidate.term) {
                Ok(vector) if is_usable(&vector, dimension) => {
                    let stored = TermQueries::store_embedding(
                        self.database.pool(),
                        candidate.id,
                        &vector,
                        Utc::now().naive_utc(),
                    )
                    .await?;
                    if stored {
                        stats.updated += 1;
                    } else {
                        debug!("Term {} vanished before its embedding was stored", candidate.id);
                    }
                }
                Ok(vector) => {
                    warn!(
                        "Rejected embedding for '{}': got {} values, expected {}",
                        candidate.term,
                        vector.len(),
                        dimension
                    );
                    stats.rejected += 1;
                }
                Err(e) => {
                    warn!("Embedding failed for '{}': {:#}", candidate.term, e);
                    stats.failed += 1;
                }
            }

            if let Some(reason) = budget.check() {
                stats.remaining = (candidates.len() - attempted - 1) as u64;
                stats.stopped = Some(reason);
                warn!(
                    "Stopping embedding update after {:?}: {}",
                    budget.elapsed(),
                    reason
                );
                break;
            }
        }

        info!("Embedding update: {}", stats);
        Ok(stats)
    }
}

fn is_usable(vector: &[f32], dimension: usize) -> bool {
    !vector.is_empty() && vector.len() == dimension && vector.iter().all(|v| v.is_finite())
}
