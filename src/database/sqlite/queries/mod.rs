#[cfg(test)]
mod tests;

use super::models::*;
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use sqlx::types::Json;
use tracing::debug;

const TERM_COLUMNS: &str = "id, term, domain, source, synonyms, embedding, embedding_updated_at, created_at, updated_at";

pub struct TermQueries;

impl TermQueries {
    /// Insert a term, failing if `(term, domain)` already exists
    #[inline]
    pub async fn create(pool: &SqlitePool, new_term: NewTerm) -> Result<Term> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO terms (term, domain, source, synonyms, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&new_term.term)
        .bind(new_term.domain)
        .bind(new_term.source)
        .bind(Json(&new_term.synonyms))
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to create term '{}'", new_term.term))?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created term"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Term>> {
        let query = format!("SELECT {TERM_COLUMNS} FROM terms WHERE id = ?");
        let result = sqlx::query_as::<_, Term>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get term by id")?;

        Ok(result)
    }

    #[inline]
    pub async fn get_by_term(pool: &SqlitePool, term: &str, domain: Domain) -> Result<Option<Term>> {
        let query = format!("SELECT {TERM_COLUMNS} FROM terms WHERE term = ? AND domain = ?");
        let result = sqlx::query_as::<_, Term>(&query)
            .bind(term)
            .bind(domain)
            .fetch_optional(pool)
            .await
            .context("Failed to get term by name and domain")?;

        Ok(result)
    }

    /// Upsert a term coming from an external source, keyed on `(term, domain)`.
    ///
    /// Local rows are never touched. A row owned by the same source has its
    /// synonyms replaced. A row owned by the other external source keeps its
    /// owner and synonyms and only gets a fresh `updated_at`, so alternating
    /// sources with unchanged data settle on `Skipped`.
    #[inline]
    pub async fn upsert_external(pool: &SqlitePool, new_term: &NewTerm) -> Result<UpsertOutcome> {
        if new_term.source.is_authoritative() {
            return Err(anyhow::anyhow!(
                "Refusing to sync term '{}' as a local entry",
                new_term.term
            ));
        }

        let now = Utc::now().naive_utc();
        let mut tx = pool.begin().await.context("Failed to begin upsert")?;

        let existing: Option<(i64, TermSource, Json<Vec<String>>)> =
            sqlx::query_as("SELECT id, source, synonyms FROM terms WHERE term = ? AND domain = ?")
                .bind(&new_term.term)
                .bind(new_term.domain)
                .fetch_optional(&mut *tx)
                .await
                .context("Failed to look up existing term")?;

        let outcome = match existing {
            None => {
                sqlx::query(
                    "INSERT INTO terms (term, domain, source, synonyms, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&new_term.term)
                .bind(new_term.domain)
                .bind(new_term.source)
                .bind(Json(&new_term.synonyms))
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .context("Failed to insert synced term")?;
                UpsertOutcome::Added
            }
            Some((_, TermSource::Local, _)) => {
                debug!(
                    "Keeping local entry '{}' ({}) over {} data",
                    new_term.term, new_term.domain, new_term.source
                );
                UpsertOutcome::Skipped
            }
            Some((id, source, Json(current))) => {
                if source == new_term.source && new_term.synonyms != current {
                    sqlx::query("UPDATE terms SET synonyms = ?, updated_at = ? WHERE id = ?")
                        .bind(Json(&new_term.synonyms))
                        .bind(now)
                        .bind(id)
                        .execute(&mut *tx)
                        .await
                        .context("Failed to update synced term")?;
                    UpsertOutcome::Updated
                } else {
                    if source != new_term.source {
                        debug!(
                            "Keeping {} entry '{}' ({}) over {} data",
                            source, new_term.term, new_term.domain, new_term.source
                        );
                    }
                    sqlx::query("UPDATE terms SET updated_at = ? WHERE id = ?")
                        .bind(now)
                        .bind(id)
                        .execute(&mut *tx)
                        .await
                        .context("Failed to refresh synced term")?;
                    UpsertOutcome::Skipped
                }
            }
        };

        tx.commit().await.context("Failed to commit upsert")?;
        Ok(outcome)
    }

    /// Term strings of a domain owned by `source`
    #[inline]
    pub async fn list_terms_by_source(
        pool: &SqlitePool,
        domain: Domain,
        source: TermSource,
        limit: usize,
    ) -> Result<Vec<String>> {
        let terms = sqlx::query_scalar(
            "SELECT term FROM terms WHERE domain = ? AND source = ? ORDER BY updated_at ASC LIMIT ?",
        )
        .bind(domain)
        .bind(source)
        .bind(limit_param(limit))
        .fetch_all(pool)
        .await
        .context("Failed to list terms by source")?;

        Ok(terms)
    }

    /// Terms with no embedding, a stale one, or one of the wrong width
    #[inline]
    pub async fn embedding_candidates(
        pool: &SqlitePool,
        stale_before: NaiveDateTime,
        dimension: usize,
        limit: usize,
    ) -> Result<Vec<EmbeddingCandidate>> {
        let candidates = sqlx::query_as::<_, EmbeddingCandidate>(
            r#"
            SELECT id, term FROM terms
            WHERE embedding IS NULL
               OR embedding_updated_at IS NULL
               OR embedding_updated_at < ?
               OR length(embedding) != ?
            LIMIT ?
            "#,
        )
        .bind(stale_before)
        .bind(embedding_width(dimension))
        .bind(limit_param(limit))
        .fetch_all(pool)
        .await
        .context("Failed to select embedding candidates")?;

        Ok(candidates)
    }

    #[inline]
    pub async fn count_embedding_candidates(
        pool: &SqlitePool,
        stale_before: NaiveDateTime,
        dimension: usize,
    ) -> Result<i64> {
        let count = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM terms
            WHERE embedding IS NULL
               OR embedding_updated_at IS NULL
               OR embedding_updated_at < ?
               OR length(embedding) != ?
            "#,
        )
        .bind(stale_before)
        .bind(embedding_width(dimension))
        .fetch_one(pool)
        .await
        .context("Failed to count embedding candidates")?;

        Ok(count)
    }

    /// Store a freshly generated embedding; leaves `updated_at` alone
    #[inline]
    pub async fn store_embedding(
        pool: &SqlitePool,
        id: i64,
        embedding: &[f32],
        generated_at: NaiveDateTime,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE terms SET embedding = ?, embedding_updated_at = ? WHERE id = ?")
                .bind(encode_embedding(embedding))
                .bind(generated_at)
                .bind(id)
                .execute(pool)
                .await
                .context("Failed to store embedding")?;

        Ok(result.rows_affected() > 0)
    }

    /// Terms carrying at least one synonym, in export order
    #[inline]
    pub async fn list_synonym_groups(
        pool: &SqlitePool,
        domain: Option<Domain>,
    ) -> Result<Vec<Term>> {
        let query = format!(
            "SELECT {TERM_COLUMNS} FROM terms WHERE synonyms != '[]' AND (? IS NULL OR domain = ?) ORDER BY domain, term"
        );
        let terms = sqlx::query_as::<_, Term>(&query)
            .bind(domain)
            .bind(domain)
            .fetch_all(pool)
            .await
            .context("Failed to list synonym groups")?;

        Ok(terms)
    }

    #[inline]
    pub async fn count_synonym_groups(pool: &SqlitePool, domain: Option<Domain>) -> Result<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM terms WHERE synonyms != '[]' AND (? IS NULL OR domain = ?)",
        )
        .bind(domain)
        .bind(domain)
        .fetch_one(pool)
        .await
        .context("Failed to count synonym groups")?;

        Ok(count)
    }

    /// Delete non-local rows last touched before `cutoff`
    #[inline]
    pub async fn delete_expired(pool: &SqlitePool, cutoff: NaiveDateTime) -> Result<u64> {
        let result = sqlx::query("DELETE FROM terms WHERE source != 'local' AND updated_at < ?")
            .bind(cutoff)
            .execute(pool)
            .await
            .context("Failed to delete expired terms")?;

        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn count_expired(pool: &SqlitePool, cutoff: NaiveDateTime) -> Result<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM terms WHERE source != 'local' AND updated_at < ?",
        )
        .bind(cutoff)
        .fetch_one(pool)
        .await
        .context("Failed to count expired terms")?;

        Ok(count)
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM terms")
            .fetch_one(pool)
            .await
            .context("Failed to count terms")?;

        Ok(count)
    }

    #[inline]
    pub async fn statistics(pool: &SqlitePool) -> Result<TermStatistics> {
        let by_source: Vec<(TermSource, i64)> = sqlx::query_as(
            "SELECT source, COUNT(*) FROM terms GROUP BY source ORDER BY source",
        )
        .fetch_all(pool)
        .await
        .context("Failed to count terms by source")?;

        let by_domain: Vec<(Domain, i64)> = sqlx::query_as(
            "SELECT domain, COUNT(*) FROM terms GROUP BY domain ORDER BY domain",
        )
        .fetch_all(pool)
        .await
        .context("Failed to count terms by domain")?;

        let with_embedding = sqlx::query_scalar(
            "SELECT COUNT(*) FROM terms WHERE embedding IS NOT NULL",
        )
        .fetch_one(pool)
        .await
        .context("Failed to count embedded terms")?;

        Ok(TermStatistics {
            total: by_source.iter().map(|(_, count)| count).sum(),
            by_source,
            by_domain,
            with_embedding,
            synonym_groups: Self::count_synonym_groups(pool, None).await?,
        })
    }
}

pub struct SyncStateQueries;

impl SyncStateQueries {
    #[inline]
    pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<i64>> {
        let value = sqlx::query_scalar("SELECT value FROM sync_state WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await
            .with_context(|| format!("Failed to read sync state '{key}'"))?;

        Ok(value)
    }

    #[inline]
    pub async fn set(pool: &SqlitePool, key: &str, value: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().naive_utc())
        .execute(pool)
        .await
        .with_context(|| format!("Failed to write sync state '{key}'"))?;

        Ok(())
    }
}

pub struct SyncRunQueries;

impl SyncRunQueries {
    #[inline]
    pub async fn start(pool: &SqlitePool, source: TermSource) -> Result<i64> {
        let id = sqlx::query("INSERT INTO sync_runs (source, status, started_at) VALUES (?, 'running', ?)")
            .bind(source)
            .bind(Utc::now().naive_utc())
            .execute(pool)
            .await
            .context("Failed to record sync start")?
            .last_insert_rowid();

        Ok(id)
    }

    #[inline]
    pub async fn finish(
        pool: &SqlitePool,
        id: i64,
        added: u64,
        updated: u64,
        skipped: u64,
        error_message: Option<&str>,
    ) -> Result<()> {
        let status = if error_message.is_some() {
            SyncStatus::Failed
        } else {
            SyncStatus::Completed
        };

        sqlx::query(
            r#"
            UPDATE sync_runs
            SET status = ?, terms_added = ?, terms_updated = ?, terms_skipped = ?,
                error_message = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(count_param(added))
        .bind(count_param(updated))
        .bind(count_param(skipped))
        .bind(error_message)
        .bind(Utc::now().naive_utc())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to record sync completion")?;

        Ok(())
    }

    #[inline]
    pub async fn recent(pool: &SqlitePool, limit: usize) -> Result<Vec<SyncRun>> {
        let runs = sqlx::query_as::<_, SyncRun>(
            r#"
            SELECT id, source, status, terms_added, terms_updated, terms_skipped,
                   error_message, started_at, completed_at
            FROM sync_runs ORDER BY started_at DESC, id DESC LIMIT ?
            "#,
        )
        .bind(limit_param(limit))
        .fetch_all(pool)
        .await
        .context("Failed to list recent sync runs")?;

        Ok(runs)
    }
}

pub struct RunLockQueries;

impl RunLockQueries {
    /// Take the named lock if it is free or its holder stopped heartbeating
    #[inline]
    pub async fn try_acquire(
        pool: &SqlitePool,
        name: &str,
        owner: &str,
        now: NaiveDateTime,
        stale_before: NaiveDateTime,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO run_lock (name, owner, acquired_at, heartbeat_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                owner = excluded.owner,
                acquired_at = excluded.acquired_at,
                heartbeat_at = excluded.heartbeat_at
            WHERE run_lock.heartbeat_at < ?
            "#,
        )
        .bind(name)
        .bind(owner)
        .bind(now)
        .bind(now)
        .bind(stale_before)
        .execute(pool)
        .await
        .context("Failed to acquire run lock")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn heartbeat(
        pool: &SqlitePool,
        name: &str,
        owner: &str,
        now: NaiveDateTime,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE run_lock SET heartbeat_at = ? WHERE name = ? AND owner = ?")
                .bind(now)
                .bind(name)
                .bind(owner)
                .execute(pool)
                .await
                .context("Failed to update run lock heartbeat")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn release(pool: &SqlitePool, name: &str, owner: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM run_lock WHERE name = ? AND owner = ?")
            .bind(name)
            .bind(owner)
            .execute(pool)
            .await
            .context("Failed to release run lock")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn holder(pool: &SqlitePool, name: &str) -> Result<Option<(String, NaiveDateTime)>> {
        let row = sqlx::query_as("SELECT owner, heartbeat_at FROM run_lock WHERE name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await
            .context("Failed to read run lock")?;

        Ok(row)
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn count_param(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn embedding_width(dimension: usize) -> i64 {
    limit_param(dimension.saturating_mul(4))
}
