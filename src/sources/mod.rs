//! External vocabulary sources and the shared upsert path they feed.

pub mod wikidata;
pub mod wordnet;


use std::future::Future;

use anyhow::Result;
use tracing::{debug, error, info};

use crate::database::sqlite::{Database, Domain, NewTerm, SyncRunQueries, TermSource, UpsertOutcome};

pub use wikidata::{KnowledgeGraphSource, WikidataClient, WikidataSync};
pub use wordnet::{DomainSyncReport, LexicalSource, WordNetClient, WordNetSync};

/// Per-invocation upsert tally
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncCounts {
    pub added: u64,
    pub updated: u64,
    pub skipped: u64,
}

impl SyncCounts {
    #[inline]
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Added => self.added += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Skipped => self.skipped += 1,
        }
    }

    #[inline]
    pub fn merge(&mut self, other: SyncCounts) {
        self.added += other.added;
        self.updated += other.updated;
        self.skipped += other.skipped;
    }
}

impl std::fmt::Display for SyncCounts {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} added, {} updated, {} skipped",
            self.added, self.updated, self.skipped
        )
    }
}

/// A term with synonyms as delivered by a source, before normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalTerm {
    pub term: String,
    pub domain: Domain,
    pub synonyms: Vec<String>,
}

impl ExternalTerm {
    #[inline]
    pub fn new<I, S>(term: impl Into<String>, domain: Domain, synonyms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            term: term.into(),
            domain,
            synonyms: synonyms.into_iter().map(Into::into).collect(),
        }
    }
}

/// Upsert every term under `source`.
///
/// Entries that normalize to a blank term or an empty synonym list count as
/// skipped without touching the store.
#[inline]
pub async fn apply_external_terms(
    database: &Database,
    source: TermSource,
    terms: &[ExternalTerm],
) -> Result<SyncCounts> {
    let mut counts = SyncCounts::default();

    for external in terms {
        let new_term = NewTerm::new(&external.term, external.domain, source, &external.synonyms);
        if new_term.term.is_empty() || new_term.synonyms.is_empty() {
            debug!("Skipping '{}' from {}: no usable synonyms", external.term, source);
            counts.skipped += 1;
            continue;
        }

        let outcome = database.upsert_external_term(&new_term).await?;
        counts.record(outcome);
    }

    Ok(counts)
}

/// Run one adapter invocation inside a `sync_runs` row
pub async fn record_sync_run<F, T>(
    database: &Database,
    source: TermSource,
    counts_of: impl Fn(&T) -> SyncCounts,
    work: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let run_id = SyncRunQueries::start(database.pool(), source).await?;
    info!("Starting {} sync (run {})", source, run_id);

    match work.await {
        Ok(result) => {
            let counts = counts_of(&result);
            SyncRunQueries::finish(
                database.pool(),
                run_id,
                counts.added,
                counts.updated,
                counts.skipped,
                None,
            )
            .await?;
            info!("{} sync completed: {}", source, counts);
            Ok(result)
        }
        Err(e) => {
            let message = format!("{e:#}");
            if let Err(record_error) =
                SyncRunQueries::finish(database.pool(), run_id, 0, 0, 0, Some(&message)).await
            {
                error!("Failed to record {} sync failure: {}", source, record_error);
            }
            Err(e)
        }
    }
}
