//! Lexical synonym sync against a Datamuse-compatible relation service.


use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use itertools::Itertools;
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{ExternalTerm, SyncCounts, apply_external_terms, record_sync_run};
use crate::ThesaurusError;
use crate::budget::{RunBudget, StopReason};
use crate::config::WordNetConfig;
use crate::database::sqlite::{Database, Domain, TermQueries, TermSource};

/// Source of "means the same as" relations for a single word
pub trait LexicalSource: Send + Sync {
    fn related_terms(&self, term: &str, max: u32) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct WordNetClient {
    base_url: Url,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct WordEntry {
    word: String,
}

impl WordNetClient {
    #[inline]
    pub fn new(config: &WordNetConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.endpoint)
            .with_context(|| format!("Invalid WordNet endpoint: {}", config.endpoint))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Ok(Self { base_url, agent })
    }

    fn words_url(&self, term: &str, max: u32) -> Result<Url> {
        let mut url = self
            .base_url
            .join("words")
            .context("Failed to build WordNet query URL")?;
        url.query_pairs_mut()
            .append_pair("rel_syn", term)
            .append_pair("max", &max.to_string());
        Ok(url)
    }
}

impl LexicalSource for WordNetClient {
    fn related_terms(&self, term: &str, max: u32) -> Result<Vec<String>> {
        let url = self.words_url(term, max)?;
        debug!("Querying lexical relations: {}", url);

        let body = self
            .agent
            .get(url.as_str())
            .header("Accept", "application/json")
            .call()
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| {
                ThesaurusError::Network(format!("WordNet lookup for '{term}' failed: {e}"))
            })?;

        let entries: Vec<WordEntry> = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse WordNet response for '{term}'"))?;

        Ok(entries.into_iter().map(|entry| entry.word).collect())
    }
}

/// Outcome of a multi-domain WordNet pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DomainSyncReport {
    pub counts: SyncCounts,
    pub attempted: Vec<Domain>,
    pub failures: Vec<(Domain, String)>,
    pub stopped: Option<StopReason>,
}

impl DomainSyncReport {
    #[inline]
    pub fn all_failed(&self) -> bool {
        !self.attempted.is_empty() && self.failures.len() == self.attempted.len()
    }
}

pub struct WordNetSync<'a> {
    database: &'a Database,
    source: &'a dyn LexicalSource,
    config: &'a WordNetConfig,
}

impl<'a> WordNetSync<'a> {
    #[inline]
    pub fn new(
        database: &'a Database,
        source: &'a dyn LexicalSource,
        config: &'a WordNetConfig,
    ) -> Self {
        Self {
            database,
            source,
            config,
        }
    }

    /// Configured seed words followed by WordNet terms already stored for
    /// the domain, de-duplicated case-insensitively and capped at `limit`.
    #[inline]
    pub async fn seeds(&self, domain: Domain, limit: usize) -> Result<Vec<String>> {
        let stored = TermQueries::list_terms_by_source(
            self.database.pool(),
            domain,
            TermSource::WordNet,
            limit,
        )
        .await?;

        let configured = self.config.seeds.get(&domain).into_iter().flatten();

        let mut seen = HashSet::new();
        let seeds = configured
            .chain(stored.iter())
            .map(|seed| seed.trim())
            .filter(|seed| !seed.is_empty() && seen.insert(seed.to_lowercase()))
            .take(limit)
            .map(str::to_string)
            .collect();

        Ok(seeds)
    }

    /// Sync one domain. Any failed lookup fails the domain before anything
    /// is written.
    #[inline]
    pub async fn sync_domain(&self, domain: Domain, limit: usize) -> Result<SyncCounts> {
        let seeds = self.seeds(domain, limit).await?;
        debug!("Syncing {} WordNet seeds for {}", seeds.len(), domain);

        let mut terms = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let related = self
                .source
                .related_terms(&seed, self.config.max_synonyms)
                .with_context(|| format!("Lookup of '{seed}' failed"))?;
            terms.push(ExternalTerm::new(seed, domain, related));
        }

        apply_external_terms(self.database, TermSource::WordNet, &terms).await
    }

    /// Sync each domain in turn; a failed domain is logged and the next one
    /// still runs.
    #[inline]
    pub async fn sync_domains(
        &self,
        domains: &[Domain],
        limit: usize,
        budget: &RunBudget,
    ) -> DomainSyncReport {
        let mut report = DomainSyncReport::default();

        for &domain in domains {
            if let Some(reason) = budget.check() {
                warn!("Stopping WordNet sync before {}: {}", domain, reason);
                report.stopped = Some(reason);
                break;
            }

            report.attempted.push(domain);
            match self.sync_domain(domain, limit).await {
                Ok(counts) => {
                    info!("WordNet {}: {}", domain, counts);
                    report.counts.merge(counts);
                }
                Err(e) => {
                    error!("WordNet sync failed for {}: {:#}", domain, e);
                    report.failures.push((domain, format!("{e:#}")));
                }
            }
        }

        report
    }

    /// Full adapter invocation, recorded in `sync_runs`. Errors only when
    /// every attempted domain failed.
    #[inline]
    pub async fn run(
        &self,
        domains: &[Domain],
        limit: usize,
        budget: &RunBudget,
    ) -> Result<DomainSyncReport> {
        record_sync_run(
            self.database,
            TermSource::WordNet,
            |report: &DomainSyncReport| report.counts,
            async {
                let report = self.sync_domains(domains, limit, budget).await;
                if report.all_failed() {
                    let details = report
                        .failures
                        .iter()
                        .map(|(domain, message)| format!("{domain}: {message}"))
                        .join("; ");
                    return Err(anyhow::anyhow!("all domains failed ({details})"));
                }
                Ok(report)
            },
        )
        .await
    }
}
