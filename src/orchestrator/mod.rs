//! Task dispatch under the execution guard.
//!
//! Every mutating task runs between a successful `acquire` and its matching
//! `release`. Stage errors are logged and collected in the [`RunReport`];
//! they never abort the stages that follow.


use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{error, info, warn};

use crate::budget::{RunBudget, StopReason};
use crate::config::Config;
use crate::database::sqlite::{Database, Domain, SyncRun, TermQueries, TermStatistics};
use crate::embeddings::{EmbeddingProvider, EmbeddingStats, EmbeddingUpdater, OllamaClient};
use crate::export::{ExportSummary, Exporter};
use crate::lock::{ExecutionGuard, guard_from_config};
use crate::retention::RetentionCleaner;
use crate::sources::{
    DomainSyncReport, KnowledgeGraphSource, LexicalSource, SyncCounts, WikidataClient,
    WikidataSync, WordNetClient, WordNetSync,
};

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Task {
    SyncWordnet,
    SyncWikidata,
    UpdateEmbeddings,
    ExportEs,
    Cleanup,
    #[default]
    All,
    /// Read-only report; runs without the guard
    Status,
}

impl Task {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Task::SyncWordnet => "sync-wordnet",
            Task::SyncWikidata => "sync-wikidata",
            Task::UpdateEmbeddings => "update-embeddings",
            Task::ExportEs => "export-es",
            Task::Cleanup => "cleanup",
            Task::All => "all",
            Task::Status => "status",
        }
    }

    #[inline]
    pub fn needs_guard(self) -> bool {
        self != Task::Status
    }
}

impl std::fmt::Display for Task {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOptions {
    pub domain: Option<Domain>,
    pub limit: usize,
    pub force: bool,
    pub dry_run: bool,
    pub quiet: bool,
}

impl Default for TaskOptions {
    #[inline]
    fn default() -> Self {
        Self {
            domain: None,
            limit: 1000,
            force: false,
            dry_run: false,
            quiet: false,
        }
    }
}

/// Snapshot printed by the `status` task
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub statistics: TermStatistics,
    pub pending_embeddings: i64,
    pub last_sync: Option<NaiveDateTime>,
    pub sync_due: bool,
    pub recent_runs: Vec<SyncRun>,
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Terms: {}", self.statistics.total)?;
        for (source, count) in &self.statistics.by_source {
            writeln!(f, "  {source}: {count}")?;
        }
        for (domain, count) in &self.statistics.by_domain {
            writeln!(f, "  {domain}: {count}")?;
        }
        writeln!(f, "Synonym groups: {}", self.statistics.synonym_groups)?;
        writeln!(
            f,
            "Embeddings: {} stored, {} pending",
            self.statistics.with_embedding, self.pending_embeddings
        )?;
        match self.last_sync {
            Some(at) => writeln!(f, "Last source sync: {at} UTC")?,
            None => writeln!(f, "Last source sync: never")?,
        }
        writeln!(
            f,
            "Next source sync: {}",
            if self.sync_due { "due" } else { "not due" }
        )?;

        if !self.recent_runs.is_empty() {
            writeln!(f, "Recent syncs:")?;
            for run in &self.recent_runs {
                write!(
                    f,
                    "  {} {} {} (+{} ~{} ={})",
                    run.started_at,
                    run.source,
                    run.status,
                    run.terms_added,
                    run.terms_updated,
                    run.terms_skipped
                )?;
                if let Some(message) = &run.error_message {
                    write!(f, ": {message}")?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// Everything one invocation did. Stage failures are listed, not raised.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub wordnet: Option<DomainSyncReport>,
    pub wikidata: Option<SyncCounts>,
    /// `all` found the sources synced recently and left them alone
    pub sources_skipped: bool,
    pub sync_state_updated: bool,
    pub embeddings: Option<EmbeddingStats>,
    pub export: Option<ExportSummary>,
    pub cleaned: Option<u64>,
    pub status: Option<StatusReport>,
    /// `(stage, message)` for every stage that errored
    pub failures: Vec<(String, String)>,
    pub stopped: Option<StopReason>,
}

impl RunReport {
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, stage: Task, e: &anyhow::Error) {
        error!("{}: {:#}", stage, e);
        self.failures.push((stage.to_string(), format!("{e:#}")));
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    /// Another invocation holds the guard; nothing was done
    Skipped,
    Completed(RunReport),
}

/// External collaborators the stages call
#[derive(Clone)]
pub struct Services {
    pub lexical: Arc<dyn LexicalSource>,
    pub knowledge_graph: Arc<dyn KnowledgeGraphSource>,
    pub embeddings: Arc<dyn EmbeddingProvider>,
}

impl Services {
    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            lexical: Arc::new(
                WordNetClient::new(&config.wordnet).context("Failed to create WordNet client")?,
            ),
            knowledge_graph: Arc::new(
                WikidataClient::new(&config.wikidata)
                    .context("Failed to create Wikidata client")?,
            ),
            embeddings: Arc::new(
                OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?,
            ),
        })
    }
}

pub struct Orchestrator {
    config: Config,
    database: Database,
    services: Services,
    guard: Box<dyn ExecutionGuard>,
    budget: RunBudget,
}

impl Orchestrator {
    #[inline]
    pub fn new(
        config: Config,
        database: Database,
        services: Services,
        guard: Box<dyn ExecutionGuard>,
        budget: RunBudget,
    ) -> Self {
        Self {
            config,
            database,
            services,
            guard,
            budget,
        }
    }

    /// Wire up the production clients and the configured guard
    #[inline]
    pub fn from_config(config: Config, database: Database, budget: RunBudget) -> Result<Self> {
        let services = Services::from_config(&config)?;
        let guard = guard_from_config(&config, &database);
        Ok(Self::new(config, database, services, guard, budget))
    }

    #[inline]
    pub fn budget(&self) -> &RunBudget {
        &self.budget
    }

    /// Run `task`. Errors only for faults outside any stage, such as the
    /// guard itself failing.
    #[inline]
    pub async fn run(&mut self, task: Task, options: &TaskOptions) -> Result<RunOutcome> {
        if !task.needs_guard() {
            let mut report = RunReport::default();
            match self.status_report().await {
                Ok(status) => report.status = Some(status),
                Err(e) => report.fail(task, &e),
            }
            return Ok(RunOutcome::Completed(report));
        }

        if !self.guard.acquire().await? {
            info!(
                "Another run holds the {}; skipping {}",
                self.guard.describe(),
                task
            );
            return Ok(RunOutcome::Skipped);
        }
        info!("Acquired {}; running {}", self.guard.describe(), task);
        if options.dry_run {
            info!("[DRY RUN] No changes will be made");
        }

        let report = self.dispatch(task, options).await;

        self.guard
            .release()
            .await
            .with_context(|| format!("Failed to release {}", self.guard.describe()))?;

        if report.is_clean() {
            info!("{} finished", task);
        } else {
            warn!("{} finished with {} failed stage(s)", task, report.failures.len());
        }
        Ok(RunOutcome::Completed(report))
    }

    async fn dispatch(&self, task: Task, options: &TaskOptions) -> RunReport {
        let mut report = RunReport::default();

        match task {
            Task::SyncWordnet => self.sync_wordnet(options, &mut report).await,
            Task::SyncWikidata => self.sync_wikidata(options, &mut report).await,
            Task::UpdateEmbeddings => self.update_embeddings(options, &mut report).await,
            Task::ExportEs => self.export(options, &mut report).await,
            Task::Cleanup => self.cleanup(options, &mut report).await,
            Task::All => self.run_all(options, &mut report).await,
            Task::Status => {}
        }

        report
    }

    async fn run_all(&self, options: &TaskOptions, report: &mut RunReport) {
        let now = Utc::now().timestamp();

        let due = match self.database.last_sync().await {
            Ok(last_sync) => Some(options.force || self.sync_due(last_sync, now)),
            Err(e) => {
                report.fail(Task::All, &e);
                None
            }
        };

        match due {
            None => {
                warn!("Last sync time unavailable; skipping source sync");
                report.sources_skipped = true;
            }
            Some(false) => {
                info!(
                    "Sources synced within the last {} days; skipping source sync",
                    self.config.sync.interval_days
                );
                report.sources_skipped = true;
            }
            Some(true) => {
                if let Some(reason) = self.budget.check() {
                    warn!("Source sync not started: {}", reason);
                    report.stopped = Some(reason);
                } else {
                    self.sync_wordnet(options, report).await;
                    self.sync_wikidata(options, report).await;

                    if options.dry_run {
                        info!("[DRY RUN] Would record source sync time");
                    } else {
                        match self.database.set_last_sync(now).await {
                            Ok(()) => report.sync_state_updated = true,
                            Err(e) => report.fail(Task::All, &e),
                        }
                    }
                }
            }
        }

        for stage in [Task::UpdateEmbeddings, Task::ExportEs, Task::Cleanup] {
            if self.budget.is_cancelled() {
                warn!("Run cancelled; skipping {}", stage);
                report.stopped = Some(StopReason::Cancelled);
                continue;
            }
            match stage {
                Task::UpdateEmbeddings => self.update_embeddings(options, report).await,
                Task::ExportEs => self.export(options, report).await,
                _ => self.cleanup(options, report).await,
            }
        }
    }

    fn sync_due(&self, last_sync: i64, now: i64) -> bool {
        let interval = i64::try_from(self.config.sync.interval_days)
            .unwrap_or(i64::MAX)
            .saturating_mul(SECONDS_PER_DAY);
        last_sync == 0 || now.saturating_sub(last_sync) > interval
    }

    fn domains(&self, options: &TaskOptions) -> Vec<Domain> {
        options
            .domain
            .map_or_else(|| self.config.sync.domains.clone(), |domain| vec![domain])
    }

    async fn sync_wordnet(&self, options: &TaskOptions, report: &mut RunReport) {
        if !self.config.wordnet.enabled {
            info!("WordNet sync disabled");
            return;
        }
        if let Some(reason) = self.budget.check() {
            warn!("Skipping WordNet sync: {}", reason);
            report.stopped = Some(reason);
            return;
        }

        let domains = self.domains(options);
        if options.dry_run {
            info!(
                "[DRY RUN] Would sync WordNet synonyms for {:?} (up to {} seeds each)",
                domains, options.limit
            );
            return;
        }

        let sync = WordNetSync::new(
            &self.database,
            self.services.lexical.as_ref(),
            &self.config.wordnet,
        );
        match sync.run(&domains, options.limit, &self.budget).await {
            Ok(result) => {
                if result.stopped.is_some() {
                    report.stopped = result.stopped;
                }
                report.wordnet = Some(result);
            }
            Err(e) => report.fail(Task::SyncWordnet, &e),
        }
    }

    async fn sync_wikidata(&self, options: &TaskOptions, report: &mut RunReport) {
        if !self.config.wikidata.enabled {
            info!("Wikidata sync disabled");
            return;
        }
        if let Some(reason) = self.budget.check() {
            warn!("Skipping Wikidata sync: {}", reason);
            report.stopped = Some(reason);
            return;
        }

        let domains = self.domains(options);
        if options.dry_run {
            info!(
                "[DRY RUN] Would query Wikidata for {:?} (limit {})",
                domains, options.limit
            );
            return;
        }

        let sync = WikidataSync::new(&self.database, self.services.knowledge_graph.as_ref());
        match sync.sync_all(&domains, options.limit).await {
            Ok(counts) => report.wikidata = Some(counts),
            Err(e) => report.fail(Task::SyncWikidata, &e),
        }
    }

    async fn update_embeddings(&self, options: &TaskOptions, report: &mut RunReport) {
        let updater = EmbeddingUpdater::new(
            &self.database,
            self.services.embeddings.as_ref(),
            self.config.embeddings.stale_after_days,
        )
        .dry_run(options.dry_run);

        match updater.update(options.limit, &self.budget).await {
            Ok(stats) => {
                if stats.stopped.is_some() {
                    report.stopped = stats.stopped;
                }
                report.embeddings = Some(stats);
            }
            Err(e) => report.fail(Task::UpdateEmbeddings, &e),
        }
    }

    async fn export(&self, options: &TaskOptions, report: &mut RunReport) {
        let exporter = Exporter::new(
            &self.database,
            self.config.export_path(),
            self.config.export.format,
        )
        .dry_run(options.dry_run);

        match exporter.export(options.domain).await {
            Ok(summary) => report.export = Some(summary),
            Err(e) => report.fail(Task::ExportEs, &e),
        }
    }

    async fn cleanup(&self, options: &TaskOptions, report: &mut RunReport) {
        let cleaner = RetentionCleaner::new(&self.database).optimize(self.config.cleanup.optimize);

        match cleaner
            .cleanup(self.config.cleanup.retention_days, options.dry_run)
            .await
        {
            Ok(count) => report.cleaned = Some(count),
            Err(e) => report.fail(Task::Cleanup, &e),
        }
    }

    async fn status_report(&self) -> Result<StatusReport> {
        let statistics = self.database.term_statistics().await?;

        let stale_before = Utc::now().naive_utc()
            - chrono::Duration::days(self.config.embeddings.stale_after_days);
        let pending_embeddings = TermQueries::count_embedding_candidates(
            self.database.pool(),
            stale_before,
            self.config.ollama.embedding_dimension as usize,
        )
        .await?;

        let last_sync = self.database.last_sync().await?;
        let recent_runs = self.database.recent_sync_runs(10).await?;

        Ok(StatusReport {
            statistics,
            pending_embeddings,
            last_sync: (last_sync > 0)
                .then(|| DateTime::from_timestamp(last_sync, 0))
                .flatten()
                .map(|at| at.naive_utc()),
            sync_due: self.sync_due(last_sync, Utc::now().timestamp()),
            recent_runs,
        })
    }
}
