use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use thesaurus_sync::budget::RunBudget;
use thesaurus_sync::config::{Config, resolve_config_dir};
use thesaurus_sync::database::Database;
use thesaurus_sync::database::sqlite::Domain;
use thesaurus_sync::logging::{LoggingOptions, init_logging};
use thesaurus_sync::orchestrator::{Orchestrator, RunOutcome, Task, TaskOptions};
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "thesaurus-sync")]
#[command(about = "Scheduled thesaurus maintenance: source sync, embeddings, export and cleanup")]
#[command(version)]
struct Cli {
    /// Task to run
    #[arg(value_enum, default_value_t = Task::All)]
    task: Task,
    /// Restrict sync and export to a single domain
    #[arg(long, value_enum)]
    domain: Option<Domain>,
    /// Maximum items processed per stage
    #[arg(long, default_value_t = 1000)]
    limit: usize,
    /// Sync sources even if the last sync is recent
    #[arg(long)]
    force: bool,
    /// Report what would happen without calling services or writing
    #[arg(long)]
    dry_run: bool,
    /// Suppress stdout output; the log file is still written
    #[arg(long)]
    quiet: bool,
    /// Configuration and data directory (default ~/.thesaurus-sync)
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

impl Cli {
    fn task_options(&self) -> TaskOptions {
        TaskOptions {
            domain: self.domain,
            limit: self.limit,
            force: self.force,
            dry_run: self.dry_run,
            quiet: self.quiet,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_dir = match resolve_config_dir(cli.config_dir.clone()) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("thesaurus-sync: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config = match Config::load(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            let fallback = Config::with_base_dir(&config_dir);
            setup_logging(&cli, &fallback);
            error!("Failed to load configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&cli, &config);

    match run(&cli, config).await {
        Ok(RunOutcome::Skipped) => ExitCode::SUCCESS,
        Ok(RunOutcome::Completed(report)) => {
            if let Some(status) = report.status.as_ref().filter(|_| !cli.quiet) {
                print!("{status}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}: {:#}", cli.task, e);
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(cli: &Cli, config: &Config) {
    let options = LoggingOptions {
        quiet: cli.quiet,
        level: config.logging.level.clone(),
        file: Some(config.log_file_path()),
    };

    for notice in install_logging(options, init_logging) {
        eprintln!("thesaurus-sync: {notice}");
    }
}

/// Install logging, retrying with stdout only when the full setup fails.
/// Returns one notice per failed attempt.
fn install_logging<F>(mut options: LoggingOptions, mut init: F) -> Vec<String>
where
    F: FnMut(&LoggingOptions) -> anyhow::Result<()>,
{
    let mut notices = Vec::new();

    if let Err(e) = init(&options) {
        notices.push(format!("{e:#}; logging to stdout only"));
        options.file = None;
        options.quiet = false;
        if let Err(e) = init(&options) {
            notices.push(format!("{e:#}; continuing without logging"));
        }
    }

    notices
}

async fn run(cli: &Cli, config: Config) -> anyhow::Result<RunOutcome> {
    let database = Database::initialize(&config.database_path())
        .await
        .context("Failed to open term store")?;

    let budget = RunBudget::new(Duration::from_secs(config.embeddings.max_runtime_seconds));
    let interrupt = budget.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping at the next checkpoint");
            interrupt.cancel();
        }
    });

    let mut orchestrator = Orchestrator::from_config(config, database, budget)?;
    orchestrator.run(cli.task, &cli.task_options()).await
}
