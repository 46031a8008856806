use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

use crate::database::sqlite::{Domain, NewTerm, TermSource};

struct FakeProvider {
    dimension: usize,
    delay: std::time::Duration,
    calls: AtomicUsize,
    healthy: bool,
}

impl FakeProvider {
    fn new(dimension: usize) -> Self {
        Self {
            dimension,
            delay: std::time::Duration::ZERO,
            calls: AtomicUsize::new(0),
            healthy: true,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for FakeProvider {
    fn model(&self) -> &str {
        "fake-embed"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        match text {
            t if t.starts_with("broken") => Err(anyhow::anyhow!("model crashed")),
            t if t.starts_with("short") => Ok(vec![1.0]),
            t if t.starts_with("nan") => Ok(vec![f32::NAN; self.dimension]),
            _ => Ok(vec![0.5; self.dimension]),
        }
    }

    fn health_check(&self) -> Result<()> {
        if self.healthy {
            Ok(())
        } else {
            Err(anyhow::anyhow!("connection refused"))
        }
    }
}

async fn create_test_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    Ok((temp_dir, database))
}

async fn seed_terms(database: &Database, terms: &[&str]) -> Result<()> {
    for term in terms {
        database
            .create_term(NewTerm::new(term, Domain::General, TermSource::Local, ["x"]))
            .await?;
    }
    Ok(())
}

fn generous_budget() -> RunBudget {
    RunBudget::new(std::time::Duration::from_secs(600))
}

#[tokio::test]
async fn stores_vectors_and_keeps_counters_distinct() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    seed_terms(&database, &["archive", "broken term", "short term", "nan term"]).await?;
    let provider = FakeProvider::new(4);

    let stats = EmbeddingUpdater::new(&database, &provider, 30)
        .update(100, &generous_budget())
        .await?;

    assert_eq!(stats.candidates, 4);
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.rejected, 2);
    assert_eq!(stats.remaining, 0);
    assert_eq!(stats.stopped, None);

    let archive = database
        .get_term("archive", Domain::General)
        .await?
        .expect("archive stored");
    assert_eq!(archive.embedding_vector(4), Some(vec![0.5; 4]));
    assert!(archive.embedding_updated_at.is_some());

    let broken = database
        .get_term("broken term", Domain::General)
        .await?
        .expect("broken stored");
    assert!(broken.embedding.is_none());

    Ok(())
}

#[tokio::test]
async fn fresh_embeddings_are_not_regenerated() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    seed_terms(&database, &["archive"]).await?;
    let provider = FakeProvider::new(4);
    let updater = EmbeddingUpdater::new(&database, &provider, 30);

    updater.update(100, &generous_budget()).await?;
    let second = updater.update(100, &generous_budget()).await?;

    assert_eq!(second.candidates, 0);
    assert_eq!(provider.calls(), 1);

    // A dimension change makes every stored vector a candidate again
    let wider = FakeProvider::new(8);
    let regenerated = EmbeddingUpdater::new(&database, &wider, 30)
        .update(100, &generous_budget())
        .await?;
    assert_eq!(regenerated.updated, 1);

    Ok(())
}

#[tokio::test]
async fn limit_caps_candidates() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    seed_terms(&database, &["a1", "a2", "a3", "a4", "a5"]).await?;
    let provider = FakeProvider::new(2);

    let stats = EmbeddingUpdater::new(&database, &provider, 30)
        .update(2, &generous_budget())
        .await?;

    assert_eq!(stats.candidates, 2);
    assert_eq!(stats.updated, 2);
    assert_eq!(provider.calls(), 2);

    Ok(())
}

#[tokio::test]
async fn exhausted_budget_stops_with_partial_counts() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let terms: Vec<String> = (0..20).map(|i| format!("term {i}")).collect();
    let term_refs: Vec<&str> = terms.iter().map(String::as_str).collect();
    seed_terms(&database, &term_refs).await?;

    let provider = FakeProvider {
        delay: std::time::Duration::from_millis(20),
        ..FakeProvider::new(2)
    };
    let budget = RunBudget::new(std::time::Duration::from_millis(50));

    let stats = EmbeddingUpdater::new(&database, &provider, 30)
        .update(100, &budget)
        .await?;

    assert_eq!(stats.stopped, Some(StopReason::BudgetExhausted));
    assert!(stats.updated >= 1);
    assert!(stats.updated < 20);
    assert_eq!(stats.updated + stats.remaining, 20);
    assert_eq!(provider.calls() as u64, stats.updated);

    Ok(())
}

#[tokio::test]
async fn cancellation_stops_after_current_term() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    seed_terms(&database, &["one", "two", "three"]).await?;
    let provider = FakeProvider::new(2);
    let budget = generous_budget();
    budget.cancel();

    let stats = EmbeddingUpdater::new(&database, &provider, 30)
        .update(100, &budget)
        .await?;

    assert_eq!(stats.stopped, Some(StopReason::Cancelled));
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.remaining, 2);

    Ok(())
}

#[tokio::test]
async fn dry_run_only_counts() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    seed_terms(&database, &["one", "two", "three"]).await?;
    let provider = FakeProvider {
        healthy: false,
        ..FakeProvider::new(2)
    };

    let stats = EmbeddingUpdater::new(&database, &provider, 30)
        .dry_run(true)
        .update(2, &generous_budget())
        .await?;

    assert_eq!(stats.candidates, 2);
    assert_eq!(stats.updated, 0);
    assert_eq!(provider.calls(), 0);

    let embedded: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM terms WHERE embedding IS NOT NULL")
            .fetch_one(database.pool())
            .await?;
    assert_eq!(embedded, 0);

    Ok(())
}

#[tokio::test]
async fn unhealthy_provider_fails_the_stage() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    seed_terms(&database, &["one"]).await?;
    let provider = FakeProvider {
        healthy: false,
        ..FakeProvider::new(2)
    };

    let result = EmbeddingUpdater::new(&database, &provider, 30)
        .update(10, &generous_budget())
        .await;

    assert!(result.is_err());
    assert_eq!(provider.calls(), 0);

    Ok(())
}

#[test]
fn stats_display_mentions_stop_reason() {
    let stats = EmbeddingStats {
        candidates: 5,
        updated: 3,
        rejected: 0,
        failed: 1,
        remaining: 1,
        stopped: Some(StopReason::BudgetExhausted),
    };

    assert_eq!(
        stats.to_string(),
        "3 updated, 0 rejected, 1 failed, 1 remaining (stopped: runtime budget exhausted)"
    );
}

#[tokio::test]
async fn oversized_staleness_threshold_is_an_error() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    seed_terms(&database, &["archive"]).await?;
    let provider = FakeProvider::new(4);

    let result = EmbeddingUpdater::new(&database, &provider, 200_000_000)
        .update(100, &generous_budget())
        .await;

    assert!(result.is_err());
    assert_eq!(provider.calls(), 0);

    Ok(())
}
