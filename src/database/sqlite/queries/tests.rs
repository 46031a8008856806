use super::*;
use chrono::Duration;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

async fn create_test_pool() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(&db_path)
                .create_if_missing(true)
                .foreign_keys(true),
        )
        .await
        .expect("Failed to create test pool");

    sqlx::query(include_str!("../migrations/001_initial_schema.sql"))
        .execute(&pool)
        .await
        .expect("Failed to run migrations");

    (temp_dir, pool)
}

async fn set_updated_at(pool: &SqlitePool, id: i64, at: NaiveDateTime) {
    sqlx::query("UPDATE terms SET updated_at = ? WHERE id = ?")
        .bind(at)
        .bind(id)
        .execute(pool)
        .await
        .expect("Failed to backdate term");
}

async fn set_embedding_at(pool: &SqlitePool, id: i64, dimension: usize, at: NaiveDateTime) {
    let vector = vec![0.5_f32; dimension];
    TermQueries::store_embedding(pool, id, &vector, at)
        .await
        .expect("Failed to store embedding");
}

#[tokio::test]
async fn term_crud_operations() {
    let (_temp_dir, pool) = create_test_pool().await;

    let created = TermQueries::create(
        &pool,
        NewTerm::new(
            "Finding aid",
            Domain::Archival,
            TermSource::Local,
            ["inventory", "register"],
        ),
    )
    .await
    .expect("Failed to create term");

    assert_eq!(created.term, "Finding aid");
    assert_eq!(created.source, TermSource::Local);
    assert_eq!(created.synonyms(), ["inventory", "register"]);
    assert!(created.embedding.is_none());
    assert!(created.embedding_updated_at.is_none());

    let by_name = TermQueries::get_by_term(&pool, "Finding aid", Domain::Archival)
        .await
        .expect("Failed to get term")
        .expect("Term should exist");
    assert_eq!(by_name.id, created.id);

    let other_domain = TermQueries::get_by_term(&pool, "Finding aid", Domain::Library)
        .await
        .expect("Failed to get term");
    assert!(other_domain.is_none());
}

#[tokio::test]
async fn upsert_adds_then_updates_then_skips() {
    let (_temp_dir, pool) = create_test_pool().await;

    let first = NewTerm::new(
        "catalogue",
        Domain::Library,
        TermSource::WordNet,
        ["list", "inventory"],
    );
    assert_eq!(
        TermQueries::upsert_external(&pool, &first).await.expect("upsert"),
        UpsertOutcome::Added
    );

    let changed = NewTerm::new(
        "catalogue",
        Domain::Library,
        TermSource::WordNet,
        ["list", "register"],
    );
    assert_eq!(
        TermQueries::upsert_external(&pool, &changed)
            .await
            .expect("upsert"),
        UpsertOutcome::Updated
    );

    assert_eq!(
        TermQueries::upsert_external(&pool, &changed)
            .await
            .expect("upsert"),
        UpsertOutcome::Skipped
    );

    let stored = TermQueries::get_by_term(&pool, "catalogue", Domain::Library)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(stored.synonyms(), ["list", "register"]);
    assert_eq!(TermQueries::count(&pool).await.expect("count"), 1);
}

#[tokio::test]
async fn upsert_refreshes_updated_at_on_unchanged_touch() {
    let (_temp_dir, pool) = create_test_pool().await;

    let term = NewTerm::new("map", Domain::General, TermSource::WordNet, ["chart"]);
    TermQueries::upsert_external(&pool, &term)
        .await
        .expect("upsert");
    let stored = TermQueries::get_by_term(&pool, "map", Domain::General)
        .await
        .expect("get")
        .expect("exists");

    let old = Utc::now().naive_utc() - Duration::days(100);
    set_updated_at(&pool, stored.id, old).await;

    assert_eq!(
        TermQueries::upsert_external(&pool, &term).await.expect("upsert"),
        UpsertOutcome::Skipped
    );

    let refreshed = TermQueries::get_by_id(&pool, stored.id)
        .await
        .expect("get")
        .expect("exists");
    assert!(refreshed.updated_at > old + Duration::days(99));
}

#[tokio::test]
async fn upsert_never_overwrites_local_entries() {
    let (_temp_dir, pool) = create_test_pool().await;

    let local = TermQueries::create(
        &pool,
        NewTerm::new("fonds", Domain::Archival, TermSource::Local, ["archival fonds"]),
    )
    .await
    .expect("create");

    for source in [TermSource::WordNet, TermSource::Wikidata] {
        let upstream = NewTerm::new("fonds", Domain::Archival, source, ["funds", "capital"]);
        assert_eq!(
            TermQueries::upsert_external(&pool, &upstream)
                .await
                .expect("upsert"),
            UpsertOutcome::Skipped
        );
    }

    let after = TermQueries::get_by_id(&pool, local.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(after, local);
}

#[tokio::test]
async fn upsert_rejects_local_source() {
    let (_temp_dir, pool) = create_test_pool().await;

    let term = NewTerm::new("record", Domain::Archival, TermSource::Local, ["document"]);
    assert!(TermQueries::upsert_external(&pool, &term).await.is_err());
}

#[tokio::test]
async fn upsert_keeps_owner_across_external_sources() {
    let (_temp_dir, pool) = create_test_pool().await;

    let from_wordnet = NewTerm::new(
        "museum",
        Domain::Museum,
        TermSource::WordNet,
        ["depository"],
    );
    TermQueries::upsert_external(&pool, &from_wordnet)
        .await
        .expect("upsert");

    let from_wikidata = NewTerm::new(
        "museum",
        Domain::Museum,
        TermSource::Wikidata,
        ["Depository", "gallery"],
    );
    assert_eq!(
        TermQueries::upsert_external(&pool, &from_wikidata)
            .await
            .expect("upsert"),
        UpsertOutcome::Skipped
    );

    let stored = TermQueries::get_by_term(&pool, "museum", Domain::Museum)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(stored.source, TermSource::WordNet);
    assert_eq!(stored.synonyms(), ["depository"]);
}

#[tokio::test]
async fn alternating_sources_with_unchanged_data_settle() {
    let (_temp_dir, pool) = create_test_pool().await;

    let from_wordnet = NewTerm::new(
        "museum",
        Domain::Museum,
        TermSource::WordNet,
        ["depository"],
    );
    let from_wikidata = NewTerm::new("museum", Domain::Museum, TermSource::Wikidata, ["gallery"]);

    let mut outcomes = Vec::new();
    for _ in 0..2 {
        for term in [&from_wordnet, &from_wikidata] {
            outcomes.push(
                TermQueries::upsert_external(&pool, term)
                    .await
                    .expect("upsert"),
            );
        }
    }

    assert_eq!(
        outcomes,
        [
            UpsertOutcome::Added,
            UpsertOutcome::Skipped,
            UpsertOutcome::Skipped,
            UpsertOutcome::Skipped,
        ]
    );

    let stored = TermQueries::get_by_term(&pool, "museum", Domain::Museum)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(stored.source, TermSource::WordNet);
    assert_eq!(stored.synonyms(), ["depository"]);
}

#[tokio::test]
async fn staleness_selection() {
    let (_temp_dir, pool) = create_test_pool().await;
    let dimension = 4;
    let now = Utc::now().naive_utc();

    let mut ids = Vec::new();
    for word in ["missing", "stale", "fresh", "corrupt"] {
        let term = TermQueries::create(
            &pool,
            NewTerm::new(word, Domain::General, TermSource::Local, ["x"]),
        )
        .await
        .expect("create");
        ids.push(term.id);
    }

    set_embedding_at(&pool, ids[1], dimension, now - Duration::days(40)).await;
    set_embedding_at(&pool, ids[2], dimension, now - Duration::days(10)).await;
    set_embedding_at(&pool, ids[3], dimension - 1, now - Duration::days(1)).await;

    let stale_before = now - Duration::days(30);
    let candidates = TermQueries::embedding_candidates(&pool, stale_before, dimension, 100)
        .await
        .expect("candidates");
    let mut selected: Vec<&str> = candidates.iter().map(|c| c.term.as_str()).collect();
    selected.sort_unstable();

    assert_eq!(selected, vec!["corrupt", "missing", "stale"]);
    assert_eq!(
        TermQueries::count_embedding_candidates(&pool, stale_before, dimension)
            .await
            .expect("count"),
        3
    );

    let capped = TermQueries::embedding_candidates(&pool, stale_before, dimension, 2)
        .await
        .expect("candidates");
    assert_eq!(capped.len(), 2);
}

#[tokio::test]
async fn store_embedding_leaves_updated_at() {
    let (_temp_dir, pool) = create_test_pool().await;

    let term = TermQueries::create(
        &pool,
        NewTerm::new("letter", Domain::General, TermSource::Local, ["epistle"]),
    )
    .await
    .expect("create");

    let generated_at = Utc::now().naive_utc();
    assert!(
        TermQueries::store_embedding(&pool, term.id, &[1.0, 2.0], generated_at)
            .await
            .expect("store")
    );

    let stored = TermQueries::get_by_id(&pool, term.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(stored.embedding_vector(2), Some(vec![1.0, 2.0]));
    let stored_at = stored
        .embedding_updated_at
        .expect("embedding timestamp should be set");
    assert!((stored_at - generated_at).num_milliseconds().abs() < 1);
    assert_eq!(stored.updated_at, term.updated_at);
}

#[tokio::test]
async fn synonym_groups_are_ordered_and_filtered() {
    let (_temp_dir, pool) = create_test_pool().await;

    for (word, domain, synonyms) in [
        ("specimen", Domain::Museum, vec!["sample"]),
        ("archive", Domain::Archival, vec!["repository"]),
        ("orphan", Domain::Archival, vec![]),
        ("atlas", Domain::Archival, vec!["map book"]),
    ] {
        TermQueries::create(
            &pool,
            NewTerm::new(word, domain, TermSource::Local, synonyms),
        )
        .await
        .expect("create");
    }

    let groups = TermQueries::list_synonym_groups(&pool, None)
        .await
        .expect("groups");
    let names: Vec<&str> = groups.iter().map(|t| t.term.as_str()).collect();
    assert_eq!(names, vec!["archive", "atlas", "specimen"]);

    let museum_only = TermQueries::count_synonym_groups(&pool, Some(Domain::Museum))
        .await
        .expect("count");
    assert_eq!(museum_only, 1);
}

#[tokio::test]
async fn expired_predicate_exempts_local_terms() {
    let (_temp_dir, pool) = create_test_pool().await;
    let now = Utc::now().naive_utc();

    let old_local = TermQueries::create(
        &pool,
        NewTerm::new("old local", Domain::General, TermSource::Local, ["a"]),
    )
    .await
    .expect("create");
    set_updated_at(&pool, old_local.id, now - Duration::days(400)).await;

    TermQueries::upsert_external(
        &pool,
        &NewTerm::new("old synced", Domain::General, TermSource::WordNet, ["b"]),
    )
    .await
    .expect("upsert");
    let old_synced = TermQueries::get_by_term(&pool, "old synced", Domain::General)
        .await
        .expect("get")
        .expect("exists");
    set_updated_at(&pool, old_synced.id, now - Duration::days(100)).await;

    TermQueries::upsert_external(
        &pool,
        &NewTerm::new("young synced", Domain::General, TermSource::Wikidata, ["c"]),
    )
    .await
    .expect("upsert");

    let cutoff = now - Duration::days(90);
    assert_eq!(
        TermQueries::count_expired(&pool, cutoff).await.expect("count"),
        1
    );
    assert_eq!(
        TermQueries::delete_expired(&pool, cutoff)
            .await
            .expect("delete"),
        1
    );

    assert!(
        TermQueries::get_by_id(&pool, old_local.id)
            .await
            .expect("get")
            .is_some()
    );
    assert!(
        TermQueries::get_by_term(&pool, "young synced", Domain::General)
            .await
            .expect("get")
            .is_some()
    );
    assert!(
        TermQueries::get_by_id(&pool, old_synced.id)
            .await
            .expect("get")
            .is_none()
    );
}

#[tokio::test]
async fn sync_runs_record_outcomes() {
    let (_temp_dir, pool) = create_test_pool().await;

    let ok_run = SyncRunQueries::start(&pool, TermSource::WordNet)
        .await
        .expect("start");
    SyncRunQueries::finish(&pool, ok_run, 3, 2, 1, None)
        .await
        .expect("finish");

    let failed_run = SyncRunQueries::start(&pool, TermSource::Wikidata)
        .await
        .expect("start");
    SyncRunQueries::finish(&pool, failed_run, 0, 0, 0, Some("HTTP 503"))
        .await
        .expect("finish");

    let runs = SyncRunQueries::recent(&pool, 10).await.expect("recent");
    assert_eq!(runs.len(), 2);

    let wordnet = runs
        .iter()
        .find(|run| run.id == ok_run)
        .expect("wordnet run recorded");
    assert_eq!(wordnet.status, SyncStatus::Completed);
    assert_eq!(
        (wordnet.terms_added, wordnet.terms_updated, wordnet.terms_skipped),
        (3, 2, 1)
    );
    assert!(wordnet.completed_at.is_some());

    let wikidata = runs
        .iter()
        .find(|run| run.id == failed_run)
        .expect("wikidata run recorded");
    assert_eq!(wikidata.status, SyncStatus::Failed);
    assert_eq!(wikidata.error_message.as_deref(), Some("HTTP 503"));
}

#[tokio::test]
async fn run_lock_is_exclusive_until_stale() {
    let (_temp_dir, pool) = create_test_pool().await;
    let now = Utc::now().naive_utc();
    let stale_before = now - Duration::seconds(120);

    assert!(
        RunLockQueries::try_acquire(&pool, "cron", "first", now, stale_before)
            .await
            .expect("acquire")
    );
    assert!(
        !RunLockQueries::try_acquire(&pool, "cron", "second", now, stale_before)
            .await
            .expect("acquire")
    );

    // A holder that stopped heartbeating can be taken over
    let later = now + Duration::seconds(300);
    assert!(
        RunLockQueries::try_acquire(&pool, "cron", "second", later, later - Duration::seconds(120))
            .await
            .expect("acquire")
    );

    assert!(
        !RunLockQueries::release(&pool, "cron", "first")
            .await
            .expect("release")
    );
    assert!(
        RunLockQueries::heartbeat(&pool, "cron", "second", later)
            .await
            .expect("heartbeat")
    );
    assert!(
        RunLockQueries::release(&pool, "cron", "second")
            .await
            .expect("release")
    );
    assert!(
        RunLockQueries::holder(&pool, "cron")
            .await
            .expect("holder")
            .is_none()
    );
}
