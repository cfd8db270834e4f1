//! Batch orchestration integration tests with scripted providers.

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use pretty_assertions::assert_eq;
use spark_rs_config::{BatchConfig, ProviderConfig, SparkConfig, TopicsConfig};
use spark_rs_core::{Clock, EnsureOutcome, SparkCoreError, SparkService};
use spark_rs_provider::ProviderError;
use spark_rs_store::{LockRecord, SparkStore, SqliteSparkStore, StoreError};
use spark_rs_test_utils::{FixedClock, ScriptedCompletion, ScriptedEmbedding, candidate_json};
use std::sync::Arc;
use tempfile::tempdir;

const DIMENSIONS: usize = 32;

struct Harness {
    service: SparkService,
    store: Arc<SqliteSparkStore>,
    completion: Arc<ScriptedCompletion>,
    embedding: Arc<ScriptedEmbedding>,
    clock: Arc<FixedClock>,
}

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 14, 12, 0, 0)
        .single()
        .expect("noon")
}

fn config() -> SparkConfig {
    SparkConfig::builder()
        .batch(BatchConfig {
            size: 7,
            max_attempts_per_slot: 3,
        })
        .topics(TopicsConfig {
            exploration_rate: 0.0,
            ..TopicsConfig::default()
        })
        .provider(ProviderConfig {
            embedding_dimensions: DIMENSIONS,
            base_backoff_ms: 1,
            max_backoff_ms: 2,
            ..ProviderConfig::default()
        })
        .build()
}

fn harness_with(
    store: Arc<SqliteSparkStore>,
    completion: ScriptedCompletion,
    embedding: ScriptedEmbedding,
    clock: Arc<FixedClock>,
) -> Harness {
    let completion = Arc::new(completion);
    let embedding = Arc::new(embedding);
    let service = SparkService::builder(config())
        .store(store.clone())
        .completion_backend(completion.clone())
        .embedding_backend(embedding.clone())
        .clock(clock.clone())
        .build()
        .expect("service");
    Harness {
        service,
        store,
        completion,
        embedding,
        clock,
    }
}

fn harness(completion: ScriptedCompletion, embedding: ScriptedEmbedding) -> Harness {
    harness_with(
        Arc::new(SqliteSparkStore::open_in_memory().expect("store")),
        completion,
        embedding,
        Arc::new(FixedClock::utc(noon())),
    )
}

fn prefs() -> Vec<String> {
    vec!["Science".to_string(), "History".to_string()]
}

async fn batch_count(harness: &Harness) -> usize {
    let window = harness.clock.today_window();
    harness
        .store
        .sparks_in_window("u1", window)
        .await
        .expect("list")
        .iter()
        .filter(|spark| !spark.is_recommendation)
        .count()
}

/// An empty day generates N sparks, each checked against all earlier ones.
#[tokio::test]
async fn first_call_generates_full_batch() {
    let harness = harness(ScriptedCompletion::new(), ScriptedEmbedding::new(DIMENSIONS));

    let outcome = harness
        .service
        .ensure_batch("u1", &prefs(), "likes trivia")
        .await
        .expect("ensure");
    let EnsureOutcome::Generated(report) = outcome else {
        panic!("expected generation, got {outcome:?}");
    };

    assert_eq!(report.existing, 0);
    assert!(!report.completed_elsewhere);
    let indices: Vec<u32> = report.slots.iter().map(|slot| slot.batch_index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5, 6, 7]);
    for (prior, slot) in report.slots.iter().enumerate() {
        assert_eq!(slot.attempts, 1);
        assert_eq!(slot.similarity_scores.len(), prior);
        assert!(slot.similarity_scores.iter().all(|score| *score < 0.85));
        assert!(prefs().contains(&slot.topic));
    }
    assert_eq!(harness.completion.calls(), 7);
    assert_eq!(batch_count(&harness).await, 7);
    assert!(harness.service.has_batch_for_today("u1").await);
    assert_eq!(harness.store.read_lock("u1").await.expect("lock"), None);
}

/// A complete day is detected without calling the provider again.
#[tokio::test]
async fn complete_day_is_not_regenerated() {
    let harness = harness(ScriptedCompletion::new(), ScriptedEmbedding::new(DIMENSIONS));
    harness
        .service
        .ensure_batch("u1", &prefs(), "")
        .await
        .expect("first");

    let outcome = harness
        .service
        .ensure_batch("u1", &prefs(), "")
        .await
        .expect("second");
    assert_eq!(outcome, EnsureOutcome::AlreadyComplete { count: 7 });
    assert_eq!(harness.completion.calls(), 7);
}

/// A 0.91 collision on slot 3 costs one extra attempt and then succeeds.
#[tokio::test]
async fn similar_candidate_is_regenerated_within_slot() {
    // Call 2 (slot 3, attempt 1) scores 0.91 against call 0 (slot 1).
    let residual = (1.0f32 - 0.91 * 0.91).sqrt();
    let mut similar = vec![0.0; DIMENSIONS];
    similar[0] = 0.91;
    similar[DIMENSIONS - 1] = residual;
    let embedding = ScriptedEmbedding::new(DIMENSIONS).with_override(2, Ok(similar));
    let harness = harness(ScriptedCompletion::new(), embedding);

    let EnsureOutcome::Generated(report) = harness
        .service
        .ensure_batch("u1", &prefs(), "")
        .await
        .expect("ensure")
    else {
        panic!("expected generation");
    };

    let attempts: Vec<u32> = report.slots.iter().map(|slot| slot.attempts).collect();
    assert_eq!(attempts, vec![1, 1, 2, 1, 1, 1, 1]);
    assert_eq!(report.total_attempts(), 8);
    assert_eq!(harness.completion.calls(), 8);
    assert_eq!(harness.embedding.calls(), 8);
    assert_eq!(batch_count(&harness).await, 7);

    let requests = harness.completion.requests();
    assert_ne!(requests[2].seed, requests[3].seed);
}

/// Three collisions in one slot fail the batch and release the lock.
#[tokio::test]
async fn exhausted_slot_fails_batch() {
    let embedding = ScriptedEmbedding::constant(vec![1.0; DIMENSIONS]);
    let harness = harness(ScriptedCompletion::new(), embedding);

    let err = harness
        .service
        .ensure_batch("u1", &prefs(), "")
        .await
        .expect_err("batch fails");
    match err {
        SparkCoreError::BatchGenerationFailed {
            batch_index,
            attempts,
            cause,
        } => {
            assert_eq!(batch_index, 2);
            assert_eq!(attempts, 3);
            assert!(matches!(
                *cause,
                SparkCoreError::Store(StoreError::TooSimilar { .. })
            ));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(batch_count(&harness).await, 1);
    assert_eq!(harness.store.read_lock("u1").await.expect("lock"), None);
    assert_eq!(
        harness.service.get_todays_spark("u1", &prefs(), "").await,
        None
    );
}

/// Provider contract violations abort immediately instead of retrying.
#[tokio::test]
async fn invalid_topic_aborts_batch() {
    let completion = ScriptedCompletion::with_responses(vec![Ok(candidate_json(
        "c", "d", "Cooking",
    ))]);
    let harness = harness(completion, ScriptedEmbedding::new(DIMENSIONS));

    let err = harness
        .service
        .ensure_batch("u1", &prefs(), "")
        .await
        .expect_err("batch fails");
    assert!(matches!(
        err,
        SparkCoreError::BatchGenerationFailed {
            batch_index: 1,
            attempts: 1,
            ..
        }
    ));
    assert_eq!(harness.completion.calls(), 1);
    assert_eq!(batch_count(&harness).await, 0);
}

/// Timeouts consume a slot attempt and are retried.
#[tokio::test]
async fn timeout_consumes_one_attempt() {
    let embedding = ScriptedEmbedding::new(DIMENSIONS)
        .with_override(0, Err(ProviderError::Timeout("slow".to_string())));
    let harness = harness(ScriptedCompletion::new(), embedding);

    let EnsureOutcome::Generated(report) = harness
        .service
        .ensure_batch("u1", &prefs(), "")
        .await
        .expect("ensure")
    else {
        panic!("expected generation");
    };
    assert_eq!(report.slots[0].attempts, 2);
    assert_eq!(report.slots.len(), 7);
}

/// A failed run leaves committed sparks; the next call fills the rest.
#[tokio::test]
async fn failed_batch_resumes_on_next_call() {
    let completion = ScriptedCompletion::with_responses(vec![
        Ok(candidate_json("first", "d1", "Science")),
        Ok(candidate_json("second", "d2", "History")),
        Err(ProviderError::Generation("provider outage".to_string())),
    ]);
    let harness = harness(completion, ScriptedEmbedding::new(DIMENSIONS));

    let err = harness
        .service
        .ensure_batch("u1", &prefs(), "")
        .await
        .expect_err("third slot fails");
    assert!(matches!(
        err,
        SparkCoreError::BatchGenerationFailed { batch_index: 3, .. }
    ));
    assert!(!harness.service.has_batch_for_today("u1").await);

    let EnsureOutcome::Generated(report) = harness
        .service
        .ensure_batch("u1", &prefs(), "")
        .await
        .expect("resume")
    else {
        panic!("expected generation");
    };
    assert_eq!(report.existing, 2);
    assert_eq!(report.slots.first().map(|slot| slot.batch_index), Some(3));
    assert_eq!(batch_count(&harness).await, 7);
}

/// A fresh lock held elsewhere blocks generation without provider calls.
#[tokio::test]
async fn held_lock_returns_lock_unavailable() {
    let harness = harness(ScriptedCompletion::new(), ScriptedEmbedding::new(DIMENSIONS));
    harness
        .store
        .swap_lock(
            "u1",
            None,
            LockRecord {
                acquired_at: noon() - Duration::minutes(4),
            },
        )
        .await
        .expect("seed lock");

    let err = harness
        .service
        .ensure_batch("u1", &prefs(), "")
        .await
        .expect_err("locked");
    assert!(matches!(err, SparkCoreError::LockUnavailable));
    assert_eq!(harness.completion.calls(), 0);
    assert_eq!(harness.embedding.calls(), 0);
}

/// An abandoned lock older than the staleness window is reclaimed.
#[tokio::test]
async fn stale_lock_is_reclaimed() {
    let harness = harness(ScriptedCompletion::new(), ScriptedEmbedding::new(DIMENSIONS));
    harness
        .store
        .swap_lock(
            "u1",
            None,
            LockRecord {
                acquired_at: noon() - Duration::minutes(6),
            },
        )
        .await
        .expect("seed lock");

    let outcome = harness
        .service
        .ensure_batch("u1", &prefs(), "")
        .await
        .expect("ensure");
    assert!(matches!(outcome, EnsureOutcome::Generated(_)));
    assert_eq!(batch_count(&harness).await, 7);
}

/// Two triggers racing on one store never produce more than N sparks.
#[tokio::test]
async fn concurrent_triggers_do_not_over_generate() {
    let store = Arc::new(SqliteSparkStore::open_in_memory().expect("store"));
    let clock = Arc::new(FixedClock::utc(noon()));
    let foreground = harness_with(
        store.clone(),
        ScriptedCompletion::new(),
        ScriptedEmbedding::new(DIMENSIONS),
        clock.clone(),
    );
    let background = harness_with(
        store.clone(),
        ScriptedCompletion::new(),
        ScriptedEmbedding::new(DIMENSIONS),
        clock,
    );

    let foreground_prefs = prefs();
    let background_prefs = prefs();
    let (first, second) = tokio::join!(
        foreground.service.ensure_batch("u1", &foreground_prefs, ""),
        background.service.ensure_batch("u1", &background_prefs, ""),
    );

    let generated = [&first, &second]
        .iter()
        .filter(|outcome| matches!(outcome, Ok(EnsureOutcome::Generated(_))))
        .count();
    assert_eq!(generated, 1);
    for outcome in [&first, &second] {
        assert!(matches!(
            outcome,
            Ok(_) | Err(SparkCoreError::LockUnavailable)
        ));
    }
    assert_eq!(batch_count(&foreground).await, 7);
    assert_eq!(
        foreground.completion.calls() + background.completion.calls(),
        7
    );
}

/// Separate connections to one database file (separate processes) still
/// respect the batch size.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn separate_connections_share_batch_limit() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("spark.db");
    let clock = Arc::new(FixedClock::utc(noon()));
    let first = harness_with(
        Arc::new(SqliteSparkStore::open(&path).expect("first store")),
        ScriptedCompletion::new(),
        ScriptedEmbedding::new(DIMENSIONS),
        clock.clone(),
    );
    let second = harness_with(
        Arc::new(SqliteSparkStore::open(&path).expect("second store")),
        ScriptedCompletion::new(),
        ScriptedEmbedding::new(DIMENSIONS),
        clock,
    );

    let a = {
        let service = first.service.clone();
        tokio::spawn(async move { service.ensure_batch("u1", &prefs(), "").await })
    };
    let b = {
        let service = second.service.clone();
        tokio::spawn(async move { service.ensure_batch("u1", &prefs(), "").await })
    };
    let a = a.await.expect("join a");
    let b = b.await.expect("join b");
    assert!(a.is_ok() || b.is_ok(), "a={a:?} b={b:?}");

    assert_eq!(batch_count(&first).await, 7);
    assert_eq!(batch_count(&second).await, 7);
}

/// The local day, not the UTC day, scopes the batch.
#[tokio::test]
async fn batches_follow_the_local_calendar_day() {
    let offset = FixedOffset::west_opt(5 * 3600).expect("offset");
    // 04:30 UTC is 23:30 local on the previous day.
    let late_evening = Utc
        .with_ymd_and_hms(2026, 4, 15, 4, 30, 0)
        .single()
        .expect("instant");
    let clock = Arc::new(FixedClock::new(late_evening, offset));
    let harness = harness_with(
        Arc::new(SqliteSparkStore::open_in_memory().expect("store")),
        ScriptedCompletion::new(),
        ScriptedEmbedding::new(DIMENSIONS),
        clock.clone(),
    );

    harness
        .service
        .ensure_batch("u1", &prefs(), "")
        .await
        .expect("evening batch");
    let window = clock.today_window();
    assert_eq!(window.start.to_rfc3339(), "2026-04-14T05:00:00+00:00");
    assert!(harness.service.has_batch_for_today("u1").await);

    clock.advance(Duration::hours(1));
    assert!(!harness.service.has_batch_for_today("u1").await);
    let EnsureOutcome::Generated(report) = harness
        .service
        .ensure_batch("u1", &prefs(), "")
        .await
        .expect("next day batch")
    else {
        panic!("expected generation");
    };
    assert_eq!(report.existing, 0);
    assert_eq!(report.slots[0].batch_index, 1);
    assert_eq!(report.slots[0].similarity_scores.len(), 7);
}

/// Empty topic preferences are rejected before any work.
#[tokio::test]
async fn empty_preferences_are_rejected() {
    let harness = harness(ScriptedCompletion::new(), ScriptedEmbedding::new(DIMENSIONS));
    let err = harness
        .service
        .ensure_batch("u1", &[], "")
        .await
        .expect_err("invalid");
    assert!(matches!(err, SparkCoreError::InvalidRequest(_)));
}
