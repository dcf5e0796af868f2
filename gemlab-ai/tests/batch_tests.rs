//! Batch orchestration across many gemstones

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{agreeing_fixtures, claim, fake_engine, init_test_logging, job, memory_store, record, test_config};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use gemlab_ai::analysis::types::ImageCategory;
use gemlab_ai::config::{BatchConfig, ImageFailurePolicy};
use gemlab_ai::{AnalysisStore, BatchOrchestrator};

#[tokio::test]
async fn test_batch_separates_outcomes() {
    init_test_logging();
    let store = memory_store().await;
    let config = test_config(ImageFailurePolicy::Abort);
    let fixtures = agreeing_fixtures()
        .image(
            "weak",
            ImageCategory::Label,
            record("weak", "label", vec![claim("cut", json!("oval"), None, 0.4)]),
        )
        .failing_image("broken");
    let (engine, _) = fake_engine(fixtures, store.clone(), &config);

    let orchestrator = BatchOrchestrator::new(
        Arc::new(engine),
        BatchConfig {
            concurrency: 2,
            batch_size: 2,
            inter_batch_pause_ms: 10,
        },
    );

    let jobs = vec![
        job("gem-ok", &["scale", "tag"]),
        job("gem-review", &["weak"]),
        job("gem-failed", &["scale", "broken"]),
        job("gem-empty", &[]),
        job("gem-ok-2", &["scale"]),
    ];
    let summary = orchestrator.run(jobs, &CancellationToken::new()).await;

    assert_eq!(summary.analyzed, vec!["gem-ok", "gem-ok-2"]);
    assert_eq!(summary.needs_review, vec!["gem-review"]);
    let failed: Vec<&str> = summary.failed.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(failed, vec!["gem-empty", "gem-failed"]);
    assert!(summary.skipped.is_empty());
    assert_eq!(summary.total(), 5);

    assert!(store.is_analyzed("gem-ok").await.unwrap());
    assert!(store.is_analyzed("gem-review").await.unwrap());
    assert!(!store.is_analyzed("gem-failed").await.unwrap());
}

#[tokio::test]
async fn test_cancelled_batch_skips_remaining_gemstones() {
    let store = memory_store().await;
    let config = test_config(ImageFailurePolicy::Abort);
    let (engine, calls) = fake_engine(agreeing_fixtures(), store.clone(), &config);

    let orchestrator = BatchOrchestrator::new(
        Arc::new(engine),
        BatchConfig {
            concurrency: 1,
            batch_size: 1,
            inter_batch_pause_ms: 60_000,
        },
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let jobs = vec![
        job("gem-1", &["scale"]),
        job("gem-2", &["scale"]),
        job("gem-3", &["scale"]),
    ];
    let summary = tokio::time::timeout(Duration::from_secs(5), orchestrator.run(jobs, &cancel))
        .await
        .unwrap();

    // The long pause after the first batch is interrupted by cancellation
    assert_eq!(summary.analyzed, vec!["gem-1"]);
    assert_eq!(summary.skipped, vec!["gem-2", "gem-3"]);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(!store.is_analyzed("gem-2").await.unwrap());
}

#[tokio::test]
async fn test_cancel_in_flight_follows_image_failure_policy() {
    let cancel_after = |cancel: &CancellationToken| {
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
    };
    let batch = BatchConfig {
        concurrency: 1,
        batch_size: 10,
        inter_batch_pause_ms: 10,
    };

    // skip_image: the finished image is still fused and persisted
    let store = memory_store().await;
    let mut config = test_config(ImageFailurePolicy::SkipImage);
    config.pipeline.service_timeout_ms = 60_000;
    let (engine, _) = fake_engine(agreeing_fixtures().hanging_image("slow"), store.clone(), &config);
    let cancel = CancellationToken::new();
    cancel_after(&cancel);
    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        BatchOrchestrator::new(Arc::new(engine), batch.clone())
            .run(vec![job("gem-partial", &["scale", "slow"])], &cancel),
    )
    .await
    .unwrap();
    assert_eq!(summary.needs_review, vec!["gem-partial"]);
    assert!(summary.failed.is_empty());
    assert!(store.is_analyzed("gem-partial").await.unwrap());

    // abort: the same gemstone fails and stays unanalyzed
    let store = memory_store().await;
    let mut config = test_config(ImageFailurePolicy::Abort);
    config.pipeline.service_timeout_ms = 60_000;
    let (engine, _) = fake_engine(agreeing_fixtures().hanging_image("slow"), store.clone(), &config);
    let cancel = CancellationToken::new();
    cancel_after(&cancel);
    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        BatchOrchestrator::new(Arc::new(engine), batch)
            .run(vec![job("gem-partial", &["scale", "slow"])], &cancel),
    )
    .await
    .unwrap();
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.needs_review.is_empty());
    assert!(!store.is_analyzed("gem-partial").await.unwrap());
}

#[tokio::test]
async fn test_empty_job_list() {
    let store = memory_store().await;
    let config = test_config(ImageFailurePolicy::Abort);
    let (engine, _) = fake_engine(agreeing_fixtures(), store, &config);

    let summary = BatchOrchestrator::new(Arc::new(engine), config.batch.clone())
        .run(Vec::new(), &CancellationToken::new())
        .await;
    assert_eq!(summary.total(), 0);
}
