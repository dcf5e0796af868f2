//! Persistence against a file-backed SQLite database

mod helpers;

use std::sync::Arc;

use helpers::{agreeing_fixtures, fake_engine, job, test_config};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use gemlab_ai::config::ImageFailurePolicy;
use gemlab_ai::db::init_database_pool;
use gemlab_ai::{AnalysisStore, SqliteAnalysisStore};

#[tokio::test]
async fn test_results_survive_reopening_the_database() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("gemlab.db");
    let config = test_config(ImageFailurePolicy::Abort);

    let expected = {
        let pool = init_database_pool(&db_path).await.unwrap();
        let store = Arc::new(SqliteAnalysisStore::new(pool.clone(), 1000));
        let (engine, _) = fake_engine(agreeing_fixtures(), store, &config);
        let result = engine
            .analyze(&job("gem-1", &["scale", "tag", "macro"]), &CancellationToken::new())
            .await
            .unwrap();
        pool.close().await;
        result
    };

    let pool = init_database_pool(&db_path).await.unwrap();
    let store = SqliteAnalysisStore::new(pool, 1000);
    assert!(store.is_analyzed("gem-1").await.unwrap());
    assert_eq!(store.load_fusion_result("gem-1").await.unwrap().unwrap(), expected);
    assert_eq!(store.load_image_extractions("gem-1").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_fused_row_columns_mirror_result() {
    let dir = TempDir::new().unwrap();
    let pool = init_database_pool(&dir.path().join("gemlab.db")).await.unwrap();
    let store = Arc::new(SqliteAnalysisStore::new(pool.clone(), 1000));
    let config = test_config(ImageFailurePolicy::Abort);
    let (engine, _) = fake_engine(agreeing_fixtures(), store, &config);

    engine
        .analyze(&job("gem-1", &["scale", "tag"]), &CancellationToken::new())
        .await
        .unwrap();

    let (final_values, conflicts, needs_review, version): (String, String, bool, String) = sqlx::query_as(
        "SELECT final_values, conflicts, needs_review, analysis_version FROM fusion_results WHERE gemstone_id = ?",
    )
    .bind("gem-1")
    .fetch_one(&pool)
    .await
    .unwrap();

    let final_values: serde_json::Value = serde_json::from_str(&final_values).unwrap();
    assert_eq!(final_values["weight"], serde_json::json!(2.48));
    assert_eq!(final_values["cut"], serde_json::json!("oval"));
    assert_eq!(conflicts, "[]");
    assert!(!needs_review);
    assert_eq!(version, "test");
}

#[tokio::test]
async fn test_concurrent_writers_on_one_file() {
    let dir = TempDir::new().unwrap();
    let pool = init_database_pool(&dir.path().join("gemlab.db")).await.unwrap();
    let store = Arc::new(SqliteAnalysisStore::new(pool, 5000));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move { store.mark_analyzed(&format!("gem-{}", i)).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for i in 0..8 {
        assert!(store.is_analyzed(&format!("gem-{}", i)).await.unwrap());
    }
}
