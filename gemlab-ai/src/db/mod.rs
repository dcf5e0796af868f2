//! Database access for gemlab-ai
//!
//! One SQLite file holds the gemstone status table, per-image extractions and
//! the fused results. Tables are created on first connect.

use gemlab_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Initialize database connection pool
///
/// Creates the parent directory and the database file when missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    tracing::debug!("Connecting to database: {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(250));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    create_tables(&pool).await?;

    Ok(pool)
}

/// Create analysis tables if they don't exist
pub async fn create_tables(pool: &SqlitePool) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gemstones (
            gemstone_id TEXT PRIMARY KEY,
            analyzed INTEGER NOT NULL DEFAULT 0,
            analyzed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS image_extractions (
            gemstone_id TEXT NOT NULL,
            image_id TEXT NOT NULL,
            image_type TEXT NOT NULL,
            category TEXT NOT NULL,
            classification_confidence REAL NOT NULL,
            claims TEXT NOT NULL DEFAULT '[]',
            raw_response TEXT,
            model_version TEXT,
            processing_cost REAL,
            processing_time_ms INTEGER,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (gemstone_id, image_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fusion_results (
            gemstone_id TEXT PRIMARY KEY,
            images TEXT NOT NULL,
            final_values TEXT NOT NULL,
            confidences TEXT NOT NULL,
            overall_confidence REAL NOT NULL,
            provenance TEXT NOT NULL,
            conflicts TEXT NOT NULL,
            needs_review INTEGER NOT NULL,
            analysis_version TEXT NOT NULL,
            result_json TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (gemstones, image_extractions, fusion_results)");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_creates_file_and_tables() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nested").join("gemlab.db");

        let pool = init_database_pool(&db_path).await.unwrap();
        assert!(db_path.exists());

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert!(names.contains(&"gemstones"));
        assert!(names.contains(&"image_extractions"));
        assert!(names.contains(&"fusion_results"));
    }

    #[tokio::test]
    async fn test_create_tables_is_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        create_tables(&pool).await.unwrap();
        create_tables(&pool).await.unwrap();
    }
}
