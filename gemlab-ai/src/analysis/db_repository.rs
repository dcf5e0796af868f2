// Database repository for analysis results
//
// Persists per-image extractions and fused results and tracks which
// gemstones are analyzed. Every write is an upsert keyed by gemstone id
// (and image id), so a rerun overwrites the previous run. Image rows the
// latest run did not produce are pruned so stored extractions always match
// the latest fused record.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::analysis::schema::parse_normalized_claims;
use crate::analysis::types::{FusionResult, ImageCategory, ImageExtractionRecord};
use crate::error::{ContractError, StoreError};
use crate::utils::retry_on_lock;

/// Persistence interface used by the workflow engine
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn save_image_extraction(&self, record: &ImageExtractionRecord) -> Result<(), StoreError>;

    /// Delete stored extractions of `gemstone_id` whose image is not in
    /// `image_ids`; returns the number of rows removed
    async fn retain_image_extractions(&self, gemstone_id: &str, image_ids: &[String]) -> Result<u64, StoreError>;

    async fn save_fusion_result(&self, result: &FusionResult) -> Result<(), StoreError>;

    async fn mark_analyzed(&self, gemstone_id: &str) -> Result<(), StoreError>;

    /// Stored extractions ordered by image id
    async fn load_image_extractions(&self, gemstone_id: &str) -> Result<Vec<ImageExtractionRecord>, StoreError>;

    async fn load_fusion_result(&self, gemstone_id: &str) -> Result<Option<FusionResult>, StoreError>;

    async fn is_analyzed(&self, gemstone_id: &str) -> Result<bool, StoreError>;
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteAnalysisStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteAnalysisStore {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn now_string() -> String {
    gemlab_common::time::to_storage_string(&gemlab_common::time::now())
}

fn corrupt(gemstone_id: &str, detail: String) -> StoreError {
    StoreError::Corrupt(ContractError::InvalidExtractionShape(format!(
        "stored record for {}: {}",
        gemstone_id, detail
    )))
}

#[async_trait]
impl AnalysisStore for SqliteAnalysisStore {
    async fn save_image_extraction(&self, record: &ImageExtractionRecord) -> Result<(), StoreError> {
        // Serialize before touching the database
        let claims = serde_json::to_string(&record.claims)?;
        let raw_response = record
            .raw_response
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let processing_time_ms = record.processing_time_ms.map(|ms| ms as i64);
        let updated_at = now_string();

        retry_on_lock("save_image_extraction", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO image_extractions (
                    gemstone_id, image_id, image_type, category,
                    classification_confidence, claims, raw_response,
                    model_version, processing_cost, processing_time_ms, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(gemstone_id, image_id) DO UPDATE SET
                    image_type = excluded.image_type,
                    category = excluded.category,
                    classification_confidence = excluded.classification_confidence,
                    claims = excluded.claims,
                    raw_response = excluded.raw_response,
                    model_version = excluded.model_version,
                    processing_cost = excluded.processing_cost,
                    processing_time_ms = excluded.processing_time_ms,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&record.gemstone_id)
            .bind(&record.image_id)
            .bind(&record.image_type)
            .bind(record.category.as_str())
            .bind(record.classification_confidence)
            .bind(&claims)
            .bind(&raw_response)
            .bind(&record.model_version)
            .bind(record.processing_cost)
            .bind(processing_time_ms)
            .bind(&updated_at)
            .execute(&self.pool)
            .await?;

            Ok(())
        })
        .await?;

        debug!(
            gemstone_id = %record.gemstone_id,
            image_id = %record.image_id,
            claims = record.claims.len(),
            "Saved image extraction"
        );
        Ok(())
    }

    async fn retain_image_extractions(&self, gemstone_id: &str, image_ids: &[String]) -> Result<u64, StoreError> {
        let sql = if image_ids.is_empty() {
            "DELETE FROM image_extractions WHERE gemstone_id = ?".to_string()
        } else {
            let placeholders = vec!["?"; image_ids.len()].join(", ");
            format!(
                "DELETE FROM image_extractions WHERE gemstone_id = ? AND image_id NOT IN ({})",
                placeholders
            )
        };

        let removed = retry_on_lock("retain_image_extractions", self.max_lock_wait_ms, || async {
            let mut query = sqlx::query(&sql).bind(gemstone_id);
            for image_id in image_ids {
                query = query.bind(image_id);
            }
            let outcome = query.execute(&self.pool).await?;
            Ok(outcome.rows_affected())
        })
        .await?;

        if removed > 0 {
            debug!(gemstone_id, removed, "Pruned stale image extractions");
        }
        Ok(removed)
    }

    async fn save_fusion_result(&self, result: &FusionResult) -> Result<(), StoreError> {
        let images = serde_json::to_string(&result.images)?;
        let final_values = serde_json::to_string(&result.final_values())?;
        let confidences = serde_json::to_string(&result.confidences())?;
        let provenance = serde_json::to_string(&result.provenance())?;
        let conflicts = serde_json::to_string(result.conflicts())?;
        let result_json = serde_json::to_string(result)?;
        let updated_at = now_string();

        retry_on_lock("save_fusion_result", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO fusion_results (
                    gemstone_id, images, final_values, confidences,
                    overall_confidence, provenance, conflicts, needs_review,
                    analysis_version, result_json, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(gemstone_id) DO UPDATE SET
                    images = excluded.images,
                    final_values = excluded.final_values,
                    confidences = excluded.confidences,
                    overall_confidence = excluded.overall_confidence,
                    provenance = excluded.provenance,
                    conflicts = excluded.conflicts,
                    needs_review = excluded.needs_review,
                    analysis_version = excluded.analysis_version,
                    result_json = excluded.result_json,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&result.gemstone_id)
            .bind(&images)
            .bind(&final_values)
            .bind(&confidences)
            .bind(result.overall_confidence)
            .bind(&provenance)
            .bind(&conflicts)
            .bind(result.needs_review())
            .bind(&result.analysis_version)
            .bind(&result_json)
            .bind(&updated_at)
            .execute(&self.pool)
            .await?;

            Ok(())
        })
        .await?;

        info!(
            gemstone_id = %result.gemstone_id,
            needs_review = result.needs_review(),
            "Saved fusion result"
        );
        Ok(())
    }

    async fn mark_analyzed(&self, gemstone_id: &str) -> Result<(), StoreError> {
        let analyzed_at = now_string();

        retry_on_lock("mark_analyzed", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO gemstones (gemstone_id, analyzed, analyzed_at)
                VALUES (?, 1, ?)
                ON CONFLICT(gemstone_id) DO UPDATE SET
                    analyzed = 1,
                    analyzed_at = excluded.analyzed_at
                "#,
            )
            .bind(gemstone_id)
            .bind(&analyzed_at)
            .execute(&self.pool)
            .await?;

            Ok(())
        })
        .await
    }

    async fn load_image_extractions(&self, gemstone_id: &str) -> Result<Vec<ImageExtractionRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT image_id, image_type, category, classification_confidence,
                   claims, raw_response, model_version, processing_cost,
                   processing_time_ms
            FROM image_extractions
            WHERE gemstone_id = ?
            ORDER BY image_id
            "#,
        )
        .bind(gemstone_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<ImageExtractionRecord, StoreError> {
                let image_id: String = row.get("image_id");

                let category: String = row.get("category");
                let category: ImageCategory = category
                    .parse()
                    .map_err(|e: String| corrupt(gemstone_id, format!("image {}: {}", image_id, e)))?;

                let claims: String = row.get("claims");
                let claims: serde_json::Value = serde_json::from_str(&claims)?;
                let claims = parse_normalized_claims(&claims)?;

                let raw_response: Option<String> = row.get("raw_response");
                let raw_response = raw_response
                    .map(|text| serde_json::from_str(&text))
                    .transpose()?;

                let processing_time_ms: Option<i64> = row.get("processing_time_ms");

                Ok(ImageExtractionRecord {
                    gemstone_id: gemstone_id.to_string(),
                    image_id,
                    image_type: row.get("image_type"),
                    category,
                    classification_confidence: row.get("classification_confidence"),
                    claims,
                    raw_response,
                    model_version: row.get("model_version"),
                    processing_cost: row.get("processing_cost"),
                    processing_time_ms: processing_time_ms.map(|ms| ms.max(0) as u64),
                })
            })
            .collect()
    }

    async fn load_fusion_result(&self, gemstone_id: &str) -> Result<Option<FusionResult>, StoreError> {
        let result_json: Option<String> =
            sqlx::query_scalar("SELECT result_json FROM fusion_results WHERE gemstone_id = ?")
                .bind(gemstone_id)
                .fetch_optional(&self.pool)
                .await?;

        match result_json {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn is_analyzed(&self, gemstone_id: &str) -> Result<bool, StoreError> {
        let analyzed: Option<i64> =
            sqlx::query_scalar("SELECT analyzed FROM gemstones WHERE gemstone_id = ?")
                .bind(gemstone_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(analyzed.unwrap_or(0) != 0)
    }
}
