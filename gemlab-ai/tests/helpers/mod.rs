//! Test Helper Utilities
//!
//! Fake Tier 1 adapters, stores and fixture builders shared by the
//! gemlab-ai integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;

use gemlab_ai::analysis::tier1::{ClaimExtractor, ExtractorSet, ImageClassifier, ImageFetcher};
use gemlab_ai::analysis::types::{
    Classification, ExtractorOutput, FusionResult, GemstoneJob, ImageCategory,
    ImageExtractionRecord, ImagePayload, ImageRef,
};
use gemlab_ai::config::{AnalysisConfig, ImageFailurePolicy};
use gemlab_ai::{AnalysisStore, GemstoneWorkflowEngine, SqliteAnalysisStore, ServiceError, StoreError};

/// PNG signature, enough for content sniffing
pub const PNG_BYTES: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

/// Route tracing output through the test harness (RUST_LOG to adjust)
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Fixture builders
// ============================================================================

pub fn claim(attribute: &str, raw_value: Value, unit: Option<&str>, confidence: f64) -> Value {
    json!({
        "attribute": attribute,
        "raw_value": raw_value,
        "unit": unit,
        "confidence": confidence,
    })
}

pub fn record(image_id: &str, image_type: &str, claims: Vec<Value>) -> Value {
    json!({
        "image_id": image_id,
        "image_type": image_type,
        "claims": claims,
    })
}

pub fn job(gemstone_id: &str, image_ids: &[&str]) -> GemstoneJob {
    GemstoneJob {
        gemstone_id: gemstone_id.to_string(),
        images: image_ids
            .iter()
            .map(|id| ImageRef::bytes(*id, PNG_BYTES.to_vec()))
            .collect(),
    }
}

/// Config with a short service timeout
pub fn test_config(policy: ImageFailurePolicy) -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.pipeline.service_timeout_ms = 200;
    config.pipeline.image_failure_policy = policy;
    config.batch.inter_batch_pause_ms = 10;
    config.fusion.analysis_version = "test".to_string();
    config
}

/// What the fake service answers for each image
#[derive(Debug, Clone, Default)]
pub struct Fixtures {
    categories: HashMap<String, ImageCategory>,
    records: HashMap<String, Value>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
}

impl Fixtures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image(mut self, image_id: &str, category: ImageCategory, record: Value) -> Self {
        self.categories.insert(image_id.to_string(), category);
        self.records.insert(image_id.to_string(), record);
        self
    }

    /// Image classified `unknown`
    pub fn unknown_image(mut self, image_id: &str) -> Self {
        self.categories.insert(image_id.to_string(), ImageCategory::Unknown);
        self
    }

    /// Fetch fails with a network error
    pub fn failing_image(mut self, image_id: &str) -> Self {
        self.failing.insert(image_id.to_string());
        self
    }

    /// Classification never answers
    pub fn hanging_image(mut self, image_id: &str) -> Self {
        self.categories.insert(image_id.to_string(), ImageCategory::Instrument);
        self.hanging.insert(image_id.to_string());
        self
    }
}

// ============================================================================
// Fake adapters
// ============================================================================

pub struct FakeFetcher {
    fixtures: Arc<Fixtures>,
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, image: &ImageRef) -> Result<ImagePayload, ServiceError> {
        if self.fixtures.failing.contains(&image.image_id) {
            return Err(ServiceError::Network(format!("connection reset fetching {}", image.image_id)));
        }
        Ok(ImagePayload {
            image_id: image.image_id.clone(),
            bytes: PNG_BYTES.to_vec(),
            mime_type: "image/png".to_string(),
        })
    }
}

pub struct FakeClassifier {
    fixtures: Arc<Fixtures>,
}

#[async_trait]
impl ImageClassifier for FakeClassifier {
    async fn classify(&self, image: &ImagePayload) -> Result<Classification, ServiceError> {
        if self.fixtures.hanging.contains(&image.image_id) {
            return std::future::pending().await;
        }
        let category = self
            .fixtures
            .categories
            .get(&image.image_id)
            .copied()
            .unwrap_or(ImageCategory::Unknown);
        Ok(Classification {
            category,
            confidence: 0.95,
        })
    }
}

pub struct FakeExtractor {
    fixtures: Arc<Fixtures>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ClaimExtractor for FakeExtractor {
    async fn extract(&self, image: &ImagePayload) -> Result<ExtractorOutput, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let record = self
            .fixtures
            .records
            .get(&image.image_id)
            .cloned()
            .unwrap_or_else(|| record(&image.image_id, "label", vec![]));
        Ok(ExtractorOutput {
            raw_response: Some(json!({ "extraction": record.clone() })),
            record,
            model_version: Some("fake-vision".to_string()),
            processing_cost: Some(0.001),
        })
    }
}

/// Engine over fake adapters; the returned counter tracks extractor calls
pub fn fake_engine(
    fixtures: Fixtures,
    store: Arc<dyn AnalysisStore>,
    config: &AnalysisConfig,
) -> (GemstoneWorkflowEngine, Arc<AtomicUsize>) {
    let fixtures = Arc::new(fixtures);
    let calls = Arc::new(AtomicUsize::new(0));
    let extractor: Arc<dyn ClaimExtractor> = Arc::new(FakeExtractor {
        fixtures: fixtures.clone(),
        calls: calls.clone(),
    });

    let engine = GemstoneWorkflowEngine::new(
        Arc::new(FakeFetcher {
            fixtures: fixtures.clone(),
        }),
        Arc::new(FakeClassifier { fixtures }),
        ExtractorSet {
            instrument: extractor.clone(),
            label: extractor.clone(),
            gem_macro: extractor,
        },
        store,
        config,
    );
    (engine, calls)
}

// ============================================================================
// Stores
// ============================================================================

/// SQLite store on a private in-memory database
pub async fn memory_store() -> Arc<SqliteAnalysisStore> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    gemlab_ai::db::create_tables(&pool).await.unwrap();
    Arc::new(SqliteAnalysisStore::new(pool, 1000))
}

/// Store whose fused-result write always fails
pub struct FailingStore {
    pub inner: Arc<SqliteAnalysisStore>,
}

#[async_trait]
impl AnalysisStore for FailingStore {
    async fn save_image_extraction(&self, record: &ImageExtractionRecord) -> Result<(), StoreError> {
        self.inner.save_image_extraction(record).await
    }

    async fn retain_image_extractions(&self, gemstone_id: &str, image_ids: &[String]) -> Result<u64, StoreError> {
        self.inner.retain_image_extractions(gemstone_id, image_ids).await
    }

    async fn save_fusion_result(&self, _result: &FusionResult) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk full".to_string()))
    }

    async fn mark_analyzed(&self, gemstone_id: &str) -> Result<(), StoreError> {
        self.inner.mark_analyzed(gemstone_id).await
    }

    async fn load_image_extractions(&self, gemstone_id: &str) -> Result<Vec<ImageExtractionRecord>, StoreError> {
        self.inner.load_image_extractions(gemstone_id).await
    }

    async fn load_fusion_result(&self, gemstone_id: &str) -> Result<Option<FusionResult>, StoreError> {
        self.inner.load_fusion_result(gemstone_id).await
    }

    async fn is_analyzed(&self, gemstone_id: &str) -> Result<bool, StoreError> {
        self.inner.is_analyzed(gemstone_id).await
    }
}

// ============================================================================
// Common gemstone fixtures
// ============================================================================

/// Three images agreeing on weight 2.48 ct apart from a weak visual estimate
pub fn agreeing_fixtures() -> Fixtures {
    Fixtures::new()
        .image(
            "scale",
            ImageCategory::Instrument,
            record("scale", "instrument", vec![claim("weight", json!("2.48"), Some("ct"), 0.9)]),
        )
        .image(
            "tag",
            ImageCategory::Label,
            record(
                "tag",
                "label",
                vec![
                    claim("weight", json!("2,48 ct"), None, 0.85),
                    claim("shape", json!("Oval Mixed Cut"), None, 0.9),
                ],
            ),
        )
        .image(
            "macro",
            ImageCategory::GemMacro,
            record(
                "macro",
                "gem_macro",
                vec![
                    claim("weight", json!(2.40), Some("ct"), 0.5),
                    claim("cut", json!("oval"), None, 0.7),
                ],
            ),
        )
}
