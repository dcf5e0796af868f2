// Per-Gemstone Workflow Engine
//
// Orchestrates one gemstone through the three tiers:
// 1. Tier 1: fetch, classify and extract each image in turn
// 2. Tier 2: normalize claims and fuse them into one result
// 3. Tier 3: conflict flags and image coverage (inside fusion)
// 4. Persist per-image extractions, the fused result, then mark analyzed
//
// Images are processed sequentially. Every external call carries a hard
// timeout and observes the caller's cancellation token. A run that returns an
// error never marks the gemstone analyzed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::analysis::db_repository::AnalysisStore;
use crate::analysis::schema::{check_confidence, parse_raw_extraction, validate_fusion_result};
use crate::analysis::tier1::{
    ExtractorSet, HttpImageFetcher, ImageClassifier, ImageFetcher, VisionClassifier, VisionClient,
};
use crate::analysis::tier2::{ClaimNormalizer, FusionEngine};
use crate::analysis::tier3::CoverageScorer;
use crate::analysis::types::{
    AnalysisEvent, FusionResult, GemstoneJob, ImageCategory, ImageExtractionRecord, ImageRef,
    NormalizedClaim,
};
use crate::config::{resolve_vision_api_key, AnalysisConfig, ImageFailurePolicy, PipelineConfig};
use crate::error::{AnalysisError, AnalysisResult, ContractError, ServiceError};

/// In-process mutual exclusion per gemstone id
///
/// Two runs for the same gemstone never interleave; runs for different
/// gemstones proceed independently.
#[derive(Clone, Default)]
pub struct GemstoneLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl GemstoneLocks {
    pub async fn acquire(&self, gemstone_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            // Drop entries nobody holds or waits on
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(gemstone_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Per-gemstone workflow engine
pub struct GemstoneWorkflowEngine {
    fetcher: Arc<dyn ImageFetcher>,
    classifier: Arc<dyn ImageClassifier>,
    extractors: ExtractorSet,
    normalizer: ClaimNormalizer,
    fusion: FusionEngine,
    coverage: CoverageScorer,
    store: Arc<dyn AnalysisStore>,
    pipeline: PipelineConfig,
    event_tx: Option<broadcast::Sender<AnalysisEvent>>,
    locks: GemstoneLocks,
}

impl GemstoneWorkflowEngine {
    /// Engine over injected adapters
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        classifier: Arc<dyn ImageClassifier>,
        extractors: ExtractorSet,
        store: Arc<dyn AnalysisStore>,
        config: &AnalysisConfig,
    ) -> Self {
        Self {
            fetcher,
            classifier,
            extractors,
            normalizer: ClaimNormalizer::from_config(&config.normalizer),
            fusion: FusionEngine::new(config.fusion.clone()),
            coverage: CoverageScorer,
            store,
            pipeline: config.pipeline.clone(),
            event_tx: None,
            locks: GemstoneLocks::default(),
        }
    }

    /// Engine backed by the HTTP vision service
    pub fn with_vision_service(config: &AnalysisConfig, store: Arc<dyn AnalysisStore>) -> Result<Self, ServiceError> {
        let timeout = config.pipeline.service_timeout();
        let client = Arc::new(VisionClient::new(
            &config.vision,
            resolve_vision_api_key(&config.vision),
            timeout,
        )?);
        let fetcher = HttpImageFetcher::new(timeout, config.pipeline.max_image_bytes)?;

        info!(
            model = client.model(),
            base_url = %config.vision.base_url,
            "Vision service adapters initialized"
        );

        Ok(Self::new(
            Arc::new(fetcher),
            Arc::new(VisionClassifier::new(client.clone())),
            ExtractorSet::vision(client),
            store,
            config,
        ))
    }

    /// Broadcast progress events on `event_tx`
    pub fn with_events(mut self, event_tx: broadcast::Sender<AnalysisEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn store(&self) -> &Arc<dyn AnalysisStore> {
        &self.store
    }

    fn emit_event(&self, event: AnalysisEvent) {
        if let Some(tx) = &self.event_tx {
            // No subscribers is fine
            let _ = tx.send(event);
        }
    }

    /// Run the full pipeline for one gemstone
    ///
    /// On success the fused result is persisted and the gemstone is marked
    /// analyzed (possibly with `needs_review`). On error nothing marks it
    /// analyzed and the run can be retried.
    pub async fn analyze(&self, job: &GemstoneJob, cancel: &CancellationToken) -> AnalysisResult<FusionResult> {
        let _guard = self.locks.acquire(&job.gemstone_id).await;
        let start_time = Instant::now();

        info!(
            gemstone_id = %job.gemstone_id,
            images = job.images.len(),
            "Starting gemstone analysis"
        );
        self.emit_event(AnalysisEvent::GemstoneStarted {
            gemstone_id: job.gemstone_id.clone(),
            image_count: job.images.len(),
        });

        let outcome = self.run_pipeline(job, cancel).await;
        self.finish(&job.gemstone_id, outcome, start_time)
    }

    /// Re-fuse the stored per-image extractions without calling the
    /// inference service, then overwrite the fused record
    pub async fn refuse_from_store(&self, gemstone_id: &str) -> AnalysisResult<FusionResult> {
        let _guard = self.locks.acquire(gemstone_id).await;
        let start_time = Instant::now();

        let outcome = self.refuse_stored(gemstone_id).await;
        self.finish(gemstone_id, outcome, start_time)
    }

    fn finish(
        &self,
        gemstone_id: &str,
        outcome: AnalysisResult<FusionResult>,
        start_time: Instant,
    ) -> AnalysisResult<FusionResult> {
        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        match &outcome {
            Ok(result) => {
                info!(
                    gemstone_id,
                    elapsed_ms,
                    needs_review = result.needs_review(),
                    "Gemstone analyzed"
                );
                self.emit_event(AnalysisEvent::GemstoneAnalyzed {
                    gemstone_id: gemstone_id.to_string(),
                    needs_review: result.needs_review(),
                });
            }
            Err(e) => {
                error!(gemstone_id, elapsed_ms, error = %e, "Gemstone analysis failed");
                self.emit_event(AnalysisEvent::GemstoneFailed {
                    gemstone_id: gemstone_id.to_string(),
                    error: e.to_string(),
                });
            }
        }
        outcome
    }

    async fn run_pipeline(&self, job: &GemstoneJob, cancel: &CancellationToken) -> AnalysisResult<FusionResult> {
        if job.images.is_empty() {
            return Err(AnalysisError::NoImages(job.gemstone_id.clone()));
        }

        // Phase 1: Tier 1 extraction + normalization, one image at a time
        let mut records = Vec::with_capacity(job.images.len());
        let mut failed_images = Vec::new();

        for image in &job.images {
            match self.process_image(&job.gemstone_id, image, cancel).await {
                Ok(record) => {
                    self.emit_event(AnalysisEvent::ImageProcessed {
                        gemstone_id: job.gemstone_id.clone(),
                        image_id: record.image_id.clone(),
                        category: record.category,
                        claim_count: record.claims.len(),
                    });
                    records.push(record);
                }
                Err(AnalysisError::Service { image_id, source }) => {
                    self.emit_event(AnalysisEvent::ImageFailed {
                        gemstone_id: job.gemstone_id.clone(),
                        image_id: image_id.clone(),
                        error: source.to_string(),
                    });

                    match self.pipeline.image_failure_policy {
                        ImageFailurePolicy::Abort => {
                            return Err(AnalysisError::Service { image_id, source });
                        }
                        ImageFailurePolicy::SkipImage => {
                            warn!(
                                gemstone_id = %job.gemstone_id,
                                image_id = %image_id,
                                error = %source,
                                "Skipping failed image"
                            );
                            failed_images.push(image_id);
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if records.is_empty() {
            return Err(AnalysisError::NoUsableImages {
                gemstone_id: job.gemstone_id.clone(),
                failed: failed_images.len(),
            });
        }

        // Phase 2: Tier 2/3 fusion
        let coverage = self.coverage.image_coverage(job.images.len(), failed_images);
        let result = self.fuse_records(&job.gemstone_id, &records, coverage)?;

        // Phase 3: persistence, analyzed flag last
        for record in &records {
            self.store.save_image_extraction(record).await?;
        }
        // Rows from earlier runs for images this run did not fuse
        self.store
            .retain_image_extractions(&job.gemstone_id, &result.images)
            .await?;
        self.store.save_fusion_result(&result).await?;
        self.store.mark_analyzed(&job.gemstone_id).await?;

        Ok(result)
    }

    async fn refuse_stored(&self, gemstone_id: &str) -> AnalysisResult<FusionResult> {
        let mut records = self.store.load_image_extractions(gemstone_id).await?;

        // Only the images the last fused record was built from; failed images
        // were never stored, so its coverage still applies
        let coverage = match self.store.load_fusion_result(gemstone_id).await? {
            Some(previous) => {
                records.retain(|r| previous.images.contains(&r.image_id));
                previous.coverage().clone()
            }
            None => self.coverage.image_coverage(records.len(), Vec::new()),
        };

        if records.is_empty() {
            return Err(AnalysisError::NoImages(gemstone_id.to_string()));
        }

        info!(gemstone_id, images = records.len(), "Re-fusing stored extractions");

        let result = self.fuse_records(gemstone_id, &records, coverage)?;
        self.store.save_fusion_result(&result).await?;
        self.store.mark_analyzed(gemstone_id).await?;

        Ok(result)
    }

    fn fuse_records(
        &self,
        gemstone_id: &str,
        records: &[ImageExtractionRecord],
        coverage: crate::analysis::types::ImageCoverage,
    ) -> AnalysisResult<FusionResult> {
        let images: Vec<String> = records.iter().map(|r| r.image_id.clone()).collect();
        let claims: Vec<NormalizedClaim> = records
            .iter()
            .flat_map(|r| r.claims.iter().cloned())
            .collect();

        let result = self.fusion.fuse(gemstone_id, images, &claims, coverage)?;
        validate_fusion_result(&result)?;

        self.emit_event(AnalysisEvent::FusionComplete {
            gemstone_id: gemstone_id.to_string(),
            attribute_count: result.attributes.len(),
            overall_confidence: result.overall_confidence,
            needs_review: result.needs_review(),
        });

        Ok(result)
    }

    /// Fetch, classify, extract and normalize one image
    async fn process_image(
        &self,
        gemstone_id: &str,
        image: &ImageRef,
        cancel: &CancellationToken,
    ) -> AnalysisResult<ImageExtractionRecord> {
        let start_time = Instant::now();
        let image_id = image.image_id.as_str();

        let payload = self
            .call_service("fetch", image_id, cancel, self.fetcher.fetch(image))
            .await?;

        let classification = self
            .call_service("classify", image_id, cancel, self.classifier.classify(&payload))
            .await?;
        check_confidence("classification", classification.confidence)?;

        debug!(
            gemstone_id,
            image_id,
            category = %classification.category,
            confidence = classification.confidence,
            "Image classified"
        );

        let extractor = match self.extractors.for_category(classification.category) {
            Some(extractor) => extractor,
            None => {
                debug!(gemstone_id, image_id, "Unknown image category, no claims extracted");
                return Ok(ImageExtractionRecord {
                    gemstone_id: gemstone_id.to_string(),
                    image_id: image_id.to_string(),
                    image_type: ImageCategory::Unknown.as_str().to_string(),
                    category: ImageCategory::Unknown,
                    classification_confidence: classification.confidence,
                    claims: Vec::new(),
                    raw_response: None,
                    model_version: None,
                    processing_cost: None,
                    processing_time_ms: Some(start_time.elapsed().as_millis() as u64),
                });
            }
        };

        let output = self
            .call_service("extract", image_id, cancel, extractor.extract(&payload))
            .await?;

        let extraction = parse_raw_extraction(&output.record)?;
        if extraction.image_id != image_id {
            return Err(ContractError::ImageMismatch {
                expected: image_id.to_string(),
                returned: extraction.image_id,
            }
            .into());
        }

        let claims = self.normalizer.normalize(&extraction)?;

        debug!(
            gemstone_id,
            image_id,
            raw_claims = extraction.claims.len(),
            normalized_claims = claims.len(),
            "Image claims normalized"
        );

        Ok(ImageExtractionRecord {
            gemstone_id: gemstone_id.to_string(),
            image_id: image_id.to_string(),
            image_type: extraction.image_type,
            category: classification.category,
            classification_confidence: classification.confidence,
            claims,
            raw_response: output.raw_response.or(Some(output.record)),
            model_version: output.model_version,
            processing_cost: output.processing_cost,
            processing_time_ms: Some(start_time.elapsed().as_millis() as u64),
        })
    }

    /// Await an external call under the hard timeout and the cancel token
    async fn call_service<T, F>(
        &self,
        operation: &str,
        image_id: &str,
        cancel: &CancellationToken,
        call: F,
    ) -> AnalysisResult<T>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        let timeout = self.pipeline.service_timeout();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ServiceError::Cancelled(operation.to_string())),
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: self.pipeline.service_timeout_ms,
                }),
            },
        };

        outcome.map_err(|source| AnalysisError::Service {
            image_id: image_id.to_string(),
            source,
        })
    }
}
