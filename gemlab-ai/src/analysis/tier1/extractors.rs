// Tier 1: Vision-backed classifier and extractors

use async_trait::async_trait;
use std::sync::Arc;

use super::prompts::{build_classification_prompt, build_extraction_prompt};
use super::vision_client::VisionClient;
use super::{ClaimExtractor, ImageClassifier};
use crate::analysis::types::{Classification, ExtractorOutput, ImageCategory, ImagePayload};
use crate::error::ServiceError;

/// Classifier backed by the vision service
pub struct VisionClassifier {
    client: Arc<VisionClient>,
}

impl VisionClassifier {
    pub fn new(client: Arc<VisionClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageClassifier for VisionClassifier {
    async fn classify(&self, image: &ImagePayload) -> Result<Classification, ServiceError> {
        self.client
            .classify(image, build_classification_prompt())
            .await
    }
}

/// Extractor for one image category, backed by the vision service
pub struct VisionExtractor {
    client: Arc<VisionClient>,
    category: ImageCategory,
}

impl VisionExtractor {
    pub fn new(client: Arc<VisionClient>, category: ImageCategory) -> Self {
        Self { client, category }
    }

    pub fn category(&self) -> ImageCategory {
        self.category
    }
}

#[async_trait]
impl ClaimExtractor for VisionExtractor {
    async fn extract(&self, image: &ImagePayload) -> Result<ExtractorOutput, ServiceError> {
        let prompt = build_extraction_prompt(self.category, &image.image_id).ok_or_else(|| {
            ServiceError::InvalidImage(format!(
                "no extractor for category {} (image {})",
                self.category, image.image_id
            ))
        })?;

        let started = std::time::Instant::now();
        let output = self.client.extract(image, self.category, prompt).await?;

        tracing::debug!(
            image_id = %image.image_id,
            category = %self.category,
            elapsed_ms = started.elapsed().as_millis() as u64,
            cost = ?output.processing_cost,
            "Extraction received"
        );

        Ok(output)
    }
}
