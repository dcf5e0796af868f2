// Tier 1: Inference-service adapters
//
// Each adapter is an independent concept the workflow only knows through a
// trait: image fetcher, classifier and one extractor per image category.
// All of them are injected, so the pipeline runs against fakes in tests.

pub mod extractors;
pub mod image_fetcher;
pub mod prompts;
pub mod vision_client;

use async_trait::async_trait;
use std::sync::Arc;

use crate::analysis::types::{Classification, ExtractorOutput, ImageCategory, ImagePayload, ImageRef};
use crate::error::ServiceError;

pub use extractors::{VisionClassifier, VisionExtractor};
pub use image_fetcher::HttpImageFetcher;
pub use vision_client::VisionClient;

/// Materialize an image reference into bytes
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, image: &ImageRef) -> Result<ImagePayload, ServiceError>;
}

/// Assign an image category
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn classify(&self, image: &ImagePayload) -> Result<Classification, ServiceError>;
}

/// Extract raw claims from an image of one category
#[async_trait]
pub trait ClaimExtractor: Send + Sync {
    async fn extract(&self, image: &ImagePayload) -> Result<ExtractorOutput, ServiceError>;
}

/// One extractor per extractable image category
#[derive(Clone)]
pub struct ExtractorSet {
    pub instrument: Arc<dyn ClaimExtractor>,
    pub label: Arc<dyn ClaimExtractor>,
    pub gem_macro: Arc<dyn ClaimExtractor>,
}

impl ExtractorSet {
    /// Extractor for `category`; `Unknown` images have none
    pub fn for_category(&self, category: ImageCategory) -> Option<&dyn ClaimExtractor> {
        match category {
            ImageCategory::Instrument => Some(self.instrument.as_ref()),
            ImageCategory::Label => Some(self.label.as_ref()),
            ImageCategory::GemMacro => Some(self.gem_macro.as_ref()),
            ImageCategory::Unknown => None,
        }
    }

    /// Vision-service extractors for all three categories
    pub fn vision(client: Arc<VisionClient>) -> Self {
        Self {
            instrument: Arc::new(VisionExtractor::new(client.clone(), ImageCategory::Instrument)),
            label: Arc::new(VisionExtractor::new(client.clone(), ImageCategory::Label)),
            gem_macro: Arc::new(VisionExtractor::new(client, ImageCategory::GemMacro)),
        }
    }
}
