// Tier 1: Vision inference service client
//
// Concept: Classify an image and extract raw claims from it over HTTP
// Endpoints: POST {base}/v1/classify, POST {base}/v1/extract
//
// Images travel base64-encoded in the JSON body. Requests are rate limited
// client-side and authenticated with a bearer token when one is configured.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

use crate::analysis::schema::check_confidence;
use crate::analysis::types::{Classification, ExtractorOutput, ImageCategory, ImagePayload};
use crate::config::VisionConfig;
use crate::error::ServiceError;

#[derive(Serialize)]
struct ImageBody<'a> {
    image_id: &'a str,
    mime_type: &'a str,
    data: String,
}

impl<'a> ImageBody<'a> {
    fn from_payload(payload: &'a ImagePayload) -> Self {
        Self {
            image_id: &payload.image_id,
            mime_type: &payload.mime_type,
            data: BASE64.encode(&payload.bytes),
        }
    }
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    model: &'a str,
    prompt: String,
    image: ImageBody<'a>,
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    model: &'a str,
    category: ImageCategory,
    prompt: String,
    image: ImageBody<'a>,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    category: ImageCategory,
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    /// Extraction record; some deployments return it as the whole body
    #[serde(default)]
    extraction: Option<serde_json::Value>,
    #[serde(default)]
    model_version: Option<String>,
    #[serde(default)]
    cost: Option<f64>,
}

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Vision service client (Tier 1 extractor concept)
pub struct VisionClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    rate_limiter: DirectRateLimiter,
}

impl VisionClient {
    /// Build a client from configuration
    ///
    /// `request_timeout` bounds each whole request; the workflow applies its
    /// own hard timeout on top.
    pub fn new(
        config: &VisionConfig,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(|e| ServiceError::Network(format!("Failed to build HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            ServiceError::Network("vision.requests_per_second must be at least 1".to_string())
        })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// `POST /v1/classify`
    pub async fn classify(&self, image: &ImagePayload, prompt: String) -> Result<Classification, ServiceError> {
        let request = ClassifyRequest {
            model: &self.model,
            prompt,
            image: ImageBody::from_payload(image),
        };

        let body = self.post_json("/v1/classify", &request).await?;
        let response: ClassifyResponse = serde_json::from_value(body)
            .map_err(|e| ServiceError::Parse(format!("classify response: {}", e)))?;

        check_confidence("classification", response.confidence)
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        tracing::debug!(
            image_id = %image.image_id,
            category = %response.category,
            confidence = response.confidence,
            "Image classified"
        );

        Ok(Classification {
            category: response.category,
            confidence: response.confidence,
        })
    }

    /// `POST /v1/extract`
    pub async fn extract(
        &self,
        image: &ImagePayload,
        category: ImageCategory,
        prompt: String,
    ) -> Result<ExtractorOutput, ServiceError> {
        let request = ExtractRequest {
            model: &self.model,
            category,
            prompt,
            image: ImageBody::from_payload(image),
        };

        let body = self.post_json("/v1/extract", &request).await?;
        let response: ExtractResponse = serde_json::from_value(body.clone())
            .map_err(|e| ServiceError::Parse(format!("extract response: {}", e)))?;

        let record = response.extraction.unwrap_or_else(|| body.clone());

        Ok(ExtractorOutput {
            record,
            raw_response: Some(body),
            model_version: response.model_version.or_else(|| Some(self.model.clone())),
            processing_cost: response.cost,
        })
    }

    async fn post_json<T: Serialize>(&self, path: &str, request: &T) -> Result<serde_json::Value, ServiceError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("Calling vision service: {}", url);

        let mut builder = self.client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(ServiceError::from)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ServiceError::Parse(format!("{} returned invalid JSON: {}", path, e)))
    }
}
