// Tier 1: Image fetcher
//
// Resolves an ImageRef (URL, local path or inline bytes) into bytes and
// checks that they are an image of acceptable size. MIME type is sniffed
// from the content, never trusted from the source.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::ImageFetcher;
use crate::analysis::types::{ImagePayload, ImageRef, ImageSource};
use crate::error::ServiceError;

/// Fetcher for URLs, local files and inline bytes
pub struct HttpImageFetcher {
    client: Client,
    max_image_bytes: usize,
}

impl HttpImageFetcher {
    pub fn new(request_timeout: Duration, max_image_bytes: usize) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ServiceError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            max_image_bytes,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ServiceError> {
        let response = self.client.get(url).send().await.map_err(ServiceError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message: format!("image download failed: {}", url),
            });
        }

        if let Some(length) = response.content_length() {
            if length as usize > self.max_image_bytes {
                return Err(self.too_large(length as usize));
            }
        }

        let bytes = response.bytes().await.map_err(ServiceError::from)?;
        Ok(bytes.to_vec())
    }

    fn too_large(&self, size: usize) -> ServiceError {
        ServiceError::InvalidImage(format!(
            "image is {} bytes, limit is {}",
            size, self.max_image_bytes
        ))
    }

    /// Size and content checks shared by every source
    fn validate(&self, image_id: &str, bytes: Vec<u8>) -> Result<ImagePayload, ServiceError> {
        if bytes.is_empty() {
            return Err(ServiceError::InvalidImage(format!("image {} is empty", image_id)));
        }
        if bytes.len() > self.max_image_bytes {
            return Err(self.too_large(bytes.len()));
        }

        let kind = infer::get(&bytes)
            .filter(|k| k.matcher_type() == infer::MatcherType::Image)
            .ok_or_else(|| {
                ServiceError::InvalidImage(format!("image {} is not a recognised image format", image_id))
            })?;

        Ok(ImagePayload {
            image_id: image_id.to_string(),
            mime_type: kind.mime_type().to_string(),
            bytes,
        })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, image: &ImageRef) -> Result<ImagePayload, ServiceError> {
        let bytes = match &image.source {
            ImageSource::Url(url) => self.download(url).await?,
            ImageSource::Path(path) => tokio::fs::read(path).await.map_err(|e| {
                ServiceError::InvalidImage(format!("cannot read {}: {}", path.display(), e))
            })?,
            ImageSource::Bytes(bytes) => bytes.clone(),
        };

        let payload = self.validate(&image.image_id, bytes)?;
        tracing::debug!(
            image_id = %payload.image_id,
            mime_type = %payload.mime_type,
            size = payload.bytes.len(),
            "Image fetched"
        );
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Smallest PNG signature + IHDR prefix `infer` recognises
    const PNG_HEADER: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    fn fetcher(limit: usize) -> HttpImageFetcher {
        HttpImageFetcher::new(Duration::from_secs(1), limit).unwrap()
    }

    #[tokio::test]
    async fn test_inline_png_accepted() {
        let payload = fetcher(1024)
            .fetch(&ImageRef::bytes("img-1", PNG_HEADER.to_vec()))
            .await
            .unwrap();
        assert_eq!(payload.mime_type, "image/png");
        assert_eq!(payload.image_id, "img-1");
    }

    #[tokio::test]
    async fn test_non_image_rejected() {
        let err = fetcher(1024)
            .fetch(&ImageRef::bytes("img-1", b"%PDF-1.7 not an image".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidImage(_)));
    }

    #[tokio::test]
    async fn test_oversize_rejected() {
        let err = fetcher(4)
            .fetch(&ImageRef::bytes("img-1", PNG_HEADER.to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidImage(msg) if msg.contains("limit")));
    }

    #[tokio::test]
    async fn test_local_path_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PNG_HEADER).unwrap();

        let image = ImageRef {
            image_id: "img-2".to_string(),
            source: ImageSource::Path(file.path().to_path_buf()),
        };
        let payload = fetcher(1024).fetch(&image).await.unwrap();
        assert_eq!(payload.bytes, PNG_HEADER);
    }

    #[tokio::test]
    async fn test_missing_path_is_invalid_image() {
        let image = ImageRef {
            image_id: "img-3".to_string(),
            source: ImageSource::Path("/nonexistent/gem.jpg".into()),
        };
        assert!(matches!(
            fetcher(1024).fetch(&image).await,
            Err(ServiceError::InvalidImage(_))
        ));
    }
}
