//! Error types for gemlab-ai
//!
//! Three families, kept apart on purpose of how callers react to them:
//! - [`ContractError`]: an upstream component broke its output contract.
//!   Always propagated, never coerced into a best guess.
//! - [`ServiceError`]: the inference service or image source failed
//!   (timeout, network, bad status). Transient and retryable.
//! - [`StoreError`]: the persistence adapter failed.
//!
//! Disagreement between claims is never an error; it surfaces as
//! `conflicts` / `needs_review` on the fusion result.

use thiserror::Error;

/// Upstream contract violation
#[derive(Debug, Error)]
pub enum ContractError {
    /// Extraction record is structurally invalid (missing `image_id`,
    /// `claims` not a list, malformed claim entry)
    #[error("Invalid extraction shape: {0}")]
    InvalidExtractionShape(String),

    /// Confidence outside [0, 1] or not finite
    #[error("Confidence out of range for {context}: {value}")]
    ConfidenceOutOfRange { context: String, value: f64 },

    /// Attribute name outside the closed attribute set
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    /// Numeric attribute carrying text, or categorical attribute carrying a number
    #[error("Value kind mismatch for {attribute}: {detail}")]
    ValueKindMismatch { attribute: String, detail: String },

    /// The same claim id appeared twice in one fusion input
    #[error("Duplicate claim id: {0}")]
    DuplicateClaim(String),

    /// Extractor answered for a different image than the one it was given
    #[error("Extraction for image {returned} returned while processing image {expected}")]
    ImageMismatch { expected: String, returned: String },

    /// Fused result is internally inconsistent and must not be persisted
    #[error("Invalid fusion result: {0}")]
    InvalidFusionResult(String),
}

/// Failure talking to an external collaborator (vision service, image source)
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Call did not complete within the hard timeout
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Caller cancelled the in-flight call (handled like a timeout)
    #[error("{0} cancelled")]
    Cancelled(String),

    /// Network communication error
    #[error("Network error: {0}")]
    Network(String),

    /// Service answered with a non-success status
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Service response could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Image bytes unusable (not an image, too large, unreadable)
    #[error("Invalid image: {0}")]
    InvalidImage(String),
}

impl ServiceError {
    /// Whether this error came from the hard timeout or a cancellation
    pub fn is_timeout_like(&self) -> bool {
        matches!(self, ServiceError::Timeout { .. } | ServiceError::Cancelled(_))
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout {
                operation: err
                    .url()
                    .map(|u| u.path().to_string())
                    .unwrap_or_else(|| "request".to_string()),
                timeout_ms: 0,
            }
        } else if err.is_decode() {
            ServiceError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            ServiceError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ServiceError::Network(err.to_string())
        }
    }
}

/// Persistence adapter failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Lock contention outlasted the configured wait
    #[error("Database locked: {0}")]
    Locked(String),

    /// Backend not reachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored claims no longer satisfy the claim contract
    #[error("Corrupt stored record: {0}")]
    Corrupt(#[from] ContractError),
}

impl StoreError {
    /// SQLite reports writer contention as "database is locked"
    pub fn is_lock_error(&self) -> bool {
        match self {
            StoreError::Database(err) => err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}

/// Per-gemstone analysis failure. A gemstone whose run ends in one of these
/// stays unanalyzed and is safe to retry.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error("Image {image_id}: {source}")]
    Service {
        image_id: String,
        #[source]
        source: ServiceError,
    },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("Gemstone {0} has no images")]
    NoImages(String),

    #[error("Gemstone {gemstone_id}: all {failed} images failed")]
    NoUsableImages { gemstone_id: String, failed: usize },
}

/// Result type for analysis operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;
