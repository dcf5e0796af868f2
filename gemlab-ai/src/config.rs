//! Configuration for gemlab-ai
//!
//! Loaded from `gemlab-ai.toml` via [`gemlab_common::config::load_toml_config`];
//! every field has a built-in default so a missing file or a partial section
//! still yields a usable configuration.
//!
//! Vision API key resolution priority: ENV → TOML.

use gemlab_common::config::{load_toml_config, resolve_root_folder, LoggingConfig};
use gemlab_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::analysis::types::{Attribute, SourceKind};

/// Configuration file name looked up by [`AnalysisConfig::load`]
pub const CONFIG_FILE_NAME: &str = "gemlab-ai.toml";

/// Environment variable holding the vision service API key
pub const VISION_API_KEY_ENV_VAR: &str = "GEMLAB_VISION_API_KEY";

/// Default analysis version: crate version plus build commit
pub const DEFAULT_ANALYSIS_VERSION: &str =
    concat!(env!("CARGO_PKG_VERSION"), "+", env!("GIT_HASH"));

/// Complete gemlab-ai configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub fusion: FusionConfig,
    pub normalizer: NormalizerConfig,
    pub pipeline: PipelineConfig,
    pub batch: BatchConfig,
    pub vision: VisionConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    /// Root folder holding the database (overridden by `GEMLAB_ROOT_FOLDER`)
    pub root_folder: Option<PathBuf>,
}

impl AnalysisConfig {
    /// Discover, load and validate the configuration
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config: AnalysisConfig = load_toml_config(explicit, CONFIG_FILE_NAME)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the fusion and batch logic cannot work with
    pub fn validate(&self) -> Result<()> {
        for attribute in Attribute::ALL.iter().filter(|a| a.is_numeric()) {
            if let Some(tolerance) = self.fusion.tolerance(*attribute) {
                tolerance.validate(*attribute)?;
            }
        }

        check_unit_interval("fusion.conflict_margin", self.fusion.conflict_margin)?;
        check_unit_interval("fusion.min_confidence", self.fusion.min_confidence)?;
        check_unit_interval(
            "normalizer.free_text_confidence_ceiling",
            self.normalizer.free_text_confidence_ceiling,
        )?;
        self.fusion.source_weights.validate()?;

        if self.fusion.analysis_version.trim().is_empty() {
            return Err(Error::Config("fusion.analysis_version must not be empty".to_string()));
        }
        if self.pipeline.service_timeout_ms == 0 {
            return Err(Error::Config("pipeline.service_timeout_ms must be positive".to_string()));
        }
        if self.batch.concurrency == 0 {
            return Err(Error::Config("batch.concurrency must be at least 1".to_string()));
        }
        if self.batch.batch_size == 0 {
            return Err(Error::Config("batch.batch_size must be at least 1".to_string()));
        }
        if self.vision.requests_per_second == 0 {
            return Err(Error::Config("vision.requests_per_second must be at least 1".to_string()));
        }

        Ok(())
    }

    /// Database file: configured path, else `<root folder>/gemlab.db`
    pub fn database_path(&self) -> PathBuf {
        match &self.database.path {
            Some(path) => path.clone(),
            None => resolve_root_folder(None, self.root_folder.as_deref()).join("gemlab.db"),
        }
    }
}

fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!("{} must be within [0, 1], got {}", name, value)))
    }
}

// ============================================================================
// Fusion
// ============================================================================

/// Agreement tolerances for one numeric attribute
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Values within this distance fall into the same equivalence class
    pub grouping: f64,
    /// Stricter distance used only to decide whether a dissenting claim conflicts
    pub review: f64,
}

impl Tolerance {
    pub const fn new(grouping: f64, review: f64) -> Self {
        Self { grouping, review }
    }

    fn validate(&self, attribute: Attribute) -> Result<()> {
        if !(self.grouping.is_finite() && self.grouping > 0.0) {
            return Err(Error::Config(format!(
                "fusion.{}.grouping must be positive, got {}",
                attribute, self.grouping
            )));
        }
        if !(self.review.is_finite() && self.review > 0.0) {
            return Err(Error::Config(format!(
                "fusion.{}.review must be positive, got {}",
                attribute, self.review
            )));
        }
        if self.review > self.grouping {
            return Err(Error::Config(format!(
                "fusion.{}.review ({}) must not exceed grouping ({})",
                attribute, self.review, self.grouping
            )));
        }
        Ok(())
    }

    /// Decimal places implied by the grouping tolerance (0.02 → 2, 0.25 → 2, 1 → 0)
    pub fn decimals(&self) -> u32 {
        (0..=6)
            .find(|d| {
                let scaled = self.grouping * 10f64.powi(*d as i32);
                (scaled - scaled.round()).abs() < 1e-9
            })
            .unwrap_or(6)
    }
}

const WEIGHT_TOLERANCE: Tolerance = Tolerance::new(0.02, 0.01);
const DIMENSION_TOLERANCE: Tolerance = Tolerance::new(0.25, 0.12);

/// Evidence multiplier per source kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceWeights {
    pub instrument: f64,
    pub certificate: f64,
    pub label: f64,
    pub visual_estimate: f64,
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            instrument: 1.0,
            certificate: 1.0,
            label: 0.85,
            visual_estimate: 0.6,
        }
    }
}

impl SourceWeights {
    pub fn weight(&self, kind: SourceKind) -> f64 {
        match kind {
            SourceKind::Instrument => self.instrument,
            SourceKind::Certificate => self.certificate,
            SourceKind::Label => self.label,
            SourceKind::VisualEstimate => self.visual_estimate,
        }
    }

    fn validate(&self) -> Result<()> {
        check_unit_interval("fusion.source_weights.instrument", self.instrument)?;
        check_unit_interval("fusion.source_weights.certificate", self.certificate)?;
        check_unit_interval("fusion.source_weights.label", self.label)?;
        check_unit_interval("fusion.source_weights.visual_estimate", self.visual_estimate)?;

        if self.label > self.instrument.min(self.certificate) || self.visual_estimate > self.label {
            return Err(Error::Config(
                "fusion.source_weights must satisfy instrument, certificate >= label >= visual_estimate"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Fusion engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub weight: Tolerance,
    pub length: Tolerance,
    pub width: Tolerance,
    pub depth: Tolerance,
    /// Runner-up within this fraction of the winner's score is a conflict
    pub conflict_margin: f64,
    /// Winner below this score is provisional; dissenting claims at or above it conflict
    pub min_confidence: f64,
    pub source_weights: SourceWeights,
    pub analysis_version: String,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            weight: WEIGHT_TOLERANCE,
            length: DIMENSION_TOLERANCE,
            width: DIMENSION_TOLERANCE,
            depth: DIMENSION_TOLERANCE,
            conflict_margin: 0.10,
            min_confidence: 0.60,
            source_weights: SourceWeights::default(),
            analysis_version: DEFAULT_ANALYSIS_VERSION.to_string(),
        }
    }
}

impl FusionConfig {
    /// Tolerance for a numeric attribute (`None` for categorical ones)
    pub fn tolerance(&self, attribute: Attribute) -> Option<Tolerance> {
        match attribute {
            Attribute::Weight => Some(self.weight),
            Attribute::Length => Some(self.length),
            Attribute::Width => Some(self.width),
            Attribute::Depth => Some(self.depth),
            _ => None,
        }
    }
}

// ============================================================================
// Normalizer / pipeline / batch
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Confidence cap for categorical values outside the controlled vocabulary
    pub free_text_confidence_ceiling: f64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            free_text_confidence_ceiling: 0.5,
        }
    }
}

/// What to do when one image's inference call fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFailurePolicy {
    /// Fail the whole gemstone run
    #[default]
    Abort,
    /// Drop the image, fuse the rest and flag partial coverage
    SkipImage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Hard timeout for each fetch/classify/extract call
    pub service_timeout_ms: u64,
    pub image_failure_policy: ImageFailurePolicy,
    /// Largest accepted image payload
    pub max_image_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            service_timeout_ms: 60_000,
            image_failure_policy: ImageFailurePolicy::Abort,
            max_image_bytes: 20 * 1024 * 1024,
        }
    }
}

impl PipelineConfig {
    pub fn service_timeout(&self) -> Duration {
        gemlab_common::time::millis_to_duration(self.service_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Gemstones analyzed concurrently within a batch
    pub concurrency: usize,
    pub batch_size: usize,
    /// Pause between batches (external rate limits)
    pub inter_batch_pause_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            batch_size: 10,
            inter_batch_pause_ms: 2000,
        }
    }
}

// ============================================================================
// Vision service / database
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub requests_per_second: u32,
    pub connect_timeout_ms: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8600".to_string(),
            model: "gem-vision-1".to_string(),
            api_key: None,
            requests_per_second: 5,
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
    /// Upper bound on lock-contention retries per write
    pub max_lock_wait_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_lock_wait_ms: 5000,
        }
    }
}

/// Resolve the vision API key
///
/// **Priority:** ENV → TOML. Returns `None` when neither is set; the client
/// then sends unauthenticated requests.
pub fn resolve_vision_api_key(config: &VisionConfig) -> Option<String> {
    let env_key = std::env::var(VISION_API_KEY_ENV_VAR)
        .ok()
        .filter(|k| is_valid_key(k));
    let toml_key = config.api_key.clone().filter(|k| is_valid_key(k));

    if env_key.is_some() && toml_key.is_some() {
        warn!("Vision API key found in environment and TOML. Using environment (highest priority).");
    }

    if let Some(key) = env_key {
        info!("Vision API key loaded from environment variable");
        return Some(key);
    }
    if let Some(key) = toml_key {
        info!("Vision API key loaded from TOML config");
        return Some(key);
    }

    warn!("No vision API key configured");
    None
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
