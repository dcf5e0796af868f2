// Shared types and data contracts
//
// Defines the contracts between the three tiers of the analysis pipeline:
// Tier 1 adapters produce raw extraction records, Tier 2 normalizes and fuses
// claims, Tier 3 judges conflicts and coverage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ContractError;

// ============================================================================
// Images and classification (Tier 1 inputs/outputs)
// ============================================================================

/// Where to load an image from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    Url(String),
    Path(PathBuf),
    #[serde(skip)]
    Bytes(Vec<u8>),
}

/// One photograph belonging to a gemstone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub image_id: String,
    pub source: ImageSource,
}

impl ImageRef {
    pub fn url(image_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            image_id: image_id.into(),
            source: ImageSource::Url(url.into()),
        }
    }

    pub fn bytes(image_id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            image_id: image_id.into(),
            source: ImageSource::Bytes(bytes),
        }
    }
}

/// Materialized image bytes ready for the inference service
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub image_id: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Image category assigned by the classifier
///
/// Closed set: each variant has exactly one extractor (or none, for `Unknown`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageCategory {
    /// Scale or gauge display
    Instrument,
    /// Label, tag or certificate text
    Label,
    /// Close-up of the stone itself
    GemMacro,
    Unknown,
}

impl ImageCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Instrument => "instrument",
            Self::Label => "label",
            Self::GemMacro => "gem_macro",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ImageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instrument" => Ok(Self::Instrument),
            "label" => Ok(Self::Label),
            "gem_macro" => Ok(Self::GemMacro),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown image category '{}'", other)),
        }
    }
}

/// Classifier output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: ImageCategory,
    pub confidence: f64,
}

/// Extractor output as returned by the inference service
///
/// `record` is the black-box extraction record; it is validated by
/// [`crate::analysis::schema::parse_raw_extraction`] before use.
#[derive(Debug, Clone)]
pub struct ExtractorOutput {
    pub record: serde_json::Value,
    pub raw_response: Option<serde_json::Value>,
    pub model_version: Option<String>,
    pub processing_cost: Option<f64>,
}

// ============================================================================
// Raw claims (Tier 1 output, normalizer input)
// ============================================================================

/// Loosely typed claim as produced by an extractor
#[derive(Debug, Clone, PartialEq)]
pub struct RawClaim {
    pub attribute: String,
    pub raw_value: serde_json::Value,
    pub unit: Option<String>,
    pub confidence: f64,
}

/// Per-image extraction record
#[derive(Debug, Clone, PartialEq)]
pub struct RawExtraction {
    pub image_id: String,
    pub image_type: String,
    pub claims: Vec<RawClaim>,
}

// ============================================================================
// Normalized claims (Tier 2)
// ============================================================================

/// Closed attribute set
///
/// Declaration order is the order attributes appear in fused results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Weight,
    Length,
    Width,
    Depth,
    Cut,
    Color,
    Clarity,
    Origin,
    GemstoneCode,
    CertificationLab,
    CertificationNumber,
}

/// Value kind of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// Number in a canonical unit, grouped by tolerance
    Numeric,
    /// Normalized string, grouped by exact match
    Categorical,
}

impl Attribute {
    pub const ALL: [Attribute; 11] = [
        Attribute::Weight,
        Attribute::Length,
        Attribute::Width,
        Attribute::Depth,
        Attribute::Cut,
        Attribute::Color,
        Attribute::Clarity,
        Attribute::Origin,
        Attribute::GemstoneCode,
        Attribute::CertificationLab,
        Attribute::CertificationNumber,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weight => "weight",
            Self::Length => "length",
            Self::Width => "width",
            Self::Depth => "depth",
            Self::Cut => "cut",
            Self::Color => "color",
            Self::Clarity => "clarity",
            Self::Origin => "origin",
            Self::GemstoneCode => "gemstone_code",
            Self::CertificationLab => "certification_lab",
            Self::CertificationNumber => "certification_number",
        }
    }

    pub fn kind(self) -> AttributeKind {
        match self {
            Self::Weight | Self::Length | Self::Width | Self::Depth => AttributeKind::Numeric,
            _ => AttributeKind::Categorical,
        }
    }

    pub fn is_numeric(self) -> bool {
        self.kind() == AttributeKind::Numeric
    }

    /// Free-form identifiers: normalized but never vocabulary-matched or capped
    pub fn is_identifier(self) -> bool {
        matches!(self, Self::GemstoneCode | Self::CertificationNumber)
    }

    /// Canonical unit (`ct` for weight, `mm` for dimensions)
    pub fn canonical_unit(self) -> Option<&'static str> {
        match self {
            Self::Weight => Some("ct"),
            Self::Length | Self::Width | Self::Depth => Some("mm"),
            _ => None,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Attribute {
    type Err = ContractError;

    /// Strict parse of a canonical attribute name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Attribute::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ContractError::UnknownAttribute(s.to_string()))
    }
}

/// Typed claim value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValue {
    Number(f64),
    Text(String),
}

impl ClaimValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }
}

impl fmt::Display for ClaimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Trust category of a claim's origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Instrument,
    Certificate,
    Label,
    VisualEstimate,
}

impl SourceKind {
    /// Derive source kind from an extraction record's `image_type`
    pub fn from_image_type(image_type: &str) -> Self {
        match image_type.trim().to_ascii_lowercase().as_str() {
            "instrument" | "scale" | "instrument_reading" | "scale_reading" | "gauge" => {
                Self::Instrument
            }
            "certificate" | "cert" | "lab_report" => Self::Certificate,
            "label" | "tag" => Self::Label,
            _ => Self::VisualEstimate,
        }
    }

    /// Tie-break priority (higher is more trustworthy)
    pub fn priority(self) -> u8 {
        match self {
            Self::Instrument | Self::Certificate => 3,
            Self::Label => 2,
            Self::VisualEstimate => 1,
        }
    }
}

/// Canonical claim: value in the attribute's canonical unit or vocabulary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedClaim {
    /// `<image_id>#<index>`, unique within one gemstone
    pub claim_id: String,
    pub image_id: String,
    pub attribute: Attribute,
    pub value: ClaimValue,
    #[serde(default)]
    pub unit: Option<String>,
    pub confidence: f64,
    pub source_kind: SourceKind,
    /// Categorical value kept outside the controlled vocabulary
    #[serde(default)]
    pub free_text: bool,
}

// ============================================================================
// Fusion output (Tier 2 output, Tier 3 annotated)
// ============================================================================

/// Provenance entry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClaimRef {
    pub claim_id: String,
    pub image_id: String,
}

/// One reconciled attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedAttribute {
    pub attribute: Attribute,
    pub final_value: ClaimValue,
    #[serde(default)]
    pub unit: Option<String>,
    /// Winning class score only, in [0, 1]
    pub confidence: f64,
    /// Claims of the winning class, ordered by claim id
    pub provenance: Vec<ClaimRef>,
    pub conflict: bool,
    /// Winner scored below the minimum confidence
    pub provisional: bool,
}

/// Which images contributed to a result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageCoverage {
    pub total_images: usize,
    pub failed_images: Vec<String>,
    pub partial: bool,
}

/// Per-gemstone fused record
///
/// `needs_review` is derived from conflicts, low-confidence attributes and
/// partial coverage when the result is built. Those inputs are read-only so
/// the flag can never go stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FusionResultFields")]
pub struct FusionResult {
    pub gemstone_id: String,
    pub images: Vec<String>,
    pub attributes: BTreeMap<Attribute, FusedAttribute>,
    pub overall_confidence: f64,
    conflicts: Vec<Attribute>,
    low_confidence: Vec<Attribute>,
    coverage: ImageCoverage,
    needs_review: bool,
    pub analysis_version: String,
}

impl FusionResult {
    /// Assemble a result from fused attributes
    ///
    /// Conflict and low-confidence lists and the overall confidence are taken
    /// from the attribute flags so they can never disagree.
    pub fn new(
        gemstone_id: String,
        images: Vec<String>,
        attributes: BTreeMap<Attribute, FusedAttribute>,
        coverage: ImageCoverage,
        analysis_version: String,
    ) -> Self {
        let conflicts = attributes
            .values()
            .filter(|a| a.conflict)
            .map(|a| a.attribute)
            .collect();
        let low_confidence = attributes
            .values()
            .filter(|a| a.provisional)
            .map(|a| a.attribute)
            .collect();
        let overall_confidence = if attributes.is_empty() {
            0.0
        } else {
            attributes.values().map(|a| a.confidence).sum::<f64>() / attributes.len() as f64
        };

        let mut result = Self {
            gemstone_id,
            images,
            attributes,
            overall_confidence,
            conflicts,
            low_confidence,
            coverage,
            needs_review: false,
            analysis_version,
        };
        result.needs_review = result.derive_needs_review();
        result
    }

    pub fn needs_review(&self) -> bool {
        self.needs_review
    }

    /// Attributes flagged as conflicting, in attribute order
    pub fn conflicts(&self) -> &[Attribute] {
        &self.conflicts
    }

    /// Attributes whose winner is provisional
    pub fn low_confidence(&self) -> &[Attribute] {
        &self.low_confidence
    }

    pub fn coverage(&self) -> &ImageCoverage {
        &self.coverage
    }

    fn derive_needs_review(&self) -> bool {
        !self.conflicts.is_empty() || !self.low_confidence.is_empty() || self.coverage.partial
    }

    pub fn get(&self, attribute: Attribute) -> Option<&FusedAttribute> {
        self.attributes.get(&attribute)
    }

    /// `attribute -> final value`
    pub fn final_values(&self) -> BTreeMap<Attribute, ClaimValue> {
        self.attributes
            .iter()
            .map(|(k, v)| (*k, v.final_value.clone()))
            .collect()
    }

    /// `attribute -> confidence`
    pub fn confidences(&self) -> BTreeMap<Attribute, f64> {
        self.attributes.iter().map(|(k, v)| (*k, v.confidence)).collect()
    }

    /// `attribute -> provenance`
    pub fn provenance(&self) -> BTreeMap<Attribute, Vec<ClaimRef>> {
        self.attributes
            .iter()
            .map(|(k, v)| (*k, v.provenance.clone()))
            .collect()
    }
}

/// Serialized shape of [`FusionResult`]; the review flag is re-derived on load
#[derive(Deserialize)]
struct FusionResultFields {
    gemstone_id: String,
    images: Vec<String>,
    attributes: BTreeMap<Attribute, FusedAttribute>,
    overall_confidence: f64,
    conflicts: Vec<Attribute>,
    low_confidence: Vec<Attribute>,
    #[serde(default)]
    coverage: ImageCoverage,
    analysis_version: String,
}

impl From<FusionResultFields> for FusionResult {
    fn from(fields: FusionResultFields) -> Self {
        let mut result = Self {
            gemstone_id: fields.gemstone_id,
            images: fields.images,
            attributes: fields.attributes,
            overall_confidence: fields.overall_confidence,
            conflicts: fields.conflicts,
            low_confidence: fields.low_confidence,
            coverage: fields.coverage,
            needs_review: false,
            analysis_version: fields.analysis_version,
        };
        result.needs_review = result.derive_needs_review();
        result
    }
}

// ============================================================================
// Workflow types
// ============================================================================

/// One gemstone to analyze
#[derive(Debug, Clone)]
pub struct GemstoneJob {
    pub gemstone_id: String,
    pub images: Vec<ImageRef>,
}

/// Per-image record persisted alongside the fused result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageExtractionRecord {
    pub gemstone_id: String,
    pub image_id: String,
    pub image_type: String,
    pub category: ImageCategory,
    pub classification_confidence: f64,
    pub claims: Vec<NormalizedClaim>,
    pub raw_response: Option<serde_json::Value>,
    pub model_version: Option<String>,
    pub processing_cost: Option<f64>,
    pub processing_time_ms: Option<u64>,
}

/// Progress events broadcast by the workflow engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum AnalysisEvent {
    GemstoneStarted {
        gemstone_id: String,
        image_count: usize,
    },
    ImageProcessed {
        gemstone_id: String,
        image_id: String,
        category: ImageCategory,
        claim_count: usize,
    },
    ImageFailed {
        gemstone_id: String,
        image_id: String,
        error: String,
    },
    FusionComplete {
        gemstone_id: String,
        attribute_count: usize,
        overall_confidence: f64,
        needs_review: bool,
    },
    GemstoneAnalyzed {
        gemstone_id: String,
        needs_review: bool,
    },
    GemstoneFailed {
        gemstone_id: String,
        error: String,
    },
}
