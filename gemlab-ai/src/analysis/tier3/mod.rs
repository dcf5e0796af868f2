// Tier 3: Validation and quality judgement

pub mod conflict_detector;
pub mod coverage_scorer;

pub use conflict_detector::{ConflictAssessment, ConflictDetector, ConflictReason};
pub use coverage_scorer::CoverageScorer;
