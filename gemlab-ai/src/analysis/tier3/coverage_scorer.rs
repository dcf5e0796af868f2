// Tier 3: Coverage Scorer
//
// Concept: Measure how much of the gemstone's evidence made it into fusion
// Synchronization: Accepts image counts and fused results, outputs
// ImageCoverage and a completeness score

use crate::analysis::types::{Attribute, FusionResult, ImageCoverage};

/// Coverage scorer (Tier 3 concept)
#[derive(Debug, Clone, Default)]
pub struct CoverageScorer;

impl CoverageScorer {
    /// Image coverage for a run: partial when any image failed
    pub fn image_coverage(&self, total_images: usize, failed_images: Vec<String>) -> ImageCoverage {
        ImageCoverage {
            total_images,
            partial: !failed_images.is_empty(),
            failed_images,
        }
    }

    /// Confidence-weighted share of the closed attribute set that was fused
    ///
    /// Each attribute contributes its fused confidence, absent attributes
    /// contribute 0. Result is in [0, 1].
    pub fn completeness(&self, result: &FusionResult) -> f64 {
        let total: f64 = Attribute::ALL
            .iter()
            .filter_map(|a| result.get(*a))
            .map(|fused| fused.confidence)
            .sum();
        (total / Attribute::ALL.len() as f64).clamp(0.0, 1.0)
    }

    /// Attributes of the closed set with no fused value
    pub fn missing_attributes(&self, result: &FusionResult) -> Vec<Attribute> {
        Attribute::ALL
            .iter()
            .copied()
            .filter(|a| result.get(*a).is_none())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::{ClaimRef, ClaimValue, FusedAttribute};
    use std::collections::BTreeMap;

    fn result_with(attributes: &[(Attribute, f64)]) -> FusionResult {
        let map: BTreeMap<Attribute, FusedAttribute> = attributes
            .iter()
            .map(|(a, confidence)| {
                (
                    *a,
                    FusedAttribute {
                        attribute: *a,
                        final_value: ClaimValue::Number(1.0),
                        unit: None,
                        confidence: *confidence,
                        provenance: vec![ClaimRef {
                            claim_id: "i#0".to_string(),
                            image_id: "i".to_string(),
                        }],
                        conflict: false,
                        provisional: false,
                    },
                )
            })
            .collect();
        FusionResult::new("g".to_string(), vec!["i".to_string()], map, ImageCoverage::default(), "v".to_string())
    }

    #[test]
    fn test_failed_images_mark_partial() {
        let scorer = CoverageScorer;
        assert!(!scorer.image_coverage(3, vec![]).partial);

        let coverage = scorer.image_coverage(3, vec!["b".to_string()]);
        assert!(coverage.partial);
        assert_eq!(coverage.total_images, 3);
        assert_eq!(coverage.failed_images, vec!["b".to_string()]);
    }

    #[test]
    fn test_completeness_and_missing() {
        let scorer = CoverageScorer;
        assert_eq!(scorer.completeness(&result_with(&[])), 0.0);

        let result = result_with(&[(Attribute::Weight, 1.0), (Attribute::Length, 0.65)]);
        let expected = 1.65 / Attribute::ALL.len() as f64;
        assert!((scorer.completeness(&result) - expected).abs() < 1e-12);

        let missing = scorer.missing_attributes(&result);
        assert_eq!(missing.len(), Attribute::ALL.len() - 2);
        assert!(!missing.contains(&Attribute::Weight));
    }
}
