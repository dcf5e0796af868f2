// Tier 2: Fusion Engine
//
// Concept: Reconcile every normalized claim for one gemstone into one value
// per attribute, with confidence, provenance and conflict flags
// Synchronization: Accepts Vec<NormalizedClaim>, outputs FusionResult
//
// Algorithm, per attribute in the closed set:
// 1. Collect the attribute's claims (none: attribute absent from the result)
// 2. Equivalence grouping (numeric: grouping tolerance; categorical: exact)
// 3. Class scoring: noisy-OR of confidence × source weight
// 4. Winner selection with deterministic tie-breaks
// 5. Final value: evidence-weighted mean of the winning class rounded to the
//    tolerance's precision (numeric), or the shared string (categorical)
// 6. Confidence = winning class score
// 7. Conflict and provisional flags from the Tier 3 conflict detector
// 8. overall_confidence = mean of fused confidences
//
// Pure and synchronous: no I/O, no clock, no shared state. Identical input
// always produces an identical result.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::analysis::schema::validate_normalized_claim;
use crate::analysis::tier2::equivalence::{self, EquivalenceClass};
use crate::analysis::tier3::ConflictDetector;
use crate::analysis::types::{
    Attribute, AttributeKind, ClaimRef, ClaimValue, FusedAttribute, FusionResult, ImageCoverage,
    NormalizedClaim,
};
use crate::config::{FusionConfig, Tolerance};
use crate::error::ContractError;

/// Fusion engine (Tier 2 concept)
#[derive(Debug, Clone)]
pub struct FusionEngine {
    config: FusionConfig,
    detector: ConflictDetector,
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        let detector = ConflictDetector::from_config(&config);
        Self { config, detector }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuse all normalized claims of one gemstone
    ///
    /// Fails only on contract violations (bad confidence, wrong value kind,
    /// duplicate claim ids); disagreement is reported through the result.
    pub fn fuse(
        &self,
        gemstone_id: &str,
        images: Vec<String>,
        claims: &[NormalizedClaim],
        coverage: ImageCoverage,
    ) -> Result<FusionResult, ContractError> {
        let mut seen = BTreeSet::new();
        for claim in claims {
            validate_normalized_claim(claim)?;
            if !seen.insert(claim.claim_id.as_str()) {
                return Err(ContractError::DuplicateClaim(claim.claim_id.clone()));
            }
        }

        let mut sorted: Vec<&NormalizedClaim> = claims.iter().collect();
        sorted.sort_by(|a, b| a.claim_id.cmp(&b.claim_id));

        let mut by_attribute: BTreeMap<Attribute, Vec<&NormalizedClaim>> = BTreeMap::new();
        for claim in sorted {
            by_attribute.entry(claim.attribute).or_default().push(claim);
        }

        let attributes: BTreeMap<Attribute, FusedAttribute> = by_attribute
            .into_iter()
            .filter_map(|(attribute, claims)| {
                self.fuse_attribute(attribute, &claims)
                    .map(|fused| (attribute, fused))
            })
            .collect();

        let result = FusionResult::new(
            gemstone_id.to_string(),
            images,
            attributes,
            coverage,
            self.config.analysis_version.clone(),
        );

        info!(
            gemstone_id,
            claims = claims.len(),
            attributes = result.attributes.len(),
            overall_confidence = result.overall_confidence,
            conflicts = ?result.conflicts(),
            low_confidence = ?result.low_confidence(),
            needs_review = result.needs_review(),
            "Fusion complete"
        );

        Ok(result)
    }

    /// `claims` is sorted by claim id; `None` only when it is empty
    fn fuse_attribute(&self, attribute: Attribute, claims: &[&NormalizedClaim]) -> Option<FusedAttribute> {
        let weights = &self.config.source_weights;
        let tolerance = self.config.tolerance(attribute);

        let mut classes = match (attribute.kind(), tolerance) {
            (AttributeKind::Numeric, Some(tolerance)) => {
                equivalence::group_numeric(claims, tolerance.grouping, weights)
            }
            _ => equivalence::group_categorical(claims, weights),
        };
        equivalence::rank_classes(&mut classes);

        let winner = classes.first()?;
        let final_value = self.final_value(winner, tolerance);

        let assessment = self.detector.assess(
            attribute,
            &classes,
            &final_value,
            tolerance.map(|t| t.review),
        );

        debug!(
            attribute = %attribute,
            classes = classes.len(),
            winner = %final_value,
            score = winner.score,
            members = winner.members.len(),
            "Attribute fused"
        );

        Some(FusedAttribute {
            attribute,
            final_value,
            unit: attribute.canonical_unit().map(str::to_string),
            confidence: winner.score.clamp(0.0, 1.0),
            provenance: winner
                .members
                .iter()
                .map(|c| ClaimRef {
                    claim_id: c.claim_id.clone(),
                    image_id: c.image_id.clone(),
                })
                .collect(),
            conflict: assessment.is_conflict(),
            provisional: assessment.provisional,
        })
    }

    fn final_value(&self, winner: &EquivalenceClass<'_>, tolerance: Option<Tolerance>) -> ClaimValue {
        let Some(tolerance) = tolerance else {
            return winner.representative.clone();
        };

        let weights = &self.config.source_weights;
        let values: Vec<(f64, f64)> = winner
            .members
            .iter()
            .filter_map(|c| {
                c.value
                    .as_number()
                    .map(|v| (v, equivalence::evidence(c, weights)))
            })
            .collect();

        let total_weight: f64 = values.iter().map(|(_, w)| w).sum();
        let mean = if total_weight > 0.0 {
            values.iter().map(|(v, w)| v * w).sum::<f64>() / total_weight
        } else if values.is_empty() {
            return winner.representative.clone();
        } else {
            values.iter().map(|(v, _)| v).sum::<f64>() / values.len() as f64
        };

        ClaimValue::Number(round_to(mean, tolerance.decimals()))
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::SourceKind;

    fn claim(id: &str, attribute: Attribute, value: ClaimValue, confidence: f64, kind: SourceKind) -> NormalizedClaim {
        NormalizedClaim {
            claim_id: id.to_string(),
            image_id: id.split('#').next().unwrap_or(id).to_string(),
            attribute,
            value,
            unit: attribute.canonical_unit().map(str::to_string),
            confidence,
            source_kind: kind,
            free_text: false,
        }
    }

    fn weight(id: &str, v: f64, confidence: f64, kind: SourceKind) -> NormalizedClaim {
        claim(id, Attribute::Weight, ClaimValue::Number(v), confidence, kind)
    }

    fn fuse(claims: &[NormalizedClaim]) -> FusionResult {
        FusionEngine::default()
            .fuse("gem-1", vec!["a".into(), "b".into(), "c".into()], claims, ImageCoverage::default())
            .unwrap()
    }

    #[test]
    fn test_weighted_mean_rounded_to_tolerance() {
        let result = fuse(&[
            weight("a#0", 2.482, 0.9, SourceKind::Instrument),
            weight("b#0", 2.476, 0.9, SourceKind::Instrument),
        ]);

        let fused = result.get(Attribute::Weight).unwrap();
        assert_eq!(fused.final_value, ClaimValue::Number(2.48));
        assert_eq!(fused.unit.as_deref(), Some("ct"));
        assert_eq!(fused.provenance.len(), 2);
    }

    #[test]
    fn test_absent_attribute_not_in_result() {
        let result = fuse(&[weight("a#0", 2.48, 0.9, SourceKind::Instrument)]);
        assert!(result.get(Attribute::Cut).is_none());
        assert_eq!(result.attributes.len(), 1);
    }

    #[test]
    fn test_confidence_uses_winning_class_only() {
        let alone = fuse(&[weight("a#0", 2.48, 0.9, SourceKind::Instrument)]);
        let with_loser = fuse(&[
            weight("a#0", 2.48, 0.9, SourceKind::Instrument),
            weight("b#0", 3.10, 0.3, SourceKind::VisualEstimate),
        ]);

        assert_eq!(
            alone.get(Attribute::Weight).unwrap().confidence,
            with_loser.get(Attribute::Weight).unwrap().confidence
        );
    }

    #[test]
    fn test_duplicate_claim_id_rejected() {
        let err = FusionEngine::default()
            .fuse(
                "gem-1",
                vec![],
                &[
                    weight("a#0", 2.48, 0.9, SourceKind::Instrument),
                    weight("a#0", 2.47, 0.9, SourceKind::Instrument),
                ],
                ImageCoverage::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ContractError::DuplicateClaim(id) if id == "a#0"));
    }

    #[test]
    fn test_out_of_range_confidence_rejected() {
        let err = FusionEngine::default()
            .fuse(
                "gem-1",
                vec![],
                &[weight("a#0", 2.48, 1.01, SourceKind::Instrument)],
                ImageCoverage::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ContractError::ConfidenceOutOfRange { .. }));
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let claims = vec![
            weight("a#0", 2.48, 0.7, SourceKind::Label),
            weight("b#0", 2.52, 0.7, SourceKind::Label),
            claim("c#0", Attribute::Color, ClaimValue::Text("RED".into()), 0.7, SourceKind::Label),
            claim("d#0", Attribute::Color, ClaimValue::Text("PINK".into()), 0.7, SourceKind::Label),
        ];
        let mut reversed = claims.clone();
        reversed.reverse();

        let forward = serde_json::to_string(&fuse(&claims)).unwrap();
        let backward = serde_json::to_string(&fuse(&reversed)).unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_zero_evidence_falls_back_to_plain_mean() {
        let result = fuse(&[
            weight("a#0", 2.00, 0.0, SourceKind::Instrument),
            weight("b#0", 2.02, 0.0, SourceKind::Instrument),
        ]);
        let fused = result.get(Attribute::Weight).unwrap();
        assert_eq!(fused.final_value, ClaimValue::Number(2.01));
        assert_eq!(fused.confidence, 0.0);
        assert!(fused.provisional);
        assert!(result.needs_review());
    }

    #[test]
    fn test_overall_confidence_is_mean() {
        let result = fuse(&[
            weight("a#0", 2.48, 0.9, SourceKind::Instrument),
            claim("b#0", Attribute::Cut, ClaimValue::Text("oval".into()), 0.7, SourceKind::Instrument),
        ]);
        assert!((result.overall_confidence - 0.8).abs() < 1e-12);
        assert_eq!(result.analysis_version, FusionConfig::default().analysis_version);
    }
}
