// Tier 3: Conflict Detector
//
// Concept: Decide whether a fused attribute's winner is contested
// Synchronization: Accepts ranked equivalence classes and the fused value,
// outputs ConflictAssessment
//
// Algorithm:
// 1. Competing class: runner-up score >= winner score × (1 - margin)
// 2. Dissenting claim: a claim outside the winning class with
//    confidence >= min_confidence that disagrees with the fused value
//    (numeric: beyond the review tolerance; categorical: any other value)
// 3. Provisional: winner score < min_confidence

use tracing::info;

use crate::analysis::tier2::equivalence::{EquivalenceClass, EPSILON};
use crate::analysis::types::{Attribute, ClaimValue};
use crate::config::FusionConfig;

/// Why an attribute was flagged
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictReason {
    /// Another class scored too close to the winner
    CompetingClass { winner_score: f64, runner_up_score: f64 },
    /// A confident claim outside the winning class disagrees
    DissentingClaim { claim_id: String, confidence: f64 },
}

/// Outcome for one attribute
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConflictAssessment {
    pub reasons: Vec<ConflictReason>,
    pub provisional: bool,
}

impl ConflictAssessment {
    pub fn is_conflict(&self) -> bool {
        !self.reasons.is_empty()
    }
}

/// Conflict detector (Tier 3 concept)
///
/// Pure judgement over already-ranked classes; no side effects beyond logging.
#[derive(Debug, Clone)]
pub struct ConflictDetector {
    conflict_margin: f64,
    min_confidence: f64,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::from_config(&FusionConfig::default())
    }
}

impl ConflictDetector {
    pub fn from_config(config: &FusionConfig) -> Self {
        Self {
            conflict_margin: config.conflict_margin,
            min_confidence: config.min_confidence,
        }
    }

    /// Assess one attribute
    ///
    /// `ranked` is best first and non-empty; `review_tolerance` is `None` for
    /// categorical attributes.
    pub fn assess(
        &self,
        attribute: Attribute,
        ranked: &[EquivalenceClass<'_>],
        final_value: &ClaimValue,
        review_tolerance: Option<f64>,
    ) -> ConflictAssessment {
        let Some((winner, losers)) = ranked.split_first() else {
            return ConflictAssessment::default();
        };

        let mut assessment = ConflictAssessment {
            reasons: Vec::new(),
            provisional: winner.score + EPSILON < self.min_confidence,
        };

        if let Some(runner_up) = losers.first() {
            let threshold = winner.score * (1.0 - self.conflict_margin);
            if runner_up.score + EPSILON >= threshold {
                assessment.reasons.push(ConflictReason::CompetingClass {
                    winner_score: winner.score,
                    runner_up_score: runner_up.score,
                });
            }
        }

        for claim in losers.iter().flat_map(|class| class.members.iter()) {
            if claim.confidence + EPSILON < self.min_confidence {
                continue;
            }
            let disagrees = match (final_value, &claim.value, review_tolerance) {
                (ClaimValue::Number(fused), ClaimValue::Number(v), Some(tolerance)) => {
                    (v - fused).abs() > tolerance + EPSILON
                }
                (fused, other, _) => fused != other,
            };
            if disagrees {
                assessment.reasons.push(ConflictReason::DissentingClaim {
                    claim_id: claim.claim_id.clone(),
                    confidence: claim.confidence,
                });
            }
        }

        if assessment.is_conflict() {
            info!(
                attribute = %attribute,
                winner = %final_value,
                winner_score = winner.score,
                reasons = ?assessment.reasons,
                "Conflicting claims detected"
            );
        }

        assessment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tier2::equivalence::{group_categorical, group_numeric, rank_classes};
    use crate::analysis::types::{NormalizedClaim, SourceKind};
    use crate::config::SourceWeights;

    fn claim(id: &str, attribute: Attribute, value: ClaimValue, confidence: f64, kind: SourceKind) -> NormalizedClaim {
        NormalizedClaim {
            claim_id: id.to_string(),
            image_id: id.to_string(),
            attribute,
            value,
            unit: None,
            confidence,
            source_kind: kind,
            free_text: false,
        }
    }

    fn ranked_numeric(claims: &[NormalizedClaim]) -> Vec<EquivalenceClass<'_>> {
        let refs: Vec<&NormalizedClaim> = claims.iter().collect();
        let mut classes = group_numeric(&refs, 0.02, &SourceWeights::default());
        rank_classes(&mut classes);
        classes
    }

    #[test]
    fn test_low_confidence_dissent_is_not_conflict() {
        let claims = [
            claim("a", Attribute::Weight, ClaimValue::Number(2.48), 0.9, SourceKind::Instrument),
            claim("b", Attribute::Weight, ClaimValue::Number(2.48), 0.85, SourceKind::Label),
            claim("c", Attribute::Weight, ClaimValue::Number(2.40), 0.5, SourceKind::VisualEstimate),
        ];
        let ranked = ranked_numeric(&claims);

        let assessment = ConflictDetector::default().assess(
            Attribute::Weight,
            &ranked,
            &ClaimValue::Number(2.48),
            Some(0.01),
        );
        assert!(!assessment.is_conflict());
        assert!(!assessment.provisional);
    }

    #[test]
    fn test_confident_dissent_is_conflict() {
        let claims = [
            claim("a", Attribute::Weight, ClaimValue::Number(2.48), 0.9, SourceKind::Instrument),
            claim("b", Attribute::Weight, ClaimValue::Number(2.48), 0.85, SourceKind::Label),
            claim("c", Attribute::Weight, ClaimValue::Number(2.40), 0.75, SourceKind::Instrument),
        ];
        let ranked = ranked_numeric(&claims);

        let assessment = ConflictDetector::default().assess(
            Attribute::Weight,
            &ranked,
            &ClaimValue::Number(2.48),
            Some(0.01),
        );
        assert_eq!(
            assessment.reasons,
            vec![ConflictReason::DissentingClaim {
                claim_id: "c".to_string(),
                confidence: 0.75
            }]
        );
    }

    #[test]
    fn test_close_runner_up_is_conflict() {
        let claims = [
            claim("a", Attribute::Cut, ClaimValue::Text("oval".into()), 0.8, SourceKind::Label),
            claim("b", Attribute::Cut, ClaimValue::Text("round".into()), 0.8, SourceKind::Label),
        ];
        let refs: Vec<&NormalizedClaim> = claims.iter().collect();
        let mut ranked = group_categorical(&refs, &SourceWeights::default());
        rank_classes(&mut ranked);

        let assessment = ConflictDetector::default().assess(
            Attribute::Cut,
            &ranked,
            &ranked[0].representative.clone(),
            None,
        );
        assert!(assessment.is_conflict());
        assert!(matches!(assessment.reasons[0], ConflictReason::CompetingClass { .. }));
    }

    #[test]
    fn test_single_weak_claim_is_provisional_without_conflict() {
        let claims = [claim("a", Attribute::Cut, ClaimValue::Text("oval".into()), 0.55, SourceKind::Label)];
        let refs: Vec<&NormalizedClaim> = claims.iter().collect();
        let ranked = group_categorical(&refs, &SourceWeights::default());

        let assessment =
            ConflictDetector::default().assess(Attribute::Cut, &ranked, &ClaimValue::Text("oval".into()), None);
        assert!(assessment.provisional);
        assert!(!assessment.is_conflict());
    }
}
