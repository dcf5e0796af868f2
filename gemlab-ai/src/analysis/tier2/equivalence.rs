// Tier 2: Equivalence grouping and class scoring
//
// Partitions one attribute's claims into classes of agreeing values and
// scores each class.
//
// Scoring: each claim contributes evidence e = confidence × source weight;
// a class scores 1 - Π(1 - e), so corroboration raises the score but one weak
// visual estimate never outweighs a strong instrument reading.

use std::cmp::Ordering;

use crate::analysis::types::{ClaimValue, NormalizedClaim};
use crate::config::SourceWeights;

/// Slack for floating-point comparisons against tolerances and scores
pub const EPSILON: f64 = 1e-9;

/// Evidence contributed by one claim
pub fn evidence(claim: &NormalizedClaim, weights: &SourceWeights) -> f64 {
    (claim.confidence * weights.weight(claim.source_kind)).clamp(0.0, 1.0)
}

/// Group of claims whose values agree
#[derive(Debug, Clone)]
pub struct EquivalenceClass<'a> {
    /// Ordered by claim id
    pub members: Vec<&'a NormalizedClaim>,
    /// Aggregate score in [0, 1]
    pub score: f64,
    /// Value used for the last-resort tie-break (seed value for numeric classes)
    pub representative: ClaimValue,
}

impl<'a> EquivalenceClass<'a> {
    fn new(mut members: Vec<&'a NormalizedClaim>, representative: ClaimValue, weights: &SourceWeights) -> Self {
        members.sort_by(|a, b| a.claim_id.cmp(&b.claim_id));
        let score = class_score(&members, weights);
        Self {
            members,
            score,
            representative,
        }
    }

    pub fn max_confidence(&self) -> f64 {
        self.members.iter().map(|c| c.confidence).fold(0.0, f64::max)
    }

    pub fn best_priority(&self) -> u8 {
        self.members
            .iter()
            .map(|c| c.source_kind.priority())
            .max()
            .unwrap_or(0)
    }

    pub fn contains(&self, claim_id: &str) -> bool {
        self.members.iter().any(|c| c.claim_id == claim_id)
    }
}

/// Noisy-OR over member evidence, clamped to [0, 1]
pub fn class_score(members: &[&NormalizedClaim], weights: &SourceWeights) -> f64 {
    let miss = members
        .iter()
        .map(|c| 1.0 - evidence(c, weights))
        .product::<f64>();
    (1.0 - miss).clamp(0.0, 1.0)
}

/// Group numeric claims within `tolerance` of each other
///
/// Seeds are taken strongest first (evidence, then confidence, then claim id).
/// A claim joins a seed's class only when it lies within tolerance of every
/// member already in it, so a class never spans more than `tolerance`.
/// Candidates are tried closest-to-seed first.
///
/// `claims` must already be sorted by claim id.
pub fn group_numeric<'a>(
    claims: &[&'a NormalizedClaim],
    tolerance: f64,
    weights: &SourceWeights,
) -> Vec<EquivalenceClass<'a>> {
    let mut remaining: Vec<(&'a NormalizedClaim, f64)> = claims
        .iter()
        .filter_map(|c| c.value.as_number().map(|v| (*c, v)))
        .collect();

    remaining.sort_by(|(a, _), (b, _)| {
        evidence(b, weights)
            .total_cmp(&evidence(a, weights))
            .then_with(|| b.confidence.total_cmp(&a.confidence))
            .then_with(|| a.claim_id.cmp(&b.claim_id))
    });

    let mut classes = Vec::new();

    while !remaining.is_empty() {
        let (seed, seed_value) = remaining.remove(0);

        let mut candidates: Vec<usize> = (0..remaining.len()).collect();
        candidates.sort_by(|&i, &j| {
            let di = (remaining[i].1 - seed_value).abs();
            let dj = (remaining[j].1 - seed_value).abs();
            di.total_cmp(&dj)
                .then_with(|| remaining[i].0.claim_id.cmp(&remaining[j].0.claim_id))
        });

        let mut member_values = vec![seed_value];
        let mut joined = Vec::new();
        for index in candidates {
            let value = remaining[index].1;
            if member_values
                .iter()
                .all(|m| (value - m).abs() <= tolerance + EPSILON)
            {
                member_values.push(value);
                joined.push(index);
            }
        }

        let mut members = vec![seed];
        joined.sort_unstable_by(|a, b| b.cmp(a));
        for index in joined {
            members.push(remaining.remove(index).0);
        }

        classes.push(EquivalenceClass::new(
            members,
            ClaimValue::Number(seed_value),
            weights,
        ));
    }

    classes
}

/// Group categorical claims by exact (already normalized) value
pub fn group_categorical<'a>(
    claims: &[&'a NormalizedClaim],
    weights: &SourceWeights,
) -> Vec<EquivalenceClass<'a>> {
    let mut groups: Vec<(String, Vec<&'a NormalizedClaim>)> = Vec::new();

    for claim in claims.iter().copied() {
        let Some(text) = claim.value.as_text() else {
            continue;
        };
        match groups.iter_mut().find(|(value, _)| value.as_str() == text) {
            Some((_, members)) => members.push(claim),
            None => groups.push((text.to_string(), vec![claim])),
        }
    }

    groups
        .into_iter()
        .map(|(value, members)| EquivalenceClass::new(members, ClaimValue::Text(value), weights))
        .collect()
}

/// Ranking order, best first
///
/// Score (with float slack), then member count, then highest single-claim
/// confidence, then source priority, then representative value.
pub fn rank_classes(classes: &mut [EquivalenceClass<'_>]) {
    classes.sort_by(compare_classes);
}

fn compare_classes(a: &EquivalenceClass<'_>, b: &EquivalenceClass<'_>) -> Ordering {
    let by_score = if (a.score - b.score).abs() <= EPSILON {
        Ordering::Equal
    } else {
        b.score.total_cmp(&a.score)
    };

    by_score
        .then_with(|| b.members.len().cmp(&a.members.len()))
        .then_with(|| b.max_confidence().total_cmp(&a.max_confidence()))
        .then_with(|| b.best_priority().cmp(&a.best_priority()))
        .then_with(|| compare_values(&a.representative, &b.representative))
}

fn compare_values(a: &ClaimValue, b: &ClaimValue) -> Ordering {
    match (a, b) {
        (ClaimValue::Number(x), ClaimValue::Number(y)) => x.total_cmp(y),
        (ClaimValue::Text(x), ClaimValue::Text(y)) => x.cmp(y),
        (ClaimValue::Number(_), ClaimValue::Text(_)) => Ordering::Less,
        (ClaimValue::Text(_), ClaimValue::Number(_)) => Ordering::Greater,
    }
}
