//! Boundary validators
//!
//! Everything crossing into the core passes through here: extraction records
//! from the inference service, normalized claims handed to fusion or reloaded
//! from storage, and fused results before they are persisted. Violations are
//! [`ContractError`]s and are never coerced.

use serde_json::Value;

use crate::analysis::types::{
    AttributeKind, ClaimValue, FusionResult, NormalizedClaim, RawClaim, RawExtraction,
};
use crate::error::ContractError;

/// Parse one extraction record `{ image_id, image_type, claims: [...] }`
///
/// Claims accept `value` as an alias of `raw_value`; a missing `image_type`
/// means `unknown`.
pub fn parse_raw_extraction(record: &Value) -> Result<RawExtraction, ContractError> {
    let object = record.as_object().ok_or_else(|| {
        ContractError::InvalidExtractionShape("extraction record is not an object".to_string())
    })?;

    let image_id = match object.get("image_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
        Some(Value::String(_)) => {
            return Err(ContractError::InvalidExtractionShape(
                "image_id is empty".to_string(),
            ))
        }
        Some(_) => {
            return Err(ContractError::InvalidExtractionShape(
                "image_id is not a string".to_string(),
            ))
        }
        None => {
            return Err(ContractError::InvalidExtractionShape(
                "missing image_id".to_string(),
            ))
        }
    };

    let image_type = match object.get("image_type") {
        None | Some(Value::Null) => "unknown".to_string(),
        Some(Value::String(t)) => t.clone(),
        Some(_) => {
            return Err(ContractError::InvalidExtractionShape(format!(
                "image {}: image_type is not a string",
                image_id
            )))
        }
    };

    let entries = match object.get("claims") {
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(ContractError::InvalidExtractionShape(format!(
                "image {}: claims is not a list",
                image_id
            )))
        }
        None => {
            return Err(ContractError::InvalidExtractionShape(format!(
                "image {}: missing claims",
                image_id
            )))
        }
    };

    let claims = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| parse_raw_claim(&image_id, index, entry))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RawExtraction {
        image_id,
        image_type,
        claims,
    })
}

fn parse_raw_claim(image_id: &str, index: usize, entry: &Value) -> Result<RawClaim, ContractError> {
    let shape_error =
        |what: &str| ContractError::InvalidExtractionShape(format!("image {} claim {}: {}", image_id, index, what));

    let claim = entry.as_object().ok_or_else(|| shape_error("not an object"))?;

    let attribute = claim
        .get("attribute")
        .and_then(Value::as_str)
        .ok_or_else(|| shape_error("missing attribute"))?
        .to_string();

    let raw_value = claim
        .get("raw_value")
        .or_else(|| claim.get("value"))
        .cloned()
        .unwrap_or(Value::Null);

    let unit = match claim.get("unit") {
        None | Some(Value::Null) => None,
        Some(Value::String(u)) if u.trim().is_empty() => None,
        Some(Value::String(u)) => Some(u.trim().to_string()),
        Some(_) => return Err(shape_error("unit is not a string")),
    };

    let confidence = claim
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or_else(|| shape_error("missing numeric confidence"))?;
    check_confidence(&format!("{}#{}", image_id, index), confidence)?;

    Ok(RawClaim {
        attribute,
        raw_value,
        unit,
        confidence,
    })
}

/// Confidence must be finite and within [0, 1]
pub fn check_confidence(context: &str, value: f64) -> Result<(), ContractError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ContractError::ConfidenceOutOfRange {
            context: context.to_string(),
            value,
        })
    }
}

/// Validate a normalized claim before it reaches fusion
pub fn validate_normalized_claim(claim: &NormalizedClaim) -> Result<(), ContractError> {
    check_confidence(&claim.claim_id, claim.confidence)?;

    let mismatch = |detail: &str| ContractError::ValueKindMismatch {
        attribute: claim.attribute.to_string(),
        detail: format!("claim {}: {}", claim.claim_id, detail),
    };

    match (claim.attribute.kind(), &claim.value) {
        (AttributeKind::Numeric, ClaimValue::Number(n)) if n.is_finite() => Ok(()),
        (AttributeKind::Numeric, ClaimValue::Number(_)) => Err(mismatch("non-finite number")),
        (AttributeKind::Numeric, ClaimValue::Text(_)) => Err(mismatch("text for numeric attribute")),
        (AttributeKind::Categorical, ClaimValue::Text(s)) if !s.trim().is_empty() => Ok(()),
        (AttributeKind::Categorical, ClaimValue::Text(_)) => Err(mismatch("empty text")),
        (AttributeKind::Categorical, ClaimValue::Number(_)) => {
            Err(mismatch("number for categorical attribute"))
        }
    }
}

/// Parse a JSON list of normalized claims (stored extractions)
pub fn parse_normalized_claims(value: &Value) -> Result<Vec<NormalizedClaim>, ContractError> {
    let entries = value.as_array().ok_or_else(|| {
        ContractError::InvalidExtractionShape("normalized claims is not a list".to_string())
    })?;

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let attribute = entry
                .get("attribute")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ContractError::InvalidExtractionShape(format!(
                        "normalized claim {}: missing attribute",
                        index
                    ))
                })?;
            // Reject names outside the closed set with a precise error
            attribute.parse::<crate::analysis::types::Attribute>()?;

            let claim: NormalizedClaim = serde_json::from_value(entry.clone()).map_err(|e| {
                ContractError::InvalidExtractionShape(format!("normalized claim {}: {}", index, e))
            })?;
            validate_normalized_claim(&claim)?;
            Ok(claim)
        })
        .collect()
}

/// Check a fused result's internal consistency before persisting it
pub fn validate_fusion_result(result: &FusionResult) -> Result<(), ContractError> {
    let invalid = |detail: String| ContractError::InvalidFusionResult(format!("{}: {}", result.gemstone_id, detail));

    check_confidence("overall_confidence", result.overall_confidence)?;

    for (key, fused) in &result.attributes {
        if *key != fused.attribute {
            return Err(invalid(format!("{} stored under key {}", fused.attribute, key)));
        }
        if fused.provenance.is_empty() {
            return Err(invalid(format!("{} has a value but no provenance", key)));
        }
        check_confidence(key.as_str(), fused.confidence)?;
        if fused.conflict != result.conflicts().contains(key) {
            return Err(invalid(format!("{} conflict flag disagrees with conflicts list", key)));
        }
        if fused.provisional != result.low_confidence().contains(key) {
            return Err(invalid(format!(
                "{} provisional flag disagrees with low_confidence list",
                key
            )));
        }
    }

    if let Some(missing) = result
        .conflicts()
        .iter()
        .chain(result.low_confidence().iter())
        .find(|a| !result.attributes.contains_key(*a))
    {
        return Err(invalid(format!("{} flagged but not fused", missing)));
    }

    Ok(())
}
