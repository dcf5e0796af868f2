// Tier 2: Claim Normalizer
//
// Concept: Turn one extractor's loosely typed claims into canonical claims
// Synchronization: Accepts RawExtraction, outputs Vec<NormalizedClaim>
//
// Algorithm:
// 1. Validate the record (non-empty image id, confidences in [0, 1])
// 2. Derive source kind from image_type
// 3. Per claim: resolve the attribute name (unknown names are dropped)
// 4. Numeric attributes: parse locale-tolerant numbers, convert to ct / mm,
//    drop unparsable, non-positive or wrong-unit values
// 5. Categorical attributes: vocabulary match, else free text with capped
//    confidence; identifiers are compacted and uppercased
// 6. Combined dimension claims expand into length/width/depth

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde_json::Value;
use tracing::debug;

use crate::analysis::schema::check_confidence;
use crate::analysis::tier2::vocabulary::{self, AttributeName};
use crate::analysis::types::{
    Attribute, ClaimValue, NormalizedClaim, RawClaim, RawExtraction, SourceKind,
};
use crate::config::NormalizerConfig;
use crate::error::ContractError;

/// Number with an optional trailing unit: `"2,48 ct"`, `"0.5g"`, `"1.234,5"`,
/// `"2.48 ct."`. The number ends on a digit; a period is only allowed after
/// a unit.
static NUMBER_WITH_UNIT: Lazy<Result<Regex, regex_lite::Error>> = Lazy::new(|| {
    Regex::new(r"^([+-]?(?:\d+(?:[.,]\d+)*|[.,]\d+))\s*(?:([A-Za-z]+)\.?)?$")
});

/// Separator between dimensions: `x`, `×`, `*`
static DIMENSION_SEPARATOR: Lazy<Result<Regex, regex_lite::Error>> =
    Lazy::new(|| Regex::new(r"(?i)\s*(?:x|×|\*)\s*"));

/// Physical dimension of a numeric attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Mass,
    Length,
}

impl Dimension {
    fn of(attribute: Attribute) -> Option<Self> {
        match attribute {
            Attribute::Weight => Some(Self::Mass),
            Attribute::Length | Attribute::Width | Attribute::Depth => Some(Self::Length),
            _ => None,
        }
    }
}

/// Factor converting `unit` into the canonical unit of `dimension`
fn unit_factor(dimension: Dimension, unit: &str) -> Option<f64> {
    let unit = unit.trim().trim_end_matches('.').to_ascii_lowercase();
    match (dimension, unit.as_str()) {
        (Dimension::Mass, "ct" | "cts" | "carat" | "carats") => Some(1.0),
        (Dimension::Mass, "g" | "gram" | "grams") => Some(5.0),
        (Dimension::Mass, "mg" | "milligram" | "milligrams") => Some(0.005),
        (Dimension::Length, "mm" | "millimeter" | "millimeters" | "millimetre" | "millimetres") => {
            Some(1.0)
        }
        (Dimension::Length, "cm" | "centimeter" | "centimeters" | "centimetre" | "centimetres") => {
            Some(10.0)
        }
        (Dimension::Length, "in" | "inch" | "inches") => Some(25.4),
        _ => None,
    }
}

/// Parse locale-tolerant number text
///
/// When both `,` and `.` occur the last one is the decimal separator; a lone
/// separator is a decimal separator; repeated identical separators are
/// grouping. Grouping must be well formed (`1,234,567`): a leading group of
/// one to three digits, then groups of exactly three. Anything else is
/// rejected rather than guessed.
pub fn parse_decimal(text: &str) -> Option<f64> {
    let text = text.trim();
    let (sign, body) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.strip_prefix('+').unwrap_or(text)),
    };

    let commas = body.matches(',').count();
    let dots = body.matches('.').count();
    let (decimal, grouping) = match (commas, dots) {
        (0, 0) => (None, None),
        (_, 0) if commas == 1 => (Some(','), None),
        (_, 0) => (None, Some(',')),
        (0, 1) => (Some('.'), None),
        (0, _) => (None, Some('.')),
        _ if body.rfind(',') > body.rfind('.') => (Some(','), Some('.')),
        _ => (Some('.'), Some(',')),
    };

    let (integer, fraction) = match decimal.and_then(|d| body.rfind(d)) {
        Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
        None => (body, None),
    };

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());

    if let Some(fraction) = fraction {
        if fraction.is_empty() || !all_digits(fraction) {
            return None;
        }
    }

    let integer_digits = match grouping {
        Some(separator) => {
            let mut groups = integer.split(separator);
            let first = groups.next()?;
            if first.is_empty() || first.len() > 3 || !all_digits(first) {
                return None;
            }
            let mut digits = first.to_string();
            for group in groups {
                if group.len() != 3 || !all_digits(group) {
                    return None;
                }
                digits.push_str(group);
            }
            digits
        }
        None if all_digits(integer) => integer.to_string(),
        None => return None,
    };

    if integer_digits.is_empty() && fraction.is_none() {
        return None;
    }

    let canonical = match fraction {
        Some(fraction) => format!("{}{}.{}", sign, integer_digits, fraction),
        None => format!("{}{}", sign, integer_digits),
    };
    canonical.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Split number text into value and embedded unit
fn parse_number_with_unit(text: &str) -> Option<(f64, Option<String>)> {
    let regex = NUMBER_WITH_UNIT.as_ref().ok()?;
    let captures = regex.captures(text.trim())?;
    let value = parse_decimal(captures.get(1)?.as_str())?;
    let unit = captures.get(2).map(|m| m.as_str().to_string());
    Some((value, unit))
}

/// Claim normalizer (Tier 2 concept)
///
/// Pure and stateless apart from its configuration.
#[derive(Debug, Clone)]
pub struct ClaimNormalizer {
    free_text_confidence_ceiling: f64,
}

impl Default for ClaimNormalizer {
    fn default() -> Self {
        Self::from_config(&NormalizerConfig::default())
    }
}

impl ClaimNormalizer {
    pub fn from_config(config: &NormalizerConfig) -> Self {
        Self {
            free_text_confidence_ceiling: config.free_text_confidence_ceiling,
        }
    }

    /// Normalize one extraction record
    ///
    /// Data-quality problems drop individual claims; contract violations fail
    /// the whole record.
    pub fn normalize(&self, extraction: &RawExtraction) -> Result<Vec<NormalizedClaim>, ContractError> {
        if extraction.image_id.trim().is_empty() {
            return Err(ContractError::InvalidExtractionShape(
                "missing image_id".to_string(),
            ));
        }

        let source_kind = SourceKind::from_image_type(&extraction.image_type);
        let mut normalized = Vec::with_capacity(extraction.claims.len());

        for (index, claim) in extraction.claims.iter().enumerate() {
            let claim_id = format!("{}#{}", extraction.image_id, index);
            check_confidence(&claim_id, claim.confidence)?;

            let context = ClaimContext {
                claim_id,
                image_id: &extraction.image_id,
                source_kind,
            };

            match vocabulary::lookup_attribute(&claim.attribute) {
                Some(AttributeName::Single(attribute)) => {
                    normalized.extend(self.normalize_single(&context, attribute, claim));
                }
                Some(AttributeName::Dimensions) => {
                    normalized.extend(self.normalize_dimensions(&context, claim));
                }
                None => {
                    debug!(
                        image_id = %extraction.image_id,
                        attribute = %claim.attribute,
                        "Dropping claim with unknown attribute"
                    );
                }
            }
        }

        debug!(
            image_id = %extraction.image_id,
            source_kind = ?source_kind,
            raw = extraction.claims.len(),
            normalized = normalized.len(),
            "Normalized extraction"
        );

        Ok(normalized)
    }

    fn normalize_single(
        &self,
        context: &ClaimContext<'_>,
        attribute: Attribute,
        claim: &RawClaim,
    ) -> Option<NormalizedClaim> {
        match Dimension::of(attribute) {
            Some(dimension) => {
                let value = numeric_value(&claim.raw_value, claim.unit.as_deref(), dimension);
                if value.is_none() {
                    debug!(
                        claim_id = %context.claim_id,
                        attribute = %attribute,
                        raw_value = %claim.raw_value,
                        "Dropping unparsable numeric claim"
                    );
                }
                value.map(|v| context.numeric(context.claim_id.clone(), attribute, v, claim.confidence))
            }
            None => self.categorical(context, attribute, claim),
        }
    }

    fn categorical(
        &self,
        context: &ClaimContext<'_>,
        attribute: Attribute,
        claim: &RawClaim,
    ) -> Option<NormalizedClaim> {
        let text = match &claim.raw_value {
            Value::String(s) => s.clone(),
            Value::Number(n) if attribute.is_identifier() => match n.as_i64() {
                Some(i) => i.to_string(),
                None => n.to_string(),
            },
            _ => String::new(),
        };

        if text.trim().is_empty() || is_placeholder(&text) {
            debug!(
                claim_id = %context.claim_id,
                attribute = %attribute,
                raw_value = %claim.raw_value,
                "Dropping empty categorical claim"
            );
            return None;
        }

        let (value, confidence, free_text) = if attribute.is_identifier() {
            (vocabulary::normalize_identifier(&text), claim.confidence, false)
        } else if let Some(canonical) = vocabulary::canonical_value(attribute, &text) {
            (canonical, claim.confidence, false)
        } else {
            (
                vocabulary::free_text_form(attribute, &text),
                claim.confidence.min(self.free_text_confidence_ceiling),
                true,
            )
        };

        Some(NormalizedClaim {
            claim_id: context.claim_id.clone(),
            image_id: context.image_id.to_string(),
            attribute,
            value: ClaimValue::Text(value),
            unit: None,
            confidence,
            source_kind: context.source_kind,
            free_text,
        })
    }

    /// `"8.12 x 6.05 x 3.98 mm"` or `[8.12, 6.05, 3.98]` → length, width, depth
    fn normalize_dimensions(&self, context: &ClaimContext<'_>, claim: &RawClaim) -> Vec<NormalizedClaim> {
        let parts: Option<Vec<f64>> = match &claim.raw_value {
            Value::String(text) => split_dimensions(text, claim.unit.as_deref()),
            Value::Array(items) => items
                .iter()
                .map(|item| numeric_value(item, claim.unit.as_deref(), Dimension::Length))
                .collect(),
            _ => None,
        };

        let parts = match parts {
            Some(parts) if (2..=3).contains(&parts.len()) => parts,
            _ => {
                debug!(
                    claim_id = %context.claim_id,
                    raw_value = %claim.raw_value,
                    "Dropping unparsable dimensions claim"
                );
                return Vec::new();
            }
        };

        [Attribute::Length, Attribute::Width, Attribute::Depth]
            .iter()
            .zip(parts)
            .map(|(attribute, value)| {
                context.numeric(
                    format!("{}.{}", context.claim_id, attribute),
                    *attribute,
                    value,
                    claim.confidence,
                )
            })
            .collect()
    }
}

struct ClaimContext<'a> {
    claim_id: String,
    image_id: &'a str,
    source_kind: SourceKind,
}

impl ClaimContext<'_> {
    fn numeric(&self, claim_id: String, attribute: Attribute, value: f64, confidence: f64) -> NormalizedClaim {
        NormalizedClaim {
            claim_id,
            image_id: self.image_id.to_string(),
            attribute,
            value: ClaimValue::Number(value),
            unit: attribute.canonical_unit().map(str::to_string),
            confidence,
            source_kind: self.source_kind,
            free_text: false,
        }
    }
}

fn is_placeholder(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "n/a" | "na" | "none" | "null" | "unknown" | "-" | "?"
    )
}

/// Canonical positive value, or `None` when the claim must be dropped
fn numeric_value(raw: &Value, declared_unit: Option<&str>, dimension: Dimension) -> Option<f64> {
    let (value, embedded_unit) = match raw {
        Value::Number(n) => (n.as_f64()?, None),
        Value::String(text) => parse_number_with_unit(text)?,
        _ => return None,
    };

    let unit = embedded_unit.as_deref().or(declared_unit);
    let factor = match unit {
        Some(unit) => unit_factor(dimension, unit)?,
        None => 1.0,
    };

    let canonical = value * factor;
    (canonical.is_finite() && canonical > 0.0).then_some(canonical)
}

fn split_dimensions(text: &str, declared_unit: Option<&str>) -> Option<Vec<f64>> {
    let separator = DIMENSION_SEPARATOR.as_ref().ok()?;
    let pieces: Vec<(f64, Option<String>)> = separator
        .split(text.trim())
        .map(parse_number_with_unit)
        .collect::<Option<_>>()?;

    // A unit written once ("8.1 x 6.0 x 4.0 mm") applies to every part
    let shared_unit = pieces
        .iter()
        .rev()
        .find_map(|(_, unit)| unit.clone())
        .or_else(|| declared_unit.map(str::to_string));

    pieces
        .into_iter()
        .map(|(value, unit)| {
            let unit = unit.or_else(|| shared_unit.clone());
            let factor = match unit {
                Some(unit) => unit_factor(Dimension::Length, &unit)?,
                None => 1.0,
            };
            let canonical = value * factor;
            (canonical.is_finite() && canonical > 0.0).then_some(canonical)
        })
        .collect()
}
