// Tier 1: Prompt builders for the vision service
//
// Every extraction prompt lists the closed attribute set and the exact JSON
// shape the normalizer expects back.

use crate::analysis::types::{Attribute, ImageCategory};

pub fn build_classification_prompt() -> String {
    r#"Classify this photograph of a gemstone listing into exactly one category.

CATEGORIES:
- instrument: a scale, gauge or caliper display showing a reading
- label: a printed or handwritten label, tag, or laboratory certificate
- gem_macro: a close-up of the gemstone itself
- unknown: anything else

Output ONLY valid JSON, nothing else:
{"category": "instrument|label|gem_macro|unknown", "confidence": 0.0}"#
        .to_string()
}

/// Extraction prompt for one category; `None` for `Unknown`
pub fn build_extraction_prompt(category: ImageCategory, image_id: &str) -> Option<String> {
    let (image_type, focus) = match category {
        ImageCategory::Instrument => (
            "instrument",
            "Read the value shown on the instrument display. Report the unit exactly as displayed (ct, g, mm, ...).",
        ),
        ImageCategory::Label => (
            "label",
            "Transcribe the attributes printed on the label or certificate. If it is a laboratory certificate, set image_type to \"certificate\".",
        ),
        ImageCategory::GemMacro => (
            "gem_macro",
            "Estimate the visible attributes of the stone (cut, color, clarity). Do not guess weights or report numbers you cannot see.",
        ),
        ImageCategory::Unknown => return None,
    };

    let attributes = Attribute::ALL
        .iter()
        .map(|a| a.as_str())
        .chain(std::iter::once("dimensions"))
        .collect::<Vec<_>>()
        .join(", ");

    Some(format!(
        r#"Extract gemstone attributes from this image.

INSTRUCTIONS:
{focus}

ATTRIBUTES (use these names only): {attributes}

SCHEMA:
{{
  "image_id": "{image_id}",
  "image_type": "{image_type}",
  "claims": [
    {{"attribute": "weight", "raw_value": "2,48", "unit": "ct", "confidence": 0.9}}
  ]
}}

RULES:
- One claim per attribute reading; omit attributes that are not visible
- raw_value is the text as written, including its decimal separator
- "dimensions" may hold a combined reading such as "8.12 x 6.05 x 3.98 mm"
- confidence is a number between 0 and 1
- Output ONLY the JSON object, no markdown, no explanations

JSON OUTPUT:"#
    ))
}
