// Tier 2: Controlled vocabularies
//
// Maps extractor attribute names onto the closed attribute set and
// categorical text onto canonical vocabulary entries. Lookups are pure and
// case/whitespace-insensitive.

use crate::analysis::types::Attribute;

/// What an extractor's attribute name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeName {
    Single(Attribute),
    /// Combined `L x W x D` measurement, split by the normalizer
    Dimensions,
}

/// Resolve an extractor attribute name (`"Carat Weight"`, `"colour"`, …)
pub fn lookup_attribute(name: &str) -> Option<AttributeName> {
    let key = name
        .trim()
        .to_ascii_lowercase()
        .replace([' ', '-', '.'], "_");

    let attribute = match key.as_str() {
        "weight" | "carat" | "carats" | "carat_weight" | "mass" => Attribute::Weight,
        "length" => Attribute::Length,
        "width" => Attribute::Width,
        "depth" | "height" => Attribute::Depth,
        "cut" | "shape" | "shape_cut" | "shape_and_cut" => Attribute::Cut,
        "color" | "colour" | "color_grade" | "hue" => Attribute::Color,
        "clarity" | "clarity_grade" => Attribute::Clarity,
        "origin" | "country_of_origin" | "geographic_origin" => Attribute::Origin,
        "gemstone_code" | "code" | "stock_number" | "sku" | "item_code" => Attribute::GemstoneCode,
        "certification_lab" | "lab" | "laboratory" | "certificate_lab" | "issuing_lab" => {
            Attribute::CertificationLab
        }
        "certification_number" | "certificate_number" | "cert_number" | "report_number"
        | "report_no" => Attribute::CertificationNumber,
        "dimensions" | "measurements" | "size" => return Some(AttributeName::Dimensions),
        _ => return None,
    };
    Some(AttributeName::Single(attribute))
}

/// Collapse internal whitespace and trim
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Display form of a categorical value outside the vocabulary
///
/// Cut names are lowercase, every other categorical attribute is uppercase.
pub fn free_text_form(attribute: Attribute, text: &str) -> String {
    let collapsed = collapse_whitespace(text);
    match attribute {
        Attribute::Cut => collapsed.to_lowercase(),
        _ => collapsed.to_uppercase(),
    }
}

/// Identifiers: uppercase, all whitespace removed
pub fn normalize_identifier(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Map categorical text onto its vocabulary entry
///
/// Returns `None` when the attribute has no vocabulary or the text is not in it.
pub fn canonical_value(attribute: Attribute, text: &str) -> Option<String> {
    match attribute {
        Attribute::Cut => canonical_cut(text),
        Attribute::Color => canonical_color(text),
        Attribute::Clarity => canonical_clarity(text),
        Attribute::Origin => canonical_origin(text),
        Attribute::CertificationLab => canonical_lab(text),
        _ => None,
    }
}

// ============================================================================
// Cut / shape
// ============================================================================

const CUTS: &[&str] = &[
    "round", "oval", "cushion", "emerald", "pear", "marquise", "princess", "heart", "radiant",
    "asscher", "trillion", "baguette", "cabochon", "octagon", "square", "rectangle", "briolette",
    "rose", "antique", "fancy",
];

/// Words that qualify a shape without changing it ("Oval Mixed Cut")
const CUT_QUALIFIERS: &[&str] = &[
    "cut", "shape", "shaped", "mixed", "brilliant", "modified", "step", "faceted",
];

fn canonical_cut(text: &str) -> Option<String> {
    let lowered = collapse_whitespace(&text.to_lowercase().replace('-', " "));
    let alias = match lowered.as_str() {
        "brilliant" | "round brilliant" | "rbc" => Some("round"),
        "octagonal" => Some("octagon"),
        "cab" => Some("cabochon"),
        "drop" | "teardrop" => Some("pear"),
        "navette" => Some("marquise"),
        "trilliant" | "triangle" => Some("trillion"),
        "rectangular" => Some("rectangle"),
        "cushion antique" | "antique cushion" => Some("cushion"),
        _ => None,
    };
    if let Some(cut) = alias {
        return Some(cut.to_string());
    }

    let words: Vec<&str> = lowered
        .split(' ')
        .filter(|w| !CUT_QUALIFIERS.contains(w))
        .collect();

    match words.as_slice() {
        [single] if CUTS.contains(single) => Some((*single).to_string()),
        [] if lowered.contains("brilliant") => Some("round".to_string()),
        _ => None,
    }
}

// ============================================================================
// Color
// ============================================================================

const COLOR_HUES: &[&str] = &[
    "RED", "PINK", "ORANGE", "YELLOW", "GREEN", "BLUE", "VIOLET", "PURPLE", "BROWN", "BLACK",
    "WHITE", "GRAY", "COLORLESS", "PADPARADSCHA", "PIGEON BLOOD", "ROYAL BLUE", "CORNFLOWER BLUE",
    "VIVID GREEN", "PINKISH ORANGE", "PURPLISH RED", "BLUISH GREEN", "GREENISH BLUE",
];

fn canonical_color(text: &str) -> Option<String> {
    let upper = collapse_whitespace(&text.to_uppercase().replace(['-', '_'], " "));

    if upper.len() == 1 {
        let grade = upper.chars().next()?;
        return ('D'..='Z').contains(&grade).then(|| upper.clone());
    }

    let aliased = match upper.as_str() {
        "COLOURLESS" | "COLOR LESS" => "COLORLESS",
        "GREY" => "GRAY",
        "PIGEON'S BLOOD" | "PIGEONS BLOOD" | "PIGEON BLOOD RED" => "PIGEON BLOOD",
        "PADPARADSHA" | "PADMARAGA" => "PADPARADSCHA",
        other => other,
    };

    COLOR_HUES
        .contains(&aliased)
        .then(|| aliased.to_string())
}

// ============================================================================
// Clarity
// ============================================================================

const CLARITY_GRADES: &[&str] = &[
    "FL", "IF", "VVS1", "VVS2", "VS1", "VS2", "SI1", "SI2", "I1", "I2", "I3", "EYE CLEAN",
];

fn canonical_clarity(text: &str) -> Option<String> {
    let upper = collapse_whitespace(&text.to_uppercase().replace(['-', '_'], " "));

    match upper.as_str() {
        "FLAWLESS" => return Some("FL".to_string()),
        "INTERNALLY FLAWLESS" => return Some("IF".to_string()),
        "EYE CLEAN" | "EYECLEAN" | "EC" => return Some("EYE CLEAN".to_string()),
        _ => {}
    }

    let compact: String = upper.chars().filter(|c| !c.is_whitespace()).collect();
    CLARITY_GRADES
        .iter()
        .find(|grade| **grade == compact)
        .map(|grade| grade.to_string())
}

// ============================================================================
// Origin
// ============================================================================

const ORIGINS: &[&str] = &[
    "MYANMAR", "SRI LANKA", "THAILAND", "CAMBODIA", "VIETNAM", "MADAGASCAR", "MOZAMBIQUE",
    "TANZANIA", "KENYA", "COLOMBIA", "BRAZIL", "ZAMBIA", "ZIMBABWE", "AFGHANISTAN", "PAKISTAN",
    "INDIA", "KASHMIR", "AUSTRALIA", "NIGERIA", "ETHIOPIA", "RUSSIA", "USA", "TAJIKISTAN",
    "GREENLAND", "MALAWI",
];

fn canonical_origin(text: &str) -> Option<String> {
    let upper = collapse_whitespace(&text.to_uppercase().replace(['-', '_'], " "));
    let trimmed = upper.trim_end_matches('.').trim();

    let aliased = match trimmed {
        "BURMA" | "BURMESE" | "MOGOK" => "MYANMAR",
        "CEYLON" | "CEYLONESE" | "SRILANKA" => "SRI LANKA",
        "SIAM" | "THAI" => "THAILAND",
        "UNITED STATES" | "UNITED STATES OF AMERICA" | "US" | "MONTANA" => "USA",
        "COLOMBIAN" => "COLOMBIA",
        "BRAZILIAN" => "BRAZIL",
        "ZAMBIAN" => "ZAMBIA",
        "MADAGASCAN" | "MALAGASY" => "MADAGASCAR",
        other => other,
    };

    ORIGINS.contains(&aliased).then(|| aliased.to_string())
}

// ============================================================================
// Certification lab
// ============================================================================

const LABS: &[&str] = &[
    "GIA", "IGI", "GRS", "SSEF", "GUBELIN", "AGL", "LOTUS", "GIT", "HRD", "AIGS",
];

fn canonical_lab(text: &str) -> Option<String> {
    let upper = collapse_whitespace(&text.to_uppercase().replace('Ü', "U"));

    let aliased = match upper.as_str() {
        "GEMOLOGICAL INSTITUTE OF AMERICA" => Some("GIA"),
        "INTERNATIONAL GEMOLOGICAL INSTITUTE" => Some("IGI"),
        "SWISS GEMMOLOGICAL INSTITUTE" => Some("SSEF"),
        "AMERICAN GEMOLOGICAL LABORATORIES" => Some("AGL"),
        "GEM AND JEWELRY INSTITUTE OF THAILAND" => Some("GIT"),
        "ASIAN INSTITUTE OF GEMOLOGICAL SCIENCES" => Some("AIGS"),
        _ => None,
    };
    if let Some(lab) = aliased {
        return Some(lab.to_string());
    }

    // "GRS GEMRESEARCH", "GUBELIN GEM LAB", "LOTUS GEMOLOGY"
    upper
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find_map(|word| LABS.iter().find(|lab| **lab == word))
        .map(|lab| lab.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_aliases() {
        assert_eq!(
            lookup_attribute("Carat Weight"),
            Some(AttributeName::Single(Attribute::Weight))
        );
        assert_eq!(
            lookup_attribute("colour"),
            Some(AttributeName::Single(Attribute::Color))
        );
        assert_eq!(
            lookup_attribute("report-number"),
            Some(AttributeName::Single(Attribute::CertificationNumber))
        );
        assert_eq!(lookup_attribute("measurements"), Some(AttributeName::Dimensions));
        assert_eq!(lookup_attribute("fluorescence"), None);
    }

    #[test]
    fn test_cut_vocabulary() {
        assert_eq!(canonical_value(Attribute::Cut, "Oval"), Some("oval".to_string()));
        assert_eq!(canonical_value(Attribute::Cut, " OVAL  Mixed Cut "), Some("oval".to_string()));
        assert_eq!(canonical_value(Attribute::Cut, "Round Brilliant"), Some("round".to_string()));
        assert_eq!(canonical_value(Attribute::Cut, "Emerald-cut"), Some("emerald".to_string()));
        assert_eq!(canonical_value(Attribute::Cut, "star of david"), None);
    }

    #[test]
    fn test_color_vocabulary() {
        assert_eq!(canonical_value(Attribute::Color, "g"), Some("G".to_string()));
        assert_eq!(canonical_value(Attribute::Color, "Royal  blue"), Some("ROYAL BLUE".to_string()));
        assert_eq!(
            canonical_value(Attribute::Color, "pigeon's blood"),
            Some("PIGEON BLOOD".to_string())
        );
        assert_eq!(canonical_value(Attribute::Color, "A"), None);
        assert_eq!(canonical_value(Attribute::Color, "sunset glow"), None);
    }

    #[test]
    fn test_clarity_vocabulary() {
        assert_eq!(canonical_value(Attribute::Clarity, "vvs 1"), Some("VVS1".to_string()));
        assert_eq!(canonical_value(Attribute::Clarity, "Eye-clean"), Some("EYE CLEAN".to_string()));
        assert_eq!(canonical_value(Attribute::Clarity, "Flawless"), Some("FL".to_string()));
        assert_eq!(canonical_value(Attribute::Clarity, "slightly included"), None);
    }

    #[test]
    fn test_origin_aliases() {
        assert_eq!(canonical_value(Attribute::Origin, "Burma"), Some("MYANMAR".to_string()));
        assert_eq!(canonical_value(Attribute::Origin, "ceylon"), Some("SRI LANKA".to_string()));
        assert_eq!(canonical_value(Attribute::Origin, "Sri  Lanka"), Some("SRI LANKA".to_string()));
        assert_eq!(canonical_value(Attribute::Origin, "Atlantis"), None);
    }

    #[test]
    fn test_lab_vocabulary() {
        assert_eq!(canonical_value(Attribute::CertificationLab, "gia"), Some("GIA".to_string()));
        assert_eq!(
            canonical_value(Attribute::CertificationLab, "Gübelin Gem Lab"),
            Some("GUBELIN".to_string())
        );
        assert_eq!(
            canonical_value(Attribute::CertificationLab, "GRS GemResearch Swisslab"),
            Some("GRS".to_string())
        );
        assert_eq!(canonical_value(Attribute::CertificationLab, "Bob's Gems"), None);
    }

    #[test]
    fn test_identifier_and_free_text_forms() {
        assert_eq!(normalize_identifier(" ab 12-34 "), "AB12-34");
        assert_eq!(free_text_form(Attribute::Cut, "  Star  Of David "), "star of david");
        assert_eq!(free_text_form(Attribute::Color, "sunset  glow"), "SUNSET GLOW");
    }

    #[test]
    fn test_identifiers_have_no_vocabulary() {
        assert_eq!(canonical_value(Attribute::GemstoneCode, "GIA"), None);
        assert_eq!(canonical_value(Attribute::CertificationNumber, "123"), None);
    }
}
