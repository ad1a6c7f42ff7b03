//! Parsed brochure structures.

use product_kb_core::content_hash;
use serde::{Deserialize, Serialize};

/// YAML front-matter fields. Everything is optional; brochures are messy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrochureMeta {
    pub title: Option<String>,
    pub product: Option<String>,
    pub year: Option<i64>,
    pub locale: Option<String>,
    pub market: Option<String>,
    pub trim: Option<String>,
    pub domain: Option<String>,
    pub subdomain: Option<String>,
    pub country_code: Option<String>,
    pub model_year: Option<i64>,
    pub condition: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
}

/// One spec-value candidate extracted from a table row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecCandidate {
    pub category: String,
    pub name: String,
    /// Raw value cell, trimmed.
    pub raw_value: String,
    pub value_numeric: Option<f64>,
    pub value_text: Option<String>,
    pub unit: Option<String>,
    pub key_features: Option<String>,
    pub variant_availability: Option<String>,
    /// False when an availability symbol was unrecognized.
    pub availability_known: bool,
    /// 0-based index of the source row across all spec tables.
    pub row_index: usize,
}

/// One row chunk: the deterministic structured rendering of a table row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowChunk {
    pub text: String,
    pub content_hash: String,
    pub category: String,
    pub name: String,
    pub row_index: usize,
    /// Mirrors `SpecCandidate::availability_known`.
    pub incomplete: bool,
}

/// A feature/highlight block (one per bullet or paragraph).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureEntry {
    pub body: String,
    /// The H2 section title the entry came from.
    pub section: String,
}

/// A unique-selling-point entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UspEntry {
    pub body: String,
    pub section: String,
}

/// A prose chunk produced by paragraph chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParagraphChunk {
    pub text: String,
    pub content_hash: String,
    pub index: usize,
}

/// The full parse result. Output ordering is stable for stable input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedBrochure {
    pub meta: BrochureMeta,
    pub spec_values: Vec<SpecCandidate>,
    pub feature_blocks: Vec<FeatureEntry>,
    pub usps: Vec<UspEntry>,
    pub row_chunks: Vec<RowChunk>,
    pub paragraph_chunks: Vec<ParagraphChunk>,
    /// Human-readable warnings for skipped rows/tables.
    pub warnings: Vec<String>,
}

/// Render the deterministic spec-fact text for a row.
///
/// `"Category > Name: Value unit; Key features: …; Availability: …; Gloss: …"`
/// with absent sections omitted entirely (no placeholders).
#[must_use]
pub fn spec_fact_text(
    category: &str,
    name: &str,
    value: &str,
    unit: Option<&str>,
    key_features: Option<&str>,
    availability: Option<&str>,
    gloss: Option<&str>,
) -> String {
    let mut out = format!("{category} > {name}: {value}");
    if let Some(u) = unit.filter(|u| !u.is_empty()) {
        out.push(' ');
        out.push_str(u);
    }
    if let Some(kf) = key_features.filter(|s| !s.is_empty()) {
        out.push_str("; Key features: ");
        out.push_str(kf);
    }
    if let Some(av) = availability.filter(|s| !s.is_empty()) {
        out.push_str("; Availability: ");
        out.push_str(av);
    }
    if let Some(g) = gloss.filter(|s| !s.is_empty()) {
        out.push_str("; Gloss: ");
        out.push_str(g);
    }
    out
}

impl SpecCandidate {
    /// The row-chunk rendering of this candidate.
    #[must_use]
    pub fn to_row_chunk(&self) -> RowChunk {
        let value = if self.value_numeric.is_some() {
            // Keep the numeric rendering identical to the raw cell's number
            // (minus the unit) so hashes stay stable across re-parses.
            self.display_value()
        } else {
            self.raw_value.clone()
        };
        let text = spec_fact_text(
            &self.category,
            &self.name,
            &value,
            self.unit.as_deref(),
            self.key_features.as_deref(),
            self.variant_availability.as_deref(),
            None,
        );
        RowChunk {
            content_hash: content_hash(&text),
            text,
            category: self.category.clone(),
            name: self.name.clone(),
            row_index: self.row_index,
            incomplete: !self.availability_known,
        }
    }

    /// Displayable value string (numeric preferred).
    #[must_use]
    pub fn display_value(&self) -> String {
        if let Some(n) = self.value_numeric {
            if (n - n.trunc()).abs() < f64::EPSILON {
                format!("{}", n as i64)
            } else {
                format!("{n}")
            }
        } else {
            self.value_text.clone().unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_fact_text_omits_absent_sections() {
        assert_eq!(
            spec_fact_text("Engine", "Power", "120", Some("kW"), None, None, None),
            "Engine > Power: 120 kW"
        );
        assert_eq!(
            spec_fact_text(
                "Engine",
                "Fuel Efficiency",
                "25.49",
                Some("km/l"),
                Some("Std"),
                Some("Standard"),
                None,
            ),
            "Engine > Fuel Efficiency: 25.49 km/l; Key features: Std; Availability: Standard"
        );
        assert_eq!(
            spec_fact_text("Comfort", "Seats", "Leather", None, None, None, Some("Soft.")),
            "Comfort > Seats: Leather; Gloss: Soft."
        );
    }

    #[test]
    fn row_chunk_hash_matches_text() {
        let cand = SpecCandidate {
            category: "Engine".to_string(),
            name: "Displacement".to_string(),
            raw_value: "2998 cc".to_string(),
            value_numeric: Some(2998.0),
            value_text: None,
            unit: Some("cc".to_string()),
            key_features: None,
            variant_availability: None,
            availability_known: true,
            row_index: 0,
        };
        let chunk = cand.to_row_chunk();
        assert_eq!(chunk.text, "Engine > Displacement: 2998 cc");
        assert_eq!(chunk.content_hash, content_hash(&chunk.text));
        assert!(!chunk.incomplete);
    }
}
