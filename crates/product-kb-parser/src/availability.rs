//! Variant-availability cell normalization.

/// The normalized reading of an availability cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityReading {
    /// Normalized availability text stored on the spec value.
    pub normalized: String,
    /// False when the symbol was unrecognized and the literal text was
    /// preserved (the owning chunk becomes `incomplete`).
    pub known: bool,
}

/// Normalize an availability cell.
///
/// `✓ ● Y` → present; `✗ ○ N —` → absent; `Standard` → all variants;
/// `Exclusive to X` → only X; anything else keeps the literal text and is
/// flagged unknown.
#[must_use]
pub fn parse_availability(cell: &str) -> AvailabilityReading {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return AvailabilityReading {
            normalized: String::new(),
            known: true,
        };
    }

    match trimmed {
        "✓" | "●" | "Y" | "y" => {
            return AvailabilityReading {
                normalized: "present".to_string(),
                known: true,
            };
        }
        "✗" | "○" | "N" | "n" | "—" | "-" => {
            return AvailabilityReading {
                normalized: "absent".to_string(),
                known: true,
            };
        }
        _ => {}
    }

    if trimmed.eq_ignore_ascii_case("standard") || trimmed.eq_ignore_ascii_case("std") {
        return AvailabilityReading {
            normalized: "all variants".to_string(),
            known: true,
        };
    }

    const EXCLUSIVE_PREFIX: &str = "exclusive to ";
    if trimmed.len() > EXCLUSIVE_PREFIX.len()
        && trimmed.is_char_boundary(EXCLUSIVE_PREFIX.len())
        && trimmed[..EXCLUSIVE_PREFIX.len()].eq_ignore_ascii_case(EXCLUSIVE_PREFIX)
    {
        // Preserve the original casing of the variant name.
        let variant = trimmed[EXCLUSIVE_PREFIX.len()..].trim();
        return AvailabilityReading {
            normalized: format!("only {variant}"),
            known: true,
        };
    }

    AvailabilityReading {
        normalized: trimmed.to_string(),
        known: false,
    }
}

/// Whether a cell looks like availability content rather than descriptive
/// key-features text. Used for the 4-column `Extra` heuristic.
#[must_use]
pub fn looks_like_availability(cell: &str) -> bool {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return false;
    }
    let reading = parse_availability(trimmed);
    if reading.known {
        return true;
    }
    // Short variant lists ("ZX, VX", "GL / GLX") read as availability;
    // multi-word prose reads as key features.
    let word_count = trimmed.split_whitespace().count();
    word_count <= 3 && trimmed.contains([',', '/'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_map_to_present_absent() {
        assert_eq!(parse_availability("✓").normalized, "present");
        assert_eq!(parse_availability("●").normalized, "present");
        assert_eq!(parse_availability("Y").normalized, "present");
        assert_eq!(parse_availability("✗").normalized, "absent");
        assert_eq!(parse_availability("○").normalized, "absent");
        assert_eq!(parse_availability("N").normalized, "absent");
        assert_eq!(parse_availability("—").normalized, "absent");
        assert!(parse_availability("✓").known);
    }

    #[test]
    fn standard_means_all_variants() {
        assert_eq!(parse_availability("Standard").normalized, "all variants");
        assert_eq!(parse_availability("std").normalized, "all variants");
    }

    #[test]
    fn exclusive_to_names_the_variant() {
        let r = parse_availability("Exclusive to ZX Trim");
        assert_eq!(r.normalized, "only ZX Trim");
        assert!(r.known);
    }

    #[test]
    fn unknown_symbols_preserve_literal_and_flag() {
        let r = parse_availability("◑ partial");
        assert_eq!(r.normalized, "◑ partial");
        assert!(!r.known);
    }

    #[test]
    fn extra_column_heuristic() {
        assert!(looks_like_availability("Standard"));
        assert!(looks_like_availability("✓"));
        assert!(looks_like_availability("ZX, VX"));
        assert!(!looks_like_availability("Projector headlamps with DRLs"));
        assert!(!looks_like_availability(""));
    }
}
