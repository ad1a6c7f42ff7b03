//! Text canonicalization and content hashing.
//!
//! Chunk deduplication and drift detection both key off the SHA-256 of the
//! *canonical* form of a chunk's text: Unicode NFC, lowercased, whitespace
//! collapsed to single spaces, trailing terminal punctuation stripped. The
//! canonical form is hashed but never stored; the chunk keeps its original
//! text.

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Canonicalize text for hashing: NFC, lowercase, single-spaced, with
/// trailing `.`/`!`/`?`/`;` stripped.
#[must_use]
pub fn canonicalize(text: &str) -> String {
    let normalized: String = text.nfc().collect();
    let lowered = normalized.to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(['.', '!', '?', ';'])
        .trim_end()
        .to_string()
}

/// SHA-256 hex digest of the canonical form of `text`.
#[must_use]
pub fn content_hash(text: &str) -> String {
    sha256_hex(canonicalize(text).as_bytes())
}

/// SHA-256 hex digest of raw bytes (document sources are hashed unmodified).
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Whitespace-token count used as the chunking budget unit.
///
/// Close enough to subword-token counts for sizing 512-token paragraph
/// chunks; an exact tokenizer is not worth the model download.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// The first sentence of `text`, truncated to `max_chars`.
///
/// Used when surfacing stored explanations to callers: one sentence,
/// bounded length, no mid-word cut.
#[must_use]
pub fn first_sentence(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let end = trimmed
        .char_indices()
        .find(|&(_, c)| matches!(c, '.' | '!' | '?'))
        .map_or(trimmed.len(), |(i, c)| i + c.len_utf8());
    let sentence = &trimmed[..end];
    if sentence.chars().count() <= max_chars {
        return sentence.to_string();
    }
    let mut out: String = sentence.chars().take(max_chars).collect();
    // Back off to the last word boundary so we never emit half a word.
    if let Some(pos) = out.rfind(' ') {
        out.truncate(pos);
    }
    out
}

/// Split a trailing `numeric unit` suffix out of a value cell.
///
/// `"25.49 km/l"` → `(Some(25.49), Some("km/l"))`; `"2,998 cc"` parses with
/// thousands separators removed; pure text returns `(None, None)`.
#[must_use]
pub fn split_numeric_unit(value: &str) -> (Option<f64>, Option<String>) {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return (None, None);
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or_default();
    let rest = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let cleaned = head.replace(',', "");
    match cleaned.parse::<f64>() {
        Ok(n) if n.is_finite() => (Some(n), rest.map(String::from)),
        _ => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_collapses_and_lowercases() {
        assert_eq!(canonicalize("  Fuel   Efficiency.  "), "fuel efficiency");
        assert_eq!(canonicalize("Engine > Power: 120 kW!"), "engine > power: 120 kw");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let once = canonicalize("Panoramic  Sunroof available.");
        assert_eq!(canonicalize(&once), once);
    }

    #[test]
    fn content_hash_ignores_case_and_spacing() {
        assert_eq!(
            content_hash("Fuel Efficiency: 25.49 km/l"),
            content_hash("fuel   efficiency: 25.49 km/l.")
        );
        assert_ne!(
            content_hash("Fuel Efficiency: 25.49 km/l"),
            content_hash("Fuel Efficiency: 24.00 km/l")
        );
    }

    #[test]
    fn content_hash_is_hex_sha256() {
        let h = content_hash("anything");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn estimate_tokens_counts_words() {
        assert_eq!(estimate_tokens("one two  three"), 3);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn first_sentence_cuts_at_terminal_punctuation() {
        assert_eq!(
            first_sentence("The engine produces 120 kW. It also has a turbo.", 160),
            "The engine produces 120 kW."
        );
    }

    #[test]
    fn first_sentence_respects_char_budget() {
        let long = "word ".repeat(60);
        let cut = first_sentence(&long, 40);
        assert!(cut.chars().count() <= 40);
        assert!(!cut.ends_with(' '));
    }

    #[test]
    fn split_numeric_unit_basic() {
        assert_eq!(
            split_numeric_unit("25.49 km/l"),
            (Some(25.49), Some("km/l".to_string()))
        );
        assert_eq!(split_numeric_unit("2,998 cc"), (Some(2998.0), Some("cc".to_string())));
        assert_eq!(split_numeric_unit("180"), (Some(180.0), None));
        assert_eq!(split_numeric_unit("Leather upholstery"), (None, None));
        assert_eq!(split_numeric_unit(""), (None, None));
    }
}
