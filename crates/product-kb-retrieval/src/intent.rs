//! Keyword/regex intent classification.
//!
//! Maps a natural-language question onto one of the retrieval intents
//! with a confidence in `[0, 1]`. Comparison phrasing wins over spec
//! phrasing ("compare the mileage of X and Y" is a comparison).

use product_kb_core::Intent;
use regex::Regex;
use std::sync::LazyLock;

static COMPARISON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(compare|versus|vs\.?|difference between|better than|or the)\b")
        .expect("static regex")
});
static USP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(usp|unique selling|why (should|buy|choose)|stands? out|selling point)\b")
        .expect("static regex")
});
static FAQ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(how (do|can|often|to)|warranty|service interval|maintenance|charging time|faq)\b")
        .expect("static regex")
});
static SPEC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(what is|what's|how (much|many)|spec|mileage|efficiency|power|torque|displacement|capacity|dimensions?|length|width|height|weight|wheelbase|airbags?|seats?|sunroof|price|range|top speed)\b",
    )
    .expect("static regex")
});

/// A classified intent with its confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classified {
    pub intent: Intent,
    pub confidence: f64,
}

/// Classify a question.
#[must_use]
pub fn classify(question: &str) -> Classified {
    let q = question.trim();
    if q.is_empty() {
        return Classified {
            intent: Intent::Unknown,
            confidence: 0.0,
        };
    }

    if COMPARISON_RE.is_match(q) {
        return Classified {
            intent: Intent::Comparison,
            confidence: 0.9,
        };
    }
    if USP_RE.is_match(q) {
        return Classified {
            intent: Intent::UspLookup,
            confidence: 0.85,
        };
    }
    if FAQ_RE.is_match(q) {
        return Classified {
            intent: Intent::Faq,
            confidence: 0.7,
        };
    }
    if SPEC_RE.is_match(q) {
        return Classified {
            intent: Intent::SpecLookup,
            confidence: 0.8,
        };
    }

    Classified {
        intent: Intent::Unknown,
        confidence: 0.2,
    }
}

/// Resolve the effective intent given an optional caller hint.
///
/// The hint wins while the classifier is below the confidence threshold;
/// a confident classification overrides a stale hint.
#[must_use]
pub fn resolve(question: &str, hint: Option<Intent>, threshold: f64) -> Classified {
    let classified = classify(question);
    match hint {
        Some(hinted) if classified.confidence < threshold => Classified {
            intent: hinted,
            confidence: threshold,
        },
        _ => classified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_questions_classify_as_spec_lookup() {
        let c = classify("What is the fuel efficiency?");
        assert_eq!(c.intent, Intent::SpecLookup);
        assert!(c.confidence >= 0.8);

        assert_eq!(classify("how much power does it make").intent, Intent::SpecLookup);
        assert_eq!(classify("boot capacity in litres?").intent, Intent::SpecLookup);
    }

    #[test]
    fn comparison_beats_spec_phrasing() {
        let c = classify("Compare the mileage of Camry with Accord");
        assert_eq!(c.intent, Intent::Comparison);
        assert!(c.confidence >= 0.9);
        assert_eq!(classify("Camry vs Accord").intent, Intent::Comparison);
    }

    #[test]
    fn usp_questions() {
        assert_eq!(
            classify("Why should I buy the Camry?").intent,
            Intent::UspLookup
        );
        assert_eq!(classify("what are its unique selling points").intent, Intent::UspLookup);
    }

    #[test]
    fn faq_questions() {
        assert_eq!(classify("How often is the service interval?").intent, Intent::Faq);
        assert_eq!(classify("what warranty does it come with").intent, Intent::Faq);
    }

    #[test]
    fn gibberish_is_unknown() {
        let c = classify("tell me things");
        assert_eq!(c.intent, Intent::Unknown);
        assert!(c.confidence < 0.5);
        assert_eq!(classify("").intent, Intent::Unknown);
    }

    #[test]
    fn hint_applies_when_classifier_is_unsure() {
        let resolved = resolve("tell me things", Some(Intent::Faq), 0.8);
        assert_eq!(resolved.intent, Intent::Faq);

        // A confident classification overrides the hint.
        let resolved = resolve("Compare Camry with Accord", Some(Intent::Faq), 0.8);
        assert_eq!(resolved.intent, Intent::Comparison);
    }
}
