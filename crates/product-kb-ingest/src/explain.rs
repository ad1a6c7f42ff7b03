//! Per-row one-sentence explanation generation with strict guardrails.
//!
//! The model is pinned to a single field-bounded sentence. The validator
//! rejects anything over 200 characters, containing line breaks, missing
//! terminal punctuation, or containing an alphanumeric token (stemmed,
//! case-insensitive) that does not occur in the concatenated source
//! fields. One retry; persistent failure yields `None` and the caller
//! records `explanation_failed`.

use asupersync::Cx;
use asupersync::http::h1::HttpClient;
use asupersync::time::{timeout, wall_now};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use std::time::Duration;

/// Boxed future used for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Maximum stored explanation length.
pub const MAX_EXPLANATION_CHARS: usize = 200;

/// The source fields an explanation may draw from.
#[derive(Debug, Clone, Default)]
pub struct RowFields {
    pub category: String,
    pub name: String,
    pub value: String,
    pub unit: Option<String>,
    pub key_features: Option<String>,
    pub variant_availability: Option<String>,
}

impl RowFields {
    /// All fields joined into one haystack for token containment checks.
    #[must_use]
    pub fn concatenated(&self) -> String {
        let mut out = format!("{} {} {}", self.category, self.name, self.value);
        for opt in [
            self.unit.as_deref(),
            self.key_features.as_deref(),
            self.variant_availability.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            out.push(' ');
            out.push_str(opt);
        }
        out
    }
}

/// Generates one-sentence explanations. Failure-tolerant: `Ok(None)`
/// means "no explanation"; the pipeline never fails an ingest over this.
pub trait ExplanationClient: Send + Sync {
    fn explain<'a>(&'a self, cx: &'a Cx, fields: &'a RowFields) -> BoxFuture<'a, Option<String>>;
}

// ────────────────────────────────────────────────────────────────────
// Validation
// ────────────────────────────────────────────────────────────────────

/// Strip common English suffixes so "seats"/"seat" and
/// "heated"/"heating"/"heat" compare equal.
fn stem(token: &str) -> String {
    let lower = token.to_lowercase();
    for suffix in ["ing", "ed", "es", "s"] {
        if let Some(stripped) = lower.strip_suffix(suffix)
            && stripped.len() >= 3
        {
            return stripped.to_string();
        }
    }
    lower
}

fn alnum_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(stem)
        .collect()
}

/// Validate a candidate explanation against the guardrails.
#[must_use]
pub fn validate_explanation(candidate: &str, fields: &RowFields) -> bool {
    let trimmed = candidate.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_EXPLANATION_CHARS {
        return false;
    }
    if trimmed.contains('\n') || trimmed.contains('\r') {
        return false;
    }
    if !trimmed.ends_with(['.', '!', '?']) {
        return false;
    }
    // Exactly one terminal mark, not "..." or "?!".
    let body = &trimmed[..trimmed.len() - 1];
    if body.ends_with(['.', '!', '?']) {
        return false;
    }

    let allowed: HashSet<String> = alnum_tokens(&fields.concatenated()).into_iter().collect();
    alnum_tokens(trimmed).iter().all(|t| allowed.contains(t))
}

// ────────────────────────────────────────────────────────────────────
// Stub client
// ────────────────────────────────────────────────────────────────────

/// Deterministic offline client: renders the fields into a sentence that
/// passes its own guardrails. Used in tests and `LLM_STUB` mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubExplanationClient;

impl StubExplanationClient {
    fn render(fields: &RowFields) -> String {
        let mut out = format!("{} {} {}", fields.category, fields.name, fields.value);
        if let Some(unit) = fields.unit.as_deref() {
            out.push(' ');
            out.push_str(unit);
        }
        if let Some(av) = fields.variant_availability.as_deref() {
            out.push(' ');
            out.push_str(av);
        }
        out.push('.');
        out
    }
}

impl ExplanationClient for StubExplanationClient {
    fn explain<'a>(&'a self, _cx: &'a Cx, fields: &'a RowFields) -> BoxFuture<'a, Option<String>> {
        Box::pin(async move {
            let candidate = Self::render(fields);
            validate_explanation(&candidate, fields).then_some(candidate)
        })
    }
}

/// A client that always fails. Exercises `explanation_failed` paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingExplanationClient;

impl ExplanationClient for FailingExplanationClient {
    fn explain<'a>(&'a self, _cx: &'a Cx, _fields: &'a RowFields) -> BoxFuture<'a, Option<String>> {
        Box::pin(async move { None })
    }
}

// ────────────────────────────────────────────────────────────────────
// HTTP client
// ────────────────────────────────────────────────────────────────────

static HTTP_CLIENT: OnceLock<HttpClient> = OnceLock::new();

fn get_http_client() -> &'static HttpClient {
    HTTP_CLIENT.get_or_init(HttpClient::new)
}

const SYSTEM_PROMPT: &str = "You write exactly one sentence describing a product \
specification row. Use only the words provided in the row fields. Do not add \
opinions, comparisons, or any fact not present in the fields. At most 200 \
characters. End with a single period.";

/// Configuration for the LLM-backed explanation client.
#[derive(Debug, Clone)]
pub struct HttpExplanationConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_ms: u64,
}

/// OpenAI-style chat-completions client producing guarded explanations.
#[derive(Debug, Clone)]
pub struct HttpExplanationClient {
    config: HttpExplanationConfig,
}

impl HttpExplanationClient {
    #[must_use]
    pub const fn new(config: HttpExplanationConfig) -> Self {
        Self { config }
    }

    fn user_prompt(fields: &RowFields) -> String {
        let mut out = format!(
            "Category: {}\nSpecification: {}\nValue: {}",
            fields.category, fields.name, fields.value
        );
        if let Some(unit) = fields.unit.as_deref() {
            out.push_str(&format!("\nUnit: {unit}"));
        }
        if let Some(kf) = fields.key_features.as_deref() {
            out.push_str(&format!("\nKey features: {kf}"));
        }
        if let Some(av) = fields.variant_availability.as_deref() {
            out.push_str(&format!("\nAvailability: {av}"));
        }
        out
    }

    async fn complete_once(&self, fields: &RowFields) -> Option<String> {
        let payload = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": Self::user_prompt(fields)}
            ],
            "temperature": 0.0,
            "max_tokens": 80
        });
        let body = serde_json::to_vec(&payload).ok()?;

        let mut headers = vec![(
            "Content-Type".to_string(),
            "application/json".to_string(),
        )];
        if let Some(key) = &self.config.api_key {
            headers.push(("Authorization".to_string(), format!("Bearer {key}")));
        }

        let client = get_http_client();
        let fut = client.request(
            asupersync::http::h1::Method::Post,
            &self.config.endpoint,
            headers,
            body,
        );
        let deadline = Duration::from_millis(self.config.timeout_ms);
        let response = match timeout(wall_now(), deadline, Box::pin(fut)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "explanation transport failure");
                return None;
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.config.timeout_ms, "explanation timed out");
                return None;
            }
        };

        if response.status != 200 {
            tracing::warn!(status = response.status, "explanation provider error");
            return None;
        }

        let parsed: Value = serde_json::from_slice(&response.body).ok()?;
        let content = parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)?
            .trim()
            .to_string();
        if content.is_empty() { None } else { Some(content) }
    }
}

impl ExplanationClient for HttpExplanationClient {
    fn explain<'a>(&'a self, _cx: &'a Cx, fields: &'a RowFields) -> BoxFuture<'a, Option<String>> {
        Box::pin(async move {
            // One retry on rejection, then give up.
            for attempt in 0..2 {
                if let Some(candidate) = self.complete_once(fields).await {
                    if validate_explanation(&candidate, fields) {
                        return Some(candidate);
                    }
                    tracing::debug!(attempt, "explanation rejected by validator");
                }
            }
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;

    fn fields() -> RowFields {
        RowFields {
            category: "Engine".to_string(),
            name: "Fuel Efficiency".to_string(),
            value: "25.49".to_string(),
            unit: Some("km/l".to_string()),
            key_features: Some("Std".to_string()),
            variant_availability: Some("Standard".to_string()),
        }
    }

    #[test]
    fn accepts_field_bounded_sentence() {
        assert!(validate_explanation(
            "Engine fuel efficiency 25.49 km/l standard.",
            &fields()
        ));
    }

    #[test]
    fn rejects_overlong() {
        let long = format!("{}.", "Engine ".repeat(40));
        assert!(!validate_explanation(&long, &fields()));
    }

    #[test]
    fn rejects_line_breaks() {
        assert!(!validate_explanation("Engine fuel.\nMore.", &fields()));
    }

    #[test]
    fn rejects_missing_terminal_punctuation() {
        assert!(!validate_explanation("Engine fuel efficiency 25.49 km/l", &fields()));
    }

    #[test]
    fn rejects_double_terminal_punctuation() {
        assert!(!validate_explanation("Engine fuel efficiency 25.49 km/l..", &fields()));
    }

    #[test]
    fn rejects_foreign_tokens() {
        assert!(!validate_explanation(
            "Engine fuel efficiency beats every competitor.",
            &fields()
        ));
    }

    #[test]
    fn stemming_tolerates_inflection() {
        // "standards" stems to "standard", present in the fields.
        assert!(validate_explanation("Fuel efficiency standards 25.49.", &fields()));
    }

    #[test]
    fn stub_client_passes_its_own_guardrails() {
        let cx = Cx::for_testing();
        let rt = RuntimeBuilder::current_thread().build().unwrap();
        let client = StubExplanationClient;
        let out = rt.block_on(client.explain(&cx, &fields()));
        let sentence = out.expect("stub explanation");
        assert!(validate_explanation(&sentence, &fields()));
        assert!(sentence.len() <= MAX_EXPLANATION_CHARS);
    }

    #[test]
    fn failing_client_returns_none() {
        let cx = Cx::for_testing();
        let rt = RuntimeBuilder::current_thread().build().unwrap();
        let out = rt.block_on(FailingExplanationClient.explain(&cx, &fields()));
        assert!(out.is_none());
    }
}
