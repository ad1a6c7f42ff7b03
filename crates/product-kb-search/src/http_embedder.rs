//! HTTP embedding client against an OpenAI-style `/embeddings` endpoint.
//!
//! Transient failures (transport errors, 429, 5xx) retry with 1s/2s
//! backoff, two retries max. Permanent failures are reported per item.

use crate::embedder::{BoxFuture, EmbedResult, Embedder, normalize_l2};
use crate::error::{SearchError, SearchResult};
use asupersync::Cx;
use asupersync::http::h1::HttpClient;
use asupersync::time::{timeout, wall_now};
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;

/// Global HTTP client instance shared across embedder handles.
static HTTP_CLIENT: OnceLock<HttpClient> = OnceLock::new();

fn get_http_client() -> &'static HttpClient {
    HTTP_CLIENT.get_or_init(HttpClient::new)
}

/// Retry schedule for transient provider failures.
const RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];

/// Configuration for the HTTP embedder.
#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub version: String,
    pub dimension: usize,
    pub timeout_ms: u64,
}

/// Embedding client over `asupersync`'s HTTP/1 client.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    config: HttpEmbedderConfig,
}

impl HttpEmbedder {
    #[must_use]
    pub const fn new(config: HttpEmbedderConfig) -> Self {
        Self { config }
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![(
            "Content-Type".to_string(),
            "application/json".to_string(),
        )];
        if let Some(key) = &self.config.api_key {
            headers.push(("Authorization".to_string(), format!("Bearer {key}")));
        }
        headers
    }

    async fn request_once(&self, cx: &Cx, texts: &[String]) -> SearchResult<Vec<EmbedResult>> {
        let payload = serde_json::json!({
            "model": self.config.model,
            "input": texts,
        });
        let body = serde_json::to_vec(&payload)
            .map_err(|e| SearchError::InvalidResponse(e.to_string()))?;

        let client = get_http_client();
        let fut = client.request(
            cx,
            asupersync::http::h1::Method::Post,
            &self.config.endpoint,
            self.headers(),
            body,
        );
        let deadline = Duration::from_millis(self.config.timeout_ms);
        let response = match timeout(wall_now(), deadline, Box::pin(fut)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(SearchError::Http(e.to_string())),
            Err(_) => return Err(SearchError::Timeout(self.config.timeout_ms)),
        };

        if response.status != 200 {
            return Err(SearchError::Status {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        self.decode_response(&response.body, texts.len())
    }

    fn decode_response(&self, body: &[u8], expected: usize) -> SearchResult<Vec<EmbedResult>> {
        let parsed: Value = serde_json::from_slice(body)
            .map_err(|e| SearchError::InvalidResponse(format!("response JSON: {e}")))?;
        let data = parsed
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| SearchError::InvalidResponse("missing data array".to_string()))?;
        if data.len() != expected {
            return Err(SearchError::InvalidResponse(format!(
                "expected {expected} embeddings, got {}",
                data.len()
            )));
        }

        // Providers may return out of order; `index` restores input order.
        let mut ordered: Vec<Option<Vec<f32>>> = vec![None; expected];
        for item in data {
            let index = item
                .get("index")
                .and_then(Value::as_u64)
                .map(|i| i as usize)
                .ok_or_else(|| SearchError::InvalidResponse("missing index".to_string()))?;
            let raw: Vec<f32> = item
                .get("embedding")
                .and_then(Value::as_array)
                .ok_or_else(|| SearchError::InvalidResponse("missing embedding".to_string()))?
                .iter()
                .filter_map(Value::as_f64)
                .map(|f| f as f32)
                .collect();
            if raw.len() != self.config.dimension {
                return Err(SearchError::DimensionMismatch {
                    expected: self.config.dimension,
                    got: raw.len(),
                });
            }
            if index >= expected {
                return Err(SearchError::InvalidResponse(format!(
                    "index {index} out of range"
                )));
            }
            ordered[index] = Some(normalize_l2(&raw));
        }

        ordered
            .into_iter()
            .map(|slot| {
                slot.map(|vector| EmbedResult {
                    vector,
                    model: self.config.model.clone(),
                    version: self.config.version.clone(),
                })
                .ok_or_else(|| SearchError::InvalidResponse("gap in embedding indices".to_string()))
            })
            .collect()
    }

    async fn request_with_retry(&self, texts: &[String]) -> SearchResult<Vec<EmbedResult>> {
        let mut last_err = None;
        for (attempt, delay) in std::iter::once(None)
            .chain(RETRY_DELAYS.iter().map(Some))
            .enumerate()
        {
            if let Some(delay) = delay {
                // Synchronous backoff: at most two short waits per batch.
                std::thread::sleep(*delay);
            }
            match self.request_once(texts).await {
                Ok(results) => return Ok(results),
                Err(e) if e.is_transient() => {
                    tracing::warn!(attempt, error = %e, "transient embedding failure");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| SearchError::Internal("retry loop exhausted".to_string())))
    }
}

impl Embedder for HttpEmbedder {
    fn embed_batch<'a>(
        &'a self,
        _cx: &'a Cx,
        texts: &'a [String],
    ) -> BoxFuture<'a, SearchResult<Vec<SearchResult<EmbedResult>>>> {
        Box::pin(async move {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let results = self.request_with_retry(texts).await?;
            Ok(results.into_iter().map(Ok).collect())
        })
    }

    fn embed_single<'a>(
        &'a self,
        cx: &'a Cx,
        text: &'a str,
    ) -> BoxFuture<'a, SearchResult<EmbedResult>> {
        Box::pin(async move {
            let texts = [text.to_string()];
            let mut batch = self.embed_batch(cx, &texts).await?;
            batch
                .pop()
                .unwrap_or_else(|| Err(SearchError::InvalidResponse("empty batch".to_string())))
        })
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn version(&self) -> &str {
        &self.config.version
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}
