//! Wire DTOs for the HTTP surface.
//!
//! Field names are camelCase on the wire (the upstream consoles already
//! speak that dialect); internal types stay snake_case.

use serde::{Deserialize, Serialize};

/// `documentSource` sub-object of an ingest request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentSourceDto {
    pub id: Option<String>,
    pub sha256: Option<String>,
}

/// Body of `POST /tenants/{t}/products/{p}/campaigns/{c}/ingest`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestRequestDto {
    pub document_source: DocumentSourceDto,
    /// Local path (or file URL) of the extracted Markdown.
    pub markdown_url: String,
    pub overwrite_draft: bool,
    pub auto_publish: bool,
    pub operator: String,
    pub metadata: Option<serde_json::Value>,
}

/// 202 body returned by the ingest route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestAcceptedDto {
    pub job_id: i64,
    pub status: String,
    pub started_at: String,
    pub eta_seconds: u64,
}

/// Body of `POST /tenants/{t}/campaigns/{c}/publish`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublishRequestDto {
    pub version: Option<i64>,
    pub approved_by: String,
    pub release_notes: Option<String>,
}

/// Body of `POST /comparisons/query`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComparisonQueryDto {
    pub tenant_id: i64,
    pub primary_product_id: i64,
    pub secondary_product_id: i64,
    pub dimensions: Option<Vec<String>>,
    pub max_rows: Option<usize>,
}
