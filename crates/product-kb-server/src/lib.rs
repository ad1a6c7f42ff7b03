//! HTTP surface for the Product Knowledge Engine.
//!
//! Routes (bearer-authenticated except health probes):
//! - `POST /retrieval/query`
//! - `POST /tenants/{t}/products/{p}/campaigns/{c}/ingest` (202, async)
//! - `POST /tenants/{t}/campaigns/{c}/publish`
//! - `POST /comparisons/query`
//! - `GET  /lineage/{resourceType}/{resourceId}?tenantId=…`
//! - `GET  /drift/alerts?tenantId=…`, `POST /drift/check?tenantId=…`
//! - `GET  /health`, `/ready`, `/live`
//!
//! Error bodies are `{code, message, detail?}` per the engine's error
//! taxonomy. A tenant context is mandatory on every data route.

#![forbid(unsafe_code)]

pub mod dto;

use asupersync::http::h1::listener::Http1Listener;
use asupersync::http::h1::types::{
    Method as Http1Method, Request as Http1Request, Response as Http1Response, default_reason,
};
use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};
use product_kb_core::{Config, ErrorBody, codes};
use product_kb_db::{DbPool, audit_queries, micros_to_iso, now_micros, queries};
use product_kb_ingest::{IngestPipeline, IngestRequest};
use product_kb_monitor::{DriftRunner, LineageWriter};
use product_kb_retrieval::{ComparisonRequest, RetrievalError, RetrievalRequest, RetrievalRouter};
use std::sync::Arc;

use dto::{ComparisonQueryDto, IngestAcceptedDto, IngestRequestDto, PublishRequestDto};

/// Everything the request handlers need, shared across connections.
pub struct HttpState {
    pub config: Config,
    pub pool: DbPool,
    pub router: Arc<RetrievalRouter>,
    pub pipeline: Arc<IngestPipeline>,
    pub drift: Arc<DriftRunner>,
    pub lineage: Arc<LineageWriter>,
}

impl HttpState {
    async fn handle(&self, req: Http1Request) -> Http1Response {
        let (path, query) = split_path_query(&req.uri);

        // Health probes bypass bearer auth.
        if matches!(path.as_str(), "/health" | "/ready" | "/live") {
            if !matches!(req.method, Http1Method::Get) {
                return error_response(405, ErrorBody::new(codes::BAD_REQUEST, "GET only"));
            }
            return json_response(200, &serde_json::json!({ "status": "ok" }));
        }

        if let Some(resp) = self.check_bearer_auth(&req) {
            return resp;
        }

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match (req.method.clone(), segments.as_slice()) {
            (Http1Method::Post, ["retrieval", "query"]) => self.handle_retrieval(&req).await,
            (Http1Method::Post, ["tenants", t, "products", p, "campaigns", c, "ingest"]) => {
                self.handle_ingest(t, p, c, &req).await
            }
            (Http1Method::Post, ["tenants", t, "campaigns", c, "publish"]) => {
                self.handle_publish(t, c, &req).await
            }
            (Http1Method::Post, ["comparisons", "query"]) => self.handle_comparison(&req).await,
            (Http1Method::Get, ["lineage", resource_type, resource_id]) => {
                self.handle_lineage(resource_type, resource_id, &query).await
            }
            (Http1Method::Get, ["drift", "alerts"]) => self.handle_drift_alerts(&query).await,
            (Http1Method::Post, ["drift", "check"]) => self.handle_drift_check(&query).await,
            _ => error_response(404, ErrorBody::new(codes::NOT_FOUND, "no such route")),
        }
    }

    fn check_bearer_auth(&self, req: &Http1Request) -> Option<Http1Response> {
        let Some(expected) = &self.config.http_bearer_token else {
            return None;
        };
        let provided = header_value(req, "authorization")
            .and_then(|v| v.strip_prefix("Bearer ").map(str::to_string));
        match provided {
            Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => None,
            _ => Some(error_response(
                401,
                ErrorBody::new(codes::BAD_REQUEST, "missing or invalid bearer token"),
            )),
        }
    }

    async fn handle_retrieval(&self, req: &Http1Request) -> Http1Response {
        let request: RetrievalRequest = match serde_json::from_slice(&req.body) {
            Ok(r) => r,
            Err(e) => {
                return error_response(
                    400,
                    ErrorBody::new(codes::BAD_REQUEST, format!("invalid body: {e}")),
                );
            }
        };

        let cx = Cx::for_request();
        // Unknown tenants are a 404, not an empty result.
        match queries::get_tenant(&cx, &self.pool, request.tenant_id).await {
            Outcome::Ok(Some(_)) => {}
            Outcome::Ok(None) => {
                return error_response(
                    404,
                    ErrorBody::new(codes::NOT_FOUND, format!("tenant {}", request.tenant_id)),
                );
            }
            other => return db_outcome_response(other.map(|_| ())),
        }

        match self.router.query(&cx, &request).await {
            Outcome::Ok(response) => {
                json_response(200, &serde_json::to_value(&response).unwrap_or_default())
            }
            Outcome::Err(e) => retrieval_error_response(&e),
            Outcome::Cancelled(_) => {
                error_response(503, ErrorBody::new(codes::STORAGE_UNAVAILABLE, "cancelled"))
            }
            Outcome::Panicked(_) => {
                error_response(500, ErrorBody::new(codes::INTERNAL_ERROR, "internal panic"))
            }
        }
    }

    /// 202 path: create the job row, then run the pipeline on a detached
    /// worker thread.
    async fn handle_ingest(
        &self,
        tenant: &str,
        product: &str,
        campaign: &str,
        req: &Http1Request,
    ) -> Http1Response {
        let (Some(tenant_id), Some(product_id), Some(campaign_id)) = (
            tenant.parse::<i64>().ok(),
            product.parse::<i64>().ok(),
            campaign.parse::<i64>().ok(),
        ) else {
            return error_response(
                400,
                ErrorBody::new(codes::BAD_REQUEST, "non-numeric path ids"),
            );
        };

        let body: IngestRequestDto = match serde_json::from_slice(&req.body) {
            Ok(b) => b,
            Err(e) => {
                return error_response(
                    400,
                    ErrorBody::new(codes::BAD_REQUEST, format!("invalid body: {e}")),
                );
            }
        };
        if body.markdown_url.is_empty() {
            return error_response(
                400,
                ErrorBody::new(codes::BAD_REQUEST, "markdownUrl is required"),
            );
        }

        let markdown = match std::fs::read_to_string(&body.markdown_url) {
            Ok(text) => text,
            Err(e) => {
                return error_response(
                    400,
                    ErrorBody::new(
                        codes::BAD_REQUEST,
                        format!("cannot read {}: {e}", body.markdown_url),
                    ),
                );
            }
        };

        // Create the job row up front so the caller can poll it.
        let cx = Cx::for_request();
        let job = match audit_queries::create_ingestion_job(
            &cx,
            &self.pool,
            product_kb_db::IngestionJobRow {
                tenant_id,
                product_id,
                campaign_variant_id: campaign_id,
                status: "pending".to_string(),
                operator: Some(body.operator.clone()),
                ..Default::default()
            },
        )
        .await
        {
            Outcome::Ok(job) => job,
            other => return db_outcome_response(other.map(|_| ())),
        };
        let job_id = job.id.unwrap_or_default();

        let request = IngestRequest {
            tenant_id,
            product_id,
            campaign_id: Some(campaign_id),
            markdown,
            document_source_id: body.document_source.id.clone(),
            source_uri: body.markdown_url.clone(),
            operator: body.operator.clone(),
            overwrite: body.overwrite_draft,
            auto_publish: body.auto_publish,
            job_id: Some(job_id),
        };

        let pipeline = Arc::clone(&self.pipeline);
        let pool = self.pool.clone();
        std::thread::Builder::new()
            .name(format!("ingest-job-{job_id}"))
            .spawn(move || {
                let Ok(rt) = RuntimeBuilder::current_thread().build() else {
                    tracing::error!(job_id, "ingest worker runtime failed to start");
                    return;
                };
                let cx = Cx::for_request();
                if let Err(e) = rt.block_on(pipeline.ingest(&cx, request)).into_result() {
                    tracing::error!(job_id, error = %e, "ingestion job failed");
                    let _ = rt
                        .block_on(audit_queries::finish_ingestion_job(
                            &cx, &pool, tenant_id, job_id, "failed", "{}",
                        ))
                        .into_result();
                }
            })
            .ok();

        let accepted = IngestAcceptedDto {
            job_id,
            status: "pending".to_string(),
            started_at: micros_to_iso(now_micros()),
            eta_seconds: 30,
        };
        json_response(202, &serde_json::to_value(accepted).unwrap_or_default())
    }

    async fn handle_publish(
        &self,
        tenant: &str,
        campaign: &str,
        req: &Http1Request,
    ) -> Http1Response {
        let (Some(tenant_id), Some(campaign_id)) =
            (tenant.parse::<i64>().ok(), campaign.parse::<i64>().ok())
        else {
            return error_response(
                400,
                ErrorBody::new(codes::BAD_REQUEST, "non-numeric path ids"),
            );
        };
        let body: PublishRequestDto = match serde_json::from_slice(&req.body) {
            Ok(b) => b,
            Err(e) => {
                return error_response(
                    400,
                    ErrorBody::new(codes::BAD_REQUEST, format!("invalid body: {e}")),
                );
            }
        };
        if body.approved_by.is_empty() {
            return error_response(
                400,
                ErrorBody::new(codes::BAD_REQUEST, "approvedBy is required"),
            );
        }

        let cx = Cx::for_request();
        match product_kb_ingest::publish(
            &cx,
            &self.pool,
            self.lineage.as_ref(),
            tenant_id,
            campaign_id,
            body.version,
            &body.approved_by,
        )
        .await
        {
            Outcome::Ok(row) => {
                self.router.invalidate_cache();
                json_response(200, &serde_json::to_value(&row).unwrap_or_default())
            }
            Outcome::Err(e) => {
                let status = match e.error_code() {
                    codes::NOT_FOUND => 404,
                    codes::NOT_DRAFT => 409,
                    codes::CONFLICT_EXISTS => 412,
                    codes::BAD_REQUEST => 400,
                    _ => 500,
                };
                error_response(status, ErrorBody::new(e.error_code(), e.to_string()))
            }
            Outcome::Cancelled(_) => {
                error_response(503, ErrorBody::new(codes::STORAGE_UNAVAILABLE, "cancelled"))
            }
            Outcome::Panicked(_) => {
                error_response(500, ErrorBody::new(codes::INTERNAL_ERROR, "internal panic"))
            }
        }
    }

    async fn handle_comparison(&self, req: &Http1Request) -> Http1Response {
        let body: ComparisonQueryDto = match serde_json::from_slice(&req.body) {
            Ok(b) => b,
            Err(e) => {
                return error_response(
                    400,
                    ErrorBody::new(codes::BAD_REQUEST, format!("invalid body: {e}")),
                );
            }
        };
        if body.tenant_id <= 0 {
            return error_response(
                400,
                ErrorBody::new(codes::BAD_REQUEST, "tenantId is required"),
            );
        }

        let cx = Cx::for_request();
        let request = ComparisonRequest {
            tenant_id: body.tenant_id,
            primary_product_id: body.primary_product_id,
            secondary_product_id: body.secondary_product_id,
            dimensions: body.dimensions,
            max_rows: body.max_rows,
        };
        match self.router.comparisons().compare(&cx, &request).await {
            Outcome::Ok(response) => json_response(200, &serde_json::to_value(&response).unwrap_or_default()),
            Outcome::Err(e) => retrieval_error_response(&e),
            Outcome::Cancelled(_) => {
                error_response(503, ErrorBody::new(codes::STORAGE_UNAVAILABLE, "cancelled"))
            }
            Outcome::Panicked(_) => {
                error_response(500, ErrorBody::new(codes::INTERNAL_ERROR, "internal panic"))
            }
        }
    }

    async fn handle_lineage(
        &self,
        resource_type: &str,
        resource_id: &str,
        query: &str,
    ) -> Http1Response {
        const ALLOWED: &[&str] = &[
            "spec_value",
            "feature_block",
            "knowledge_chunk",
            "comparison",
        ];
        if !ALLOWED.contains(&resource_type) {
            return error_response(
                400,
                ErrorBody::new(codes::BAD_REQUEST, "unknown resource type"),
            );
        }
        let Some(tenant_id) = query_param(query, "tenantId").and_then(|v| v.parse::<i64>().ok())
        else {
            return error_response(
                400,
                ErrorBody::new(codes::BAD_REQUEST, "tenantId is required"),
            );
        };
        let Ok(resource_id) = resource_id.parse::<i64>() else {
            return error_response(
                400,
                ErrorBody::new(codes::BAD_REQUEST, "non-numeric resource id"),
            );
        };

        let cx = Cx::for_request();
        // Flush buffered events so the trail reflects everything recorded.
        self.lineage.flush();
        match audit_queries::lineage_for_resource(&cx, &self.pool, tenant_id, resource_type, resource_id)
            .await
        {
            Outcome::Ok(events) => {
                json_response(200, &serde_json::to_value(&events).unwrap_or_default())
            }
            other => db_outcome_response(other.map(|_| ())),
        }
    }

    async fn handle_drift_alerts(&self, query: &str) -> Http1Response {
        let Some(tenant_id) = query_param(query, "tenantId").and_then(|v| v.parse::<i64>().ok())
        else {
            return error_response(
                400,
                ErrorBody::new(codes::BAD_REQUEST, "tenantId is required"),
            );
        };
        let cx = Cx::for_request();
        match audit_queries::open_drift_alerts(&cx, &self.pool, tenant_id).await {
            Outcome::Ok(alerts) => {
                json_response(200, &serde_json::to_value(&alerts).unwrap_or_default())
            }
            other => db_outcome_response(other.map(|_| ())),
        }
    }

    async fn handle_drift_check(&self, query: &str) -> Http1Response {
        let Some(tenant_id) = query_param(query, "tenantId").and_then(|v| v.parse::<i64>().ok())
        else {
            return error_response(
                400,
                ErrorBody::new(codes::BAD_REQUEST, "tenantId is required"),
            );
        };
        let cx = Cx::for_request();
        match self.drift.run_for_tenant(&cx, tenant_id).await {
            Outcome::Ok(result) => {
                json_response(200, &serde_json::to_value(&result).unwrap_or_default())
            }
            other => db_outcome_response(other.map(|_| ())),
        }
    }
}

/// Run the HTTP server until the listener shuts down.
pub fn run_http(state: Arc<HttpState>) -> std::io::Result<()> {
    let addr = format!("{}:{}", state.config.http_host, state.config.http_port);
    tracing::info!(%addr, "starting HTTP server");

    let runtime = RuntimeBuilder::new()
        .build()
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let handle = runtime.handle();

    let result = runtime.block_on(async move {
        let handler_state = Arc::clone(&state);
        let listener = Http1Listener::bind(addr, move |req| {
            let inner = Arc::clone(&handler_state);
            async move { inner.handle(req).await }
        })
        .await?;

        listener.run(&handle).await?;
        Ok::<(), std::io::Error>(())
    });

    result
}

// ────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────

fn split_path_query(uri: &str) -> (String, String) {
    match uri.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (uri.to_string(), String::new()),
    }
}

fn query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        if k == key { Some(v.to_string()) } else { None }
    })
}

fn header_value(req: &Http1Request, name: &str) -> Option<String> {
    req.headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn json_response(status: u16, value: &serde_json::Value) -> Http1Response {
    let mut resp = Http1Response::new(
        status,
        default_reason(status),
        serde_json::to_vec(value).unwrap_or_default(),
    );
    resp.headers
        .push(("content-type".to_string(), "application/json".to_string()));
    resp
}

fn error_response(status: u16, body: ErrorBody) -> Http1Response {
    let mut resp = Http1Response::new(
        status,
        default_reason(status),
        serde_json::to_vec(&body).unwrap_or_default(),
    );
    resp.headers
        .push(("content-type".to_string(), "application/json".to_string()));
    resp
}

fn retrieval_error_response(e: &RetrievalError) -> Http1Response {
    let mut body = ErrorBody::new(e.error_code(), e.to_string());
    if let RetrievalError::MixedVersions(versions) = e {
        body = body.with_detail(serde_json::json!({ "versions": versions }));
    }
    let status = body.http_status();
    error_response(status, body)
}

fn db_outcome_response(out: Outcome<(), product_kb_db::DbError>) -> Http1Response {
    match out {
        Outcome::Ok(()) => json_response(200, &serde_json::json!({})),
        Outcome::Err(e) => {
            let body = ErrorBody::new(e.error_code(), e.to_string());
            error_response(body.http_status(), body)
        }
        Outcome::Cancelled(_) => {
            error_response(503, ErrorBody::new(codes::STORAGE_UNAVAILABLE, "cancelled"))
        }
        Outcome::Panicked(_) => {
            error_response(500, ErrorBody::new(codes::INTERNAL_ERROR, "internal panic"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_query_separates() {
        assert_eq!(
            split_path_query("/drift/alerts?tenantId=1"),
            ("/drift/alerts".to_string(), "tenantId=1".to_string())
        );
        assert_eq!(
            split_path_query("/health"),
            ("/health".to_string(), String::new())
        );
    }

    #[test]
    fn query_param_lookup() {
        assert_eq!(
            query_param("tenantId=7&x=1", "tenantId").as_deref(),
            Some("7")
        );
        assert_eq!(query_param("x=1", "tenantId"), None);
    }

    #[test]
    fn constant_time_eq_behaviour() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"longer-secret"));
    }

    #[test]
    fn error_body_serializes_with_code() {
        let resp = error_response(404, ErrorBody::new(codes::NOT_FOUND, "tenant 9"));
        assert_eq!(resp.status, 404);
        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["code"], "NOT_FOUND");
    }
}
