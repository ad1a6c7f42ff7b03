//! The ingestion pipeline.
//!
//! Orchestrates parse → spec reconciliation → chunk build + dedup →
//! explanations → batched embedding → persistence → vector insert →
//! lineage, with draft/publish semantics on top.
//!
//! Failure semantics: everything after the draft is opened is reversible
//! by deleting the draft. Embedding-provider outages never block an
//! ingest (chunks persist as `retry_needed`); value conflicts never block
//! (they surface as drift alerts and block only publishing).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use asupersync::{Cx, Outcome};
use product_kb_core::{
    AlertType, ChunkType, CompletionStatus, Config, LineageAction, SpecDataType, ValueStatus,
};
use product_kb_db::{
    DbPool, DocumentSourceRow, DriftAlertRow, FeatureBlockRow, IngestionJobRow, KnowledgeChunkRow,
    LineageEventRow, LineageSink, SpecValueRow, audit_queries, chunk_queries, now_micros, queries,
    spec_queries,
};
use product_kb_parser::{ParsedBrochure, SpecCandidate};
use product_kb_search::{Embedder, IndexEntry, IndexManager};

use crate::error::IngestError;
use crate::explain::{ExplanationClient, RowFields};

/// Unwrap an `Outcome`: on non-`Ok`, return early.
macro_rules! try_out {
    ($out:expr) => {
        match $out {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    };
}

fn map_db<T>(out: Outcome<T, product_kb_db::DbError>) -> Outcome<T, IngestError> {
    match out {
        Outcome::Ok(v) => Outcome::Ok(v),
        Outcome::Err(e) => Outcome::Err(IngestError::Db(e)),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// One ingestion request.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub tenant_id: i64,
    pub product_id: i64,
    /// Existing draft campaign to ingest into; when absent a draft is
    /// opened from the brochure's locale/trim/market.
    pub campaign_id: Option<i64>,
    pub markdown: String,
    /// Stable id of the upstream document; derived from the content hash
    /// when absent.
    pub document_source_id: Option<String>,
    /// URI the document came from (provenance only).
    pub source_uri: String,
    pub operator: String,
    pub overwrite: bool,
    pub auto_publish: bool,
    /// Pre-created ingestion job row (202-style async surfaces create the
    /// job before scheduling the work); the pipeline creates its own when
    /// absent.
    pub job_id: Option<i64>,
}

/// Counters returned from a successful ingestion.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct IngestOutcome {
    pub job_id: i64,
    pub campaign_id: i64,
    pub specs_created: usize,
    pub features_created: usize,
    pub usps_created: usize,
    pub chunks_created: usize,
    pub chunks_deduplicated: usize,
    pub conflicts: usize,
    pub embeddings_failed: usize,
    pub duration_ms: u64,
}

/// The ingestion pipeline. One instance serves all tenants; every call is
/// independent.
pub struct IngestPipeline {
    pool: DbPool,
    index: Arc<IndexManager>,
    embedder: Arc<dyn Embedder>,
    explainer: Arc<dyn ExplanationClient>,
    lineage: Arc<dyn LineageSink>,
    config: Config,
}

impl IngestPipeline {
    #[must_use]
    pub fn new(
        pool: DbPool,
        index: Arc<IndexManager>,
        embedder: Arc<dyn Embedder>,
        explainer: Arc<dyn ExplanationClient>,
        lineage: Arc<dyn LineageSink>,
        config: Config,
    ) -> Self {
        Self {
            pool,
            index,
            embedder,
            explainer,
            lineage,
            config,
        }
    }

    /// Run one ingestion end to end.
    pub async fn ingest(
        &self,
        cx: &Cx,
        request: IngestRequest,
    ) -> Outcome<IngestOutcome, IngestError> {
        let started = Instant::now();

        // Parse first: a malformed brochure must not touch the store.
        let parsed = match product_kb_parser::parse(&request.markdown) {
            Ok(p) => p,
            Err(e) => return Outcome::Err(IngestError::Parse(e)),
        };

        let doc_sha256 = product_kb_core::sha256_hex(request.markdown.as_bytes());
        let document_source_id = request
            .document_source_id
            .clone()
            .unwrap_or_else(|| format!("doc-{}", &doc_sha256[..12]));

        // Ownership chain: the product must exist under the tenant.
        let product = match try_out!(map_db(
            queries::get_product(cx, &self.pool, request.tenant_id, request.product_id).await
        )) {
            Some(p) => p,
            None => {
                return Outcome::Err(IngestError::NotFound {
                    entity: "product",
                    identifier: request.product_id.to_string(),
                });
            }
        };

        // Step 1: open (or reuse) the draft campaign.
        let campaign = match request.campaign_id {
            Some(id) => {
                match try_out!(map_db(
                    queries::get_campaign(cx, &self.pool, request.tenant_id, id).await
                )) {
                    Some(c) => c,
                    None => {
                        return Outcome::Err(IngestError::NotFound {
                            entity: "campaign",
                            identifier: id.to_string(),
                        });
                    }
                }
            }
            None => try_out!(map_db(
                queries::open_draft_campaign(
                    cx,
                    &self.pool,
                    request.tenant_id,
                    request.product_id,
                    parsed.meta.locale.as_deref().unwrap_or("en"),
                    parsed.meta.trim.as_deref().unwrap_or(""),
                    parsed.meta.market.as_deref().unwrap_or(""),
                )
                .await
            )),
        };
        let campaign_id = campaign.id.unwrap_or_default();

        if request.overwrite {
            let deleted = try_out!(map_db(
                queries::delete_draft_contents(cx, &self.pool, request.tenant_id, campaign_id)
                    .await
            ));
            if let Err(e) = self.index.delete_partition(campaign_id) {
                tracing::warn!(campaign_id, error = %e, "failed to drop index partition");
            }
            tracing::info!(campaign_id, deleted, "overwrote draft contents");
        }

        // Job bookkeeping + lineage open.
        let job_id = match request.job_id {
            Some(id) => {
                try_out!(map_db(
                    audit_queries::update_ingestion_job_status(
                        cx,
                        &self.pool,
                        request.tenant_id,
                        id,
                        "running",
                    )
                    .await
                ));
                id
            }
            None => {
                let job = try_out!(map_db(
                    audit_queries::create_ingestion_job(
                        cx,
                        &self.pool,
                        IngestionJobRow {
                            tenant_id: request.tenant_id,
                            product_id: request.product_id,
                            campaign_variant_id: campaign_id,
                            status: "running".to_string(),
                            operator: Some(request.operator.clone()),
                            ..Default::default()
                        },
                    )
                    .await
                ));
                job.id.unwrap_or_default()
            }
        };

        self.lineage.record(LineageEventRow {
            tenant_id: request.tenant_id,
            product_id: Some(request.product_id),
            campaign_variant_id: Some(campaign_id),
            resource_type: "ingestion_job".to_string(),
            resource_id: job_id,
            document_source_id: Some(document_source_id.clone()),
            ingestion_job_id: Some(job_id),
            action: LineageAction::Created.as_str().to_string(),
            operator: Some(request.operator.clone()),
            ..Default::default()
        });

        // Step 2: record the document source (drift checks recompute its
        // hash later).
        try_out!(map_db(
            audit_queries::upsert_document_source(
                cx,
                &self.pool,
                &DocumentSourceRow {
                    id: document_source_id.clone(),
                    tenant_id: request.tenant_id,
                    campaign_variant_id: campaign_id,
                    uri: request.source_uri.clone(),
                    sha256: doc_sha256,
                    ingested_at: now_micros(),
                },
            )
            .await
        ));

        // Step 3: reconcile spec values.
        let mut outcome = IngestOutcome {
            job_id,
            campaign_id,
            ..Default::default()
        };
        let mut value_ids_by_row: HashMap<usize, i64> = HashMap::new();
        let mut inserted_values: Vec<(SpecValueRow, SpecCandidate)> = Vec::new();

        for candidate in &parsed.spec_values {
            let reconciled = try_out!(
                self.reconcile_spec_value(
                    cx,
                    &request,
                    campaign_id,
                    job_id,
                    &document_source_id,
                    candidate,
                )
                .await
            );
            match reconciled {
                Reconciled::Unchanged => {}
                Reconciled::Inserted(row) => {
                    if let Some(id) = row.id {
                        value_ids_by_row.insert(candidate.row_index, id);
                    }
                    if row.status == ValueStatus::Conflict.as_str() {
                        outcome.conflicts += 1;
                    }
                    outcome.specs_created += 1;
                    inserted_values.push((row, candidate.clone()));
                }
            }
        }

        // Step 4: build and deduplicate chunks.
        let built = try_out!(
            self.build_chunks(
                cx,
                &request,
                &parsed,
                campaign_id,
                job_id,
                &document_source_id,
                &value_ids_by_row,
            )
            .await
        );
        outcome.chunks_created = built.created.len();
        outcome.chunks_deduplicated = built.deduplicated;
        outcome.features_created = built.features_created;
        outcome.usps_created = built.usps_created;

        // Step 5: explanations, row by row. Failures record
        // `explanation_failed` and move on.
        for (row, candidate) in &inserted_values {
            let Some(value_id) = row.id else { continue };
            let fields = RowFields {
                category: candidate.category.clone(),
                name: candidate.name.clone(),
                value: candidate.display_value(),
                unit: candidate.unit.clone(),
                key_features: candidate.key_features.clone(),
                variant_availability: candidate.variant_availability.clone(),
            };
            let explanation = self.explainer.explain(cx, &fields).await;
            try_out!(map_db(
                spec_queries::update_spec_value_explanation(
                    cx,
                    &self.pool,
                    request.tenant_id,
                    value_id,
                    explanation.as_deref(),
                )
                .await
            ));
        }

        // Steps 6-7: batched embedding, persistence, vector insert.
        outcome.embeddings_failed = try_out!(
            self.embed_and_index(cx, &request, campaign_id, &built.created)
                .await
        );

        // Step 8: close the job.
        let counts_json = serde_json::to_string(&outcome)
            .unwrap_or_else(|_| "{}".to_string());
        try_out!(map_db(
            audit_queries::finish_ingestion_job(
                cx,
                &self.pool,
                request.tenant_id,
                job_id,
                "succeeded",
                &counts_json,
            )
            .await
        ));
        self.lineage.record(LineageEventRow {
            tenant_id: request.tenant_id,
            product_id: Some(request.product_id),
            campaign_variant_id: Some(campaign_id),
            resource_type: "ingestion_job".to_string(),
            resource_id: job_id,
            ingestion_job_id: Some(job_id),
            action: LineageAction::Updated.as_str().to_string(),
            payload: counts_json,
            operator: Some(request.operator.clone()),
            ..Default::default()
        });

        // Step 9: optional publish.
        if request.auto_publish {
            try_out!(
                crate::publisher::publish(
                    cx,
                    &self.pool,
                    self.lineage.as_ref(),
                    request.tenant_id,
                    campaign_id,
                    Some(campaign.version),
                    &request.operator,
                )
                .await
            );
        }

        outcome.duration_ms =
            u64::try_from(started.elapsed().as_millis().min(u128::from(u64::MAX)))
                .unwrap_or(u64::MAX);
        tracing::info!(
            tenant_id = request.tenant_id,
            campaign_id,
            job_id,
            specs = outcome.specs_created,
            chunks = outcome.chunks_created,
            product = %product.name,
            "ingestion complete"
        );
        Outcome::Ok(outcome)
    }

    /// Compare a candidate against the stored active value. Identical
    /// values are a no-op; differing values insert a `conflict` row and
    /// raise an alert; new items insert at `max(version) + 1`.
    async fn reconcile_spec_value(
        &self,
        cx: &Cx,
        request: &IngestRequest,
        campaign_id: i64,
        job_id: i64,
        document_source_id: &str,
        candidate: &SpecCandidate,
    ) -> Outcome<Reconciled, IngestError> {
        let data_type = if candidate.value_numeric.is_some() {
            SpecDataType::Numeric
        } else {
            SpecDataType::Text
        };
        let item = try_out!(map_db(
            spec_queries::upsert_spec_item(
                cx,
                &self.pool,
                &candidate.category,
                &candidate.name,
                candidate.unit.as_deref(),
                data_type.as_str(),
            )
            .await
        ));
        let item_id = item.id.unwrap_or_default();

        let existing = try_out!(map_db(
            spec_queries::active_spec_value(cx, &self.pool, request.tenant_id, campaign_id, item_id)
                .await
        ));

        let mut status = ValueStatus::Active;
        if let Some(existing) = existing {
            if values_match(&existing, candidate) {
                return Outcome::Ok(Reconciled::Unchanged);
            }
            status = ValueStatus::Conflict;
        }

        let max_version = try_out!(map_db(
            spec_queries::max_spec_value_version(
                cx,
                &self.pool,
                request.tenant_id,
                campaign_id,
                item_id,
            )
            .await
        ));

        let row = try_out!(map_db(
            spec_queries::insert_spec_value(
                cx,
                &self.pool,
                SpecValueRow {
                    tenant_id: request.tenant_id,
                    product_id: request.product_id,
                    campaign_variant_id: campaign_id,
                    spec_item_id: item_id,
                    value_numeric: candidate.value_numeric,
                    value_text: candidate.value_text.clone(),
                    unit: candidate.unit.clone(),
                    status: status.as_str().to_string(),
                    source_doc_id: Some(document_source_id.to_string()),
                    key_features: candidate.key_features.clone(),
                    variant_availability: candidate.variant_availability.clone(),
                    version: max_version + 1,
                    effective_from: Some(now_micros()),
                    ..Default::default()
                },
            )
            .await
        ));
        let value_id = row.id.unwrap_or_default();

        self.lineage.record(LineageEventRow {
            tenant_id: request.tenant_id,
            product_id: Some(request.product_id),
            campaign_variant_id: Some(campaign_id),
            resource_type: "spec_value".to_string(),
            resource_id: value_id,
            ingestion_job_id: Some(job_id),
            action: LineageAction::Created.as_str().to_string(),
            payload: serde_json::json!({
                "spec_item_id": item_id,
                "status": status.as_str(),
                "version": row.version,
            })
            .to_string(),
            operator: Some(request.operator.clone()),
            ..Default::default()
        });

        if status == ValueStatus::Conflict {
            tracing::warn!(
                tenant_id = request.tenant_id,
                campaign_id,
                spec_item_id = item_id,
                "spec value conflict"
            );
            try_out!(map_db(
                audit_queries::insert_drift_alert(
                    cx,
                    &self.pool,
                    DriftAlertRow {
                        tenant_id: request.tenant_id,
                        product_id: Some(request.product_id),
                        campaign_variant_id: Some(campaign_id),
                        alert_type: AlertType::Conflict.as_str().to_string(),
                        details: serde_json::json!({
                            "spec_item_id": item_id,
                            "spec_value_id": value_id,
                        })
                        .to_string(),
                        ..Default::default()
                    },
                )
                .await
            ));
        }

        Outcome::Ok(Reconciled::Inserted(row))
    }

    /// Build row, feature, USP, and paragraph chunks; dedupe in-process
    /// and against the store.
    #[allow(clippy::too_many_arguments)]
    async fn build_chunks(
        &self,
        cx: &Cx,
        request: &IngestRequest,
        parsed: &ParsedBrochure,
        campaign_id: i64,
        job_id: i64,
        document_source_id: &str,
        value_ids_by_row: &HashMap<usize, i64>,
    ) -> Outcome<BuiltChunks, IngestError> {
        let mut built = BuiltChunks::default();
        // In-process dedup: hash → chunk id, so a brochure repeating a row
        // only hits the store once.
        let mut seen: HashMap<String, i64> = HashMap::new();

        let mut pending: Vec<PendingChunk> = Vec::new();
        for row_chunk in &parsed.row_chunks {
            pending.push(PendingChunk {
                chunk_type: ChunkType::SpecFact,
                text: row_chunk.text.clone(),
                content_hash: row_chunk.content_hash.clone(),
                completion: if row_chunk.incomplete {
                    CompletionStatus::Incomplete
                } else {
                    CompletionStatus::Complete
                },
                metadata: serde_json::json!({
                    "category": row_chunk.category,
                    "spec_name": row_chunk.name,
                    "parsed_spec_ids": value_ids_by_row
                        .get(&row_chunk.row_index)
                        .map(|id| vec![*id])
                        .unwrap_or_default(),
                }),
                spec_value_id: value_ids_by_row.get(&row_chunk.row_index).copied(),
                feature_body: None,
            });
        }
        for feature in &parsed.feature_blocks {
            pending.push(PendingChunk {
                chunk_type: ChunkType::FeatureBlock,
                text: feature.body.clone(),
                content_hash: product_kb_core::content_hash(&feature.body),
                completion: CompletionStatus::Complete,
                metadata: serde_json::json!({ "section": feature.section }),
                spec_value_id: None,
                feature_body: Some(feature.body.clone()),
            });
        }
        for usp in &parsed.usps {
            pending.push(PendingChunk {
                chunk_type: ChunkType::Usp,
                text: usp.body.clone(),
                content_hash: product_kb_core::content_hash(&usp.body),
                completion: CompletionStatus::Complete,
                metadata: serde_json::json!({ "section": usp.section }),
                spec_value_id: None,
                feature_body: None,
            });
        }
        for para in &parsed.paragraph_chunks {
            pending.push(PendingChunk {
                chunk_type: ChunkType::Paragraph,
                text: para.text.clone(),
                content_hash: para.content_hash.clone(),
                completion: CompletionStatus::Complete,
                metadata: serde_json::json!({ "paragraph_index": para.index }),
                spec_value_id: None,
                feature_body: None,
            });
        }

        for chunk in pending {
            // In-process collision: fold the spec id into the chunk we
            // already created this run.
            if let Some(&existing_id) = seen.get(&chunk.content_hash) {
                built.deduplicated += 1;
                if let Some(spec_id) = chunk.spec_value_id {
                    try_out!(map_db(
                        chunk_queries::append_parsed_spec_ids(
                            cx,
                            &self.pool,
                            request.tenant_id,
                            existing_id,
                            &[spec_id],
                        )
                        .await
                    ));
                }
                continue;
            }

            // Store collision: reuse the persisted chunk.
            let existing = try_out!(map_db(
                chunk_queries::find_chunk_by_hash(
                    cx,
                    &self.pool,
                    request.tenant_id,
                    &chunk.content_hash,
                )
                .await
            ));
            if let Some(existing) = existing {
                let existing_id = existing.id.unwrap_or_default();
                built.deduplicated += 1;
                seen.insert(chunk.content_hash.clone(), existing_id);
                if let Some(spec_id) = chunk.spec_value_id {
                    try_out!(map_db(
                        chunk_queries::append_parsed_spec_ids(
                            cx,
                            &self.pool,
                            request.tenant_id,
                            existing_id,
                            &[spec_id],
                        )
                        .await
                    ));
                }
                continue;
            }

            // Feature blocks also persist as first-class rows.
            let mut feature_block_id = None;
            if let Some(body) = &chunk.feature_body {
                let block = try_out!(map_db(
                    chunk_queries::insert_feature_block(
                        cx,
                        &self.pool,
                        FeatureBlockRow {
                            tenant_id: request.tenant_id,
                            product_id: request.product_id,
                            campaign_variant_id: campaign_id,
                            body: body.clone(),
                            ..Default::default()
                        },
                    )
                    .await
                ));
                feature_block_id = block.id;
                built.features_created += 1;
                self.lineage.record(LineageEventRow {
                    tenant_id: request.tenant_id,
                    product_id: Some(request.product_id),
                    campaign_variant_id: Some(campaign_id),
                    resource_type: "feature_block".to_string(),
                    resource_id: block.id.unwrap_or_default(),
                    ingestion_job_id: Some(job_id),
                    action: LineageAction::Created.as_str().to_string(),
                    operator: Some(request.operator.clone()),
                    ..Default::default()
                });
            }
            if chunk.chunk_type == ChunkType::Usp {
                built.usps_created += 1;
            }

            let inserted = try_out!(map_db(
                chunk_queries::insert_chunk(
                    cx,
                    &self.pool,
                    KnowledgeChunkRow {
                        tenant_id: request.tenant_id,
                        product_id: request.product_id,
                        campaign_variant_id: Some(campaign_id),
                        chunk_type: chunk.chunk_type.as_str().to_string(),
                        text: chunk.text.clone(),
                        metadata: chunk.metadata.to_string(),
                        content_hash: chunk.content_hash.clone(),
                        source_doc_id: Some(document_source_id.to_string()),
                        completion_status: chunk.completion.as_str().to_string(),
                        ..Default::default()
                    },
                )
                .await
            ));
            let chunk_id = inserted.id.unwrap_or_default();
            seen.insert(chunk.content_hash.clone(), chunk_id);

            self.lineage.record(LineageEventRow {
                tenant_id: request.tenant_id,
                product_id: Some(request.product_id),
                campaign_variant_id: Some(campaign_id),
                resource_type: "knowledge_chunk".to_string(),
                resource_id: chunk_id,
                ingestion_job_id: Some(job_id),
                action: LineageAction::Created.as_str().to_string(),
                payload: serde_json::json!({ "chunk_type": chunk.chunk_type.as_str() })
                    .to_string(),
                operator: Some(request.operator.clone()),
                ..Default::default()
            });

            built.created.push(CreatedChunk {
                chunk_id,
                chunk_type: chunk.chunk_type,
                text: chunk.text,
                metadata: chunk.metadata,
                feature_block_id,
            });
        }

        Outcome::Ok(built)
    }

    /// Embed created chunks in fixed-size batches, persist vectors, and
    /// insert them into the campaign partition. Returns the number of
    /// chunks left in `retry_needed`.
    async fn embed_and_index(
        &self,
        cx: &Cx,
        request: &IngestRequest,
        campaign_id: i64,
        created: &[CreatedChunk],
    ) -> Outcome<usize, IngestError> {
        let mut failed = 0usize;
        let batch_size = self
            .config
            .embedding_batch_size
            .clamp(1, self.config.embedding_batch_cap);

        for batch in created.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

            let results = match self.embedder.embed_batch(cx, &texts).await {
                Ok(results) => results,
                Err(batch_err) => {
                    // Full-batch failure: fall back to one-by-one so a
                    // single poisoned text can't sink its neighbours.
                    tracing::warn!(error = %batch_err, "batch embedding failed; retrying singly");
                    let mut singles = Vec::with_capacity(texts.len());
                    for text in &texts {
                        singles.push(self.embedder.embed_single(cx, text).await);
                    }
                    singles
                }
            };

            let mut entries = Vec::new();
            for (chunk, result) in batch.iter().zip(results) {
                match result {
                    Ok(embedded) => {
                        try_out!(map_db(
                            chunk_queries::update_chunk_embedding(
                                cx,
                                &self.pool,
                                request.tenant_id,
                                chunk.chunk_id,
                                &embedded.vector,
                                &embedded.model,
                                &embedded.version,
                            )
                            .await
                        ));
                        if let Some(block_id) = chunk.feature_block_id {
                            try_out!(map_db(
                                chunk_queries::update_feature_block_embedding(
                                    cx,
                                    &self.pool,
                                    request.tenant_id,
                                    block_id,
                                    &embedded.vector,
                                    &embedded.version,
                                )
                                .await
                            ));
                        }
                        entries.push(
                            IndexEntry::new(
                                chunk.chunk_id,
                                request.tenant_id,
                                request.product_id,
                                campaign_id,
                                chunk.chunk_type,
                                product_kb_core::Visibility::Private,
                                embedded.version.clone(),
                                &embedded.vector,
                            )
                            .with_metadata(chunk.metadata.clone()),
                        );
                    }
                    Err(e) => {
                        tracing::warn!(chunk_id = chunk.chunk_id, error = %e, "embedding failed");
                        failed += 1;
                        try_out!(map_db(
                            chunk_queries::mark_chunk_retry_needed(
                                cx,
                                &self.pool,
                                request.tenant_id,
                                chunk.chunk_id,
                            )
                            .await
                        ));
                    }
                }
            }

            // Vector insert happens after persistence so a replayed batch
            // is idempotent by chunk id.
            if !entries.is_empty()
                && let Err(e) = self.index.insert_batch(campaign_id, entries)
            {
                return Outcome::Err(IngestError::Internal(format!(
                    "vector index insert failed: {e}"
                )));
            }
        }

        Outcome::Ok(failed)
    }
}

impl std::fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("pool", &self.pool)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

enum Reconciled {
    Unchanged,
    Inserted(SpecValueRow),
}

struct PendingChunk {
    chunk_type: ChunkType,
    text: String,
    content_hash: String,
    completion: CompletionStatus,
    metadata: serde_json::Value,
    spec_value_id: Option<i64>,
    feature_body: Option<String>,
}

#[derive(Default)]
struct BuiltChunks {
    created: Vec<CreatedChunk>,
    deduplicated: usize,
    features_created: usize,
    usps_created: usize,
}

struct CreatedChunk {
    chunk_id: i64,
    chunk_type: ChunkType,
    text: String,
    metadata: serde_json::Value,
    feature_block_id: Option<i64>,
}

/// Whether a stored value and a fresh candidate agree.
fn values_match(existing: &SpecValueRow, candidate: &SpecCandidate) -> bool {
    let numeric_match = match (existing.value_numeric, candidate.value_numeric) {
        (Some(a), Some(b)) => (a - b).abs() < 1e-9,
        (None, None) => true,
        _ => false,
    };
    let text_match = match (existing.value_text.as_deref(), candidate.value_text.as_deref()) {
        (Some(a), Some(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        (None, None) => true,
        _ => false,
    };
    numeric_match && text_match && existing.unit.as_deref() == candidate.unit.as_deref()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(numeric: Option<f64>, text: Option<&str>, unit: Option<&str>) -> SpecValueRow {
        SpecValueRow {
            value_numeric: numeric,
            value_text: text.map(String::from),
            unit: unit.map(String::from),
            ..Default::default()
        }
    }

    fn cand(numeric: Option<f64>, text: Option<&str>, unit: Option<&str>) -> SpecCandidate {
        SpecCandidate {
            category: "Engine".to_string(),
            name: "Power".to_string(),
            raw_value: String::new(),
            value_numeric: numeric,
            value_text: text.map(String::from),
            unit: unit.map(String::from),
            key_features: None,
            variant_availability: None,
            availability_known: true,
            row_index: 0,
        }
    }

    #[test]
    fn identical_values_match() {
        assert!(values_match(
            &stored(Some(25.49), None, Some("km/l")),
            &cand(Some(25.49), None, Some("km/l"))
        ));
        assert!(values_match(
            &stored(None, Some("Leather"), None),
            &cand(None, Some("leather"), None)
        ));
    }

    #[test]
    fn differing_values_do_not_match() {
        assert!(!values_match(
            &stored(Some(25.49), None, Some("km/l")),
            &cand(Some(24.0), None, Some("km/l"))
        ));
        assert!(!values_match(
            &stored(Some(25.49), None, Some("km/l")),
            &cand(Some(25.49), None, Some("mpg"))
        ));
        assert!(!values_match(
            &stored(None, Some("Leather"), None),
            &cand(Some(5.0), None, None)
        ));
    }
}
