//! End-to-end engine scenarios: ingest brochures, then exercise retrieval,
//! comparisons, the embedding guard, and tenant isolation.

use std::sync::Arc;
use std::time::Duration;

use asupersync::Cx;
use asupersync::runtime::RuntimeBuilder;
use product_kb_core::{Config, Intent};
use product_kb_db::lineage_sink::CollectingLineageSink;
use product_kb_db::{DbPool, DbPoolConfig, queries};
use product_kb_ingest::{IngestPipeline, IngestRequest, StubExplanationClient};
use product_kb_monitor::EmbeddingGuard;
use product_kb_retrieval::{
    ComparisonMaterializer, RetrievalError, RetrievalFilters, RetrievalRequest, RetrievalRouter,
};
use product_kb_search::{Embedder, HashEmbedder, IndexManager};

const CAMRY: &str = r#"---
title: Camry 2026 Brochure
product: Camry
locale: en-IN
market: IN
---

# Toyota Camry 2026

The 2026 Camry blends hybrid efficiency with executive comfort.

## Technical Specifications

| Category | Specification | Value | Key Features | Variant Availability |
| --- | --- | --- | --- | --- |
| Engine | Fuel Efficiency | 25.49 km/l | Std | Standard |
| Engine | Displacement | 2487 cc | Hybrid | Standard |
| Comfort | Panoramic Sunroof | Yes | One-touch open | Exclusive to ZX |
| Safety | Airbags | 9 |  | Standard |

## Key Features

- Panoramic sunroof with one-touch open
"#;

const WAGON_R: &str = r#"---
title: Wagon R Brochure
product: Wagon R
locale: en-IN
market: IN
---

# Wagon R

| Category | Specification | Value |
| --- | --- | --- |
| Engine | Displacement | 998 cc |
| Dimensions | Boot Space | 341 l |
"#;

struct Engine {
    _dir: tempfile::TempDir,
    pool: DbPool,
    index: Arc<IndexManager>,
    lineage: Arc<CollectingLineageSink>,
    config: Config,
}

fn engine(dimension: usize) -> Engine {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = DbPool::new(&DbPoolConfig {
        database_url: format!("sqlite:///{}", dir.path().join("kb.db").display()),
        ..Default::default()
    })
    .expect("create pool");
    let index = Arc::new(IndexManager::new(dir.path().join("indices"), dimension));
    Engine {
        _dir: dir,
        pool,
        index,
        lineage: Arc::new(CollectingLineageSink::new()),
        config: Config::default(),
    }
}

fn pipeline(engine: &Engine, embedder: Arc<dyn Embedder>) -> Arc<IngestPipeline> {
    Arc::new(IngestPipeline::new(
        engine.pool.clone(),
        Arc::clone(&engine.index),
        embedder,
        Arc::new(StubExplanationClient),
        engine.lineage.clone(),
        engine.config.clone(),
    ))
}

fn router(engine: &Engine, embedder: Arc<dyn Embedder>) -> RetrievalRouter {
    let comparisons = Arc::new(ComparisonMaterializer::new(
        Some(engine.pool.clone()),
        Duration::from_secs(60),
        64,
    ));
    RetrievalRouter::new(
        engine.pool.clone(),
        Arc::clone(&engine.index),
        embedder,
        engine.lineage.clone(),
        comparisons,
        engine.config.clone(),
    )
}

fn block_on<F, Fut, T>(f: F) -> T
where
    F: FnOnce(Cx) -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let cx = Cx::for_testing();
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("build runtime");
    rt.block_on(f(cx))
}

fn ingest_brochure(
    engine: &Engine,
    pipeline: &Arc<IngestPipeline>,
    tenant: &str,
    product: &str,
    markdown: &str,
    auto_publish: bool,
) -> (i64, i64, i64) {
    let pool = engine.pool.clone();
    let pipeline = Arc::clone(pipeline);
    let (tenant, product, markdown) = (
        tenant.to_string(),
        product.to_string(),
        markdown.to_string(),
    );
    block_on(|cx| async move {
        let tenant_row = queries::ensure_tenant(&cx, &pool, &tenant)
            .await
            .into_result()
            .unwrap();
        let tenant_id = tenant_row.id.unwrap();
        let product_row = queries::ensure_product(&cx, &pool, tenant_id, &product, None)
            .await
            .into_result()
            .unwrap();
        let product_id = product_row.id.unwrap();
        let outcome = pipeline
            .ingest(
                &cx,
                IngestRequest {
                    tenant_id,
                    product_id,
                    campaign_id: None,
                    markdown,
                    document_source_id: None,
                    source_uri: format!("brochures/{product}.md"),
                    operator: "tester".to_string(),
                    overwrite: true,
                    auto_publish,
                    job_id: None,
                },
            )
            .await
            .into_result()
            .unwrap();
        (tenant_id, product_id, outcome.campaign_id)
    })
}

fn ask(
    router: &RetrievalRouter,
    tenant_id: i64,
    product_ids: Vec<i64>,
    question: &str,
) -> Result<product_kb_retrieval::RetrievalResponse, RetrievalError> {
    let question = question.to_string();
    block_on(|cx| async move {
        router
            .query(
                &cx,
                &RetrievalRequest {
                    tenant_id,
                    product_ids,
                    campaign_variant_id: None,
                    question,
                    intent_hint: None,
                    filters: RetrievalFilters::default(),
                    max_chunks: 0,
                    include_lineage: false,
                },
            )
            .await
            .into_result()
    })
}

#[test]
fn fuel_efficiency_question_answers_from_structured_facts() {
    let eng = engine(64);
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
    let pipe = pipeline(&eng, Arc::clone(&embedder));
    let (tenant_id, product_id, _) =
        ingest_brochure(&eng, &pipe, "acme", "Camry", CAMRY, true);

    let r = router(&eng, embedder);
    let response = ask(&r, tenant_id, vec![product_id], "What is the fuel efficiency?").unwrap();

    assert_eq!(response.intent, Intent::SpecLookup);
    let top = response.structured_facts.first().expect("structured fact");
    assert_eq!(top.value, "25.49");
    assert_eq!(top.unit.as_deref(), Some("km/l"));
    assert!(top.confidence >= 0.9);
    assert!(top.score >= 0.9);
    assert!(top.source.doc_id.is_some());
}

#[test]
fn variant_question_falls_back_to_semantic_chunks() {
    let eng = engine(64);
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
    let pipe = pipeline(&eng, Arc::clone(&embedder));
    let (tenant_id, product_id, _) =
        ingest_brochure(&eng, &pipe, "acme", "Camry", CAMRY, true);

    let r = router(&eng, embedder);
    let response = block_on(|cx| async move {
        r.query(
            &cx,
            &RetrievalRequest {
                tenant_id,
                product_ids: vec![product_id],
                campaign_variant_id: None,
                question: "Which variants have panoramic sunroof?".to_string(),
                intent_hint: None,
                filters: RetrievalFilters::default(),
                max_chunks: 20,
                include_lineage: false,
            },
        )
        .await
        .into_result()
        .unwrap()
    });

    assert!(!response.semantic_chunks.is_empty());
    assert!(
        response
            .semantic_chunks
            .iter()
            .any(|c| c.text.contains("Availability") && c.text.contains("ZX")),
        "expected an availability chunk mentioning the variant"
    );
    // Ascending distance ordering.
    for pair in response.semantic_chunks.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
}

#[test]
fn retrieval_is_deterministic_with_the_mock_embedder() {
    let eng = engine(64);
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
    let pipe = pipeline(&eng, Arc::clone(&embedder));
    let (tenant_id, product_id, _) =
        ingest_brochure(&eng, &pipe, "acme", "Camry", CAMRY, true);

    let r = router(&eng, embedder);
    let first = ask(&r, tenant_id, vec![product_id], "panoramic sunroof details").unwrap();
    r.invalidate_cache();
    let second = ask(&r, tenant_id, vec![product_id], "panoramic sunroof details").unwrap();

    assert!(!second.cache_hit);
    let facts = |resp: &product_kb_retrieval::RetrievalResponse| {
        serde_json::to_string(&resp.structured_facts).unwrap()
    };
    let chunks = |resp: &product_kb_retrieval::RetrievalResponse| {
        resp.semantic_chunks
            .iter()
            .map(|c| c.chunk_id)
            .collect::<Vec<_>>()
    };
    assert_eq!(facts(&first), facts(&second));
    assert_eq!(chunks(&first), chunks(&second));
}

#[test]
fn cache_serves_repeat_questions() {
    let eng = engine(64);
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
    let pipe = pipeline(&eng, Arc::clone(&embedder));
    let (tenant_id, product_id, _) =
        ingest_brochure(&eng, &pipe, "acme", "Camry", CAMRY, true);

    let r = router(&eng, embedder);
    let first = ask(&r, tenant_id, vec![product_id], "What is the fuel efficiency?").unwrap();
    assert!(!first.cache_hit);
    let second = ask(&r, tenant_id, vec![product_id], "What is the fuel efficiency?").unwrap();
    assert!(second.cache_hit);
    assert_eq!(
        serde_json::to_string(&first.structured_facts).unwrap(),
        serde_json::to_string(&second.structured_facts).unwrap()
    );
}

#[test]
fn mixed_embedding_versions_fail_the_query_and_queue_reembeds() {
    let eng = engine(64);
    let v1: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
    let pipe_v1 = pipeline(&eng, Arc::clone(&v1));
    let (tenant_id, product_id, campaign_id) =
        ingest_brochure(&eng, &pipe_v1, "acme", "Camry", CAMRY, true);

    // A second ingest into the same campaign with a newer embedding
    // version poisons the campaign.
    let v2: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64).with_version("hash-v2"));
    let pipe_v2 = pipeline(&eng, Arc::clone(&v2));
    let pool = eng.pool.clone();
    block_on(|cx| {
        let pipe_v2 = Arc::clone(&pipe_v2);
        async move {
            pipe_v2
                .ingest(
                    &cx,
                    IngestRequest {
                        tenant_id,
                        product_id,
                        campaign_id: Some(campaign_id),
                        markdown: CAMRY
                            .replace("Panoramic Sunroof | Yes", "Heated Steering | Yes"),
                        document_source_id: Some("doc-camry-v2".to_string()),
                        source_uri: "brochures/camry-v2.md".to_string(),
                        operator: "tester".to_string(),
                        overwrite: false,
                        auto_publish: false,
                        job_id: None,
                    },
                )
                .await
                .into_result()
                .unwrap()
        }
    });

    let r = router(&eng, v1);
    let err = ask(&r, tenant_id, vec![product_id], "What is the boot space?").unwrap_err();
    assert!(matches!(err, RetrievalError::MixedVersions(_)));
    assert_eq!(err.error_code(), "MIXED_VERSIONS");

    // The guard reports the lagging resources and queues pending jobs.
    let guard = EmbeddingGuard::new(eng.pool.clone(), "hash-v2");
    let mismatches = block_on(|cx| {
        let guard = guard.clone();
        async move {
            guard
                .check_mismatches(&cx, tenant_id, campaign_id)
                .await
                .into_result()
                .unwrap()
        }
    });
    assert!(!mismatches.is_empty());
    for m in &mismatches {
        assert_eq!(m.current_version, "hash-v1");
        assert_eq!(m.target_version, "hash-v2");
    }

    let pending = block_on(|cx| async move {
        product_kb_db::audit_queries::pending_reembed_jobs(&cx, &pool, tenant_id)
            .await
            .into_result()
            .unwrap()
    });
    assert_eq!(pending.len(), mismatches.len());
    assert!(pending.iter().all(|j| j.status == "pending"));
}

#[test]
fn comparison_intent_serves_empty_when_nothing_is_materialized() {
    let eng = engine(64);
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
    let pipe = pipeline(&eng, Arc::clone(&embedder));
    let (tenant_id, camry_id, _) = ingest_brochure(&eng, &pipe, "acme", "Camry", CAMRY, true);
    let (_, accord_id, _) = ingest_brochure(&eng, &pipe, "acme", "Accord", WAGON_R, true);

    let r = router(&eng, embedder);
    let response = ask(
        &r,
        tenant_id,
        vec![camry_id, accord_id],
        "Compare Camry with Accord",
    )
    .unwrap();

    assert_eq!(response.intent, Intent::Comparison);
    assert!(response.comparisons.is_empty());
    assert!(response.structured_facts.is_empty());
    assert!(response.semantic_chunks.is_empty());
}

#[test]
fn foreign_product_ids_return_zero_rows_not_an_error() {
    let eng = engine(64);
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
    let pipe = pipeline(&eng, Arc::clone(&embedder));

    // Tenant B owns the published content.
    let (_tenant_b, product_b, _) = ingest_brochure(&eng, &pipe, "rival", "Camry", CAMRY, true);

    // Tenant A exists but owns nothing.
    let pool = eng.pool.clone();
    let tenant_a = block_on(|cx| async move {
        queries::ensure_tenant(&cx, &pool, "acme")
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap()
    });

    let r = router(&eng, embedder);
    let response = ask(&r, tenant_a, vec![product_b], "What is the fuel efficiency?").unwrap();
    assert!(response.structured_facts.is_empty());
    assert!(response.semantic_chunks.is_empty());

    // The empty result is still recorded in lineage.
    let events = eng.lineage.events();
    let retrieval_events: Vec<_> = events
        .iter()
        .filter(|e| e.resource_type == "retrieval_request" && e.tenant_id == tenant_a)
        .collect();
    assert_eq!(retrieval_events.len(), 1);
    let payload: serde_json::Value =
        serde_json::from_str(&retrieval_events[0].payload).unwrap();
    assert_eq!(payload["structured_count"], 0);
    assert_eq!(payload["semantic_count"], 0);
}

#[test]
fn materialized_comparisons_surface_through_the_router() {
    let eng = engine(64);
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
    let pipe = pipeline(&eng, Arc::clone(&embedder));
    let (tenant_id, camry_id, _) = ingest_brochure(&eng, &pipe, "acme", "Camry", CAMRY, true);
    let (_, accord_id, _) = ingest_brochure(&eng, &pipe, "acme", "Accord", WAGON_R, true);

    let r = router(&eng, embedder);
    block_on(|cx| {
        let comparisons = r.comparisons();
        async move {
            comparisons
                .materialize(
                    &cx,
                    tenant_id,
                    camry_id,
                    accord_id,
                    &[product_kb_retrieval::ComparisonRow {
                        dimension: "mileage".to_string(),
                        primary_value: "25.49 km/l".to_string(),
                        secondary_value: "23.76 km/l".to_string(),
                        verdict: "better".to_string(),
                        narrative: "Camry leads on mileage.".to_string(),
                        shareability: "restricted".to_string(),
                    }],
                )
                .await
                .into_result()
                .unwrap()
        }
    });

    let response = ask(
        &r,
        tenant_id,
        vec![camry_id, accord_id],
        "Compare Camry with Accord",
    )
    .unwrap();
    assert_eq!(response.comparisons.len(), 1);
    assert_eq!(response.comparisons[0].dimension, "mileage");
    assert_eq!(response.comparisons[0].verdict, "better");
}
