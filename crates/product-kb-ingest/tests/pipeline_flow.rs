//! Ingestion pipeline integration tests: parse → reconcile → dedup →
//! explain → embed → index → lineage, against a real on-disk store.

use std::sync::Arc;

use asupersync::Cx;
use asupersync::runtime::RuntimeBuilder;
use product_kb_core::Config;
use product_kb_db::lineage_sink::CollectingLineageSink;
use product_kb_db::{DbPool, DbPoolConfig, chunk_queries, queries, spec_queries};
use product_kb_ingest::{
    FailingExplanationClient, IngestError, IngestPipeline, IngestRequest, StubExplanationClient,
};
use product_kb_search::{Embedder, FailingEmbedder, HashEmbedder, IndexManager};

const BROCHURE: &str = r#"---
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

## Key Features

- Panoramic sunroof with one-touch open
- 9-speaker JBL audio system

## Unique Selling Points

- Best-in-class fuel efficiency of 25.49 km/l
"#;

struct Harness {
    _dir: tempfile::TempDir,
    pool: DbPool,
    index: Arc<IndexManager>,
    lineage: Arc<CollectingLineageSink>,
    tenant_id: i64,
    product_id: i64,
}

fn harness(embedder: Arc<dyn Embedder>, explainer_fails: bool) -> (Harness, Arc<IngestPipeline>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = DbPool::new(&DbPoolConfig {
        database_url: format!("sqlite:///{}", dir.path().join("kb.db").display()),
        ..Default::default()
    })
    .expect("create pool");
    let index = Arc::new(IndexManager::new(dir.path().join("indices"), embedder.dimension()));
    let lineage = Arc::new(CollectingLineageSink::new());

    let explainer: Arc<dyn product_kb_ingest::ExplanationClient> = if explainer_fails {
        Arc::new(FailingExplanationClient)
    } else {
        Arc::new(StubExplanationClient)
    };

    let pipeline = Arc::new(IngestPipeline::new(
        pool.clone(),
        Arc::clone(&index),
        embedder,
        explainer,
        lineage.clone(),
        Config::default(),
    ));

    let (tenant_id, product_id) = block_on(|cx| {
        let pool = pool.clone();
        async move {
            let tenant = queries::ensure_tenant(&cx, &pool, "acme")
                .await
                .into_result()
                .unwrap();
            let product =
                queries::ensure_product(&cx, &pool, tenant.id.unwrap(), "Camry", Some(2026))
                    .await
                    .into_result()
                    .unwrap();
            (tenant.id.unwrap(), product.id.unwrap())
        }
    });

    (
        Harness {
            _dir: dir,
            pool,
            index,
            lineage,
            tenant_id,
            product_id,
        },
        pipeline,
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

fn request(h: &Harness, overwrite: bool, auto_publish: bool) -> IngestRequest {
    IngestRequest {
        tenant_id: h.tenant_id,
        product_id: h.product_id,
        campaign_id: None,
        markdown: BROCHURE.to_string(),
        document_source_id: Some("doc-camry-2026".to_string()),
        source_uri: "brochures/camry-2026.md".to_string(),
        operator: "tester".to_string(),
        overwrite,
        auto_publish,
        job_id: None,
    }
}

#[test]
fn ingest_creates_specs_chunks_and_vectors() {
    let (h, pipeline) = harness(Arc::new(HashEmbedder::new(64)), false);
    let outcome = block_on(|cx| {
        let pipeline = Arc::clone(&pipeline);
        let req = request(&h, false, false);
        async move { pipeline.ingest(&cx, req).await.into_result().unwrap() }
    });

    assert_eq!(outcome.specs_created, 3);
    assert_eq!(outcome.features_created, 2);
    assert_eq!(outcome.usps_created, 1);
    // 3 row chunks + 2 features + 1 USP + 1 paragraph.
    assert_eq!(outcome.chunks_created, 7);
    assert_eq!(outcome.conflicts, 0);
    assert_eq!(outcome.embeddings_failed, 0);

    // Every created chunk is in the campaign's vector partition.
    assert_eq!(h.index.count(outcome.campaign_id).unwrap(), 7);

    // Chunks persisted with vectors and version tags.
    block_on(|cx| {
        let pool = h.pool.clone();
        let tenant_id = h.tenant_id;
        let campaign_id = outcome.campaign_id;
        async move {
            let chunks = chunk_queries::chunks_for_campaign(&cx, &pool, tenant_id, campaign_id)
                .await
                .into_result()
                .unwrap();
            assert_eq!(chunks.len(), 7);
            for chunk in &chunks {
                assert_eq!(chunk.completion_status, "complete");
                assert!(chunk.embedding().is_some());
                assert_eq!(chunk.embedding_version.as_deref(), Some("hash-v1"));
            }
        }
    });
}

#[test]
fn reingest_is_a_noop_and_dedupes_chunks() {
    let (h, pipeline) = harness(Arc::new(HashEmbedder::new(64)), false);
    let first = block_on(|cx| {
        let pipeline = Arc::clone(&pipeline);
        let req = request(&h, false, false);
        async move { pipeline.ingest(&cx, req).await.into_result().unwrap() }
    });
    let second = block_on(|cx| {
        let pipeline = Arc::clone(&pipeline);
        let req = request(&h, false, false);
        async move { pipeline.ingest(&cx, req).await.into_result().unwrap() }
    });

    // Identical values are no-ops; identical chunks dedupe against the
    // store.
    assert_eq!(second.specs_created, 0);
    assert_eq!(second.chunks_created, 0);
    assert_eq!(second.chunks_deduplicated, first.chunks_created);
    assert_eq!(second.conflicts, 0);
    assert_eq!(h.index.count(first.campaign_id).unwrap(), 7);
}

#[test]
fn changed_value_marks_conflict_and_blocks_publish() {
    let (h, pipeline) = harness(Arc::new(HashEmbedder::new(64)), false);
    let first = block_on(|cx| {
        let pipeline = Arc::clone(&pipeline);
        let req = request(&h, false, false);
        async move { pipeline.ingest(&cx, req).await.into_result().unwrap() }
    });

    let conflicting = BROCHURE.replace("25.49 km/l", "21.00 km/l");
    let second = block_on(|cx| {
        let pipeline = Arc::clone(&pipeline);
        let mut req = request(&h, false, false);
        req.markdown = conflicting;
        async move { pipeline.ingest(&cx, req).await.into_result().unwrap() }
    });
    assert_eq!(second.conflicts, 1);

    let err = block_on(|cx| {
        let pool = h.pool.clone();
        let lineage = h.lineage.clone();
        let tenant_id = h.tenant_id;
        let campaign_id = first.campaign_id;
        async move {
            product_kb_ingest::publish(
                &cx,
                &pool,
                lineage.as_ref(),
                tenant_id,
                campaign_id,
                None,
                "tester",
            )
            .await
            .into_result()
            .unwrap_err()
        }
    });
    assert_eq!(err.error_code(), "CONFLICT_EXISTS");
    assert!(matches!(err, IngestError::Db(_)));
}

#[test]
fn embedding_outage_never_blocks_ingestion() {
    let (h, pipeline) = harness(Arc::new(FailingEmbedder::new(64)), false);
    let outcome = block_on(|cx| {
        let pipeline = Arc::clone(&pipeline);
        let req = request(&h, false, false);
        async move { pipeline.ingest(&cx, req).await.into_result().unwrap() }
    });

    assert_eq!(outcome.chunks_created, 7);
    assert_eq!(outcome.embeddings_failed, 7);
    assert_eq!(h.index.count(outcome.campaign_id).unwrap(), 0);

    block_on(|cx| {
        let pool = h.pool.clone();
        let tenant_id = h.tenant_id;
        async move {
            let retry = chunk_queries::chunks_needing_retry(&cx, &pool, tenant_id)
                .await
                .into_result()
                .unwrap();
            assert_eq!(retry.len(), 7);
        }
    });
}

#[test]
fn explanations_follow_guardrails_or_record_failure() {
    // Stub explainer: every active value gets a valid sentence.
    let (h, pipeline) = harness(Arc::new(HashEmbedder::new(64)), false);
    let outcome = block_on(|cx| {
        let pipeline = Arc::clone(&pipeline);
        let req = request(&h, false, false);
        async move { pipeline.ingest(&cx, req).await.into_result().unwrap() }
    });
    block_on(|cx| {
        let pool = h.pool.clone();
        let tenant_id = h.tenant_id;
        let campaign_id = outcome.campaign_id;
        async move {
            let view =
                spec_queries::spec_view_for_products(&cx, &pool, tenant_id, &[h.product_id], Some(campaign_id))
                    .await
                    .into_result()
                    .unwrap();
            assert_eq!(view.len(), 3);
            for row in &view {
                let explanation = row.explanation.as_deref().expect("explanation stored");
                assert!(explanation.chars().count() <= 200);
                assert!(explanation.ends_with(['.', '!', '?']));
                assert!(!explanation.contains('\n'));
            }
        }
    });

    // Failing explainer: null explanation + explanation_failed flag.
    let (h2, pipeline2) = harness(Arc::new(HashEmbedder::new(64)), true);
    let outcome2 = block_on(|cx| {
        let pipeline2 = Arc::clone(&pipeline2);
        let req = request(&h2, false, false);
        async move { pipeline2.ingest(&cx, req).await.into_result().unwrap() }
    });
    block_on(|cx| {
        let pool = h2.pool.clone();
        let tenant_id = h2.tenant_id;
        let campaign_id = outcome2.campaign_id;
        async move {
            let item = spec_queries::upsert_spec_item(
                &cx, &pool, "Engine", "Fuel Efficiency", Some("km/l"), "numeric",
            )
            .await
            .into_result()
            .unwrap();
            let value = spec_queries::active_spec_value(
                &cx,
                &pool,
                tenant_id,
                campaign_id,
                item.id.unwrap(),
            )
            .await
            .into_result()
            .unwrap()
            .expect("active value");
            assert!(value.explanation.is_none());
            assert!(value.explanation_failed_bool());
        }
    });
}

#[test]
fn lineage_covers_job_and_every_created_resource() {
    let (h, pipeline) = harness(Arc::new(HashEmbedder::new(64)), false);
    let outcome = block_on(|cx| {
        let pipeline = Arc::clone(&pipeline);
        let req = request(&h, false, false);
        async move { pipeline.ingest(&cx, req).await.into_result().unwrap() }
    });

    let events = h.lineage.events();
    let job_events: Vec<_> = events
        .iter()
        .filter(|e| e.resource_type == "ingestion_job")
        .collect();
    assert_eq!(job_events.len(), 2);
    assert_eq!(job_events[0].action, "created");
    assert_eq!(job_events[1].action, "updated");

    let spec_created = events
        .iter()
        .filter(|e| e.resource_type == "spec_value" && e.action == "created")
        .count();
    assert_eq!(spec_created, outcome.specs_created);

    let chunk_created = events
        .iter()
        .filter(|e| e.resource_type == "knowledge_chunk" && e.action == "created")
        .count();
    assert_eq!(chunk_created, outcome.chunks_created);

    let feature_created = events
        .iter()
        .filter(|e| e.resource_type == "feature_block" && e.action == "created")
        .count();
    assert_eq!(feature_created, outcome.features_created);

    // Every event carries the job id and the tenant.
    for event in &events {
        assert_eq!(event.tenant_id, h.tenant_id);
        assert_eq!(event.ingestion_job_id, Some(outcome.job_id));
    }
}

#[test]
fn auto_publish_flips_the_draft() {
    let (h, pipeline) = harness(Arc::new(HashEmbedder::new(64)), false);
    let outcome = block_on(|cx| {
        let pipeline = Arc::clone(&pipeline);
        let req = request(&h, true, true);
        async move { pipeline.ingest(&cx, req).await.into_result().unwrap() }
    });

    block_on(|cx| {
        let pool = h.pool.clone();
        let tenant_id = h.tenant_id;
        async move {
            let published = queries::published_campaigns(&cx, &pool, tenant_id)
                .await
                .into_result()
                .unwrap();
            assert_eq!(published.len(), 1);
            assert_eq!(published[0].id, Some(outcome.campaign_id));
            assert_eq!(published[0].last_published_by.as_deref(), Some("tester"));
        }
    });

    let publish_events: Vec<_> = h
        .lineage
        .events()
        .into_iter()
        .filter(|e| e.action == "published")
        .collect();
    assert_eq!(publish_events.len(), 1);
}

#[test]
fn feature_blocks_persist_with_embeddings() {
    let (h, pipeline) = harness(Arc::new(HashEmbedder::new(64)), false);
    let outcome = block_on(|cx| {
        let pipeline = Arc::clone(&pipeline);
        let req = request(&h, false, false);
        async move { pipeline.ingest(&cx, req).await.into_result().unwrap() }
    });

    block_on(|cx| {
        let pool = h.pool.clone();
        let tenant_id = h.tenant_id;
        let campaign_id = outcome.campaign_id;
        async move {
            let blocks =
                chunk_queries::feature_blocks_for_campaign(&cx, &pool, tenant_id, campaign_id)
                    .await
                    .into_result()
                    .unwrap();
            assert_eq!(blocks.len(), 2);
            for block in &blocks {
                assert!(block.embedding.is_some());
                assert_eq!(block.embedding_version.as_deref(), Some("hash-v1"));
            }
        }
    });
}

#[test]
fn rollback_revives_the_prior_published_version() {
    let (h, pipeline) = harness(Arc::new(HashEmbedder::new(64)), false);
    let first = block_on(|cx| {
        let pipeline = Arc::clone(&pipeline);
        let req = request(&h, false, true);
        async move { pipeline.ingest(&cx, req).await.into_result().unwrap() }
    });

    // A second brochure version publishes on top.
    let second = block_on(|cx| {
        let pipeline = Arc::clone(&pipeline);
        let mut req = request(&h, false, true);
        req.markdown = BROCHURE.replace("25.49 km/l", "26.10 km/l");
        async move { pipeline.ingest(&cx, req).await.into_result().unwrap() }
    });
    assert_ne!(second.campaign_id, first.campaign_id);

    let revived = block_on(|cx| {
        let pool = h.pool.clone();
        let lineage = h.lineage.clone();
        let tenant_id = h.tenant_id;
        let campaign_id = second.campaign_id;
        async move {
            product_kb_ingest::rollback(
                &cx,
                &pool,
                lineage.as_ref(),
                tenant_id,
                campaign_id,
                1,
                "tester",
            )
            .await
            .into_result()
            .unwrap()
        }
    });
    assert_eq!(revived.id, Some(first.campaign_id));
    assert_eq!(revived.version, 1);

    block_on(|cx| {
        let pool = h.pool.clone();
        let tenant_id = h.tenant_id;
        async move {
            let open = queries::published_campaigns(&cx, &pool, tenant_id)
                .await
                .into_result()
                .unwrap();
            assert_eq!(open.len(), 1);
            assert_eq!(open[0].version, 1);
        }
    });
    assert!(
        h.lineage
            .events()
            .iter()
            .any(|e| e.action == "rolled_back")
    );
}

#[test]
fn overwrite_resets_draft_contents() {
    let (h, pipeline) = harness(Arc::new(HashEmbedder::new(64)), false);
    let first = block_on(|cx| {
        let pipeline = Arc::clone(&pipeline);
        let req = request(&h, false, false);
        async move { pipeline.ingest(&cx, req).await.into_result().unwrap() }
    });
    // Overwrite re-ingests from scratch: same counts, no dedup hits.
    let second = block_on(|cx| {
        let pipeline = Arc::clone(&pipeline);
        let req = request(&h, true, false);
        async move { pipeline.ingest(&cx, req).await.into_result().unwrap() }
    });

    assert_eq!(second.campaign_id, first.campaign_id);
    assert_eq!(second.specs_created, first.specs_created);
    assert_eq!(second.chunks_created, first.chunks_created);
    assert_eq!(second.chunks_deduplicated, 0);
    assert_eq!(h.index.count(first.campaign_id).unwrap(), 7);
}
