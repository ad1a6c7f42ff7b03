//! Fact-store integration tests over a real on-disk SQLite database.

use asupersync::Cx;
use asupersync::runtime::RuntimeBuilder;
use product_kb_db::{
    ComparisonRowRecord, DbError, DbPool, DbPoolConfig, KnowledgeChunkRow, LineageEventRow,
    ReembedJobRow, SpecValueRow, audit_queries, chunk_queries, comparison_pair_key, queries,
    spec_queries,
};

fn setup() -> (tempfile::TempDir, DbPool) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("store.db");
    let pool = DbPool::new(&DbPoolConfig {
        database_url: format!("sqlite:///{}", db_path.display()),
        ..Default::default()
    })
    .expect("create pool");
    (dir, pool)
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

#[test]
fn ensure_tenant_is_idempotent() {
    let (_dir, pool) = setup();
    block_on(|cx| async move {
        let a = queries::ensure_tenant(&cx, &pool, "acme")
            .await
            .into_result()
            .unwrap();
        let b = queries::ensure_tenant(&cx, &pool, "acme")
            .await
            .into_result()
            .unwrap();
        assert_eq!(a.id, b.id);

        let ids = queries::list_tenant_ids(&cx, &pool)
            .await
            .into_result()
            .unwrap();
        assert_eq!(ids.len(), 1);
    });
}

#[test]
fn products_are_tenant_scoped() {
    let (_dir, pool) = setup();
    block_on(|cx| async move {
        let tenant_a = queries::ensure_tenant(&cx, &pool, "a")
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();
        let tenant_b = queries::ensure_tenant(&cx, &pool, "b")
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();

        let product = queries::ensure_product(&cx, &pool, tenant_a, "Camry", Some(2026))
            .await
            .into_result()
            .unwrap();
        let product_id = product.id.unwrap();

        // Visible in its own tenant, invisible from the other.
        assert!(
            queries::get_product(&cx, &pool, tenant_a, product_id)
                .await
                .into_result()
                .unwrap()
                .is_some()
        );
        assert!(
            queries::get_product(&cx, &pool, tenant_b, product_id)
                .await
                .into_result()
                .unwrap()
                .is_none()
        );
    });
}

#[test]
fn draft_campaign_versions_are_monotonic() {
    let (_dir, pool) = setup();
    block_on(|cx| async move {
        let tenant = queries::ensure_tenant(&cx, &pool, "a")
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();
        let product = queries::ensure_product(&cx, &pool, tenant, "Camry", None)
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();

        let draft1 = queries::open_draft_campaign(&cx, &pool, tenant, product, "en-IN", "", "IN")
            .await
            .into_result()
            .unwrap();
        assert_eq!(draft1.version, 1);

        // Re-opening returns the same draft.
        let same = queries::open_draft_campaign(&cx, &pool, tenant, product, "en-IN", "", "IN")
            .await
            .into_result()
            .unwrap();
        assert_eq!(same.id, draft1.id);

        queries::publish_campaign(&cx, &pool, tenant, draft1.id.unwrap(), None, "tester")
            .await
            .into_result()
            .unwrap();

        // Next draft for the tuple bumps the version.
        let draft2 = queries::open_draft_campaign(&cx, &pool, tenant, product, "en-IN", "", "IN")
            .await
            .into_result()
            .unwrap();
        assert_eq!(draft2.version, 2);

        // A different locale starts its own version sequence.
        let other = queries::open_draft_campaign(&cx, &pool, tenant, product, "de-DE", "", "DE")
            .await
            .into_result()
            .unwrap();
        assert_eq!(other.version, 1);
    });
}

#[test]
fn publish_enforces_single_open_row_and_refusals() {
    let (_dir, pool) = setup();
    block_on(|cx| async move {
        let tenant = queries::ensure_tenant(&cx, &pool, "a")
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();
        let product = queries::ensure_product(&cx, &pool, tenant, "Camry", None)
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();

        let v1 = queries::open_draft_campaign(&cx, &pool, tenant, product, "en", "", "")
            .await
            .into_result()
            .unwrap();
        let v1_id = v1.id.unwrap();
        let published = queries::publish_campaign(&cx, &pool, tenant, v1_id, Some(1), "tester")
            .await
            .into_result()
            .unwrap();
        assert_eq!(published.status, "published");
        assert!(published.effective_through.is_none());

        // Publishing a published campaign is refused.
        let err = queries::publish_campaign(&cx, &pool, tenant, v1_id, None, "tester")
            .await
            .into_result()
            .unwrap_err();
        assert!(matches!(err, DbError::NotDraft { .. }));

        // Publish v2; exactly one open published row remains.
        let v2 = queries::open_draft_campaign(&cx, &pool, tenant, product, "en", "", "")
            .await
            .into_result()
            .unwrap();
        queries::publish_campaign(&cx, &pool, tenant, v2.id.unwrap(), None, "tester")
            .await
            .into_result()
            .unwrap();

        let open = queries::published_campaigns(&cx, &pool, tenant)
            .await
            .into_result()
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, v2.id);
        assert_eq!(open[0].version, 2);

        // Rollback revives v1 as the open published row.
        let revived =
            queries::rollback_campaign(&cx, &pool, tenant, open[0].id.unwrap(), 1, "tester")
                .await
                .into_result()
                .unwrap();
        assert_eq!(revived.id, Some(v1_id));
        let open = queries::published_campaigns(&cx, &pool, tenant)
            .await
            .into_result()
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].version, 1);
    });
}

#[test]
fn conflicted_values_block_publishing() {
    let (_dir, pool) = setup();
    block_on(|cx| async move {
        let tenant = queries::ensure_tenant(&cx, &pool, "a")
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();
        let product = queries::ensure_product(&cx, &pool, tenant, "Camry", None)
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();
        let campaign = queries::open_draft_campaign(&cx, &pool, tenant, product, "en", "", "")
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();
        let item = spec_queries::upsert_spec_item(&cx, &pool, "Engine", "Power", Some("kW"), "numeric")
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();

        spec_queries::insert_spec_value(
            &cx,
            &pool,
            SpecValueRow {
                tenant_id: tenant,
                product_id: product,
                campaign_variant_id: campaign,
                spec_item_id: item,
                value_numeric: Some(120.0),
                status: "conflict".to_string(),
                ..Default::default()
            },
        )
        .await
        .into_result()
        .unwrap();

        let err = queries::publish_campaign(&cx, &pool, tenant, campaign, None, "tester")
            .await
            .into_result()
            .unwrap_err();
        assert!(matches!(err, DbError::ConflictExists { conflicts: 1, .. }));
        assert_eq!(
            spec_queries::count_conflicts(&cx, &pool, tenant, campaign)
                .await
                .into_result()
                .unwrap(),
            1
        );
    });
}

#[test]
fn spec_value_invariant_rejects_double_values() {
    let (_dir, pool) = setup();
    block_on(|cx| async move {
        let err = spec_queries::insert_spec_value(
            &cx,
            &pool,
            SpecValueRow {
                tenant_id: 1,
                value_numeric: Some(1.0),
                value_text: Some("one".to_string()),
                ..Default::default()
            },
        )
        .await
        .into_result()
        .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument { .. }));
    });
}

#[test]
fn chunk_dedup_accumulates_parsed_spec_ids() {
    let (_dir, pool) = setup();
    block_on(|cx| async move {
        let tenant = queries::ensure_tenant(&cx, &pool, "a")
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();

        let chunk = chunk_queries::insert_chunk(
            &cx,
            &pool,
            KnowledgeChunkRow {
                tenant_id: tenant,
                product_id: 1,
                chunk_type: "spec_fact".to_string(),
                text: "Engine > Power: 120 kW".to_string(),
                metadata: r#"{"parsed_spec_ids":[11]}"#.to_string(),
                content_hash: "abc123".to_string(),
                ..Default::default()
            },
        )
        .await
        .into_result()
        .unwrap();
        let chunk_id = chunk.id.unwrap();

        let found = chunk_queries::find_chunk_by_hash(&cx, &pool, tenant, "abc123")
            .await
            .into_result()
            .unwrap()
            .expect("chunk by hash");
        assert_eq!(found.id, Some(chunk_id));

        // Second source row lands on the same chunk.
        chunk_queries::append_parsed_spec_ids(&cx, &pool, tenant, chunk_id, &[22])
            .await
            .into_result()
            .unwrap();
        // Appending an already-present id is a no-op.
        chunk_queries::append_parsed_spec_ids(&cx, &pool, tenant, chunk_id, &[11])
            .await
            .into_result()
            .unwrap();

        let reloaded = chunk_queries::find_chunk_by_hash(&cx, &pool, tenant, "abc123")
            .await
            .into_result()
            .unwrap()
            .unwrap();
        let metadata: serde_json::Value = serde_json::from_str(&reloaded.metadata).unwrap();
        assert_eq!(metadata["parsed_spec_ids"], serde_json::json!([11, 22]));

        // Other tenants never see the chunk.
        assert!(
            chunk_queries::find_chunk_by_hash(&cx, &pool, tenant + 1, "abc123")
                .await
                .into_result()
                .unwrap()
                .is_none()
        );
    });
}

#[test]
fn lineage_batch_preserves_emission_order() {
    let (_dir, pool) = setup();
    block_on(|cx| async move {
        let tenant = queries::ensure_tenant(&cx, &pool, "a")
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();

        let events: Vec<LineageEventRow> = (0..5)
            .map(|i| LineageEventRow {
                tenant_id: tenant,
                resource_type: "spec_value".to_string(),
                resource_id: 42,
                action: "created".to_string(),
                payload: format!(r#"{{"seq":{i}}}"#),
                occurred_at: 1000 + i,
                ..Default::default()
            })
            .collect();
        let written = audit_queries::insert_lineage_events(&cx, &pool, &events)
            .await
            .into_result()
            .unwrap();
        assert_eq!(written, 5);

        let trail = audit_queries::lineage_for_resource(&cx, &pool, tenant, "spec_value", 42)
            .await
            .into_result()
            .unwrap();
        assert_eq!(trail.len(), 5);
        let times: Vec<i64> = trail.iter().map(|e| e.occurred_at).collect();
        let mut sorted = times.clone();
        sorted.sort_unstable();
        assert_eq!(times, sorted);
    });
}

#[test]
fn reembed_jobs_do_not_duplicate_pending_work() {
    let (_dir, pool) = setup();
    block_on(|cx| async move {
        let job = ReembedJobRow {
            tenant_id: 1,
            resource_type: "knowledge_chunk".to_string(),
            resource_id: 7,
            current_version: "v1".to_string(),
            target_version: "v2".to_string(),
            ..Default::default()
        };
        let first = audit_queries::enqueue_reembed_job(&cx, &pool, job.clone())
            .await
            .into_result()
            .unwrap();
        let second = audit_queries::enqueue_reembed_job(&cx, &pool, job)
            .await
            .into_result()
            .unwrap();
        assert_eq!(first.id, second.id);

        let pending = audit_queries::pending_reembed_jobs(&cx, &pool, 1)
            .await
            .into_result()
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, "pending");
    });
}

#[test]
fn comparison_rows_round_trip_with_dimension_filter() {
    let (_dir, pool) = setup();
    block_on(|cx| async move {
        let pair = comparison_pair_key(9, 3);
        let rows = vec![
            ComparisonRowRecord {
                tenant_id: 1,
                pair_key: pair.clone(),
                primary_product_id: 3,
                secondary_product_id: 9,
                dimension: "mileage".to_string(),
                primary_value: "25.49 km/l".to_string(),
                secondary_value: "23.1 km/l".to_string(),
                verdict: "better".to_string(),
                ..Default::default()
            },
            ComparisonRowRecord {
                tenant_id: 1,
                pair_key: pair.clone(),
                primary_product_id: 3,
                secondary_product_id: 9,
                dimension: "power".to_string(),
                primary_value: "131 kW".to_string(),
                secondary_value: "143 kW".to_string(),
                verdict: "worse".to_string(),
                ..Default::default()
            },
        ];
        audit_queries::upsert_comparison_rows(&cx, &pool, &rows)
            .await
            .into_result()
            .unwrap();
        // Upsert is idempotent on (tenant, pair, dimension).
        audit_queries::upsert_comparison_rows(&cx, &pool, &rows)
            .await
            .into_result()
            .unwrap();

        let all = audit_queries::comparison_rows_for_pair(&cx, &pool, 1, &pair, None, 10)
            .await
            .into_result()
            .unwrap();
        assert_eq!(all.len(), 2);

        let filtered = audit_queries::comparison_rows_for_pair(
            &cx,
            &pool,
            1,
            &pair,
            Some(&["Mileage".to_string()]),
            10,
        )
        .await
        .into_result()
        .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].dimension, "mileage");
    });
}

#[test]
fn supersede_retires_the_prior_active_value() {
    let (_dir, pool) = setup();
    block_on(|cx| async move {
        let tenant = queries::ensure_tenant(&cx, &pool, "a")
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();
        let item = spec_queries::upsert_spec_item(&cx, &pool, "Engine", "Power", Some("kW"), "numeric")
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();

        let v1 = spec_queries::insert_spec_value(
            &cx,
            &pool,
            SpecValueRow {
                tenant_id: tenant,
                product_id: 1,
                campaign_variant_id: 1,
                spec_item_id: item,
                value_numeric: Some(120.0),
                ..Default::default()
            },
        )
        .await
        .into_result()
        .unwrap();
        spec_queries::supersede_spec_value(&cx, &pool, tenant, v1.id.unwrap())
            .await
            .into_result()
            .unwrap();

        let v2 = spec_queries::insert_spec_value(
            &cx,
            &pool,
            SpecValueRow {
                tenant_id: tenant,
                product_id: 1,
                campaign_variant_id: 1,
                spec_item_id: item,
                value_numeric: Some(131.0),
                version: 2,
                ..Default::default()
            },
        )
        .await
        .into_result()
        .unwrap();

        let active = spec_queries::active_spec_value(&cx, &pool, tenant, 1, item)
            .await
            .into_result()
            .unwrap()
            .expect("active value");
        assert_eq!(active.id, v2.id);
        assert_eq!(active.version, 2);
    });
}

#[test]
fn campaign_cascade_delete_removes_owned_rows() {
    let (_dir, pool) = setup();
    block_on(|cx| async move {
        let tenant = queries::ensure_tenant(&cx, &pool, "a")
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();
        let product = queries::ensure_product(&cx, &pool, tenant, "Camry", None)
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();
        let campaign = queries::open_draft_campaign(&cx, &pool, tenant, product, "en", "", "")
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();
        chunk_queries::insert_chunk(
            &cx,
            &pool,
            KnowledgeChunkRow {
                tenant_id: tenant,
                product_id: product,
                campaign_variant_id: Some(campaign),
                chunk_type: "paragraph".to_string(),
                text: "body".to_string(),
                content_hash: "hash-cascade".to_string(),
                ..Default::default()
            },
        )
        .await
        .into_result()
        .unwrap();

        queries::delete_campaign_cascade(&cx, &pool, tenant, campaign)
            .await
            .into_result()
            .unwrap();

        assert!(
            queries::get_campaign(&cx, &pool, tenant, campaign)
                .await
                .into_result()
                .unwrap()
                .is_none()
        );
        assert!(
            chunk_queries::find_chunk_by_hash(&cx, &pool, tenant, "hash-cascade")
                .await
                .into_result()
                .unwrap()
                .is_none()
        );
    });
}

#[test]
fn single_lineage_append_and_job_trail() {
    let (_dir, pool) = setup();
    block_on(|cx| async move {
        let tenant = queries::ensure_tenant(&cx, &pool, "a")
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();
        audit_queries::insert_lineage_event(
            &cx,
            &pool,
            &LineageEventRow {
                tenant_id: tenant,
                resource_type: "knowledge_chunk".to_string(),
                resource_id: 5,
                ingestion_job_id: Some(99),
                action: "created".to_string(),
                ..Default::default()
            },
        )
        .await
        .into_result()
        .unwrap();

        let by_job = audit_queries::lineage_for_job(&cx, &pool, tenant, 99)
            .await
            .into_result()
            .unwrap();
        assert_eq!(by_job.len(), 1);
        assert_eq!(by_job[0].resource_id, 5);
    });
}

#[test]
fn alerts_resolve_and_reembed_jobs_progress() {
    let (_dir, pool) = setup();
    block_on(|cx| async move {
        let alert = audit_queries::insert_drift_alert(
            &cx,
            &pool,
            product_kb_db::DriftAlertRow {
                tenant_id: 1,
                alert_type: "stale_campaign".to_string(),
                ..Default::default()
            },
        )
        .await
        .into_result()
        .unwrap();
        audit_queries::resolve_drift_alert(&cx, &pool, 1, alert.id.unwrap())
            .await
            .into_result()
            .unwrap();
        assert!(
            audit_queries::open_drift_alerts(&cx, &pool, 1)
                .await
                .into_result()
                .unwrap()
                .is_empty()
        );

        let job = audit_queries::enqueue_reembed_job(
            &cx,
            &pool,
            ReembedJobRow {
                tenant_id: 1,
                resource_type: "knowledge_chunk".to_string(),
                resource_id: 3,
                current_version: "v1".to_string(),
                target_version: "v2".to_string(),
                ..Default::default()
            },
        )
        .await
        .into_result()
        .unwrap();
        audit_queries::update_reembed_job_status(&cx, &pool, 1, job.id.unwrap(), "done")
            .await
            .into_result()
            .unwrap();
        assert!(
            audit_queries::pending_reembed_jobs(&cx, &pool, 1)
                .await
                .into_result()
                .unwrap()
                .is_empty()
        );
    });
}

#[test]
fn spec_view_joins_items_and_categories() {
    let (_dir, pool) = setup();
    block_on(|cx| async move {
        let tenant = queries::ensure_tenant(&cx, &pool, "a")
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();
        let product = queries::ensure_product(&cx, &pool, tenant, "Camry", None)
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();
        let campaign = queries::open_draft_campaign(&cx, &pool, tenant, product, "en", "", "")
            .await
            .into_result()
            .unwrap()
            .id
            .unwrap();
        let item =
            spec_queries::upsert_spec_item(&cx, &pool, "Engine", "Fuel Efficiency", Some("km/l"), "numeric")
                .await
                .into_result()
                .unwrap()
                .id
                .unwrap();
        spec_queries::insert_spec_value(
            &cx,
            &pool,
            SpecValueRow {
                tenant_id: tenant,
                product_id: product,
                campaign_variant_id: campaign,
                spec_item_id: item,
                value_numeric: Some(25.49),
                unit: Some("km/l".to_string()),
                ..Default::default()
            },
        )
        .await
        .into_result()
        .unwrap();

        // Draft values are visible when the campaign is pinned...
        let pinned =
            spec_queries::spec_view_for_products(&cx, &pool, tenant, &[product], Some(campaign))
                .await
                .into_result()
                .unwrap();
        assert_eq!(pinned.len(), 1);
        assert_eq!(pinned[0].category, "Engine");
        assert_eq!(pinned[0].name, "Fuel Efficiency");
        assert_eq!(pinned[0].display_value(), "25.49");

        // ...but not through the published view until the campaign ships.
        let unpinned = spec_queries::spec_view_for_products(&cx, &pool, tenant, &[product], None)
            .await
            .into_result()
            .unwrap();
        assert!(unpinned.is_empty());

        queries::publish_campaign(&cx, &pool, tenant, campaign, None, "tester")
            .await
            .into_result()
            .unwrap();
        let unpinned = spec_queries::spec_view_for_products(&cx, &pool, tenant, &[product], None)
            .await
            .into_result()
            .unwrap();
        assert_eq!(unpinned.len(), 1);
    });
}
