//! Lineage, drift alert, document source, re-embed job, ingestion job, and
//! comparison row queries.
//!
//! The lineage table is append-only: there is no update or delete path
//! here on purpose.

use crate::error::DbError;
use crate::models::{
    ComparisonRowRecord, DocumentSourceRow, DriftAlertRow, IngestionJobRow, LineageEventRow,
    ReembedJobRow,
};
use crate::pool::DbPool;
use crate::queries::{
    acquire_conn, begin_immediate_tx, commit_tx, get_i64, get_opt_i64, get_opt_string, get_string,
    map_sql_outcome, opt_bigint, opt_text, rollback_tx, try_in_tx, try_out,
};
use crate::timestamps::now_micros;
use asupersync::{Cx, Outcome};
use sqlmodel_core::{Connection, Value};

// =============================================================================
// Lineage events
// =============================================================================

const LINEAGE_COLUMNS_SQL: &str = "id, tenant_id, product_id, campaign_variant_id, \
     resource_type, resource_id, document_source_id, ingestion_job_id, action, payload, \
     operator, occurred_at";

fn decode_lineage_row(row: &sqlmodel_core::Row) -> LineageEventRow {
    LineageEventRow {
        id: get_opt_i64(row, 0),
        tenant_id: get_i64(row, 1),
        product_id: get_opt_i64(row, 2),
        campaign_variant_id: get_opt_i64(row, 3),
        resource_type: get_string(row, 4),
        resource_id: get_i64(row, 5),
        document_source_id: get_opt_string(row, 6),
        ingestion_job_id: get_opt_i64(row, 7),
        action: get_string(row, 8),
        payload: {
            let s = get_string(row, 9);
            if s.is_empty() { "{}".to_string() } else { s }
        },
        operator: get_opt_string(row, 10),
        occurred_at: get_i64(row, 11),
    }
}

const LINEAGE_INSERT_SQL: &str = "INSERT INTO lineage_events \
     (tenant_id, product_id, campaign_variant_id, resource_type, resource_id, \
      document_source_id, ingestion_job_id, action, payload, operator, occurred_at) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

fn lineage_params(event: &LineageEventRow) -> Vec<Value> {
    vec![
        Value::BigInt(event.tenant_id),
        opt_bigint(event.product_id),
        opt_bigint(event.campaign_variant_id),
        Value::Text(event.resource_type.clone()),
        Value::BigInt(event.resource_id),
        opt_text(event.document_source_id.as_deref()),
        opt_bigint(event.ingestion_job_id),
        Value::Text(event.action.clone()),
        Value::Text(event.payload.clone()),
        opt_text(event.operator.as_deref()),
        Value::BigInt(event.occurred_at),
    ]
}

/// Append a single lineage event.
pub async fn insert_lineage_event(
    cx: &Cx,
    pool: &DbPool,
    event: &LineageEventRow,
) -> Outcome<i64, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let id = try_out!(map_sql_outcome(
        conn.insert(cx, LINEAGE_INSERT_SQL, &lineage_params(event)).await
    ));
    Outcome::Ok(id)
}

/// Append a batch of lineage events in one transaction, preserving order.
pub async fn insert_lineage_events(
    cx: &Cx,
    pool: &DbPool,
    events: &[LineageEventRow],
) -> Outcome<usize, DbError> {
    if events.is_empty() {
        return Outcome::Ok(0);
    }

    let conn = try_out!(acquire_conn(cx, pool).await);
    try_out!(begin_immediate_tx(cx, &conn).await);
    for event in events {
        try_in_tx!(
            cx,
            &conn,
            map_sql_outcome(conn.insert(cx, LINEAGE_INSERT_SQL, &lineage_params(event)).await)
        );
    }
    try_in_tx!(cx, &conn, commit_tx(cx, &conn).await);
    Outcome::Ok(events.len())
}

/// Lineage trail for one resource, oldest first.
pub async fn lineage_for_resource(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    resource_type: &str,
    resource_id: i64,
) -> Outcome<Vec<LineageEventRow>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let sql = format!(
        "SELECT {LINEAGE_COLUMNS_SQL} FROM lineage_events \
         WHERE tenant_id = ? AND resource_type = ? AND resource_id = ? \
         ORDER BY occurred_at ASC, id ASC"
    );
    let rows = try_out!(map_sql_outcome(
        conn.query(
            cx,
            &sql,
            &[
                Value::BigInt(tenant_id),
                Value::Text(resource_type.to_string()),
                Value::BigInt(resource_id),
            ],
        )
        .await
    ));
    Outcome::Ok(rows.iter().map(decode_lineage_row).collect())
}

/// All lineage rows recorded for one ingestion job, oldest first.
pub async fn lineage_for_job(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    job_id: i64,
) -> Outcome<Vec<LineageEventRow>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let sql = format!(
        "SELECT {LINEAGE_COLUMNS_SQL} FROM lineage_events \
         WHERE tenant_id = ? AND ingestion_job_id = ? ORDER BY occurred_at ASC, id ASC"
    );
    let rows = try_out!(map_sql_outcome(
        conn.query(
            cx,
            &sql,
            &[Value::BigInt(tenant_id), Value::BigInt(job_id)],
        )
        .await
    ));
    Outcome::Ok(rows.iter().map(decode_lineage_row).collect())
}

// =============================================================================
// Drift alerts
// =============================================================================

const ALERT_COLUMNS_SQL: &str = "id, tenant_id, product_id, campaign_variant_id, alert_type, \
     details, status, detected_at, resolved_at";

fn decode_alert_row(row: &sqlmodel_core::Row) -> DriftAlertRow {
    DriftAlertRow {
        id: get_opt_i64(row, 0),
        tenant_id: get_i64(row, 1),
        product_id: get_opt_i64(row, 2),
        campaign_variant_id: get_opt_i64(row, 3),
        alert_type: get_string(row, 4),
        details: {
            let s = get_string(row, 5);
            if s.is_empty() { "{}".to_string() } else { s }
        },
        status: {
            let s = get_string(row, 6);
            if s.is_empty() { "open".to_string() } else { s }
        },
        detected_at: get_i64(row, 7),
        resolved_at: get_opt_i64(row, 8),
    }
}

/// Insert a drift alert, returning it with its assigned id.
pub async fn insert_drift_alert(
    cx: &Cx,
    pool: &DbPool,
    mut alert: DriftAlertRow,
) -> Outcome<DriftAlertRow, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let id = try_out!(map_sql_outcome(
        conn.insert(
            cx,
            "INSERT INTO drift_alerts \
             (tenant_id, product_id, campaign_variant_id, alert_type, details, status, \
              detected_at, resolved_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            &[
                Value::BigInt(alert.tenant_id),
                opt_bigint(alert.product_id),
                opt_bigint(alert.campaign_variant_id),
                Value::Text(alert.alert_type.clone()),
                Value::Text(alert.details.clone()),
                Value::Text(alert.status.clone()),
                Value::BigInt(alert.detected_at),
                opt_bigint(alert.resolved_at),
            ],
        )
        .await
    ));
    alert.id = Some(id);
    Outcome::Ok(alert)
}

/// Open alerts for a tenant, newest first.
pub async fn open_drift_alerts(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
) -> Outcome<Vec<DriftAlertRow>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let sql = format!(
        "SELECT {ALERT_COLUMNS_SQL} FROM drift_alerts \
         WHERE tenant_id = ? AND status = 'open' ORDER BY detected_at DESC, id DESC"
    );
    let rows = try_out!(map_sql_outcome(
        conn.query(cx, &sql, &[Value::BigInt(tenant_id)]).await
    ));
    Outcome::Ok(rows.iter().map(decode_alert_row).collect())
}

/// Whether an identical open alert already exists (avoids duplicate alerts
/// across repeated drift runs).
pub async fn has_open_alert(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    alert_type: &str,
    campaign_id: Option<i64>,
) -> Outcome<bool, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let rows = try_out!(map_sql_outcome(
        conn.query(
            cx,
            "SELECT COUNT(*) FROM drift_alerts \
             WHERE tenant_id = ? AND alert_type = ? AND status = 'open' \
               AND (campaign_variant_id = ? OR (campaign_variant_id IS NULL AND ? IS NULL))",
            &[
                Value::BigInt(tenant_id),
                Value::Text(alert_type.to_string()),
                opt_bigint(campaign_id),
                opt_bigint(campaign_id),
            ],
        )
        .await
    ));
    Outcome::Ok(rows.first().map_or(0, |r| get_i64(r, 0)) > 0)
}

/// Resolve an alert.
pub async fn resolve_drift_alert(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    alert_id: i64,
) -> Outcome<(), DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    try_out!(map_sql_outcome(
        conn.execute(
            cx,
            "UPDATE drift_alerts SET status = 'resolved', resolved_at = ? \
             WHERE id = ? AND tenant_id = ?",
            &[
                Value::BigInt(now_micros()),
                Value::BigInt(alert_id),
                Value::BigInt(tenant_id),
            ],
        )
        .await
    ));
    Outcome::Ok(())
}

// =============================================================================
// Document sources
// =============================================================================

/// Record (or refresh) the document source consumed by an ingestion.
pub async fn upsert_document_source(
    cx: &Cx,
    pool: &DbPool,
    row: &DocumentSourceRow,
) -> Outcome<(), DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    try_out!(map_sql_outcome(
        conn.execute(
            cx,
            "INSERT INTO document_sources (id, tenant_id, campaign_variant_id, uri, sha256, ingested_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET sha256 = excluded.sha256, uri = excluded.uri, \
             ingested_at = excluded.ingested_at",
            &[
                Value::Text(row.id.clone()),
                Value::BigInt(row.tenant_id),
                Value::BigInt(row.campaign_variant_id),
                Value::Text(row.uri.clone()),
                Value::Text(row.sha256.clone()),
                Value::BigInt(row.ingested_at),
            ],
        )
        .await
    ));
    Outcome::Ok(())
}

/// All document sources for a tenant.
pub async fn document_sources_for_tenant(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
) -> Outcome<Vec<DocumentSourceRow>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let rows = try_out!(map_sql_outcome(
        conn.query(
            cx,
            "SELECT id, tenant_id, campaign_variant_id, uri, sha256, ingested_at \
             FROM document_sources WHERE tenant_id = ? ORDER BY id ASC",
            &[Value::BigInt(tenant_id)],
        )
        .await
    ));
    Outcome::Ok(
        rows.iter()
            .map(|r| DocumentSourceRow {
                id: get_string(r, 0),
                tenant_id: get_i64(r, 1),
                campaign_variant_id: get_i64(r, 2),
                uri: get_string(r, 3),
                sha256: get_string(r, 4),
                ingested_at: get_i64(r, 5),
            })
            .collect(),
    )
}

// =============================================================================
// Re-embed jobs
// =============================================================================

const REEMBED_COLUMNS_SQL: &str =
    "id, tenant_id, resource_type, resource_id, current_version, target_version, status, created_at";

fn decode_reembed_row(row: &sqlmodel_core::Row) -> ReembedJobRow {
    ReembedJobRow {
        id: get_opt_i64(row, 0),
        tenant_id: get_i64(row, 1),
        resource_type: get_string(row, 2),
        resource_id: get_i64(row, 3),
        current_version: get_string(row, 4),
        target_version: get_string(row, 5),
        status: {
            let s = get_string(row, 6);
            if s.is_empty() { "pending".to_string() } else { s }
        },
        created_at: get_i64(row, 7),
    }
}

/// Queue a re-embedding job unless an identical pending one exists.
pub async fn enqueue_reembed_job(
    cx: &Cx,
    pool: &DbPool,
    mut job: ReembedJobRow,
) -> Outcome<ReembedJobRow, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let existing = try_out!(map_sql_outcome(
        conn.query(
            cx,
            &format!(
                "SELECT {REEMBED_COLUMNS_SQL} FROM reembed_jobs \
                 WHERE tenant_id = ? AND resource_type = ? AND resource_id = ? \
                   AND status = 'pending'"
            ),
            &[
                Value::BigInt(job.tenant_id),
                Value::Text(job.resource_type.clone()),
                Value::BigInt(job.resource_id),
            ],
        )
        .await
    ));
    if let Some(row) = existing.first() {
        return Outcome::Ok(decode_reembed_row(row));
    }

    let id = try_out!(map_sql_outcome(
        conn.insert(
            cx,
            "INSERT INTO reembed_jobs \
             (tenant_id, resource_type, resource_id, current_version, target_version, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            &[
                Value::BigInt(job.tenant_id),
                Value::Text(job.resource_type.clone()),
                Value::BigInt(job.resource_id),
                Value::Text(job.current_version.clone()),
                Value::Text(job.target_version.clone()),
                Value::Text(job.status.clone()),
                Value::BigInt(job.created_at),
            ],
        )
        .await
    ));
    job.id = Some(id);
    Outcome::Ok(job)
}

/// Pending re-embed jobs for a tenant, oldest first.
pub async fn pending_reembed_jobs(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
) -> Outcome<Vec<ReembedJobRow>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let sql = format!(
        "SELECT {REEMBED_COLUMNS_SQL} FROM reembed_jobs \
         WHERE tenant_id = ? AND status = 'pending' ORDER BY id ASC"
    );
    let rows = try_out!(map_sql_outcome(
        conn.query(cx, &sql, &[Value::BigInt(tenant_id)]).await
    ));
    Outcome::Ok(rows.iter().map(decode_reembed_row).collect())
}

/// Move a re-embed job to a new status.
pub async fn update_reembed_job_status(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    job_id: i64,
    status: &str,
) -> Outcome<(), DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    try_out!(map_sql_outcome(
        conn.execute(
            cx,
            "UPDATE reembed_jobs SET status = ? WHERE id = ? AND tenant_id = ?",
            &[
                Value::Text(status.to_string()),
                Value::BigInt(job_id),
                Value::BigInt(tenant_id),
            ],
        )
        .await
    ));
    Outcome::Ok(())
}

// =============================================================================
// Ingestion jobs
// =============================================================================

/// Create an ingestion job row, returning its id.
pub async fn create_ingestion_job(
    cx: &Cx,
    pool: &DbPool,
    mut job: IngestionJobRow,
) -> Outcome<IngestionJobRow, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let id = try_out!(map_sql_outcome(
        conn.insert(
            cx,
            "INSERT INTO ingestion_jobs \
             (tenant_id, product_id, campaign_variant_id, status, operator, started_at, counts) \
             VALUES (?, ?, ?, ?, ?, ?, '{}')",
            &[
                Value::BigInt(job.tenant_id),
                Value::BigInt(job.product_id),
                Value::BigInt(job.campaign_variant_id),
                Value::Text(job.status.clone()),
                opt_text(job.operator.as_deref()),
                Value::BigInt(job.started_at),
            ],
        )
        .await
    ));
    job.id = Some(id);
    Outcome::Ok(job)
}

/// Move an ingestion job to a new status (e.g. pending → running).
pub async fn update_ingestion_job_status(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    job_id: i64,
    status: &str,
) -> Outcome<(), DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    try_out!(map_sql_outcome(
        conn.execute(
            cx,
            "UPDATE ingestion_jobs SET status = ? WHERE id = ? AND tenant_id = ?",
            &[
                Value::Text(status.to_string()),
                Value::BigInt(job_id),
                Value::BigInt(tenant_id),
            ],
        )
        .await
    ));
    Outcome::Ok(())
}

/// Finish an ingestion job with final status and counts.
pub async fn finish_ingestion_job(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    job_id: i64,
    status: &str,
    counts_json: &str,
) -> Outcome<(), DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    try_out!(map_sql_outcome(
        conn.execute(
            cx,
            "UPDATE ingestion_jobs SET status = ?, finished_at = ?, counts = ? \
             WHERE id = ? AND tenant_id = ?",
            &[
                Value::Text(status.to_string()),
                Value::BigInt(now_micros()),
                Value::Text(counts_json.to_string()),
                Value::BigInt(job_id),
                Value::BigInt(tenant_id),
            ],
        )
        .await
    ));
    Outcome::Ok(())
}

// =============================================================================
// Comparison rows
// =============================================================================

const COMPARISON_COLUMNS_SQL: &str = "id, tenant_id, pair_key, primary_product_id, \
     secondary_product_id, dimension, primary_value, secondary_value, verdict, narrative, \
     shareability, created_at";

fn decode_comparison_row(row: &sqlmodel_core::Row) -> ComparisonRowRecord {
    ComparisonRowRecord {
        id: get_opt_i64(row, 0),
        tenant_id: get_i64(row, 1),
        pair_key: get_string(row, 2),
        primary_product_id: get_i64(row, 3),
        secondary_product_id: get_i64(row, 4),
        dimension: get_string(row, 5),
        primary_value: get_string(row, 6),
        secondary_value: get_string(row, 7),
        verdict: get_string(row, 8),
        narrative: get_string(row, 9),
        shareability: {
            let s = get_string(row, 10);
            if s.is_empty() { "restricted".to_string() } else { s }
        },
        created_at: get_i64(row, 11),
    }
}

/// Persist a batch of pre-computed comparison rows in one transaction.
/// Existing `(tenant, pair, dimension)` rows are replaced.
pub async fn upsert_comparison_rows(
    cx: &Cx,
    pool: &DbPool,
    rows: &[ComparisonRowRecord],
) -> Outcome<usize, DbError> {
    if rows.is_empty() {
        return Outcome::Ok(0);
    }

    let conn = try_out!(acquire_conn(cx, pool).await);
    try_out!(begin_immediate_tx(cx, &conn).await);
    for row in rows {
        try_in_tx!(
            cx,
            &conn,
            map_sql_outcome(
                conn.execute(
                    cx,
                    "INSERT INTO comparison_rows \
                     (tenant_id, pair_key, primary_product_id, secondary_product_id, dimension, \
                      primary_value, secondary_value, verdict, narrative, shareability, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                     ON CONFLICT(tenant_id, pair_key, dimension) DO UPDATE SET \
                       primary_value = excluded.primary_value, \
                       secondary_value = excluded.secondary_value, \
                       verdict = excluded.verdict, narrative = excluded.narrative, \
                       shareability = excluded.shareability, created_at = excluded.created_at",
                    &[
                        Value::BigInt(row.tenant_id),
                        Value::Text(row.pair_key.clone()),
                        Value::BigInt(row.primary_product_id),
                        Value::BigInt(row.secondary_product_id),
                        Value::Text(row.dimension.clone()),
                        Value::Text(row.primary_value.clone()),
                        Value::Text(row.secondary_value.clone()),
                        Value::Text(row.verdict.clone()),
                        Value::Text(row.narrative.clone()),
                        Value::Text(row.shareability.clone()),
                        Value::BigInt(row.created_at),
                    ],
                )
                .await
            )
        );
    }
    try_in_tx!(cx, &conn, commit_tx(cx, &conn).await);
    Outcome::Ok(rows.len())
}

/// Stored comparison rows for a pair, optionally filtered to dimensions,
/// capped at `max_rows`.
pub async fn comparison_rows_for_pair(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    pair_key: &str,
    dimensions: Option<&[String]>,
    max_rows: usize,
) -> Outcome<Vec<ComparisonRowRecord>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let sql = format!(
        "SELECT {COMPARISON_COLUMNS_SQL} FROM comparison_rows \
         WHERE tenant_id = ? AND pair_key = ? ORDER BY dimension ASC, id ASC"
    );
    let rows = try_out!(map_sql_outcome(
        conn.query(
            cx,
            &sql,
            &[Value::BigInt(tenant_id), Value::Text(pair_key.to_string())],
        )
        .await
    ));

    let mut decoded: Vec<ComparisonRowRecord> = rows.iter().map(decode_comparison_row).collect();
    if let Some(dims) = dimensions
        && !dims.is_empty()
    {
        decoded.retain(|r| dims.iter().any(|d| d.eq_ignore_ascii_case(&r.dimension)));
    }
    decoded.truncate(max_rows);
    Outcome::Ok(decoded)
}
