//! Database query operations: tenants, products, campaign variants.
//!
//! CRUD operations using raw SQL with explicit column order plus indexed
//! row decoding. These functions are the "DB truth" for the rest of the
//! engine: upper layers rely on these helpers rather than embedding SQL.
//!
//! Every read takes the requesting tenant id and filters on it in SQL; a
//! row that still comes back with a foreign tenant id is reported as
//! [`DbError::TenantMismatch`] and treated as fatal by callers.

#![allow(clippy::missing_const_for_fn)]

use crate::error::DbError;
use crate::models::CampaignVariantRow;
use crate::pool::{DbConn, DbPool};
use crate::timestamps::now_micros;
use asupersync::{Cx, Outcome};
use product_kb_core::CampaignStatus;
use sqlmodel_core::{Connection, Value};
use sqlmodel_pool::PooledConnection;

// =============================================================================
// Outcome plumbing
// =============================================================================

pub(crate) fn map_sql_error(e: &sqlmodel_core::Error) -> DbError {
    DbError::Sqlite(e.to_string())
}

pub(crate) fn map_sql_outcome<T>(out: Outcome<T, sqlmodel_core::Error>) -> Outcome<T, DbError> {
    match out {
        Outcome::Ok(v) => Outcome::Ok(v),
        Outcome::Err(e) => Outcome::Err(map_sql_error(&e)),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Unwrap an `Outcome`: on non-`Ok`, return early from the enclosing
/// function.
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

/// Unwrap an `Outcome` inside a transaction: on non-`Ok`, rollback and
/// return early.
macro_rules! try_in_tx {
    ($cx:expr, $conn:expr, $out:expr) => {
        match $out {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => {
                rollback_tx($cx, $conn).await;
                return Outcome::Err(e);
            }
            Outcome::Cancelled(r) => {
                rollback_tx($cx, $conn).await;
                return Outcome::Cancelled(r);
            }
            Outcome::Panicked(p) => {
                rollback_tx($cx, $conn).await;
                return Outcome::Panicked(p);
            }
        }
    };
}

pub(crate) use try_in_tx;
pub(crate) use try_out;

pub(crate) async fn acquire_conn(
    cx: &Cx,
    pool: &DbPool,
) -> Outcome<PooledConnection<DbConn>, DbError> {
    map_sql_outcome(pool.acquire(cx).await)
}

// =============================================================================
// Row decoding helpers (positional)
// =============================================================================

pub(crate) fn get_i64(row: &sqlmodel_core::Row, idx: usize) -> i64 {
    row.get(idx)
        .and_then(|v| match v {
            Value::BigInt(n) => Some(*n),
            Value::Int(n) => Some(i64::from(*n)),
            Value::SmallInt(n) => Some(i64::from(*n)),
            Value::TinyInt(n) => Some(i64::from(*n)),
            _ => None,
        })
        .unwrap_or(0)
}

pub(crate) fn get_opt_i64(row: &sqlmodel_core::Row, idx: usize) -> Option<i64> {
    row.get(idx).and_then(|v| match v {
        Value::BigInt(n) => Some(*n),
        Value::Int(n) => Some(i64::from(*n)),
        Value::SmallInt(n) => Some(i64::from(*n)),
        Value::TinyInt(n) => Some(i64::from(*n)),
        _ => None,
    })
}

pub(crate) fn get_f64(row: &sqlmodel_core::Row, idx: usize) -> f64 {
    get_opt_f64(row, idx).unwrap_or(0.0)
}

pub(crate) fn get_opt_f64(row: &sqlmodel_core::Row, idx: usize) -> Option<f64> {
    row.get(idx).and_then(|v| match v {
        Value::Double(f) => Some(*f),
        Value::BigInt(n) => Some(*n as f64),
        Value::Int(n) => Some(f64::from(*n)),
        _ => None,
    })
}

pub(crate) fn get_string(row: &sqlmodel_core::Row, idx: usize) -> String {
    row.get(idx)
        .and_then(|v| match v {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

pub(crate) fn get_opt_string(row: &sqlmodel_core::Row, idx: usize) -> Option<String> {
    row.get(idx).and_then(|v| match v {
        Value::Text(s) => Some(s.clone()),
        _ => None,
    })
}

pub(crate) fn opt_text(v: Option<&str>) -> Value {
    v.map_or(Value::Null, |s| Value::Text(s.to_string()))
}

pub(crate) fn opt_bigint(v: Option<i64>) -> Value {
    v.map_or(Value::Null, Value::BigInt)
}

pub(crate) fn opt_double(v: Option<f64>) -> Value {
    v.map_or(Value::Null, Value::Double)
}

// =============================================================================
// Transaction helpers
// =============================================================================

/// Begin an immediate write transaction (single-writer semantics).
pub(crate) async fn begin_immediate_tx(cx: &Cx, conn: &DbConn) -> Outcome<(), DbError> {
    map_sql_outcome(conn.execute(cx, "BEGIN IMMEDIATE", &[]).await).map(|_| ())
}

/// Commit the current transaction.
pub(crate) async fn commit_tx(cx: &Cx, conn: &DbConn) -> Outcome<(), DbError> {
    map_sql_outcome(conn.execute(cx, "COMMIT", &[]).await).map(|_| ())
}

/// Rollback the current transaction (best-effort, errors ignored).
pub(crate) async fn rollback_tx(cx: &Cx, conn: &DbConn) {
    let _ = conn.execute(cx, "ROLLBACK", &[]).await;
}

// =============================================================================
// Tenant queries
// =============================================================================

const TENANT_COLUMNS_SQL: &str = "id, name, settings, created_at";

fn decode_tenant_row(row: &sqlmodel_core::Row) -> crate::models::TenantRow {
    crate::models::TenantRow {
        id: get_opt_i64(row, 0),
        name: get_string(row, 1),
        settings: {
            let s = get_string(row, 2);
            if s.is_empty() { "{}".to_string() } else { s }
        },
        created_at: get_i64(row, 3),
    }
}

/// Ensure a tenant exists by name, creating it if necessary.
pub async fn ensure_tenant(
    cx: &Cx,
    pool: &DbPool,
    name: &str,
) -> Outcome<crate::models::TenantRow, DbError> {
    if name.trim().is_empty() {
        return Outcome::Err(DbError::invalid("name", "tenant name must not be empty"));
    }

    let conn = try_out!(acquire_conn(cx, pool).await);
    let sql = format!("SELECT {TENANT_COLUMNS_SQL} FROM tenants WHERE name = ?");
    let rows = try_out!(map_sql_outcome(
        conn.query(cx, &sql, &[Value::Text(name.to_string())]).await
    ));
    if let Some(row) = rows.first() {
        return Outcome::Ok(decode_tenant_row(row));
    }

    let now = now_micros();
    let id = try_out!(map_sql_outcome(
        conn.insert(
            cx,
            "INSERT INTO tenants (name, settings, created_at) VALUES (?, '{}', ?)",
            &[Value::Text(name.to_string()), Value::BigInt(now)],
        )
        .await
    ));

    Outcome::Ok(crate::models::TenantRow {
        id: Some(id),
        name: name.to_string(),
        settings: "{}".to_string(),
        created_at: now,
    })
}

/// Look up a tenant by id.
pub async fn get_tenant(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
) -> Outcome<Option<crate::models::TenantRow>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let sql = format!("SELECT {TENANT_COLUMNS_SQL} FROM tenants WHERE id = ?");
    let rows = try_out!(map_sql_outcome(
        conn.query(cx, &sql, &[Value::BigInt(tenant_id)]).await
    ));
    Outcome::Ok(rows.first().map(decode_tenant_row))
}

/// All tenant ids, for the drift runner's per-tenant sweep.
pub async fn list_tenant_ids(cx: &Cx, pool: &DbPool) -> Outcome<Vec<i64>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let rows = try_out!(map_sql_outcome(
        conn.query(cx, "SELECT id FROM tenants ORDER BY id ASC", &[]).await
    ));
    Outcome::Ok(rows.iter().map(|r| get_i64(r, 0)).collect())
}

// =============================================================================
// Product queries
// =============================================================================

const PRODUCT_COLUMNS_SQL: &str = "id, tenant_id, name, model_year, metadata, created_at";

fn decode_product_row(row: &sqlmodel_core::Row) -> crate::models::ProductRow {
    crate::models::ProductRow {
        id: get_opt_i64(row, 0),
        tenant_id: get_i64(row, 1),
        name: get_string(row, 2),
        model_year: get_opt_i64(row, 3),
        metadata: {
            let s = get_string(row, 4);
            if s.is_empty() { "{}".to_string() } else { s }
        },
        created_at: get_i64(row, 5),
    }
}

/// Ensure a product exists for a tenant, creating it if necessary.
pub async fn ensure_product(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    name: &str,
    model_year: Option<i64>,
) -> Outcome<crate::models::ProductRow, DbError> {
    if name.trim().is_empty() {
        return Outcome::Err(DbError::invalid("name", "product name must not be empty"));
    }

    let conn = try_out!(acquire_conn(cx, pool).await);
    let sql = format!("SELECT {PRODUCT_COLUMNS_SQL} FROM products WHERE tenant_id = ? AND name = ?");
    let rows = try_out!(map_sql_outcome(
        conn.query(
            cx,
            &sql,
            &[Value::BigInt(tenant_id), Value::Text(name.to_string())],
        )
        .await
    ));
    if let Some(row) = rows.first() {
        return Outcome::Ok(decode_product_row(row));
    }

    let now = now_micros();
    let id = try_out!(map_sql_outcome(
        conn.insert(
            cx,
            "INSERT INTO products (tenant_id, name, model_year, metadata, created_at) \
             VALUES (?, ?, ?, '{}', ?)",
            &[
                Value::BigInt(tenant_id),
                Value::Text(name.to_string()),
                opt_bigint(model_year),
                Value::BigInt(now),
            ],
        )
        .await
    ));

    Outcome::Ok(crate::models::ProductRow {
        id: Some(id),
        tenant_id,
        name: name.to_string(),
        model_year,
        metadata: "{}".to_string(),
        created_at: now,
    })
}

/// Look up a product by id within a tenant scope.
pub async fn get_product(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    product_id: i64,
) -> Outcome<Option<crate::models::ProductRow>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let sql = format!("SELECT {PRODUCT_COLUMNS_SQL} FROM products WHERE id = ? AND tenant_id = ?");
    let rows = try_out!(map_sql_outcome(
        conn.query(
            cx,
            &sql,
            &[Value::BigInt(product_id), Value::BigInt(tenant_id)],
        )
        .await
    ));
    match rows.first() {
        Some(row) => {
            let decoded = decode_product_row(row);
            if decoded.tenant_id != tenant_id {
                return Outcome::Err(DbError::TenantMismatch {
                    requested: tenant_id,
                    found: decoded.tenant_id,
                });
            }
            Outcome::Ok(Some(decoded))
        }
        None => Outcome::Ok(None),
    }
}

// =============================================================================
// Campaign variant queries
// =============================================================================

const CAMPAIGN_COLUMNS_SQL: &str = "id, tenant_id, product_id, locale, trim, market, status, \
     version, effective_from, effective_through, is_draft, last_published_by, created_at";

pub(crate) fn decode_campaign_row(row: &sqlmodel_core::Row) -> CampaignVariantRow {
    CampaignVariantRow {
        id: get_opt_i64(row, 0),
        tenant_id: get_i64(row, 1),
        product_id: get_i64(row, 2),
        locale: get_string(row, 3),
        trim: get_string(row, 4),
        market: get_string(row, 5),
        status: {
            let s = get_string(row, 6);
            if s.is_empty() { "draft".to_string() } else { s }
        },
        version: get_i64(row, 7).max(1),
        effective_from: get_opt_i64(row, 8),
        effective_through: get_opt_i64(row, 9),
        is_draft: get_i64(row, 10),
        last_published_by: get_opt_string(row, 11),
        created_at: get_i64(row, 12),
    }
}

/// Look up a campaign by id within a tenant scope.
pub async fn get_campaign(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    campaign_id: i64,
) -> Outcome<Option<CampaignVariantRow>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let sql =
        format!("SELECT {CAMPAIGN_COLUMNS_SQL} FROM campaign_variants WHERE id = ? AND tenant_id = ?");
    let rows = try_out!(map_sql_outcome(
        conn.query(
            cx,
            &sql,
            &[Value::BigInt(campaign_id), Value::BigInt(tenant_id)],
        )
        .await
    ));
    Outcome::Ok(rows.first().map(decode_campaign_row))
}

/// Open (or reuse) a draft campaign for the scope tuple.
///
/// A new draft's version is `max(existing versions for the tuple) + 1`, so
/// versions stay monotonic per `(tenant, product, locale, trim, market)`.
pub async fn open_draft_campaign(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    product_id: i64,
    locale: &str,
    trim: &str,
    market: &str,
) -> Outcome<CampaignVariantRow, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);

    let scope_params = [
        Value::BigInt(tenant_id),
        Value::BigInt(product_id),
        Value::Text(locale.to_string()),
        Value::Text(trim.to_string()),
        Value::Text(market.to_string()),
    ];

    let sql = format!(
        "SELECT {CAMPAIGN_COLUMNS_SQL} FROM campaign_variants \
         WHERE tenant_id = ? AND product_id = ? AND locale = ? AND trim = ? AND market = ? \
           AND status = 'draft' ORDER BY version DESC LIMIT 1"
    );
    let rows = try_out!(map_sql_outcome(conn.query(cx, &sql, &scope_params).await));
    if let Some(row) = rows.first() {
        return Outcome::Ok(decode_campaign_row(row));
    }

    let max_rows = try_out!(map_sql_outcome(
        conn.query(
            cx,
            "SELECT COALESCE(MAX(version), 0) FROM campaign_variants \
             WHERE tenant_id = ? AND product_id = ? AND locale = ? AND trim = ? AND market = ?",
            &scope_params,
        )
        .await
    ));
    let next_version = max_rows.first().map_or(0, |r| get_i64(r, 0)) + 1;

    let now = now_micros();
    let id = try_out!(map_sql_outcome(
        conn.insert(
            cx,
            "INSERT INTO campaign_variants \
             (tenant_id, product_id, locale, trim, market, status, version, is_draft, created_at) \
             VALUES (?, ?, ?, ?, ?, 'draft', ?, 1, ?)",
            &[
                Value::BigInt(tenant_id),
                Value::BigInt(product_id),
                Value::Text(locale.to_string()),
                Value::Text(trim.to_string()),
                Value::Text(market.to_string()),
                Value::BigInt(next_version),
                Value::BigInt(now),
            ],
        )
        .await
    ));

    Outcome::Ok(CampaignVariantRow {
        id: Some(id),
        tenant_id,
        product_id,
        locale: locale.to_string(),
        trim: trim.to_string(),
        market: market.to_string(),
        status: "draft".to_string(),
        version: next_version,
        effective_from: None,
        effective_through: None,
        is_draft: 1,
        last_published_by: None,
        created_at: now,
    })
}

/// Delete the draft contents (spec values, chunks, feature blocks) for a
/// campaign. Used for `overwrite=true` re-ingestion; the campaign row
/// itself survives.
pub async fn delete_draft_contents(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    campaign_id: i64,
) -> Outcome<u64, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let params = [Value::BigInt(tenant_id), Value::BigInt(campaign_id)];

    let mut deleted = 0u64;
    for sql in [
        "DELETE FROM spec_values WHERE tenant_id = ? AND campaign_variant_id = ?",
        "DELETE FROM knowledge_chunks WHERE tenant_id = ? AND campaign_variant_id = ?",
        "DELETE FROM feature_blocks WHERE tenant_id = ? AND campaign_variant_id = ?",
    ] {
        deleted += try_out!(map_sql_outcome(conn.execute(cx, sql, &params).await));
    }
    Outcome::Ok(deleted)
}

/// Delete a campaign and everything owned by it. Callers also remove the
/// campaign's vector-index partition.
pub async fn delete_campaign_cascade(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    campaign_id: i64,
) -> Outcome<(), DbError> {
    let deleted = try_out!(delete_draft_contents(cx, pool, tenant_id, campaign_id).await);
    tracing::debug!(campaign_id, deleted, "deleted campaign contents");

    let conn = try_out!(acquire_conn(cx, pool).await);
    try_out!(map_sql_outcome(
        conn.execute(
            cx,
            "DELETE FROM campaign_variants WHERE tenant_id = ? AND id = ?",
            &[Value::BigInt(tenant_id), Value::BigInt(campaign_id)],
        )
        .await
    ));
    Outcome::Ok(())
}

/// Publish a draft campaign.
///
/// In one immediate transaction: verify the target exists, is a draft at
/// the expected version, and has no conflicted values; close the prior
/// published row for the scope tuple; flip the draft to published. The
/// single-open-published-row invariant is re-checked before commit.
pub async fn publish_campaign(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    campaign_id: i64,
    expected_version: Option<i64>,
    approved_by: &str,
) -> Outcome<CampaignVariantRow, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);

    try_out!(begin_immediate_tx(cx, &conn).await);

    let sql = format!(
        "SELECT {CAMPAIGN_COLUMNS_SQL} FROM campaign_variants WHERE id = ? AND tenant_id = ?"
    );
    let rows = try_in_tx!(
        cx,
        &conn,
        map_sql_outcome(
            conn.query(
                cx,
                &sql,
                &[Value::BigInt(campaign_id), Value::BigInt(tenant_id)],
            )
            .await
        )
    );
    let Some(target) = rows.first().map(decode_campaign_row) else {
        rollback_tx(cx, &conn).await;
        return Outcome::Err(DbError::not_found("campaign", campaign_id.to_string()));
    };

    if target.status != CampaignStatus::Draft.as_str() {
        rollback_tx(cx, &conn).await;
        return Outcome::Err(DbError::NotDraft {
            campaign_id,
            status: target.status,
        });
    }
    if let Some(expected) = expected_version
        && expected != target.version
    {
        rollback_tx(cx, &conn).await;
        return Outcome::Err(DbError::invalid(
            "version",
            format!("expected {expected}, campaign is at {}", target.version),
        ));
    }

    let conflict_rows = try_in_tx!(
        cx,
        &conn,
        map_sql_outcome(
            conn.query(
                cx,
                "SELECT COUNT(*) FROM spec_values \
                 WHERE tenant_id = ? AND campaign_variant_id = ? AND status = 'conflict'",
                &[Value::BigInt(tenant_id), Value::BigInt(campaign_id)],
            )
            .await
        )
    );
    let conflicts = conflict_rows.first().map_or(0, |r| get_i64(r, 0));
    if conflicts > 0 {
        rollback_tx(cx, &conn).await;
        return Outcome::Err(DbError::ConflictExists {
            campaign_id,
            conflicts,
        });
    }

    let now = now_micros();

    // Close the currently-open published row for this scope tuple.
    try_in_tx!(
        cx,
        &conn,
        map_sql_outcome(
            conn.execute(
                cx,
                "UPDATE campaign_variants SET effective_through = ?, status = 'archived' \
                 WHERE tenant_id = ? AND product_id = ? AND locale = ? AND trim = ? AND market = ? \
                   AND status = 'published' AND effective_through IS NULL",
                &[
                    Value::BigInt(now),
                    Value::BigInt(tenant_id),
                    Value::BigInt(target.product_id),
                    Value::Text(target.locale.clone()),
                    Value::Text(target.trim.clone()),
                    Value::Text(target.market.clone()),
                ],
            )
            .await
        )
    );

    try_in_tx!(
        cx,
        &conn,
        map_sql_outcome(
            conn.execute(
                cx,
                "UPDATE campaign_variants SET status = 'published', is_draft = 0, \
                 effective_from = ?, effective_through = NULL, last_published_by = ? \
                 WHERE id = ? AND tenant_id = ?",
                &[
                    Value::BigInt(now),
                    Value::Text(approved_by.to_string()),
                    Value::BigInt(campaign_id),
                    Value::BigInt(tenant_id),
                ],
            )
            .await
        )
    );

    // Invariant re-check before commit: exactly one open published row.
    let open_rows = try_in_tx!(
        cx,
        &conn,
        map_sql_outcome(
            conn.query(
                cx,
                "SELECT COUNT(*) FROM campaign_variants \
                 WHERE tenant_id = ? AND product_id = ? AND locale = ? AND trim = ? AND market = ? \
                   AND status = 'published' AND effective_through IS NULL",
                &[
                    Value::BigInt(tenant_id),
                    Value::BigInt(target.product_id),
                    Value::Text(target.locale.clone()),
                    Value::Text(target.trim.clone()),
                    Value::Text(target.market.clone()),
                ],
            )
            .await
        )
    );
    let open_count = open_rows.first().map_or(0, |r| get_i64(r, 0));
    if open_count != 1 {
        rollback_tx(cx, &conn).await;
        return Outcome::Err(DbError::DuplicatePublished(target.scope_key()));
    }

    try_in_tx!(cx, &conn, commit_tx(cx, &conn).await);

    tracing::info!(
        tenant_id,
        campaign_id,
        version = target.version,
        approved_by,
        "published campaign"
    );

    match get_campaign(cx, pool, tenant_id, campaign_id).await {
        Outcome::Ok(Some(row)) => Outcome::Ok(row),
        Outcome::Ok(None) => Outcome::Err(DbError::not_found("campaign", campaign_id.to_string())),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Roll back to a previously published version.
///
/// The currently published row for the scope is archived; the requested
/// prior version is revived as the open published row.
pub async fn rollback_campaign(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    campaign_id: i64,
    to_version: i64,
    operator: &str,
) -> Outcome<CampaignVariantRow, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);

    try_out!(begin_immediate_tx(cx, &conn).await);

    let sql = format!(
        "SELECT {CAMPAIGN_COLUMNS_SQL} FROM campaign_variants WHERE id = ? AND tenant_id = ?"
    );
    let rows = try_in_tx!(
        cx,
        &conn,
        map_sql_outcome(
            conn.query(
                cx,
                &sql,
                &[Value::BigInt(campaign_id), Value::BigInt(tenant_id)],
            )
            .await
        )
    );
    let Some(current) = rows.first().map(decode_campaign_row) else {
        rollback_tx(cx, &conn).await;
        return Outcome::Err(DbError::not_found("campaign", campaign_id.to_string()));
    };

    let target_sql = format!(
        "SELECT {CAMPAIGN_COLUMNS_SQL} FROM campaign_variants \
         WHERE tenant_id = ? AND product_id = ? AND locale = ? AND trim = ? AND market = ? \
           AND version = ?"
    );
    let target_rows = try_in_tx!(
        cx,
        &conn,
        map_sql_outcome(
            conn.query(
                cx,
                &target_sql,
                &[
                    Value::BigInt(tenant_id),
                    Value::BigInt(current.product_id),
                    Value::Text(current.locale.clone()),
                    Value::Text(current.trim.clone()),
                    Value::Text(current.market.clone()),
                    Value::BigInt(to_version),
                ],
            )
            .await
        )
    );
    let Some(revive) = target_rows.first().map(decode_campaign_row) else {
        rollback_tx(cx, &conn).await;
        return Outcome::Err(DbError::not_found(
            "campaign version",
            format!("{campaign_id}@v{to_version}"),
        ));
    };
    let revive_id = revive.id.unwrap_or_default();

    let now = now_micros();

    try_in_tx!(
        cx,
        &conn,
        map_sql_outcome(
            conn.execute(
                cx,
                "UPDATE campaign_variants SET status = 'archived', effective_through = ? \
                 WHERE id = ? AND tenant_id = ?",
                &[
                    Value::BigInt(now),
                    Value::BigInt(campaign_id),
                    Value::BigInt(tenant_id),
                ],
            )
            .await
        )
    );

    try_in_tx!(
        cx,
        &conn,
        map_sql_outcome(
            conn.execute(
                cx,
                "UPDATE campaign_variants SET status = 'published', is_draft = 0, \
                 effective_from = ?, effective_through = NULL, last_published_by = ? \
                 WHERE id = ? AND tenant_id = ?",
                &[
                    Value::BigInt(now),
                    Value::Text(operator.to_string()),
                    Value::BigInt(revive_id),
                    Value::BigInt(tenant_id),
                ],
            )
            .await
        )
    );

    try_in_tx!(cx, &conn, commit_tx(cx, &conn).await);

    tracing::info!(
        tenant_id,
        campaign_id,
        to_version,
        operator,
        "rolled back campaign"
    );

    match get_campaign(cx, pool, tenant_id, revive_id).await {
        Outcome::Ok(Some(row)) => Outcome::Ok(row),
        Outcome::Ok(None) => Outcome::Err(DbError::not_found("campaign", revive_id.to_string())),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Published campaigns for a tenant with an open effective window.
pub async fn published_campaigns(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
) -> Outcome<Vec<CampaignVariantRow>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let sql = format!(
        "SELECT {CAMPAIGN_COLUMNS_SQL} FROM campaign_variants \
         WHERE tenant_id = ? AND status = 'published' AND effective_through IS NULL \
         ORDER BY id ASC"
    );
    let rows = try_out!(map_sql_outcome(
        conn.query(cx, &sql, &[Value::BigInt(tenant_id)]).await
    ));
    Outcome::Ok(rows.iter().map(decode_campaign_row).collect())
}

/// Every campaign belonging to a tenant, ordered by id.
pub async fn campaigns_for_tenant(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
) -> Outcome<Vec<CampaignVariantRow>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let sql = format!(
        "SELECT {CAMPAIGN_COLUMNS_SQL} FROM campaign_variants WHERE tenant_id = ? ORDER BY id ASC"
    );
    let rows = try_out!(map_sql_outcome(
        conn.query(cx, &sql, &[Value::BigInt(tenant_id)]).await
    ));
    Outcome::Ok(rows.iter().map(decode_campaign_row).collect())
}

/// The open published campaign for each product in the given set, used by
/// retrieval when no campaign is pinned.
pub async fn published_campaign_ids_for_products(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    product_ids: &[i64],
) -> Outcome<Vec<i64>, DbError> {
    if product_ids.is_empty() {
        return Outcome::Ok(Vec::new());
    }
    let placeholders = product_ids
        .iter()
        .map(|_| "?")
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT id FROM campaign_variants \
         WHERE tenant_id = ? AND product_id IN ({placeholders}) \
           AND status = 'published' AND effective_through IS NULL \
         ORDER BY id ASC"
    );
    let mut params = vec![Value::BigInt(tenant_id)];
    params.extend(product_ids.iter().map(|&id| Value::BigInt(id)));

    let conn = try_out!(acquire_conn(cx, pool).await);
    let rows = try_out!(map_sql_outcome(conn.query(cx, &sql, &params).await));
    Outcome::Ok(rows.iter().map(|r| get_i64(r, 0)).collect())
}
