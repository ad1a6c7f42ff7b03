//! Spec category, item, and value queries, plus the materialized spec view
//! used by structured retrieval.

use crate::error::DbError;
use crate::models::{SpecItemRow, SpecValueRow};
use crate::pool::DbPool;
use crate::queries::{
    acquire_conn, get_f64, get_i64, get_opt_f64, get_opt_i64, get_opt_string, get_string,
    map_sql_outcome, opt_bigint, opt_double, opt_text, try_out,
};
use crate::timestamps::now_micros;
use asupersync::{Cx, Outcome};
use serde::{Deserialize, Serialize};
use sqlmodel_core::{Connection, Value};

const SPEC_ITEM_COLUMNS_SQL: &str = "id, category_id, display_name, unit, data_type, aliases";

fn decode_spec_item_row(row: &sqlmodel_core::Row) -> SpecItemRow {
    SpecItemRow {
        id: get_opt_i64(row, 0),
        category_id: get_i64(row, 1),
        display_name: get_string(row, 2),
        unit: get_opt_string(row, 3),
        data_type: {
            let s = get_string(row, 4);
            if s.is_empty() { "text".to_string() } else { s }
        },
        aliases: {
            let s = get_string(row, 5);
            if s.is_empty() { "[]".to_string() } else { s }
        },
    }
}

const SPEC_VALUE_COLUMNS_SQL: &str = "id, tenant_id, product_id, campaign_variant_id, \
     spec_item_id, value_numeric, value_text, unit, confidence, status, source_doc_id, \
     source_page, key_features, variant_availability, explanation, explanation_failed, \
     version, effective_from, effective_through, created_at";

fn decode_spec_value_row(row: &sqlmodel_core::Row) -> SpecValueRow {
    SpecValueRow {
        id: get_opt_i64(row, 0),
        tenant_id: get_i64(row, 1),
        product_id: get_i64(row, 2),
        campaign_variant_id: get_i64(row, 3),
        spec_item_id: get_i64(row, 4),
        value_numeric: get_opt_f64(row, 5),
        value_text: get_opt_string(row, 6),
        unit: get_opt_string(row, 7),
        confidence: get_f64(row, 8),
        status: {
            let s = get_string(row, 9);
            if s.is_empty() { "active".to_string() } else { s }
        },
        source_doc_id: get_opt_string(row, 10),
        source_page: get_opt_i64(row, 11),
        key_features: get_opt_string(row, 12),
        variant_availability: get_opt_string(row, 13),
        explanation: get_opt_string(row, 14),
        explanation_failed: get_i64(row, 15),
        version: get_i64(row, 16).max(1),
        effective_from: get_opt_i64(row, 17),
        effective_through: get_opt_i64(row, 18),
        created_at: get_i64(row, 19),
    }
}

/// Ensure a spec category exists, returning its id.
pub async fn ensure_spec_category(cx: &Cx, pool: &DbPool, name: &str) -> Outcome<i64, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let rows = try_out!(map_sql_outcome(
        conn.query(
            cx,
            "SELECT id FROM spec_categories WHERE name = ?",
            &[Value::Text(name.to_string())],
        )
        .await
    ));
    if let Some(row) = rows.first() {
        return Outcome::Ok(get_i64(row, 0));
    }

    let id = try_out!(map_sql_outcome(
        conn.insert(
            cx,
            "INSERT INTO spec_categories (name) VALUES (?)",
            &[Value::Text(name.to_string())],
        )
        .await
    ));
    Outcome::Ok(id)
}

/// Upsert a spec item by `(category, display_name)`, creating the category
/// on demand. Existing items keep their recorded unit/data type; brochures
/// disagree often enough that first-writer-wins is the stable choice.
pub async fn upsert_spec_item(
    cx: &Cx,
    pool: &DbPool,
    category: &str,
    display_name: &str,
    unit: Option<&str>,
    data_type: &str,
) -> Outcome<SpecItemRow, DbError> {
    let category_id = try_out!(ensure_spec_category(cx, pool, category).await);

    let conn = try_out!(acquire_conn(cx, pool).await);
    let sql = format!(
        "SELECT {SPEC_ITEM_COLUMNS_SQL} FROM spec_items \
         WHERE category_id = ? AND display_name = ?"
    );
    let rows = try_out!(map_sql_outcome(
        conn.query(
            cx,
            &sql,
            &[
                Value::BigInt(category_id),
                Value::Text(display_name.to_string()),
            ],
        )
        .await
    ));
    if let Some(row) = rows.first() {
        return Outcome::Ok(decode_spec_item_row(row));
    }

    let id = try_out!(map_sql_outcome(
        conn.insert(
            cx,
            "INSERT INTO spec_items (category_id, display_name, unit, data_type, aliases) \
             VALUES (?, ?, ?, ?, '[]')",
            &[
                Value::BigInt(category_id),
                Value::Text(display_name.to_string()),
                opt_text(unit),
                Value::Text(data_type.to_string()),
            ],
        )
        .await
    ));

    Outcome::Ok(SpecItemRow {
        id: Some(id),
        category_id,
        display_name: display_name.to_string(),
        unit: unit.map(String::from),
        data_type: data_type.to_string(),
        aliases: "[]".to_string(),
    })
}

/// The current active value for `(tenant, campaign, spec_item)`, if any.
pub async fn active_spec_value(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    campaign_id: i64,
    spec_item_id: i64,
) -> Outcome<Option<SpecValueRow>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let sql = format!(
        "SELECT {SPEC_VALUE_COLUMNS_SQL} FROM spec_values \
         WHERE tenant_id = ? AND campaign_variant_id = ? AND spec_item_id = ? \
           AND status = 'active' ORDER BY version DESC LIMIT 1"
    );
    let rows = try_out!(map_sql_outcome(
        conn.query(
            cx,
            &sql,
            &[
                Value::BigInt(tenant_id),
                Value::BigInt(campaign_id),
                Value::BigInt(spec_item_id),
            ],
        )
        .await
    ));
    Outcome::Ok(rows.first().map(decode_spec_value_row))
}

/// Highest stored version for `(tenant, campaign, spec_item)`; 0 when none.
pub async fn max_spec_value_version(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    campaign_id: i64,
    spec_item_id: i64,
) -> Outcome<i64, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let rows = try_out!(map_sql_outcome(
        conn.query(
            cx,
            "SELECT COALESCE(MAX(version), 0) FROM spec_values \
             WHERE tenant_id = ? AND campaign_variant_id = ? AND spec_item_id = ?",
            &[
                Value::BigInt(tenant_id),
                Value::BigInt(campaign_id),
                Value::BigInt(spec_item_id),
            ],
        )
        .await
    ));
    Outcome::Ok(rows.first().map_or(0, |r| get_i64(r, 0)))
}

/// Insert a spec value row, returning it with its assigned id.
pub async fn insert_spec_value(
    cx: &Cx,
    pool: &DbPool,
    mut row: SpecValueRow,
) -> Outcome<SpecValueRow, DbError> {
    if row.value_numeric.is_some() == row.value_text.is_some() {
        return Outcome::Err(DbError::invalid(
            "value",
            "exactly one of value_numeric/value_text must be set",
        ));
    }
    if row.explanation.is_none() {
        row.explanation_failed = 1;
    }

    let conn = try_out!(acquire_conn(cx, pool).await);
    let id = try_out!(map_sql_outcome(
        conn.insert(
            cx,
            "INSERT INTO spec_values \
             (tenant_id, product_id, campaign_variant_id, spec_item_id, value_numeric, \
              value_text, unit, confidence, status, source_doc_id, source_page, key_features, \
              variant_availability, explanation, explanation_failed, version, effective_from, \
              effective_through, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            &[
                Value::BigInt(row.tenant_id),
                Value::BigInt(row.product_id),
                Value::BigInt(row.campaign_variant_id),
                Value::BigInt(row.spec_item_id),
                opt_double(row.value_numeric),
                opt_text(row.value_text.as_deref()),
                opt_text(row.unit.as_deref()),
                Value::Double(row.confidence),
                Value::Text(row.status.clone()),
                opt_text(row.source_doc_id.as_deref()),
                opt_bigint(row.source_page),
                opt_text(row.key_features.as_deref()),
                opt_text(row.variant_availability.as_deref()),
                opt_text(row.explanation.as_deref()),
                Value::BigInt(row.explanation_failed),
                Value::BigInt(row.version),
                opt_bigint(row.effective_from),
                opt_bigint(row.effective_through),
                Value::BigInt(row.created_at),
            ],
        )
        .await
    ));

    row.id = Some(id);
    Outcome::Ok(row)
}

/// Supersede the prior active value when a newer version lands.
pub async fn supersede_spec_value(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    spec_value_id: i64,
) -> Outcome<(), DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    try_out!(map_sql_outcome(
        conn.execute(
            cx,
            "UPDATE spec_values SET status = 'superseded', effective_through = ? \
             WHERE id = ? AND tenant_id = ?",
            &[
                Value::BigInt(now_micros()),
                Value::BigInt(spec_value_id),
                Value::BigInt(tenant_id),
            ],
        )
        .await
    ));
    Outcome::Ok(())
}

/// Attach (or clear) a generated explanation on a stored value.
pub async fn update_spec_value_explanation(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    spec_value_id: i64,
    explanation: Option<&str>,
) -> Outcome<(), DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    try_out!(map_sql_outcome(
        conn.execute(
            cx,
            "UPDATE spec_values SET explanation = ?, explanation_failed = ? \
             WHERE id = ? AND tenant_id = ?",
            &[
                opt_text(explanation),
                Value::BigInt(i64::from(explanation.is_none())),
                Value::BigInt(spec_value_id),
                Value::BigInt(tenant_id),
            ],
        )
        .await
    ));
    Outcome::Ok(())
}

/// Count unresolved conflicts in a campaign (blocks publishing).
pub async fn count_conflicts(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    campaign_id: i64,
) -> Outcome<i64, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let rows = try_out!(map_sql_outcome(
        conn.query(
            cx,
            "SELECT COUNT(*) FROM spec_values \
             WHERE tenant_id = ? AND campaign_variant_id = ? AND status = 'conflict'",
            &[Value::BigInt(tenant_id), Value::BigInt(campaign_id)],
        )
        .await
    ));
    Outcome::Ok(rows.first().map_or(0, |r| get_i64(r, 0)))
}

// =============================================================================
// Materialized spec view
// =============================================================================

/// One denormalized row of the spec view: an active spec value joined with
/// its item, category, and provenance. This is what structured retrieval
/// scores against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecViewRow {
    pub spec_value_id: i64,
    pub spec_item_id: i64,
    pub product_id: i64,
    pub campaign_variant_id: i64,
    pub category: String,
    pub name: String,
    pub value_numeric: Option<f64>,
    pub value_text: Option<String>,
    pub unit: Option<String>,
    pub confidence: f64,
    pub key_features: Option<String>,
    pub variant_availability: Option<String>,
    pub explanation: Option<String>,
    pub source_doc_id: Option<String>,
    pub source_page: Option<i64>,
}

impl SpecViewRow {
    /// The displayable value string.
    #[must_use]
    pub fn display_value(&self) -> String {
        if let Some(n) = self.value_numeric {
            if (n - n.trunc()).abs() < f64::EPSILON {
                format!("{}", n as i64)
            } else {
                format!("{n}")
            }
        } else {
            self.value_text.clone().unwrap_or_default()
        }
    }
}

/// The spec view for a set of products.
///
/// When `campaign_id` is pinned, only that campaign's active values are
/// read; otherwise values from the open published campaign of each product.
/// Rows are ordered by `spec_value_id` for deterministic downstream
/// scoring.
pub async fn spec_view_for_products(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    product_ids: &[i64],
    campaign_id: Option<i64>,
) -> Outcome<Vec<SpecViewRow>, DbError> {
    if product_ids.is_empty() {
        return Outcome::Ok(Vec::new());
    }

    let placeholders = product_ids
        .iter()
        .map(|_| "?")
        .collect::<Vec<_>>()
        .join(", ");

    let campaign_clause = if campaign_id.is_some() {
        "AND sv.campaign_variant_id = ?"
    } else {
        "AND cv.status = 'published' AND cv.effective_through IS NULL"
    };

    let sql = format!(
        "SELECT sv.id, sv.spec_item_id, sv.product_id, sv.campaign_variant_id, \
                sc.name, si.display_name, sv.value_numeric, sv.value_text, sv.unit, \
                sv.confidence, sv.key_features, sv.variant_availability, sv.explanation, \
                sv.source_doc_id, sv.source_page \
         FROM spec_values sv \
         JOIN spec_items si ON si.id = sv.spec_item_id \
         JOIN spec_categories sc ON sc.id = si.category_id \
         JOIN campaign_variants cv ON cv.id = sv.campaign_variant_id \
         WHERE sv.tenant_id = ? AND sv.status = 'active' \
           AND sv.product_id IN ({placeholders}) {campaign_clause} \
         ORDER BY sv.id ASC"
    );

    let mut params = vec![Value::BigInt(tenant_id)];
    params.extend(product_ids.iter().map(|&id| Value::BigInt(id)));
    if let Some(id) = campaign_id {
        params.push(Value::BigInt(id));
    }

    let conn = try_out!(acquire_conn(cx, pool).await);
    let rows = try_out!(map_sql_outcome(conn.query(cx, &sql, &params).await));

    Outcome::Ok(
        rows.iter()
            .map(|r| SpecViewRow {
                spec_value_id: get_i64(r, 0),
                spec_item_id: get_i64(r, 1),
                product_id: get_i64(r, 2),
                campaign_variant_id: get_i64(r, 3),
                category: get_string(r, 4),
                name: get_string(r, 5),
                value_numeric: get_opt_f64(r, 6),
                value_text: get_opt_string(r, 7),
                unit: get_opt_string(r, 8),
                confidence: get_f64(r, 9),
                key_features: get_opt_string(r, 10),
                variant_availability: get_opt_string(r, 11),
                explanation: get_opt_string(r, 12),
                source_doc_id: get_opt_string(r, 13),
                source_page: get_opt_i64(r, 14),
            })
            .collect(),
    )
}
