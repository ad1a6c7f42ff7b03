//! Knowledge chunk and feature block queries, including content-hash
//! deduplication.
//!
//! Chunks dedupe on `(tenant_id, content_hash)`. A collision reuses the
//! stored chunk and appends the new spec ids to `metadata.parsed_spec_ids`,
//! so every source row that produced the chunk stays traceable.

use crate::error::DbError;
use crate::models::{FeatureBlockRow, KnowledgeChunkRow};
use crate::pool::DbPool;
use crate::queries::{
    acquire_conn, get_i64, get_opt_i64, get_opt_string, get_string, map_sql_outcome, opt_bigint,
    opt_text, try_out,
};
use asupersync::{Cx, Outcome};
use sqlmodel_core::{Connection, Value};

const CHUNK_COLUMNS_SQL: &str = "id, tenant_id, product_id, campaign_variant_id, chunk_type, \
     text, metadata, content_hash, embedding_vector, embedding_model, embedding_version, \
     source_doc_id, source_page, visibility, completion_status, created_at";

pub(crate) fn decode_chunk_row(row: &sqlmodel_core::Row) -> KnowledgeChunkRow {
    KnowledgeChunkRow {
        id: get_opt_i64(row, 0),
        tenant_id: get_i64(row, 1),
        product_id: get_i64(row, 2),
        campaign_variant_id: get_opt_i64(row, 3),
        chunk_type: get_string(row, 4),
        text: get_string(row, 5),
        metadata: {
            let s = get_string(row, 6);
            if s.is_empty() { "{}".to_string() } else { s }
        },
        content_hash: get_string(row, 7),
        embedding_vector: get_opt_string(row, 8),
        embedding_model: get_opt_string(row, 9),
        embedding_version: get_opt_string(row, 10),
        source_doc_id: get_opt_string(row, 11),
        source_page: get_opt_i64(row, 12),
        visibility: {
            let s = get_string(row, 13);
            if s.is_empty() { "private".to_string() } else { s }
        },
        completion_status: {
            let s = get_string(row, 14);
            if s.is_empty() { "complete".to_string() } else { s }
        },
        created_at: get_i64(row, 15),
    }
}

/// Find an existing chunk by its content hash within a tenant.
pub async fn find_chunk_by_hash(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    content_hash: &str,
) -> Outcome<Option<KnowledgeChunkRow>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let sql = format!(
        "SELECT {CHUNK_COLUMNS_SQL} FROM knowledge_chunks \
         WHERE tenant_id = ? AND content_hash = ?"
    );
    let rows = try_out!(map_sql_outcome(
        conn.query(
            cx,
            &sql,
            &[
                Value::BigInt(tenant_id),
                Value::Text(content_hash.to_string()),
            ],
        )
        .await
    ));
    Outcome::Ok(rows.first().map(decode_chunk_row))
}

/// Insert a knowledge chunk, returning it with its assigned id.
pub async fn insert_chunk(
    cx: &Cx,
    pool: &DbPool,
    mut row: KnowledgeChunkRow,
) -> Outcome<KnowledgeChunkRow, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let id = try_out!(map_sql_outcome(
        conn.insert(
            cx,
            "INSERT INTO knowledge_chunks \
             (tenant_id, product_id, campaign_variant_id, chunk_type, text, metadata, \
              content_hash, embedding_vector, embedding_model, embedding_version, \
              source_doc_id, source_page, visibility, completion_status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            &[
                Value::BigInt(row.tenant_id),
                Value::BigInt(row.product_id),
                opt_bigint(row.campaign_variant_id),
                Value::Text(row.chunk_type.clone()),
                Value::Text(row.text.clone()),
                Value::Text(row.metadata.clone()),
                Value::Text(row.content_hash.clone()),
                opt_text(row.embedding_vector.as_deref()),
                opt_text(row.embedding_model.as_deref()),
                opt_text(row.embedding_version.as_deref()),
                opt_text(row.source_doc_id.as_deref()),
                opt_bigint(row.source_page),
                Value::Text(row.visibility.clone()),
                Value::Text(row.completion_status.clone()),
                Value::BigInt(row.created_at),
            ],
        )
        .await
    ));
    row.id = Some(id);
    Outcome::Ok(row)
}

/// Append spec value ids to a chunk's `metadata.parsed_spec_ids`.
///
/// Read-modify-write on the JSON document; already-present ids are not
/// duplicated.
pub async fn append_parsed_spec_ids(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    chunk_id: i64,
    spec_value_ids: &[i64],
) -> Outcome<(), DbError> {
    if spec_value_ids.is_empty() {
        return Outcome::Ok(());
    }

    let conn = try_out!(acquire_conn(cx, pool).await);
    let rows = try_out!(map_sql_outcome(
        conn.query(
            cx,
            "SELECT metadata FROM knowledge_chunks WHERE id = ? AND tenant_id = ?",
            &[Value::BigInt(chunk_id), Value::BigInt(tenant_id)],
        )
        .await
    ));
    let Some(row) = rows.first() else {
        return Outcome::Err(DbError::not_found("knowledge_chunk", chunk_id.to_string()));
    };

    let raw = get_string(row, 0);
    let mut metadata: serde_json::Value =
        serde_json::from_str(&raw).unwrap_or_else(|_| serde_json::json!({}));

    let ids = metadata
        .as_object_mut()
        .map(|obj| {
            obj.entry("parsed_spec_ids")
                .or_insert_with(|| serde_json::json!([]))
        })
        .and_then(serde_json::Value::as_array_mut);

    if let Some(ids) = ids {
        for &sid in spec_value_ids {
            let v = serde_json::json!(sid);
            if !ids.contains(&v) {
                ids.push(v);
            }
        }
    }

    let serialized = match serde_json::to_string(&metadata) {
        Ok(s) => s,
        Err(e) => return Outcome::Err(DbError::Serialization(e.to_string())),
    };
    try_out!(map_sql_outcome(
        conn.execute(
            cx,
            "UPDATE knowledge_chunks SET metadata = ? WHERE id = ? AND tenant_id = ?",
            &[
                Value::Text(serialized),
                Value::BigInt(chunk_id),
                Value::BigInt(tenant_id),
            ],
        )
        .await
    ));
    Outcome::Ok(())
}

/// Store an embedding on a chunk and mark it complete.
pub async fn update_chunk_embedding(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    chunk_id: i64,
    vector: &[f32],
    model: &str,
    version: &str,
) -> Outcome<(), DbError> {
    let encoded = match serde_json::to_string(vector) {
        Ok(s) => s,
        Err(e) => return Outcome::Err(DbError::Serialization(e.to_string())),
    };
    let conn = try_out!(acquire_conn(cx, pool).await);
    try_out!(map_sql_outcome(
        conn.execute(
            cx,
            "UPDATE knowledge_chunks SET embedding_vector = ?, embedding_model = ?, \
             embedding_version = ?, completion_status = 'complete' \
             WHERE id = ? AND tenant_id = ?",
            &[
                Value::Text(encoded),
                Value::Text(model.to_string()),
                Value::Text(version.to_string()),
                Value::BigInt(chunk_id),
                Value::BigInt(tenant_id),
            ],
        )
        .await
    ));
    Outcome::Ok(())
}

/// Mark a chunk as needing a re-embed pass (embedding call failed).
pub async fn mark_chunk_retry_needed(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    chunk_id: i64,
) -> Outcome<(), DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    try_out!(map_sql_outcome(
        conn.execute(
            cx,
            "UPDATE knowledge_chunks SET completion_status = 'retry_needed' \
             WHERE id = ? AND tenant_id = ?",
            &[Value::BigInt(chunk_id), Value::BigInt(tenant_id)],
        )
        .await
    ));
    Outcome::Ok(())
}

/// All chunks for a campaign, ordered by id.
pub async fn chunks_for_campaign(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    campaign_id: i64,
) -> Outcome<Vec<KnowledgeChunkRow>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let sql = format!(
        "SELECT {CHUNK_COLUMNS_SQL} FROM knowledge_chunks \
         WHERE tenant_id = ? AND campaign_variant_id = ? ORDER BY id ASC"
    );
    let rows = try_out!(map_sql_outcome(
        conn.query(
            cx,
            &sql,
            &[Value::BigInt(tenant_id), Value::BigInt(campaign_id)],
        )
        .await
    ));
    Outcome::Ok(rows.iter().map(decode_chunk_row).collect())
}

/// Load chunks by id within a tenant scope. Order follows the input ids;
/// missing ids are skipped.
pub async fn chunks_by_ids(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    chunk_ids: &[i64],
) -> Outcome<Vec<KnowledgeChunkRow>, DbError> {
    if chunk_ids.is_empty() {
        return Outcome::Ok(Vec::new());
    }
    let placeholders = chunk_ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let sql = format!(
        "SELECT {CHUNK_COLUMNS_SQL} FROM knowledge_chunks \
         WHERE tenant_id = ? AND id IN ({placeholders})"
    );
    let mut params = vec![Value::BigInt(tenant_id)];
    params.extend(chunk_ids.iter().map(|&id| Value::BigInt(id)));

    let conn = try_out!(acquire_conn(cx, pool).await);
    let rows = try_out!(map_sql_outcome(conn.query(cx, &sql, &params).await));

    let decoded: Vec<KnowledgeChunkRow> = rows.iter().map(decode_chunk_row).collect();
    let mut ordered = Vec::with_capacity(decoded.len());
    for &id in chunk_ids {
        if let Some(row) = decoded.iter().find(|r| r.id == Some(id)) {
            ordered.push(row.clone());
        }
    }
    Outcome::Ok(ordered)
}

/// Chunks whose embedding failed and should be retried.
pub async fn chunks_needing_retry(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
) -> Outcome<Vec<KnowledgeChunkRow>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let sql = format!(
        "SELECT {CHUNK_COLUMNS_SQL} FROM knowledge_chunks \
         WHERE tenant_id = ? AND completion_status = 'retry_needed' ORDER BY id ASC"
    );
    let rows = try_out!(map_sql_outcome(
        conn.query(cx, &sql, &[Value::BigInt(tenant_id)]).await
    ));
    Outcome::Ok(rows.iter().map(decode_chunk_row).collect())
}

/// Distinct embedding versions present in a campaign, across chunks and
/// feature blocks. More than one entry means drift.
pub async fn distinct_embedding_versions(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    campaign_id: i64,
) -> Outcome<Vec<String>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let params = [Value::BigInt(tenant_id), Value::BigInt(campaign_id)];

    let mut versions: Vec<String> = Vec::new();
    for sql in [
        "SELECT DISTINCT embedding_version FROM knowledge_chunks \
         WHERE tenant_id = ? AND campaign_variant_id = ? AND embedding_version IS NOT NULL",
        "SELECT DISTINCT embedding_version FROM feature_blocks \
         WHERE tenant_id = ? AND campaign_variant_id = ? AND embedding_version IS NOT NULL",
    ] {
        let rows = try_out!(map_sql_outcome(conn.query(cx, sql, &params).await));
        for row in &rows {
            let v = get_string(row, 0);
            if !v.is_empty() && !versions.contains(&v) {
                versions.push(v);
            }
        }
    }
    versions.sort();
    Outcome::Ok(versions)
}

/// `(resource_id, embedding_version)` pairs for a campaign's embedded
/// resources, across chunks and feature blocks. Used by the embedding
/// guard to queue per-resource re-embedding work.
pub async fn embedded_resource_versions(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    campaign_id: i64,
) -> Outcome<Vec<(String, i64, String)>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let params = [Value::BigInt(tenant_id), Value::BigInt(campaign_id)];

    let mut out: Vec<(String, i64, String)> = Vec::new();
    for (resource_type, sql) in [
        (
            "knowledge_chunk",
            "SELECT id, embedding_version FROM knowledge_chunks \
             WHERE tenant_id = ? AND campaign_variant_id = ? AND embedding_version IS NOT NULL \
             ORDER BY id ASC",
        ),
        (
            "feature_block",
            "SELECT id, embedding_version FROM feature_blocks \
             WHERE tenant_id = ? AND campaign_variant_id = ? AND embedding_version IS NOT NULL \
             ORDER BY id ASC",
        ),
    ] {
        let rows = try_out!(map_sql_outcome(conn.query(cx, sql, &params).await));
        for row in &rows {
            out.push((
                resource_type.to_string(),
                get_i64(row, 0),
                get_string(row, 1),
            ));
        }
    }
    Outcome::Ok(out)
}

// =============================================================================
// Feature blocks
// =============================================================================

const FEATURE_BLOCK_COLUMNS_SQL: &str =
    "id, tenant_id, product_id, campaign_variant_id, body, tags, embedding, \
     embedding_version, created_at";

fn decode_feature_block_row(row: &sqlmodel_core::Row) -> FeatureBlockRow {
    FeatureBlockRow {
        id: get_opt_i64(row, 0),
        tenant_id: get_i64(row, 1),
        product_id: get_i64(row, 2),
        campaign_variant_id: get_i64(row, 3),
        body: get_string(row, 4),
        tags: {
            let s = get_string(row, 5);
            if s.is_empty() { "[]".to_string() } else { s }
        },
        embedding: get_opt_string(row, 6),
        embedding_version: get_opt_string(row, 7),
        created_at: get_i64(row, 8),
    }
}

/// Insert a feature block, returning it with its assigned id.
pub async fn insert_feature_block(
    cx: &Cx,
    pool: &DbPool,
    mut row: FeatureBlockRow,
) -> Outcome<FeatureBlockRow, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let id = try_out!(map_sql_outcome(
        conn.insert(
            cx,
            "INSERT INTO feature_blocks \
             (tenant_id, product_id, campaign_variant_id, body, tags, embedding, \
              embedding_version, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            &[
                Value::BigInt(row.tenant_id),
                Value::BigInt(row.product_id),
                Value::BigInt(row.campaign_variant_id),
                Value::Text(row.body.clone()),
                Value::Text(row.tags.clone()),
                opt_text(row.embedding.as_deref()),
                opt_text(row.embedding_version.as_deref()),
                Value::BigInt(row.created_at),
            ],
        )
        .await
    ));
    row.id = Some(id);
    Outcome::Ok(row)
}

/// Store an embedding on a feature block.
pub async fn update_feature_block_embedding(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    feature_block_id: i64,
    vector: &[f32],
    version: &str,
) -> Outcome<(), DbError> {
    let encoded = match serde_json::to_string(vector) {
        Ok(s) => s,
        Err(e) => return Outcome::Err(DbError::Serialization(e.to_string())),
    };
    let conn = try_out!(acquire_conn(cx, pool).await);
    try_out!(map_sql_outcome(
        conn.execute(
            cx,
            "UPDATE feature_blocks SET embedding = ?, embedding_version = ? \
             WHERE id = ? AND tenant_id = ?",
            &[
                Value::Text(encoded),
                Value::Text(version.to_string()),
                Value::BigInt(feature_block_id),
                Value::BigInt(tenant_id),
            ],
        )
        .await
    ));
    Outcome::Ok(())
}

/// Feature blocks for a campaign, ordered by id.
pub async fn feature_blocks_for_campaign(
    cx: &Cx,
    pool: &DbPool,
    tenant_id: i64,
    campaign_id: i64,
) -> Outcome<Vec<FeatureBlockRow>, DbError> {
    let conn = try_out!(acquire_conn(cx, pool).await);
    let sql = format!(
        "SELECT {FEATURE_BLOCK_COLUMNS_SQL} FROM feature_blocks \
         WHERE tenant_id = ? AND campaign_variant_id = ? ORDER BY id ASC"
    );
    let rows = try_out!(map_sql_outcome(
        conn.query(
            cx,
            &sql,
            &[Value::BigInt(tenant_id), Value::BigInt(campaign_id)],
        )
        .await
    ));
    Outcome::Ok(rows.iter().map(decode_feature_block_row).collect())
}
