//! Database schema creation and migrations
//!
//! Creates all tables and indexes. Migrations are additive: each DDL
//! statement becomes a tracked migration keyed by object name, so re-running
//! against an existing database is a no-op.

use asupersync::{Cx, Outcome};
use sqlmodel_core::{Connection, Error as SqlError};
use sqlmodel_schema::{Migration, MigrationRunner};

/// SQL statements for creating the database schema
pub const CREATE_TABLES_SQL: &str = r"
-- Tenants table
CREATE TABLE IF NOT EXISTS tenants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    settings TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tenants_name ON tenants(name);

-- Products table
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id INTEGER NOT NULL REFERENCES tenants(id),
    name TEXT NOT NULL,
    model_year INTEGER,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    UNIQUE(tenant_id, name)
);
CREATE INDEX IF NOT EXISTS idx_products_tenant_name ON products(tenant_id, name);

-- Campaign variants table
CREATE TABLE IF NOT EXISTS campaign_variants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id INTEGER NOT NULL REFERENCES tenants(id),
    product_id INTEGER NOT NULL REFERENCES products(id),
    locale TEXT NOT NULL,
    trim TEXT NOT NULL DEFAULT '',
    market TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'draft',
    version INTEGER NOT NULL DEFAULT 1,
    effective_from INTEGER,
    effective_through INTEGER,
    is_draft INTEGER NOT NULL DEFAULT 1,
    last_published_by TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_campaigns_scope ON campaign_variants(tenant_id, product_id, locale, trim, market);
CREATE INDEX IF NOT EXISTS idx_campaigns_status ON campaign_variants(tenant_id, status);
CREATE INDEX IF NOT EXISTS idx_campaigns_effective ON campaign_variants(status, effective_through);

-- Spec categories table
CREATE TABLE IF NOT EXISTS spec_categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

-- Spec items table
CREATE TABLE IF NOT EXISTS spec_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category_id INTEGER NOT NULL REFERENCES spec_categories(id),
    display_name TEXT NOT NULL,
    unit TEXT,
    data_type TEXT NOT NULL DEFAULT 'text',
    aliases TEXT NOT NULL DEFAULT '[]',
    UNIQUE(category_id, display_name)
);
CREATE INDEX IF NOT EXISTS idx_spec_items_category ON spec_items(category_id, display_name);

-- Spec values table
CREATE TABLE IF NOT EXISTS spec_values (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id INTEGER NOT NULL REFERENCES tenants(id),
    product_id INTEGER NOT NULL REFERENCES products(id),
    campaign_variant_id INTEGER NOT NULL REFERENCES campaign_variants(id),
    spec_item_id INTEGER NOT NULL REFERENCES spec_items(id),
    value_numeric REAL,
    value_text TEXT,
    unit TEXT,
    confidence REAL NOT NULL DEFAULT 1.0,
    status TEXT NOT NULL DEFAULT 'active',
    source_doc_id TEXT,
    source_page INTEGER,
    key_features TEXT,
    variant_availability TEXT,
    explanation TEXT,
    explanation_failed INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 1,
    effective_from INTEGER,
    effective_through INTEGER,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_spec_values_campaign ON spec_values(tenant_id, campaign_variant_id, spec_item_id);
CREATE INDEX IF NOT EXISTS idx_spec_values_product ON spec_values(tenant_id, product_id, status);
CREATE INDEX IF NOT EXISTS idx_spec_values_status ON spec_values(campaign_variant_id, status);

-- Feature blocks table
CREATE TABLE IF NOT EXISTS feature_blocks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id INTEGER NOT NULL REFERENCES tenants(id),
    product_id INTEGER NOT NULL REFERENCES products(id),
    campaign_variant_id INTEGER NOT NULL REFERENCES campaign_variants(id),
    body TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    embedding TEXT,
    embedding_version TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_feature_blocks_campaign ON feature_blocks(tenant_id, campaign_variant_id);

-- Knowledge chunks table
CREATE TABLE IF NOT EXISTS knowledge_chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id INTEGER NOT NULL REFERENCES tenants(id),
    product_id INTEGER NOT NULL REFERENCES products(id),
    campaign_variant_id INTEGER REFERENCES campaign_variants(id),
    chunk_type TEXT NOT NULL,
    text TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    content_hash TEXT NOT NULL,
    embedding_vector TEXT,
    embedding_model TEXT,
    embedding_version TEXT,
    source_doc_id TEXT,
    source_page INTEGER,
    visibility TEXT NOT NULL DEFAULT 'private',
    completion_status TEXT NOT NULL DEFAULT 'complete',
    created_at INTEGER NOT NULL,
    UNIQUE(tenant_id, content_hash)
);
CREATE INDEX IF NOT EXISTS idx_chunks_campaign ON knowledge_chunks(tenant_id, campaign_variant_id, chunk_type);
CREATE INDEX IF NOT EXISTS idx_chunks_hash ON knowledge_chunks(tenant_id, content_hash);
CREATE INDEX IF NOT EXISTS idx_chunks_embedding_version ON knowledge_chunks(campaign_variant_id, embedding_version);
CREATE INDEX IF NOT EXISTS idx_chunks_completion ON knowledge_chunks(completion_status);

-- Document sources table
CREATE TABLE IF NOT EXISTS document_sources (
    id TEXT PRIMARY KEY,
    tenant_id INTEGER NOT NULL REFERENCES tenants(id),
    campaign_variant_id INTEGER NOT NULL REFERENCES campaign_variants(id),
    uri TEXT NOT NULL,
    sha256 TEXT NOT NULL,
    ingested_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_document_sources_tenant ON document_sources(tenant_id, campaign_variant_id);

-- Lineage events table (append-only)
CREATE TABLE IF NOT EXISTS lineage_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id INTEGER NOT NULL REFERENCES tenants(id),
    product_id INTEGER,
    campaign_variant_id INTEGER,
    resource_type TEXT NOT NULL,
    resource_id INTEGER NOT NULL,
    document_source_id TEXT,
    ingestion_job_id INTEGER,
    action TEXT NOT NULL,
    payload TEXT NOT NULL DEFAULT '{}',
    operator TEXT,
    occurred_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_lineage_resource ON lineage_events(resource_type, resource_id);
CREATE INDEX IF NOT EXISTS idx_lineage_tenant_time ON lineage_events(tenant_id, occurred_at);
CREATE INDEX IF NOT EXISTS idx_lineage_job ON lineage_events(ingestion_job_id);

-- Drift alerts table
CREATE TABLE IF NOT EXISTS drift_alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id INTEGER NOT NULL REFERENCES tenants(id),
    product_id INTEGER,
    campaign_variant_id INTEGER,
    alert_type TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'open',
    detected_at INTEGER NOT NULL,
    resolved_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_drift_alerts_tenant_status ON drift_alerts(tenant_id, status);
CREATE INDEX IF NOT EXISTS idx_drift_alerts_type ON drift_alerts(tenant_id, alert_type, status);

-- Comparison rows table
CREATE TABLE IF NOT EXISTS comparison_rows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id INTEGER NOT NULL REFERENCES tenants(id),
    pair_key TEXT NOT NULL,
    primary_product_id INTEGER NOT NULL,
    secondary_product_id INTEGER NOT NULL,
    dimension TEXT NOT NULL,
    primary_value TEXT NOT NULL,
    secondary_value TEXT NOT NULL,
    verdict TEXT NOT NULL,
    narrative TEXT NOT NULL DEFAULT '',
    shareability TEXT NOT NULL DEFAULT 'restricted',
    created_at INTEGER NOT NULL,
    UNIQUE(tenant_id, pair_key, dimension)
);
CREATE INDEX IF NOT EXISTS idx_comparison_pair ON comparison_rows(tenant_id, pair_key);

-- Re-embedding jobs table
CREATE TABLE IF NOT EXISTS reembed_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id INTEGER NOT NULL REFERENCES tenants(id),
    resource_type TEXT NOT NULL,
    resource_id INTEGER NOT NULL,
    current_version TEXT NOT NULL,
    target_version TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reembed_jobs_status ON reembed_jobs(tenant_id, status);
CREATE INDEX IF NOT EXISTS idx_reembed_jobs_resource ON reembed_jobs(resource_type, resource_id);

-- Ingestion jobs table
CREATE TABLE IF NOT EXISTS ingestion_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id INTEGER NOT NULL REFERENCES tenants(id),
    product_id INTEGER NOT NULL REFERENCES products(id),
    campaign_variant_id INTEGER NOT NULL REFERENCES campaign_variants(id),
    status TEXT NOT NULL DEFAULT 'pending',
    operator TEXT,
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    counts TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_ingestion_jobs_campaign ON ingestion_jobs(tenant_id, campaign_variant_id);
";

/// One-time DB-wide PRAGMAs applied before pooled connections open.
pub const PRAGMA_DB_INIT_SQL: &str = r"
PRAGMA foreign_keys = OFF;
PRAGMA journal_mode = 'WAL';
";

/// Total memory budget (in KB) for page caches across all pooled connections.
const TOTAL_CACHE_BUDGET_KB: usize = 256 * 1024;

/// Build per-connection PRAGMAs with a `cache_size` that respects the total
/// memory budget.
///
/// `foreign_keys = OFF` must come first; `busy_timeout` next so lock waits
/// apply to the remaining PRAGMAs.
#[must_use]
pub fn build_conn_pragmas(max_connections: usize) -> String {
    let per_conn_kb = (TOTAL_CACHE_BUDGET_KB
        .checked_div(max_connections)
        .unwrap_or(8192))
    .clamp(2048, 65536);

    format!(
        "\
PRAGMA foreign_keys = OFF;
PRAGMA busy_timeout = 60000;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -{per_conn_kb};
PRAGMA temp_store = MEMORY;
"
    )
}

/// Name of the schema migration tracking table.
pub const MIGRATIONS_TABLE_NAME: &str = "product_kb_migrations";

fn extract_ident_after_keyword(stmt: &str, keyword_lc: &str) -> Option<String> {
    let lower = stmt.to_ascii_lowercase();
    let idx = lower.find(keyword_lc)?;
    let after = stmt[idx + keyword_lc.len()..].trim_start();
    let end = after
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(after.len());
    let ident = after[..end].trim();
    if ident.is_empty() {
        None
    } else {
        Some(ident.to_string())
    }
}

fn derive_migration_id_and_description(stmt: &str) -> Option<(String, String)> {
    const CREATE_TABLE: &str = "create table if not exists ";
    const CREATE_INDEX: &str = "create index if not exists ";

    if let Some(name) = extract_ident_after_keyword(stmt, CREATE_TABLE) {
        return Some((
            format!("v1_create_table_{name}"),
            format!("create table {name}"),
        ));
    }
    if let Some(name) = extract_ident_after_keyword(stmt, CREATE_INDEX) {
        return Some((
            format!("v1_create_index_{name}"),
            format!("create index {name}"),
        ));
    }
    None
}

/// All schema migrations, derived statement-by-statement from
/// [`CREATE_TABLES_SQL`]. Future additive migrations append to this list
/// with `v2_*` ids.
#[must_use]
pub fn schema_migrations() -> Vec<Migration> {
    let mut migrations: Vec<Migration> = Vec::new();

    for chunk in CREATE_TABLES_SQL.split(';') {
        let stmt = chunk.trim();
        if stmt.is_empty() {
            continue;
        }

        let Some((id, desc)) = derive_migration_id_and_description(stmt) else {
            continue;
        };

        migrations.push(Migration::new(id, desc, stmt.to_string(), String::new()));
    }

    migrations
}

/// The configured migration runner for this schema.
#[must_use]
pub fn migration_runner() -> MigrationRunner {
    MigrationRunner::new(schema_migrations()).table_name(MIGRATIONS_TABLE_NAME)
}

/// Create the migration tracking table.
///
/// `ON CONFLICT IGNORE` on the id keeps concurrent startups from turning
/// duplicate migration inserts into fatal errors.
pub async fn init_migrations_table<C: Connection>(cx: &Cx, conn: &C) -> Outcome<(), SqlError> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE_NAME} (
            id TEXT PRIMARY KEY ON CONFLICT IGNORE,
            description TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )"
    );
    match conn.execute(cx, &sql, &[]).await {
        Outcome::Ok(_) => Outcome::Ok(()),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Apply all pending migrations, returning the ids that were applied.
pub async fn migrate_to_latest<C: Connection>(cx: &Cx, conn: &C) -> Outcome<Vec<String>, SqlError> {
    match init_migrations_table(cx, conn).await {
        Outcome::Ok(()) => {}
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    }
    migration_runner().migrate(cx, conn).await
}
