//! Connection pool configuration and initialization
//!
//! Uses `sqlmodel_pool` for connection management. File-backed databases run
//! one-time schema initialization (PRAGMAs + migrations) behind an async
//! gate before pooled connections open; in-memory databases apply the full
//! schema per connection since every `:memory:` handle is its own database.

use crate::error::{DbError, DbResult};
use crate::schema;
use asupersync::sync::OnceCell;
use asupersync::{Cx, Outcome};
use product_kb_core::config::env_value;
use sqlmodel_core::Error as SqlError;
use sqlmodel_pool::{Pool, PoolConfig, PooledConnection};
use std::path::Path;
use std::sync::Arc;

/// The connection type used by this crate's pool and queries.
pub type DbConn = sqlmodel_sqlite::SqliteConnection;

/// Default pool configuration values.
///
/// `SQLite` WAL mode allows unlimited concurrent readers but serializes
/// writers, and retrieval traffic is read-heavy, so a modest pool covers
/// ingestion bursts without connection churn.
pub const DEFAULT_POOL_SIZE: usize = 8;
pub const DEFAULT_MAX_OVERFLOW: usize = 24;
pub const DEFAULT_POOL_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_POOL_RECYCLE_MS: u64 = 30 * 60 * 1000; // 30 minutes

/// Pool configuration
#[derive(Debug, Clone)]
pub struct DbPoolConfig {
    /// Database URL (`sqlite:///path/to/db.sqlite3` or `sqlite://:memory:`)
    pub database_url: String,
    /// Minimum connections to keep open
    pub min_connections: usize,
    /// Maximum connections
    pub max_connections: usize,
    /// Timeout for acquiring a connection (ms)
    pub acquire_timeout_ms: u64,
    /// Max connection lifetime (ms)
    pub max_lifetime_ms: u64,
    /// Run migrations on init
    pub run_migrations: bool,
}

impl Default for DbPoolConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:///./product_kb.sqlite3".to_string(),
            min_connections: DEFAULT_POOL_SIZE,
            max_connections: DEFAULT_POOL_SIZE + DEFAULT_MAX_OVERFLOW,
            acquire_timeout_ms: DEFAULT_POOL_TIMEOUT_MS,
            max_lifetime_ms: DEFAULT_POOL_RECYCLE_MS,
            run_migrations: true,
        }
    }
}

impl DbPoolConfig {
    /// Create config from environment.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let database_url = env_value("DATABASE_URL").unwrap_or(defaults.database_url);
        let min = env_value("DATABASE_POOL_SIZE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.min_connections);
        let overflow = env_value("DATABASE_MAX_OVERFLOW")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_OVERFLOW);

        Self {
            database_url,
            min_connections: min,
            max_connections: min + overflow,
            acquire_timeout_ms: env_value("DATABASE_POOL_TIMEOUT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.acquire_timeout_ms),
            ..defaults
        }
    }

    /// Parse the `SQLite` path out of the database URL.
    pub fn sqlite_path(&self) -> DbResult<String> {
        let url = self.database_url.as_str();
        if url == ":memory:" || url.contains(":memory:") {
            return Ok(":memory:".to_string());
        }
        let Some(path) = url
            .strip_prefix("sqlite:///")
            .or_else(|| url.strip_prefix("sqlite://"))
            .or_else(|| url.strip_prefix("sqlite:"))
        else {
            return Err(DbError::invalid(
                "database_url",
                format!("expected sqlite:///path/to/db.sqlite3, got {url}"),
            ));
        };
        if path.is_empty() {
            return Err(DbError::invalid("database_url", "empty sqlite path"));
        }
        Ok(path.to_string())
    }
}

/// A configured `SQLite` connection pool with schema initialization.
#[derive(Clone)]
pub struct DbPool {
    pool: Arc<Pool<DbConn>>,
    sqlite_path: String,
    init_sql: Arc<String>,
    run_migrations: bool,
    init_gate: Arc<OnceCell<()>>,
}

impl DbPool {
    /// Create a new pool (does not open connections until first acquire).
    pub fn new(config: &DbPoolConfig) -> DbResult<Self> {
        let sqlite_path = config.sqlite_path()?;
        let init_sql = Arc::new(schema::build_conn_pragmas(config.max_connections));

        let pool_config = PoolConfig::new(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout_ms)
            .max_lifetime(config.max_lifetime_ms)
            .test_on_checkout(true)
            .test_on_return(false);

        Ok(Self {
            pool: Arc::new(Pool::new(pool_config)),
            sqlite_path,
            init_sql,
            run_migrations: config.run_migrations,
            init_gate: Arc::new(OnceCell::new()),
        })
    }

    #[must_use]
    pub fn sqlite_path(&self) -> &str {
        &self.sqlite_path
    }

    /// Acquire a pooled connection, creating and initializing a new one if
    /// needed.
    pub async fn acquire(&self, cx: &Cx) -> Outcome<PooledConnection<DbConn>, SqlError> {
        let sqlite_path = self.sqlite_path.clone();
        let init_sql = Arc::clone(&self.init_sql);
        let run_migrations = self.run_migrations;
        let init_gate = Arc::clone(&self.init_gate);
        let cx2 = cx.clone();

        self.pool
            .acquire(cx, move || {
                let sqlite_path = sqlite_path.clone();
                let init_sql = Arc::clone(&init_sql);
                let init_gate = Arc::clone(&init_gate);
                let cx2 = cx2.clone();
                async move {
                    if sqlite_path != ":memory:" {
                        if let Err(e) = ensure_sqlite_parent_dir_exists(&sqlite_path) {
                            return Outcome::Err(e);
                        }

                        // One-time DB-wide init (journal mode + migrations)
                        // before any pooled connection opens.
                        let gate_out = init_gate
                            .get_or_try_init(|| {
                                let cx2 = cx2.clone();
                                let sqlite_path = sqlite_path.clone();
                                async move {
                                    match initialize_sqlite_file_once(
                                        &cx2,
                                        &sqlite_path,
                                        run_migrations,
                                    )
                                    .await
                                    {
                                        Outcome::Ok(()) => Ok(()),
                                        Outcome::Err(e) => Err(Outcome::Err(e)),
                                        Outcome::Cancelled(r) => Err(Outcome::Cancelled(r)),
                                        Outcome::Panicked(p) => Err(Outcome::Panicked(p)),
                                    }
                                }
                            })
                            .await;

                        match gate_out {
                            Ok(_) => {}
                            Err(Outcome::Err(e)) => return Outcome::Err(e),
                            Err(Outcome::Cancelled(r)) => return Outcome::Cancelled(r),
                            Err(Outcome::Panicked(p)) => return Outcome::Panicked(p),
                            Err(Outcome::Ok(())) => {
                                unreachable!("sqlite init gate returned Err(Outcome::Ok(()))")
                            }
                        }
                    }

                    let conn = match open_connection(&sqlite_path) {
                        Ok(c) => c,
                        Err(e) => return Outcome::Err(e),
                    };

                    // Per-connection PRAGMAs.
                    if let Err(e) = conn.execute_raw(&init_sql) {
                        return Outcome::Err(e);
                    }

                    // Every :memory: handle is a fresh database; give it the
                    // schema directly.
                    if sqlite_path == ":memory:"
                        && let Err(e) = conn.execute_raw(schema::CREATE_TABLES_SQL)
                    {
                        return Outcome::Err(e);
                    }

                    Outcome::Ok(conn)
                }
            })
            .await
    }
}

impl std::fmt::Debug for DbPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbPool")
            .field("sqlite_path", &self.sqlite_path)
            .field("run_migrations", &self.run_migrations)
            .finish_non_exhaustive()
    }
}

/// Create a pool from config. Convenience wrapper for the common path.
pub fn create_pool(config: &DbPoolConfig) -> DbResult<DbPool> {
    DbPool::new(config)
}

#[allow(clippy::result_large_err)]
fn ensure_sqlite_parent_dir_exists(path: &str) -> Result<(), SqlError> {
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            SqlError::Custom(format!("failed to create db dir {}: {e}", parent.display()))
        })?;
    }
    Ok(())
}

#[allow(clippy::result_large_err)]
fn open_connection(sqlite_path: &str) -> Result<DbConn, SqlError> {
    if sqlite_path == ":memory:" {
        DbConn::open_memory()
    } else {
        DbConn::open_file(sqlite_path)
    }
}

async fn initialize_sqlite_file_once(
    cx: &Cx,
    sqlite_path: &str,
    run_migrations: bool,
) -> Outcome<(), SqlError> {
    let mig_conn = match DbConn::open_file(sqlite_path) {
        Ok(conn) => conn,
        Err(err) => return Outcome::Err(err),
    };

    if let Err(err) = mig_conn.execute_raw(schema::PRAGMA_DB_INIT_SQL) {
        return Outcome::Err(err);
    }

    if run_migrations {
        match schema::migrate_to_latest(cx, &mig_conn).await {
            Outcome::Ok(applied) => {
                if !applied.is_empty() {
                    tracing::info!(count = applied.len(), "applied schema migrations");
                }
            }
            Outcome::Err(err) => return Outcome::Err(err),
            Outcome::Cancelled(reason) => return Outcome::Cancelled(reason),
            Outcome::Panicked(payload) => return Outcome::Panicked(payload),
        }
    }

    drop(mig_conn);
    Outcome::Ok(())
}
