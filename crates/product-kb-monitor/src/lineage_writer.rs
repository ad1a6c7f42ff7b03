//! Asynchronous buffered lineage writer.
//!
//! Moves lineage appends off the request hot path to a dedicated
//! background OS thread. Events buffer in a bounded channel and flush on
//! a batch threshold or interval. Overflow falls back to a synchronous
//! direct write on the caller's thread: events are never dropped.

use product_kb_db::{DbConn, DbPool, LineageEventRow, LineageSink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Writer configuration.
#[derive(Debug, Clone)]
pub struct LineageWriterConfig {
    /// Bounded queue capacity.
    pub capacity: usize,
    /// Flush when this many events are buffered.
    pub flush_batch: usize,
    /// Flush at least this often.
    pub flush_interval: Duration,
}

impl Default for LineageWriterConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            flush_batch: 100,
            flush_interval: Duration::from_secs(5),
        }
    }
}

/// Counters exposed for tests and diagnostics.
#[derive(Debug, Default)]
pub struct WriterStats {
    pub enqueued: AtomicU64,
    pub drained: AtomicU64,
    pub sync_fallbacks: AtomicU64,
    pub errors: AtomicU64,
}

/// Snapshot of [`WriterStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterStatsSnapshot {
    pub enqueued: u64,
    pub drained: u64,
    pub sync_fallbacks: u64,
    pub errors: u64,
}

enum Msg {
    Event(Box<LineageEventRow>),
    Flush(SyncSender<()>),
    Shutdown,
}

/// The buffered writer. One per process; clone the `Arc`.
pub struct LineageWriter {
    sender: SyncSender<Msg>,
    drain_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
    stats: Arc<WriterStats>,
    sqlite_path: String,
}

impl LineageWriter {
    /// Spawn the drain thread and return the writer handle.
    #[must_use]
    pub fn start(pool: DbPool, config: LineageWriterConfig) -> Arc<Self> {
        let (tx, rx) = std::sync::mpsc::sync_channel(config.capacity.max(1));
        let stats = Arc::new(WriterStats::default());
        let stats_worker = Arc::clone(&stats);
        let drain_config = config.clone();
        let drain_pool = pool.clone();

        let handle = std::thread::Builder::new()
            .name("lineage-drain".into())
            .spawn(move || drain_loop(&drain_pool, &drain_config, &rx, &stats_worker))
            .expect("failed to spawn lineage drain worker");

        Arc::new(Self {
            sender: tx,
            drain_handle: Mutex::new(Some(handle)),
            stats,
            sqlite_path: pool.sqlite_path().to_string(),
        })
    }

    /// Enqueue an event; on a full queue, write it synchronously instead.
    pub fn enqueue(&self, event: LineageEventRow) {
        match self.sender.try_send(Msg::Event(Box::new(event))) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(Msg::Event(event)))
            | Err(TrySendError::Disconnected(Msg::Event(event))) => {
                self.stats.sync_fallbacks.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = sync_write(&self.sqlite_path, &event) {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(error = %e, "synchronous lineage write failed");
                }
            }
            Err(_) => unreachable!("enqueue only sends Msg::Event"),
        }
    }

    /// Block until all buffered events are durably written.
    pub fn flush(&self) {
        let (done_tx, done_rx) = std::sync::mpsc::sync_channel(1);
        if self.sender.send(Msg::Flush(done_tx)).is_ok() {
            let _ = done_rx.recv_timeout(Duration::from_secs(30));
        }
    }

    /// Drain remaining events, stop the drain thread, and join it.
    pub fn shutdown(&self) {
        self.flush();
        let _ = self.sender.send(Msg::Shutdown);
        let handle = {
            let mut guard = self.drain_handle.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(h) = handle {
            let _ = h.join();
        }
    }

    #[must_use]
    pub fn stats(&self) -> WriterStatsSnapshot {
        WriterStatsSnapshot {
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            drained: self.stats.drained.load(Ordering::Relaxed),
            sync_fallbacks: self.stats.sync_fallbacks.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
        }
    }
}

impl LineageSink for LineageWriter {
    fn record(&self, event: LineageEventRow) {
        self.enqueue(event);
    }
}

impl std::fmt::Debug for LineageWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineageWriter")
            .field("sqlite_path", &self.sqlite_path)
            .finish_non_exhaustive()
    }
}

fn drain_loop(
    pool: &DbPool,
    config: &LineageWriterConfig,
    rx: &Receiver<Msg>,
    stats: &WriterStats,
) {
    let rt = match asupersync::runtime::RuntimeBuilder::current_thread().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "lineage drain runtime failed to start");
            return;
        }
    };
    let cx = asupersync::Cx::for_request();

    let mut flush_waiters: Vec<SyncSender<()>> = Vec::new();
    let mut shutting_down = false;

    loop {
        let mut batch: Vec<LineageEventRow> = Vec::new();

        match rx.recv_timeout(config.flush_interval) {
            Ok(Msg::Event(event)) => batch.push(*event),
            Ok(Msg::Flush(done_tx)) => flush_waiters.push(done_tx),
            Ok(Msg::Shutdown) => shutting_down = true,
            Err(RecvTimeoutError::Timeout) => {
                for w in flush_waiters.drain(..) {
                    let _ = w.try_send(());
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }

        // Pull the rest of the backlog up to the batch threshold.
        while batch.len() < config.flush_batch {
            match rx.try_recv() {
                Ok(Msg::Event(event)) => batch.push(*event),
                Ok(Msg::Flush(done_tx)) => flush_waiters.push(done_tx),
                Ok(Msg::Shutdown) => shutting_down = true,
                Err(_) => break,
            }
        }

        if !batch.is_empty() {
            let written = batch.len() as u64;
            match rt
                .block_on(product_kb_db::audit_queries::insert_lineage_events(
                    &cx, pool, &batch,
                ))
                .into_result()
            {
                Ok(_) => {
                    stats.drained.fetch_add(written, Ordering::Relaxed);
                }
                Err(e) => {
                    stats.errors.fetch_add(written, Ordering::Relaxed);
                    tracing::error!(error = %e, count = written, "lineage batch write failed");
                }
            }
        }

        for w in flush_waiters.drain(..) {
            let _ = w.try_send(());
        }

        if shutting_down {
            break;
        }
    }
}

/// Direct synchronous append on the caller's thread (queue-overflow path).
fn sync_write(sqlite_path: &str, event: &LineageEventRow) -> Result<(), String> {
    if sqlite_path == ":memory:" {
        return Err("no synchronous path to an in-memory database".to_string());
    }
    let conn = DbConn::open_file(sqlite_path).map_err(|e| e.to_string())?;
    let sql = format!(
        "INSERT INTO lineage_events \
         (tenant_id, product_id, campaign_variant_id, resource_type, resource_id, \
          document_source_id, ingestion_job_id, action, payload, operator, occurred_at) \
         VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
        event.tenant_id,
        sql_opt_i64(event.product_id),
        sql_opt_i64(event.campaign_variant_id),
        sql_quote(&event.resource_type),
        event.resource_id,
        sql_opt_text(event.document_source_id.as_deref()),
        sql_opt_i64(event.ingestion_job_id),
        sql_quote(&event.action),
        sql_quote(&event.payload),
        sql_opt_text(event.operator.as_deref()),
        event.occurred_at,
    );
    conn.execute_raw(&sql).map_err(|e| e.to_string())
}

fn sql_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn sql_opt_text(s: Option<&str>) -> String {
    s.map_or_else(|| "NULL".to_string(), sql_quote)
}

fn sql_opt_i64(v: Option<i64>) -> String {
    v.map_or_else(|| "NULL".to_string(), |n| n.to_string())
}
