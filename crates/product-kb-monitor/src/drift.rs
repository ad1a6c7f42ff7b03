//! Drift detection: staleness, document-hash divergence, and mixed
//! embedding versions.
//!
//! Each finding persists an open drift alert (deduplicated against
//! already-open alerts of the same type and campaign) and is published to
//! in-process subscribers.

use asupersync::{Cx, Outcome};
use product_kb_core::{AlertStatus, AlertType, Config, sha256_hex};
use product_kb_db::{
    DbError, DbPool, DriftAlertRow, MICROS_PER_DAY, audit_queries, chunk_queries, now_micros,
    queries,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Unwrap an `Outcome`: on non-`Ok`, return early.
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

/// One drift finding as published to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftFinding {
    pub tenant_id: i64,
    pub campaign_id: Option<i64>,
    pub alert_type: AlertType,
    pub details: serde_json::Value,
}

/// Result of one tenant's drift sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriftCheckResult {
    /// Campaign ids published longer ago than the freshness threshold.
    pub stale_campaigns: Vec<i64>,
    /// Document source ids whose stored hash no longer matches.
    pub hash_mismatches: Vec<String>,
    /// Campaign ids carrying more than one embedding version.
    pub embedding_drift: Vec<i64>,
    pub total_alerts: usize,
}

/// Scheduled drift checker.
pub struct DriftRunner {
    pool: DbPool,
    config: Config,
    subscribers: Mutex<Vec<Sender<DriftFinding>>>,
}

impl DriftRunner {
    #[must_use]
    pub fn new(pool: DbPool, config: Config) -> Self {
        Self {
            pool,
            config,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a real-time consumer of drift findings.
    #[must_use]
    pub fn subscribe(&self) -> std::sync::mpsc::Receiver<DriftFinding> {
        let (tx, rx) = std::sync::mpsc::channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    fn publish(&self, finding: &DriftFinding) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|tx| tx.send(finding.clone()).is_ok());
        }
    }

    /// Run all drift checks for one tenant.
    pub async fn run_for_tenant(
        &self,
        cx: &Cx,
        tenant_id: i64,
    ) -> Outcome<DriftCheckResult, DbError> {
        let mut result = DriftCheckResult::default();

        try_out!(self.check_stale_campaigns(cx, tenant_id, &mut result).await);
        try_out!(self.check_document_hashes(cx, tenant_id, &mut result).await);
        try_out!(self.check_embedding_versions(cx, tenant_id, &mut result).await);

        tracing::info!(
            tenant_id,
            stale = result.stale_campaigns.len(),
            hash_mismatches = result.hash_mismatches.len(),
            embedding_drift = result.embedding_drift.len(),
            "drift check complete"
        );
        Outcome::Ok(result)
    }

    /// Run drift checks for every tenant.
    pub async fn run_all(&self, cx: &Cx) -> Outcome<Vec<(i64, DriftCheckResult)>, DbError> {
        let tenant_ids = try_out!(queries::list_tenant_ids(cx, &self.pool).await);
        let mut results = Vec::with_capacity(tenant_ids.len());
        for tenant_id in tenant_ids {
            let result = try_out!(self.run_for_tenant(cx, tenant_id).await);
            results.push((tenant_id, result));
        }
        Outcome::Ok(results)
    }

    async fn check_stale_campaigns(
        &self,
        cx: &Cx,
        tenant_id: i64,
        result: &mut DriftCheckResult,
    ) -> Outcome<(), DbError> {
        let threshold_micros = self.config.freshness_threshold_days * MICROS_PER_DAY;
        let cutoff = now_micros() - threshold_micros;

        let published = try_out!(queries::published_campaigns(cx, &self.pool, tenant_id).await);
        for campaign in published {
            let Some(effective_from) = campaign.effective_from else {
                continue;
            };
            if effective_from >= cutoff {
                continue;
            }
            let campaign_id = campaign.id.unwrap_or_default();
            result.stale_campaigns.push(campaign_id);
            try_out!(
                self.raise_alert(
                    cx,
                    tenant_id,
                    Some(campaign.product_id),
                    Some(campaign_id),
                    AlertType::StaleCampaign,
                    serde_json::json!({
                        "effective_from": effective_from,
                        "threshold_days": self.config.freshness_threshold_days,
                    }),
                    result,
                )
                .await
            );
        }
        Outcome::Ok(())
    }

    async fn check_document_hashes(
        &self,
        cx: &Cx,
        tenant_id: i64,
        result: &mut DriftCheckResult,
    ) -> Outcome<(), DbError> {
        let sources =
            try_out!(audit_queries::document_sources_for_tenant(cx, &self.pool, tenant_id).await);
        for source in sources {
            // Recompute from the original document when it is reachable;
            // unreachable sources are skipped, not flagged.
            let Ok(bytes) = std::fs::read(&source.uri) else {
                continue;
            };
            let recomputed = sha256_hex(&bytes);
            if recomputed == source.sha256 {
                continue;
            }
            result.hash_mismatches.push(source.id.clone());
            try_out!(
                self.raise_alert(
                    cx,
                    tenant_id,
                    None,
                    Some(source.campaign_variant_id),
                    AlertType::HashChanged,
                    serde_json::json!({
                        "document_source_id": source.id,
                        "stored_sha256": source.sha256,
                        "recomputed_sha256": recomputed,
                    }),
                    result,
                )
                .await
            );
        }
        Outcome::Ok(())
    }

    async fn check_embedding_versions(
        &self,
        cx: &Cx,
        tenant_id: i64,
        result: &mut DriftCheckResult,
    ) -> Outcome<(), DbError> {
        let campaigns = try_out!(queries::campaigns_for_tenant(cx, &self.pool, tenant_id).await);
        for campaign in campaigns {
            let campaign_id = campaign.id.unwrap_or_default();
            let versions = try_out!(
                chunk_queries::distinct_embedding_versions(cx, &self.pool, tenant_id, campaign_id)
                    .await
            );
            if versions.len() <= 1 {
                continue;
            }
            result.embedding_drift.push(campaign_id);
            try_out!(
                self.raise_alert(
                    cx,
                    tenant_id,
                    Some(campaign.product_id),
                    Some(campaign_id),
                    AlertType::EmbeddingDrift,
                    serde_json::json!({ "versions": versions }),
                    result,
                )
                .await
            );
        }
        Outcome::Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn raise_alert(
        &self,
        cx: &Cx,
        tenant_id: i64,
        product_id: Option<i64>,
        campaign_id: Option<i64>,
        alert_type: AlertType,
        details: serde_json::Value,
        result: &mut DriftCheckResult,
    ) -> Outcome<(), DbError> {
        let already_open = try_out!(
            audit_queries::has_open_alert(cx, &self.pool, tenant_id, alert_type.as_str(), campaign_id)
                .await
        );
        if already_open {
            return Outcome::Ok(());
        }

        try_out!(
            audit_queries::insert_drift_alert(
                cx,
                &self.pool,
                DriftAlertRow {
                    tenant_id,
                    product_id,
                    campaign_variant_id: campaign_id,
                    alert_type: alert_type.as_str().to_string(),
                    details: details.to_string(),
                    status: AlertStatus::Open.as_str().to_string(),
                    ..Default::default()
                },
            )
            .await
        );
        result.total_alerts += 1;

        self.publish(&DriftFinding {
            tenant_id,
            campaign_id,
            alert_type,
            details,
        });
        Outcome::Ok(())
    }
}

impl std::fmt::Debug for DriftRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriftRunner")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// Fixed-interval scheduler driving [`DriftRunner::run_all`] on a
/// dedicated thread.
pub struct DriftScheduler {
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl DriftScheduler {
    /// Spawn the scheduler thread.
    #[must_use]
    pub fn start(runner: Arc<DriftRunner>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_worker = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("drift-runner".into())
            .spawn(move || {
                let rt = match asupersync::runtime::RuntimeBuilder::current_thread().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!(error = %e, "drift scheduler runtime failed to start");
                        return;
                    }
                };
                let cx = asupersync::Cx::for_request();
                while !stop_worker.load(Ordering::Relaxed) {
                    if let Err(e) = rt.block_on(runner.run_all(&cx)).into_result() {
                        tracing::error!(error = %e, "scheduled drift run failed");
                    }
                    // Sleep in short slices so stop() takes effect quickly.
                    let mut remaining = interval;
                    let slice = Duration::from_millis(200);
                    while remaining > Duration::ZERO && !stop_worker.load(Ordering::Relaxed) {
                        let nap = remaining.min(slice);
                        std::thread::sleep(nap);
                        remaining = remaining.saturating_sub(nap);
                    }
                }
            })
            .expect("failed to spawn drift scheduler");

        Self {
            stop,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop the scheduler and join its thread.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let handle = {
            let mut guard = self.handle.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(h) = handle {
            let _ = h.join();
        }
    }
}

impl Drop for DriftScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
