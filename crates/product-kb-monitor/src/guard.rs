//! Embedding-version guard.
//!
//! Detects resources whose stored embedding version lags the configured
//! target, queues per-resource re-embedding jobs, and answers the
//! router's "is this campaign safe to query" question.

use asupersync::{Cx, Outcome};
use product_kb_core::ReembedStatus;
use product_kb_db::{DbError, DbPool, ReembedJobRow, audit_queries, chunk_queries};
use serde::{Deserialize, Serialize};

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

/// One resource whose embedding version differs from the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMismatch {
    /// "knowledge_chunk" | "feature_block"
    pub resource_type: String,
    pub resource_id: i64,
    pub current_version: String,
    pub target_version: String,
}

/// Verdict from the pre-query guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    /// At most one embedding version is present; queries may proceed.
    Allow,
    /// Mixed versions present; queries must be refused.
    RefuseMixed(Vec<String>),
}

/// Watches embedding versions for a deployment's target version.
#[derive(Debug, Clone)]
pub struct EmbeddingGuard {
    pool: DbPool,
    target_version: String,
}

impl EmbeddingGuard {
    #[must_use]
    pub fn new(pool: DbPool, target_version: impl Into<String>) -> Self {
        Self {
            pool,
            target_version: target_version.into(),
        }
    }

    #[must_use]
    pub fn target_version(&self) -> &str {
        &self.target_version
    }

    /// Find all resources in a campaign embedded with a non-target
    /// version and queue one pending re-embed job per resource.
    pub async fn check_mismatches(
        &self,
        cx: &Cx,
        tenant_id: i64,
        campaign_id: i64,
    ) -> Outcome<Vec<VersionMismatch>, DbError> {
        let resources = try_out!(
            chunk_queries::embedded_resource_versions(cx, &self.pool, tenant_id, campaign_id)
                .await
        );

        let mut mismatches = Vec::new();
        for (resource_type, resource_id, current_version) in resources {
            if current_version == self.target_version {
                continue;
            }
            try_out!(
                audit_queries::enqueue_reembed_job(
                    cx,
                    &self.pool,
                    ReembedJobRow {
                        tenant_id,
                        resource_type: resource_type.clone(),
                        resource_id,
                        current_version: current_version.clone(),
                        target_version: self.target_version.clone(),
                        status: ReembedStatus::Pending.as_str().to_string(),
                        ..Default::default()
                    },
                )
                .await
            );
            mismatches.push(VersionMismatch {
                resource_type,
                resource_id,
                current_version,
                target_version: self.target_version.clone(),
            });
        }

        if !mismatches.is_empty() {
            tracing::warn!(
                tenant_id,
                campaign_id,
                count = mismatches.len(),
                target = %self.target_version,
                "queued re-embedding jobs for version mismatches"
            );
        }
        Outcome::Ok(mismatches)
    }

    /// The router's fallback-path check: refuse semantic queries against
    /// a campaign holding more than one embedding version.
    pub async fn prevent_mixed_version_queries(
        &self,
        cx: &Cx,
        tenant_id: i64,
        campaign_id: i64,
    ) -> Outcome<GuardVerdict, DbError> {
        let versions = try_out!(
            chunk_queries::distinct_embedding_versions(cx, &self.pool, tenant_id, campaign_id)
                .await
        );
        if versions.len() > 1 {
            Outcome::Ok(GuardVerdict::RefuseMixed(versions))
        } else {
            Outcome::Ok(GuardVerdict::Allow)
        }
    }
}
