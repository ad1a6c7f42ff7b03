//! Campaign publish and rollback.
//!
//! Thin orchestration over the store's transactional publish/rollback:
//! this layer adds lineage events and keeps callers off the raw queries.

use asupersync::{Cx, Outcome};
use product_kb_core::LineageAction;
use product_kb_db::{CampaignVariantRow, DbPool, LineageEventRow, LineageSink, queries};

use crate::error::IngestError;

fn map_db<T>(out: Outcome<T, product_kb_db::DbError>) -> Outcome<T, IngestError> {
    match out {
        Outcome::Ok(v) => Outcome::Ok(v),
        Outcome::Err(e) => Outcome::Err(IngestError::Db(e)),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Publish a draft campaign.
///
/// Refused with `NOT_DRAFT` when the target is already published or
/// archived, and with `CONFLICT_EXISTS` while unresolved value conflicts
/// remain. On success exactly one published row per scope tuple has an
/// open effective window.
pub async fn publish(
    cx: &Cx,
    pool: &DbPool,
    lineage: &dyn LineageSink,
    tenant_id: i64,
    campaign_id: i64,
    expected_version: Option<i64>,
    approved_by: &str,
) -> Outcome<CampaignVariantRow, IngestError> {
    let published = match map_db(
        queries::publish_campaign(
            cx,
            pool,
            tenant_id,
            campaign_id,
            expected_version,
            approved_by,
        )
        .await,
    ) {
        Outcome::Ok(row) => row,
        other => return other,
    };

    lineage.record(LineageEventRow {
        tenant_id,
        product_id: Some(published.product_id),
        campaign_variant_id: Some(campaign_id),
        resource_type: "campaign_variant".to_string(),
        resource_id: campaign_id,
        action: LineageAction::Published.as_str().to_string(),
        payload: serde_json::json!({ "version": published.version }).to_string(),
        operator: Some(approved_by.to_string()),
        ..Default::default()
    });

    Outcome::Ok(published)
}

/// Roll back to a previously published version, archiving the current one.
pub async fn rollback(
    cx: &Cx,
    pool: &DbPool,
    lineage: &dyn LineageSink,
    tenant_id: i64,
    campaign_id: i64,
    to_version: i64,
    operator: &str,
) -> Outcome<CampaignVariantRow, IngestError> {
    let revived = match map_db(
        queries::rollback_campaign(cx, pool, tenant_id, campaign_id, to_version, operator).await,
    ) {
        Outcome::Ok(row) => row,
        other => return other,
    };

    lineage.record(LineageEventRow {
        tenant_id,
        product_id: Some(revived.product_id),
        campaign_variant_id: revived.id,
        resource_type: "campaign_variant".to_string(),
        resource_id: revived.id.unwrap_or_default(),
        action: LineageAction::RolledBack.as_str().to_string(),
        payload: serde_json::json!({
            "from_campaign_id": campaign_id,
            "to_version": to_version,
        })
        .to_string(),
        operator: Some(operator.to_string()),
        ..Default::default()
    });

    Outcome::Ok(revived)
}
