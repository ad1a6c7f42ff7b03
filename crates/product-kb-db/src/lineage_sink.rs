//! Capability seam for lineage emission.
//!
//! Ingestion and retrieval record lineage through this trait; the
//! monitoring crate's buffered writer is the production implementation,
//! and tests can swap in a collecting stub.

use crate::models::LineageEventRow;

/// Accepts lineage events for (eventually) durable append.
///
/// `record` must not block the caller beyond a bounded enqueue; ordering
/// of events from a single caller is preserved.
pub trait LineageSink: Send + Sync {
    fn record(&self, event: LineageEventRow);
}

/// A sink that collects events in memory. Test helper.
#[derive(Debug, Default)]
pub struct CollectingLineageSink {
    events: std::sync::Mutex<Vec<LineageEventRow>>,
}

impl CollectingLineageSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<LineageEventRow> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl LineageSink for CollectingLineageSink {
    fn record(&self, event: LineageEventRow) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}
