//! Cache invalidation driven by record mutations.
//!
//! The record-storage layer calls into this synchronously at write time.
//! Invalidation never fails the write: errors are logged and swallowed, and
//! a stale entry heals on its next expiry or recomputation.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheKey, CacheStore};

/// A change reported by the record-storage layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordEvent {
    Mutated { record_type: String, record_id: String },
    Deleted { record_type: String, record_id: String },
}

/// What an invalidation managed to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InvalidationReport {
    /// Entries that existed and were removed.
    pub purged: u32,
    /// Deletes that could not reach the store.
    pub failures: u32,
}

impl InvalidationReport {
    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }
}

/// Purges the record-level and aggregate entries of a changed record.
#[derive(Clone)]
pub struct Invalidator {
    store: Arc<dyn CacheStore>,
}

impl std::fmt::Debug for Invalidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invalidator").finish_non_exhaustive()
    }
}

impl Invalidator {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub async fn on_mutation(&self, record_type: &str, record_id: &str) -> InvalidationReport {
        self.invalidate("mutation", record_type, record_id).await
    }

    pub async fn on_deletion(&self, record_type: &str, record_id: &str) -> InvalidationReport {
        self.invalidate("deletion", record_type, record_id).await
    }

    pub async fn handle(&self, event: &RecordEvent) -> InvalidationReport {
        match event {
            RecordEvent::Mutated { record_type, record_id } => self.on_mutation(record_type, record_id).await,
            RecordEvent::Deleted { record_type, record_id } => self.on_deletion(record_type, record_id).await,
        }
    }

    async fn invalidate(&self, cause: &'static str, record_type: &str, record_id: &str) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        let record_key = CacheKey::record(record_type, record_id);
        let aggregate_key = record_key.to_aggregate();

        // Two separate deletes: a failure on one still attempts the other.
        for key in [&record_key, &aggregate_key] {
            match self.store.delete(key).await {
                Ok(true) => report.purged += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failures += 1;
                    tracing::warn!(key = %key, cause, error = %e, "cache invalidation failed; entry may be stale");
                }
            }
        }

        tracing::debug!(
            record_type,
            record_id,
            cause,
            purged = report.purged,
            failures = report.failures,
            "invalidated context"
        );
        report
    }
}
