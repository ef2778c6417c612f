//! Memoization of aggregation outputs per dataset.
//!
//! Entries are keyed by the dataset fingerprint and the request. Seeing a
//! dataset with a new fingerprint drops every entry of the previous one, so a
//! reloaded dataset never serves stale aggregates.

use crate::analysis::engine;
use crate::analysis::request::AggregationRequest;
use crate::error::EngineResult;
use crate::models::{AggregationOutput, Dataset, DatasetId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

type CacheKey = (DatasetId, AggregationRequest);

/// Hit/miss counters of an [`AggregationCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Thread-safe cache in front of [`engine::execute`].
#[derive(Default)]
pub struct AggregationCache {
    entries: RwLock<HashMap<CacheKey, Arc<AggregationOutput>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AggregationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached output for `request` on `dataset`, computing and
    /// storing it on a miss. Errors are returned without being cached.
    pub fn get_or_compute(
        &self,
        dataset: &Dataset,
        request: &AggregationRequest,
    ) -> EngineResult<Arc<AggregationOutput>> {
        let key = (dataset.id().clone(), request.clone());

        if let Some(output) = self.entries.read().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(output));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let output = Arc::new(engine::execute(dataset, request)?);

        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(id, _), _| id == dataset.id());
        if entries.len() < before {
            debug!(
                "Dropped {} cached aggregate(s) of a previous dataset",
                before - entries.len()
            );
        }
        // Another reader may have filled the slot meanwhile; keep the first.
        let stored = entries.entry(key).or_insert_with(|| Arc::clone(&output));
        Ok(Arc::clone(stored))
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.read().len(),
        }
    }
}
