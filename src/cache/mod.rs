//! Plan fingerprint cache.
//!
//! Memoizes compiled plans keyed by the canonical request fingerprint.
//! Entries are scoped to one schema version: publishing a new version
//! invalidates the whole cache rather than individual entries. At most one
//! compilation runs per fingerprint; concurrent duplicates wait for the
//! first result instead of recomputing.

pub mod hash;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::debug;

use crate::plan::compiler::{CompileError, QueryCompiler, QueryRequest};
use crate::plan::fingerprint::request_fingerprint;
use crate::plan::CompiledQueryPlan;
use crate::semantic::graph::SemanticGraph;

type CacheSlot = Arc<Mutex<Option<Arc<CompiledQueryPlan>>>>;

/// Fingerprint-keyed memoization of compiled plans.
#[derive(Debug, Default)]
pub struct PlanCache {
    /// Schema version the current entries belong to.
    version: Mutex<String>,
    entries: DashMap<String, CacheSlot>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a request through the cache.
    ///
    /// Only successful plans are cached; a failed compilation is
    /// re-attempted on the next identical request.
    pub fn get_or_compile(
        &self,
        graph: &SemanticGraph,
        request: &QueryRequest,
    ) -> Result<Arc<CompiledQueryPlan>, CompileError> {
        self.sync_version(graph.version());

        let fingerprint = request_fingerprint(graph.version(), request)
            .map_err(|e| CompileError::Fingerprint(e.to_string()))?;

        let slot: CacheSlot = self
            .entries
            .entry(fingerprint.clone())
            .or_default()
            .clone();

        // The per-slot lock serializes duplicate requests: the first
        // caller compiles while the rest block here and read its result.
        let mut entry = slot.lock().expect("plan cache slot poisoned");
        if let Some(plan) = entry.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(%fingerprint, "plan cache hit");
            return Ok(plan.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let plan = Arc::new(QueryCompiler::new(graph).compile(request)?);
        *entry = Some(plan.clone());
        debug!(%fingerprint, "plan cache filled");
        Ok(plan)
    }

    /// Drop every cached entry when the schema version changes.
    fn sync_version(&self, version: &str) {
        let mut current = self.version.lock().expect("plan cache version poisoned");
        if *current != version {
            debug!(
                old_version = %current,
                new_version = %version,
                entries = self.entries.len(),
                "invalidating plan cache"
            );
            self.entries.clear();
            *current = version.to_string();
        }
    }

    /// Number of cached plans.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache hits since construction.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Cache misses (compilations attempted) since construction.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
