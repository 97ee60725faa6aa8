//! Recipient system of record — authoritative external-identity lookup.
//!
//! Client-supplied recipient payloads may carry stale identity handles, so
//! the lifecycle manager re-fetches them here before scheduling. Recipients
//! the directory cannot resolve are still scheduled; the executor reports a
//! per-task "missing identity" failure at run time.

use std::collections::HashMap;

use dripline_core::Result;

/// Batch lookup of external identity handles, keyed by recipient id.
pub trait RecipientDirectory: Send + Sync {
    /// Returns a map of recipient id → external handle for every id the
    /// system of record can resolve. Absent ids are simply missing from the
    /// map, never an error.
    fn resolve_external_ids(&self, ids: &[String]) -> Result<HashMap<String, String>>;
}

/// Map-backed directory for tests and seeding.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    entries: HashMap<String, String>,
}

impl StaticDirectory {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn insert(&mut self, id: impl Into<String>, external_id: impl Into<String>) {
        self.entries.insert(id.into(), external_id.into());
    }
}

impl RecipientDirectory for StaticDirectory {
    fn resolve_external_ids(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.entries.get(id).map(|ext| (id.clone(), ext.clone())))
            .collect())
    }
}
