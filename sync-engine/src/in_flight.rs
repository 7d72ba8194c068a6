//! Tracks backups with an operation in progress.
//!
//! While any backup is in flight the engine refuses to reconcile, so a pass
//! never rewrites a record halfway through its creation or deletion.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct InFlightSet {
    ids: HashSet<String>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a backup. Returns false if it was already tracked.
    pub fn register(&mut self, id: &str) -> bool {
        self.ids.insert(id.to_string())
    }

    /// Stop tracking a backup (called when its operation finishes, either way).
    pub fn complete(&mut self, id: &str) {
        self.ids.remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn is_idle(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.ids.len()
    }
}
