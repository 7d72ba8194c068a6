//! Retention limits for the snapshot system and the object store.

use crate::models::BackupRecord;
use std::collections::HashSet;

/// How many unpinned backups to keep in each store. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionLimits {
    pub in_snapshot: usize,
    pub in_store: usize,
}

/// Ids of the backups that should no longer be kept in each store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionPlan {
    pub drop_from_snapshot: HashSet<String>,
    pub drop_from_store: HashSet<String>,
}

impl RetentionPlan {
    /// Compute the plan for `records`.
    ///
    /// Pinned and failed backups never take part. The snapshot group is every
    /// candidate currently present in the snapshot system; the store group is
    /// every candidate present in either store, since anything held only by
    /// the snapshot system is due for upload. In each group the oldest
    /// entries above the limit are dropped.
    pub fn compute(records: &[BackupRecord], limits: RetentionLimits) -> Self {
        let candidates: Vec<&BackupRecord> = records
            .iter()
            .filter(|r| !r.pinned && !r.is_failed())
            .collect();

        let in_snapshot: Vec<&BackupRecord> = candidates
            .iter()
            .copied()
            .filter(|r| r.in_snapshot())
            .collect();
        let in_store: Vec<&BackupRecord> = candidates
            .iter()
            .copied()
            .filter(|r| r.in_snapshot() || r.in_store())
            .collect();

        Self {
            drop_from_snapshot: excess(in_snapshot, limits.in_snapshot),
            drop_from_store: excess(in_store, limits.in_store),
        }
    }

    /// Set the keep flags of every record from this plan.
    ///
    /// Failed records are left as they are; everything else is kept unless the
    /// plan drops it, and pinned records are always kept.
    pub fn apply(&self, records: &mut [BackupRecord]) {
        for record in records.iter_mut() {
            if record.pinned {
                record.keep_in_snapshot = true;
                record.keep_in_store = true;
                continue;
            }
            if record.is_failed() {
                continue;
            }

            let keep_snapshot = !self.drop_from_snapshot.contains(&record.id);
            let keep_store = !self.drop_from_store.contains(&record.id);

            if record.keep_in_snapshot != keep_snapshot {
                tracing::debug!(name = %record.name, keep = keep_snapshot, "Snapshot retention changed");
            }
            if record.keep_in_store != keep_store {
                tracing::debug!(name = %record.name, keep = keep_store, "Store retention changed");
            }

            record.keep_in_snapshot = keep_snapshot;
            record.keep_in_store = keep_store;
        }
    }
}

/// Compute and apply the plan in one step.
pub fn enforce(records: &mut [BackupRecord], limits: RetentionLimits) {
    RetentionPlan::compute(records, limits).apply(records);
}

fn excess(mut group: Vec<&BackupRecord>, limit: usize) -> HashSet<String> {
    if limit == 0 || group.len() <= limit {
        return HashSet::new();
    }

    group.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
    let count = group.len() - limit;
    group
        .into_iter()
        .take(count)
        .map(|r| r.id.clone())
        .collect()
}
