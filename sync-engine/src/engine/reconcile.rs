use super::{sort_newest_first, Engine};
use crate::models::{BackupRecord, BackupStatus, ObjectInfo, SnapshotInfo, SnapshotKind};
use crate::naming::{self, ARCHIVE_SUFFIX};
use crate::retention;
use crate::settings::EngineSettings;
use crate::Result;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// What a call to [`Engine::reconcile`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// A backup operation was in flight, nothing was touched
    Skipped,
    Completed,
}

impl Engine {
    /// Converge the ledger with the snapshot system and the object store.
    ///
    /// Works on a copy of the ledger so the state lock is only held at the
    /// start and at the commit. Listing failures abort the pass without
    /// changing anything; failures on individual backups are recorded on
    /// them and the pass carries on.
    pub async fn reconcile(&self) -> Result<PassOutcome> {
        let _pass = self.pass_lock.lock().await;

        let (mut records, settings) = {
            let st = self.state.lock().await;
            if !st.in_flight.is_idle() {
                tracing::info!(
                    running = st.in_flight.running_count(),
                    "Skipping synchronization due to ongoing backup operations"
                );
                return Ok(PassOutcome::Skipped);
            }
            (st.records.clone(), st.settings.clone())
        };
        let known: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();

        retention::enforce(&mut records, settings.limits);

        // Every reference is re-established from the listings below
        for record in records.iter_mut() {
            record.slug.clear();
            record.storage_ref.clear();
            if !record.is_failed() {
                record.error_message.clear();
            }
        }

        // Retention deletes that failed, by record id
        let mut failures = HashMap::new();

        let snapshots = self.snapshots.list().await?;
        self.merge_snapshots(&mut records, snapshots, &mut failures)
            .await;

        let objects = self.store.list().await?;
        self.merge_objects(&mut records, objects, &mut failures)
            .await;

        records.retain(|r| {
            let keep = r.is_failed() || r.in_snapshot() || r.in_store();
            if !keep {
                tracing::info!(name = %r.name, "Backup no longer present anywhere, removing from ledger");
            }
            keep
        });
        for record in records.iter_mut() {
            record.refresh_status();
            if let Some(message) = failures.remove(&record.id) {
                record.fail(message);
            }
        }

        // Newly discovered backups take part in retention from this pass on
        retention::enforce(&mut records, settings.limits);

        self.upload_missing(&mut records, &settings).await;

        self.commit(records, &known).await?;
        Ok(PassOutcome::Completed)
    }

    async fn merge_snapshots(
        &self,
        records: &mut Vec<BackupRecord>,
        snapshots: Vec<SnapshotInfo>,
        failures: &mut HashMap<String, String>,
    ) {
        let mut by_name = index_by_name(records);
        let mut up_to_date = true;

        for snapshot in snapshots {
            if snapshot.kind == SnapshotKind::Partial {
                continue;
            }

            let Some(&i) = by_name.get(&snapshot.name) else {
                tracing::info!(name = %snapshot.name, "Found untracked backup in snapshot system");
                let mut record = BackupRecord::new(
                    self.ids.next(self.clock.now()),
                    snapshot.name.clone(),
                    snapshot.date,
                );
                attach_snapshot(&mut record, &snapshot);
                by_name.insert(snapshot.name.clone(), records.len());
                records.push(record);
                up_to_date = false;
                continue;
            };

            let record = &mut records[i];
            if record.keep_in_snapshot || record.pinned {
                attach_snapshot(record, &snapshot);
                continue;
            }

            up_to_date = false;
            match self.snapshots.delete(&snapshot.slug).await {
                Ok(()) => {
                    tracing::info!(name = %record.name, "Deleted backup from snapshot system");
                    record.clear_failure();
                }
                Err(e) if e.is_not_found() => record.clear_failure(),
                Err(e) => {
                    tracing::error!(name = %record.name, error = %e, "Failed to delete backup from snapshot system");
                    attach_snapshot(record, &snapshot);
                    failures.insert(
                        record.id.clone(),
                        format!("failed to delete from snapshot system: {e}"),
                    );
                }
            }
        }

        if up_to_date {
            tracing::debug!("Snapshot system backups up to date, no action taken");
        }
    }

    async fn merge_objects(
        &self,
        records: &mut Vec<BackupRecord>,
        objects: Vec<ObjectInfo>,
        failures: &mut HashMap<String, String>,
    ) {
        let mut by_name = index_by_name(records);
        let mut up_to_date = true;

        for object in objects {
            let name = naming::name_from_key(&object.key).to_string();

            let Some(&i) = by_name.get(&name) else {
                tracing::info!(name = %name, "Found untracked backup in object store");
                let mut record =
                    BackupRecord::new(self.ids.next(self.clock.now()), name.clone(), object.modified);
                attach_object(&mut record, &object);
                by_name.insert(name, records.len());
                records.push(record);
                up_to_date = false;
                continue;
            };

            let record = &mut records[i];
            if record.keep_in_store || record.pinned {
                attach_object(record, &object);
                continue;
            }

            up_to_date = false;
            match self.store.delete(&object.key).await {
                Ok(()) => {
                    tracing::info!(name = %record.name, "Deleted backup from object store");
                    record.clear_failure();
                }
                Err(e) if e.is_not_found() => record.clear_failure(),
                Err(e) => {
                    tracing::error!(name = %record.name, error = %e, "Failed to delete backup from object store");
                    attach_object(record, &object);
                    failures.insert(
                        record.id.clone(),
                        format!("failed to delete from object store: {e}"),
                    );
                }
            }
        }

        if up_to_date {
            tracing::debug!("Object store backups up to date, no action taken");
        }
    }

    /// Upload snapshot-only backups until the store holds its limit, oldest
    /// first. With no limit every snapshot-only backup is uploaded.
    async fn upload_missing(&self, records: &mut [BackupRecord], settings: &EngineSettings) {
        let limit = settings.limits.in_store;
        let present = records.iter().filter(|r| r.in_store()).count();
        if limit != 0 && present >= limit {
            return;
        }

        let mut candidates: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status == BackupStatus::HaOnly && r.keep_in_store)
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return;
        }
        candidates.sort_by(|&a, &b| {
            records[a]
                .date
                .cmp(&records[b].date)
                .then_with(|| records[a].id.cmp(&records[b].id))
        });

        let count = if limit == 0 {
            candidates.len()
        } else {
            (limit - present).min(candidates.len())
        };
        tracing::debug!(count, "Syncing backups to object store");

        for i in candidates.into_iter().take(count) {
            self.upload_record(&mut records[i], &settings.archive_dir)
                .await;
        }
    }

    async fn upload_record(&self, record: &mut BackupRecord, archive_dir: &Path) {
        let key = naming::object_key(&record.name);

        // The listing can lag behind a recent upload
        if let Ok(existing) = self.store.stat(&key).await {
            record.storage_ref = existing.key;
            record.refresh_status();
            return;
        }

        tracing::info!(name = %record.name, "Syncing backup to object store");
        record.status = BackupStatus::Syncing;
        let archive = archive_dir.join(format!("{}{ARCHIVE_SUFFIX}", record.slug));

        match self.store.upload(&key, &archive).await {
            Ok(stored) => {
                record.storage_ref = stored;
                record.status = BackupStatus::Synced;
            }
            Err(e) => {
                tracing::error!(name = %record.name, error = %e, "Error syncing backup to object store");
                record.fail(format!("upload failed: {e}"));
            }
        }
    }

    /// Replace the live ledger with the result of a pass and persist it.
    ///
    /// Records created while the pass ran, or busy with an operation now, win
    /// over their reconciled copies; records deleted meanwhile stay deleted;
    /// pins set meanwhile are carried over.
    async fn commit(&self, reconciled: Vec<BackupRecord>, known: &HashSet<String>) -> Result<()> {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;

        let untouched: Vec<BackupRecord> = st
            .records
            .iter()
            .filter(|r| !known.contains(&r.id) || st.in_flight.contains(&r.id))
            .cloned()
            .collect();
        let live_pins: HashMap<&str, bool> = st
            .records
            .iter()
            .map(|r| (r.id.as_str(), r.pinned))
            .collect();

        let mut merged = Vec::with_capacity(reconciled.len() + untouched.len());
        for mut record in reconciled {
            if known.contains(&record.id) {
                match live_pins.get(record.id.as_str()) {
                    None => continue,
                    Some(_) if st.in_flight.contains(&record.id) => continue,
                    Some(&true) => record.pin(),
                    Some(&false) => record.pinned = false,
                }
            } else if untouched.iter().any(|u| u.name == record.name) {
                continue;
            }
            merged.push(record);
        }
        merged.extend(untouched);
        sort_newest_first(&mut merged);

        st.records = merged;
        if let Err(e) = self.ledger.save(&st.records).await {
            tracing::error!(error = %e, "Error saving backup state after synchronization");
            return Err(e.into());
        }
        Ok(())
    }
}

fn index_by_name(records: &[BackupRecord]) -> HashMap<String, usize> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.name.clone(), i))
        .collect()
}

fn attach_snapshot(record: &mut BackupRecord, snapshot: &SnapshotInfo) {
    record.slug = snapshot.slug.clone();
    record.date = snapshot.date;
    record.size = snapshot.size;
}

/// The snapshot system's metadata wins when both stores hold the backup.
fn attach_object(record: &mut BackupRecord, object: &ObjectInfo) {
    record.storage_ref = object.key.clone();
    if !record.in_snapshot() {
        record.date = object.modified;
        record.size = object.size;
    }
}
