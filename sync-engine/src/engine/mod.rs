//! The reconciliation engine.
//!
//! Owns the in-memory ledger and every operation that changes it. All shared
//! state sits behind one mutex that is never held across a call to the
//! snapshot system or the object store.

mod reconcile;

pub use reconcile::PassOutcome;

use crate::clients::{ObjectStore, SnapshotClient};
use crate::clock::Clock;
use crate::error::EngineError;
use crate::in_flight::InFlightSet;
use crate::ledger::Ledger;
use crate::models::{BackupRecord, BackupStatus};
use crate::naming::{self, IdGenerator, ARCHIVE_SUFFIX};
use crate::scheduler::next_backup_delay;
use crate::settings::EngineSettings;
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

struct EngineState {
    records: Vec<BackupRecord>,
    in_flight: InFlightSet,
    settings: EngineSettings,
    next_backup_at: Option<DateTime<Utc>>,
}

pub struct Engine {
    snapshots: Arc<dyn SnapshotClient>,
    store: Arc<dyn ObjectStore>,
    ledger: Ledger,
    clock: Arc<dyn Clock>,
    ids: IdGenerator,
    state: Mutex<EngineState>,
    /// Serializes reconciliation passes
    pass_lock: Mutex<()>,
    timer_reset: Notify,
}

impl Engine {
    /// Build an engine on top of the records currently in `ledger`.
    pub async fn new(
        snapshots: Arc<dyn SnapshotClient>,
        store: Arc<dyn ObjectStore>,
        ledger: Ledger,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Result<Self> {
        let records = ledger.load().await?;
        tracing::info!(count = records.len(), path = %ledger.path().display(), "Ledger loaded");

        Ok(Self {
            snapshots,
            store,
            ledger,
            clock,
            ids: IdGenerator::new(),
            state: Mutex::new(EngineState {
                records,
                in_flight: InFlightSet::new(),
                settings,
                next_backup_at: None,
            }),
            pass_lock: Mutex::new(()),
            timer_reset: Notify::new(),
        })
    }

    /// Create a backup in the snapshot system and upload it to the object store.
    ///
    /// Without a name the configured template is used. Returns the record as
    /// it stands when the operation ends; on failure the record stays in the
    /// ledger as `FAILED`.
    pub async fn perform_backup(&self, name: Option<&str>) -> Result<BackupRecord> {
        let (id, name) = self.begin_backup(name).await?;
        tracing::info!(id = %id, name = %name, "Backup started");

        let result = self.create_and_upload(&id, &name).await;

        let (record, saved) = {
            let mut st = self.state.lock().await;
            st.in_flight.complete(&id);
            if let Err(e) = &result {
                if let Some(record) = find_mut(&mut st.records, &id) {
                    record.fail(e.to_string());
                }
            }
            let record = st.records.iter().find(|r| r.id == id).cloned();
            (record, self.ledger.save(&st.records).await)
        };

        self.reset_backup_timer().await;

        if let Err(e) = result {
            tracing::error!(name = %name, error = %e, "Backup failed");
            return Err(e);
        }
        if let Err(e) = saved {
            tracing::error!(name = %name, error = %e, "Error saving backup state after backup");
            return Err(e.into());
        }
        tracing::info!(name = %name, "Backup process completed successfully");

        // Bring the rest of the ledger up to date
        if let Err(e) = self.reconcile().await {
            tracing::error!(error = %e, "Error syncing backups after backup");
        }

        record.ok_or(EngineError::NotFound(id))
    }

    async fn begin_backup(&self, requested: Option<&str>) -> Result<(String, String)> {
        let mut st = self.state.lock().await;
        let now = self.clock.now();
        let name = naming::backup_name(
            requested,
            &st.settings.name_format,
            now,
            st.settings.timezone,
        );
        if st.records.iter().any(|r| r.name == name) {
            return Err(EngineError::NameTaken(name));
        }

        let id = self.ids.next(now);
        st.in_flight.register(&id);
        st.records
            .insert(0, BackupRecord::new(id.clone(), name.clone(), now));
        Ok((id, name))
    }

    async fn create_and_upload(&self, id: &str, name: &str) -> Result<()> {
        self.update_record(id, |r| r.status = BackupStatus::Running)
            .await;

        tracing::info!(name = %name, "Requesting backup from snapshot system");
        let slug = self.snapshots.create_full(name).await?;

        let archive = {
            let mut st = self.state.lock().await;
            if let Some(record) = find_mut(&mut st.records, id) {
                record.slug = slug.clone();
                record.status = BackupStatus::Syncing;
            }
            // The final save after the upload reports persistence failures
            if let Err(e) = self.ledger.save(&st.records).await {
                tracing::warn!(name = %name, error = %e, "Error saving backup state before upload");
            }
            st.settings
                .archive_dir
                .join(format!("{slug}{ARCHIVE_SUFFIX}"))
        };

        let info = self.snapshots.get(&slug).await?;
        self.update_record(id, |r| {
            r.date = info.date;
            r.size = info.size;
        })
        .await;

        tracing::info!(name = %name, "Uploading backup to object store");
        let key = self
            .store
            .upload(&naming::object_key(name), &archive)
            .await?;

        self.update_record(id, |r| {
            r.storage_ref = key;
            r.status = BackupStatus::Synced;
            r.error_message.clear();
        })
        .await;
        Ok(())
    }

    /// Delete a backup from both stores and drop it from the ledger.
    ///
    /// A store that no longer has the backup is not an error.
    pub async fn delete_backup(&self, id: &str) -> Result<()> {
        let (slug, key, name) = {
            let mut st = self.state.lock().await;
            ensure_idle(&st, id)?;
            let record = find_mut(&mut st.records, id)
                .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
            record.status = BackupStatus::Deleting;
            let target = (
                record.slug.clone(),
                record.storage_ref.clone(),
                record.name.clone(),
            );
            st.in_flight.register(id);
            target
        };
        tracing::info!(id = %id, name = %name, "Initiating backup deletion");

        let result = self.delete_everywhere(&slug, &key, &name).await;

        let saved = {
            let mut st = self.state.lock().await;
            st.in_flight.complete(id);
            match &result {
                Ok(()) => st.records.retain(|r| r.id != id),
                Err(e) => {
                    if let Some(record) = find_mut(&mut st.records, id) {
                        record.fail(e.to_string());
                    }
                }
            }
            self.ledger.save(&st.records).await
        };

        self.reset_backup_timer().await;
        result?;
        saved?;
        tracing::info!(name = %name, "Backup deleted");

        if let Err(e) = self.reconcile().await {
            tracing::error!(error = %e, "Error syncing backups after deletion");
        }
        Ok(())
    }

    async fn delete_everywhere(&self, slug: &str, key: &str, name: &str) -> Result<()> {
        if !slug.is_empty() {
            match self.snapshots.delete(slug).await {
                Ok(()) => tracing::info!(name = %name, "Backup deleted from snapshot system"),
                Err(e) if e.is_not_found() => {
                    tracing::debug!(name = %name, "Backup already gone from snapshot system")
                }
                Err(e) => {
                    tracing::error!(name = %name, error = %e, "Failed to delete backup in snapshot system");
                    return Err(e.into());
                }
            }
        }

        if !key.is_empty() {
            match self.store.delete(key).await {
                Ok(()) => tracing::info!(name = %name, "Backup deleted from object store"),
                Err(e) if e.is_not_found() => {
                    tracing::debug!(name = %name, "Backup already gone from object store")
                }
                Err(e) => {
                    tracing::error!(name = %name, error = %e, "Failed to delete backup from object store");
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }

    /// Ask the snapshot system to restore a backup it holds.
    pub async fn restore_backup(&self, id: &str) -> Result<()> {
        let (slug, name) = {
            let st = self.state.lock().await;
            let record = find(&st.records, id)?;
            (record.slug.clone(), record.name.clone())
        };
        if slug.is_empty() {
            return Err(EngineError::Unavailable(format!(
                "\"{name}\" is not present in the snapshot system"
            )));
        }

        tracing::info!(name = %name, "Attempting to restore backup");
        self.snapshots.restore(&slug).await?;
        tracing::info!(name = %name, "Restored backup");
        Ok(())
    }

    /// Copy a backup from the object store back into the snapshot system.
    pub async fn download_backup(&self, id: &str) -> Result<()> {
        let (key, name) = {
            let mut st = self.state.lock().await;
            ensure_idle(&st, id)?;
            let record = find_mut(&mut st.records, id)
                .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
            if record.storage_ref.is_empty() {
                return Err(EngineError::Unavailable(format!(
                    "\"{}\" is not present in the object store",
                    record.name
                )));
            }
            record.status = BackupStatus::Downloading;
            let target = (record.storage_ref.clone(), record.name.clone());
            st.in_flight.register(id);
            target
        };
        tracing::info!(name = %name, "Downloading backup to snapshot system");

        let result: Result<()> = async {
            let data = self.store.download(&key).await?;
            self.snapshots.upload(data).await?;
            Ok(())
        }
        .await;

        let saved = {
            let mut st = self.state.lock().await;
            st.in_flight.complete(id);
            if let Some(record) = find_mut(&mut st.records, id) {
                record.status = BackupStatus::StorageOnly;
                match &result {
                    Ok(()) => {
                        record.keep_in_snapshot = true;
                        record.error_message.clear();
                    }
                    Err(e) => record.error_message = e.to_string(),
                }
            }
            self.ledger.save(&st.records).await
        };

        if let Err(e) = result {
            tracing::error!(name = %name, error = %e, "Failed to download backup");
            return Err(e);
        }
        saved?;
        tracing::info!(name = %name, "Backup downloaded");

        if let Err(e) = self.reconcile().await {
            tracing::error!(error = %e, "Error syncing backups after download");
        }
        Ok(())
    }

    /// Exempt a backup from retention.
    pub async fn pin_backup(&self, id: &str) -> Result<()> {
        let mut st = self.state.lock().await;
        let record =
            find_mut(&mut st.records, id).ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        record.pin();
        tracing::info!(name = %record.name, "Backup pinned");
        self.ledger.save(&st.records).await?;
        Ok(())
    }

    pub async fn unpin_backup(&self, id: &str) -> Result<()> {
        let mut st = self.state.lock().await;
        let record =
            find_mut(&mut st.records, id).ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        record.pinned = false;
        tracing::info!(name = %record.name, "Backup unpinned");
        self.ledger.save(&st.records).await?;
        Ok(())
    }

    /// The ledger, newest first.
    pub async fn list_backups(&self) -> Vec<BackupRecord> {
        self.state.lock().await.records.clone()
    }

    /// Whether a backup requested under `name` would collide with a tracked one.
    pub async fn name_exists(&self, name: &str) -> bool {
        let st = self.state.lock().await;
        let resolved = naming::backup_name(
            Some(name),
            &st.settings.name_format,
            self.clock.now(),
            st.settings.timezone,
        );
        st.records.iter().any(|r| r.name == resolved)
    }

    /// Time left until the scheduled backup fires, zero if it is due.
    pub async fn time_until_next_backup(&self) -> Duration {
        let st = self.state.lock().await;
        st.next_backup_at
            .and_then(|at| (at - self.clock.now()).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    /// Forget every tracked backup and rebuild the ledger from the stores.
    pub async fn reset_all(&self) -> Result<PassOutcome> {
        {
            let mut st = self.state.lock().await;
            if !st.in_flight.is_idle() {
                return Err(EngineError::Unavailable(
                    "a backup operation is in progress".to_string(),
                ));
            }
            st.records.clear();
            self.ledger.save(&st.records).await?;
        }
        tracing::info!("Ledger reset");
        self.reconcile().await
    }

    pub async fn settings(&self) -> EngineSettings {
        self.state.lock().await.settings.clone()
    }

    /// Swap in new settings and react to what changed.
    pub async fn apply_settings(&self, settings: EngineSettings) {
        let previous = {
            let mut st = self.state.lock().await;
            std::mem::replace(&mut st.settings, settings.clone())
        };

        if previous.name_format != settings.name_format {
            tracing::info!(name_format = %settings.name_format, "Backup name format updated");
        }
        if previous.backup_interval != settings.backup_interval {
            tracing::info!(interval = %settings.backup_interval, "Backup interval updated");
            self.reset_backup_timer().await;
        }
        if previous.limits != settings.limits {
            tracing::info!(
                in_snapshot = settings.limits.in_snapshot,
                in_store = settings.limits.in_store,
                "Retention limits updated"
            );
            if let Err(e) = self.reconcile().await {
                tracing::error!(error = %e, "Error syncing backups after settings change");
            }
        }
    }

    /// Recompute when the next scheduled backup is due and wake the scheduler.
    pub async fn reset_backup_timer(&self) {
        let delay = {
            let mut st = self.state.lock().await;
            let now = self.clock.now();
            let latest = st.records.iter().map(|r| r.date).max();
            let delay = next_backup_delay(latest, now, st.settings.backup_interval);
            let until = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            st.next_backup_at = Some(now + until);
            delay
        };
        self.timer_reset.notify_one();
        tracing::info!(time_left = ?delay, "Next backup scheduled");
    }

    pub(crate) fn timer_reset(&self) -> &Notify {
        &self.timer_reset
    }

    pub async fn in_flight_count(&self) -> usize {
        self.state.lock().await.in_flight.running_count()
    }

    async fn update_record(&self, id: &str, f: impl FnOnce(&mut BackupRecord)) {
        let mut st = self.state.lock().await;
        if let Some(record) = find_mut(&mut st.records, id) {
            f(record);
        }
    }
}

/// Refuse a second operation on a backup that already has one running.
fn ensure_idle(st: &EngineState, id: &str) -> Result<()> {
    if st.in_flight.contains(id) {
        return Err(EngineError::Unavailable(format!(
            "backup {id} has an operation in progress"
        )));
    }
    Ok(())
}

fn find<'a>(records: &'a [BackupRecord], id: &str) -> Result<&'a BackupRecord> {
    records
        .iter()
        .find(|r| r.id == id)
        .ok_or_else(|| EngineError::NotFound(id.to_string()))
}

fn find_mut<'a>(records: &'a mut [BackupRecord], id: &str) -> Option<&'a mut BackupRecord> {
    records.iter_mut().find(|r| r.id == id)
}

fn sort_newest_first(records: &mut [BackupRecord]) {
    records.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.id.cmp(&a.id)));
}
