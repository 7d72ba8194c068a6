use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a backup is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackupStatus {
    /// Initialised, nothing requested yet
    Pending,
    /// Being created in the snapshot system
    Running,
    /// Being uploaded to the object store
    Syncing,
    /// Present in both stores
    Synced,
    /// Only present in the snapshot system
    HaOnly,
    /// Only present in the object store
    StorageOnly,
    /// Being deleted
    Deleting,
    /// Being copied from the object store back into the snapshot system
    Downloading,
    /// The last operation on this backup failed
    Failed,
}

/// One tracked backup, as persisted in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub id: String,
    pub name: String,
    pub date: DateTime<Utc>,
    pub status: BackupStatus,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub storage_ref: String,
    /// Size in megabytes
    #[serde(default)]
    pub size: f64,
    #[serde(default = "default_keep")]
    pub keep_in_snapshot: bool,
    #[serde(default = "default_keep")]
    pub keep_in_store: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub error_message: String,
}

fn default_keep() -> bool {
    true
}

impl BackupRecord {
    pub fn new(id: String, name: String, date: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            date,
            status: BackupStatus::Pending,
            slug: String::new(),
            storage_ref: String::new(),
            size: 0.0,
            keep_in_snapshot: true,
            keep_in_store: true,
            pinned: false,
            error_message: String::new(),
        }
    }

    pub fn in_snapshot(&self) -> bool {
        !self.slug.is_empty()
    }

    pub fn in_store(&self) -> bool {
        !self.storage_ref.is_empty()
    }

    pub fn is_failed(&self) -> bool {
        self.status == BackupStatus::Failed
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = BackupStatus::Failed;
        self.error_message = message.into();
    }

    /// Forget a failure once the operation behind it has gone through. The
    /// status is settled again by [`Self::refresh_status`] or the record is
    /// dropped.
    pub fn clear_failure(&mut self) {
        if self.is_failed() {
            self.status = BackupStatus::Pending;
            self.error_message.clear();
        }
    }

    pub fn pin(&mut self) {
        self.pinned = true;
        self.keep_in_snapshot = true;
        self.keep_in_store = true;
    }

    /// Derive the status from which stores currently hold the backup.
    /// Leaves the status alone when the backup is in neither store.
    pub fn refresh_status(&mut self) {
        let status = match (self.in_snapshot(), self.in_store()) {
            (true, true) => BackupStatus::Synced,
            (true, false) => BackupStatus::HaOnly,
            (false, true) => BackupStatus::StorageOnly,
            (false, false) => return,
        };
        if self.is_failed() {
            self.error_message.clear();
        }
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> BackupRecord {
        BackupRecord::new(
            "20240101120000.000000000".to_string(),
            "Full Backup".to_string(),
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_new_record_defaults() {
        let r = record();
        assert_eq!(r.status, BackupStatus::Pending);
        assert!(r.keep_in_snapshot);
        assert!(r.keep_in_store);
        assert!(!r.pinned);
        assert!(!r.in_snapshot());
        assert!(!r.in_store());
    }

    #[test]
    fn test_refresh_status_from_references() {
        let mut r = record();
        r.slug = "abc123".into();
        r.refresh_status();
        assert_eq!(r.status, BackupStatus::HaOnly);

        r.storage_ref = "Full Backup.tar".into();
        r.refresh_status();
        assert_eq!(r.status, BackupStatus::Synced);

        r.slug.clear();
        r.refresh_status();
        assert_eq!(r.status, BackupStatus::StorageOnly);
    }

    #[test]
    fn test_refresh_status_clears_error_when_healthy() {
        let mut r = record();
        r.fail("upload failed");
        r.slug = "abc123".into();
        r.refresh_status();
        assert_eq!(r.status, BackupStatus::HaOnly);
        assert!(r.error_message.is_empty());
    }

    #[test]
    fn test_clear_failure_only_touches_failed_records() {
        let mut r = record();
        r.fail("delete failed");
        r.clear_failure();
        assert_eq!(r.status, BackupStatus::Pending);
        assert!(r.error_message.is_empty());

        r.status = BackupStatus::Synced;
        r.clear_failure();
        assert_eq!(r.status, BackupStatus::Synced);
    }

    #[test]
    fn test_refresh_status_keeps_failed_without_references() {
        let mut r = record();
        r.fail("snapshot system unreachable");
        r.refresh_status();
        assert_eq!(r.status, BackupStatus::Failed);
        assert_eq!(r.error_message, "snapshot system unreachable");
    }

    #[test]
    fn test_json_field_names() {
        let mut r = record();
        r.status = BackupStatus::HaOnly;
        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(value["status"], "HAONLY");
        assert_eq!(value["keepInSnapshot"], true);
        assert_eq!(value["storageRef"], "");
        assert_eq!(value["errorMessage"], "");
    }

    #[test]
    fn test_missing_optional_fields_use_defaults() {
        let json = r#"{"id":"1","name":"n","date":"2024-01-01T00:00:00Z","status":"STORAGEONLY"}"#;
        let r: BackupRecord = serde_json::from_str(json).unwrap();
        assert_eq!(r.status, BackupStatus::StorageOnly);
        assert!(r.keep_in_store);
        assert!(r.slug.is_empty());
    }
}
