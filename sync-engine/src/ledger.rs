//! The local ledger: the engine's own record of which backups exist,
//! persisted as a single JSON array.

use crate::error::LedgerError;
use crate::models::BackupRecord;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all records. A missing or empty file is an empty ledger.
    pub async fn load(&self) -> Result<Vec<BackupRecord>, LedgerError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No ledger found, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let records: Vec<BackupRecord> = serde_json::from_slice(&data)?;
        tracing::debug!(count = records.len(), "Ledger loaded");
        Ok(records)
    }

    /// Replace the ledger with `records`.
    ///
    /// The document is written next to the ledger and renamed over it, so a
    /// crash mid-write leaves the previous ledger intact.
    pub async fn save(&self, records: &[BackupRecord]) -> Result<(), LedgerError> {
        let data = serde_json::to_vec(records)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackupStatus;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn record(id: &str) -> BackupRecord {
        let mut r = BackupRecord::new(
            id.to_string(),
            format!("backup {id}"),
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        );
        r.status = BackupStatus::Synced;
        r.slug = "a1b2c3".into();
        r.storage_ref = format!("backup {id}.tar");
        r
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new(dir.path().join("backups.json"));
        assert!(ledger.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_empty_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backups.json");
        std::fs::write(&path, "").unwrap();
        assert!(Ledger::new(path).load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new(dir.path().join("backups.json"));
        let records = vec![record("2"), record("1")];

        ledger.save(&records).await.unwrap();
        assert_eq!(ledger.load().await.unwrap(), records);
        assert!(!dir.path().join("backups.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new(dir.path().join("backups.json"));

        ledger.save(&[record("1"), record("2")]).await.unwrap();
        ledger.save(&[record("3")]).await.unwrap();

        let loaded = ledger.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "3");
    }

    #[tokio::test]
    async fn test_load_corrupt_file_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backups.json");
        std::fs::write(&path, "[{not json").unwrap();
        let err = Ledger::new(path).load().await.unwrap_err();
        assert!(matches!(err, LedgerError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_save_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new(dir.path().join("nested").join("backups.json"));
        ledger.save(&[record("1")]).await.unwrap();
        assert_eq!(ledger.load().await.unwrap().len(), 1);
    }
}
