//! Options that can be changed while the service runs.
//!
//! The current options live in `options.json` in the data directory. Every
//! accepted update is persisted there and published to the engine.

use crate::config::{AppConfig, OptionOverrides};
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use snapshot_sync_engine::settings::DEFAULT_NAME_FORMAT;
use snapshot_sync_engine::{EngineSettings, RetentionLimits};
use std::path::PathBuf;
use tokio::sync::{watch, Mutex};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    pub backup_name_format: String,
    /// Days between scheduled backups
    pub backup_interval: u32,
    /// Backups kept in the snapshot system, 0 for all
    #[serde(rename = "backupsInHA")]
    pub backups_in_ha: usize,
    /// Backups kept in the object store, 0 for all
    pub backups_in_storage: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            backup_name_format: DEFAULT_NAME_FORMAT.to_string(),
            backup_interval: 3,
            backups_in_ha: 0,
            backups_in_storage: 0,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.backup_name_format.trim().is_empty() {
            return Err(AppError::BadRequest("backupNameFormat must not be empty".into()));
        }
        if self.backup_interval == 0 {
            return Err(AppError::BadRequest("backupInterval must be at least 1 day".into()));
        }
        Ok(())
    }

    fn with_overrides(mut self, overrides: &OptionOverrides) -> Self {
        if let Some(format) = &overrides.backup_name_format {
            self.backup_name_format = format.clone();
        }
        if let Some(days) = overrides.backup_interval {
            self.backup_interval = days;
        }
        if let Some(n) = overrides.backups_in_ha {
            self.backups_in_ha = n;
        }
        if let Some(n) = overrides.backups_in_storage {
            self.backups_in_storage = n;
        }
        self
    }
}

pub struct OptionsService {
    path: PathBuf,
    current: Mutex<Options>,
    /// Settings that do not change at runtime
    base: EngineSettings,
    tx: watch::Sender<EngineSettings>,
}

impl OptionsService {
    /// Load the persisted options, apply environment overrides and keep the
    /// result as the current options.
    pub async fn load(config: &AppConfig) -> anyhow::Result<Self> {
        let path = config.options_path();
        let stored = match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice::<Options>(&data).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable options file, using defaults");
                Options::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Options::default(),
            Err(e) => return Err(e.into()),
        };

        let options = stored.with_overrides(&config.overrides);
        if let Err(e) = options.validate() {
            anyhow::bail!("Invalid options: {e}");
        }

        let base = EngineSettings {
            archive_dir: config.archive_dir.clone(),
            timezone: config.timezone,
            ..EngineSettings::default()
        };
        let (tx, _) = watch::channel(to_settings(&base, &options));

        let service = Self {
            path,
            current: Mutex::new(options.clone()),
            base,
            tx,
        };
        service.persist(&options).await?;
        Ok(service)
    }

    pub async fn get(&self) -> Options {
        self.current.lock().await.clone()
    }

    /// Engine settings for the current options.
    pub fn settings(&self) -> EngineSettings {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineSettings> {
        self.tx.subscribe()
    }

    /// Validate, persist and publish new options.
    pub async fn update(&self, options: Options) -> Result<Options, AppError> {
        options.validate()?;

        let mut current = self.current.lock().await;
        self.persist(&options).await?;
        *current = options.clone();
        self.tx.send_replace(to_settings(&self.base, &options));

        tracing::info!(
            interval_days = options.backup_interval,
            in_ha = options.backups_in_ha,
            in_storage = options.backups_in_storage,
            "Options updated"
        );
        Ok(options)
    }

    async fn persist(&self, options: &Options) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(options)?;
        tokio::fs::write(&self.path, data).await?;
        Ok(())
    }
}

fn to_settings(base: &EngineSettings, options: &Options) -> EngineSettings {
    EngineSettings {
        name_format: options.backup_name_format.clone(),
        backup_interval: chrono::Duration::days(i64::from(options.backup_interval)),
        limits: RetentionLimits {
            in_snapshot: options.backups_in_ha,
            in_store: options.backups_in_storage,
        },
        ..base.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir, overrides: OptionOverrides) -> AppConfig {
        let mut config = AppConfig::from_lookup(|key| match key {
            "STORAGE_BACKEND" => Some("local".into()),
            _ => None,
        })
        .unwrap();
        config.data_dir = dir.path().to_path_buf();
        config.overrides = overrides;
        config
    }

    #[tokio::test]
    async fn test_defaults_are_persisted() {
        let dir = TempDir::new().unwrap();
        let service = OptionsService::load(&config(&dir, OptionOverrides::default()))
            .await
            .unwrap();

        assert_eq!(service.get().await, Options::default());
        let saved: Options =
            serde_json::from_slice(&std::fs::read(dir.path().join("options.json")).unwrap())
                .unwrap();
        assert_eq!(saved, Options::default());
        assert_eq!(service.settings().backup_interval, chrono::Duration::days(3));
    }

    #[tokio::test]
    async fn test_environment_overrides_stored_options() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("options.json"),
            r#"{"backupNameFormat":"Stored","backupInterval":5,"backupsInHA":4,"backupsInStorage":9}"#,
        )
        .unwrap();

        let overrides = OptionOverrides {
            backups_in_ha: Some(1),
            ..Default::default()
        };
        let service = OptionsService::load(&config(&dir, overrides)).await.unwrap();
        let options = service.get().await;
        assert_eq!(options.backup_name_format, "Stored");
        assert_eq!(options.backup_interval, 5);
        assert_eq!(options.backups_in_ha, 1);
        assert_eq!(options.backups_in_storage, 9);
    }

    #[tokio::test]
    async fn test_update_publishes_settings() {
        let dir = TempDir::new().unwrap();
        let service = OptionsService::load(&config(&dir, OptionOverrides::default()))
            .await
            .unwrap();
        let mut rx = service.subscribe();

        let updated = Options {
            backup_interval: 1,
            backups_in_storage: 6,
            ..Options::default()
        };
        service.update(updated.clone()).await.unwrap();

        rx.changed().await.unwrap();
        let settings = rx.borrow_and_update().clone();
        assert_eq!(settings.backup_interval, chrono::Duration::days(1));
        assert_eq!(settings.limits.in_store, 6);
        assert_eq!(service.get().await, updated);
    }

    #[tokio::test]
    async fn test_invalid_update_is_rejected() {
        let dir = TempDir::new().unwrap();
        let service = OptionsService::load(&config(&dir, OptionOverrides::default()))
            .await
            .unwrap();

        let err = service
            .update(Options {
                backup_interval: 0,
                ..Options::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(service.get().await, Options::default());
    }

    #[test]
    fn test_json_field_names() {
        let value = serde_json::to_value(Options::default()).unwrap();
        assert_eq!(value["backupsInHA"], 0);
        assert_eq!(value["backupsInStorage"], 0);
        assert_eq!(value["backupInterval"], 3);
    }
}
