use chrono::FixedOffset;
use chrono_tz::Tz;
use snapshot_sync_engine::Timezone;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum StorageConfig {
    S3 {
        bucket: String,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: String,
    },
    Local {
        root: PathBuf,
    },
}

/// Runtime-tunable options given through the environment. Each one that is
/// set wins over the persisted `options.json`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionOverrides {
    pub backup_name_format: Option<String>,
    pub backup_interval: Option<u32>,
    pub backups_in_ha: Option<usize>,
    pub backups_in_storage: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    /// Where the snapshot system writes `<slug>.tar` archives
    pub archive_dir: PathBuf,
    pub supervisor_url: String,
    pub supervisor_token: String,
    pub storage: StorageConfig,
    pub sync_interval: Duration,
    pub timezone: Timezone,
    pub log_level: String,
    pub ui_dir: PathBuf,
    pub overrides: OptionOverrides,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let data_dir = PathBuf::from(var("DATA_DIRECTORY").unwrap_or_else(|| "/data".into()));

        let storage = match var("STORAGE_BACKEND").as_deref().unwrap_or("s3") {
            "s3" => StorageConfig::S3 {
                bucket: var("S3_BUCKET")
                    .ok_or_else(|| anyhow::anyhow!("S3_BUCKET is required for the s3 backend"))?,
                endpoint: var("S3_ENDPOINT"),
                region: var("S3_REGION"),
                prefix: var("S3_PREFIX").unwrap_or_default(),
            },
            "local" => StorageConfig::Local {
                root: PathBuf::from(
                    var("LOCAL_STORAGE_DIRECTORY")
                        .unwrap_or_else(|| data_dir.join("store").display().to_string()),
                ),
            },
            other => anyhow::bail!("Unknown storage backend: {other}"),
        };

        Ok(Self {
            port: parse(var("PORT")).unwrap_or(9101),
            archive_dir: PathBuf::from(var("ARCHIVE_DIRECTORY").unwrap_or_else(|| "/backup".into())),
            supervisor_url: var("SUPERVISOR_URL").unwrap_or_else(|| "http://supervisor".into()),
            supervisor_token: var("SUPERVISOR_TOKEN").unwrap_or_default(),
            storage,
            sync_interval: Duration::from_secs(parse(var("SYNC_INTERVAL_SECS")).unwrap_or(60).max(1)),
            timezone: parse_timezone(var("TZ").as_deref()),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            ui_dir: PathBuf::from(var("UI_DIRECTORY").unwrap_or_else(|| "/www".into())),
            overrides: OptionOverrides {
                backup_name_format: var("BACKUP_NAME_FORMAT"),
                backup_interval: parse(var("BACKUP_INTERVAL")),
                backups_in_ha: parse(var("BACKUPS_IN_HA")),
                backups_in_storage: parse(var("BACKUPS_IN_STORAGE")),
            },
            data_dir,
        })
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("backups.json")
    }

    pub fn options_path(&self) -> PathBuf {
        self.data_dir.join("options.json")
    }
}

fn parse<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

/// Accepts an IANA zone name (`Europe/Berlin`), `Z` or a fixed `±HH:MM`
/// offset. Anything else falls back to UTC.
pub fn parse_timezone(value: Option<&str>) -> Timezone {
    let Some(value) = value.map(str::trim) else {
        return Timezone::default();
    };
    if value == "Z" {
        return Timezone::default();
    }
    if let Ok(tz) = value.parse::<Tz>() {
        return Timezone::Named(tz);
    }

    let (sign, rest) = match value.as_bytes().first() {
        Some(b'+') => (1, &value[1..]),
        Some(b'-') => (-1, &value[1..]),
        _ => {
            tracing::warn!(tz = value, "Unknown timezone, using UTC");
            return Timezone::default();
        }
    };
    let offset = rest
        .split_once(':')
        .and_then(|(h, m)| Some((h.parse::<i32>().ok()?, m.parse::<i32>().ok()?)))
        .filter(|(h, m)| *h <= 23 && *m <= 59)
        .and_then(|(h, m)| FixedOffset::east_opt(sign * (h * 3600 + m * 60)));

    match offset {
        Some(offset) => Timezone::Fixed(offset),
        None => {
            tracing::warn!(tz = value, "Invalid timezone offset, using UTC");
            Timezone::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[("S3_BUCKET", "backups")]).unwrap();
        assert_eq!(c.port, 9101);
        assert_eq!(c.data_dir, PathBuf::from("/data"));
        assert_eq!(c.archive_dir, PathBuf::from("/backup"));
        assert_eq!(c.supervisor_url, "http://supervisor");
        assert_eq!(c.sync_interval, Duration::from_secs(60));
        assert_eq!(c.timezone, Timezone::default());
        assert_eq!(c.overrides, OptionOverrides::default());
        assert_eq!(c.options_path(), PathBuf::from("/data/options.json"));
        assert!(matches!(c.storage, StorageConfig::S3 { ref bucket, .. } if bucket == "backups"));
    }

    #[test]
    fn test_s3_requires_bucket() {
        assert!(config(&[]).is_err());
        assert!(config(&[("STORAGE_BACKEND", "s3"), ("S3_BUCKET", " ")]).is_err());
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let err = config(&[("STORAGE_BACKEND", "floppy")]).unwrap_err();
        assert!(err.to_string().contains("floppy"));
    }

    #[test]
    fn test_local_backend_and_overrides() {
        let c = config(&[
            ("STORAGE_BACKEND", "local"),
            ("DATA_DIRECTORY", "/srv/sync"),
            ("BACKUP_INTERVAL", "7"),
            ("BACKUPS_IN_HA", "2"),
            ("BACKUPS_IN_STORAGE", "not a number"),
            ("SYNC_INTERVAL_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(
            c.storage,
            StorageConfig::Local {
                root: PathBuf::from("/srv/sync/store")
            }
        );
        assert_eq!(c.overrides.backup_interval, Some(7));
        assert_eq!(c.overrides.backups_in_ha, Some(2));
        assert_eq!(c.overrides.backups_in_storage, None);
        assert_eq!(c.sync_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone(None), Timezone::default());
        assert_eq!(parse_timezone(Some("UTC")), Timezone::Named(Tz::UTC));
        assert_eq!(parse_timezone(Some("Z")), Timezone::default());
        assert_eq!(
            parse_timezone(Some("Europe/Berlin")),
            Timezone::Named(chrono_tz::Europe::Berlin)
        );
        assert_eq!(
            parse_timezone(Some(" America/New_York ")),
            Timezone::Named(chrono_tz::America::New_York)
        );
        assert_eq!(
            parse_timezone(Some("+02:00")),
            Timezone::Fixed(FixedOffset::east_opt(7200).unwrap())
        );
        assert_eq!(
            parse_timezone(Some("-05:30")),
            Timezone::Fixed(FixedOffset::west_opt(5 * 3600 + 1800).unwrap())
        );
        assert_eq!(parse_timezone(Some("Mars/Olympus")), Timezone::default());
        assert_eq!(parse_timezone(Some("+25:00")), Timezone::default());
    }

    #[test]
    fn test_timezone_from_environment() {
        let c = config(&[("S3_BUCKET", "backups"), ("TZ", "Europe/Amsterdam")]).unwrap();
        assert_eq!(c.timezone, Timezone::Named(chrono_tz::Europe::Amsterdam));
    }
}
