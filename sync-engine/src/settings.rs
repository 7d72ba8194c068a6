use crate::retention::RetentionLimits;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use chrono_tz::Tz;
use std::path::PathBuf;

pub const DEFAULT_NAME_FORMAT: &str = "Full Backup {year}-{month}-{day} {hr24}:{min}:{sec}";

/// Settings the engine reads on every operation. Updates arrive at runtime
/// through [`crate::Engine::apply_settings`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Template for generated backup names
    pub name_format: String,
    /// Time between scheduled backups
    pub backup_interval: Duration,
    pub limits: RetentionLimits,
    /// Where the snapshot system writes `<slug>.tar` archives
    pub archive_dir: PathBuf,
    /// Zone used when rendering generated names
    pub timezone: Timezone,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            name_format: DEFAULT_NAME_FORMAT.to_string(),
            backup_interval: Duration::days(3),
            limits: RetentionLimits::default(),
            archive_dir: PathBuf::from("/backup"),
            timezone: Timezone::default(),
        }
    }
}

/// Where generated names take their wall-clock time from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timezone {
    /// An IANA zone such as `Europe/Berlin`, daylight saving included
    Named(Tz),
    Fixed(FixedOffset),
}

impl Default for Timezone {
    fn default() -> Self {
        Timezone::Named(Tz::UTC)
    }
}

impl Timezone {
    /// `now` as wall-clock time in this zone.
    pub fn local(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        match self {
            Timezone::Named(tz) => now.with_timezone(tz).fixed_offset(),
            Timezone::Fixed(offset) => now.with_timezone(offset),
        }
    }
}
