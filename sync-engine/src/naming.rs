//! Backup identifiers, generated names and object-store keys.

use crate::settings::Timezone;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Suffix the snapshot system gives its archives; object keys carry it too.
pub const ARCHIVE_SUFFIX: &str = ".tar";

/// Generates fixed-width, lexicographically sortable ids from the creation
/// instant at nanosecond precision.
///
/// Two ids requested for the same instant are separated by one nanosecond so
/// ids handed out by one generator never repeat.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicI64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, now: DateTime<Utc>) -> String {
        let candidate = now.timestamp_nanos_opt().unwrap_or(i64::MAX);
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = candidate.max(prev.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return format_id(next),
                Err(actual) => prev = actual,
            }
        }
    }
}

fn format_id(nanos: i64) -> String {
    DateTime::from_timestamp_nanos(nanos)
        .format("%Y%m%d%H%M%S%.9f")
        .to_string()
}

/// Resolve the name for a new backup.
///
/// A non-empty requested name is used verbatim. Otherwise the template's
/// `{year}`, `{month}`, `{day}`, `{hr24}`, `{min}` and `{sec}` tokens are
/// filled in from `now` in the given zone.
pub fn backup_name(
    requested: Option<&str>,
    template: &str,
    now: DateTime<Utc>,
    zone: Timezone,
) -> String {
    if let Some(name) = requested.filter(|n| !n.is_empty()) {
        return name.to_string();
    }

    let local = zone.local(now);
    template
        .replace("{year}", &local.format("%Y").to_string())
        .replace("{month}", &local.format("%m").to_string())
        .replace("{day}", &local.format("%d").to_string())
        .replace("{hr24}", &local.format("%H").to_string())
        .replace("{min}", &local.format("%M").to_string())
        .replace("{sec}", &local.format("%S").to_string())
}

pub fn object_key(name: &str) -> String {
    format!("{name}{ARCHIVE_SUFFIX}")
}

/// The backup name an object key joins on.
pub fn name_from_key(key: &str) -> &str {
    key.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(key)
}
