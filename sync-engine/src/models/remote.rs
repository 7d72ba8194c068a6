use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    Full,
    Partial,
}

/// A backup as reported by the snapshot system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub slug: String,
    pub name: String,
    pub date: DateTime<Utc>,
    /// Size in megabytes
    pub size: f64,
    #[serde(rename = "type")]
    pub kind: SnapshotKind,
}

/// An object as reported by the object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    /// Size in megabytes
    pub size: f64,
    pub modified: DateTime<Utc>,
}
