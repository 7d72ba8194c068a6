//! Capability interfaces for the two external stores.
//!
//! The engine only ever talks to these traits; which concrete backend sits
//! behind them is decided once at start-up.

use crate::models::{ObjectInfo, SnapshotInfo};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use std::path::Path;
use thiserror::Error;

/// Streamed backup archive contents.
pub type ByteStream = BoxStream<'static, Result<Bytes, ClientError>>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

/// The system that produces and restores full backups.
#[async_trait]
pub trait SnapshotClient: Send + Sync {
    /// Request a full backup; returns its slug once the backup exists.
    async fn create_full(&self, name: &str) -> Result<String, ClientError>;

    async fn get(&self, slug: &str) -> Result<SnapshotInfo, ClientError>;

    async fn list(&self) -> Result<Vec<SnapshotInfo>, ClientError>;

    async fn delete(&self, slug: &str) -> Result<(), ClientError>;

    async fn restore(&self, slug: &str) -> Result<(), ClientError>;

    /// Push a backup archive back into the snapshot system.
    async fn upload(&self, data: ByteStream) -> Result<(), ClientError>;
}

/// Long-term remote storage for backup archives.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `local_path` under `key`; returns the stored key.
    async fn upload(&self, key: &str, local_path: &Path) -> Result<String, ClientError>;

    async fn download(&self, key: &str) -> Result<ByteStream, ClientError>;

    async fn delete(&self, key: &str) -> Result<(), ClientError>;

    async fn stat(&self, key: &str) -> Result<ObjectInfo, ClientError>;

    async fn list(&self) -> Result<Vec<ObjectInfo>, ClientError>;
}
