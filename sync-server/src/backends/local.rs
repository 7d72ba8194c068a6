//! Object store backed by a directory, e.g. a mounted NAS share.

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use snapshot_sync_engine::{ByteStream, ClientError, ObjectInfo, ObjectStore};
use std::path::{Path, PathBuf};
use tokio_util::io::ReaderStream;

use super::megabytes;

pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Keys are plain file names, so they cannot leave the root.
    fn path_for(&self, key: &str) -> Result<PathBuf, ClientError> {
        if key.is_empty() || key.contains(['/', '\\']) || key == "." || key == ".." {
            return Err(ClientError::Request(format!("invalid object key: {key}")));
        }
        Ok(self.root.join(key))
    }
}

fn not_found_or(e: std::io::Error, key: &str) -> ClientError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ClientError::NotFound(key.to_string())
    } else {
        ClientError::Io(e)
    }
}

async fn info(key: &str, path: &Path) -> Result<ObjectInfo, ClientError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| not_found_or(e, key))?;
    let modified = meta.modified()?;
    Ok(ObjectInfo {
        key: key.to_string(),
        size: megabytes(meta.len()),
        modified: modified.into(),
    })
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn upload(&self, key: &str, local_path: &Path) -> Result<String, ClientError> {
        let target = self.path_for(key)?;
        let partial = self.root.join(format!(".{key}.partial"));

        tokio::fs::copy(local_path, &partial).await?;
        tokio::fs::rename(&partial, &target).await?;
        tracing::debug!(key, path = %target.display(), "Stored archive");
        Ok(key.to_string())
    }

    async fn download(&self, key: &str) -> Result<ByteStream, ClientError> {
        let file = tokio::fs::File::open(self.path_for(key)?)
            .await
            .map_err(|e| not_found_or(e, key))?;
        Ok(ReaderStream::new(file).map_err(ClientError::Io).boxed())
    }

    async fn delete(&self, key: &str) -> Result<(), ClientError> {
        tokio::fs::remove_file(self.path_for(key)?)
            .await
            .map_err(|e| not_found_or(e, key))
    }

    async fn stat(&self, key: &str) -> Result<ObjectInfo, ClientError> {
        info(key, &self.path_for(key)?).await
    }

    async fn list(&self) -> Result<Vec<ObjectInfo>, ClientError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut objects = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(key) = entry.file_name().into_string() else {
                continue;
            };
            if key.starts_with('.') || !entry.file_type().await?.is_file() {
                continue;
            }
            objects.push(info(&key, &entry.path()).await?);
        }
        Ok(objects)
    }
}
