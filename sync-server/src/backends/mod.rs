pub mod local;
#[cfg(feature = "s3")]
pub mod s3;
pub mod supervisor;

use crate::config::StorageConfig;
use snapshot_sync_engine::ObjectStore;
use std::sync::Arc;

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

/// Sizes are reported in megabytes, rounded to two decimals.
pub(crate) fn megabytes(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_MEGABYTE * 100.0).round() / 100.0
}

/// Build the object store selected by the configuration.
pub async fn build_object_store(storage: &StorageConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match storage {
        #[cfg(feature = "s3")]
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
        } => {
            let store = s3::S3Store::new(
                bucket.clone(),
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
            )
            .await;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "s3"))]
        StorageConfig::S3 { .. } => {
            anyhow::bail!("The s3 storage backend is not compiled into this build")
        }
        StorageConfig::Local { root } => {
            tracing::info!(root = %root.display(), "Using local object store");
            Ok(Arc::new(local::LocalStore::new(root).await?))
        }
    }
}
