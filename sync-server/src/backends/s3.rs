//! Object store on any S3-compatible service (AWS, MinIO, Storj gateway).

use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream as S3Body;
use chrono::{DateTime, Utc};
use futures_util::{StreamExt, TryStreamExt};
use snapshot_sync_engine::{ByteStream, ClientError, ObjectInfo, ObjectStore};
use std::path::Path;
use tokio_util::io::ReaderStream;

use super::megabytes;

pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3Store {
    pub async fn new(
        bucket: String,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: String,
    ) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &endpoint {
            // Self-hosted and gateway endpoints rarely support virtual-host addressing
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = aws_sdk_s3::Client::from_conf(builder.build());

        tracing::info!(bucket = %bucket, prefix = %prefix, endpoint = ?endpoint, "S3 client initialized");

        Self {
            client,
            bucket,
            prefix: normalize_prefix(&prefix),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

fn to_datetime(t: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    t.and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
        .unwrap_or_default()
}

fn sdk_error<E, R>(e: SdkError<E, R>, key: &str) -> ClientError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let code = e.as_service_error().and_then(|se| se.code()).map(str::to_string);
    match code.as_deref() {
        Some("NoSuchKey") | Some("NotFound") => ClientError::NotFound(key.to_string()),
        _ => ClientError::Request(format!("{key}: {}", aws_sdk_s3::error::DisplayErrorContext(e))),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn upload(&self, key: &str, local_path: &Path) -> Result<String, ClientError> {
        let body = S3Body::from_path(local_path)
            .await
            .map_err(|e| ClientError::Request(format!("{}: {e}", local_path.display())))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .content_type("application/x-tar")
            .body(body)
            .send()
            .await
            .map_err(|e| sdk_error(e, key))?;

        tracing::debug!(bucket = %self.bucket, key, "Uploaded archive");
        Ok(key.to_string())
    }

    async fn download(&self, key: &str) -> Result<ByteStream, ClientError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| sdk_error(e, key))?;

        let reader = output.body.into_async_read();
        Ok(ReaderStream::new(reader).map_err(ClientError::Io).boxed())
    }

    async fn delete(&self, key: &str) -> Result<(), ClientError> {
        // S3 deletes are idempotent, so look first to report missing objects
        self.stat(key).await?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| sdk_error(e, key))?;
        Ok(())
    }

    async fn stat(&self, key: &str) -> Result<ObjectInfo, ClientError> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| sdk_error(e, key))?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size: megabytes(head.content_length().unwrap_or(0).max(0) as u64),
            modified: to_datetime(head.last_modified()),
        })
    }

    async fn list(&self) -> Result<Vec<ObjectInfo>, ClientError> {
        let mut objects = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&self.prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| sdk_error(e, &self.bucket))?;
            for object in page.contents() {
                let Some(full) = object.key() else { continue };
                let key = full.strip_prefix(&self.prefix).unwrap_or(full);
                // Nested keys belong to something else sharing the bucket
                if key.is_empty() || key.contains('/') {
                    continue;
                }
                objects.push(ObjectInfo {
                    key: key.to_string(),
                    size: megabytes(object.size().unwrap_or(0).max(0) as u64),
                    modified: to_datetime(object.last_modified()),
                });
            }
        }
        Ok(objects)
    }
}
