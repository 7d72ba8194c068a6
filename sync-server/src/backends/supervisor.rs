//! Snapshot system client for the Home Assistant supervisor API.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use snapshot_sync_engine::{ByteStream, ClientError, SnapshotClient, SnapshotInfo};
use std::time::Duration;

/// The supervisor only answers a create request once the backup exists.
const CREATE_TIMEOUT: Duration = Duration::from_secs(2 * 3600);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct Envelope<T> {
    result: String,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct BackupList {
    backups: Vec<SnapshotInfo>,
}

#[derive(Deserialize)]
struct NewBackup {
    slug: String,
}

pub struct SupervisorClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl SupervisorClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ClientError::Request(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<Option<T>, ClientError> {
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Request(format!("{what}: {e}")))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(what.to_string()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ClientError::Request(format!("{what}: {e}")))?;
        let envelope: Envelope<T> = serde_json::from_slice(&body)
            .map_err(|e| ClientError::Decode(format!("{what}: {e}")))?;

        if envelope.result != "ok" || !status.is_success() {
            if envelope.message.contains("does not exist") {
                return Err(ClientError::NotFound(what.to_string()));
            }
            return Err(ClientError::Request(format!(
                "{what}: {status} {}",
                envelope.message
            )));
        }
        Ok(envelope.data)
    }
}

#[async_trait]
impl SnapshotClient for SupervisorClient {
    async fn create_full(&self, name: &str) -> Result<String, ClientError> {
        let request = self
            .request(Method::POST, "/backups/new/full")
            .timeout(CREATE_TIMEOUT)
            .json(&serde_json::json!({ "name": name }));
        let created: Option<NewBackup> = self.call(request, "create backup").await?;
        created
            .map(|b| b.slug)
            .ok_or_else(|| ClientError::Decode("create backup: missing slug".into()))
    }

    async fn get(&self, slug: &str) -> Result<SnapshotInfo, ClientError> {
        let request = self.request(Method::GET, &format!("/backups/{slug}/info"));
        let info: Option<SnapshotInfo> = self.call(request, &format!("backup {slug}")).await?;
        info.ok_or_else(|| ClientError::Decode(format!("backup {slug}: missing data")))
    }

    async fn list(&self) -> Result<Vec<SnapshotInfo>, ClientError> {
        let request = self.request(Method::GET, "/backups");
        let list: Option<BackupList> = self.call(request, "list backups").await?;
        Ok(list.map(|l| l.backups).unwrap_or_default())
    }

    async fn delete(&self, slug: &str) -> Result<(), ClientError> {
        let request = self.request(Method::DELETE, &format!("/backups/{slug}"));
        self.call::<serde_json::Value>(request, &format!("backup {slug}"))
            .await?;
        Ok(())
    }

    async fn restore(&self, slug: &str) -> Result<(), ClientError> {
        let request = self
            .request(Method::POST, &format!("/backups/{slug}/restore/full"))
            .timeout(CREATE_TIMEOUT);
        self.call::<serde_json::Value>(request, &format!("backup {slug}"))
            .await?;
        Ok(())
    }

    async fn upload(&self, data: ByteStream) -> Result<(), ClientError> {
        let part = reqwest::multipart::Part::stream(reqwest::Body::wrap_stream(data))
            .file_name("backup.tar")
            .mime_str("application/x-tar")
            .map_err(|e| ClientError::Request(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let request = self
            .request(Method::POST, "/backups/new/upload")
            .timeout(CREATE_TIMEOUT)
            .multipart(form);
        self.call::<serde_json::Value>(request, "upload backup")
            .await?;
        Ok(())
    }
}
