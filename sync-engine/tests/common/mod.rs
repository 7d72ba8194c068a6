//! In-memory collaborators for engine tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{stream, StreamExt};
use snapshot_sync_engine::{
    BackupRecord, ByteStream, ClientError, Engine, EngineSettings, Ledger, ManualClock,
    ObjectInfo, ObjectStore, RetentionLimits, SnapshotClient, SnapshotInfo, SnapshotKind,
};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Semaphore;

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
}

pub fn snapshot(slug: &str, name: &str, date: DateTime<Utc>) -> SnapshotInfo {
    SnapshotInfo {
        slug: slug.to_string(),
        name: name.to_string(),
        date,
        size: 12.5,
        kind: SnapshotKind::Full,
    }
}

pub fn object(name: &str, modified: DateTime<Utc>) -> ObjectInfo {
    ObjectInfo {
        key: format!("{name}.tar"),
        size: 12.5,
        modified,
    }
}

#[derive(Default)]
pub struct FakeSnapshots {
    pub snapshots: Mutex<Vec<SnapshotInfo>>,
    pub deleted: Mutex<Vec<String>>,
    pub restored: Mutex<Vec<String>>,
    pub uploaded: Mutex<Vec<Bytes>>,
    pub list_calls: AtomicUsize,
    pub fail_create: Mutex<Option<String>>,
    pub fail_delete: Mutex<Option<String>>,
    /// When set, `create_full` waits for a permit
    pub create_gate: Mutex<Option<Arc<Semaphore>>>,
    pub clock: Mutex<Option<Arc<ManualClock>>>,
    next_slug: AtomicUsize,
}

impl FakeSnapshots {
    pub fn with(snapshots: Vec<SnapshotInfo>) -> Self {
        let fake = Self::default();
        *fake.snapshots.lock().unwrap() = snapshots;
        fake
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .snapshots
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.create_gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl SnapshotClient for FakeSnapshots {
    async fn create_full(&self, name: &str) -> Result<String, ClientError> {
        let gate = self.create_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(message) = self.fail_create.lock().unwrap().clone() {
            return Err(ClientError::Request(message));
        }

        let slug = format!("slug{}", self.next_slug.fetch_add(1, Ordering::SeqCst));
        let date = match self.clock.lock().unwrap().as_ref() {
            Some(clock) => snapshot_sync_engine::Clock::now(clock.as_ref()),
            None => Utc::now(),
        };
        self.snapshots
            .lock()
            .unwrap()
            .push(snapshot(&slug, name, date));
        Ok(slug)
    }

    async fn get(&self, slug: &str) -> Result<SnapshotInfo, ClientError> {
        self.snapshots
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.slug == slug)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(slug.to_string()))
    }

    async fn list(&self) -> Result<Vec<SnapshotInfo>, ClientError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshots.lock().unwrap().clone())
    }

    async fn delete(&self, slug: &str) -> Result<(), ClientError> {
        if let Some(message) = self.fail_delete.lock().unwrap().clone() {
            return Err(ClientError::Request(message));
        }
        let mut snapshots = self.snapshots.lock().unwrap();
        let before = snapshots.len();
        snapshots.retain(|s| s.slug != slug);
        if snapshots.len() == before {
            return Err(ClientError::NotFound(slug.to_string()));
        }
        self.deleted.lock().unwrap().push(slug.to_string());
        Ok(())
    }

    async fn restore(&self, slug: &str) -> Result<(), ClientError> {
        if !self.snapshots.lock().unwrap().iter().any(|s| s.slug == slug) {
            return Err(ClientError::NotFound(slug.to_string()));
        }
        self.restored.lock().unwrap().push(slug.to_string());
        Ok(())
    }

    async fn upload(&self, mut data: ByteStream) -> Result<(), ClientError> {
        let mut body = Vec::new();
        while let Some(chunk) = data.next().await {
            body.extend_from_slice(&chunk?);
        }
        self.uploaded.lock().unwrap().push(Bytes::from(body));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeStore {
    pub objects: Mutex<BTreeMap<String, ObjectInfo>>,
    /// Keys in upload order
    pub uploads: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_upload: Mutex<Option<String>>,
    pub fail_delete: Mutex<Option<String>>,
    /// Keys left out of listings, as with an eventually consistent bucket
    pub hidden: Mutex<HashSet<String>>,
}

impl FakeStore {
    pub fn with(objects: Vec<ObjectInfo>) -> Self {
        let fake = Self::default();
        {
            let mut map = fake.objects.lock().unwrap();
            for object in objects {
                map.insert(object.key.clone(), object);
            }
        }
        fake
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn upload(&self, key: &str, _local_path: &Path) -> Result<String, ClientError> {
        if let Some(message) = self.fail_upload.lock().unwrap().clone() {
            return Err(ClientError::Request(message));
        }
        self.uploads.lock().unwrap().push(key.to_string());
        self.objects.lock().unwrap().insert(
            key.to_string(),
            ObjectInfo {
                key: key.to_string(),
                size: 12.5,
                modified: Utc::now(),
            },
        );
        Ok(key.to_string())
    }

    async fn download(&self, key: &str) -> Result<ByteStream, ClientError> {
        if !self.objects.lock().unwrap().contains_key(key) {
            return Err(ClientError::NotFound(key.to_string()));
        }
        let chunks = vec![
            Ok(Bytes::from_static(b"archive ")),
            Ok(Bytes::from(key.to_string())),
        ];
        Ok(stream::iter(chunks).boxed())
    }

    async fn delete(&self, key: &str) -> Result<(), ClientError> {
        if let Some(message) = self.fail_delete.lock().unwrap().clone() {
            return Err(ClientError::Request(message));
        }
        if self.objects.lock().unwrap().remove(key).is_none() {
            return Err(ClientError::NotFound(key.to_string()));
        }
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn stat(&self, key: &str) -> Result<ObjectInfo, ClientError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(key.to_string()))
    }

    async fn list(&self) -> Result<Vec<ObjectInfo>, ClientError> {
        let hidden = self.hidden.lock().unwrap();
        Ok(self
            .objects
            .lock()
            .unwrap()
            .values()
            .filter(|o| !hidden.contains(&o.key))
            .cloned()
            .collect())
    }
}

pub struct Harness {
    pub engine: Arc<Engine>,
    pub snapshots: Arc<FakeSnapshots>,
    pub store: Arc<FakeStore>,
    pub clock: Arc<ManualClock>,
    pub ledger_path: std::path::PathBuf,
    _dir: TempDir,
}

impl Harness {
    pub async fn new(snapshots: FakeSnapshots, store: FakeStore, limits: RetentionLimits) -> Self {
        Self::with_records(snapshots, store, limits, Vec::new()).await
    }

    /// Start from a ledger file that already holds `records`.
    pub async fn with_records(
        snapshots: FakeSnapshots,
        store: FakeStore,
        limits: RetentionLimits,
        records: Vec<BackupRecord>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let ledger_path = dir.path().join("backups.json");
        let ledger = Ledger::new(&ledger_path);
        ledger.save(&records).await.unwrap();

        let clock = Arc::new(ManualClock::new(at(20, 12)));
        *snapshots.clock.lock().unwrap() = Some(clock.clone());
        let snapshots = Arc::new(snapshots);
        let store = Arc::new(store);

        let settings = EngineSettings {
            limits,
            archive_dir: dir.path().to_path_buf(),
            ..EngineSettings::default()
        };
        let engine = Engine::new(
            snapshots.clone(),
            store.clone(),
            ledger,
            clock.clone(),
            settings,
        )
        .await
        .unwrap();

        Self {
            engine: Arc::new(engine),
            snapshots,
            store,
            clock,
            ledger_path,
            _dir: dir,
        }
    }

    pub async fn record(&self, name: &str) -> BackupRecord {
        self.engine
            .list_backups()
            .await
            .into_iter()
            .find(|r| r.name == name)
            .unwrap_or_else(|| panic!("no record named {name}"))
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .engine
            .list_backups()
            .await
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.sort();
        names
    }

    pub async fn persisted(&self) -> Vec<BackupRecord> {
        Ledger::new(&self.ledger_path).load().await.unwrap()
    }
}

pub fn limits(in_snapshot: usize, in_store: usize) -> RetentionLimits {
    RetentionLimits {
        in_snapshot,
        in_store,
    }
}
