#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value, json};
use skiff_config::{Config, RemoteConfig, SyncConfig};
use skiff_content::models::ContentId;
use skiff_content::{ContentStore, Database, Repository, StoreHandle};
use skiff_manifest::models::{ContentKind, Digest, MediaType, NaturalKey};
use skiff_registry::{MockRegistry, RegistryHandle};
use skiff_storage::BackendHandle;
use skiff_storage::backend::MockBackend;
use skiff_sync::error::Result;
use skiff_sync::{SyncReport, Task, synchronize_with};
use tokio_util::sync::CancellationToken;

pub const UPSTREAM: &str = "library/alpine";
pub const REPOSITORY: &str = "alpine";

pub fn descriptor(media_type: MediaType, bytes: &[u8]) -> Value {
    json!({ "mediaType": media_type.as_str(), "digest": Digest::of(bytes).to_string(), "size": bytes.len() })
}

/// An OCI image manifest over `config` and `layers`.
pub fn image(config: &[u8], layers: &[&[u8]]) -> Vec<u8> {
    let layers: Vec<Value> = layers.iter().map(|layer| descriptor(MediaType::OciLayer, layer)).collect();
    serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": MediaType::OciManifest.as_str(),
        "config": descriptor(MediaType::OciConfig, config),
        "layers": layers,
    }))
    .unwrap()
}

/// An OCI image index with one linux entry per `(manifest, architecture)`.
pub fn index(entries: &[(&[u8], &str)]) -> Vec<u8> {
    let manifests: Vec<Value> = entries
        .iter()
        .map(|(manifest, architecture)| {
            let mut entry = descriptor(MediaType::OciManifest, manifest);
            entry["platform"] = json!({ "os": "linux", "architecture": architecture });
            entry
        })
        .collect();
    serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": MediaType::OciIndex.as_str(),
        "manifests": manifests,
    }))
    .unwrap()
}

/// The multi-arch image most tests mirror.
///
/// `latest` → list D1 → manifests M1 (amd64) and M2 (arm64), each with a
/// config blob and one layer.
pub struct Alpine {
    pub list: Vec<u8>,
    pub amd64: Vec<u8>,
    pub arm64: Vec<u8>,
    pub blobs: [&'static [u8]; 4],
}
impl Alpine {
    pub fn new() -> Self {
        let amd64 = image(b"config-amd64", &[b"layer-amd64"]);
        let arm64 = image(b"config-arm64", &[b"layer-arm64"]);
        let list = index(&[(&amd64, "amd64"), (&arm64, "arm64")]);
        Self { list, amd64, arm64, blobs: [b"config-amd64", b"layer-amd64", b"config-arm64", b"layer-arm64"] }
    }

    pub fn registry(&self) -> MockRegistry {
        let registry = MockRegistry::new(UPSTREAM)
            .with_tag("latest", self.list.clone(), MediaType::OciIndex)
            .with_manifest(self.amd64.clone(), MediaType::OciManifest)
            .with_manifest(self.arm64.clone(), MediaType::OciManifest);
        self.blobs.iter().fold(registry, |registry, blob| registry.with_blob(blob.to_vec()))
    }
}

pub fn config(sync: SyncConfig, include_foreign_layers: bool) -> Config {
    let mut config = Config { sync, ..Config::default() };
    config.remotes.insert(
        "hub".to_string(),
        RemoteConfig {
            url: Some("https://registry.example.com".to_string()),
            upstream_name: UPSTREAM.to_string(),
            include_foreign_layers,
        },
    );
    config
}

/// A mock registry, an in-memory store and in-memory artifact storage.
pub struct Fixture {
    pub registry: Arc<MockRegistry>,
    pub database: Database,
    pub storage: BackendHandle,
    pub task: Task,
}
impl Fixture {
    pub async fn new(registry: MockRegistry, sync: SyncConfig) -> Self {
        Self::with_config(registry, config(sync, false)).await
    }

    pub async fn with_config(registry: MockRegistry, config: Config) -> Self {
        Self {
            registry: Arc::new(registry),
            database: Database::connect_in_memory().await.unwrap(),
            storage: Arc::new(MockBackend::default()),
            task: Task::new(&config, "hub", REPOSITORY).unwrap(),
        }
    }

    /// Store artifacts in `storage` instead of an empty in-memory backend.
    pub fn with_storage(mut self, storage: BackendHandle) -> Self {
        self.storage = storage;
        self
    }

    pub fn repo(&self) -> Repository {
        Repository::from(&self.database)
    }

    pub async fn sync(&self) -> Result<SyncReport> {
        self.sync_until(&CancellationToken::new()).await
    }

    pub async fn sync_until(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        self.sync_into(Arc::new(self.repo()), cancel).await
    }

    /// Sync through `store` instead of the fixture's own repository.
    pub async fn sync_into(&self, store: StoreHandle, cancel: &CancellationToken) -> Result<SyncReport> {
        let registry: RegistryHandle = self.registry.clone();
        synchronize_with(&self.task, registry, store, Arc::clone(&self.storage), cancel).await
    }

    pub async fn id_of(&self, kind: ContentKind, bytes: &[u8]) -> Option<ContentId> {
        self.repo().find(kind, &NaturalKey::digest(&Digest::of(bytes))).await.unwrap()
    }
}

/// Settings that keep retries fast.
pub fn quick() -> SyncConfig {
    SyncConfig { retry_backoff_ms: 1, ..SyncConfig::default() }
}
