use std::sync::Arc;
use std::time::Duration;

use exn::{OptionExt, ResultExt};
use skiff_asyncutils::{Gauge, SingleFlight};
use skiff_config::{Config, SyncConfig};
use skiff_content::StoreHandle;
use skiff_registry::{HttpRegistry, RegistryHandle};
use skiff_storage::BackendHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::context::{Context, Deduplicator};
use crate::error::{ErrorKind, Result};
use crate::pipeline;
use crate::report::{Recorder, SyncReport};

/// A validated request to mirror one configured remote into a repository.
///
/// Building a task checks everything a sync needs from configuration, so a
/// misconfigured remote fails before any work is queued.
#[derive(Debug, Clone)]
pub struct Task {
    remote: String,
    repository: String,
    upstream: String,
    url: String,
    include_foreign_layers: bool,
    sync: SyncConfig,
}
impl Task {
    pub fn new(config: &Config, remote: &str, repository: &str) -> Result<Self> {
        config.validate().or_raise(|| ErrorKind::Configuration("invalid settings".to_string()))?;
        let settings =
            config.remote(remote).or_raise(|| ErrorKind::Configuration(format!("unknown remote {remote}")))?;
        let url = settings
            .url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_raise(|| ErrorKind::Configuration(format!("remote {remote} has no URL")))?;
        let repository = repository.trim();
        if repository.is_empty() {
            exn::bail!(ErrorKind::Configuration("repository name must not be empty".to_string()));
        }
        Ok(Self {
            remote: remote.to_string(),
            repository: repository.to_string(),
            upstream: settings.namespaced_upstream_name(),
            url: url.to_string(),
            include_foreign_layers: settings.include_foreign_layers,
            sync: config.sync.clone(),
        })
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Repository name on the remote, namespaced where the registry needs it.
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// An HTTP client for the task's remote.
    pub fn registry(&self) -> Result<RegistryHandle> {
        let timeout = Duration::from_secs(self.sync.request_timeout_secs);
        let registry = HttpRegistry::new(self.remote.clone(), &self.url, timeout)
            .or_raise(|| ErrorKind::Configuration(format!("remote {} has an invalid URL", self.remote)))?;
        Ok(Arc::new(registry))
    }

    fn context(
        &self,
        registry: RegistryHandle,
        store: StoreHandle,
        storage: BackendHandle,
        cancel: &CancellationToken,
    ) -> Context {
        Context {
            registry,
            storage,
            store,
            remote: self.remote.clone(),
            upstream: self.upstream.clone(),
            config: self.sync.clone(),
            include_foreign_layers: self.include_foreign_layers,
            cancel: cancel.child_token(),
            gauge: Gauge::new(),
            downloads: SingleFlight::new(),
            saves: Deduplicator::default(),
            recorder: Recorder::default(),
        }
    }
}

/// Mirror the task's remote over HTTP and finalize a new repository version.
pub async fn synchronize(
    task: &Task,
    store: StoreHandle,
    storage: BackendHandle,
    cancel: &CancellationToken,
) -> Result<SyncReport> {
    let registry = task.registry()?;
    synchronize_with(task, registry, store, storage, cancel).await
}

/// Like [`synchronize`], against any registry client.
///
/// Cancelling `cancel` stops every stage; content saved so far stays valid
/// but no version is finalized.
#[instrument(skip_all, fields(remote = %task.remote, repository = %task.repository, upstream = %task.upstream))]
pub async fn synchronize_with(
    task: &Task,
    registry: RegistryHandle,
    store: StoreHandle,
    storage: BackendHandle,
    cancel: &CancellationToken,
) -> Result<SyncReport> {
    info!("sync started");
    let context = Arc::new(task.context(registry, store, storage, cancel));
    let report = pipeline::run(context, &task.repository).await?;
    info!(
        version = report.version,
        created = report.created(),
        adopted = report.adopted(),
        downloads = report.downloads,
        "sync finished"
    );
    Ok(report)
}
