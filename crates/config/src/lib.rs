//! # skiff-config
//!
//! Layered configuration for skiff. Values are merged, lowest precedence
//! first, from:
//!
//! 1. built-in defaults,
//! 2. a configuration file (`.toml`, `.yaml`/`.yml` or `.json`),
//! 3. environment variables prefixed with `SKIFF_`, using `__` to nest
//!    (`SKIFF_SYNC__QUEUE_CAPACITY=16`, `SKIFF_REMOTES__HUB__URL=...`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_PREFIX: &str = "SKIFF_";
const DOCKER_HUB_HOSTS: &[&str] = &["registry-1.docker.io", "index.docker.io", "docker.io"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// SQLite database holding the content store.
    pub database: PathBuf,
    /// Root directory for downloaded artifacts.
    pub storage: PathBuf,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteConfig>,
}
impl Default for Config {
    fn default() -> Self {
        let data = data_dir();
        Self {
            database: data.join("skiff.sqlite"),
            storage: data.join("artifacts"),
            sync: SyncConfig::default(),
            remotes: BTreeMap::new(),
        }
    }
}

/// What to do with a unit whose bytes fail digest verification.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityPolicy {
    /// Fail the whole sync; no new version is finalized.
    #[default]
    Abort,
    /// Drop the unit, log it, and keep going without that association.
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Capacity of every bounded queue between pipeline stages.
    pub queue_capacity: usize,
    pub download_workers: usize,
    pub save_workers: usize,
    /// Retries after the first attempt for transient registry failures.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub request_timeout_secs: u64,
    pub integrity: IntegrityPolicy,
}
impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            download_workers: 8,
            save_workers: 4,
            max_retries: 3,
            retry_backoff_ms: 250,
            request_timeout_secs: 60,
            integrity: IntegrityPolicy::Abort,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base URL of the registry. A remote without one cannot be synced.
    #[serde(default)]
    pub url: Option<String>,
    /// Repository name on the remote registry (`alpine`, `grafana/loki`).
    pub upstream_name: String,
    /// Download and associate non-distributable ("foreign") layers.
    #[serde(default)]
    pub include_foreign_layers: bool,
}
impl RemoteConfig {
    /// Docker Hub serves official images under the implicit `library/`
    /// namespace; every other registry gets the name unchanged.
    pub fn namespaced_upstream_name(&self) -> String {
        let on_docker_hub = self.url.as_deref().and_then(host_of).is_some_and(|host| DOCKER_HUB_HOSTS.contains(&host));
        if on_docker_hub && !self.upstream_name.contains('/') {
            format!("library/{}", self.upstream_name)
        } else {
            self.upstream_name.clone()
        }
    }
}

fn host_of(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = host.split(':').next()?;
    (!host.is_empty()).then_some(host)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "skiff")
}

fn data_dir() -> PathBuf {
    project_dirs().map_or_else(|| PathBuf::from(".skiff"), |dirs| dirs.data_dir().to_path_buf())
}

/// The configuration file read when none is given explicitly.
pub fn default_config_file() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("skiff.toml"))
}

impl Config {
    /// Build the merged (but not yet extracted) configuration layers.
    ///
    /// An explicit `file` must exist. Without one, the default configuration
    /// file is used when present.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        let file = match file {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => default_config_file().filter(|path| path.is_file()),
        };
        if let Some(path) = file {
            debug!(path = %path.display(), "reading configuration file");
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file(&path)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(&path)),
                Some("json") => figment.merge(Json::file(&path)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(path)),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load and validate the configuration.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(file)?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let sync = &self.sync;
        for (name, value) in [
            ("sync.queue_capacity", sync.queue_capacity),
            ("sync.download_workers", sync.download_workers),
            ("sync.save_workers", sync.save_workers),
        ] {
            if value == 0 {
                exn::bail!(ErrorKind::Invalid(format!("{name} must be at least 1")));
            }
        }
        if sync.request_timeout_secs == 0 {
            exn::bail!(ErrorKind::Invalid("sync.request_timeout_secs must be at least 1".into()));
        }
        for (name, remote) in &self.remotes {
            if remote.upstream_name.trim().is_empty() {
                exn::bail!(ErrorKind::Invalid(format!("remotes.{name}.upstream_name must not be empty")));
            }
        }
        Ok(())
    }

    pub fn remote(&self, name: &str) -> Result<&RemoteConfig> {
        self.remotes.get(name).ok_or_raise(|| ErrorKind::UnknownRemote(name.to_string()))
    }
}
