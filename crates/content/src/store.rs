//! The content store interface the sync pipeline writes through.

use crate::error::Result;
use crate::models::{Artifact, ArtifactId, ContentId, RemoteArtifact, Relation, RepositoryVersion, Saved};
use async_trait::async_trait;
use skiff_manifest::models::{Content, ContentKind, NaturalKey};
use std::sync::Arc;

pub type StoreHandle = Arc<dyn ContentStore + Send + Sync>;

/// Durable owner of content units, their associations and repository versions.
///
/// Every write is idempotent by natural key, so a sync that is interrupted
/// and re-run converges on the same rows.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Insert a unit unless a row with the same kind and natural key exists.
    ///
    /// Either way the returned identity is the one every later caller sees.
    /// Tags are adopted as-is: repointing happens through
    /// [`save_association`](Self::save_association).
    async fn insert_if_absent(&self, content: &Content) -> Result<Saved>;

    async fn find(&self, kind: ContentKind, key: &NaturalKey) -> Result<Option<ContentId>>;

    /// Persist a parent→child association. Re-establishing an existing
    /// association is a no-op.
    async fn save_association(&self, relation: &Relation) -> Result<()>;

    /// Record downloaded bytes, returning the existing artifact if the digest
    /// is already known.
    async fn record_artifact(&self, artifact: &Artifact) -> Result<ArtifactId>;

    async fn link_artifact(&self, content: ContentId, artifact: ArtifactId) -> Result<()>;

    async fn record_remote_artifact(&self, remote: &RemoteArtifact) -> Result<()>;

    /// Commit a new version of `repository` holding exactly the content
    /// reachable from `tags`, in a single transaction.
    async fn finalize_version(&self, repository: &str, tags: &[ContentId]) -> Result<RepositoryVersion>;
}
