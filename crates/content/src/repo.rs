//! SQLite-backed [`ContentStore`].
//!
//! Content rows are keyed by `(kind, natural_key)`; the kind-specific detail
//! tables hang off `content.id`. Associations live in their own tables so a
//! unit can be saved long before its children are.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{
    Artifact, ArtifactId, ArtifactRow, ContentId, ContentRow, ContentSummary, ListEntryRecord, ListEntryRow,
    Relation, RemoteArtifact, RemoteArtifactRow, RepositoryVersion, Saved, TagRecord, TagRow, VersionId, VersionRow,
    VersionTag, VersionTagRow,
};
use crate::store::ContentStore;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use skiff_manifest::models::{Content, ContentKind, Digest, NaturalKey};
use sqlx::{SqliteConnection, SqlitePool};
use time::UtcDateTime;
use tracing::{debug, instrument};

fn now() -> i64 {
    UtcDateTime::now().unix_timestamp()
}

/// Repository for content units, associations, artifacts and versions.
///
/// Cheap to clone; every clone shares the same connection pool.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Insert
    // =========================================================================

    async fn insert_detail(conn: &mut SqliteConnection, id: ContentId, content: &Content) -> Result<()> {
        let query = match content {
            Content::Tag(tag) => sqlx::query(include_str!("../queries/insert_tag.sql"))
                .bind(id)
                .bind(&tag.upstream)
                .bind(&tag.name)
                .bind(tag.kind.target_kind().as_str())
                .bind(tag.target.to_string()),
            Content::ManifestList(list) => sqlx::query(include_str!("../queries/insert_manifest_list.sql"))
                .bind(id)
                .bind(list.digest.to_string())
                .bind(list.media_type.as_str().to_string())
                .bind(i64::from(list.schema_version)),
            Content::ImageManifest(manifest) => sqlx::query(include_str!("../queries/insert_manifest.sql"))
                .bind(id)
                .bind(manifest.digest.to_string())
                .bind(manifest.media_type.as_str().to_string())
                .bind(i64::from(manifest.schema_version)),
            Content::Blob(blob) => sqlx::query(include_str!("../queries/insert_blob.sql"))
                .bind(id)
                .bind(blob.digest.to_string())
                .bind(blob.media_type.as_str().to_string()),
        };
        query.execute(&mut *conn).await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    // =========================================================================
    // Get/Fetch
    // =========================================================================

    pub async fn get(&self, id: ContentId) -> Result<Option<ContentSummary>> {
        let row: Option<ContentRow> = sqlx::query_as(include_str!("../queries/get_content.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(ContentSummary::try_from).transpose()
    }

    /// Number of saved units of `kind`, across all repositories.
    pub async fn count(&self, kind: ContentKind) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(include_str!("../queries/count_content.sql"))
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("content count"))
    }

    pub async fn tag(&self, upstream: &str, name: &str) -> Result<Option<TagRecord>> {
        let row: Option<TagRow> = sqlx::query_as(include_str!("../queries/get_tag.sql"))
            .bind(upstream)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(TagRecord::try_from).transpose()
    }

    /// Platform entries of a manifest list, in document order.
    pub async fn list_entries(&self, list: ContentId) -> Result<Vec<ListEntryRecord>> {
        let rows: Vec<ListEntryRow> = sqlx::query_as(include_str!("../queries/list_entries.sql"))
            .bind(list)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(ListEntryRecord::try_from).collect()
    }

    /// Layer blobs of an image manifest, base layer first.
    pub async fn manifest_layers(&self, manifest: ContentId) -> Result<Vec<ContentId>> {
        sqlx::query_scalar(include_str!("../queries/manifest_layers.sql"))
            .bind(manifest)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    pub async fn manifest_config(&self, manifest: ContentId) -> Result<Option<ContentId>> {
        let config: Option<Option<ContentId>> = sqlx::query_scalar(include_str!("../queries/manifest_config.sql"))
            .bind(manifest)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(config.flatten())
    }

    pub async fn find_artifact(&self, digest: &Digest) -> Result<Option<Artifact>> {
        let row: Option<ArtifactRow> = sqlx::query_as(include_str!("../queries/find_artifact.sql"))
            .bind(digest.to_string())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Artifact::try_from).transpose()
    }

    pub async fn remote_artifact(&self, remote: &str, url: &str) -> Result<Option<RemoteArtifact>> {
        let row: Option<RemoteArtifactRow> = sqlx::query_as(include_str!("../queries/get_remote_artifact.sql"))
            .bind(remote)
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(RemoteArtifact::try_from).transpose()
    }

    // =========================================================================
    // Versions
    // =========================================================================

    pub async fn version(&self, repository: &str, number: u64) -> Result<Option<RepositoryVersion>> {
        let number = i64::try_from(number).or_raise(|| ErrorKind::InvalidData("version number"))?;
        let row: Option<VersionRow> = sqlx::query_as(include_str!("../queries/get_version.sql"))
            .bind(repository)
            .bind(number)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(RepositoryVersion::try_from).transpose()
    }

    pub async fn latest_version(&self, repository: &str) -> Result<Option<RepositoryVersion>> {
        let row: Option<VersionRow> = sqlx::query_as(include_str!("../queries/latest_version.sql"))
            .bind(repository)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(RepositoryVersion::try_from).transpose()
    }

    /// All versions of `repository`, oldest first.
    pub async fn versions(&self, repository: &str) -> Result<Vec<RepositoryVersion>> {
        let rows: Vec<VersionRow> = sqlx::query_as(include_str!("../queries/list_versions.sql"))
            .bind(repository)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(RepositoryVersion::try_from).collect()
    }

    pub async fn version_content(&self, version: VersionId) -> Result<Vec<ContentSummary>> {
        let rows: Vec<ContentRow> = sqlx::query_as(include_str!("../queries/version_content.sql"))
            .bind(version)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(ContentSummary::try_from).collect()
    }

    /// Where each tag pointed when `version` was finalized, by tag name.
    pub async fn version_tags(&self, version: VersionId) -> Result<Vec<VersionTag>> {
        let rows: Vec<VersionTagRow> = sqlx::query_as(include_str!("../queries/version_tags.sql"))
            .bind(version)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(VersionTag::try_from).collect()
    }
}

#[async_trait]
impl ContentStore for Repository {
    #[instrument(level = "debug", skip_all, fields(kind = %content.kind(), key = %content.natural_key()))]
    async fn insert_if_absent(&self, content: &Content) -> Result<Saved> {
        let kind = content.kind();
        let key = content.natural_key();
        // The INSERT runs first so the transaction takes the write lock up
        // front instead of upgrading from a read snapshot.
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let inserted: Option<ContentId> = sqlx::query_scalar(include_str!("../queries/insert_content.sql"))
            .bind(kind.as_str())
            .bind(key.as_str())
            .bind(now())
            .fetch_optional(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let saved = match inserted {
            Some(id) => {
                Self::insert_detail(&mut *tx, id, content).await?;
                Saved { id, created: true }
            },
            None => {
                let id: ContentId = sqlx::query_scalar(include_str!("../queries/find_content.sql"))
                    .bind(kind.as_str())
                    .bind(key.as_str())
                    .fetch_one(&mut *tx)
                    .await
                    .or_raise(|| ErrorKind::Database)?;
                Saved { id, created: false }
            },
        };
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        debug!(id = %saved.id, created = saved.created, "saved content");
        Ok(saved)
    }

    async fn find(&self, kind: ContentKind, key: &NaturalKey) -> Result<Option<ContentId>> {
        sqlx::query_scalar(include_str!("../queries/find_content.sql"))
            .bind(kind.as_str())
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    #[instrument(level = "debug", skip_all, fields(parent = %relation.parent(), child = %relation.child()))]
    async fn save_association(&self, relation: &Relation) -> Result<()> {
        let (query, ordered) = match relation {
            Relation::TagTarget { tag, target } => {
                (sqlx::query(include_str!("../queries/relate_tag_target.sql")).bind(*tag).bind(*target), false)
            },
            Relation::ListEntry { list, ordinal, manifest, platform } => (
                sqlx::query(include_str!("../queries/relate_list_entry.sql"))
                    .bind(*list)
                    .bind(i64::from(*ordinal))
                    .bind(*manifest)
                    .bind(platform.as_ref().map(|p| p.os.clone()))
                    .bind(platform.as_ref().map(|p| p.architecture.clone()))
                    .bind(platform.as_ref().and_then(|p| p.variant.clone()))
                    .bind(platform.as_ref().and_then(|p| p.os_version.clone())),
                true,
            ),
            Relation::ManifestConfig { manifest, blob } => {
                (sqlx::query(include_str!("../queries/relate_manifest_config.sql")).bind(*manifest).bind(*blob), false)
            },
            Relation::ManifestLayer { manifest, ordinal, blob } => (
                sqlx::query(include_str!("../queries/relate_manifest_layer.sql"))
                    .bind(*manifest)
                    .bind(i64::from(*ordinal))
                    .bind(*blob),
                true,
            ),
        };
        let result = query.execute(&self.pool).await.or_raise(|| ErrorKind::Database)?;
        // Ordered inserts hit ON CONFLICT DO NOTHING when the association
        // already exists; the UPDATEs only miss when the kinds are wrong.
        if !ordered && result.rows_affected() == 0 {
            exn::bail!(ErrorKind::Constraint(format!(
                "{} cannot be associated with {}",
                relation.parent(),
                relation.child()
            )));
        }
        Ok(())
    }

    async fn record_artifact(&self, artifact: &Artifact) -> Result<ArtifactId> {
        sqlx::query_scalar(include_str!("../queries/upsert_artifact.sql"))
            .bind(artifact.digest.to_string())
            .bind(ArtifactRow::size_of(artifact)?)
            .bind(ArtifactRow::path_of(artifact)?)
            .bind(now())
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    async fn link_artifact(&self, content: ContentId, artifact: ArtifactId) -> Result<()> {
        sqlx::query(include_str!("../queries/link_artifact.sql"))
            .bind(content)
            .bind(artifact)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn record_remote_artifact(&self, remote: &RemoteArtifact) -> Result<()> {
        sqlx::query(include_str!("../queries/upsert_remote_artifact.sql"))
            .bind(&remote.remote)
            .bind(&remote.url)
            .bind(remote.content)
            .bind(remote.digest.to_string())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    #[instrument(skip(self, tags), fields(tags = tags.len()))]
    async fn finalize_version(&self, repository: &str, tags: &[ContentId]) -> Result<RepositoryVersion> {
        let tag_ids = serde_json::to_string(&tags.iter().map(|id| id.0).collect::<Vec<_>>())
            .or_raise(|| ErrorKind::InvalidData("tag ids"))?;
        let created_at = now();
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/ensure_repository.sql"))
            .bind(repository)
            .bind(created_at)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let (version, number): (VersionId, i64) = sqlx::query_as(include_str!("../queries/next_version.sql"))
            .bind(repository)
            .bind(created_at)
            .fetch_one(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/snapshot_version_content.sql"))
            .bind(version)
            .bind(&tag_ids)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/snapshot_version_tags.sql"))
            .bind(version)
            .bind(&tag_ids)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let row: VersionRow = sqlx::query_as(include_str!("../queries/get_version.sql"))
            .bind(repository)
            .bind(number)
            .fetch_optional(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .ok_or_raise(|| ErrorKind::NotFound(format!("{repository} version {number}")))?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        let version = RepositoryVersion::try_from(row)?;
        debug!(number = version.number, content = version.content_count, "finalized repository version");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use skiff_manifest::models::{
        Blob, Descriptor, ImageManifest, ManifestList, MediaType, Platform, PlatformEntry, Tag, TagKind,
    };
    use std::path::PathBuf;

    const UPSTREAM: &str = "library/alpine";

    async fn repo() -> Repository {
        let db = Database::connect_in_memory().await.unwrap();
        Repository::from(&db)
    }

    fn blob(bytes: &[u8]) -> Content {
        Content::Blob(Blob { digest: Digest::of(bytes), media_type: MediaType::DockerLayer })
    }

    fn descriptor(bytes: &[u8], media_type: MediaType) -> Descriptor {
        Descriptor { media_type, digest: Digest::of(bytes), size: bytes.len() as u64, urls: Vec::new() }
    }

    fn manifest(name: &[u8], config: &[u8], layers: &[&[u8]]) -> Content {
        Content::ImageManifest(ImageManifest {
            digest: Digest::of(name),
            media_type: MediaType::DockerManifest,
            schema_version: 2,
            config: Some(descriptor(config, MediaType::DockerConfig)),
            layers: layers.iter().map(|layer| descriptor(layer, MediaType::DockerLayer)).collect(),
        })
    }

    fn list(name: &[u8], manifests: &[(&[u8], &str)]) -> Content {
        Content::ManifestList(ManifestList {
            digest: Digest::of(name),
            media_type: MediaType::DockerManifestList,
            schema_version: 2,
            entries: manifests
                .iter()
                .map(|(bytes, arch)| PlatformEntry {
                    manifest: descriptor(bytes, MediaType::DockerManifest),
                    platform: Some(Platform {
                        os: "linux".to_string(),
                        architecture: arch.to_string(),
                        variant: None,
                        os_version: None,
                    }),
                })
                .collect(),
        })
    }

    fn tag(name: &str, target: &[u8], kind: TagKind) -> Content {
        Content::Tag(Tag { upstream: UPSTREAM.to_string(), name: name.to_string(), target: Digest::of(target), kind })
    }

    async fn save(repo: &Repository, content: &Content) -> ContentId {
        repo.insert_if_absent(content).await.unwrap().id
    }

    /// latest → list(m1 amd64, m2 arm64); m1 → config c1, layer l1; m2 → config c2, layer l1.
    async fn graph(repo: &Repository) -> (ContentId, ContentId) {
        let tag_id = save(repo, &tag("latest", b"list", TagKind::ManifestList)).await;
        let list_id = save(repo, &list(b"list", &[(b"m1", "amd64"), (b"m2", "arm64")])).await;
        let m1 = save(repo, &manifest(b"m1", b"c1", &[b"l1"])).await;
        let m2 = save(repo, &manifest(b"m2", b"c2", &[b"l1"])).await;
        let c1 = save(repo, &blob(b"c1")).await;
        let c2 = save(repo, &blob(b"c2")).await;
        let l1 = save(repo, &blob(b"l1")).await;
        let relations = [
            Relation::TagTarget { tag: tag_id, target: list_id },
            Relation::ListEntry { list: list_id, ordinal: 0, manifest: m1, platform: None },
            Relation::ListEntry { list: list_id, ordinal: 1, manifest: m2, platform: None },
            Relation::ManifestConfig { manifest: m1, blob: c1 },
            Relation::ManifestConfig { manifest: m2, blob: c2 },
            Relation::ManifestLayer { manifest: m1, ordinal: 0, blob: l1 },
            Relation::ManifestLayer { manifest: m2, ordinal: 0, blob: l1 },
        ];
        for relation in &relations {
            repo.save_association(relation).await.unwrap();
        }
        (tag_id, list_id)
    }

    #[tokio::test]
    async fn test_insert_then_adopt() {
        let repo = repo().await;
        let first = repo.insert_if_absent(&blob(b"layer")).await.unwrap();
        let second = repo.insert_if_absent(&blob(b"layer")).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(repo.count(ContentKind::Blob).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_digest_different_kind_are_distinct() {
        let repo = repo().await;
        let as_blob = save(&repo, &blob(b"doc")).await;
        let as_manifest = save(&repo, &manifest(b"doc", b"c", &[])).await;
        assert_ne!(as_blob, as_manifest);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_share_identity() {
        let repo = repo().await;
        let content = blob(b"shared");
        let results = join_all((0..16).map(|_| repo.insert_if_absent(&content))).await;
        let saved: Vec<Saved> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(saved.iter().filter(|s| s.created).count(), 1);
        assert!(saved.iter().all(|s| s.id == saved[0].id));
        assert_eq!(repo.count(ContentKind::Blob).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_and_get() {
        let repo = repo().await;
        let content = blob(b"layer");
        let id = save(&repo, &content).await;
        let found = repo.find(ContentKind::Blob, &content.natural_key()).await.unwrap();
        assert_eq!(found, Some(id));
        assert_eq!(repo.find(ContentKind::Manifest, &content.natural_key()).await.unwrap(), None);
        let summary = repo.get(id).await.unwrap().unwrap();
        assert_eq!(summary.kind, ContentKind::Blob);
        assert_eq!(summary.key, content.natural_key());
    }

    #[tokio::test]
    async fn test_tag_repoint_updates_in_place() {
        let repo = repo().await;
        let old = save(&repo, &manifest(b"old", b"c", &[])).await;
        let new = save(&repo, &manifest(b"new", b"c", &[])).await;
        let tag_id = save(&repo, &tag("latest", b"old", TagKind::Manifest)).await;
        repo.save_association(&Relation::TagTarget { tag: tag_id, target: old }).await.unwrap();

        let saved = repo.insert_if_absent(&tag("latest", b"new", TagKind::Manifest)).await.unwrap();
        assert!(!saved.created);
        assert_eq!(saved.id, tag_id);
        repo.save_association(&Relation::TagTarget { tag: tag_id, target: new }).await.unwrap();

        let record = repo.tag(UPSTREAM, "latest").await.unwrap().unwrap();
        assert_eq!(record.target, Some(new));
        assert_eq!(record.target_digest, Digest::of(b"new"));
        assert_eq!(repo.count(ContentKind::Tag).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_tag_cannot_target_blob() {
        let repo = repo().await;
        let tag_id = save(&repo, &tag("latest", b"x", TagKind::Manifest)).await;
        let blob_id = save(&repo, &blob(b"x")).await;
        let err = repo.save_association(&Relation::TagTarget { tag: tag_id, target: blob_id }).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Constraint(_)));
    }

    #[tokio::test]
    async fn test_associations_are_idempotent_and_ordered() {
        let repo = repo().await;
        let (_, list_id) = graph(&repo).await;
        let entry = Relation::ListEntry {
            list: list_id,
            ordinal: 0,
            manifest: repo.find(ContentKind::Manifest, &NaturalKey::digest(&Digest::of(b"m1"))).await.unwrap().unwrap(),
            platform: None,
        };
        repo.save_association(&entry).await.unwrap();

        let entries = repo.list_entries(list_id).await.unwrap();
        assert_eq!(entries.iter().map(|e| e.ordinal).collect::<Vec<_>>(), vec![0, 1]);
        let m2 = entries[1].manifest;
        let l1 = repo.find(ContentKind::Blob, &NaturalKey::digest(&Digest::of(b"l1"))).await.unwrap();
        assert_eq!(repo.manifest_layers(m2).await.unwrap(), vec![l1.unwrap()]);
        let c2 = repo.find(ContentKind::Blob, &NaturalKey::digest(&Digest::of(b"c2"))).await.unwrap();
        assert_eq!(repo.manifest_config(m2).await.unwrap(), c2);
    }

    #[tokio::test]
    async fn test_list_entry_keeps_platform() {
        let repo = repo().await;
        let list_id = save(&repo, &list(b"list", &[(b"m1", "arm64")])).await;
        let m1 = save(&repo, &manifest(b"m1", b"c", &[])).await;
        let platform = Platform {
            os: "linux".to_string(),
            architecture: "arm".to_string(),
            variant: Some("v7".to_string()),
            os_version: None,
        };
        let relation = Relation::ListEntry { list: list_id, ordinal: 0, manifest: m1, platform: Some(platform.clone()) };
        repo.save_association(&relation).await.unwrap();
        let entries = repo.list_entries(list_id).await.unwrap();
        assert_eq!(entries, vec![ListEntryRecord { ordinal: 0, manifest: m1, platform: Some(platform) }]);
    }

    #[tokio::test]
    async fn test_artifacts_and_remote_artifacts() {
        let repo = repo().await;
        let content = blob(b"layer");
        let id = save(&repo, &content).await;
        let artifact = Artifact { digest: Digest::of(b"layer"), size: 5, path: PathBuf::from("sha256/ab/abcd") };
        let first = repo.record_artifact(&artifact).await.unwrap();
        let second = repo.record_artifact(&artifact).await.unwrap();
        assert_eq!(first, second);
        repo.link_artifact(id, first).await.unwrap();
        repo.link_artifact(id, first).await.unwrap();
        assert_eq!(repo.find_artifact(&artifact.digest).await.unwrap(), Some(artifact.clone()));
        assert_eq!(repo.find_artifact(&Digest::of(b"other")).await.unwrap(), None);

        let url = "https://registry.example/v2/library/alpine/manifests/latest";
        let old = save(&repo, &manifest(b"old", b"c", &[])).await;
        let remote = |content, digest| RemoteArtifact { remote: "hub".into(), url: url.into(), content, digest };
        repo.record_remote_artifact(&remote(old, Digest::of(b"old"))).await.unwrap();
        repo.record_remote_artifact(&remote(id, Digest::of(b"layer"))).await.unwrap();
        let stored = repo.remote_artifact("hub", url).await.unwrap().unwrap();
        assert_eq!(stored.content, id);
        assert_eq!(stored.digest, Digest::of(b"layer"));
    }

    #[tokio::test]
    async fn test_finalize_version_collects_reachable_content() {
        let repo = repo().await;
        let (tag_id, list_id) = graph(&repo).await;
        // Saved but not reachable from any tag.
        save(&repo, &blob(b"orphan")).await;

        let version = repo.finalize_version("alpine", &[tag_id]).await.unwrap();
        assert_eq!(version.number, 1);
        assert_eq!(version.repository, "alpine");
        // tag, list, m1, m2, c1, c2, l1
        assert_eq!(version.content_count, 7);

        let content = repo.version_content(version.id).await.unwrap();
        assert!(!content.iter().any(|c| c.key == NaturalKey::digest(&Digest::of(b"orphan"))));
        let tags = repo.version_tags(version.id).await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "latest");
        assert_eq!(tags[0].target, list_id);
        assert_eq!(tags[0].target_kind, ContentKind::ManifestList);
    }

    #[tokio::test]
    async fn test_versions_are_numbered_and_immutable() {
        let repo = repo().await;
        let (tag_id, list_id) = graph(&repo).await;
        let v1 = repo.finalize_version("alpine", &[tag_id]).await.unwrap();

        let single = save(&repo, &manifest(b"single", b"c1", &[])).await;
        repo.save_association(&Relation::TagTarget { tag: tag_id, target: single }).await.unwrap();
        let v2 = repo.finalize_version("alpine", &[tag_id]).await.unwrap();
        assert_eq!(v2.number, 2);
        assert_eq!(v2.content_count, 2);

        assert_eq!(repo.version_tags(v1.id).await.unwrap()[0].target, list_id);
        assert_eq!(repo.version_tags(v2.id).await.unwrap()[0].target, single);
        assert_eq!(repo.version("alpine", 1).await.unwrap().unwrap().content_count, 7);
        assert_eq!(repo.latest_version("alpine").await.unwrap().unwrap().number, 2);
        let numbers: Vec<u64> = repo.versions("alpine").await.unwrap().into_iter().map(|v| v.number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(repo.latest_version("debian").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unrelated_tag_is_not_snapshotted() {
        let repo = repo().await;
        let tag_id = save(&repo, &tag("dangling", b"missing", TagKind::Manifest)).await;
        let version = repo.finalize_version("alpine", &[tag_id]).await.unwrap();
        assert_eq!(version.content_count, 1);
        assert!(repo.version_tags(version.id).await.unwrap().is_empty());
    }
}
