mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{Alpine, Fixture, REPOSITORY, UPSTREAM, quick};
use skiff_config::SyncConfig;
use skiff_content::error::{ErrorKind as StoreErrorKind, Result as StoreResult};
use skiff_content::models::{Artifact, ArtifactId, ContentId, Relation, RemoteArtifact, RepositoryVersion, Saved};
use skiff_content::{ContentStore, Repository, StoreHandle};
use skiff_manifest::models::{Content, ContentKind, Digest, NaturalKey};
use skiff_storage::backend::MockBackend;
use skiff_sync::error::{ErrorKind, Stage};
use tokio_util::sync::CancellationToken;

/// A repository whose writes fail for one piece of content.
struct BrokenStore {
    inner: Repository,
    broken: NaturalKey,
    finalize_fails: bool,
}
impl BrokenStore {
    fn new(inner: Repository, broken: NaturalKey) -> Self {
        Self { inner, broken, finalize_fails: false }
    }
}

#[async_trait]
impl ContentStore for BrokenStore {
    async fn insert_if_absent(&self, content: &Content) -> StoreResult<Saved> {
        if content.natural_key() == self.broken {
            exn::bail!(StoreErrorKind::Database);
        }
        self.inner.insert_if_absent(content).await
    }

    async fn find(&self, kind: ContentKind, key: &NaturalKey) -> StoreResult<Option<ContentId>> {
        self.inner.find(kind, key).await
    }

    async fn save_association(&self, relation: &Relation) -> StoreResult<()> {
        self.inner.save_association(relation).await
    }

    async fn record_artifact(&self, artifact: &Artifact) -> StoreResult<ArtifactId> {
        self.inner.record_artifact(artifact).await
    }

    async fn link_artifact(&self, content: ContentId, artifact: ArtifactId) -> StoreResult<()> {
        self.inner.link_artifact(content, artifact).await
    }

    async fn record_remote_artifact(&self, remote: &RemoteArtifact) -> StoreResult<()> {
        self.inner.record_remote_artifact(remote).await
    }

    async fn finalize_version(&self, repository: &str, tags: &[ContentId]) -> StoreResult<RepositoryVersion> {
        if self.finalize_fails {
            exn::bail!(StoreErrorKind::Database);
        }
        self.inner.finalize_version(repository, tags).await
    }
}

#[tokio::test]
async fn test_failed_save_names_the_content() {
    let alpine = Alpine::new();
    let fixture = Fixture::new(alpine.registry(), SyncConfig::default()).await;
    let layer = Digest::of(b"layer-arm64");
    let store: StoreHandle = Arc::new(BrokenStore::new(fixture.repo(), NaturalKey::digest(&layer)));

    let err = fixture.sync_into(store, &CancellationToken::new()).await.unwrap_err();
    match &*err {
        ErrorKind::Content { key, stage } => {
            assert_eq!(key, &layer.to_string());
            assert_eq!(*stage, Stage::Save);
        },
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(err.location(), Some((layer.to_string().as_str(), Stage::Save)));
    assert!(fixture.repo().latest_version(REPOSITORY).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_tag_save_names_the_tag() {
    let alpine = Alpine::new();
    let fixture = Fixture::new(alpine.registry(), SyncConfig::default()).await;
    let tag = NaturalKey::tag(UPSTREAM, "latest");
    let store: StoreHandle = Arc::new(BrokenStore::new(fixture.repo(), tag.clone()));

    let err = fixture.sync_into(store, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Content { key, stage: Stage::Save } if *key == tag.to_string()));
}

#[tokio::test]
async fn test_failed_finalize_names_the_repository() {
    let alpine = Alpine::new();
    let fixture = Fixture::new(alpine.registry(), SyncConfig::default()).await;
    let broken = BrokenStore {
        finalize_fails: true,
        ..BrokenStore::new(fixture.repo(), NaturalKey::from("nothing".to_string()))
    };
    let store: StoreHandle = Arc::new(broken);

    let err = fixture.sync_into(store, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Content { key, stage: Stage::Finalize } if key == REPOSITORY));
}

#[tokio::test]
async fn test_failed_artifact_write_names_the_target() {
    let alpine = Alpine::new();
    let storage = Arc::new(MockBackend::default().read_only());
    let fixture = Fixture::new(alpine.registry(), quick()).await.with_storage(storage);

    let err = fixture.sync().await.unwrap_err();
    let tag = NaturalKey::tag(UPSTREAM, "latest").to_string();
    assert!(matches!(&*err, ErrorKind::Storage { key, stage: Stage::Download } if *key == tag));
    assert!(fixture.repo().latest_version(REPOSITORY).await.unwrap().is_none());
}

#[tokio::test]
async fn test_transient_tag_list_failure_is_retried() {
    let alpine = Alpine::new();
    let fixture = Fixture::new(alpine.registry(), quick()).await;
    fixture.registry.fail_tag_list_transiently(1);

    let report = fixture.sync().await.unwrap();
    assert_eq!(report.version, Some(1));
    assert_eq!(report.counts(ContentKind::Tag).created, 1);
    assert_eq!(report.counts(ContentKind::Blob).created, 4);
    assert_eq!(fixture.registry.tag_page_requests(), 2);
}

#[tokio::test]
async fn test_tag_list_that_never_recovers_fails_the_sync() {
    let alpine = Alpine::new();
    let fixture = Fixture::new(alpine.registry(), SyncConfig { max_retries: 2, ..quick() }).await;
    fixture.registry.fail_tag_list_transiently(usize::MAX);

    let err = fixture.sync().await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Registry { key, stage: Stage::Discover } if key == UPSTREAM));
    assert_eq!(fixture.registry.tag_page_requests(), 3);
    assert!(fixture.repo().latest_version(REPOSITORY).await.unwrap().is_none());
}
