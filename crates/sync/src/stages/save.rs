use std::sync::Arc;

use exn::ResultExt;
use futures::StreamExt;
use skiff_asyncutils::{Flight, FlightError};
use skiff_content::models::Saved;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, instrument};

use super::forward;
use crate::context::Context;
use crate::error::{ErrorKind, Result, Stage};
use crate::unit::{Parsed, Stored, Unit};

/// Give every draft its durable identity, `save_workers` at a time.
///
/// Drafts sharing a natural key never race on the store: the first one in
/// leads the insert and the rest wait for it and adopt its identity. Keys
/// settled earlier in the sync are answered without touching the store.
pub(crate) async fn save(context: Arc<Context>, rx: Receiver<Unit<Parsed>>, tx: Sender<Unit<Stored>>) -> Result<()> {
    let workers = context.config.save_workers;
    let mut saves = ReceiverStream::new(rx)
        .map(|unit| {
            let context = Arc::clone(&context);
            async move { save_unit(&context, unit).await }
        })
        .buffer_unordered(workers);
    while let Some(unit) = saves.next().await {
        if !forward(&tx, unit?).await {
            break;
        }
    }
    Ok(())
}

#[instrument(skip_all, fields(kind = %unit.state.content.kind(), key = %unit.state.content.natural_key()))]
async fn save_unit(context: &Context, unit: Unit<Parsed>) -> Result<Unit<Stored>> {
    let content = &unit.state.content;
    let key = (content.kind(), content.natural_key());
    let failed = || ErrorKind::Content { key: key.1.to_string(), stage: Stage::Save };
    let saved = match context.saves.settled(&key) {
        Some(id) => Saved { id, created: false },
        None => {
            let flight = context
                .saves
                .flights
                .run(key.clone(), &context.cancel, || async {
                    let saved = context.store.insert_if_absent(content).await.or_raise(failed)?;
                    context.saves.settle(key.clone(), saved.id);
                    context.recorder.saved(key.0, saved.created);
                    debug!(id = %saved.id, created = saved.created, "saved");
                    Ok(saved)
                })
                .await;
            match flight {
                Ok(Flight::Led(saved)) => saved,
                Ok(Flight::Joined(saved)) => Saved { id: saved.id, created: false },
                Err(FlightError::Cancelled) => exn::bail!(ErrorKind::Cancelled),
                Err(FlightError::LeaderFailed) => exn::bail!(failed()),
                Err(FlightError::Failed(e)) => return Err(e),
            }
        },
    };
    if let Some(download) = &unit.state.download {
        context.store.link_artifact(saved.id, download.artifact_id).await.or_raise(failed)?;
    }
    Ok(unit.stored(saved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::{UPSTREAM, context};
    use async_trait::async_trait;
    use skiff_config::SyncConfig;
    use skiff_content::models::{Artifact, ArtifactId, ContentId, RemoteArtifact, Relation, RepositoryVersion};
    use skiff_content::{ContentStore, Repository, StoreHandle};
    use skiff_manifest::models::{Blob, Content, ContentKind, Digest, MediaType, NaturalKey};
    use skiff_registry::MockRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Counts inserts and slows them down so overlapping saves really overlap.
    struct SlowStore {
        inner: Repository,
        inserts: AtomicUsize,
    }

    #[async_trait]
    impl ContentStore for SlowStore {
        async fn insert_if_absent(&self, content: &Content) -> skiff_content::error::Result<Saved> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.insert_if_absent(content).await
        }

        async fn find(&self, kind: ContentKind, key: &NaturalKey) -> skiff_content::error::Result<Option<ContentId>> {
            self.inner.find(kind, key).await
        }

        async fn save_association(&self, relation: &Relation) -> skiff_content::error::Result<()> {
            self.inner.save_association(relation).await
        }

        async fn record_artifact(&self, artifact: &Artifact) -> skiff_content::error::Result<ArtifactId> {
            self.inner.record_artifact(artifact).await
        }

        async fn link_artifact(&self, content: ContentId, artifact: ArtifactId) -> skiff_content::error::Result<()> {
            self.inner.link_artifact(content, artifact).await
        }

        async fn record_remote_artifact(&self, remote: &RemoteArtifact) -> skiff_content::error::Result<()> {
            self.inner.record_remote_artifact(remote).await
        }

        async fn finalize_version(
            &self,
            repository: &str,
            tags: &[ContentId],
        ) -> skiff_content::error::Result<RepositoryVersion> {
            self.inner.finalize_version(repository, tags).await
        }
    }

    fn blob(bytes: &[u8]) -> Content {
        Content::Blob(Blob { digest: Digest::of(bytes), media_type: MediaType::DockerLayer })
    }

    async fn save_all(context: &Arc<Context>, contents: Vec<Content>) -> Vec<Unit<Stored>> {
        let (in_tx, in_rx) = mpsc::channel(contents.len().max(1));
        let (out_tx, mut out_rx) = mpsc::channel(contents.len().max(1));
        for content in contents {
            in_tx.send(Unit::derived(content, Vec::new(), context.gauge.acquire())).await.unwrap();
        }
        drop(in_tx);
        save(Arc::clone(context), in_rx, out_tx).await.unwrap();
        let mut stored = Vec::new();
        while let Some(unit) = out_rx.recv().await {
            stored.push(unit);
        }
        stored
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_insert_once() {
        let (db, context) = context(Arc::new(MockRegistry::new(UPSTREAM)), SyncConfig::default()).await;
        let store = Arc::new(SlowStore { inner: Repository::from(&db), inserts: AtomicUsize::new(0) });
        let handle: StoreHandle = store.clone();
        let context = Arc::new(Context { store: handle, ..Arc::into_inner(context).unwrap() });

        let stored = save_all(&context, (0..8).map(|_| blob(b"shared")).collect()).await;
        assert_eq!(stored.len(), 8);
        assert_eq!(store.inserts.load(Ordering::SeqCst), 1);
        let ids: Vec<_> = stored.iter().map(|unit| unit.state.saved.id).collect();
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(stored.iter().filter(|unit| unit.state.saved.created).count(), 1);
        assert_eq!(context.saves.len(), 1);
        assert_eq!(context.saves.flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_settled_key_skips_store() {
        let (db, context) = context(Arc::new(MockRegistry::new(UPSTREAM)), SyncConfig::default()).await;
        let store = Arc::new(SlowStore { inner: Repository::from(&db), inserts: AtomicUsize::new(0) });
        let handle: StoreHandle = store.clone();
        let context = Arc::new(Context { store: handle, ..Arc::into_inner(context).unwrap() });

        save_all(&context, vec![blob(b"a")]).await;
        let again = save_all(&context, vec![blob(b"a"), blob(b"b")]).await;
        assert_eq!(again.len(), 2);
        assert_eq!(store.inserts.load(Ordering::SeqCst), 2);
        let report = context.recorder.finish("alpine", 1, 0);
        assert_eq!(report.counts(ContentKind::Blob).created, 2);
    }

    #[tokio::test]
    async fn test_existing_rows_are_adopted() {
        let (db, context) = context(Arc::new(MockRegistry::new(UPSTREAM)), SyncConfig::default()).await;
        let existing = Repository::from(&db).insert_if_absent(&blob(b"old")).await.unwrap();
        let stored = save_all(&context, vec![blob(b"old")]).await;
        assert_eq!(stored[0].state.saved, Saved { id: existing.id, created: false });
        let report = context.recorder.finish("alpine", 1, 0);
        assert_eq!(report.counts(ContentKind::Blob).adopted, 1);
    }
}
