use std::sync::Arc;

use exn::ResultExt;
use skiff_content::models::RemoteArtifact;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::trace;

use super::forward;
use crate::context::Context;
use crate::error::{ErrorKind, Result, Stage};
use crate::unit::{Finished, Stored, Unit};

/// Remember where each saved unit was fetched from, then let it leave the
/// pipeline.
pub(crate) async fn record(
    context: Arc<Context>,
    mut rx: Receiver<Unit<Stored>>,
    tx: Sender<Finished>,
) -> Result<()> {
    while let Some(unit) = rx.recv().await {
        let stored = &unit.state;
        if let Some(download) = &stored.download {
            let remote = RemoteArtifact {
                remote: context.remote.clone(),
                url: download.url.clone(),
                content: stored.saved.id,
                digest: stored.digest.clone().unwrap_or_else(|| download.artifact.digest.clone()),
            };
            trace!(url = %remote.url, content = %remote.content, "recording remote artifact");
            context
                .store
                .record_remote_artifact(&remote)
                .await
                .or_raise(|| ErrorKind::Content { key: stored.key.to_string(), stage: Stage::Record })?;
        }
        if !forward(&tx, unit.finish()).await {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::{UPSTREAM, context};
    use crate::unit::{Declaration, Download};
    use skiff_config::SyncConfig;
    use skiff_content::models::Artifact;
    use skiff_content::{ContentStore, Repository};
    use skiff_manifest::models::{Blob, Content, Digest, MediaType};
    use skiff_registry::{MockRegistry, Target};
    use skiff_storage::artifact_path;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_records_remote_url_and_finishes() {
        let (db, context) = context(Arc::new(MockRegistry::new(UPSTREAM)), SyncConfig::default()).await;
        let repo = Repository::from(&db);
        let digest = Digest::of(b"layer");
        let content = Content::Blob(Blob { digest: digest.clone(), media_type: MediaType::DockerLayer });
        let saved = repo.insert_if_absent(&content).await.unwrap();
        let artifact = Artifact { digest: digest.clone(), size: 5, path: artifact_path(&digest) };
        let artifact_id = repo.record_artifact(&artifact).await.unwrap();
        let download = Arc::new(Download {
            target: Target::Blob(digest.clone()),
            url: "mock://hub/v2/library/alpine/blobs/layer".to_string(),
            document: None,
            media_type: None,
            claimed: None,
            artifact,
            artifact_id,
            cached: false,
        });

        let unit = Unit::declare(Declaration::Tag("unused".to_string()), context.gauge.acquire())
            .downloaded(download)
            .parsed(content, Vec::new())
            .stored(saved);
        let (in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, mut out_rx) = mpsc::channel(1);
        in_tx.send(unit).await.unwrap();
        drop(in_tx);
        record(Arc::clone(&context), in_rx, out_tx).await.unwrap();

        let finished = out_rx.recv().await.unwrap();
        assert_eq!(finished.id, saved.id);
        assert_eq!(context.gauge.current(), 0);
        let remote = repo.remote_artifact("hub", "mock://hub/v2/library/alpine/blobs/layer").await.unwrap().unwrap();
        assert_eq!(remote.content, saved.id);
        assert_eq!(remote.digest, digest);
    }
}
