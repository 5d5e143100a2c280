use std::sync::Arc;

use exn::ResultExt;
use futures::StreamExt;
use skiff_asyncutils::FlightError;
use skiff_content::models::Artifact;
use skiff_manifest::models::Digest;
use skiff_registry::{Fetched, Target};
use skiff_storage::artifact_path;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, instrument, warn};

use super::forward;
use crate::context::{Context, Fetch};
use crate::error::{ErrorKind, Result, Stage};
use crate::retry::retrying;
use crate::unit::{Declaration, Declared, Download, Downloaded, Unit};

/// Attach a stored artifact to every declared unit, `download_workers` at a
/// time.
///
/// A tag whose manifest has vanished since it was listed is skipped. Any
/// other target the remote cannot serve fails the sync.
pub(crate) async fn download(
    context: Arc<Context>,
    rx: Receiver<Unit<Declared>>,
    tx: Sender<Unit<Downloaded>>,
) -> Result<()> {
    let workers = context.config.download_workers;
    let mut downloads = ReceiverStream::new(rx)
        .map(|unit| {
            let context = Arc::clone(&context);
            async move { download_unit(&context, unit).await }
        })
        .buffer_unordered(workers);
    while let Some(result) = downloads.next().await {
        let Some(unit) = result? else {
            continue;
        };
        if !forward(&tx, unit).await {
            break;
        }
    }
    Ok(())
}

async fn download_unit(context: &Context, unit: Unit<Declared>) -> Result<Option<Unit<Downloaded>>> {
    let declaration = &unit.state.declaration;
    let key = declaration.key(&context.upstream).to_string();
    let failed = || ErrorKind::Download { key: key.clone(), stage: Stage::Download };
    let target = declaration.target();
    let flight =
        context.downloads.run(target.clone(), &context.cancel, || obtain(context, declaration, &key, &target)).await;
    let fetch = match flight {
        Ok(flight) => {
            let leader = flight.is_leader();
            let fetch = flight.into_inner();
            if leader && let Some(download) = &fetch {
                context.recorder.downloaded(download.cached);
            }
            fetch
        },
        Err(FlightError::Cancelled) => exn::bail!(ErrorKind::Cancelled),
        Err(FlightError::LeaderFailed) => {
            debug!(%key, "shared download failed");
            exn::bail!(failed())
        },
        Err(FlightError::Failed(e)) => return Err(e),
    };
    let Some(download) = fetch else {
        return match declaration {
            Declaration::Tag(name) => {
                warn!(tag = %name, "tag disappeared before its manifest could be fetched");
                context.recorder.skipped_tag(name.clone(), "manifest not found");
                Ok(None)
            },
            Declaration::Child { parent, .. } => {
                warn!(%key, %parent, "remote does not have a referenced child");
                exn::bail!(failed())
            },
        };
    };
    Ok(Some(unit.downloaded(download)))
}

/// A target's artifact before it has been recorded.
struct Obtained {
    artifact: Artifact,
    document: Option<Vec<u8>>,
    media_type: Option<String>,
    claimed: Option<Digest>,
    cached: bool,
}

/// Store `target` as an artifact, unless a previous sync already did, and
/// record it. Blob bytes are dropped once written.
#[instrument(skip_all, fields(%target))]
async fn obtain(context: &Context, declaration: &Declaration, key: &str, target: &Target) -> Result<Fetch> {
    let storage_failed = || ErrorKind::Storage { key: key.to_string(), stage: Stage::Download };
    let is_document = !matches!(target, Target::Blob(_));
    let url = context
        .registry
        .url_for(&context.upstream, target)
        .or_raise(|| ErrorKind::Registry { key: key.to_string(), stage: Stage::Download })?;
    let declared_type = match declaration {
        Declaration::Child { edge, .. } => Some(edge.media_type.as_str().to_string()),
        Declaration::Tag(_) => None,
    };
    if let Some(expected) = declaration.expected() {
        let path = artifact_path(expected);
        if context.storage.exists(&path).await.or_raise(storage_failed)? {
            debug!(%expected, "artifact already stored");
            let size = context.storage.stat(&path).await.or_raise(storage_failed)?.size;
            let document =
                if is_document { Some(context.storage.read(&path).await.or_raise(storage_failed)?) } else { None };
            let artifact = Artifact { digest: expected.clone(), size, path };
            let obtained = Obtained { artifact, document, media_type: declared_type, claimed: None, cached: true };
            return Ok(Some(register(context, key, target, url, obtained).await?));
        }
    }

    let request = || context.registry.fetch(&context.upstream, target);
    let Fetched { bytes, media_type, digest: claimed } =
        match retrying(&context.config, &context.cancel, target, request).await? {
            Ok(fetched) => fetched,
            Err(e) if e.is_not_found() => {
                debug!(error = ?e, "not found on remote");
                return Ok(None);
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::Download { key: key.to_string(), stage: Stage::Download }),
        };
    let digest = Digest::of(&bytes);
    let path = artifact_path(&digest);
    if !context.storage.exists(&path).await.or_raise(storage_failed)? {
        context.storage.write(&path, &bytes).await.or_raise(storage_failed)?;
    }
    let artifact = Artifact { digest, size: bytes.len() as u64, path };
    let document = is_document.then_some(bytes);
    let obtained = Obtained { artifact, document, media_type: media_type.or(declared_type), claimed, cached: false };
    Ok(Some(register(context, key, target, url, obtained).await?))
}

async fn register(
    context: &Context,
    key: &str,
    target: &Target,
    url: String,
    obtained: Obtained,
) -> Result<Arc<Download>> {
    let Obtained { artifact, document, media_type, claimed, cached } = obtained;
    let artifact_id = context
        .store
        .record_artifact(&artifact)
        .await
        .or_raise(|| ErrorKind::Content { key: key.to_string(), stage: Stage::Download })?;
    Ok(Arc::new(Download { target: target.clone(), url, document, media_type, claimed, artifact, artifact_id, cached }))
}
