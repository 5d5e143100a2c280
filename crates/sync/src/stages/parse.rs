use std::sync::Arc;

use exn::ResultExt;
use skiff_manifest::models::{Blob, Content, ContentKind, Digest, MediaType, Tag, TagKind};
use skiff_manifest::parse_manifest;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, instrument, warn};

use super::forward;
use crate::context::Context;
use crate::error::{ErrorKind, Result, Stage};
use crate::unit::{Declaration, Downloaded, Edge, Parsed, Unit};

/// Turn downloaded artifacts into content drafts.
///
/// Digests are always recomputed from the bytes, by the download stage for
/// blobs and here for documents. A unit whose bytes are not
/// the ones its reference promised is rejected: under the `skip` integrity
/// policy it is dropped and reported, otherwise the sync fails.
pub(crate) async fn parse(
    context: Arc<Context>,
    mut rx: Receiver<Unit<Downloaded>>,
    tx: Sender<Unit<Parsed>>,
) -> Result<()> {
    while let Some(unit) = rx.recv().await {
        let key = unit.state.declaration.key(&context.upstream);
        let units = match interpret(&context, unit) {
            Ok(units) => units,
            Err(e) if e.is_rejection() && context.skips_rejections() => {
                warn!(%key, error = ?e, "skipping rejected unit");
                context.recorder.rejected(key.to_string(), Stage::Parse, e.to_string());
                continue;
            },
            Err(e) => return Err(e),
        };
        for unit in units {
            if !forward(&tx, unit).await {
                return Ok(());
            }
        }
    }
    Ok(())
}

#[instrument(skip_all, fields(unit = %unit.state.declaration.describe()))]
fn interpret(context: &Context, unit: Unit<Downloaded>) -> Result<Vec<Unit<Parsed>>> {
    let download = Arc::clone(&unit.state.download);
    let key = unit.state.declaration.key(&context.upstream).to_string();
    let media_type = download.media_type.as_deref();
    if let Declaration::Child { edge, .. } = &unit.state.declaration
        && edge.kind == ContentKind::Blob
    {
        edge.digest
            .verify_digest(&download.artifact.digest)
            .or_raise(|| ErrorKind::Integrity { key, stage: Stage::Parse })?;
        let content = Content::Blob(Blob { digest: edge.digest.clone(), media_type: edge.media_type.clone() });
        return Ok(vec![unit.parsed(content, Vec::new())]);
    }
    let Some(bytes) = download.document.as_deref() else {
        exn::bail!(ErrorKind::Parse(key));
    };
    match unit.state.declaration.clone() {
        Declaration::Child { edge, .. } => {
            let content = decode(bytes, media_type, &key)?;
            if content.kind() != edge.kind {
                warn!(expected = %edge.kind, found = %content.kind(), "unexpected document");
                exn::bail!(ErrorKind::Integrity { key, stage: Stage::Parse });
            }
            let content = settle_digest(content, bytes, &edge.digest, &key)?;
            let edges = Edge::of(&content, context.include_foreign_layers);
            debug!(children = edges.len(), "parsed");
            Ok(vec![unit.parsed(content, edges)])
        },
        Declaration::Tag(name) => {
            let mut content = decode(bytes, media_type, &key)?;
            if let Some(claimed) = &download.claimed {
                content = settle_digest(content, bytes, claimed, &key)?;
            }
            let (target, kind) = match &content {
                Content::ManifestList(list) => (list.digest.clone(), TagKind::ManifestList),
                Content::ImageManifest(manifest) => (manifest.digest.clone(), TagKind::Manifest),
                Content::Tag(_) | Content::Blob(_) => exn::bail!(ErrorKind::Parse(key)),
            };
            let tag = Content::Tag(Tag { upstream: context.upstream.clone(), name, target, kind });
            let tag_edges = Edge::of(&tag, context.include_foreign_layers);
            let edges = Edge::of(&content, context.include_foreign_layers);
            debug!(target_kind = %content.kind(), children = edges.len(), "resolved tag");
            let tag = Unit::derived(tag, tag_edges, context.gauge.acquire());
            Ok(vec![tag, unit.parsed(content, edges)])
        },
    }
}

fn decode(bytes: &[u8], media_type: Option<&str>, key: &str) -> Result<Content> {
    parse_manifest(bytes, media_type).map_err(|e| {
        if matches!(&*e, skiff_manifest::error::ErrorKind::NestedIndex(_)) {
            e.raise(ErrorKind::Integrity { key: key.to_string(), stage: Stage::Parse })
        } else {
            e.raise(ErrorKind::Parse(key.to_string()))
        }
    })
}

/// Check a manifest's bytes against the digest it was referenced by.
///
/// Signed schema 1 manifests are addressed by the digest of their payload
/// without the signatures, which cannot be recomputed here. They keep the
/// digest they were referenced by instead.
fn settle_digest(mut content: Content, bytes: &[u8], expected: &Digest, key: &str) -> Result<Content> {
    if let Content::ImageManifest(manifest) = &mut content
        && manifest.media_type == MediaType::DockerManifestV1Signed
    {
        debug!(%expected, "not verifying signed schema 1 manifest");
        manifest.digest = expected.clone();
        return Ok(content);
    }
    expected.verify(bytes).or_raise(|| ErrorKind::Integrity { key: key.to_string(), stage: Stage::Parse })?;
    Ok(content)
}
