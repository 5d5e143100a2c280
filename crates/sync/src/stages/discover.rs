use std::sync::Arc;

use exn::ResultExt;
use skiff_manifest::models::validate_tag_name;
use skiff_registry::TagPage;
use tokio::sync::mpsc::Sender;
use tracing::{debug, instrument, warn};

use super::forward;
use crate::context::Context;
use crate::error::{ErrorKind, Result, Stage};
use crate::retry::retrying;
use crate::unit::{Declaration, Declared, Unit};

/// Feed the first pass: one unit per tag the remote lists.
///
/// Tags are pulled from the registry page by page as the download stage makes
/// room, so a repository with thousands of tags never sits in memory at once.
/// Each page is retried on its own when the remote fails transiently.
#[instrument(skip_all, fields(upstream = %context.upstream))]
pub(crate) async fn discover(context: Arc<Context>, tx: Sender<Unit<Declared>>) -> Result<()> {
    let upstream = context.upstream.as_str();
    let registry = &context.registry;
    let mut cursor: Option<String> = None;
    let mut listed = 0usize;
    loop {
        let current = cursor.as_deref();
        let request = || registry.list_tags_page(upstream, current);
        let TagPage { tags, next } = match retrying(&context.config, &context.cancel, "tag list", request).await? {
            Ok(page) => page,
            Err(e) if e.is_not_found() => {
                return Err(e).or_raise(|| ErrorKind::RemoteNotFound(upstream.to_string()));
            },
            Err(e) => {
                return Err(e).or_raise(|| ErrorKind::Registry { key: upstream.to_string(), stage: Stage::Discover });
            },
        };
        debug!(count = tags.len(), "listed tag page");
        for name in tags {
            if let Err(e) = validate_tag_name(&name) {
                warn!(tag = %name, error = ?e, "skipping tag");
                context.recorder.skipped_tag(name, "invalid tag name");
                continue;
            }
            listed += 1;
            let unit = Unit::declare(Declaration::Tag(name), context.gauge.acquire());
            if !forward(&tx, unit).await {
                debug!(listed, "tag discovery stopped early");
                return Ok(());
            }
        }
        match next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    debug!(listed, "tag discovery finished");
    Ok(())
}

/// Feed a later pass with the children the previous pass declared.
#[instrument(skip_all, fields(pending = declarations.len()))]
pub(crate) async fn replay(
    context: Arc<Context>,
    declarations: Vec<Declaration>,
    tx: Sender<Unit<Declared>>,
) -> Result<()> {
    for declaration in declarations {
        if !forward(&tx, Unit::declare(declaration, context.gauge.acquire())).await {
            break;
        }
    }
    Ok(())
}
