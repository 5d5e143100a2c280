//! Passes and the orchestrator that runs them.
//!
//! A pass wires the stages together with bounded queues:
//!
//! ```text
//! discover/replay → download → parse → save → record → sink
//! ```
//!
//! Pass 1 starts from the tags the remote lists. Each later pass replays the
//! children the previous pass declared, so the tiers of the content graph
//! (tags and their targets, then list entries and manifest blobs, then the
//! blobs of listed manifests) are fetched in order. Once every pass has
//! drained, associations are written and a new repository version is
//! finalized.

use std::collections::HashSet;
use std::future::Future;
use std::panic;
use std::sync::Arc;

use exn::ResultExt;
use skiff_config::SyncConfig;
use skiff_manifest::models::ContentKind;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::context::{ContentKey, Context};
use crate::error::{ErrorKind, Result, Stage};
use crate::report::SyncReport;
use crate::stages;
use crate::unit::{Declaration, Finished};

/// Passes needed to reach the deepest tier: tag → list → manifest → blob.
const PASSES: usize = 3;

/// The most units that can be alive in a pass at once.
///
/// Four queues hold units, each download and save worker holds one, and each
/// sequential stage holds at most what it is currently forwarding: one unit
/// for discovery, download, save and record, two for parsing (a tag and its
/// target).
pub fn in_flight_bound(config: &SyncConfig) -> usize {
    4 * config.queue_capacity + config.download_workers + config.save_workers + 6
}

/// Where a pass gets its units from.
enum Source {
    Tags,
    Pending(Vec<Declaration>),
}

type Stages = JoinSet<(Stage, Result<()>)>;

fn spawn_stage<F>(tasks: &mut Stages, stage: Stage, pass: usize, future: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let span = info_span!("stage", %stage, pass);
    tasks.spawn(async move { (stage, future.await) }.instrument(span));
}

fn settle(joined: std::result::Result<(Stage, Result<()>), JoinError>) -> Result<()> {
    match joined {
        Ok((_, Ok(()))) => Ok(()),
        Ok((stage, Err(e))) => {
            let key = e.location().map(|(key, _)| key.to_string());
            warn!(%stage, ?key, error = ?e, "stage failed");
            Err(e)
        },
        Err(e) if e.is_panic() => panic::resume_unwind(e.into_panic()),
        Err(_) => exn::bail!(ErrorKind::Cancelled),
    }
}

/// Run one pass to completion and return every unit that left it.
///
/// The first stage failure cancels the whole sync: the remaining stages are
/// aborted and anyone waiting on a shared download or save is released.
async fn run_pass(context: &Arc<Context>, pass: usize, source: Source) -> Result<Vec<Finished>> {
    let capacity = context.config.queue_capacity;
    let (declared_tx, declared_rx) = mpsc::channel(capacity);
    let (downloaded_tx, downloaded_rx) = mpsc::channel(capacity);
    let (parsed_tx, parsed_rx) = mpsc::channel(capacity);
    let (stored_tx, stored_rx) = mpsc::channel(capacity);
    let (finished_tx, mut finished_rx) = mpsc::channel(capacity);

    let mut tasks = Stages::new();
    match source {
        Source::Tags => {
            spawn_stage(&mut tasks, Stage::Discover, pass, stages::discover(Arc::clone(context), declared_tx));
        },
        Source::Pending(declarations) => {
            let replay = stages::replay(Arc::clone(context), declarations, declared_tx);
            spawn_stage(&mut tasks, Stage::Discover, pass, replay);
        },
    }
    let download = stages::download(Arc::clone(context), declared_rx, downloaded_tx);
    spawn_stage(&mut tasks, Stage::Download, pass, download);
    spawn_stage(&mut tasks, Stage::Parse, pass, stages::parse(Arc::clone(context), downloaded_rx, parsed_tx));
    spawn_stage(&mut tasks, Stage::Save, pass, stages::save(Arc::clone(context), parsed_rx, stored_tx));
    spawn_stage(&mut tasks, Stage::Record, pass, stages::record(Arc::clone(context), stored_rx, finished_tx));

    let mut finished = Vec::new();
    loop {
        tokio::select! {
            biased;
            () = context.cancel.cancelled() => {
                tasks.abort_all();
                exn::bail!(ErrorKind::Cancelled);
            },
            Some(joined) = tasks.join_next() => {
                if let Err(e) = settle(joined) {
                    context.cancel.cancel();
                    tasks.abort_all();
                    return Err(e);
                }
            },
            unit = finished_rx.recv() => match unit {
                Some(unit) => finished.push(unit),
                None => break,
            },
        }
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = settle(joined) {
            context.cancel.cancel();
            tasks.abort_all();
            return Err(e);
        }
    }
    Ok(finished)
}

/// Children declared by `finished` that no earlier pass has saved or rejected.
fn pending(context: &Context, finished: &[Finished], done: &HashSet<ContentKey>) -> Vec<Declaration> {
    let mut queued = HashSet::new();
    let mut declarations = Vec::new();
    for unit in finished {
        for edge in unit.edges.iter().filter(|edge| edge.is_pending()) {
            let key = (edge.kind, edge.key());
            if done.contains(&key) || context.recorder.is_rejected(&edge.digest.to_string()) {
                continue;
            }
            if queued.insert(key) {
                declarations.push(Declaration::Child { parent: unit.key.clone(), edge: edge.clone() });
            }
        }
    }
    declarations
}

/// Mirror the remote into `repository` and finalize a new version.
///
/// Nothing is finalized unless every pass and the association step succeed.
pub(crate) async fn run(context: Arc<Context>, repository: &str) -> Result<SyncReport> {
    let mut everything: Vec<Finished> = Vec::new();
    let mut done: HashSet<ContentKey> = HashSet::new();
    let mut source = Source::Tags;
    for pass in 1..=PASSES {
        let finished = run_pass(&context, pass, source).await?;
        let next = pending(&context, &finished, &done);
        done.extend(finished.iter().map(|unit| (unit.kind, unit.key.clone())));
        info!(pass, units = finished.len(), pending = next.len(), settled = context.saves.len(), "pass drained");
        everything.extend(finished);
        if next.is_empty() {
            break;
        }
        source = Source::Pending(next);
    }

    let associations = stages::relate(&context, &everything)
        .instrument(info_span!("stage", stage = %Stage::Relate))
        .await?;
    context.recorder.associated(associations);

    let mut seen = HashSet::new();
    let tags: Vec<_> = everything
        .iter()
        .filter(|unit| unit.kind == ContentKind::Tag && seen.insert(unit.id))
        .map(|unit| unit.id)
        .collect();
    let version = context
        .store
        .finalize_version(repository, &tags)
        .instrument(info_span!("stage", stage = %Stage::Finalize))
        .await
        .or_raise(|| ErrorKind::Content { key: repository.to_string(), stage: Stage::Finalize })?;
    debug!(version = version.number, content = version.content_count, tags = tags.len(), "version finalized");
    Ok(context.recorder.finish(repository, version.number, context.gauge.peak()))
}
