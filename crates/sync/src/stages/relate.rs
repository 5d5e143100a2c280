use std::collections::{HashMap, HashSet};

use exn::ResultExt;
use futures::{StreamExt, TryStreamExt};
use skiff_content::models::{ContentId, Relation};
use tracing::{debug, instrument};

use crate::context::{Context, ContentKey};
use crate::error::{ErrorKind, Result, Stage};
use crate::unit::Finished;

/// Persist every parent→child association recorded while parsing.
///
/// Runs once every pass has drained, so each child a parent declared has
/// either been saved or been rejected under the `skip` policy. Anything else
/// is a broken invariant and fails the sync. Returns how many associations
/// were written.
#[instrument(skip_all, fields(units = finished.len()))]
pub(crate) async fn relate(context: &Context, finished: &[Finished]) -> Result<u64> {
    let relations = resolve(context, finished)?;
    let count = relations.len() as u64;
    futures::stream::iter(relations)
        .map(Ok)
        .try_for_each_concurrent(context.config.save_workers, |(parent, relation)| async move {
            context
                .store
                .save_association(&relation)
                .await
                .or_raise(|| ErrorKind::Content { key: parent, stage: Stage::Relate })
        })
        .await?;
    debug!(count, "associations saved");
    Ok(count)
}

/// Every association to write, with the natural key of its parent.
fn resolve(context: &Context, finished: &[Finished]) -> Result<Vec<(String, Relation)>> {
    let ids: HashMap<ContentKey, ContentId> =
        finished.iter().map(|unit| ((unit.kind, unit.key.clone()), unit.id)).collect();
    let mut seen = HashSet::new();
    let mut relations = Vec::new();
    for parent in finished.iter().filter(|unit| seen.insert(unit.id)) {
        for edge in &parent.edges {
            match ids.get(&(edge.kind, edge.key())) {
                Some(child) => relations.push((parent.key.to_string(), edge.relation(parent.id, *child)?)),
                None if context.recorder.is_rejected(&edge.digest.to_string()) => {
                    debug!(parent = %parent.key, child = %edge.digest, "not associating rejected child");
                },
                None => exn::bail!(ErrorKind::Unresolved {
                    parent: parent.key.to_string(),
                    child: edge.digest.to_string(),
                }),
            }
        }
    }
    Ok(relations)
}
