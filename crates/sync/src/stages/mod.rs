//! The stages of a pass.
//!
//! Every stage is a long-running task that pulls from one bounded queue and
//! pushes into the next. A stage stops once its input is exhausted, or early
//! when its output queue has been closed because a later stage has failed.
//! [`relate`] is the exception: it runs once, after every pass has drained.

mod discover;
mod download;
mod parse;
mod record;
mod relate;
mod save;

pub(crate) use self::discover::{discover, replay};
pub(crate) use self::download::download;
pub(crate) use self::parse::parse;
pub(crate) use self::record::record;
pub(crate) use self::relate::relate;
pub(crate) use self::save::save;

use tokio::sync::mpsc::Sender;

/// Hand `item` downstream, waiting for room. Returns `false` once nobody is
/// listening anymore.
async fn forward<T>(tx: &Sender<T>, item: T) -> bool {
    tx.send(item).await.is_ok()
}
