mod artifact;
mod content;
mod relation;
mod version;

use std::fmt::{Display, Formatter, Result as FmtResult};

pub use self::artifact::{Artifact, ArtifactId, RemoteArtifact};
pub(crate) use self::artifact::{ArtifactRow, RemoteArtifactRow};
pub use self::content::{ContentSummary, ListEntryRecord, Saved, TagRecord};
pub(crate) use self::content::{ContentRow, ListEntryRow, TagRow};
pub use self::relation::Relation;
pub use self::version::{RepositoryVersion, VersionId, VersionTag};
pub(crate) use self::version::{VersionRow, VersionTagRow};

/// The durable identity of a saved content unit.
///
/// Assigned by the store on first insert and stable across syncs, so it can
/// be handed out to every caller that races on the same natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, sqlx::Type)]
#[sqlx(transparent)]
pub struct ContentId(pub i64);
impl Display for ContentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "#{}", self.0)
    }
}
