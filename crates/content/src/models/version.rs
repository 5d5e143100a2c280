use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use skiff_manifest::models::{ContentKind, NaturalKey};
use time::UtcDateTime;

use super::ContentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct VersionId(pub i64);

/// An immutable, numbered snapshot of a repository's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryVersion {
    pub id: VersionId,
    pub repository: String,
    /// Starts at 1 and increases by one per finalized sync.
    pub number: u64,
    pub created_at: UtcDateTime,
    pub content_count: u64,
}

/// Where a tag pointed when a version was finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTag {
    pub name: String,
    pub tag: ContentId,
    pub target: ContentId,
    pub target_kind: ContentKind,
    pub target_key: NaturalKey,
}

#[derive(sqlx::FromRow)]
pub(crate) struct VersionRow {
    id: i64,
    repository: String,
    number: i64,
    created_at: i64,
    content_count: i64,
}
impl TryFrom<VersionRow> for RepositoryVersion {
    type Error = Error;
    fn try_from(row: VersionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: VersionId(row.id),
            repository: row.repository,
            number: u64::try_from(row.number).or_raise(|| ErrorKind::InvalidData("version number"))?,
            created_at: UtcDateTime::from_unix_timestamp(row.created_at)
                .or_raise(|| ErrorKind::InvalidData("version date"))?,
            content_count: u64::try_from(row.content_count).or_raise(|| ErrorKind::InvalidData("content count"))?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct VersionTagRow {
    name: String,
    tag_id: i64,
    target_id: i64,
    target_kind: String,
    target_key: String,
}
impl TryFrom<VersionTagRow> for VersionTag {
    type Error = Error;
    fn try_from(row: VersionTagRow) -> Result<Self, Self::Error> {
        Ok(Self {
            name: row.name,
            tag: ContentId(row.tag_id),
            target: ContentId(row.target_id),
            target_kind: row.target_kind.parse().map_err(|e| ErrorKind::invalid(e, "tag target kind"))?,
            target_key: NaturalKey::from(row.target_key),
        })
    }
}
