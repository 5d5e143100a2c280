use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use skiff_manifest::models::{ContentKind, Digest, NaturalKey, Platform};
use time::UtcDateTime;

use super::ContentId;

/// Outcome of an insert-if-absent: the unit's identity and whether this call
/// created it or adopted a row that already existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Saved {
    pub id: ContentId,
    pub created: bool,
}

/// A content row without its kind-specific detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSummary {
    pub id: ContentId,
    pub kind: ContentKind,
    pub key: NaturalKey,
    pub created_at: UtcDateTime,
}

/// Where a tag currently points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub id: ContentId,
    pub upstream: String,
    pub name: String,
    pub target_kind: ContentKind,
    pub target_digest: Digest,
    /// `None` until the target has been related.
    pub target: Option<ContentId>,
}

/// One platform entry of a saved manifest list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntryRecord {
    pub ordinal: u32,
    pub manifest: ContentId,
    pub platform: Option<Platform>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct ContentRow {
    id: i64,
    kind: String,
    natural_key: String,
    created_at: i64,
}
impl TryFrom<ContentRow> for ContentSummary {
    type Error = Error;
    fn try_from(row: ContentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ContentId(row.id),
            kind: row.kind.parse().map_err(|e| ErrorKind::invalid(e, "content kind"))?,
            key: NaturalKey::from(row.natural_key),
            created_at: UtcDateTime::from_unix_timestamp(row.created_at)
                .or_raise(|| ErrorKind::InvalidData("creation date"))?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct TagRow {
    content_id: i64,
    upstream: String,
    name: String,
    target_kind: String,
    target_digest: String,
    target_id: Option<i64>,
}
impl TryFrom<TagRow> for TagRecord {
    type Error = Error;
    fn try_from(row: TagRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ContentId(row.content_id),
            upstream: row.upstream,
            name: row.name,
            target_kind: row
                .target_kind
                .parse()
                .map_err(|e| ErrorKind::invalid(e, "tag target kind"))?,
            target_digest: row
                .target_digest
                .parse()
                .map_err(|e| ErrorKind::invalid(e, "tag target digest"))?,
            target: row.target_id.map(ContentId),
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ListEntryRow {
    ordinal: i64,
    manifest_id: i64,
    os: Option<String>,
    architecture: Option<String>,
    variant: Option<String>,
    os_version: Option<String>,
}
impl TryFrom<ListEntryRow> for ListEntryRecord {
    type Error = Error;
    fn try_from(row: ListEntryRow) -> Result<Self, Self::Error> {
        let platform = match (row.os, row.architecture) {
            (Some(os), Some(architecture)) => {
                Some(Platform { os, architecture, variant: row.variant, os_version: row.os_version })
            },
            _ => None,
        };
        Ok(Self {
            ordinal: u32::try_from(row.ordinal).or_raise(|| ErrorKind::InvalidData("entry ordinal"))?,
            manifest: ContentId(row.manifest_id),
            platform,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_row_to_summary() {
        let now = UtcDateTime::now();
        let row = ContentRow {
            id: 7,
            kind: "manifest_list".to_string(),
            natural_key: Digest::of(b"list").to_string(),
            created_at: now.unix_timestamp(),
        };
        let summary = ContentSummary::try_from(row).unwrap();
        assert_eq!(summary.id, ContentId(7));
        assert_eq!(summary.kind, ContentKind::ManifestList);
        assert_eq!(summary.key, NaturalKey::digest(&Digest::of(b"list")));
        assert_eq!(summary.created_at, now.replace_nanosecond(0).unwrap());
    }

    #[test]
    fn test_unknown_kind_is_invalid_data() {
        let row = ContentRow { id: 1, kind: "helm_chart".to_string(), natural_key: "x".to_string(), created_at: 0 };
        let err = ContentSummary::try_from(row).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData("content kind")));
    }

    #[test]
    fn test_entry_without_platform() {
        let row = ListEntryRow {
            ordinal: 0,
            manifest_id: 3,
            os: None,
            architecture: None,
            variant: None,
            os_version: None,
        };
        let entry = ListEntryRecord::try_from(row).unwrap();
        assert_eq!(entry.platform, None);
        assert_eq!(entry.manifest, ContentId(3));
    }
}
