use crate::error::{Error, ErrorKind};
use exn::{OptionExt, ResultExt};
use skiff_manifest::models::Digest;
use std::path::PathBuf;

use super::ContentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct ArtifactId(pub i64);

/// Downloaded bytes as they sit in artifact storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub digest: Digest,
    pub size: u64,
    /// Relative to the storage backend root.
    pub path: PathBuf,
}

/// The remote location a unit was fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteArtifact {
    pub remote: String,
    pub url: String,
    pub content: ContentId,
    pub digest: Digest,
}

#[derive(sqlx::FromRow)]
pub(crate) struct ArtifactRow {
    sha256: String,
    size: i64,
    path: String,
}
impl ArtifactRow {
    pub(crate) fn path_of(artifact: &Artifact) -> Result<String, Error> {
        Ok(artifact.path.to_str().ok_or_raise(|| ErrorKind::InvalidData("artifact path"))?.to_string())
    }

    pub(crate) fn size_of(artifact: &Artifact) -> Result<i64, Error> {
        i64::try_from(artifact.size).or_raise(|| ErrorKind::InvalidData("artifact size"))
    }
}
impl TryFrom<ArtifactRow> for Artifact {
    type Error = Error;
    fn try_from(row: ArtifactRow) -> Result<Self, Self::Error> {
        Ok(Self {
            digest: row.sha256.parse().map_err(|e| ErrorKind::invalid(e, "artifact digest"))?,
            size: u64::try_from(row.size).or_raise(|| ErrorKind::InvalidData("artifact size"))?,
            path: PathBuf::from(row.path),
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct RemoteArtifactRow {
    remote: String,
    url: String,
    content_id: i64,
    sha256: String,
}
impl TryFrom<RemoteArtifactRow> for RemoteArtifact {
    type Error = Error;
    fn try_from(row: RemoteArtifactRow) -> Result<Self, Self::Error> {
        Ok(Self {
            remote: row.remote,
            url: row.url,
            content: ContentId(row.content_id),
            digest: row.sha256.parse().map_err(|e| ErrorKind::invalid(e, "remote artifact digest"))?,
        })
    }
}
