use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use super::{Descriptor, Digest, MediaType, PlatformEntry};
use crate::error::{Error, ErrorKind, Result};

const MAX_TAG_LEN: usize = 128;

/// The four kinds of content unit a registry graph is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentKind {
    Tag,
    ManifestList,
    Manifest,
    Blob,
}
impl ContentKind {
    pub const ALL: [ContentKind; 4] = [Self::Tag, Self::ManifestList, Self::Manifest, Self::Blob];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tag => "tag",
            Self::ManifestList => "manifest_list",
            Self::Manifest => "manifest",
            Self::Blob => "blob",
        }
    }
}
impl FromStr for ContentKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "tag" => Self::Tag,
            "manifest_list" => Self::ManifestList,
            "manifest" => Self::Manifest,
            "blob" => Self::Blob,
            _ => exn::bail!(ErrorKind::UnknownContentKind(s.to_string())),
        })
    }
}
impl Display for ContentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Whether a tag points at a single image manifest or a manifest list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    Manifest,
    ManifestList,
}
impl TagKind {
    pub fn target_kind(&self) -> ContentKind {
        match self {
            Self::Manifest => ContentKind::Manifest,
            Self::ManifestList => ContentKind::ManifestList,
        }
    }
}

/// The identity of a content unit independent of when or how it was found:
/// the digest for manifests, lists and blobs; `upstream:name` for tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey(String);
impl NaturalKey {
    pub fn digest(digest: &Digest) -> Self {
        Self(digest.to_string())
    }

    pub fn tag(upstream: &str, name: &str) -> Self {
        Self(format!("{upstream}:{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<String> for NaturalKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}
impl Display for NaturalKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

/// Check a tag against the registry reference grammar:
/// `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`.
pub fn validate_tag_name(name: &str) -> Result<()> {
    let mut bytes = name.bytes();
    let valid_first = bytes.next().is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_');
    let valid_rest = bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));
    if !valid_first || !valid_rest || name.len() > MAX_TAG_LEN {
        exn::bail!(ErrorKind::InvalidTagName(name.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Repository name on the remote the tag was listed from.
    pub upstream: String,
    pub name: String,
    pub target: Digest,
    pub kind: TagKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestList {
    pub digest: Digest,
    pub media_type: MediaType,
    pub schema_version: u32,
    pub entries: Vec<PlatformEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageManifest {
    pub digest: Digest,
    pub media_type: MediaType,
    pub schema_version: u32,
    /// Absent when the manifest declares none. Schema 1 manifests embed theirs.
    pub config: Option<Descriptor>,
    /// Base layer first. Empty for scratch images.
    pub layers: Vec<Descriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub digest: Digest,
    pub media_type: MediaType,
}

/// A content unit draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Tag(Tag),
    ManifestList(ManifestList),
    ImageManifest(ImageManifest),
    Blob(Blob),
}
impl Content {
    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Tag(_) => ContentKind::Tag,
            Self::ManifestList(_) => ContentKind::ManifestList,
            Self::ImageManifest(_) => ContentKind::Manifest,
            Self::Blob(_) => ContentKind::Blob,
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        match self {
            Self::Tag(tag) => NaturalKey::tag(&tag.upstream, &tag.name),
            Self::ManifestList(list) => NaturalKey::digest(&list.digest),
            Self::ImageManifest(manifest) => NaturalKey::digest(&manifest.digest),
            Self::Blob(blob) => NaturalKey::digest(&blob.digest),
        }
    }

    /// The content's own digest. Tags are not content-addressed.
    pub fn digest(&self) -> Option<&Digest> {
        match self {
            Self::Tag(_) => None,
            Self::ManifestList(list) => Some(&list.digest),
            Self::ImageManifest(manifest) => Some(&manifest.digest),
            Self::Blob(blob) => Some(&blob.digest),
        }
    }

    /// Every unit this one refers to, in document order.
    pub fn children(&self) -> Vec<ChildRef> {
        match self {
            Self::Tag(tag) => {
                let media_type = match tag.kind {
                    TagKind::Manifest => MediaType::DockerManifest,
                    TagKind::ManifestList => MediaType::DockerManifestList,
                };
                vec![ChildRef { digest: tag.target.clone(), media_type, role: Role::Target }]
            },
            Self::ManifestList(list) => list
                .entries
                .iter()
                .enumerate()
                .map(|(ordinal, entry)| ChildRef {
                    digest: entry.manifest.digest.clone(),
                    media_type: entry.manifest.media_type.clone(),
                    role: Role::Entry(ordinal),
                })
                .collect(),
            Self::ImageManifest(manifest) => manifest
                .config
                .iter()
                .map(|config| ChildRef {
                    digest: config.digest.clone(),
                    media_type: config.media_type.clone(),
                    role: Role::Config,
                })
                .chain(manifest.layers.iter().enumerate().map(|(ordinal, layer)| ChildRef {
                    digest: layer.digest.clone(),
                    media_type: layer.media_type.clone(),
                    role: Role::Layer(ordinal),
                }))
                .collect(),
            Self::Blob(_) => Vec::new(),
        }
    }
}

/// How a child hangs off its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The single target of a tag.
    Target,
    /// The n-th platform entry of a manifest list.
    Entry(usize),
    /// The config blob of an image manifest.
    Config,
    /// The n-th layer of an image manifest, base first.
    Layer(usize),
}

/// A child declared by a parsed document but not yet downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChildRef {
    pub digest: Digest,
    pub media_type: MediaType,
    pub role: Role,
}
