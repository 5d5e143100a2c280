use skiff_manifest::models::Platform;

use super::ContentId;

/// A parent→child association between two saved units.
///
/// Ordered relations carry the child's position in the parent document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    /// Point a tag at a manifest or manifest list, replacing any previous target.
    TagTarget { tag: ContentId, target: ContentId },
    ListEntry { list: ContentId, ordinal: u32, manifest: ContentId, platform: Option<Platform> },
    ManifestConfig { manifest: ContentId, blob: ContentId },
    ManifestLayer { manifest: ContentId, ordinal: u32, blob: ContentId },
}
impl Relation {
    pub fn parent(&self) -> ContentId {
        match self {
            Self::TagTarget { tag, .. } => *tag,
            Self::ListEntry { list, .. } => *list,
            Self::ManifestConfig { manifest, .. } | Self::ManifestLayer { manifest, .. } => *manifest,
        }
    }

    pub fn child(&self) -> ContentId {
        match self {
            Self::TagTarget { target, .. } => *target,
            Self::ListEntry { manifest, .. } => *manifest,
            Self::ManifestConfig { blob, .. } | Self::ManifestLayer { blob, .. } => *blob,
        }
    }
}
