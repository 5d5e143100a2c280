//! Units of work flowing through a pass.
//!
//! A [`Unit`] moves through the stages of one pass as a typestate:
//! [`Declared`] → [`Downloaded`] → [`Parsed`] → [`Stored`]. Each stage only
//! accepts the state the previous stage produces, so what a stage can rely on
//! having been attached is checked at compile time.
//!
//! Every unit holds a [`Ticket`] from the pass's in-flight gauge until it
//! leaves the last stage.

use std::sync::Arc;

use skiff_asyncutils::Ticket;
use skiff_content::models::{Artifact, ArtifactId, ContentId, Relation, Saved};
use skiff_manifest::models::{ChildRef, Content, ContentKind, Digest, MediaType, NaturalKey, Platform, Role};
use skiff_registry::{Reference, Target};

use crate::error::{ErrorKind, Result, Stage};

/// A parent→child reference declared by a parsed document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub role: Role,
    pub kind: ContentKind,
    pub digest: Digest,
    pub media_type: MediaType,
    /// Set for manifest list entries.
    pub platform: Option<Platform>,
}
impl Edge {
    /// The edges of `content` worth following. Foreign layers are dropped
    /// unless `include_foreign` is set.
    pub fn of(content: &Content, include_foreign: bool) -> Vec<Edge> {
        content
            .children()
            .into_iter()
            .filter(|child| include_foreign || !child.media_type.is_foreign_layer())
            .map(|child| Self::from_child(content, child))
            .collect()
    }

    fn from_child(parent: &Content, child: ChildRef) -> Self {
        let (kind, platform) = match (parent, child.role) {
            (Content::Tag(tag), _) => (tag.kind.target_kind(), None),
            (Content::ManifestList(list), Role::Entry(ordinal)) => {
                (ContentKind::Manifest, list.entries.get(ordinal).and_then(|entry| entry.platform.clone()))
            },
            _ => (ContentKind::Blob, None),
        };
        Self { role: child.role, kind, digest: child.digest, media_type: child.media_type, platform }
    }

    /// Whether the child must be downloaded in a later pass. A tag's target
    /// is fetched together with the tag itself.
    pub fn is_pending(&self) -> bool {
        self.role != Role::Target
    }

    pub fn key(&self) -> NaturalKey {
        NaturalKey::digest(&self.digest)
    }

    /// The association between the saved parent and the saved child.
    pub fn relation(&self, parent: ContentId, child: ContentId) -> Result<Relation> {
        let ordinal = |n: usize| {
            u32::try_from(n).map_err(|_| {
                exn::Exn::from(ErrorKind::Integrity { key: self.digest.to_string(), stage: Stage::Relate })
            })
        };
        Ok(match self.role {
            Role::Target => Relation::TagTarget { tag: parent, target: child },
            Role::Entry(n) => Relation::ListEntry {
                list: parent,
                ordinal: ordinal(n)?,
                manifest: child,
                platform: self.platform.clone(),
            },
            Role::Config => Relation::ManifestConfig { manifest: parent, blob: child },
            Role::Layer(n) => Relation::ManifestLayer { manifest: parent, ordinal: ordinal(n)?, blob: child },
        })
    }
}

/// Why a unit is being fetched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Declaration {
    /// A tag listed by the remote. What it points at is unknown until the
    /// manifest behind it has been fetched.
    Tag(String),
    /// A child declared by an already saved parent.
    Child { parent: NaturalKey, edge: Edge },
}
impl Declaration {
    pub fn target(&self) -> Target {
        match self {
            Self::Tag(name) => Target::Manifest(Reference::Tag(name.clone())),
            Self::Child { edge, .. } if edge.kind == ContentKind::Blob => Target::Blob(edge.digest.clone()),
            Self::Child { edge, .. } => Target::Manifest(Reference::Digest(edge.digest.clone())),
        }
    }

    /// The digest the fetched bytes must hash to, when known before fetching.
    pub fn expected(&self) -> Option<&Digest> {
        match self {
            Self::Tag(_) => None,
            Self::Child { edge, .. } => Some(&edge.digest),
        }
    }

    /// The natural key errors and rejections are reported under.
    pub fn key(&self, upstream: &str) -> NaturalKey {
        match self {
            Self::Tag(name) => NaturalKey::tag(upstream, name),
            Self::Child { edge, .. } => edge.key(),
        }
    }

    /// Human-readable identity for logs and errors.
    pub fn describe(&self) -> String {
        match self {
            Self::Tag(name) => format!("tag {name}"),
            Self::Child { edge, .. } => format!("{} {}", edge.kind, edge.digest),
        }
    }
}

/// A fetched target and the artifact it was stored as.
///
/// Shared between every unit that requested the same target concurrently.
/// Blob payloads go straight to artifact storage; only their digest and size
/// travel on, in `artifact`.
#[derive(Debug)]
pub struct Download {
    pub target: Target,
    pub url: String,
    /// The bytes of a manifest or manifest list, to be parsed. `None` for
    /// blobs.
    pub document: Option<Vec<u8>>,
    /// `Content-Type` as served, or the media type the parent declared.
    pub media_type: Option<String>,
    /// Digest the registry claimed in `Docker-Content-Digest`.
    pub claimed: Option<Digest>,
    pub artifact: Artifact,
    pub artifact_id: ArtifactId,
    /// Read back from artifact storage instead of the network.
    pub cached: bool,
}

#[derive(Debug)]
pub struct Declared {
    pub declaration: Declaration,
}

#[derive(Debug)]
pub struct Downloaded {
    pub declaration: Declaration,
    pub download: Arc<Download>,
}

#[derive(Debug)]
pub struct Parsed {
    pub content: Content,
    /// Children recorded now and related once every pass has drained.
    pub edges: Vec<Edge>,
    /// `None` for tags, which have no bytes of their own.
    pub download: Option<Arc<Download>>,
}

#[derive(Debug)]
pub struct Stored {
    pub kind: ContentKind,
    pub key: NaturalKey,
    pub digest: Option<Digest>,
    pub saved: Saved,
    pub edges: Vec<Edge>,
    pub download: Option<Arc<Download>>,
}

#[derive(Debug)]
pub struct Unit<S> {
    pub state: S,
    ticket: Ticket,
}
impl<S> Unit<S> {
    fn advance<T>(self, state: T) -> Unit<T> {
        Unit { state, ticket: self.ticket }
    }
}
impl Unit<Declared> {
    pub fn declare(declaration: Declaration, ticket: Ticket) -> Self {
        Self { state: Declared { declaration }, ticket }
    }

    pub fn downloaded(self, download: Arc<Download>) -> Unit<Downloaded> {
        let declaration = self.state.declaration.clone();
        self.advance(Downloaded { declaration, download })
    }
}
impl Unit<Downloaded> {
    pub fn parsed(self, content: Content, edges: Vec<Edge>) -> Unit<Parsed> {
        let download = Some(Arc::clone(&self.state.download));
        self.advance(Parsed { content, edges, download })
    }
}
impl Unit<Parsed> {
    /// A unit derived from another one in the same stage, such as the tag
    /// found alongside the manifest it points at.
    pub fn derived(content: Content, edges: Vec<Edge>, ticket: Ticket) -> Self {
        Self { state: Parsed { content, edges, download: None }, ticket }
    }

    pub fn stored(self, saved: Saved) -> Unit<Stored> {
        let Parsed { content, edges, download } = self.state;
        let stored = Stored {
            kind: content.kind(),
            key: content.natural_key(),
            digest: content.digest().cloned(),
            saved,
            edges,
            download,
        };
        Unit { state: stored, ticket: self.ticket }
    }
}
impl Unit<Stored> {
    /// Leave the pipeline, releasing the unit's in-flight ticket.
    pub fn finish(self) -> Finished {
        let Stored { kind, key, digest, saved, edges, .. } = self.state;
        Finished { kind, key, digest, id: saved.id, created: saved.created, edges }
    }
}

/// What a pass remembers about a unit once it has left the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub kind: ContentKind,
    pub key: NaturalKey,
    pub digest: Option<Digest>,
    pub id: ContentId,
    pub created: bool,
    pub edges: Vec<Edge>,
}
