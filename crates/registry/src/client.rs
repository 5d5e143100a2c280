use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;

use async_trait::async_trait;
use skiff_manifest::models::Digest;

use crate::error::Result;

pub type RegistryHandle = Arc<dyn RegistryClient + Send + Sync>;

/// How a manifest is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Tag(String),
    Digest(Digest),
}
impl Display for Reference {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Tag(tag) => f.write_str(tag),
            Self::Digest(digest) => write!(f, "{digest}"),
        }
    }
}

/// Something that can be fetched from a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Manifest(Reference),
    Blob(Digest),
}
impl Display for Target {
    /// The path of the target below `/v2/<repository>/`.
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Manifest(reference) => write!(f, "manifests/{reference}"),
            Self::Blob(digest) => write!(f, "blobs/{digest}"),
        }
    }
}

/// The bytes of a fetched manifest or blob.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    /// The `Content-Type` the registry served the bytes with.
    pub media_type: Option<String>,
    /// The `Docker-Content-Digest` the registry claimed. Never trusted on its
    /// own; callers recompute the digest from `bytes`.
    pub digest: Option<Digest>,
}

/// One page of a repository's tag list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagPage {
    pub tags: Vec<String>,
    /// Opaque cursor for the following page; `None` on the last page.
    pub next: Option<String>,
}

/// A remote container registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Name of the configured remote, for logging.
    fn name(&self) -> &str;

    /// The URL a target is fetched from.
    fn url_for(&self, repository: &str, target: &Target) -> Result<String>;

    /// Fetch one page of the tag list of `repository`. Pass `None` for the
    /// first page and the previous page's [`next`](TagPage::next) cursor for
    /// the rest. Each page is a separate request, so a failed page can be
    /// retried on its own.
    ///
    /// A missing repository surfaces as
    /// [`NotFound`](crate::error::ErrorKind::NotFound).
    async fn list_tags_page(&self, repository: &str, cursor: Option<&str>) -> Result<TagPage>;

    /// Every tag of `repository`, following pagination to the end.
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let mut tags = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.list_tags_page(repository, cursor.as_deref()).await?;
            tags.extend(page.tags);
            match page.next {
                Some(next) => cursor = Some(next),
                None => return Ok(tags),
            }
        }
    }

    /// Fetch a manifest or blob. Manifests are requested with every manifest
    /// media type skiff understands.
    async fn fetch(&self, repository: &str, target: &Target) -> Result<Fetched>;
}
