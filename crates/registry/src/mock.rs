//! In-memory registry for testing.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use exn::OptionExt;
use skiff_manifest::models::{Digest, MediaType};

use crate::client::{Fetched, Reference, RegistryClient, TagPage, Target};
use crate::error::{ErrorKind, Result};

#[derive(Default)]
struct State {
    tags: BTreeMap<String, Digest>,
    /// Tags that are listed but whose manifest has vanished.
    dangling: Vec<String>,
    manifests: HashMap<Digest, (Vec<u8>, MediaType)>,
    blobs: HashMap<Digest, Vec<u8>>,
    /// Bytes served in place of the real content for a digest.
    corrupted: HashMap<Digest, Vec<u8>>,
    /// Remaining transient failures per target.
    flaky: HashMap<Target, usize>,
    fetches: HashMap<Target, usize>,
    /// Remaining transient failures of tag list pages.
    flaky_tag_pages: usize,
    tag_page_requests: usize,
}

/// In-memory registry serving a single repository.
///
/// Content is registered up front with the `with_*` builders; tags can be
/// repointed, content corrupted and failures injected at any time through
/// `&self`, so one instance can back several syncs in a test.
///
/// ```
/// use skiff_registry::{MockRegistry, RegistryClient, Target};
/// use skiff_manifest::models::{Digest, MediaType};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let registry = MockRegistry::new("library/alpine").with_blob(b"layer".to_vec());
/// let fetched = registry.fetch("library/alpine", &Target::Blob(Digest::of(b"layer"))).await.unwrap();
/// assert_eq!(fetched.bytes, b"layer");
/// # }
/// ```
pub struct MockRegistry {
    name: String,
    repository: String,
    page_size: usize,
    latency: Option<Duration>,
    state: Mutex<State>,
}
impl MockRegistry {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            name: "mock".to_string(),
            repository: repository.into(),
            page_size: 100,
            latency: None,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Split tag listing into pages of `size` tags.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Delay every request, to widen race windows in concurrency tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Register a manifest (or manifest list) and return its digest.
    pub fn add_manifest(&self, bytes: impl Into<Vec<u8>>, media_type: MediaType) -> Digest {
        let bytes = bytes.into();
        let digest = Digest::of(&bytes);
        self.lock().manifests.insert(digest.clone(), (bytes, media_type));
        digest
    }

    pub fn with_manifest(self, bytes: impl Into<Vec<u8>>, media_type: MediaType) -> Self {
        self.add_manifest(bytes, media_type);
        self
    }

    /// Register a manifest and point tag `name` at it.
    pub fn with_tag(self, name: impl Into<String>, bytes: impl Into<Vec<u8>>, media_type: MediaType) -> Self {
        let digest = self.add_manifest(bytes, media_type);
        self.retag(name, digest);
        self
    }

    /// List tag `name` without serving a manifest for it.
    pub fn with_dangling_tag(self, name: impl Into<String>) -> Self {
        self.lock().dangling.push(name.into());
        self
    }

    pub fn with_blob(self, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        self.lock().blobs.insert(Digest::of(&bytes), bytes);
        self
    }

    /// Point tag `name` at `digest`, which must already be registered.
    pub fn retag(&self, name: impl Into<String>, digest: Digest) {
        self.lock().tags.insert(name.into(), digest);
    }

    /// Serve `bytes` whenever `digest` is requested, by tag or by digest.
    pub fn corrupt(&self, digest: &Digest, bytes: impl Into<Vec<u8>>) {
        self.lock().corrupted.insert(digest.clone(), bytes.into());
    }

    /// Fail the next `times` fetches of `target` with a transient error.
    pub fn fail_transiently(&self, target: Target, times: usize) {
        self.lock().flaky.insert(target, times);
    }

    /// Fail the next `times` tag list page requests with a transient error.
    pub fn fail_tag_list_transiently(&self, times: usize) {
        self.lock().flaky_tag_pages = times;
    }

    /// How many tag list pages have been requested, failures included.
    pub fn tag_page_requests(&self) -> usize {
        self.lock().tag_page_requests
    }

    /// How many times `target` has been requested, failures included.
    pub fn fetch_count(&self, target: &Target) -> usize {
        self.lock().fetches.get(target).copied().unwrap_or_default()
    }

    pub fn total_fetches(&self) -> usize {
        self.lock().fetches.values().sum()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_repository(&self, repository: &str) -> Result<()> {
        if repository != self.repository {
            exn::bail!(ErrorKind::NotFound(format!("repository {repository}")));
        }
        Ok(())
    }

    fn lookup(&self, target: &Target) -> Result<Fetched> {
        let mut state = self.lock();
        *state.fetches.entry(target.clone()).or_default() += 1;
        if let Some(remaining) = state.flaky.get_mut(target)
            && *remaining > 0
        {
            *remaining -= 1;
            exn::bail!(ErrorKind::Transient(format!("injected failure for {target}")));
        }
        let not_found = || ErrorKind::NotFound(target.to_string());
        let (digest, media_type, bytes) = match target {
            Target::Manifest(reference) => {
                let digest = match reference {
                    Reference::Tag(name) => state.tags.get(name).cloned().ok_or_raise(not_found)?,
                    Reference::Digest(digest) => digest.clone(),
                };
                let (bytes, media_type) = state.manifests.get(&digest).ok_or_raise(not_found)?;
                (digest, Some(media_type.to_string()), bytes.clone())
            },
            Target::Blob(digest) => {
                let bytes = state.blobs.get(digest).ok_or_raise(not_found)?;
                (digest.clone(), None, bytes.clone())
            },
        };
        let bytes = state.corrupted.get(&digest).cloned().unwrap_or(bytes);
        Ok(Fetched { bytes, media_type, digest: Some(digest) })
    }

    /// The cursor is the index of the first tag of the page.
    fn page(&self, cursor: Option<&str>) -> Result<TagPage> {
        let mut state = self.lock();
        state.tag_page_requests += 1;
        if state.flaky_tag_pages > 0 {
            state.flaky_tag_pages -= 1;
            exn::bail!(ErrorKind::Transient("injected tag list failure".to_string()));
        }
        let start = match cursor {
            Some(cursor) => {
                cursor.parse::<usize>().ok().ok_or_raise(|| ErrorKind::InvalidResponse(format!("cursor {cursor}")))?
            },
            None => 0,
        };
        let listed = state.tags.len() + state.dangling.len();
        let tags: Vec<String> = state
            .tags
            .keys()
            .chain(state.dangling.iter())
            .skip(start)
            .take(self.page_size)
            .cloned()
            .collect();
        let end = start + tags.len();
        let next = (end < listed).then(|| end.to_string());
        Ok(TagPage { tags, next })
    }
}

#[async_trait]
impl RegistryClient for MockRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    fn url_for(&self, repository: &str, target: &Target) -> Result<String> {
        Ok(format!("mock://{}/v2/{repository}/{target}", self.name))
    }

    async fn list_tags_page(&self, repository: &str, cursor: Option<&str>) -> Result<TagPage> {
        self.check_repository(repository)?;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.page(cursor)
    }

    async fn fetch(&self, repository: &str, target: &Target) -> Result<Fetched> {
        self.check_repository(repository)?;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.lookup(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPO: &str = "library/alpine";

    #[tokio::test]
    async fn test_lists_tags_across_pages() {
        let registry = MockRegistry::new(REPO)
            .with_page_size(2)
            .with_tag("a", b"{}".to_vec(), MediaType::DockerManifest)
            .with_tag("b", b"{ }".to_vec(), MediaType::DockerManifest)
            .with_tag("c", b"{  }".to_vec(), MediaType::DockerManifest)
            .with_dangling_tag("gone");
        let first = registry.list_tags_page(REPO, None).await.unwrap();
        assert_eq!(first.tags, vec!["a", "b"]);
        let second = registry.list_tags_page(REPO, first.next.as_deref()).await.unwrap();
        assert_eq!(second, TagPage { tags: vec!["c".into(), "gone".into()], next: None });
        assert_eq!(registry.list_tags(REPO).await.unwrap(), vec!["a", "b", "c", "gone"]);
        assert_eq!(registry.tag_page_requests(), 4);
    }

    #[tokio::test]
    async fn test_tag_list_failures_then_success() {
        let registry = MockRegistry::new(REPO).with_tag("a", b"{}".to_vec(), MediaType::DockerManifest);
        registry.fail_tag_list_transiently(1);
        let err = registry.list_tags_page(REPO, None).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(registry.list_tags(REPO).await.unwrap(), vec!["a"]);
        assert_eq!(registry.tag_page_requests(), 2);
    }

    #[tokio::test]
    async fn test_empty_repository_lists_one_empty_page() {
        let registry = MockRegistry::new(REPO);
        assert_eq!(registry.list_tags_page(REPO, None).await.unwrap(), TagPage::default());
    }

    #[tokio::test]
    async fn test_unknown_repository() {
        let registry = MockRegistry::new(REPO);
        let err = registry.list_tags("library/nope").await.unwrap_err();
        assert!(err.is_not_found());
        let err = registry.fetch("library/nope", &Target::Blob(Digest::of(b""))).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_fetch_by_tag_and_digest() {
        let registry = MockRegistry::new(REPO).with_tag("latest", b"manifest".to_vec(), MediaType::OciManifest);
        let by_tag = registry.fetch(REPO, &Target::Manifest(Reference::Tag("latest".into()))).await.unwrap();
        let digest = by_tag.digest.clone().unwrap();
        assert_eq!(digest, Digest::of(b"manifest"));
        assert_eq!(by_tag.media_type.as_deref(), Some(MediaType::OciManifest.as_str()));
        let by_digest = registry.fetch(REPO, &Target::Manifest(Reference::Digest(digest))).await.unwrap();
        assert_eq!(by_digest.bytes, b"manifest");
    }

    #[tokio::test]
    async fn test_dangling_tag_is_not_found() {
        let registry = MockRegistry::new(REPO).with_dangling_tag("gone");
        let err = registry.fetch(REPO, &Target::Manifest(Reference::Tag("gone".into()))).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_injected_failures_then_success() {
        let registry = MockRegistry::new(REPO).with_blob(b"layer".to_vec());
        let target = Target::Blob(Digest::of(b"layer"));
        registry.fail_transiently(target.clone(), 2);
        for _ in 0..2 {
            let err = registry.fetch(REPO, &target).await.unwrap_err();
            assert!(err.is_retryable());
        }
        assert!(registry.fetch(REPO, &target).await.is_ok());
        assert_eq!(registry.fetch_count(&target), 3);
    }

    #[tokio::test]
    async fn test_corrupted_bytes_keep_claimed_digest() {
        let registry = MockRegistry::new(REPO).with_blob(b"layer".to_vec());
        let digest = Digest::of(b"layer");
        registry.corrupt(&digest, b"tampered".to_vec());
        let fetched = registry.fetch(REPO, &Target::Blob(digest.clone())).await.unwrap();
        assert_eq!(fetched.digest, Some(digest));
        assert_eq!(fetched.bytes, b"tampered");
    }
}
