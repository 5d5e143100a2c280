//! Registry client speaking the HTTP distribution API (`/v2/`).

use std::time::Duration;

use async_trait::async_trait;
use exn::ResultExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, LINK};
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use skiff_manifest::models::{Digest, MediaType};
use tracing::{debug, instrument};

use crate::client::{Fetched, RegistryClient, TagPage, Target};
use crate::error::{ErrorKind, Result};

const DIGEST_HEADER: &str = "docker-content-digest";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Anonymous HTTP(S) registry client.
///
/// ```no_run
/// use skiff_registry::{HttpRegistry, RegistryClient};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = HttpRegistry::new("hub", "https://registry-1.docker.io", Duration::from_secs(60))?;
/// let tags = registry.list_tags("library/alpine").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HttpRegistry {
    name: String,
    base: Url,
    client: Client,
}
impl HttpRegistry {
    pub fn new(name: impl Into<String>, url: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(url).or_raise(|| ErrorKind::InvalidUrl(url.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            exn::bail!(ErrorKind::InvalidUrl(url.to_string()));
        }
        // Joining relative paths onto a base without a trailing slash would
        // replace its last path segment.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .or_raise(|| ErrorKind::InvalidUrl(url.to_string()))?;
        Ok(Self { name: name.into(), base, client })
    }

    fn endpoint(&self, repository: &str, path: &str) -> Result<Url> {
        let relative = format!("v2/{}/{path}", repository.trim_matches('/'));
        self.base.join(&relative).or_raise(|| ErrorKind::InvalidUrl(relative))
    }

    async fn send(&self, url: &Url, accept: Option<&str>) -> Result<Response> {
        let mut request = self.client.get(url.clone());
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        let response = request.send().await.or_raise(|| ErrorKind::Transient(url.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        debug!(%url, %status, "registry request failed");
        match status {
            StatusCode::NOT_FOUND => exn::bail!(ErrorKind::NotFound(url.to_string())),
            StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
                exn::bail!(ErrorKind::Transient(format!("{status} from {url}")))
            },
            status if status.is_server_error() => exn::bail!(ErrorKind::Transient(format!("{status} from {url}"))),
            status => exn::bail!(ErrorKind::Http(status.as_u16())),
        }
    }
}

/// Extract the `rel="next"` target of a `Link` header.
fn next_link(headers: &HeaderMap) -> Option<String> {
    headers.get_all(LINK).iter().filter_map(|value| value.to_str().ok()).flat_map(|value| value.split(',')).find_map(
        |link| {
            let (target, params) = link.split_once(';')?;
            let is_next = params.split(';').any(|param| {
                param.trim().strip_prefix("rel=").is_some_and(|rel| rel.trim_matches('"').eq_ignore_ascii_case("next"))
            });
            let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
            is_next.then(|| target.to_string())
        },
    )
}

fn manifest_accept() -> String {
    MediaType::MANIFEST_ACCEPT.iter().map(MediaType::as_str).collect::<Vec<_>>().join(", ")
}

#[async_trait]
impl RegistryClient for HttpRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    fn url_for(&self, repository: &str, target: &Target) -> Result<String> {
        Ok(self.endpoint(repository, &target.to_string())?.to_string())
    }

    /// The cursor is the absolute URL of the next page, taken from the
    /// `Link` header of the previous response.
    #[instrument(skip(self), fields(remote = %self.name))]
    async fn list_tags_page(&self, repository: &str, cursor: Option<&str>) -> Result<TagPage> {
        let url = match cursor {
            Some(next) => Url::parse(next).or_raise(|| ErrorKind::InvalidUrl(next.to_string()))?,
            None => self.endpoint(repository, "tags/list")?,
        };
        let response = self.send(&url, None).await?;
        let next = next_link(response.headers())
            .map(|link| url.join(&link).or_raise(|| ErrorKind::InvalidResponse(format!("bad Link header: {link}"))))
            .transpose()?;
        let body = response.bytes().await.or_raise(|| ErrorKind::Transient(url.to_string()))?;
        let list: TagList =
            serde_json::from_slice(&body).or_raise(|| ErrorKind::InvalidResponse(format!("tag list from {url}")))?;
        let tags = list.tags.unwrap_or_default();
        debug!(%url, count = tags.len(), "listed tag page");
        Ok(TagPage { tags, next: next.map(String::from) })
    }

    #[instrument(skip(self, target), fields(remote = %self.name, what = %target))]
    async fn fetch(&self, repository: &str, target: &Target) -> Result<Fetched> {
        let url = self.endpoint(repository, &target.to_string())?;
        let accept = match target {
            Target::Manifest(_) => Some(manifest_accept()),
            Target::Blob(_) => None,
        };
        let response = self.send(&url, accept.as_deref()).await?;
        let headers = response.headers();
        let media_type = headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()).map(String::from);
        let digest = headers
            .get(DIGEST_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<Digest>().ok());
        let bytes = response.bytes().await.or_raise(|| ErrorKind::Transient(url.to_string()))?;
        debug!(size = bytes.len(), ?media_type, "fetched");
        Ok(Fetched { bytes: bytes.to_vec(), media_type, digest })
    }
}
