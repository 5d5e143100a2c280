use exn::ResultExt;
use serde::Deserialize;
use serde::de::IgnoredAny;
use tracing::{debug, instrument};

use crate::error::{ErrorKind, Result};
use crate::models::{Content, Descriptor, Digest, ImageManifest, ManifestList, MediaType, Platform, PlatformEntry};

/// Just enough of a document to tell what it is.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Probe {
    schema_version: Option<u32>,
    media_type: Option<String>,
    manifests: Option<IgnoredAny>,
    config: Option<IgnoredAny>,
    layers: Option<IgnoredAny>,
    signatures: Option<IgnoredAny>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDescriptor {
    media_type: Option<String>,
    digest: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    urls: Vec<String>,
    #[serde(default)]
    platform: Option<Platform>,
}
impl WireDescriptor {
    fn into_descriptor(self, fallback: &MediaType) -> Result<(Descriptor, Option<Platform>)> {
        let media_type = self.media_type.as_deref().map_or_else(|| fallback.clone(), MediaType::parse);
        let descriptor =
            Descriptor { media_type, digest: self.digest.parse()?, size: self.size, urls: self.urls };
        Ok((descriptor, self.platform))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIndex {
    schema_version: u32,
    manifests: Vec<WireDescriptor>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireManifest {
    schema_version: u32,
    config: Option<WireDescriptor>,
    #[serde(default)]
    layers: Vec<WireDescriptor>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSchema1 {
    #[serde(default)]
    fs_layers: Vec<WireFsLayer>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFsLayer {
    blob_sum: String,
}

/// Decode a manifest or manifest list.
///
/// The format is taken from `content_type` when it names a manifest type, and
/// otherwise sniffed from the document (`mediaType`, then the presence of
/// `manifests`, then `schemaVersion`). The returned content's digest is
/// always computed from `bytes`; compare it to the expected digest with
/// [`Digest::verify`].
#[instrument(skip(bytes), fields(size = bytes.len()))]
pub fn parse_manifest(bytes: &[u8], content_type: Option<&str>) -> Result<Content> {
    let probe: Probe = serde_json::from_slice(bytes).or_raise(|| ErrorKind::InvalidJson)?;
    let media_type = detect(content_type, &probe)?;
    let digest = Digest::of(bytes);
    debug!(%digest, %media_type, "parsing manifest");
    if media_type.is_manifest_list() {
        parse_list(bytes, digest, media_type).map(Content::ManifestList)
    } else if media_type.is_schema1() {
        parse_schema1(bytes, digest, media_type).map(Content::ImageManifest)
    } else {
        parse_image(bytes, digest, media_type).map(Content::ImageManifest)
    }
}

fn detect(content_type: Option<&str>, probe: &Probe) -> Result<MediaType> {
    if let Some(media_type) = content_type.map(MediaType::parse).filter(MediaType::is_manifest) {
        return Ok(media_type);
    }
    if let Some(declared) = probe.media_type.as_deref().map(MediaType::parse) {
        if declared.is_manifest() {
            return Ok(declared);
        }
        exn::bail!(ErrorKind::UnsupportedMediaType(declared.to_string()));
    }
    match probe.schema_version {
        Some(1) if probe.signatures.is_some() => Ok(MediaType::DockerManifestV1Signed),
        Some(1) => Ok(MediaType::DockerManifestV1),
        Some(2) if probe.manifests.is_some() => Ok(MediaType::OciIndex),
        Some(2) if probe.config.is_some() || probe.layers.is_some() => Ok(MediaType::OciManifest),
        Some(2) => exn::bail!(ErrorKind::UnsupportedMediaType(content_type.unwrap_or("unknown").to_string())),
        Some(other) => exn::bail!(ErrorKind::UnsupportedSchemaVersion(other)),
        None => exn::bail!(ErrorKind::MissingField("schemaVersion")),
    }
}

fn parse_list(bytes: &[u8], digest: Digest, media_type: MediaType) -> Result<ManifestList> {
    let wire: WireIndex = serde_json::from_slice(bytes).or_raise(|| ErrorKind::InvalidJson)?;
    if wire.schema_version != 2 {
        exn::bail!(ErrorKind::UnsupportedSchemaVersion(wire.schema_version));
    }
    let fallback = match media_type {
        MediaType::OciIndex => MediaType::OciManifest,
        _ => MediaType::DockerManifest,
    };
    let entries = wire
        .manifests
        .into_iter()
        .map(|entry| {
            let (manifest, platform) = entry.into_descriptor(&fallback)?;
            if manifest.media_type.is_manifest_list() {
                exn::bail!(ErrorKind::NestedIndex(manifest.digest.to_string()));
            }
            if !manifest.media_type.is_image_manifest() {
                exn::bail!(ErrorKind::UnsupportedMediaType(manifest.media_type.to_string()));
            }
            Ok(PlatformEntry { manifest, platform })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ManifestList { digest, media_type, schema_version: wire.schema_version, entries })
}

fn parse_image(bytes: &[u8], digest: Digest, media_type: MediaType) -> Result<ImageManifest> {
    let wire: WireManifest = serde_json::from_slice(bytes).or_raise(|| ErrorKind::InvalidJson)?;
    if wire.schema_version != 2 {
        exn::bail!(ErrorKind::UnsupportedSchemaVersion(wire.schema_version));
    }
    let (config_fallback, layer_fallback) = match media_type {
        MediaType::OciManifest => (MediaType::OciConfig, MediaType::OciLayer),
        _ => (MediaType::DockerConfig, MediaType::DockerLayer),
    };
    let config = match wire.config {
        Some(config) => Some(config.into_descriptor(&config_fallback)?.0),
        None => {
            debug!("manifest has no config blob");
            None
        },
    };
    let layers = wire
        .layers
        .into_iter()
        .map(|layer| layer.into_descriptor(&layer_fallback).map(|(descriptor, _)| descriptor))
        .collect::<Result<Vec<_>>>()?;
    Ok(ImageManifest { digest, media_type, schema_version: wire.schema_version, config, layers })
}

/// Schema 1 manifests embed their config as history strings and list layers
/// top-most first, without media types or sizes. Only the layers survive.
fn parse_schema1(bytes: &[u8], digest: Digest, media_type: MediaType) -> Result<ImageManifest> {
    let wire: WireSchema1 = serde_json::from_slice(bytes).or_raise(|| ErrorKind::InvalidJson)?;
    debug!(layers = wire.fs_layers.len(), "falling back to schema 1 layer list");
    let layers = wire
        .fs_layers
        .into_iter()
        .rev()
        .map(|layer| {
            Ok(Descriptor { media_type: MediaType::DockerLayer, digest: layer.blob_sum.parse()?, size: 0, urls: Vec::new() })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ImageManifest { digest, media_type, schema_version: 1, config: None, layers })
}
