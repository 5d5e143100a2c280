use std::fmt::{Display, Formatter, Result as FmtResult};

/// Registry media types skiff recognizes.
///
/// Anything else is carried verbatim in [`MediaType::Other`] so a blob of an
/// unfamiliar type can still be mirrored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MediaType {
    DockerManifestList,
    DockerManifest,
    DockerManifestV1,
    DockerManifestV1Signed,
    OciIndex,
    OciManifest,
    DockerConfig,
    OciConfig,
    DockerLayer,
    DockerForeignLayer,
    OciLayer,
    OciForeignLayer,
    Other(String),
}
impl MediaType {
    /// Manifest types sent in the `Accept` header, most preferred first.
    pub const MANIFEST_ACCEPT: &'static [MediaType] = &[
        MediaType::DockerManifestList,
        MediaType::OciIndex,
        MediaType::DockerManifest,
        MediaType::OciManifest,
        MediaType::DockerManifestV1Signed,
        MediaType::DockerManifestV1,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::DockerManifestList => "application/vnd.docker.distribution.manifest.list.v2+json",
            Self::DockerManifest => "application/vnd.docker.distribution.manifest.v2+json",
            Self::DockerManifestV1 => "application/vnd.docker.distribution.manifest.v1+json",
            Self::DockerManifestV1Signed => "application/vnd.docker.distribution.manifest.v1+prettyjws",
            Self::OciIndex => "application/vnd.oci.image.index.v1+json",
            Self::OciManifest => "application/vnd.oci.image.manifest.v1+json",
            Self::DockerConfig => "application/vnd.docker.container.image.v1+json",
            Self::OciConfig => "application/vnd.oci.image.config.v1+json",
            Self::DockerLayer => "application/vnd.docker.image.rootfs.diff.tar.gzip",
            Self::DockerForeignLayer => "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip",
            Self::OciLayer => "application/vnd.oci.image.layer.v1.tar+gzip",
            Self::OciForeignLayer => "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip",
            Self::Other(other) => other,
        }
    }

    /// Parse a media type or `Content-Type` header value. Parameters
    /// (`; charset=utf-8`) are ignored.
    pub fn parse(value: &str) -> Self {
        let essence = value.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "application/vnd.docker.distribution.manifest.list.v2+json" => Self::DockerManifestList,
            "application/vnd.docker.distribution.manifest.v2+json" => Self::DockerManifest,
            "application/vnd.docker.distribution.manifest.v1+json" => Self::DockerManifestV1,
            "application/vnd.docker.distribution.manifest.v1+prettyjws" => Self::DockerManifestV1Signed,
            "application/vnd.oci.image.index.v1+json" => Self::OciIndex,
            "application/vnd.oci.image.manifest.v1+json" => Self::OciManifest,
            "application/vnd.docker.container.image.v1+json" => Self::DockerConfig,
            "application/vnd.oci.image.config.v1+json" => Self::OciConfig,
            "application/vnd.docker.image.rootfs.diff.tar.gzip" => Self::DockerLayer,
            "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip" => Self::DockerForeignLayer,
            "application/vnd.oci.image.layer.v1.tar+gzip" => Self::OciLayer,
            "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip" => Self::OciForeignLayer,
            _ => Self::Other(essence.to_string()),
        }
    }

    pub fn is_manifest_list(&self) -> bool {
        matches!(self, Self::DockerManifestList | Self::OciIndex)
    }

    pub fn is_image_manifest(&self) -> bool {
        matches!(self, Self::DockerManifest | Self::OciManifest) || self.is_schema1()
    }

    pub fn is_schema1(&self) -> bool {
        matches!(self, Self::DockerManifestV1 | Self::DockerManifestV1Signed)
    }

    pub fn is_manifest(&self) -> bool {
        self.is_manifest_list() || self.is_image_manifest()
    }

    /// Non-distributable layers, hosted somewhere other than the registry.
    pub fn is_foreign_layer(&self) -> bool {
        matches!(self, Self::DockerForeignLayer | Self::OciForeignLayer)
    }
}
impl From<&str> for MediaType {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}
impl Display for MediaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("application/vnd.oci.image.index.v1+json", MediaType::OciIndex)]
    #[case("application/vnd.docker.distribution.manifest.v2+json; charset=utf-8", MediaType::DockerManifest)]
    #[case("Application/VND.Docker.Distribution.Manifest.List.V2+JSON", MediaType::DockerManifestList)]
    #[case("application/json", MediaType::Other("application/json".into()))]
    fn test_parse(#[case] input: &str, #[case] expected: MediaType) {
        assert_eq!(MediaType::parse(input), expected);
    }

    #[test]
    fn test_round_trips_known_types() {
        for media_type in MediaType::MANIFEST_ACCEPT {
            assert_eq!(&MediaType::parse(media_type.as_str()), media_type);
            assert!(media_type.is_manifest());
        }
    }

    #[test]
    fn test_classification() {
        assert!(MediaType::DockerForeignLayer.is_foreign_layer());
        assert!(!MediaType::DockerLayer.is_foreign_layer());
        assert!(MediaType::DockerManifestV1Signed.is_image_manifest());
        assert!(!MediaType::DockerConfig.is_manifest());
    }
}
