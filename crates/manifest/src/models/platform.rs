use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::Deserialize;

use super::{Digest, MediaType};

/// The platform an image manifest inside a manifest list was built for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default, rename = "os.version")]
    pub os_version: Option<String>,
}
impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{variant}")?;
        }
        Ok(())
    }
}

/// A typed reference from one document to another piece of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub media_type: MediaType,
    pub digest: Digest,
    pub size: u64,
    /// Alternate download locations (foreign layers).
    pub urls: Vec<String>,
}

/// One `(platform, manifest)` entry of a manifest list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformEntry {
    pub manifest: Descriptor,
    /// OCI indexes may omit the platform.
    pub platform: Option<Platform>,
}
