mod content;
mod digest;
mod media_type;
mod platform;

pub use self::content::{
    Blob, ChildRef, Content, ContentKind, ImageManifest, ManifestList, NaturalKey, Role, Tag, TagKind,
    validate_tag_name,
};
pub use self::digest::Digest;
pub use self::media_type::MediaType;
pub use self::platform::{Descriptor, Platform, PlatformEntry};
