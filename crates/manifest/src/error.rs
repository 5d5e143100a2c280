//! Manifest Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Every variant means the document itself is unusable; none are retryable.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bytes are not a JSON document of the expected shape.
    #[display("invalid manifest JSON")]
    InvalidJson,
    /// Neither the content type nor the document identify a known manifest format.
    #[display("unsupported media type: {_0}")]
    UnsupportedMediaType(#[error(not(source))] String),
    #[display("unsupported schema version: {_0}")]
    UnsupportedSchemaVersion(#[error(not(source))] u32),
    #[display("missing required field: {_0}")]
    MissingField(#[error(not(source))] &'static str),
    #[display("invalid digest: {_0}")]
    InvalidDigest(#[error(not(source))] String),
    /// The bytes hash to something other than the digest they were requested by.
    #[display("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
    /// A manifest list that points at another manifest list.
    #[display("nested manifest list: {_0}")]
    NestedIndex(#[error(not(source))] String),
    /// A stored content kind that is not one of the four known kinds.
    #[display("unknown content kind: {_0}")]
    UnknownContentKind(#[error(not(source))] String),
    #[display("invalid tag name: {_0:?}")]
    InvalidTagName(#[error(not(source))] String),
}
impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        false
    }
}
