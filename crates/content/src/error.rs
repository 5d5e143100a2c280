//! Content store error types.

use derive_more::{Display, Error};
use skiff_manifest::error::Error as ManifestError;

/// A content store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for content store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// A row could not be converted to or from its model.
    #[display("invalid content data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// An association or version would break the content graph's rules, such
    /// as pointing a tag at a blob.
    #[display("constraint violated: {_0}")]
    Constraint(#[error(not(source))] String),
}

impl ErrorKind {
    /// Wrap a model parsing failure as [`ErrorKind::InvalidData`], keeping the
    /// manifest crate's frame as a child in the error tree.
    #[track_caller]
    pub(crate) fn invalid(err: ManifestError, what: &'static str) -> Error {
        err.raise(ErrorKind::InvalidData(what))
    }

    /// Returns `true` if retrying might succeed.
    ///
    /// SQLite reports contention as `SQLITE_BUSY` once the busy timeout has
    /// elapsed; that surfaces here as [`ErrorKind::Database`] and is not
    /// retried at this layer.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
