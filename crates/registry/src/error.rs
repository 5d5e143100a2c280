//! Registry Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Callers retry [`Transient`](ErrorKind::Transient) failures and treat every
/// other kind as final for the request that produced it.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The repository, tag, manifest or blob does not exist.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Connection failures, timeouts, throttling and server-side errors.
    #[display("transient registry failure: {_0}")]
    Transient(#[error(not(source))] String),
    /// Any other non-success HTTP status.
    #[display("registry responded with HTTP {_0}")]
    Http(#[error(not(source))] u16),
    /// The registry answered, but not with something we can use.
    #[display("invalid registry response: {_0}")]
    InvalidResponse(#[error(not(source))] String),
    #[display("invalid registry URL: {_0}")]
    InvalidUrl(#[error(not(source))] String),
}
impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
