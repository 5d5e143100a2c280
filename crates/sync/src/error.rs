//! Sync Error Types
//!
//! Terminal failures carry the natural key and pipeline stage they happened
//! in, with the underlying registry, storage or store error kept as a child
//! frame of the error tree.

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// Where in the pipeline a unit failed.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    #[display("discovery")]
    Discover,
    #[display("download")]
    Download,
    #[display("parse")]
    Parse,
    #[display("save")]
    Save,
    #[display("record")]
    Record,
    #[display("interrelate")]
    Relate,
    #[display("finalize")]
    Finalize,
}

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The task cannot start: unknown remote, missing URL, bad settings.
    #[display("configuration error: {_0}")]
    Configuration(#[error(not(source))] String),
    /// The remote does not have the upstream repository.
    #[display("remote repository not found: {_0}")]
    RemoteNotFound(#[error(not(source))] String),
    /// The remote failed for a reason other than a missing target.
    #[display("registry request failed for {key} during {stage}")]
    Registry { key: String, stage: Stage },
    /// Fetching a target failed for good, retries included, or the remote
    /// does not have a child its parent refers to.
    #[display("could not download {key} during {stage}")]
    Download { key: String, stage: Stage },
    #[display("artifact storage failed for {key} during {stage}")]
    Storage { key: String, stage: Stage },
    #[display("content store failed for {key} during {stage}")]
    Content { key: String, stage: Stage },
    /// The bytes of a unit are not what its reference promised.
    #[display("integrity check failed for {key} during {stage}")]
    Integrity { key: String, stage: Stage },
    /// The bytes are the right ones but not a document we can use.
    #[display("could not parse {_0}")]
    Parse(#[error(not(source))] String),
    /// A parent refers to a child that was never saved.
    #[display("unresolved reference from {parent} to {child}")]
    Unresolved { parent: String, child: String },
    #[display("sync cancelled")]
    Cancelled,
}
impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// Transient registry failures are already retried where they happen, so
    /// by the time one surfaces here it is final.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Failures confined to one unit, which the integrity policy may skip.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Integrity { .. } | Self::Parse(_))
    }

    /// The natural key and stage of a failure tied to one unit.
    pub fn location(&self) -> Option<(&str, Stage)> {
        match self {
            Self::Registry { key, stage }
            | Self::Download { key, stage }
            | Self::Storage { key, stage }
            | Self::Content { key, stage }
            | Self::Integrity { key, stage } => Some((key, *stage)),
            _ => None,
        }
    }
}
