//! # skiff-storage
//!
//! Where downloaded artifacts (manifest and blob bytes) live. Artifacts are
//! stored content-addressably under [`artifact_path`], so writing the same
//! digest twice is harmless and "already downloaded" is a single
//! [`exists`](StorageBackend::exists) check.

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::models::FileInfo;
pub use crate::path::{artifact_path, validate as validate_path};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
