//! SQLite content store for mirrored registry content.
//!
//! This crate owns every durable row a sync produces:
//! - **Content**: tags, manifest lists, image manifests and blobs, one row per
//!   `(kind, natural key)` no matter how often or how concurrently a unit is
//!   saved.
//! - **Associations**: tag→target, list→platform manifests and
//!   manifest→config/layers, written only once both ends exist.
//! - **Artifacts**: where downloaded bytes live in storage and which remote
//!   URL they came from.
//! - **Repository versions**: immutable snapshots of the content reachable
//!   from a set of tags, plus where each tag pointed at the time.

mod db;
pub mod error;
pub mod models;
mod repo;
mod store;

pub use crate::db::Database;
pub use crate::repo::Repository;
pub use crate::store::{ContentStore, StoreHandle};
