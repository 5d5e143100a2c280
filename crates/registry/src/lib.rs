//! # skiff-registry
//!
//! Clients for the remote side of a sync: a [`RegistryClient`] lists a
//! repository's tags page by page and fetches manifests and blobs by tag or digest.
//!
//! - [`HttpRegistry`] talks to a real registry over the `/v2/` API.
//! - [`MockRegistry`] (feature `mock`) serves content from memory for tests.

mod client;
pub mod error;
mod http;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use crate::client::{Fetched, Reference, RegistryClient, RegistryHandle, TagPage, Target};
pub use crate::http::HttpRegistry;
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::MockRegistry;
