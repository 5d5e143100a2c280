//! # skiff-manifest
//!
//! The content model of a container registry and the decoding of its JSON
//! documents.
//!
//! A registry graph has three tiers below the tag that names it: a manifest
//! list (or OCI index) points at per-platform image manifests, and each image
//! manifest points at a config blob and an ordered list of layer blobs. Every
//! tier is addressed by a `sha256` [`Digest`](models::Digest) of its bytes.
//!
//! [`parse_manifest`] turns downloaded bytes into a [`Content`](models::Content)
//! draft whose [`children`](models::Content::children) are the references the
//! next tier down must fetch.

pub mod error;
pub mod models;
mod parse;

pub use crate::parse::parse_manifest;
