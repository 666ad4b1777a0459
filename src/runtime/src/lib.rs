//! A3S Model Runtime - model packaging engine.
//!
//! Builds models from recipes into a local content-addressed store, syncs
//! them with OCI registries and unpacks them into working directories.

#![allow(clippy::result_large_err)]

pub mod model;

// Re-export common types
pub use model::{
    unpack, BlobReader, BuildResult, CommitOutcome, DescriptorBuilder, InMemoryRegistry,
    ManifestEntry, ModelBuilder, ModelPath, ModelStore, ModelSync, OciConnector, PendingBlob,
    PullReport, PushReport, Recipe, RegistryConnector, RegistryTransport, UnpackReport,
};

/// A3S Model Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
