//! Model packaging.
//!
//! Recipes are built into content-addressed blobs and a manifest inside a
//! [`ModelStore`]; [`ModelSync`] moves them to and from registries and
//! [`unpack`] restores the packaged files.

pub mod archive;
pub mod build;
pub mod descriptor;
pub mod reference;
pub mod registry;
pub mod store;
pub mod sync;
pub mod unpack;

pub use build::{BuildResult, ModelBuilder, Recipe};
pub use descriptor::{DescriptorBuilder, PendingBlob};
pub use reference::ModelPath;
pub use registry::{
    BlobReader, InMemoryRegistry, OciConnector, RegistryConnector, RegistryTransport,
};
pub use store::{CommitOutcome, ManifestEntry, ModelStore};
pub use sync::{ModelSync, PullReport, PushReport};
pub use unpack::{unpack, UnpackReport};
