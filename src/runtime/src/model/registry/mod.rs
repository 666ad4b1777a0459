//! Remote registry abstraction.
//!
//! The synchronizer talks to registries through [`RegistryTransport`]; a
//! [`RegistryConnector`] hands out one transport per model repository.
//! [`OciConnector`] speaks the OCI distribution protocol and
//! [`InMemoryRegistry`] keeps everything in process.

mod memory;
mod oci;

pub use memory::InMemoryRegistry;
pub use oci::{OciConnector, OciTransport};

use std::collections::BTreeMap;
use std::sync::Arc;

use a3s_model_core::digest::Digest;
use a3s_model_core::error::Result;
use a3s_model_core::manifest::{media_type, Descriptor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use super::reference::ModelPath;

/// Blob content handed to [`RegistryTransport::push`].
pub type BlobReader = Box<dyn AsyncRead + Unpin + Send + Sync>;

/// Content of the OCI empty JSON blob.
pub const EMPTY_JSON: &[u8] = b"{}";

/// Registry-native index published under a tag.
///
/// An OCI image manifest whose `artifactType` marks it as a model and whose
/// layers are every model blob followed by the model manifest blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryIndex {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl RegistryIndex {
    /// Index for a model: `layers` in section order, then the manifest blob.
    pub fn for_model(layers: impl IntoIterator<Item = Descriptor>, manifest: Descriptor) -> Self {
        let mut all: Vec<Descriptor> = layers.into_iter().collect();
        all.push(manifest);
        Self {
            schema_version: 2,
            media_type: Some(media_type::OCI_IMAGE_MANIFEST.to_string()),
            artifact_type: Some(media_type::MODEL_MANIFEST.to_string()),
            config: empty_config(),
            layers: all,
            annotations: None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// The model manifest layer, if the index carries one.
    pub fn model_manifest(&self) -> Option<&Descriptor> {
        self.layers
            .iter()
            .find(|d| d.media_type == media_type::MODEL_MANIFEST)
    }
}

/// Descriptor of the empty JSON placeholder used as the index config.
pub fn empty_config() -> Descriptor {
    Descriptor::from_bytes(media_type::OCI_EMPTY_JSON, EMPTY_JSON)
}

/// A tag resolved to its index.
#[derive(Debug, Clone)]
pub struct ResolvedIndex {
    /// Digest of the index document
    pub digest: Digest,
    pub index: RegistryIndex,
}

/// Blob and tag operations against one model repository.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Resolve a tag to its index.
    async fn resolve(&self, tag: &str) -> Result<ResolvedIndex>;

    /// Whether the registry already holds the blob.
    async fn exists(&self, descriptor: &Descriptor) -> Result<bool>;

    /// Stream the blob's bytes into `out`.
    async fn fetch(
        &self,
        descriptor: &Descriptor,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()>;

    /// Upload one blob, streaming it from `blob`.
    ///
    /// `descriptor` carries the expected digest and size; the registry
    /// rejects content that does not match.
    async fn push(&self, descriptor: &Descriptor, blob: BlobReader) -> Result<()>;

    /// Publish an index under `tag`, returning the index digest.
    async fn push_tagged(&self, tag: &str, index: Vec<u8>) -> Result<Digest>;
}

/// Maps a model path to the transport for its repository.
#[async_trait]
pub trait RegistryConnector: Send + Sync {
    async fn connect(&self, path: &ModelPath) -> Result<Arc<dyn RegistryTransport>>;
}
