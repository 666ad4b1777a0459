//! Process-local registry.

use std::collections::HashMap;
use std::sync::Arc;

use a3s_model_core::digest::{Digest, DigestHasher};
use a3s_model_core::error::{ModelError, Result};
use a3s_model_core::manifest::Descriptor;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{BlobReader, RegistryConnector, RegistryIndex, RegistryTransport, ResolvedIndex};

/// Read size used when draining an upload.
const UPLOAD_CHUNK: usize = 64 * 1024;
use crate::model::reference::ModelPath;

#[derive(Debug, Default)]
struct RegistryState {
    blobs: HashMap<Digest, Vec<u8>>,
    /// `registry/namespace/name:tag` → index bytes
    tags: HashMap<String, Vec<u8>>,
    uploads: usize,
    fetches: usize,
}

/// Registry held in memory, shared by every clone.
///
/// Blobs are global across repositories; tags are per repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blob uploads accepted so far.
    pub fn upload_count(&self) -> usize {
        self.state.lock().uploads
    }

    /// Number of blob fetches served so far.
    pub fn fetch_count(&self) -> usize {
        self.state.lock().fetches
    }

    pub fn blob_count(&self) -> usize {
        self.state.lock().blobs.len()
    }

    pub fn blob(&self, digest: &Digest) -> Option<Vec<u8>> {
        self.state.lock().blobs.get(digest).cloned()
    }

    /// Replace a stored blob's bytes without changing its key.
    pub fn corrupt_blob(&self, digest: &Digest, data: Vec<u8>) {
        self.state.lock().blobs.insert(digest.clone(), data);
    }

    /// Raw index bytes published for `path`.
    pub fn index(&self, path: &ModelPath) -> Option<Vec<u8>> {
        self.state.lock().tags.get(&path.full_tagname()).cloned()
    }

    fn repository(&self, path: &ModelPath) -> InMemoryRepository {
        InMemoryRepository {
            registry: self.clone(),
            repository: format!("{}/{}", path.registry, path.namespace_repository()),
        }
    }
}

#[async_trait]
impl RegistryConnector for InMemoryRegistry {
    async fn connect(&self, path: &ModelPath) -> Result<Arc<dyn RegistryTransport>> {
        Ok(Arc::new(self.repository(path)))
    }
}

/// One repository of an [`InMemoryRegistry`].
struct InMemoryRepository {
    registry: InMemoryRegistry,
    repository: String,
}

impl InMemoryRepository {
    fn error(&self, message: String) -> ModelError {
        ModelError::TransportError {
            registry: self.repository.clone(),
            message,
        }
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}:{}", self.repository, tag)
    }
}

#[async_trait]
impl RegistryTransport for InMemoryRepository {
    async fn resolve(&self, tag: &str) -> Result<ResolvedIndex> {
        let bytes = self
            .registry
            .state
            .lock()
            .tags
            .get(&self.tag_key(tag))
            .cloned()
            .ok_or_else(|| self.error(format!("manifest unknown: {}", tag)))?;
        Ok(ResolvedIndex {
            digest: Digest::of_bytes(&bytes),
            index: RegistryIndex::from_bytes(&bytes)?,
        })
    }

    async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        Ok(self
            .registry
            .state
            .lock()
            .blobs
            .contains_key(&descriptor.digest))
    }

    async fn fetch(
        &self,
        descriptor: &Descriptor,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()> {
        let data = {
            let mut state = self.registry.state.lock();
            state.fetches += 1;
            state.blobs.get(&descriptor.digest).cloned()
        }
        .ok_or_else(|| self.error(format!("blob unknown: {}", descriptor.digest)))?;

        out.write_all(&data)
            .await
            .map_err(|e| self.error(format!("write failed for {}: {}", descriptor.digest, e)))?;
        out.flush().await?;
        Ok(())
    }

    async fn push(&self, descriptor: &Descriptor, mut blob: BlobReader) -> Result<()> {
        let mut hasher = DigestHasher::new();
        let mut data = Vec::new();
        let mut chunk = vec![0u8; UPLOAD_CHUNK];
        loop {
            let n = blob.read(&mut chunk).await.map_err(|e| {
                self.error(format!("upload of {} failed: {}", descriptor.digest, e))
            })?;
            if n == 0 {
                break;
            }
            hasher.update(&chunk[..n]);
            data.extend_from_slice(&chunk[..n]);
        }

        let (actual, size) = hasher.finish();
        if actual != descriptor.digest || size != descriptor.size {
            return Err(self.error(format!(
                "digest invalid: expected {} ({} bytes), got {} ({} bytes)",
                descriptor.digest, descriptor.size, actual, size
            )));
        }
        let mut state = self.registry.state.lock();
        state.uploads += 1;
        state.blobs.insert(actual, data);
        Ok(())
    }

    async fn push_tagged(&self, tag: &str, index: Vec<u8>) -> Result<Digest> {
        // Reject an index that does not parse, as a real registry would.
        RegistryIndex::from_bytes(&index)?;
        let digest = Digest::of_bytes(&index);
        self.registry
            .state
            .lock()
            .tags
            .insert(self.tag_key(tag), index);
        Ok(digest)
    }
}
