//! Registry synchronizer.
//!
//! Push uploads every blob the registry lacks, then the model manifest blob,
//! the empty config blob and finally the tagged index. Pull installs blobs
//! first and the model manifest last, so a manifest in the store always has
//! its blobs next to it.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use a3s_model_core::config::SyncOptions;
use a3s_model_core::digest::Digest;
use a3s_model_core::error::{ModelError, Result};
use a3s_model_core::manifest::{media_type, Descriptor, Manifest};
use futures::stream::{self, TryStreamExt};
use tokio::io::AsyncWriteExt;

use super::reference::ModelPath;
use super::registry::{
    empty_config, BlobReader, RegistryConnector, RegistryIndex, RegistryTransport, EMPTY_JSON,
};
use super::store::ModelStore;

/// Outcome of a push.
#[derive(Debug, Clone)]
pub struct PushReport {
    /// Blobs uploaded, model manifest and config placeholder included
    pub uploaded: usize,
    /// Blobs the registry already had
    pub skipped: usize,
    /// Bytes uploaded
    pub bytes: u64,
    /// Digest of the published index
    pub index_digest: Digest,
}

/// Outcome of a pull.
#[derive(Debug, Clone)]
pub struct PullReport {
    /// Blobs downloaded, model manifest included
    pub fetched: usize,
    /// Blobs already present and verified locally
    pub skipped: usize,
    /// Index layers with media types outside the model vocabulary
    pub ignored: usize,
    /// Bytes downloaded
    pub bytes: u64,
    /// Digest of the resolved index
    pub index_digest: Digest,
}

/// Synchronizes a local store with remote registries.
#[derive(Clone)]
pub struct ModelSync {
    store: ModelStore,
    connector: Arc<dyn RegistryConnector>,
    options: SyncOptions,
}

impl ModelSync {
    pub fn new(store: ModelStore, connector: Arc<dyn RegistryConnector>, options: SyncOptions) -> Self {
        Self {
            store,
            connector,
            options,
        }
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// Publish the local manifest for `path` and every blob it references.
    pub async fn push(&self, path: &ModelPath) -> Result<PushReport> {
        let manifest_bytes = self.store.manifest_bytes(path)?;
        let manifest = Manifest::from_bytes(&manifest_bytes)?;
        let layers: Vec<Descriptor> = manifest.layers().cloned().collect();

        for layer in &layers {
            if !self.store.has_blob(&layer.digest) {
                return Err(ModelError::NotFound(format!(
                    "Blob {} ({}) referenced by {} is missing from the local store",
                    layer.digest,
                    layer.media_type,
                    path.short_tagname()
                )));
            }
        }

        let transport = self.connector.connect(path).await?;
        let transport: &dyn RegistryTransport = &*transport;

        tracing::info!(
            model = %path,
            layers = layers.len(),
            concurrency = self.options.concurrency,
            "Pushing model"
        );

        let uploaded = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);
        let bytes = AtomicU64::new(0);
        let tally = &|sent: Option<u64>| match sent {
            Some(size) => {
                uploaded.fetch_add(1, Ordering::Relaxed);
                bytes.fetch_add(size, Ordering::Relaxed);
            }
            None => {
                skipped.fetch_add(1, Ordering::Relaxed);
            }
        };

        stream::iter(layers.iter().map(Ok::<_, ModelError>))
            .try_for_each_concurrent(self.concurrency(), |layer| async move {
                let path = self.store.blob_path(&layer.digest)?;
                let sent = self
                    .push_blob(transport, layer, BlobSource::File(&path))
                    .await?;
                tally(sent);
                Ok(())
            })
            .await?;

        let manifest_desc = Descriptor::from_bytes(media_type::MODEL_MANIFEST, &manifest_bytes);
        tally(
            self.push_blob(transport, &manifest_desc, BlobSource::Bytes(&manifest_bytes))
                .await?,
        );
        tally(
            self.push_blob(transport, &empty_config(), BlobSource::Bytes(EMPTY_JSON))
                .await?,
        );

        let index = RegistryIndex::for_model(layers, manifest_desc).to_bytes()?;
        let index_digest = self
            .with_timeout(
                format!("tag {}", path.short_tagname()),
                transport.push_tagged(&path.tag, index),
            )
            .await?;

        let report = PushReport {
            uploaded: uploaded.into_inner(),
            skipped: skipped.into_inner(),
            bytes: bytes.into_inner(),
            index_digest,
        };
        tracing::info!(
            model = %path,
            uploaded = report.uploaded,
            skipped = report.skipped,
            digest = %report.index_digest,
            "Model pushed"
        );
        Ok(report)
    }

    /// Fetch the tagged model into the local store.
    pub async fn pull(&self, path: &ModelPath) -> Result<PullReport> {
        let transport = self.connector.connect(path).await?;
        let transport: &dyn RegistryTransport = &*transport;

        let resolved = self
            .with_timeout(
                format!("resolve {}", path.short_tagname()),
                transport.resolve(&path.tag),
            )
            .await?;

        let mut blobs = Vec::new();
        let mut manifest_layer = None;
        let mut ignored = 0;
        for layer in resolved.index.layers {
            if layer.media_type == media_type::MODEL_MANIFEST {
                manifest_layer = Some(layer);
            } else if media_type::is_known(&layer.media_type) {
                blobs.push(layer);
            } else {
                tracing::debug!(
                    media_type = %layer.media_type,
                    digest = %layer.digest,
                    "Ignoring unknown layer"
                );
                ignored += 1;
            }
        }
        let manifest_layer = manifest_layer.ok_or_else(|| ModelError::TransportError {
            registry: path.registry.clone(),
            message: format!("Index for {} has no model manifest layer", path.short_tagname()),
        })?;

        tracing::info!(
            model = %path,
            digest = %resolved.digest,
            layers = blobs.len(),
            "Pulling model"
        );

        let fetched = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);
        let bytes = AtomicU64::new(0);
        let tally = &|received: Option<u64>| match received {
            Some(size) => {
                fetched.fetch_add(1, Ordering::Relaxed);
                bytes.fetch_add(size, Ordering::Relaxed);
            }
            None => {
                skipped.fetch_add(1, Ordering::Relaxed);
            }
        };

        stream::iter(blobs.iter().map(Ok::<_, ModelError>))
            .try_for_each_concurrent(self.concurrency(), |layer| async move {
                let dest = self.store.blob_path(&layer.digest)?;
                let staged = self.fetch_blob(transport, layer, &dest).await?;
                let received = match staged {
                    Some(temp) => {
                        self.store.install(temp, &dest)?;
                        tracing::info!(digest = %layer.digest, size = layer.size, "Blob pulled");
                        Some(layer.size)
                    }
                    None => None,
                };
                tally(received);
                Ok(())
            })
            .await?;

        let manifest_dest = self.store.manifest_path(path)?;
        if let Some(temp) = self
            .fetch_blob(transport, &manifest_layer, &manifest_dest)
            .await?
        {
            let data = tokio::fs::read(&*temp).await?;
            let manifest = Manifest::from_bytes(&data).map_err(|e| ModelError::TransportError {
                registry: path.registry.clone(),
                message: format!("Invalid model manifest {}: {}", manifest_layer.digest, e),
            })?;
            if let Some(missing) = manifest.layers().find(|d| !self.store.has_blob(&d.digest)) {
                return Err(ModelError::TransportError {
                    registry: path.registry.clone(),
                    message: format!(
                        "Manifest references blob {} absent from the index",
                        missing.digest
                    ),
                });
            }
            self.store.install(temp, &manifest_dest)?;
            tally(Some(manifest_layer.size));
        } else {
            tally(None);
        }

        let report = PullReport {
            fetched: fetched.into_inner(),
            skipped: skipped.into_inner(),
            ignored,
            bytes: bytes.into_inner(),
            index_digest: resolved.digest,
        };
        tracing::info!(
            model = %path,
            fetched = report.fetched,
            skipped = report.skipped,
            "Model pulled"
        );
        Ok(report)
    }

    fn concurrency(&self) -> usize {
        self.options.concurrency.max(1)
    }

    async fn with_timeout<T>(
        &self,
        operation: String,
        future: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.options.timeout {
            Some(limit) => tokio::time::timeout(limit, future).await.map_err(|_| {
                ModelError::TimeoutError(format!("{} exceeded {:?}", operation, limit))
            })?,
            None => future.await,
        }
    }

    /// Upload one blob unless the registry already has it.
    ///
    /// Returns the number of bytes sent, or `None` when skipped.
    async fn push_blob(
        &self,
        transport: &dyn RegistryTransport,
        descriptor: &Descriptor,
        source: BlobSource<'_>,
    ) -> Result<Option<u64>> {
        let present = self
            .with_timeout(
                format!("existence check for {}", descriptor.digest),
                transport.exists(descriptor),
            )
            .await?;
        if present {
            tracing::info!(digest = %descriptor.digest, "Blob already in registry");
            return Ok(None);
        }

        let blob: BlobReader = match source {
            BlobSource::File(path) => Box::new(tokio::fs::File::open(path).await.map_err(|e| {
                ModelError::IoError(std::io::Error::new(
                    e.kind(),
                    format!("Failed to open blob {}: {}", path.display(), e),
                ))
            })?),
            BlobSource::Bytes(data) => Box::new(std::io::Cursor::new(data.to_vec())),
        };

        self.with_timeout(
            format!("upload of {}", descriptor.digest),
            transport.push(descriptor, blob),
        )
        .await?;
        tracing::info!(
            digest = %descriptor.digest,
            size = descriptor.size,
            media_type = %descriptor.media_type,
            "Blob pushed"
        );
        Ok(Some(descriptor.size))
    }

    /// Download a blob into a verified staged file.
    ///
    /// Returns `None` when `dest` already holds the exact content.
    async fn fetch_blob(
        &self,
        transport: &dyn RegistryTransport,
        descriptor: &Descriptor,
        dest: &Path,
    ) -> Result<Option<tempfile::TempPath>> {
        if matches_descriptor(dest, descriptor).await? {
            tracing::info!(digest = %descriptor.digest, "Blob already present");
            return Ok(None);
        }

        let (file, temp) = self.store.staging_file()?.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        self.with_timeout(
            format!("download of {}", descriptor.digest),
            transport.fetch(descriptor, &mut file),
        )
        .await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let (actual, size) = hash_file(temp.to_path_buf()).await?;
        if actual != descriptor.digest || size != descriptor.size {
            return Err(ModelError::IntegrityError {
                digest: descriptor.digest.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(Some(temp))
    }
}

enum BlobSource<'a> {
    File(&'a Path),
    Bytes(&'a [u8]),
}

/// Whether `path` holds exactly the descriptor's content.
///
/// The size check is a cheap filter; the digest is always confirmed.
async fn matches_descriptor(path: &Path, descriptor: &Descriptor) -> Result<bool> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_file() || metadata.len() != descriptor.size {
        return Ok(false);
    }
    let (actual, _) = hash_file(path.to_path_buf()).await?;
    if actual != descriptor.digest {
        tracing::warn!(
            path = %path.display(),
            expected = %descriptor.digest,
            actual = %actual,
            "Existing file does not match its digest, fetching again"
        );
        return Ok(false);
    }
    Ok(true)
}

async fn hash_file(path: PathBuf) -> Result<(Digest, u64)> {
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&path)?;
        Digest::of_reader(std::io::BufReader::new(file))
    })
    .await
    .map_err(|e| ModelError::Other(format!("Hashing task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::descriptor::DescriptorBuilder;
    use crate::model::registry::InMemoryRegistry;
    use a3s_model_core::config::StoreConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    fn open_store(tmp: &TempDir, name: &str) -> ModelStore {
        ModelStore::open(&StoreConfig::new(tmp.path().join(name))).unwrap()
    }

    /// Commit `contents` as weights and write a manifest for `path`.
    fn seed(store: &ModelStore, path: &ModelPath, contents: &[&[u8]]) -> Manifest {
        let mut manifest = Manifest::default();
        manifest.config.name = path.name.clone();
        for content in contents {
            let pending = DescriptorBuilder::new(store)
                .from_reader(*content, media_type::MODEL_WEIGHTS)
                .unwrap();
            let outcome = store.commit(pending).unwrap();
            manifest.weights.file.push(outcome.descriptor);
        }
        store.write_manifest(path, &manifest).unwrap();
        manifest
    }

    fn sync(store: &ModelStore, registry: &InMemoryRegistry) -> ModelSync {
        ModelSync::new(store.clone(), Arc::new(registry.clone()), SyncOptions::default())
    }

    #[tokio::test]
    async fn test_push_uploads_layers_manifest_and_config() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, "a");
        let registry = InMemoryRegistry::new();
        let path = ModelPath::parse("myns/m:v1").unwrap();
        seed(&store, &path, &[b"w1", b"w2"]);

        let report = sync(&store, &registry).push(&path).await.unwrap();
        assert_eq!(report.uploaded, 4);
        assert_eq!(report.skipped, 0);

        let index = RegistryIndex::from_bytes(&registry.index(&path).unwrap()).unwrap();
        assert_eq!(index.layers.len(), 3);
        assert_eq!(index.layers[2].media_type, media_type::MODEL_MANIFEST);
        assert_eq!(index.config, empty_config());
        assert_eq!(report.index_digest, Digest::of_bytes(&registry.index(&path).unwrap()));
    }

    #[tokio::test]
    async fn test_push_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, "a");
        let registry = InMemoryRegistry::new();
        let path = ModelPath::parse("m").unwrap();
        seed(&store, &path, &[b"w1"]);

        let sync = sync(&store, &registry);
        sync.push(&path).await.unwrap();
        let uploads = registry.upload_count();

        let second = sync.push(&path).await.unwrap();
        assert_eq!(second.uploaded, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(registry.upload_count(), uploads);
    }

    #[tokio::test]
    async fn test_push_missing_local_blob() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, "a");
        let path = ModelPath::parse("m").unwrap();
        let manifest = seed(&store, &path, &[b"w1"]);
        std::fs::remove_file(store.blob_path(&manifest.weights.file[0].digest).unwrap()).unwrap();

        let err = sync(&store, &InMemoryRegistry::new())
            .push(&path)
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_pull_into_fresh_store() {
        let tmp = TempDir::new().unwrap();
        let source = open_store(&tmp, "a");
        let target = open_store(&tmp, "b");
        let registry = InMemoryRegistry::new();
        let path = ModelPath::parse("m:v2").unwrap();
        let manifest = seed(&source, &path, &[b"w1", b"w2"]);
        sync(&source, &registry).push(&path).await.unwrap();

        let report = sync(&target, &registry).pull(&path).await.unwrap();
        assert_eq!(report.fetched, 3);
        assert_eq!(report.ignored, 0);

        let (pulled, _) = target.read_manifest(&path).unwrap();
        assert_eq!(pulled, manifest);
        for layer in pulled.layers() {
            target.verify_blob(layer).unwrap();
        }
    }

    #[tokio::test]
    async fn test_pull_fast_path_skips_verified_blobs() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, "a");
        let registry = InMemoryRegistry::new();
        let path = ModelPath::parse("m").unwrap();
        seed(&store, &path, &[b"w1"]);
        let sync = sync(&store, &registry);
        sync.push(&path).await.unwrap();

        let report = sync.pull(&path).await.unwrap();
        assert_eq!(report.fetched, 0);
        assert_eq!(report.skipped, 2);
        assert_eq!(registry.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_pull_refetches_corrupt_local_blob_of_same_size() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, "a");
        let registry = InMemoryRegistry::new();
        let path = ModelPath::parse("m").unwrap();
        let manifest = seed(&store, &path, &[b"abcd"]);
        let sync = sync(&store, &registry);
        sync.push(&path).await.unwrap();

        let blob = store.blob_path(&manifest.weights.file[0].digest).unwrap();
        let original = std::fs::read(&blob).unwrap();
        std::fs::write(&blob, vec![0u8; original.len()]).unwrap();

        let report = sync.pull(&path).await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(std::fs::read(&blob).unwrap(), original);
    }

    #[tokio::test]
    async fn test_pull_rejects_tampered_blob() {
        let tmp = TempDir::new().unwrap();
        let source = open_store(&tmp, "a");
        let target = open_store(&tmp, "b");
        let registry = InMemoryRegistry::new();
        let path = ModelPath::parse("m").unwrap();
        let manifest = seed(&source, &path, &[b"w1"]);
        sync(&source, &registry).push(&path).await.unwrap();
        registry.corrupt_blob(&manifest.weights.file[0].digest, b"evil".to_vec());

        let err = sync(&target, &registry).pull(&path).await.unwrap_err();
        assert!(matches!(err, ModelError::IntegrityError { .. }));
        assert!(!target.has_blob(&manifest.weights.file[0].digest));
        assert!(target.read_manifest(&path).is_err());
        assert_eq!(std::fs::read_dir(target.root().join("tmp")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_pull_unknown_tag_is_transport_error() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, "a");
        let err = sync(&store, &InMemoryRegistry::new())
            .pull(&ModelPath::parse("absent").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::TransportError { .. }));
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, "a");
        let sync = ModelSync::new(
            store,
            Arc::new(InMemoryRegistry::new()),
            SyncOptions {
                concurrency: 1,
                timeout: Some(Duration::from_millis(10)),
            },
        );
        let err = sync
            .with_timeout("slow".to_string(), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), ModelError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::TimeoutError(_)));
    }
}
