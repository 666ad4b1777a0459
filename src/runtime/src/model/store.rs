//! Local content store.
//!
//! Blobs live under `blobs/sha256/<hex>` and are immutable once committed.
//! Manifests live under `manifests/<registry>/<namespace>/<name>/<tag>` and
//! are overwritten on every rebuild. Staged files are created in `tmp/` so a
//! commit is a same-filesystem rename.

use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use a3s_model_core::config::StoreConfig;
use a3s_model_core::digest::Digest;
use a3s_model_core::error::{ModelError, Result};
use a3s_model_core::manifest::{Descriptor, Manifest};
use chrono::{DateTime, Utc};
use tempfile::{NamedTempFile, TempPath};

use super::descriptor::PendingBlob;
use super::reference::ModelPath;

const BLOBS_DIR: &str = "blobs";
const MANIFESTS_DIR: &str = "manifests";
const TMP_DIR: &str = "tmp";

/// Result of promoting a pending blob into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub descriptor: Descriptor,
    /// False when a blob with the same digest was already present
    pub written: bool,
}

/// A manifest found in the store.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub path: ModelPath,
    /// Size of the manifest file in bytes
    pub size: u64,
    /// Total size of the blobs the manifest references
    pub content_size: u64,
    pub modified: DateTime<Utc>,
}

/// Digest-keyed blob directory plus path-keyed manifest directory.
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    /// Open (and create if needed) the store rooted at `config.root`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let store = Self {
            root: config.root().to_path_buf(),
        };
        for dir in [store.blobs_dir(), store.manifests_dir(), store.tmp_dir()] {
            create_dir_all(&dir)?;
        }
        tracing::debug!(root = %store.root.display(), "Opened model store");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blobs_dir(&self) -> PathBuf {
        self.root.join(BLOBS_DIR).join(a3s_model_core::digest::SHA256)
    }

    fn manifests_dir(&self) -> PathBuf {
        self.root.join(MANIFESTS_DIR)
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    /// Final location of a blob. Parent directories are created on demand.
    pub fn blob_path(&self, digest: &Digest) -> Result<PathBuf> {
        let dir = self.root.join(BLOBS_DIR).join(digest.algorithm());
        create_dir_all(&dir)?;
        Ok(dir.join(digest.hex()))
    }

    /// Manifest location for a model path. Parent directories are created on demand.
    pub fn manifest_path(&self, path: &ModelPath) -> Result<PathBuf> {
        let full = self.manifests_dir().join(path.manifest_relpath());
        if let Some(parent) = full.parent() {
            create_dir_all(parent)?;
        }
        Ok(full)
    }

    /// New staged file in the store's temp area.
    pub fn staging_file(&self) -> Result<NamedTempFile> {
        let dir = self.tmp_dir();
        create_dir_all(&dir)?;
        tempfile::Builder::new()
            .prefix("sha256-")
            .suffix("-partial")
            .tempfile_in(&dir)
            .map_err(|e| {
                ModelError::BuildError(format!(
                    "Failed to create staging file in {}: {}",
                    dir.display(),
                    e
                ))
            })
    }

    pub fn has_blob(&self, digest: &Digest) -> bool {
        self.blob_path(digest).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn open_blob(&self, digest: &Digest) -> Result<File> {
        let path = self.blob_path(digest)?;
        File::open(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ModelError::NotFound(format!("Blob {} not in store", digest)),
            _ => ModelError::IoError(e),
        })
    }

    /// Re-hash a committed blob and compare it with its descriptor.
    pub fn verify_blob(&self, descriptor: &Descriptor) -> Result<()> {
        let file = self.open_blob(&descriptor.digest)?;
        let (actual, size) = Digest::of_reader(std::io::BufReader::new(file))?;
        if actual != descriptor.digest || size != descriptor.size {
            return Err(ModelError::IntegrityError {
                digest: descriptor.digest.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    /// Promote a pending blob to its content-addressed path.
    ///
    /// A blob already present under the same digest wins; the staged file is
    /// discarded and `written` is false.
    pub fn commit(&self, pending: PendingBlob) -> Result<CommitOutcome> {
        let (descriptor, temp) = pending.into_parts();
        if !temp.exists() {
            return Err(ModelError::MissingTempRef(temp.to_path_buf()));
        }

        let target = self.blob_path(&descriptor.digest)?;
        if target.exists() {
            drop(temp);
            tracing::info!(digest = %descriptor.digest, "Blob already present");
            return Ok(CommitOutcome {
                descriptor,
                written: false,
            });
        }

        match temp.persist_noclobber(&target) {
            Ok(()) => {
                tracing::info!(
                    digest = %descriptor.digest,
                    size = descriptor.size,
                    media_type = %descriptor.media_type,
                    "Blob committed"
                );
                Ok(CommitOutcome {
                    descriptor,
                    written: true,
                })
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                tracing::info!(digest = %descriptor.digest, "Blob committed concurrently");
                Ok(CommitOutcome {
                    descriptor,
                    written: false,
                })
            }
            Err(e) => Err(ModelError::CommitError {
                digest: descriptor.digest.to_string(),
                message: format!("rename to {} failed: {}", target.display(), e.error),
            }),
        }
    }

    /// Atomically move a staged file to `dest`, replacing what is there.
    pub fn install(&self, temp: TempPath, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            create_dir_all(parent)?;
        }
        temp.persist(dest).map_err(|e| {
            ModelError::IoError(std::io::Error::new(
                e.error.kind(),
                format!("Failed to install {}: {}", dest.display(), e.error),
            ))
        })
    }

    /// Serialize and atomically write the manifest for `path`.
    pub fn write_manifest(&self, path: &ModelPath, manifest: &Manifest) -> Result<PathBuf> {
        let bytes = manifest.to_bytes()?;
        let dest = self.manifest_path(path)?;

        let mut staged = self.staging_file()?;
        staged.write_all(&bytes).map_err(|e| {
            ModelError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to write manifest for {}: {}", path, e),
            ))
        })?;
        staged.as_file().sync_all()?;
        self.install(staged.into_temp_path(), &dest)?;

        tracing::info!(
            model = %path,
            path = %dest.display(),
            layers = manifest.layers().count(),
            "Manifest written"
        );
        Ok(dest)
    }

    /// Raw manifest bytes as stored.
    pub fn manifest_bytes(&self, path: &ModelPath) -> Result<Vec<u8>> {
        let file = self.manifests_dir().join(path.manifest_relpath());
        std::fs::read(&file).map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                ModelError::NotFound(format!("No local manifest for {}", path.short_tagname()))
            }
            _ => ModelError::IoError(e),
        })
    }

    /// Parsed manifest plus the digest of its bytes.
    pub fn read_manifest(&self, path: &ModelPath) -> Result<(Manifest, Digest)> {
        let bytes = self.manifest_bytes(path)?;
        let manifest = Manifest::from_bytes(&bytes).map_err(|e| {
            ModelError::SerializationError(format!(
                "Invalid manifest for {}: {}",
                path.short_tagname(),
                e
            ))
        })?;
        Ok((manifest, Digest::of_bytes(&bytes)))
    }

    /// Every manifest in the store, sorted by reference.
    pub fn list_manifests(&self) -> Result<Vec<ManifestEntry>> {
        let mut entries = Vec::new();
        let root = self.manifests_dir();
        let mut files = Vec::new();
        collect_manifest_files(&root, &root, &mut files)?;

        for relative in files {
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            let [registry, namespace, name, tag] = parts.as_slice() else {
                tracing::warn!(path = %relative.display(), "Skipping stray file in manifests");
                continue;
            };
            let path = ModelPath {
                scheme: super::reference::DEFAULT_PROTOCOL_SCHEME.to_string(),
                registry: registry.clone(),
                namespace: namespace.clone(),
                name: name.clone(),
                tag: tag.clone(),
            };
            if path.validate().is_err() {
                tracing::warn!(path = %relative.display(), "Skipping invalid manifest path");
                continue;
            }

            let full = root.join(&relative);
            let metadata = std::fs::metadata(&full)?;
            let content_size = match self.read_manifest(&path) {
                Ok((manifest, _)) => manifest.total_size(),
                Err(e) => {
                    tracing::warn!(model = %path, error = %e, "Unreadable manifest");
                    0
                }
            };
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            entries.push(ManifestEntry {
                path,
                size: metadata.len(),
                content_size,
                modified,
            });
        }

        entries.sort_by_key(|e| e.path.full_tagname());
        Ok(entries)
    }
}

fn create_dir_all(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        ModelError::IoError(std::io::Error::new(
            e.kind(),
            format!("Failed to create directory {}: {}", dir.display(), e),
        ))
    })
}

fn collect_manifest_files(root: &Path, current: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let read_dir = match std::fs::read_dir(current) {
        Ok(rd) => rd,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_manifest_files(root, &path, files)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            files.push(relative.to_path_buf());
        }
    }
    Ok(())
}
