//! Descriptor builder.
//!
//! Encodes sources into staged files inside the store and returns a
//! [`PendingBlob`]. Nothing becomes durable until
//! [`ModelStore::commit`](super::store::ModelStore::commit) consumes it.

use std::io::{BufWriter, Read};
use std::path::Path;

use a3s_model_core::config::Compression;
use a3s_model_core::digest::Digest;
use a3s_model_core::error::{ModelError, Result};
use a3s_model_core::manifest::{media_type, Descriptor};
use tempfile::{NamedTempFile, TempPath};

use super::archive::{self, ArchiveInfo, HashingWriter};
use super::store::ModelStore;

/// An encoded blob staged in the store's temp area, not yet committed.
///
/// Dropping it deletes the staged file.
#[derive(Debug)]
pub struct PendingBlob {
    media_type: String,
    digest: Digest,
    size: u64,
    temp: TempPath,
}

impl PendingBlob {
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// The descriptor this blob will have once committed.
    pub fn descriptor(&self) -> Descriptor {
        Descriptor::new(self.media_type.clone(), self.digest.clone(), self.size)
    }

    pub(crate) fn into_parts(self) -> (Descriptor, TempPath) {
        let descriptor = Descriptor::new(self.media_type, self.digest, self.size);
        (descriptor, self.temp)
    }
}

/// Builds pending blobs against one store.
pub struct DescriptorBuilder<'a> {
    store: &'a ModelStore,
}

impl<'a> DescriptorBuilder<'a> {
    pub fn new(store: &'a ModelStore) -> Self {
        Self { store }
    }

    /// Archive a file or directory into a staged blob.
    ///
    /// The media type gains the `+zstd` suffix when `compression` is zstd.
    pub fn build(
        &self,
        compression: Compression,
        source: &Path,
        media: &str,
        rename: Option<&str>,
    ) -> Result<PendingBlob> {
        let staged = self.store.staging_file()?;
        let info = archive::archive_path(
            source,
            rename,
            compression,
            BufWriter::new(staged.as_file()),
        )?;
        let blob = finish(staged, info, compressed_media_type(media, compression))?;
        tracing::debug!(
            source = %source.display(),
            digest = %blob.digest,
            size = blob.size,
            "Staged blob"
        );
        Ok(blob)
    }

    /// Archive in-memory content as a single entry named `name`.
    pub fn build_bytes(
        &self,
        compression: Compression,
        name: &str,
        data: &[u8],
        media: &str,
    ) -> Result<PendingBlob> {
        let staged = self.store.staging_file()?;
        let info = archive::archive_bytes(
            name,
            data,
            compression,
            BufWriter::new(staged.as_file()),
        )?;
        finish(staged, info, compressed_media_type(media, compression))
    }

    /// Copy raw bytes from `reader` into a staged blob, hashing as they pass.
    pub fn from_reader(&self, mut reader: impl Read, media: &str) -> Result<PendingBlob> {
        let staged = self.store.staging_file()?;
        let mut writer = HashingWriter::new(BufWriter::new(staged.as_file()));
        std::io::copy(&mut reader, &mut writer).map_err(|e| {
            ModelError::BuildError(format!(
                "Failed to stage {} content: {}",
                media, e
            ))
        })?;
        let (_, digest, size) = writer.finish()?;
        finish(staged, ArchiveInfo { digest, size }, media.to_string())
    }
}

fn compressed_media_type(media: &str, compression: Compression) -> String {
    media_type::with_compression(media, compression == Compression::Zstd)
}

fn finish(staged: NamedTempFile, info: ArchiveInfo, media_type: String) -> Result<PendingBlob> {
    staged.as_file().sync_all().map_err(|e| {
        ModelError::BuildError(format!(
            "Failed to sync staged file {}: {}",
            staged.path().display(),
            e
        ))
    })?;
    Ok(PendingBlob {
        media_type,
        digest: info.digest,
        size: info.size,
        temp: staged.into_temp_path(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use a3s_model_core::config::StoreConfig;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ModelStore) {
        let tmp = TempDir::new().unwrap();
        let store = ModelStore::open(&StoreConfig::new(tmp.path().join("store"))).unwrap();
        (tmp, store)
    }

    fn staged_count(store: &ModelStore) -> usize {
        fs::read_dir(store.root().join("tmp")).unwrap().count()
    }

    #[test]
    fn test_build_stages_file_with_matching_digest() {
        let (tmp, store) = setup();
        let src = tmp.path().join("w.bin");
        fs::write(&src, b"weights").unwrap();

        let blob = DescriptorBuilder::new(&store)
            .build(Compression::None, &src, media_type::MODEL_WEIGHTS, None)
            .unwrap();
        let staged = fs::read(blob.temp_path()).unwrap();
        assert_eq!(blob.digest(), &Digest::of_bytes(&staged));
        assert_eq!(blob.size(), staged.len() as u64);
        assert_eq!(blob.media_type(), media_type::MODEL_WEIGHTS);
        assert!(blob.temp_path().starts_with(store.root().join("tmp")));
    }

    #[test]
    fn test_build_same_content_same_digest() {
        let (tmp, store) = setup();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        fs::write(a.join("w.bin"), b"same").unwrap();
        fs::write(b.join("w.bin"), b"same").unwrap();

        let builder = DescriptorBuilder::new(&store);
        let first = builder
            .build(Compression::None, &a.join("w.bin"), media_type::MODEL_WEIGHTS, None)
            .unwrap();
        let second = builder
            .build(Compression::None, &b.join("w.bin"), media_type::MODEL_WEIGHTS, None)
            .unwrap();
        assert_eq!(first.digest(), second.digest());
    }

    #[test]
    fn test_build_zstd_suffixes_media_type() {
        let (tmp, store) = setup();
        let src = tmp.path().join("w.bin");
        fs::write(&src, b"weights").unwrap();

        let blob = DescriptorBuilder::new(&store)
            .build(Compression::Zstd, &src, media_type::MODEL_WEIGHTS, None)
            .unwrap();
        assert!(media_type::is_zstd(blob.media_type()));
    }

    #[test]
    fn test_build_missing_source_leaves_no_staged_file() {
        let (tmp, store) = setup();
        let err = DescriptorBuilder::new(&store)
            .build(
                Compression::None,
                &tmp.path().join("missing.bin"),
                media_type::MODEL_WEIGHTS,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::BuildError(_)));
        assert_eq!(staged_count(&store), 0);
    }

    #[test]
    fn test_dropping_pending_blob_removes_staged_file() {
        let (_tmp, store) = setup();
        let blob = DescriptorBuilder::new(&store)
            .from_reader(&b"transient"[..], media_type::MODEL_LICENSE)
            .unwrap();
        assert_eq!(staged_count(&store), 1);
        drop(blob);
        assert_eq!(staged_count(&store), 0);
    }

    #[test]
    fn test_from_reader_is_raw() {
        let (_tmp, store) = setup();
        let blob = DescriptorBuilder::new(&store)
            .from_reader(&b"{\"k\":1}"[..], media_type::MODEL_EXTENSION)
            .unwrap();
        assert_eq!(fs::read(blob.temp_path()).unwrap(), b"{\"k\":1}");
        assert_eq!(blob.descriptor().size, 7);
    }

    #[test]
    fn test_build_bytes_names_entry() {
        let (_tmp, store) = setup();
        let blob = DescriptorBuilder::new(&store)
            .build_bytes(
                Compression::None,
                "DESCRIPTION",
                b"inline text",
                media_type::MODEL_DESCRIPTION,
            )
            .unwrap();
        let data = fs::read(blob.temp_path()).unwrap();
        let mut archive = tar::Archive::new(&data[..]);
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_str(), Some("DESCRIPTION"));
    }
}
