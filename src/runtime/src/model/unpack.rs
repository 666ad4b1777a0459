//! Layer extraction.
//!
//! Materializes every blob a manifest references into a working directory.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use a3s_model_core::error::{ModelError, Result};
use a3s_model_core::manifest::{media_type, Descriptor, Manifest};
use tar::Archive;

use super::store::ModelStore;

/// Totals for one unpack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackReport {
    /// Layers extracted
    pub layers: usize,
    /// Encoded bytes read from the store
    pub bytes: u64,
}

/// Extract every layer of `manifest` into `target`.
///
/// Missing blobs are reported before anything is written. Files keep the
/// modes recorded in the archive and replace what is already at `target`.
pub fn unpack(store: &ModelStore, manifest: &Manifest, target: &Path) -> Result<UnpackReport> {
    if let Some(missing) = manifest.layers().find(|d| !store.has_blob(&d.digest)) {
        return Err(ModelError::NotFound(format!(
            "Blob {} ({}) is not in the local store",
            missing.digest, missing.media_type
        )));
    }

    std::fs::create_dir_all(target).map_err(|e| {
        ModelError::IoError(std::io::Error::new(
            e.kind(),
            format!("Failed to create target directory {}: {}", target.display(), e),
        ))
    })?;

    let mut report = UnpackReport::default();
    for (section, layers) in manifest.sections() {
        for layer in layers {
            extract_layer(store, layer, target)?;
            tracing::debug!(
                section = %section,
                digest = %layer.digest,
                target = %target.display(),
                "Extracted layer"
            );
            report.layers += 1;
            report.bytes += layer.size;
        }
    }

    tracing::info!(
        target = %target.display(),
        layers = report.layers,
        bytes = report.bytes,
        "Model unpacked"
    );
    Ok(report)
}

/// Extract one tar layer, decompressing `+zstd` layers first.
pub fn extract_layer(store: &ModelStore, layer: &Descriptor, target: &Path) -> Result<()> {
    let file = BufReader::new(store.open_blob(&layer.digest)?);
    let reader: Box<dyn Read> = if media_type::is_zstd(&layer.media_type) {
        Box::new(zstd::stream::read::Decoder::with_buffer(file).map_err(|e| {
            ModelError::BuildError(format!(
                "Failed to start zstd decoder for {}: {}",
                layer.digest, e
            ))
        })?)
    } else {
        Box::new(file)
    };

    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    archive.unpack(target).map_err(|e| {
        ModelError::BuildError(format!(
            "Failed to extract layer {} to {}: {}",
            layer.digest,
            target.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::descriptor::DescriptorBuilder;
    use a3s_model_core::config::{Compression, StoreConfig};
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ModelStore) {
        let tmp = TempDir::new().unwrap();
        let store = ModelStore::open(&StoreConfig::new(tmp.path().join("store"))).unwrap();
        (tmp, store)
    }

    fn committed(
        store: &ModelStore,
        compression: Compression,
        source: &Path,
        media: &str,
    ) -> Descriptor {
        let pending = DescriptorBuilder::new(store)
            .build(compression, source, media, None)
            .unwrap();
        store.commit(pending).unwrap().descriptor
    }

    #[test]
    fn test_unpack_restores_files() {
        let (tmp, store) = setup();
        let tok = tmp.path().join("tok");
        fs::create_dir_all(tok.join("nested")).unwrap();
        fs::write(tok.join("vocab.json"), b"{\"a\":1}").unwrap();
        fs::write(tok.join("nested/merges.txt"), b"a b").unwrap();
        let weights = tmp.path().join("w.bin");
        fs::write(&weights, b"weights").unwrap();

        let mut manifest = Manifest::default();
        manifest
            .weights
            .file
            .push(committed(&store, Compression::None, &weights, media_type::MODEL_WEIGHTS));
        manifest.processor.push(committed(
            &store,
            Compression::Zstd,
            &tok,
            media_type::MODEL_PROCESSOR_TEXT,
        ));

        let out = tmp.path().join("out");
        let report = unpack(&store, &manifest, &out).unwrap();
        assert_eq!(report.layers, 2);
        assert_eq!(fs::read(out.join("w.bin")).unwrap(), b"weights");
        assert_eq!(fs::read(out.join("vocab.json")).unwrap(), b"{\"a\":1}");
        assert_eq!(fs::read(out.join("nested/merges.txt")).unwrap(), b"a b");
    }

    #[test]
    fn test_unpack_overwrites_existing() {
        let (tmp, store) = setup();
        let weights = tmp.path().join("w.bin");
        fs::write(&weights, b"fresh").unwrap();
        let mut manifest = Manifest::default();
        manifest
            .weights
            .file
            .push(committed(&store, Compression::None, &weights, media_type::MODEL_WEIGHTS));

        let out = tmp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("w.bin"), b"stale content").unwrap();

        unpack(&store, &manifest, &out).unwrap();
        assert_eq!(fs::read(out.join("w.bin")).unwrap(), b"fresh");
    }

    #[cfg(unix)]
    #[test]
    fn test_unpack_preserves_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let (tmp, store) = setup();
        let script = tmp.path().join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let mut manifest = Manifest::default();
        manifest
            .config
            .extensions
            .push(committed(&store, Compression::None, &script, media_type::MODEL_EXTENSION));

        let out = tmp.path().join("out");
        unpack(&store, &manifest, &out).unwrap();
        let mode = fs::metadata(out.join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn test_unpack_missing_blob_writes_nothing() {
        let (tmp, store) = setup();
        let mut manifest = Manifest::default();
        manifest
            .weights
            .file
            .push(Descriptor::from_bytes(media_type::MODEL_WEIGHTS, b"absent"));

        let out = tmp.path().join("out");
        let err = unpack(&store, &manifest, &out).unwrap_err();
        assert!(matches!(err, ModelError::NotFound(_)));
        assert!(!out.exists());
    }
}
