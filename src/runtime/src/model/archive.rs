//! Deterministic tar encoding with streaming digests.
//!
//! Turns a file, a directory or an in-memory entry into a tar stream,
//! optionally zstd-compressed, and hashes the final bytes as they are
//! written so the digest names exactly what lands on disk.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use a3s_model_core::config::Compression;
use a3s_model_core::digest::{Digest, DigestHasher};
use a3s_model_core::error::{ModelError, Result};

/// zstd level used for compressed layers.
const ZSTD_LEVEL: i32 = 3;

/// Writer adapter that hashes every byte passed through to `inner`.
pub struct HashingWriter<W> {
    inner: W,
    hasher: DigestHasher,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: DigestHasher::new(),
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.hasher.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hasher.is_empty()
    }

    /// Flush the inner writer and return it with the digest and length.
    pub fn finish(mut self) -> std::io::Result<(W, Digest, u64)> {
        self.inner.flush()?;
        let (digest, size) = self.hasher.finish();
        Ok((self.inner, digest, size))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Digest and length of an encoded stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub digest: Digest,
    pub size: u64,
}

/// Encode `source` as a tar stream into `dest`.
///
/// A file becomes a single entry named `rename` or its base name. A directory
/// is walked in lexicographic order of relative paths; its entries are placed
/// under `rename` when one is given.
pub fn archive_path<W: Write>(
    source: &Path,
    rename: Option<&str>,
    compression: Compression,
    dest: W,
) -> Result<ArchiveInfo> {
    let metadata = std::fs::metadata(source).map_err(|e| {
        ModelError::BuildError(format!(
            "Source not found {}: {}",
            source.display(),
            e
        ))
    })?;

    encode(compression, dest, |builder| {
        if metadata.is_dir() {
            let prefix = rename.map(PathBuf::from).unwrap_or_default();
            for relative in collect_entries(source)? {
                let full_path = source.join(&relative);
                let tar_path = prefix.join(&relative);
                append_path(builder, &full_path, &tar_path)?;
                tracing::debug!(entry = %tar_path.display(), "Archived entry");
            }
        } else {
            let name = match rename {
                Some(name) => PathBuf::from(name),
                None => source
                    .file_name()
                    .map(PathBuf::from)
                    .ok_or_else(|| {
                        ModelError::BuildError(format!(
                            "Source has no file name: {}",
                            source.display()
                        ))
                    })?,
            };
            append_path(builder, source, &name)?;
        }
        Ok(())
    })
}

/// Append the file or directory at `src` under `name`.
///
/// Ownership and timestamps are normalized; permission bits come from disk.
fn append_path(builder: &mut dyn TarSink, src: &Path, name: &Path) -> Result<()> {
    let add_error = |e: std::io::Error| {
        ModelError::BuildError(format!(
            "Failed to add {} to archive: {}",
            src.display(),
            e
        ))
    };
    let metadata = std::fs::metadata(src).map_err(add_error)?;

    let mut header = tar::Header::new_gnu();
    header.set_metadata_in_mode(&metadata, tar::HeaderMode::Deterministic);
    header.set_mode(permission_bits(&metadata));

    let appended = if metadata.is_dir() {
        builder.append_data(&mut header, name, &mut std::io::empty())
    } else {
        let mut file = std::fs::File::open(src).map_err(add_error)?;
        builder.append_data(&mut header, name, &mut file)
    };
    appended.map_err(add_error)
}

#[cfg(unix)]
fn permission_bits(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &std::fs::Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Encode in-memory `data` as a single-entry tar stream named `name`.
pub fn archive_bytes<W: Write>(
    name: &str,
    data: &[u8],
    compression: Compression,
    dest: W,
) -> Result<ArchiveInfo> {
    encode(compression, dest, |builder| {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        builder
            .append_data(&mut header, Path::new(name), &mut &data[..])
            .map_err(|e| {
                ModelError::BuildError(format!("Failed to add {} to archive: {}", name, e))
            })
    })
}

/// Run `fill` against a deterministic tar builder stacked on the compression
/// stage and the hashing writer.
fn encode<W, F>(compression: Compression, dest: W, fill: F) -> Result<ArchiveInfo>
where
    W: Write,
    F: FnOnce(&mut dyn TarSink) -> Result<()>,
{
    let hashing = HashingWriter::new(dest);

    let hashing = match compression {
        Compression::None => {
            let mut builder = tar::Builder::new(hashing);
            builder.mode(tar::HeaderMode::Deterministic);
            fill(&mut builder)?;
            builder.into_inner().map_err(finalize_error)?
        }
        Compression::Zstd => {
            let encoder = zstd::stream::write::Encoder::new(hashing, ZSTD_LEVEL).map_err(|e| {
                ModelError::BuildError(format!("Failed to start zstd encoder: {}", e))
            })?;
            let mut builder = tar::Builder::new(encoder);
            builder.mode(tar::HeaderMode::Deterministic);
            fill(&mut builder)?;
            builder
                .into_inner()
                .map_err(finalize_error)?
                .finish()
                .map_err(|e| ModelError::BuildError(format!("Failed to finish zstd stream: {}", e)))?
        }
    };

    let (_, digest, size) = hashing.finish().map_err(finalize_error)?;
    Ok(ArchiveInfo { digest, size })
}

fn finalize_error(e: std::io::Error) -> ModelError {
    ModelError::BuildError(format!("Failed to finalize archive: {}", e))
}

/// Object-safe view of `tar::Builder` so one fill closure serves every
/// compression stage.
trait TarSink {
    fn append_data(
        &mut self,
        header: &mut tar::Header,
        path: &Path,
        data: &mut dyn Read,
    ) -> std::io::Result<()>;
}

impl<W: Write> TarSink for tar::Builder<W> {
    fn append_data(
        &mut self,
        header: &mut tar::Header,
        path: &Path,
        data: &mut dyn Read,
    ) -> std::io::Result<()> {
        tar::Builder::append_data(self, header, path, data)
    }
}

/// Relative paths of every file and subdirectory under `root`, sorted.
///
/// The root itself is not included.
pub fn collect_entries(root: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    walk_dir(root, root, &mut entries)?;
    entries.sort();
    Ok(entries)
}

fn walk_dir(root: &Path, current: &Path, entries: &mut Vec<PathBuf>) -> Result<()> {
    let read_dir = std::fs::read_dir(current).map_err(|e| {
        ModelError::BuildError(format!(
            "Failed to read directory {}: {}",
            current.display(),
            e
        ))
    })?;

    for entry in read_dir {
        let entry = entry
            .map_err(|e| ModelError::BuildError(format!("Failed to read directory entry: {}", e)))?;

        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .map_err(|e| {
                ModelError::BuildError(format!(
                    "Failed to compute relative path for {}: {}",
                    path.display(),
                    e
                ))
            })?
            .to_path_buf();

        let is_dir = entry
            .file_type()
            .map_err(|e| {
                ModelError::BuildError(format!(
                    "Failed to read file type for {}: {}",
                    path.display(),
                    e
                ))
            })?
            .is_dir();

        entries.push(relative);
        if is_dir {
            walk_dir(root, &path, entries)?;
        }
    }

    Ok(())
}
