//! Content digests.
//!
//! A digest is always `sha256:<64 lowercase hex>`. Digests are validated on
//! construction because they become filesystem paths in the blob store.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

use crate::error::{ModelError, Result};

/// The only supported digest algorithm.
pub const SHA256: &str = "sha256";

/// A validated content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    hex: String,
}

impl Digest {
    /// Build a digest from a raw 32-byte SHA-256 output.
    pub fn from_sha256(hash: &[u8]) -> Self {
        Self {
            hex: hex::encode(hash),
        }
    }

    /// Digest of an in-memory byte slice.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self::from_sha256(&Sha256::digest(data))
    }

    /// Digest of everything a reader yields, along with its length.
    pub fn of_reader(mut reader: impl Read) -> Result<(Self, u64)> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        Ok((Self::from_sha256(&hasher.finalize()), total))
    }

    pub fn algorithm(&self) -> &str {
        SHA256
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl FromStr for Digest {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        let (algorithm, hex) = s.split_once(':').ok_or_else(|| {
            ModelError::InvalidReference(format!(
                "Invalid digest '{}': expected algorithm:hex",
                s
            ))
        })?;
        if algorithm != SHA256 {
            return Err(ModelError::InvalidReference(format!(
                "Unsupported digest algorithm '{}' in '{}'",
                algorithm, s
            )));
        }
        if hex.len() != 64 || !hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(ModelError::InvalidReference(format!(
                "Invalid sha256 hex in digest '{}'",
                s
            )));
        }
        Ok(Self {
            hex: hex.to_string(),
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", SHA256, self.hex)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Incremental SHA-256 over a byte stream, tracking its length.
#[derive(Default)]
pub struct DigestHasher {
    hasher: Sha256,
    len: u64,
}

impl DigestHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.len += data.len() as u64;
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finish(self) -> (Digest, u64) {
        (Digest::from_sha256(&self.hasher.finalize()), self.len)
    }
}
