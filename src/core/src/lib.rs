//! A3S Model Core - Foundational Types
//!
//! This module provides the types shared across the A3S Model crates:
//! errors, configuration values, digests, descriptors and manifests.

pub mod config;
pub mod digest;
pub mod error;
pub mod manifest;

// Re-export commonly used types
pub use config::{BuildOptions, Compression, RegistryConfig, StoreConfig, SyncOptions};
pub use digest::{Digest, DigestHasher};
pub use error::{ModelError, Result};
pub use manifest::{media_type, Descriptor, Engine, LayerSection, Manifest, ModelConfig, Weights};

/// A3S Model version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
