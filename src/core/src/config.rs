use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ModelError, Result};

/// Environment variable overriding the local store root.
pub const MODELS_DIR_ENV: &str = "MODELS_DIR";

/// Store root directory name under the user's home.
const DEFAULT_STORE_DIRNAME: &str = ".models";

/// Local content store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Root directory holding `blobs/`, `manifests/` and `tmp/`
    pub root: PathBuf,
}

impl StoreConfig {
    /// Use an explicit root directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the root from `MODELS_DIR`, falling back to `~/.models`.
    pub fn from_env() -> Result<Self> {
        if let Some(dir) = std::env::var_os(MODELS_DIR_ENV) {
            return Ok(Self::new(dir));
        }
        let home = dirs::home_dir().ok_or_else(|| {
            ModelError::ConfigError(format!(
                "Cannot determine home directory; set {}",
                MODELS_DIR_ENV
            ))
        })?;
        Ok(Self::new(home.join(DEFAULT_STORE_DIRNAME)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Remote registry configuration.
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Registry host overriding the one in the model path (e.g., "localhost:5000")
    pub url: Option<String>,
    /// Talk plain HTTP instead of HTTPS
    pub insecure: bool,
    /// Basic auth username
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<String>,
}

impl RegistryConfig {
    /// Read `MODEL_REGISTRY_URL`, `MODEL_REGISTRY_USER`, `MODEL_REGISTRY_PASSWORD`
    /// and `MODEL_REGISTRY_INSECURE`.
    pub fn from_env() -> Self {
        let insecure = std::env::var("MODEL_REGISTRY_INSECURE")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Self {
            url: std::env::var("MODEL_REGISTRY_URL").ok(),
            insecure,
            username: std::env::var("MODEL_REGISTRY_USER").ok(),
            password: std::env::var("MODEL_REGISTRY_PASSWORD").ok(),
        }
    }

    /// Registry host to contact for a model whose path names `registry`.
    pub fn host_for<'a>(&'a self, registry: &'a str) -> &'a str {
        self.url
            .as_deref()
            .map(|u| {
                u.trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
            })
            .unwrap_or(registry)
    }

    /// Basic credentials, only when both halves are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }
}

/// Options for push/pull synchronization.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum number of blob transfers in flight
    pub concurrency: usize,
    /// Per-transfer timeout
    pub timeout: Option<Duration>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout: None,
        }
    }
}

/// Second encoding stage applied after tar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Zstd,
}

/// Options for building a model from a recipe.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Compression applied to every layer
    pub compression: Compression,
    /// Directory that relative recipe paths resolve against
    pub context_dir: PathBuf,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            context_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_explicit_root() {
        let config = StoreConfig::new("/var/lib/models");
        assert_eq!(config.root(), Path::new("/var/lib/models"));
    }

    #[test]
    fn test_registry_host_override() {
        let config = RegistryConfig {
            url: Some("http://localhost:5000/".to_string()),
            ..Default::default()
        };
        assert_eq!(config.host_for("registry.cnai.com"), "localhost:5000");
    }

    #[test]
    fn test_registry_host_default() {
        let config = RegistryConfig::default();
        assert_eq!(config.host_for("registry.cnai.com"), "registry.cnai.com");
    }

    #[test]
    fn test_registry_credentials_require_both() {
        let config = RegistryConfig {
            username: Some("user".to_string()),
            ..Default::default()
        };
        assert!(config.credentials().is_none());

        let config = RegistryConfig {
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            ..Default::default()
        };
        assert_eq!(config.credentials(), Some(("user", "pass")));
    }

    #[test]
    fn test_sync_options_default() {
        let options = SyncOptions::default();
        assert_eq!(options.concurrency, 4);
        assert!(options.timeout.is_none());
    }

    #[test]
    fn test_build_options_default_uncompressed() {
        assert_eq!(BuildOptions::default().compression, Compression::None);
    }
}
