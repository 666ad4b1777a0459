//! Model reference parsing.
//!
//! Parses references like `registry.cnai.com/sys/llama:v1` into structured components.

use std::path::PathBuf;
use std::str::FromStr;

use a3s_model_core::error::{ModelError, Result};

/// Default protocol scheme when none is specified.
pub const DEFAULT_PROTOCOL_SCHEME: &str = "https";

/// Default registry when none is specified.
pub const DEFAULT_REGISTRY: &str = "registry.cnai.com";

/// Default namespace when none is specified.
pub const DEFAULT_NAMESPACE: &str = "sys";

/// Default tag when none is specified.
pub const DEFAULT_TAG: &str = "latest";

/// Parsed model reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelPath {
    /// Protocol scheme (e.g., "https")
    pub scheme: String,
    /// Registry hostname (e.g., "registry.cnai.com", "localhost:5000")
    pub registry: String,
    /// Namespace (e.g., "sys", "myorg")
    pub namespace: String,
    /// Model name (e.g., "llama")
    pub name: String,
    /// Tag (e.g., "latest", "v1")
    pub tag: String,
}

impl ModelPath {
    /// Parse a model reference string.
    ///
    /// Supports formats:
    /// - `mymodel` → registry.cnai.com/sys/mymodel:latest
    /// - `myns/mymodel:v1` → registry.cnai.com/myns/mymodel:v1
    /// - `localhost:5000/myns/mymodel:v1` → localhost:5000/myns/mymodel:v1
    /// - `http://localhost:5000/myns/mymodel` → plain-http scheme
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ModelError::InvalidReference(
                "Empty model reference".to_string(),
            ));
        }

        let (scheme, rest) = match reference.split_once("://") {
            Some((scheme, rest)) => (scheme.to_string(), rest),
            None => (DEFAULT_PROTOCOL_SCHEME.to_string(), reference),
        };

        let parts: Vec<&str> = rest.split('/').collect();
        let (registry, namespace, name_tag) = match parts.as_slice() {
            [registry, namespace, name] => (*registry, *namespace, *name),
            [namespace, name] => (DEFAULT_REGISTRY, *namespace, *name),
            [name] => (DEFAULT_REGISTRY, DEFAULT_NAMESPACE, *name),
            _ => {
                return Err(ModelError::InvalidReference(format!(
                    "Too many path segments in '{}': expected [registry/][namespace/]name[:tag]",
                    reference
                )))
            }
        };

        let (name, tag) = match name_tag.split_once(':') {
            Some((name, tag)) => (name, tag),
            None => (name_tag, DEFAULT_TAG),
        };

        let path = ModelPath {
            scheme,
            registry: registry.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            tag: tag.to_string(),
        };
        path.validate()?;
        Ok(path)
    }

    /// Check the invariants: non-empty name, tag without ':'.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ModelError::InvalidReference(
                "Model repository name is required".to_string(),
            ));
        }
        if self.tag.is_empty() {
            return Err(ModelError::InvalidReference(format!(
                "Empty tag in reference '{}/{}/{}'",
                self.registry, self.namespace, self.name
            )));
        }
        if self.tag.contains(':') {
            return Err(ModelError::InvalidReference(format!(
                "':' (colon) is not allowed in tag names: '{}'",
                self.tag
            )));
        }
        for segment in [&self.registry, &self.namespace, &self.name, &self.tag] {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(ModelError::InvalidReference(format!(
                    "Invalid path segment '{}'",
                    segment
                )));
            }
        }
        Ok(())
    }

    /// Repository path inside the registry (e.g., "sys/llama").
    pub fn namespace_repository(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Fully-qualified reference (e.g., "registry.cnai.com/sys/llama:v1").
    pub fn full_tagname(&self) -> String {
        format!(
            "{}/{}/{}:{}",
            self.registry, self.namespace, self.name, self.tag
        )
    }

    /// Shortest reference that parses back to this path.
    pub fn short_tagname(&self) -> String {
        if self.registry == DEFAULT_REGISTRY {
            if self.namespace == DEFAULT_NAMESPACE {
                return format!("{}:{}", self.name, self.tag);
            }
            return format!("{}/{}:{}", self.namespace, self.name, self.tag);
        }
        self.full_tagname()
    }

    /// Relative manifest location: `<registry>/<namespace>/<name>/<tag>`.
    pub fn manifest_relpath(&self) -> PathBuf {
        PathBuf::from(&self.registry)
            .join(&self.namespace)
            .join(&self.name)
            .join(&self.tag)
    }

    /// Whether the scheme asks for plain HTTP.
    pub fn is_plain_http(&self) -> bool {
        self.scheme == "http"
    }
}

impl FromStr for ModelPath {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ModelPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_tagname())
    }
}
