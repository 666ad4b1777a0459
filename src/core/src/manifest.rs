//! Model manifest and descriptor types.
//!
//! A [`Manifest`] is the unit of publication: scalar model metadata plus
//! ordered lists of [`Descriptor`]s, each naming one committed blob.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// Media types of the model artifact vocabulary.
pub mod media_type {
    pub const MODEL_MANIFEST: &str = "application/vnd.cnai.model.manifest.v2+json";
    pub const MODEL_CONFIG: &str = "application/vnd.cnai.model.config.v2+json";
    pub const MODEL_LICENSE: &str = "application/vnd.cnai.model.license.v2+plaintext";
    pub const MODEL_DESCRIPTION: &str = "application/vnd.cnai.model.description.v2+plaintext";
    pub const MODEL_EXTENSION: &str = "application/vnd.cnai.model.extension.v2+json";
    pub const MODEL_PROCESSOR_TEXT: &str = "application/vnd.cnai.model.processor.text.v2.tar";
    pub const MODEL_PROCESSOR_AUDIO: &str = "application/vnd.cnai.model.processor.audio.v2.tar";
    pub const MODEL_PROCESSOR_IMAGE: &str = "application/vnd.cnai.model.processor.image.v2.tar";
    pub const MODEL_PROCESSOR_MULTIMODAL: &str =
        "application/vnd.cnai.model.processor.multimodal.v2.tar";
    pub const MODEL_WEIGHTS: &str = "application/vnd.cnai.model.weights.v2.tar";
    pub const MODEL_ENGINE: &str = "application/vnd.cnai.model.engine.v2.tar";

    /// Suffix appended to a layer media type when its tar stream is zstd-compressed.
    pub const ZSTD_SUFFIX: &str = "+zstd";

    /// OCI image manifest, used as the registry index.
    pub const OCI_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    /// OCI empty JSON descriptor used as the index config placeholder.
    pub const OCI_EMPTY_JSON: &str = "application/vnd.oci.empty.v1+json";

    const KNOWN: &[&str] = &[
        MODEL_MANIFEST,
        MODEL_CONFIG,
        MODEL_LICENSE,
        MODEL_DESCRIPTION,
        MODEL_EXTENSION,
        MODEL_PROCESSOR_TEXT,
        MODEL_PROCESSOR_AUDIO,
        MODEL_PROCESSOR_IMAGE,
        MODEL_PROCESSOR_MULTIMODAL,
        MODEL_WEIGHTS,
        MODEL_ENGINE,
    ];

    /// Whether a media type belongs to the model vocabulary (compressed or not).
    pub fn is_known(media_type: &str) -> bool {
        let base = media_type
            .strip_suffix(ZSTD_SUFFIX)
            .unwrap_or(media_type);
        KNOWN.contains(&base)
    }

    /// Whether the layer's tar stream is zstd-compressed.
    pub fn is_zstd(media_type: &str) -> bool {
        media_type.ends_with(ZSTD_SUFFIX)
    }

    /// Media type for a layer after optional compression.
    pub fn with_compression(media_type: &str, zstd: bool) -> String {
        if zstd && !is_zstd(media_type) {
            format!("{}{}", media_type, ZSTD_SUFFIX)
        } else {
            media_type.to_string()
        }
    }
}

/// Manifest annotation keys.
pub mod annotation {
    pub const CREATED: &str = "org.cnai.model.created";
    pub const PARAM_SIZE: &str = "org.cnai.model.param.size";
    pub const QUANTIZATION: &str = "org.cnai.model.quantization";
}

/// Manifest schema version written by this implementation.
pub const MANIFEST_VERSION: &str = "v2";

/// Content-address record of one committed blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: Digest, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
            annotations: None,
        }
    }

    /// Descriptor for an in-memory blob.
    pub fn from_bytes(media_type: impl Into<String>, data: &[u8]) -> Self {
        Self::new(media_type, Digest::of_bytes(data), data.len() as u64)
    }
}

/// Model configuration section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub description: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub license: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<Descriptor>,
}

/// Weights section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weights {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub precision: String,
}

/// Execution engine section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engine {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub entrypoint: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<Descriptor>,
}

/// The serialized description of one model build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: String,
    pub media_type: String,
    pub config: ModelConfig,
    #[serde(default)]
    pub processor: Vec<Descriptor>,
    #[serde(default)]
    pub weights: Weights,
    #[serde(default)]
    pub engine: Engine,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            media_type: media_type::MODEL_MANIFEST.to_string(),
            config: ModelConfig::default(),
            processor: Vec::new(),
            weights: Weights::default(),
            engine: Engine::default(),
            annotations: BTreeMap::new(),
        }
    }
}

/// Layer-bearing sections of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerSection {
    Description,
    License,
    Extensions,
    Weights,
    Processor,
}

impl LayerSection {
    /// Every section, in commit/push order.
    pub const ALL: [LayerSection; 5] = [
        LayerSection::Description,
        LayerSection::License,
        LayerSection::Extensions,
        LayerSection::Weights,
        LayerSection::Processor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerSection::Description => "description",
            LayerSection::License => "license",
            LayerSection::Extensions => "extensions",
            LayerSection::Weights => "weights",
            LayerSection::Processor => "processor",
        }
    }
}

impl std::fmt::Display for LayerSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Manifest {
    /// Descriptors of one section.
    pub fn section(&self, section: LayerSection) -> &[Descriptor] {
        match section {
            LayerSection::Description => &self.config.description,
            LayerSection::License => &self.config.license,
            LayerSection::Extensions => &self.config.extensions,
            LayerSection::Weights => &self.weights.file,
            LayerSection::Processor => &self.processor,
        }
    }

    pub fn section_mut(&mut self, section: LayerSection) -> &mut Vec<Descriptor> {
        match section {
            LayerSection::Description => &mut self.config.description,
            LayerSection::License => &mut self.config.license,
            LayerSection::Extensions => &mut self.config.extensions,
            LayerSection::Weights => &mut self.weights.file,
            LayerSection::Processor => &mut self.processor,
        }
    }

    /// All sections with their descriptors, in declared order.
    pub fn sections(&self) -> impl Iterator<Item = (LayerSection, &[Descriptor])> {
        LayerSection::ALL.into_iter().map(move |s| (s, self.section(s)))
    }

    /// Every layer descriptor, flattened in section order.
    pub fn layers(&self) -> impl Iterator<Item = &Descriptor> {
        self.sections().flat_map(|(_, layers)| layers.iter())
    }

    /// Total size of all referenced blobs.
    pub fn total_size(&self) -> u64 {
        self.layers().map(|d| d.size).sum()
    }

    /// Serialize as the on-disk/on-wire JSON document.
    pub fn to_bytes(&self) -> crate::error::Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> crate::error::Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(media: &str, content: &[u8]) -> Descriptor {
        Descriptor::from_bytes(media, content)
    }

    fn sample_manifest() -> Manifest {
        let mut manifest = Manifest::default();
        manifest.config.name = "foo".to_string();
        manifest
            .config
            .license
            .push(descriptor(media_type::MODEL_LICENSE, b"MIT"));
        manifest
            .weights
            .file
            .push(descriptor(media_type::MODEL_WEIGHTS, b"w1"));
        manifest
            .weights
            .file
            .push(descriptor(media_type::MODEL_WEIGHTS, b"w2"));
        manifest
            .processor
            .push(descriptor(media_type::MODEL_PROCESSOR_TEXT, b"tok"));
        manifest
    }

    #[test]
    fn test_default_manifest_media_type() {
        let manifest = Manifest::default();
        assert_eq!(manifest.media_type, media_type::MODEL_MANIFEST);
        assert_eq!(manifest.version, "v2");
        assert_eq!(manifest.layers().count(), 0);
    }

    #[test]
    fn test_layers_follow_section_order() {
        let manifest = sample_manifest();
        let media: Vec<&str> = manifest.layers().map(|d| d.media_type.as_str()).collect();
        assert_eq!(
            media,
            vec![
                media_type::MODEL_LICENSE,
                media_type::MODEL_WEIGHTS,
                media_type::MODEL_WEIGHTS,
                media_type::MODEL_PROCESSOR_TEXT,
            ]
        );
    }

    #[test]
    fn test_section_mut_appends() {
        let mut manifest = Manifest::default();
        manifest
            .section_mut(LayerSection::Extensions)
            .push(descriptor(media_type::MODEL_EXTENSION, b"{}"));
        assert_eq!(manifest.config.extensions.len(), 1);
        assert_eq!(manifest.section(LayerSection::Extensions).len(), 1);
    }

    #[test]
    fn test_json_shape() {
        let manifest = sample_manifest();
        let value: serde_json::Value = serde_json::from_slice(&manifest.to_bytes().unwrap()).unwrap();
        assert_eq!(value["mediaType"], media_type::MODEL_MANIFEST);
        assert_eq!(value["config"]["name"], "foo");
        assert_eq!(value["weights"]["file"].as_array().unwrap().len(), 2);
        assert!(value["weights"]["file"][0]["digest"]
            .as_str()
            .unwrap()
            .starts_with("sha256:"));
        assert_eq!(value["weights"]["file"][0]["mediaType"], media_type::MODEL_WEIGHTS);
        assert!(value["config"].get("description").is_none());
    }

    #[test]
    fn test_bytes_roundtrip_is_equal() {
        let manifest = sample_manifest();
        let back = Manifest::from_bytes(&manifest.to_bytes().unwrap()).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn test_total_size() {
        let manifest = sample_manifest();
        assert_eq!(manifest.total_size(), 3 + 2 + 2 + 3);
    }

    #[test]
    fn test_media_type_known_and_zstd() {
        assert!(media_type::is_known(media_type::MODEL_WEIGHTS));
        assert!(media_type::is_known("application/vnd.cnai.model.weights.v2.tar+zstd"));
        assert!(!media_type::is_known(media_type::OCI_EMPTY_JSON));
        assert!(media_type::is_zstd("application/vnd.cnai.model.weights.v2.tar+zstd"));
        assert_eq!(
            media_type::with_compression(media_type::MODEL_WEIGHTS, true),
            "application/vnd.cnai.model.weights.v2.tar+zstd"
        );
        assert_eq!(
            media_type::with_compression(media_type::MODEL_WEIGHTS, false),
            media_type::MODEL_WEIGHTS
        );
    }
}
