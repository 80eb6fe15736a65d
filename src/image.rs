//! Image manifest and config documents.
//!
//! Only the fields the append touches are typed. Everything else a registry or
//! builder put in the documents is kept in `extra` maps and written back out
//! unchanged, in its original key order.

use crate::error::AppendError;
use anyhow::{Context, Result};
use oci_spec::image::MediaType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
pub const DOCKER_CONFIG_V1: &str = "application/vnd.docker.container.image.v1+json";

/// Which family of media types a manifest uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestSchema {
    Docker,
    Oci,
}

impl ManifestSchema {
    pub fn manifest_media_type(self) -> String {
        match self {
            ManifestSchema::Docker => DOCKER_MANIFEST_V2.to_string(),
            ManifestSchema::Oci => MediaType::ImageManifest.to_string(),
        }
    }

    pub fn layer_media_type(self) -> String {
        match self {
            ManifestSchema::Docker => DOCKER_LAYER_GZIP.to_string(),
            ManifestSchema::Oci => MediaType::ImageLayerGzip.to_string(),
        }
    }

    pub fn config_media_type(self) -> String {
        match self {
            ManifestSchema::Docker => DOCKER_CONFIG_V1.to_string(),
            ManifestSchema::Oci => MediaType::ImageConfig.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub size: u64,
    pub digest: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Descriptor {
    pub fn new(media_type: String, size: u64, digest: String) -> Self {
        Self {
            media_type,
            size,
            digest,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    /// Parses a single-image manifest, rejecting lists, indexes and schema 1.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let document: Value =
            serde_json::from_slice(bytes).context("Manifest is not valid JSON")?;

        let media_type = document.get("mediaType").and_then(Value::as_str);
        let is_index = media_type == Some(DOCKER_MANIFEST_LIST_V2)
            || media_type == Some(MediaType::ImageIndex.to_string().as_str())
            || (media_type.is_none() && document.get("manifests").is_some());
        if is_index {
            return Err(AppendError::UnsupportedManifest(format!(
                "'{}' is a multi-platform index; only single-image manifests can be extended",
                media_type.unwrap_or("index")
            ))
            .into());
        }

        let schema_version = document.get("schemaVersion").and_then(Value::as_u64);
        if schema_version != Some(2) {
            return Err(AppendError::UnsupportedManifest(format!(
                "schemaVersion {} is not supported, expected 2",
                schema_version.map_or_else(|| "<missing>".to_string(), |v| v.to_string())
            ))
            .into());
        }

        let manifest: Manifest =
            serde_json::from_value(document).context("Manifest does not have the expected shape")?;
        manifest.schema()?;
        Ok(manifest)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize manifest")
    }

    /// Determines the media type family from the manifest, or its config when
    /// the manifest does not declare one.
    pub fn schema(&self) -> Result<ManifestSchema> {
        let declared = self
            .media_type
            .as_deref()
            .unwrap_or(self.config.media_type.as_str());

        if declared == DOCKER_MANIFEST_V2 || declared == DOCKER_CONFIG_V1 {
            Ok(ManifestSchema::Docker)
        } else if declared == MediaType::ImageManifest.to_string()
            || declared == MediaType::ImageConfig.to_string()
        {
            Ok(ManifestSchema::Oci)
        } else {
            Err(AppendError::UnsupportedManifest(format!(
                "unknown manifest media type '{}'",
                declared
            ))
            .into())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,
    #[serde(default)]
    pub diff_ids: Vec<String>,
}

/// One provenance record of the config `history` array.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_layer: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub rootfs: RootFs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ImageConfig {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let config: ImageConfig =
            serde_json::from_slice(bytes).context("Image config is not a valid config document")?;
        Ok(config)
    }

    /// Compact JSON encoding; its digest is the config blob digest.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize image config")
    }
}
