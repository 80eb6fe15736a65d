//! Producing the new manifest/config pair for an image with one more layer.

use crate::digest;
use crate::error::AppendError;
use crate::image::{Descriptor, HistoryEntry, ImageConfig, Manifest};
use crate::layer::Layer;
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};

/// Result of [`append_layer`]: the new documents plus the exact config bytes
/// the manifest refers to.
#[derive(Debug, Clone)]
pub struct AppendedImage {
    pub manifest: Manifest,
    pub config: ImageConfig,
    pub config_bytes: Vec<u8>,
    pub config_digest: String,
}

impl AppendedImage {
    pub fn manifest_bytes(&self) -> Result<Vec<u8>> {
        self.manifest.to_vec()
    }
}

impl HistoryEntry {
    /// History record for a layer that adds a single file, in the form
    /// `docker history` shows for `COPY` steps.
    pub fn copied_file(path: &str, layer: &Layer, created: DateTime<Utc>) -> Self {
        let file_hash = digest::hex_part(layer.tarball_digest()).unwrap_or(layer.tarball_digest());
        Self {
            created: Some(created.to_rfc3339_opts(SecondsFormat::Nanos, true)),
            created_by: Some(format!(
                "#(nop) COPY file:{} in /{}",
                file_hash,
                path.trim_start_matches('/')
            )),
            ..Default::default()
        }
    }
}

/// Appends `layer` to copies of the base documents.
///
/// Earlier layers, diff_ids and history records are carried over untouched;
/// the new ones go at the end so that `layers[i]` and `diff_ids[i]` keep
/// describing the same filesystem change.
pub fn append_layer(
    base_manifest: &Manifest,
    base_config: &ImageConfig,
    layer: &Layer,
    history_entry: HistoryEntry,
) -> Result<AppendedImage> {
    if base_manifest.layers.len() != base_config.rootfs.diff_ids.len() {
        return Err(AppendError::LayerCountMismatch {
            layers: base_manifest.layers.len(),
            diff_ids: base_config.rootfs.diff_ids.len(),
        }
        .into());
    }
    let schema = base_manifest.schema()?;

    let mut config = base_config.clone();
    config
        .rootfs
        .diff_ids
        .push(layer.tarball_digest().to_string());
    config.history.push(history_entry);

    let config_bytes = config.to_vec()?;
    let config_digest = digest::sha256_digest(&config_bytes);

    let mut manifest = base_manifest.clone();
    manifest.layers.push(Descriptor::new(
        schema.layer_media_type(),
        layer.gzipped_size(),
        layer.gzipped_tarball_digest().to_string(),
    ));
    manifest.config = Descriptor::new(
        schema.config_media_type(),
        config_bytes.len() as u64,
        config_digest.clone(),
    );

    log::debug!(
        "Appended layer {} as #{}; new config {} ({} bytes)",
        digest::short_digest(layer.gzipped_tarball_digest()),
        manifest.layers.len(),
        digest::short_digest(&config_digest),
        config_bytes.len()
    );

    Ok(AppendedImage {
        manifest,
        config,
        config_bytes,
        config_digest,
    })
}
