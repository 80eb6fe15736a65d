//! End-to-end "base image + one file → new tag" orchestration.
//!
//! [`ImageAppender`] runs the whole pipeline against one [`RegistryClient`]:
//! 1. validate the base and target references (no registry traffic yet),
//! 2. build the single-file layer,
//! 3. fetch the base manifest and its config blob,
//! 4. append the layer to copies of both documents,
//! 5. publish layer, config and manifest, the manifest last.
//!
//! Any failure stops the run with context naming the step. Nothing is rolled
//! back; blobs pushed before the failure are harmless leftovers.

use crate::append::{append_layer, AppendedImage};
use crate::digest;
use crate::error::AppendError;
use crate::image::{HistoryEntry, ImageConfig, Manifest};
use crate::layer::{build_single_file_layer, normalize_entry_path};
use crate::notifier::Notifier;
use crate::publisher::publish;
use crate::reference::{check_append_target, ImageReference};
use crate::registry::{self, RegistryClient};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

/// What an append produced.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub target: ImageReference,
    pub manifest_digest: String,
    pub config_digest: String,
    /// Compressed layer digest, as listed in the manifest
    pub layer_digest: String,
    /// Uncompressed layer digest, as listed in the config
    pub diff_id: String,
    pub layer_count: usize,
}

pub struct ImageAppender<R: RegistryClient> {
    client: R,
    notifier: Notifier,
}

impl<R: RegistryClient> ImageAppender<R> {
    /// `client` must be bound to the repository both images live in; clients
    /// that report their repository are checked on every append.
    pub fn new(client: R, notifier: Notifier) -> Self {
        Self { client, notifier }
    }

    pub fn client(&self) -> &R {
        &self.client
    }

    /// Adds `content` at `path` on top of `base` and publishes it as `target`.
    ///
    /// `created` becomes the timestamp of the new history record.
    pub fn append_file(
        &self,
        base: &str,
        target: &str,
        path: &str,
        content: &[u8],
        created: DateTime<Utc>,
    ) -> Result<AppendOutcome> {
        let result = self.run(base, target, path, content, created);
        if result.is_err() {
            self.notifier.abandon();
        }
        result
    }

    fn run(
        &self,
        base: &str,
        target: &str,
        path: &str,
        content: &[u8],
        created: DateTime<Utc>,
    ) -> Result<AppendOutcome> {
        let base = ImageReference::parse(base).context("Invalid base image reference")?;
        let target = ImageReference::parse(target).context("Invalid target image reference")?;
        check_append_target(&base, &target)?;
        if let Some(bound) = self.client.repository() {
            if bound != base.repository_name() {
                return Err(AppendError::ClientRepositoryMismatch {
                    client: bound.to_string(),
                    images: base.repository_name(),
                }
                .into());
            }
        }
        let entry_path = normalize_entry_path(path)?;

        self.notifier.info(&format!(
            "Appending /{} to {} as {} via {} registry",
            entry_path,
            base,
            target,
            self.client.name()
        ));

        self.notifier.step("Building layer...");
        let layer = build_single_file_layer(&entry_path, content)
            .context("Failed to build layer")?;
        self.notifier.debug(&format!(
            "Layer diff_id {}, blob {} ({} bytes)",
            layer.tarball_digest(),
            layer.gzipped_tarball_digest(),
            layer.gzipped_size()
        ));

        self.notifier
            .step(&format!("Fetching manifest for {}...", base));
        let (base_manifest, base_config) = self
            .fetch_base(&base)
            .with_context(|| format!("Failed to fetch base image {}", base))?;
        self.notifier.debug(&format!(
            "Base image has {} layers and {} history entries",
            base_manifest.layers.len(),
            base_config.history.len()
        ));

        let history = HistoryEntry::copied_file(&entry_path, &layer, created);
        let appended: AppendedImage = append_layer(&base_manifest, &base_config, &layer, history)
            .context("Failed to assemble new manifest and config")?;
        let manifest_bytes = appended.manifest_bytes()?;
        let manifest_digest = digest::sha256_digest(&manifest_bytes);

        self.notifier.step(&format!("Publishing {}...", target));
        publish(
            &self.client,
            &layer,
            &appended.config_bytes,
            &appended.config_digest,
            &manifest_bytes,
            &target.tag,
        )
        .with_context(|| format!("Failed to publish {}", target))?;

        self.notifier
            .finish(&format!("Published {} ({})", target, manifest_digest));

        Ok(AppendOutcome {
            target,
            manifest_digest,
            config_digest: appended.config_digest,
            layer_digest: layer.gzipped_tarball_digest().to_string(),
            diff_id: layer.tarball_digest().to_string(),
            layer_count: appended.manifest.layers.len(),
        })
    }

    fn fetch_base(&self, base: &ImageReference) -> Result<(Manifest, ImageConfig)> {
        let manifest_bytes = self
            .client
            .get_manifest(&base.tag)
            .context("Failed to get base manifest")?;
        let manifest = Manifest::from_slice(&manifest_bytes)?;

        let config_bytes = registry::pull_blob_bytes(&self.client, &manifest.config.digest)
            .with_context(|| format!("Failed to pull config blob {}", manifest.config.digest))?;
        let config = ImageConfig::from_slice(&config_bytes)?;
        Ok((manifest, config))
    }
}
