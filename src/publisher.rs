//! Pushing a finished image: blobs first, then the tag.

use crate::digest;
use crate::layer::Layer;
use crate::registry::RegistryClient;
use anyhow::{Context, Result};

/// Uploads the layer and config blobs, then points `new_tag` at the manifest.
///
/// The caller is responsible for having checked that `new_tag` is not the base
/// tag and that the manifest lives in the same repository as its base layers.
/// If a later step fails, already uploaded blobs stay in the registry; they are
/// content-addressed, so running the whole append again is safe.
pub fn publish<C>(
    client: &C,
    layer: &Layer,
    config_bytes: &[u8],
    config_digest: &str,
    manifest_bytes: &[u8],
    new_tag: &str,
) -> Result<()>
where
    C: RegistryClient + ?Sized,
{
    layer.verify()?;
    digest::verify("image config", config_digest, config_bytes)?;

    client
        .push_blob(layer.gzipped_tarball(), layer.gzipped_tarball_digest())
        .with_context(|| {
            format!(
                "Failed to push layer blob {}",
                layer.gzipped_tarball_digest()
            )
        })?;
    log::info!(
        "Pushed layer {} to {}",
        digest::short_digest(layer.gzipped_tarball_digest()),
        client.name()
    );

    client
        .push_blob(config_bytes, config_digest)
        .with_context(|| format!("Failed to push config blob {}", config_digest))?;
    log::info!(
        "Pushed config {} to {}",
        digest::short_digest(config_digest),
        client.name()
    );

    client
        .set_manifest(new_tag, manifest_bytes)
        .with_context(|| format!("Failed to set manifest for tag '{}'", new_tag))?;
    log::info!("Tagged {}:{}", client.name(), new_tag);

    Ok(())
}
