//! Building a single-file filesystem layer in memory.
//!
//! A layer travels in two forms: the uncompressed tarball, whose digest becomes
//! the `diff_id` in the image config, and its gzip copy, which is the blob the
//! registry stores and the manifest points at. [`Layer`] keeps both together
//! with their digests and never lets one change without the other.

use crate::digest;
use crate::error::AppendError;
use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::{Component, Path};
use tar_rs as tar;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    tarball: Vec<u8>,
    tarball_digest: String,
    gzipped_tarball: Vec<u8>,
    gzipped_tarball_digest: String,
}

impl Layer {
    /// Wraps an uncompressed tarball, compressing and digesting it.
    pub fn from_tarball(tarball: Vec<u8>) -> Result<Self> {
        let tarball_digest = digest::sha256_digest(&tarball);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&tarball)
            .context("Failed to gzip layer tarball")?;
        let gzipped_tarball = encoder
            .finish()
            .context("Failed to finish gzip stream for layer tarball")?;
        let gzipped_tarball_digest = digest::sha256_digest(&gzipped_tarball);

        log::debug!(
            "Built layer: tar {} ({} bytes), gzip {} ({} bytes)",
            digest::short_digest(&tarball_digest),
            tarball.len(),
            digest::short_digest(&gzipped_tarball_digest),
            gzipped_tarball.len()
        );

        Ok(Self {
            tarball,
            tarball_digest,
            gzipped_tarball,
            gzipped_tarball_digest,
        })
    }

    pub fn tarball(&self) -> &[u8] {
        &self.tarball
    }

    /// Digest of the uncompressed tarball, i.e. the layer's `diff_id`.
    pub fn tarball_digest(&self) -> &str {
        &self.tarball_digest
    }

    pub fn gzipped_tarball(&self) -> &[u8] {
        &self.gzipped_tarball
    }

    /// Digest of the compressed blob, as referenced from the manifest.
    pub fn gzipped_tarball_digest(&self) -> &str {
        &self.gzipped_tarball_digest
    }

    pub fn gzipped_size(&self) -> u64 {
        self.gzipped_tarball.len() as u64
    }

    /// Re-hashes both payloads against their recorded digests.
    pub fn verify(&self) -> Result<()> {
        digest::verify("layer tarball", &self.tarball_digest, &self.tarball)?;
        digest::verify(
            "gzipped layer tarball",
            &self.gzipped_tarball_digest,
            &self.gzipped_tarball,
        )
    }
}

/// Builds a layer whose tarball holds exactly one regular file.
///
/// `path` is taken relative to the image root; a leading `/` is dropped. The
/// header carries fixed ownership (root), mode `0644` and a zero mtime, so the
/// same input always yields the same digests.
pub fn build_single_file_layer(path: &str, content: &[u8]) -> Result<Layer> {
    let entry_path = normalize_entry_path(path)?;

    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    // Size goes in before the payload; readers trust it to find the next header.
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);

    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_data(&mut header, &entry_path, content)
        .with_context(|| format!("Failed to add {} to layer tarball", entry_path))?;
    let tarball = builder
        .into_inner()
        .context("Failed to finish layer tarball")?;

    Layer::from_tarball(tarball)
}

/// Turns a user-supplied in-image path into a tar entry name.
pub fn normalize_entry_path(path: &str) -> Result<String> {
    let invalid = |reason: &str| AppendError::InvalidLayerPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.ends_with('/') {
        return Err(invalid("path names a directory").into());
    }

    let mut parts = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| invalid("path is not valid UTF-8"))?;
                parts.push(part);
            }
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir => return Err(invalid("path may not contain '..'").into()),
            Component::Prefix(_) => return Err(invalid("path may not carry a drive prefix").into()),
        }
    }

    if parts.is_empty() {
        return Err(invalid("path is empty").into());
    }
    Ok(parts.join("/"))
}
