//! Typed failures of the append pipeline.
//!
//! Library functions return [`anyhow::Result`] and attach step context on the way
//! up; the variants below are the ones callers may want to match on, via
//! `err.downcast_ref::<AppendError>()`.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AppendError {
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("target tag '{tag}' is the same as the base tag; refusing to overwrite the source image")]
    TagUnchanged { tag: String },

    #[error("target repository '{target}' differs from base repository '{base}'; layers can only be reused within one repository")]
    RepositoryMismatch { base: String, target: String },

    #[error("registry client is bound to '{client}' but the images live in '{images}'")]
    ClientRepositoryMismatch { client: String, images: String },

    #[error("invalid path for layer entry '{path}': {reason}")]
    InvalidLayerPath { path: String, reason: String },

    #[error("unsupported manifest: {0}")]
    UnsupportedManifest(String),

    #[error("digest mismatch for {what}: declared {declared}, computed {computed}")]
    DigestMismatch {
        what: String,
        declared: String,
        computed: String,
    },

    #[error("image has {layers} manifest layers but {diff_ids} rootfs diff_ids")]
    LayerCountMismatch { layers: usize, diff_ids: usize },

    #[error("blob {0} not found in registry")]
    BlobUnknown(String),

    #[error("manifest for tag '{0}' not found in registry")]
    ManifestUnknown(String),

    #[error("registry {operation} failed with status {status}: {message}")]
    Registry {
        operation: String,
        status: u16,
        message: String,
    },
}

impl AppendError {
    /// True for failures detected from the inputs alone, before any registry call.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            AppendError::InvalidReference { .. }
                | AppendError::TagUnchanged { .. }
                | AppendError::RepositoryMismatch { .. }
                | AppendError::ClientRepositoryMismatch { .. }
                | AppendError::InvalidLayerPath { .. }
        )
    }
}
