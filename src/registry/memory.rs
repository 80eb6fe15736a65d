use super::{BlobStream, ReadChunks, RegistryClient};
use crate::digest;
use crate::error::AppendError;
use crate::image::Manifest;
use anyhow::Result;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Cursor;

/// A call made against a [`MemoryRegistry`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryOperation {
    PullBlob(String),
    /// `stored` is false when the digest was already present
    PushBlob { digest: String, stored: bool },
    GetManifest(String),
    SetManifest(String),
}

/// In-memory, content-addressed repository.
///
/// Behaves like a registry where it matters for appending: pushed blobs must
/// hash to their digest, re-pushes are no-ops, and a manifest is refused while
/// any blob it references is missing.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    blobs: RefCell<HashMap<String, Vec<u8>>>,
    manifests: RefCell<HashMap<String, Vec<u8>>>,
    operations: RefCell<Vec<RegistryOperation>>,
    repository: Option<String>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that reports itself as holding `repository` only.
    pub fn bound_to(repository: impl Into<String>) -> Self {
        Self {
            repository: Some(repository.into()),
            ..Self::default()
        }
    }

    /// Seeds a blob without recording an operation. Returns its digest.
    pub fn insert_blob(&self, data: &[u8]) -> String {
        let digest = digest::sha256_digest(data);
        self.blobs.borrow_mut().insert(digest.clone(), data.to_vec());
        digest
    }

    /// Seeds a tag without recording an operation or checking references.
    pub fn insert_manifest(&self, tag: &str, manifest: &[u8]) {
        self.manifests
            .borrow_mut()
            .insert(tag.to_string(), manifest.to_vec());
    }

    pub fn blob(&self, digest: &str) -> Option<Vec<u8>> {
        self.blobs.borrow().get(digest).cloned()
    }

    pub fn manifest(&self, tag: &str) -> Option<Vec<u8>> {
        self.manifests.borrow().get(tag).cloned()
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.borrow().len()
    }

    pub fn operations(&self) -> Vec<RegistryOperation> {
        self.operations.borrow().clone()
    }

    fn record(&self, operation: RegistryOperation) {
        self.operations.borrow_mut().push(operation);
    }
}

impl RegistryClient for MemoryRegistry {
    fn name(&self) -> &str {
        "memory"
    }

    fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    fn pull_blob(&self, digest: &str) -> Result<BlobStream<'_>> {
        self.record(RegistryOperation::PullBlob(digest.to_string()));
        let data = self
            .blob(digest)
            .ok_or_else(|| AppendError::BlobUnknown(digest.to_string()))?;
        Ok(Box::new(ReadChunks::new(Cursor::new(data))))
    }

    fn push_blob(&self, data: &[u8], digest: &str) -> Result<()> {
        digest::verify("pushed blob", digest, data)?;

        let stored = !self.blobs.borrow().contains_key(digest);
        if stored {
            self.blobs
                .borrow_mut()
                .insert(digest.to_string(), data.to_vec());
        }
        self.record(RegistryOperation::PushBlob {
            digest: digest.to_string(),
            stored,
        });
        Ok(())
    }

    fn get_manifest(&self, tag: &str) -> Result<Vec<u8>> {
        self.record(RegistryOperation::GetManifest(tag.to_string()));
        self.manifest(tag)
            .ok_or_else(|| AppendError::ManifestUnknown(tag.to_string()).into())
    }

    fn set_manifest(&self, tag: &str, manifest: &[u8]) -> Result<()> {
        let parsed = Manifest::from_slice(manifest)?;
        let blobs = self.blobs.borrow();
        for descriptor in std::iter::once(&parsed.config).chain(parsed.layers.iter()) {
            match blobs.get(&descriptor.digest) {
                None => return Err(AppendError::BlobUnknown(descriptor.digest.clone()).into()),
                Some(data) if data.len() as u64 != descriptor.size => {
                    return Err(AppendError::DigestMismatch {
                        what: format!("size of blob {}", descriptor.digest),
                        declared: descriptor.size.to_string(),
                        computed: data.len().to_string(),
                    }
                    .into())
                }
                Some(_) => {}
            }
        }
        drop(blobs);

        self.insert_manifest(tag, manifest);
        self.record(RegistryOperation::SetManifest(tag.to_string()));
        Ok(())
    }
}
