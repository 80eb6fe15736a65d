//! The registry capability the pipeline runs against.
//!
//! A [`RegistryClient`] is bound to a single repository, the way a registry
//! session is: tags and digests are resolved inside that repository only.
//! Two implementations are provided:
//! - [`MemoryRegistry`] keeps everything in memory and records each call.
//! - [`DistributionClient`] talks to an OCI Distribution (`/v2/`) endpoint.

use crate::digest::{self, DigestingWriter};
use crate::error::AppendError;
use anyhow::{Context, Result};
use std::io::{self, Read, Seek, Write};
use tempfile::NamedTempFile;

mod http;
mod memory;

pub use http::{DistributionClient, RegistryAuth};
pub use memory::{MemoryRegistry, RegistryOperation};

/// Read-once sequence of blob chunks. Every `pull_blob` call starts a new one.
pub type BlobStream<'a> = Box<dyn Iterator<Item = io::Result<Vec<u8>>> + 'a>;

const CHUNK_SIZE: usize = 64 * 1024;

pub trait RegistryClient {
    /// Short identification for log lines
    fn name(&self) -> &str;

    /// `registry/repository` this client is bound to, when it knows it.
    fn repository(&self) -> Option<&str> {
        None
    }

    fn pull_blob(&self, digest: &str) -> Result<BlobStream<'_>>;

    /// Stores `data` under `digest`. Pushing a digest the repository already
    /// holds succeeds without changing anything.
    fn push_blob(&self, data: &[u8], digest: &str) -> Result<()>;

    fn get_manifest(&self, tag: &str) -> Result<Vec<u8>>;

    /// Points `tag` at `manifest`. This is what makes an image visible, so it
    /// must only be called once every blob the manifest references is stored.
    fn set_manifest(&self, tag: &str, manifest: &[u8]) -> Result<()>;
}

/// Adapts any reader into a [`BlobStream`] of fixed-size chunks.
pub struct ReadChunks<R: Read> {
    reader: R,
    done: bool,
}

impl<R: Read> ReadChunks<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }
}

impl<R: Read> Iterator for ReadChunks<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(n) => {
                    chunk.truncate(n);
                    return Some(Ok(chunk));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Streams a blob into `destination`, checking it against `digest` on the way.
/// Returns the number of bytes written.
pub fn pull_blob_to_writer<C, W>(client: &C, digest: &str, destination: W) -> Result<u64>
where
    C: RegistryClient + ?Sized,
    W: Write,
{
    let mut writer = DigestingWriter::new(destination);
    for chunk in client.pull_blob(digest)? {
        let chunk = chunk.with_context(|| format!("Failed to read blob {}", digest))?;
        writer
            .write_all(&chunk)
            .with_context(|| format!("Failed to write blob {}", digest))?;
    }
    writer.flush()?;

    let (_, computed, written) = writer.finish();
    if computed != digest {
        return Err(AppendError::DigestMismatch {
            what: "pulled blob".to_string(),
            declared: digest.to_string(),
            computed,
        }
        .into());
    }
    log::trace!("Pulled blob {} ({} bytes)", digest::short_digest(digest), written);
    Ok(written)
}

pub fn pull_blob_bytes<C>(client: &C, digest: &str) -> Result<Vec<u8>>
where
    C: RegistryClient + ?Sized,
{
    let mut bytes = Vec::new();
    pull_blob_to_writer(client, digest, &mut bytes)?;
    Ok(bytes)
}

/// Downloads a blob into a temporary file, rewound to the start.
pub fn pull_blob_to_tempfile<C>(client: &C, digest: &str) -> Result<NamedTempFile>
where
    C: RegistryClient + ?Sized,
{
    let mut file = NamedTempFile::new().context("Failed to create temporary file for blob")?;
    pull_blob_to_writer(client, digest, file.as_file_mut())?;
    file.as_file_mut()
        .rewind()
        .context("Failed to rewind temporary blob file")?;
    Ok(file)
}
