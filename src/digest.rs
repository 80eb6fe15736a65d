//! Content digests in the `sha256:<hex>` form used by registries.
//!
//! Digests are kept as plain strings throughout the crate, the same form they
//! take in manifests and configs.

use crate::error::AppendError;
use anyhow::Result;
use sha2::{Digest, Sha256};
use std::io::{self, Write};

pub const SHA256_PREFIX: &str = "sha256:";

/// Computes `sha256:<lowercase hex>` over the exact byte sequence.
pub fn sha256_digest(bytes: &[u8]) -> String {
    format!("{}{}", SHA256_PREFIX, hex::encode(Sha256::digest(bytes)))
}

/// Returns the hex part of a `sha256:` digest, or `None` for other algorithms.
pub fn hex_part(digest: &str) -> Option<&str> {
    digest.strip_prefix(SHA256_PREFIX)
}

/// First 12 hex characters, for log lines.
pub fn short_digest(digest: &str) -> &str {
    let hex = hex_part(digest).unwrap_or(digest);
    &hex[..hex.len().min(12)]
}

/// Checks that `declared` is a well-formed sha256 digest.
pub fn is_sha256_digest(declared: &str) -> bool {
    hex_part(declared).is_some_and(|hex| {
        hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    })
}

/// Fails with [`AppendError::DigestMismatch`] unless `bytes` hash to `declared`.
pub fn verify(what: &str, declared: &str, bytes: &[u8]) -> Result<()> {
    let computed = sha256_digest(bytes);
    if computed != declared {
        return Err(AppendError::DigestMismatch {
            what: what.to_string(),
            declared: declared.to_string(),
            computed,
        }
        .into());
    }
    Ok(())
}

/// Writer adapter that hashes everything passing through it.
///
/// Used when a blob is streamed to a destination that we cannot re-read cheaply.
pub struct DigestingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> DigestingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Returns the wrapped writer, the digest and the number of bytes written.
    pub fn finish(self) -> (W, String, u64) {
        let digest = format!("{}{}", SHA256_PREFIX, hex::encode(self.hasher.finalize()));
        (self.inner, digest, self.written)
    }
}

impl<W: Write> Write for DigestingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
