// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Content fingerprints for cache keys
//!
//! A fingerprint hashes the file name, size and modification time together
//! with the first and last [`CHUNK_SIZE`] bytes. Files that agree on all of
//! those but differ somewhere in the middle share a fingerprint; large files
//! are identified in constant I/O at the cost of that approximation.
//!
//! Changing [`CHUNK_SIZE`] changes every fingerprint of a file larger than the
//! chunk, so existing cache entries for such files become unreachable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::{ArgusError, Result};

/// Bytes sampled from each end of the file
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Fixed-width BLAKE3 digest identifying a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Lowercase hex rendering (64 chars)
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// Parse a 64 char hex digest
    pub fn from_hex(hex: &str) -> Result<Self> {
        blake3::Hash::from_hex(hex)
            .map(|h| Self(*h.as_bytes()))
            .map_err(|e| ArgusError::Config(format!("Invalid fingerprint {:?}: {}", hex, e)))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_hex()
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = ArgusError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

/// Fingerprint a file with the default chunk size
pub fn fingerprint(path: &Path) -> Result<Fingerprint> {
    fingerprint_with_chunk(path, CHUNK_SIZE)
}

/// Fingerprint a file sampling `chunk_size` bytes from each end
pub fn fingerprint_with_chunk(path: &Path, chunk_size: usize) -> Result<Fingerprint> {
    let meta = std::fs::metadata(path).map_err(|e| ArgusError::io(path, e))?;
    let size = meta.len();
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| format!("{}.{:09}", d.as_secs(), d.subsec_nanos()))
        .unwrap_or_else(|| "0".to_string());
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut hasher = blake3::Hasher::new();
    hasher.update(format!("{}|{}|{}", name, size, mtime).as_bytes());

    let mut file = File::open(path).map_err(|e| ArgusError::io(path, e))?;
    let mut buf = Vec::with_capacity(chunk_size);

    (&mut file)
        .take(chunk_size as u64)
        .read_to_end(&mut buf)
        .map_err(|e| ArgusError::io(path, e))?;
    hasher.update(&buf);

    if size > 2 * chunk_size as u64 {
        buf.clear();
        file.seek(SeekFrom::End(-(chunk_size as i64)))
            .map_err(|e| ArgusError::io(path, e))?;
        file.take(chunk_size as u64)
            .read_to_end(&mut buf)
            .map_err(|e| ArgusError::io(path, e))?;
        hasher.update(&buf);
    }

    Ok(Fingerprint(*hasher.finalize().as_bytes()))
}
