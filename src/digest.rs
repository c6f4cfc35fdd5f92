//! `sha256:<hex>` content digests.
//!
//! Files are hashed in 64 KiB chunks with a size bound so that a single huge
//! artifact cannot stall a snapshot walk or an attestation request.

use sha2::{Digest, Sha256};
use std::{fs, io::Read, path::Path};

use crate::error::{GovernanceError, Result};

/// Prefix used for every digest string produced by this crate.
pub const SHA256_PREFIX: &str = "sha256:";

/// Default per-file limit for digesting (500 MB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = 500 * 1024 * 1024;

/// Digest of an in-memory byte slice, as `sha256:<lower-hex>`.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{SHA256_PREFIX}{}", hex::encode(hasher.finalize()))
}

/// Streams a regular file through SHA-256.
///
/// Returns the prefixed digest and the number of bytes hashed. Symlinks are
/// refused; callers are expected to hand in an already-resolved path.
pub fn sha256_file(path: &Path, max_bytes: u64) -> Result<(String, u64)> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Err(GovernanceError::Symlink(path.to_path_buf()));
    }
    if meta.len() > max_bytes {
        return Err(GovernanceError::TooLarge {
            path: path.to_path_buf(),
            size: meta.len(),
            max: max_bytes,
        });
    }

    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total: u64 = 0;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if total > max_bytes {
            // File grew while we were reading it.
            return Err(GovernanceError::TooLarge {
                path: path.to_path_buf(),
                size: total,
                max: max_bytes,
            });
        }
        hasher.update(&buf[..n]);
    }
    Ok((
        format!("{SHA256_PREFIX}{}", hex::encode(hasher.finalize())),
        total,
    ))
}

/// True if `digest` has the exact shape `sha256:` followed by 64 lower-case hex chars.
pub fn is_sha256_digest(digest: &str) -> bool {
    digest
        .strip_prefix(SHA256_PREFIX)
        .is_some_and(|hex| {
            hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        })
}

/// The hex part of a prefixed digest, if it is well formed.
pub fn digest_hex(digest: &str) -> Option<&str> {
    if is_sha256_digest(digest) {
        digest.strip_prefix(SHA256_PREFIX)
    } else {
        None
    }
}
