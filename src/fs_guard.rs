//! Symlink-refusing, size-bounded reads for config, rule and attestation files.

use std::{fs, path::Path};

use crate::error::{GovernanceError, Result};

/// Reads a file after verifying it is not a symlink and is within `max_bytes`.
///
/// NOTE: narrow TOCTOU window between `symlink_metadata()` and `fs::read()`.
/// The check still catches accidental symlinks.
pub fn read_validated(path: &Path, max_bytes: u64) -> Result<Vec<u8>> {
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
    Ok(fs::read(path)?)
}

/// [`read_validated`] decoded as UTF-8.
pub fn read_validated_string(path: &Path, max_bytes: u64) -> Result<String> {
    let bytes = read_validated(path, max_bytes)?;
    String::from_utf8(bytes).map_err(|e| {
        GovernanceError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })
}
