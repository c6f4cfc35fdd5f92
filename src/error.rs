//! Error types for govguard.
//!
//! Path security violations and invalid attestation subjects surface as
//! errors. Ordinary recovery failures are captured in a
//! [`crate::validator::ValidationOutcome`] instead.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GovernanceError {
    /// The canonical form of a path is not a descendant of the safe root.
    /// Never retried; raised before any filesystem mutation.
    #[error("Path escapes safe root: {path} (root: {})", .root.display())]
    PathSecurity { path: String, root: PathBuf },

    #[error("Path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Recovery exhausted for {} after {attempts} attempts", .path.display())]
    RecoveryExhausted { path: PathBuf, attempts: usize },

    #[error("Validation failed for {}: {reason}", .path.display())]
    ValidationFailed { path: PathBuf, reason: String },

    #[error("Subject path must be a file: {}", .0.display())]
    InvalidSubject(PathBuf),

    #[error("Malformed attestation: {0}")]
    AttestationMalformed(String),

    #[error("Invalid structure graph: {0}")]
    InvalidGraph(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File too large: {} ({size} bytes, max {max} bytes)", .path.display())]
    TooLarge { path: PathBuf, size: u64, max: u64 },

    #[error("Refusing to read symlink: {}", .0.display())]
    Symlink(PathBuf),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GovernanceError {
    pub(crate) fn security(path: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self::PathSecurity {
            path: path.into(),
            root: root.into(),
        }
    }

    /// True for traversal violations, which callers must never retry.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::PathSecurity { .. })
    }
}

/// Result type alias for govguard operations.
pub type Result<T> = std::result::Result<T, GovernanceError>;
