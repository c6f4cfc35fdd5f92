use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use super::SubjectAccess;
use super::attestation::{
    AttestationPredicate, AttestationSubject, BuildAttestation, BuilderIdentity,
    SLSA_PROVENANCE_V1, verify_attestation,
};
use crate::digest::{DEFAULT_MAX_FILE_BYTES, sha256_file};
use crate::error::{GovernanceError, Result};
use crate::ids::{IdProvider, MonotonicIdProvider};
use crate::resolver::{ResolvedPath, SafePathResolver};
use crate::validator::PathValidator;

/// Digests artifacts and issues build attestations for them.
pub struct AttestationService {
    access: Arc<dyn SubjectAccess>,
    ids: Arc<dyn IdProvider>,
    max_file_bytes: u64,
}

impl AttestationService {
    /// Subjects are reached through the self-healing validator.
    pub fn new(validator: Arc<PathValidator>) -> Self {
        let max_file_bytes = validator.config().limits.max_file_bytes;
        Self::with_access(validator).with_max_file_bytes(max_file_bytes)
    }

    /// Subjects must already exist; nothing is ever created.
    pub fn direct(resolver: SafePathResolver) -> Self {
        Self::with_access(Arc::new(resolver))
    }

    pub fn with_access(access: Arc<dyn SubjectAccess>) -> Self {
        Self {
            access,
            ids: Arc::new(MonotonicIdProvider::new()),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdProvider>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    /// `sha256:<hex>` of the file at `raw`.
    pub async fn generate_file_digest(&self, raw: &str) -> Result<String> {
        let subject = self.subject_file(raw).await?;
        self.digest(subject.absolute().to_path_buf()).await
    }

    /// Attest the regular file at `raw` as built by `builder`.
    pub async fn create_build_attestation(
        &self,
        raw: &str,
        builder: BuilderIdentity,
    ) -> Result<BuildAttestation> {
        let subject = self.subject_file(raw).await?;
        let digest = self.digest(subject.absolute().to_path_buf()).await?;
        let name = subject
            .absolute()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let attestation = BuildAttestation {
            id: self.ids.next_id("att"),
            subject: AttestationSubject {
                name,
                digest,
                path: subject.key(),
            },
            predicate: AttestationPredicate {
                predicate_type: SLSA_PROVENANCE_V1.to_string(),
                builder,
            },
        };
        info!(
            "Created attestation {} for {} ({})",
            attestation.id, attestation.subject.path, attestation.subject.digest
        );
        Ok(attestation)
    }

    /// Structural check only; see [`Self::verify_subject_content`] for the
    /// content check.
    pub fn verify_attestation(&self, attestation: &BuildAttestation) -> bool {
        verify_attestation(attestation)
    }

    /// Re-hash the live subject and compare it with the recorded digest.
    ///
    /// Structurally invalid attestations answer `false` without touching the
    /// filesystem.
    pub async fn verify_subject_content(&self, attestation: &BuildAttestation) -> Result<bool> {
        if !verify_attestation(attestation) {
            return Ok(false);
        }
        let current = self.generate_file_digest(&attestation.subject.path).await?;
        let matches = current == attestation.subject.digest;
        if !matches {
            debug!(
                "Subject {} changed: attested {}, now {}",
                attestation.subject.path, attestation.subject.digest, current
            );
        }
        Ok(matches)
    }

    async fn subject_file(&self, raw: &str) -> Result<ResolvedPath> {
        let subject = self.access.access(raw).await?;
        if !subject.absolute().is_file() {
            return Err(GovernanceError::InvalidSubject(PathBuf::from(raw)));
        }
        Ok(subject)
    }

    async fn digest(&self, path: PathBuf) -> Result<String> {
        let max = self.max_file_bytes;
        let (digest, _) = tokio::task::spawn_blocking(move || sha256_file(&path, max))
            .await
            .map_err(|e| GovernanceError::Io(std::io::Error::other(e)))??;
        Ok(digest)
    }
}
