//! Build provenance: file digests and SLSA-style attestations.
//!
//! Subject files are reached through a [`SubjectAccess`]. The default is the
//! self-healing [`PathValidator`], so a declared artifact that went missing
//! is rebuilt (or restored from a snapshot) before it is digested. Use
//! [`AttestationService::direct`] to read through the bare resolver instead.

mod attestation;
mod service;
mod store;

pub use attestation::{
    AttestationPredicate, AttestationSubject, BuildAttestation, BuilderIdentity,
    SLSA_PROVENANCE_V1, export_attestation, import_attestation, load_attestation,
    save_attestation, verify_attestation, verify_attestation_json,
};
pub use service::AttestationService;
pub use store::AttestationStore;

use async_trait::async_trait;

use crate::error::{GovernanceError, Result};
use crate::resolver::{ResolvedPath, SafePathResolver};
use crate::structure::StructureKind;
use crate::validator::{PathValidator, ValidateOptions};

/// How the attestation service reaches a subject path.
#[async_trait]
pub trait SubjectAccess: Send + Sync {
    /// Resolve `raw` to something that exists inside the safe root.
    async fn access(&self, raw: &str) -> Result<ResolvedPath>;
}

#[async_trait]
impl SubjectAccess for SafePathResolver {
    async fn access(&self, raw: &str) -> Result<ResolvedPath> {
        let resolved = self.resolve(raw)?;
        if StructureKind::of(resolved.absolute()).is_none() {
            return Err(GovernanceError::NotFound(resolved.absolute().to_path_buf()));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl SubjectAccess for PathValidator {
    async fn access(&self, raw: &str) -> Result<ResolvedPath> {
        self.validate_path(raw, ValidateOptions::default())
            .await
            .into_result()?;
        self.resolver().resolve(raw)
    }
}
