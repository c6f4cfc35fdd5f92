use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::digest::is_sha256_digest;
use crate::error::{GovernanceError, Result};
use crate::fs_guard;
use crate::ids::is_safe_id;

/// Predicate type of every attestation this crate produces.
pub const SLSA_PROVENANCE_V1: &str = "https://slsa.dev/provenance/v1";

/// Attestation files larger than this are refused on load (1 MB).
const MAX_ATTESTATION_BYTES: u64 = 1024 * 1024;

/// Who produced the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderIdentity {
    pub id: String,
    pub version: String,
}

impl BuilderIdentity {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationSubject {
    /// File name of the artifact.
    pub name: String,
    /// `sha256:<hex>` of the artifact content.
    pub digest: String,
    /// Path relative to the safe root.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationPredicate {
    #[serde(rename = "type")]
    pub predicate_type: String,
    pub builder: BuilderIdentity,
}

/// SLSA-style provenance binding one artifact digest to a builder.
///
/// The shape is checked, nothing is signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildAttestation {
    pub id: String,
    pub subject: AttestationSubject,
    pub predicate: AttestationPredicate,
}

/// Structural check of a typed attestation. Never fails, only answers.
pub fn verify_attestation(attestation: &BuildAttestation) -> bool {
    let subject = &attestation.subject;
    let predicate = &attestation.predicate;
    !attestation.id.trim().is_empty()
        && !subject.path.trim().is_empty()
        && is_sha256_digest(&subject.digest)
        && !predicate.predicate_type.trim().is_empty()
        && !predicate.builder.id.trim().is_empty()
}

/// Structural check of untyped JSON, for input that may not even deserialize.
pub fn verify_attestation_json(value: &Value) -> bool {
    match serde_json::from_value::<BuildAttestation>(value.clone()) {
        Ok(attestation) => verify_attestation(&attestation),
        Err(e) => {
            debug!("Attestation does not deserialize: {}", e);
            false
        }
    }
}

/// Canonical JSON text of an attestation.
pub fn export_attestation(attestation: &BuildAttestation) -> Result<String> {
    Ok(serde_json::to_string(attestation)?)
}

/// Parse exported text. Shape problems past deserialization are left to
/// [`verify_attestation`].
pub fn import_attestation(text: &str) -> Result<BuildAttestation> {
    serde_json::from_str(text).map_err(|e| GovernanceError::AttestationMalformed(e.to_string()))
}

/// Write `<dir>/<id>.json` and return its path.
pub fn save_attestation(attestation: &BuildAttestation, dir: &Path) -> Result<PathBuf> {
    if !is_safe_id(&attestation.id) {
        return Err(GovernanceError::AttestationMalformed(format!(
            "id is not usable as a file name: {:?}",
            attestation.id
        )));
    }
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", attestation.id));
    let text = serde_json::to_string_pretty(attestation)?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text)?;
    fs::rename(&tmp, &path)?;
    debug!("Saved attestation {} to {}", attestation.id, path.display());
    Ok(path)
}

pub fn load_attestation(path: &Path) -> Result<BuildAttestation> {
    let text = fs_guard::read_validated_string(path, MAX_ATTESTATION_BYTES)?;
    import_attestation(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> BuildAttestation {
        BuildAttestation {
            id: "att_00000001_a1b2c3d4e5f6".to_string(),
            subject: AttestationSubject {
                name: "app.tar.gz".to_string(),
                digest: format!("sha256:{}", "ab".repeat(32)),
                path: "dist/app.tar.gz".to_string(),
            },
            predicate: AttestationPredicate {
                predicate_type: SLSA_PROVENANCE_V1.to_string(),
                builder: BuilderIdentity::new("ci", "1.0.0"),
            },
        }
    }

    #[test]
    fn predicate_type_serializes_as_type() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["predicate"]["type"], SLSA_PROVENANCE_V1);
        assert_eq!(json["predicate"]["builder"]["id"], "ci");
    }

    #[test]
    fn well_formed_attestation_verifies() {
        assert!(verify_attestation(&sample()));
    }

    #[test]
    fn malformed_fields_fail_verification() {
        let mut a = sample();
        a.subject.digest = "sha256:xyz".to_string();
        assert!(!verify_attestation(&a));

        let mut a = sample();
        a.subject.digest = format!("md5:{}", "ab".repeat(32));
        assert!(!verify_attestation(&a));

        let mut a = sample();
        a.id = String::new();
        assert!(!verify_attestation(&a));

        let mut a = sample();
        a.predicate.builder.id = " ".to_string();
        assert!(!verify_attestation(&a));
    }

    #[test]
    fn json_verification_is_total() {
        assert!(verify_attestation_json(&serde_json::to_value(sample()).unwrap()));
        assert!(!verify_attestation_json(&json!(null)));
        assert!(!verify_attestation_json(&json!({"id": "att_1"})));
        assert!(!verify_attestation_json(&json!({
            "id": "att_1",
            "subject": {"name": "a", "digest": "sha256:00", "path": "a"},
            "predicate": {"type": SLSA_PROVENANCE_V1, "builder": {"id": "ci", "version": "1"}}
        })));
    }

    #[test]
    fn import_rejects_garbage() {
        let err = import_attestation("{not json").unwrap_err();
        assert!(matches!(err, GovernanceError::AttestationMalformed(_)));
    }

    #[test]
    fn save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let a = sample();
        let path = save_attestation(&a, &tmp.path().join("attestations")).unwrap();
        assert_eq!(path.file_name().unwrap(), "att_00000001_a1b2c3d4e5f6.json");
        assert_eq!(load_attestation(&path).unwrap(), a);
    }

    #[test]
    fn save_refuses_unsafe_id() {
        let tmp = tempfile::tempdir().unwrap();
        let mut a = sample();
        a.id = "../escape".to_string();
        assert!(save_attestation(&a, tmp.path()).is_err());
        assert!(!tmp.path().parent().unwrap().join("escape.json").exists());
    }
}
