//! Lookup over attestations saved as `<id>.json` files in one directory.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::attestation::{BuildAttestation, load_attestation, save_attestation};
use crate::digest::SHA256_PREFIX;
use crate::error::{GovernanceError, Result};
use crate::ids::is_safe_id;

/// Directory of saved attestations.
#[derive(Debug, Clone)]
pub struct AttestationStore {
    dir: PathBuf,
}

impl AttestationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save `attestation` as `<id>.json`, replacing any earlier copy.
    pub fn save(&self, attestation: &BuildAttestation) -> Result<PathBuf> {
        save_attestation(attestation, &self.dir)
    }

    /// The attestation with `id`, if one was saved.
    pub fn get(&self, id: &str) -> Result<Option<BuildAttestation>> {
        if !is_safe_id(id) {
            return Err(GovernanceError::AttestationMalformed(format!(
                "not an attestation id: {:?}",
                id
            )));
        }
        let path = self.dir.join(format!("{}.json", id));
        if !path.exists() {
            return Ok(None);
        }
        load_attestation(&path).map(Some)
    }

    /// Every readable attestation, ordered by id. Files that do not parse
    /// are skipped with a warning.
    pub fn list(&self) -> Result<Vec<BuildAttestation>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut attestations = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            match load_attestation(&path) {
                Ok(attestation) => attestations.push(attestation),
                Err(e) => warn!("Skipping attestation {}: {}", path.display(), e),
            }
        }

        attestations.sort_by(|a, b| a.id.cmp(&b.id));
        debug!(
            "Found {} attestations in {}",
            attestations.len(),
            self.dir.display()
        );
        Ok(attestations)
    }

    /// Attestations whose subject has `digest`. A bare hex digest is taken
    /// to be SHA-256.
    pub fn for_digest(&self, digest: &str) -> Result<Vec<BuildAttestation>> {
        let wanted = normalize_digest(digest);
        Ok(self
            .list()?
            .into_iter()
            .filter(|a| a.subject.digest == wanted)
            .collect())
    }
}

fn normalize_digest(digest: &str) -> String {
    let digest = digest.trim().to_ascii_lowercase();
    if digest.contains(':') {
        digest
    } else {
        format!("{}{}", SHA256_PREFIX, digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::{
        AttestationPredicate, AttestationSubject, BuilderIdentity, SLSA_PROVENANCE_V1,
    };

    const DIGEST_A: &str = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
    const DIGEST_B: &str = "sha256:486ea46224d1bb4fb680f34f7c9ad96a8f24ec88be73ea8e5a6c65260e9cb8a7";

    fn attestation(id: &str, digest: &str) -> BuildAttestation {
        BuildAttestation {
            id: id.to_string(),
            subject: AttestationSubject {
                name: "app.tar.gz".to_string(),
                digest: digest.to_string(),
                path: "dist/app.tar.gz".to_string(),
            },
            predicate: AttestationPredicate {
                predicate_type: SLSA_PROVENANCE_V1.to_string(),
                builder: BuilderIdentity::new("https://ci.example.com", "1.0"),
            },
        }
    }

    #[test]
    fn get_returns_saved_attestation() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AttestationStore::new(tmp.path());
        let saved = attestation("att_2_b", DIGEST_A);
        store.save(&saved).unwrap();

        assert_eq!(store.get("att_2_b").unwrap(), Some(saved));
        assert_eq!(store.get("att_9_z").unwrap(), None);
    }

    #[test]
    fn get_refuses_path_like_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AttestationStore::new(tmp.path().join("attestations"));
        fs::write(tmp.path().join("secret.json"), "{}").unwrap();

        let err = store.get("../secret").unwrap_err();
        assert!(matches!(err, GovernanceError::AttestationMalformed(_)));
    }

    #[test]
    fn list_is_sorted_and_skips_unreadable_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AttestationStore::new(tmp.path());
        store.save(&attestation("att_2_b", DIGEST_A)).unwrap();
        store.save(&attestation("att_1_a", DIGEST_B)).unwrap();
        fs::write(tmp.path().join("broken.json"), "not json").unwrap();
        fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        let ids: Vec<_> = store.list().unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, ["att_1_a", "att_2_b"]);
    }

    #[test]
    fn missing_directory_lists_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AttestationStore::new(tmp.path().join("never-created"));
        assert!(store.list().unwrap().is_empty());
        assert!(store.for_digest(DIGEST_A).unwrap().is_empty());
    }

    #[test]
    fn for_digest_matches_prefixed_and_bare_forms() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AttestationStore::new(tmp.path());
        store.save(&attestation("att_1_a", DIGEST_A)).unwrap();
        store.save(&attestation("att_2_b", DIGEST_B)).unwrap();
        store.save(&attestation("att_3_c", DIGEST_A)).unwrap();

        let ids = |digest: &str| -> Vec<String> {
            store
                .for_digest(digest)
                .unwrap()
                .into_iter()
                .map(|a| a.id)
                .collect()
        };
        assert_eq!(ids(DIGEST_A), ["att_1_a", "att_3_c"]);

        let bare = DIGEST_A.strip_prefix(SHA256_PREFIX).unwrap().to_uppercase();
        assert_eq!(ids(&bare), ["att_1_a", "att_3_c"]);
        assert_eq!(ids(DIGEST_B), ["att_2_b"]);
        assert!(ids("sha256:0000").is_empty());
    }
}
