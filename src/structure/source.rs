//! Where declared structure comes from.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::StructureNode;
use crate::error::{GovernanceError, Result};
use crate::fs_guard;

/// Maximum rules file size (1 MB).
const MAX_RULES_BYTES: u64 = 1024 * 1024;

/// Governance rule source that declares the expected structure.
pub trait StructureSource: Send + Sync {
    fn load(&self) -> Result<Vec<StructureNode>>;
}

/// Structure declared in code.
#[derive(Debug, Clone, Default)]
pub struct StaticStructure(pub Vec<StructureNode>);

impl StructureSource for StaticStructure {
    fn load(&self) -> Result<Vec<StructureNode>> {
        Ok(self.0.clone())
    }
}

/// TOML rules file:
///
/// ```toml
/// [[nodes]]
/// id = "reports"
/// path = "reports"
/// kind = "directory"
///
/// [[nodes]]
/// id = "reports-2025"
/// path = "reports/2025"
/// kind = "directory"
/// parent_id = "reports"
/// ```
#[derive(Debug, Clone)]
pub struct StructureRulesFile {
    path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RulesDocument {
    #[serde(default)]
    nodes: Vec<StructureNode>,
}

impl StructureRulesFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize nodes in the rules file format.
    pub fn render(nodes: &[StructureNode]) -> Result<String> {
        let doc = RulesDocument {
            nodes: nodes.to_vec(),
        };
        toml::to_string_pretty(&doc).map_err(|e| GovernanceError::Config(e.to_string()))
    }
}

impl StructureSource for StructureRulesFile {
    fn load(&self) -> Result<Vec<StructureNode>> {
        let content = fs_guard::read_validated_string(&self.path, MAX_RULES_BYTES)?;
        let doc: RulesDocument = toml::from_str(&content).map_err(|e| {
            GovernanceError::Config(format!(
                "invalid structure rules {}: {}",
                self.path.display(),
                e
            ))
        })?;
        debug!(
            "Loaded {} structure nodes from {}",
            doc.nodes.len(),
            self.path.display()
        );
        Ok(doc.nodes)
    }
}
