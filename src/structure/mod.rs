//! Declared expected structure: nodes, the parent/child forest, and the
//! sources it is loaded from.

mod graph;
mod source;

pub use graph::{StructureGraph, normalize_relative};
pub use source::{StaticStructure, StructureRulesFile, StructureSource};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Whether a declared unit of structure is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureKind {
    File,
    Directory,
}

impl StructureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
        }
    }

    /// Kind of whatever currently lives at `path`, without following symlinks.
    pub fn of(path: &Path) -> Option<Self> {
        let meta = fs::symlink_metadata(path).ok()?;
        if meta.is_dir() {
            Some(Self::Directory)
        } else if meta.is_file() {
            Some(Self::File)
        } else {
            None
        }
    }

    /// Best guess for an undeclared path: a last component with an extension
    /// is a file, anything else a directory.
    pub fn infer(path: &Path) -> Self {
        if path.extension().is_some() {
            Self::File
        } else {
            Self::Directory
        }
    }
}

impl std::fmt::Display for StructureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StructureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "directory" | "dir" => Ok(Self::Directory),
            other => Err(format!("unknown structure kind: {other}")),
        }
    }
}

/// One declared unit of expected structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureNode {
    pub id: String,
    /// Path relative to the safe root.
    pub path: String,
    pub kind: StructureKind,
    #[serde(default, alias = "parentId", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl StructureNode {
    pub fn new(id: &str, path: &str, kind: StructureKind) -> Self {
        Self {
            id: id.to_string(),
            path: path.to_string(),
            kind,
            parent_id: None,
        }
    }

    pub fn directory(id: &str, path: &str) -> Self {
        Self::new(id, path, StructureKind::Directory)
    }

    pub fn file(id: &str, path: &str) -> Self {
        Self::new(id, path, StructureKind::File)
    }

    pub fn with_parent(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_string());
        self
    }
}
