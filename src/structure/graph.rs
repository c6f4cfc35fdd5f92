//! The declared structure forest and its rebuild ordering.

use std::collections::{HashMap, VecDeque};
use std::path::{Component, Path};

use super::{StructureKind, StructureNode};
use crate::error::{GovernanceError, Result};

/// Read-only forest of declared structure nodes.
///
/// Built once from a [`super::StructureSource`]. Recovery mutates the
/// filesystem, never this graph.
#[derive(Debug, Clone, Default)]
pub struct StructureGraph {
    nodes: Vec<StructureNode>,
    by_id: HashMap<String, usize>,
    by_path: HashMap<String, usize>,
    children: HashMap<String, Vec<usize>>,
}

impl StructureGraph {
    /// An empty graph: every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build and validate the graph.
    ///
    /// Rejects unusable paths, duplicate ids or paths, dangling parent
    /// references, cycles, and file nodes with children.
    pub fn from_nodes(nodes: Vec<StructureNode>) -> Result<Self> {
        let mut graph = Self::default();

        for mut node in nodes {
            let normalized = normalize_relative(&node.path).ok_or_else(|| {
                GovernanceError::InvalidGraph(format!(
                    "node '{}' has an invalid path: '{}'",
                    node.id, node.path
                ))
            })?;
            node.path = normalized;

            if graph.by_id.contains_key(&node.id) {
                return Err(GovernanceError::InvalidGraph(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
            if let Some(&existing) = graph.by_path.get(&node.path) {
                return Err(GovernanceError::InvalidGraph(format!(
                    "nodes '{}' and '{}' both declare path '{}'",
                    graph.nodes[existing].id, node.id, node.path
                )));
            }

            let index = graph.nodes.len();
            graph.by_id.insert(node.id.clone(), index);
            graph.by_path.insert(node.path.clone(), index);
            graph.nodes.push(node);
        }

        for (index, node) in graph.nodes.iter().enumerate() {
            let Some(parent_id) = &node.parent_id else {
                continue;
            };
            let Some(&parent) = graph.by_id.get(parent_id) else {
                return Err(GovernanceError::InvalidGraph(format!(
                    "node '{}' references missing parent '{}'",
                    node.id, parent_id
                )));
            };
            if graph.nodes[parent].kind == StructureKind::File {
                return Err(GovernanceError::InvalidGraph(format!(
                    "file node '{}' cannot be the parent of '{}'",
                    parent_id, node.id
                )));
            }
            graph
                .children
                .entry(parent_id.clone())
                .or_default()
                .push(index);
        }

        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Walk each node's parent chain; a chain longer than the node count loops.
    fn check_acyclic(&self) -> Result<()> {
        let limit = self.nodes.len();
        for node in &self.nodes {
            let mut current = node;
            let mut steps = 0;
            while let Some(parent) = self.parent_of(current) {
                steps += 1;
                if steps > limit {
                    return Err(GovernanceError::InvalidGraph(format!(
                        "cycle detected through node '{}'",
                        node.id
                    )));
                }
                current = parent;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StructureNode> {
        self.nodes.iter()
    }

    pub fn get(&self, id: &str) -> Option<&StructureNode> {
        self.by_id.get(id).map(|&i| &self.nodes[i])
    }

    /// Find the node declared for a root-relative path.
    pub fn lookup(&self, path: &str) -> Option<&StructureNode> {
        let key = normalize_relative(path)?;
        self.by_path.get(&key).map(|&i| &self.nodes[i])
    }

    pub fn parent_of(&self, node: &StructureNode) -> Option<&StructureNode> {
        node.parent_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn children_of(&self, node: &StructureNode) -> Vec<&StructureNode> {
        self.children
            .get(&node.id)
            .map(|indices| indices.iter().map(|&i| &self.nodes[i]).collect())
            .unwrap_or_default()
    }

    /// Ancestors ordered from the forest root down to the node's parent.
    pub fn ancestors_of(&self, node: &StructureNode) -> Vec<&StructureNode> {
        let mut chain = Vec::new();
        let mut current = node;
        while let Some(parent) = self.parent_of(current) {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Missing ancestors (topmost first) followed by the node itself.
    ///
    /// Walks parent links until `exists` reports an ancestor present on disk
    /// or the forest root is passed, so parents are always created before
    /// their children.
    pub fn rebuild_order<'a, F>(&'a self, node: &'a StructureNode, exists: F) -> Vec<&'a StructureNode>
    where
        F: Fn(&StructureNode) -> bool,
    {
        let mut chain = vec![node];
        let mut current = node;
        while let Some(parent) = self.parent_of(current) {
            if exists(parent) {
                break;
            }
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Every node, parents before children; roots keep declaration order.
    pub fn topological_order(&self) -> Vec<&StructureNode> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue: VecDeque<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent_id.is_none())
            .map(|(i, _)| i)
            .collect();

        while let Some(index) = queue.pop_front() {
            let node = &self.nodes[index];
            order.push(node);
            if let Some(children) = self.children.get(&node.id) {
                queue.extend(children.iter().copied());
            }
        }
        order
    }
}

/// Normalize a declared relative path to its `/`-joined form.
///
/// Returns `None` for empty, absolute, or parent-escaping paths.
pub fn normalize_relative(path: &str) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(path.trim()).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
