//! Edge rows of the bitemporal adjacency relation.
//!
//! The edge store is the source of truth for hierarchy shape. Each row links
//! a child node to its parent (or to nothing, for roots) for one valid-time
//! window, and carries a materialized root-to-node [`NodePath`] that enables
//! prefix/containment queries without traversal.
//!
//! Invariant: for a fixed (tenant, hierarchy, child), valid-time windows do
//! not overlap. Edges are written by hierarchy-edit operations; the deep-read
//! engine only reads them (the insert path here exists for loaders and
//! fixtures).

use super::temporal::ValidPeriod;
use super::{NodeId, TenantId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between node ids in a materialized path.
const PATH_SEPARATOR: char = '.';

/// A materialized root-to-node key: ancestor node ids joined by `.`,
/// ending with the node itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(String);

impl NodePath {
    /// Creates a single-segment path for a root node.
    #[must_use]
    pub fn root(node_id: NodeId) -> Self {
        Self(node_id.to_string())
    }

    /// Returns the path extended by one child segment.
    #[must_use]
    pub fn child(&self, node_id: NodeId) -> Self {
        Self(format!("{}{PATH_SEPARATOR}{node_id}", self.0))
    }

    /// Parses a stored path string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if any segment is not a uuid.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidInput("empty node path".to_string()));
        }
        for segment in s.split(PATH_SEPARATOR) {
            NodeId::parse(segment)?;
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the path as its stored string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the node ids along the path, root first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a segment fails to parse, which
    /// indicates a corrupted row.
    pub fn segments(&self) -> Result<Vec<NodeId>> {
        self.0.split(PATH_SEPARATOR).map(NodeId::parse).collect()
    }

    /// Returns the number of segments (node depth + 1).
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.split(PATH_SEPARATOR).count()
    }

    /// Returns `true` if the path has no segments. Never true for a parsed path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks whether `self` is a prefix of `other` (including equality).
    ///
    /// Matches whole segments only: `a.b` is not a prefix of `a.bc`.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        other.0 == self.0
            || (other.0.starts_with(&self.0)
                && other.0.as_bytes().get(self.0.len()) == Some(&(PATH_SEPARATOR as u8)))
    }

    /// Returns the second-to-last segment: the node's immediate parent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a segment fails to parse.
    pub fn parent_segment(&self) -> Result<Option<NodeId>> {
        let segments = self.segments()?;
        if segments.len() < 2 {
            return Ok(None);
        }
        Ok(segments.get(segments.len() - 2).copied())
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the bitemporal parent/child edge relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Tenant the edge belongs to.
    pub tenant_id: TenantId,
    /// Hierarchy type, e.g. `OrgUnit`.
    pub hierarchy: String,
    /// Parent node; `None` iff the child is a root.
    pub parent_node_id: Option<NodeId>,
    /// Child node.
    pub child_node_id: NodeId,
    /// Valid-time window of the edge.
    pub period: ValidPeriod,
    /// Distance from the root (root edges have depth 0).
    pub depth: u32,
    /// Materialized root-to-child path.
    pub path: NodePath,
}

impl Edge {
    /// Creates a root edge (no parent, depth 0).
    #[must_use]
    pub fn root(
        tenant_id: TenantId,
        hierarchy: impl Into<String>,
        node_id: NodeId,
        period: ValidPeriod,
    ) -> Self {
        Self {
            tenant_id,
            hierarchy: hierarchy.into(),
            parent_node_id: None,
            child_node_id: node_id,
            period,
            depth: 0,
            path: NodePath::root(node_id),
        }
    }

    /// Creates an edge placing `node_id` under the node of `parent`.
    ///
    /// Depth and path are derived from the parent edge, which is how
    /// hierarchy-edit operations keep the materialized columns consistent.
    #[must_use]
    pub fn child_of(parent: &Self, node_id: NodeId, period: ValidPeriod) -> Self {
        Self {
            tenant_id: parent.tenant_id,
            hierarchy: parent.hierarchy.clone(),
            parent_node_id: Some(parent.child_node_id),
            child_node_id: node_id,
            period,
            depth: parent.depth + 1,
            path: parent.path.child(node_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_path_prefix_matches_whole_segments() {
        let a = NodeId::generate();
        let b = NodeId::generate();
        let root = NodePath::root(a);
        let deep = root.child(b);

        assert!(root.is_prefix_of(&root));
        assert!(root.is_prefix_of(&deep));
        assert!(!deep.is_prefix_of(&root));
    }

    #[test]
    fn test_path_prefix_rejects_partial_segment() {
        let a = NodePath::parse("11111111-1111-1111-1111-111111111111").unwrap();
        let not_child =
            NodePath::parse("11111111-1111-1111-1111-111111111112").unwrap();
        assert!(!a.is_prefix_of(&not_child));
    }

    #[test]
    fn test_path_segments_and_parent() {
        let a = NodeId::generate();
        let b = NodeId::generate();
        let c = NodeId::generate();
        let path = NodePath::root(a).child(b).child(c);

        assert_eq!(path.len(), 3);
        assert_eq!(path.segments().unwrap(), vec![a, b, c]);
        assert_eq!(path.parent_segment().unwrap(), Some(b));
        assert_eq!(NodePath::root(a).parent_segment().unwrap(), None);
    }

    #[test]
    fn test_path_parse_rejects_garbage() {
        assert!(NodePath::parse("").is_err());
        assert!(NodePath::parse("a.b").is_err());
    }

    #[test]
    fn test_child_of_derives_depth_and_path() {
        let tenant = TenantId::generate();
        let a = NodeId::generate();
        let b = NodeId::generate();
        let root = Edge::root(tenant, "OrgUnit", a, ValidPeriod::open_from(d("2024-01-01")));
        let child = Edge::child_of(&root, b, ValidPeriod::open_from(d("2024-06-01")));

        assert_eq!(child.parent_node_id, Some(a));
        assert_eq!(child.depth, 1);
        assert!(root.path.is_prefix_of(&child.path));
    }
}
