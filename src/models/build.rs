//! Build registry records and deep-read result shapes.

use super::temporal::ValidPeriod;
use super::{BuildId, NodeId, TenantId};
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three interchangeable deep-read query strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Live edge traversal via materialized paths. Always current, pays a
    /// path query per call.
    Edges,
    /// The active temporal-closure build, filtered by valid-time coverage.
    Closure,
    /// The active date-pinned snapshot build for the exact as-of date.
    Snapshot,
}

impl BackendKind {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Edges => "edges",
            Self::Closure => "closure",
            Self::Snapshot => "snapshot",
        }
    }

    /// Parses a backend name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for unknown names.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "edges" => Ok(Self::Edges),
            "closure" => Ok(Self::Closure),
            "snapshot" => Ok(Self::Snapshot),
            other => Err(Error::InvalidInput(format!(
                "unknown deep-read backend: {other}"
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// Registry row inserted, rows not yet fully written.
    Building,
    /// Rows committed; the build is activatable.
    Ready,
    /// The build aborted; `notes` carries the cause.
    Failed,
}

impl BuildStatus {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    /// Parses a stored status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for unknown values, which indicates a
    /// corrupted registry row.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "building" => Ok(Self::Building),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!(
                "unknown build status: {other}"
            ))),
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registry row: the lifecycle record of a closure or snapshot build.
///
/// Invariant: at most one row per (tenant, hierarchy[, as-of date]) has
/// `is_active && status == Ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildRecord {
    /// Tenant the build belongs to.
    pub tenant_id: TenantId,
    /// Hierarchy type the build covers.
    pub hierarchy: String,
    /// The build's immutable identifier.
    pub build_id: BuildId,
    /// Snapshot as-of date; `None` for closure builds.
    pub as_of_date: Option<NaiveDate>,
    /// Lifecycle state.
    pub status: BuildStatus,
    /// Whether this build currently answers queries.
    pub is_active: bool,
    /// Unix timestamp of registry-row insertion.
    pub built_at: i64,
    /// Request id of the caller that triggered the build.
    pub source_request_id: Option<String>,
    /// Failure cause, for `failed` builds.
    pub notes: Option<String>,
}

/// Outcome of a build call (dry-run or apply).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildResult {
    /// Tenant the build was scoped to.
    pub tenant_id: TenantId,
    /// Hierarchy type the build was scoped to.
    pub hierarchy: String,
    /// Which backend's table the build targets.
    pub backend: BackendKind,
    /// Allocated build id; `None` on dry-run.
    pub build_id: Option<BuildId>,
    /// Snapshot as-of date; `None` for closure builds.
    pub as_of_date: Option<NaiveDate>,
    /// Whether this was a dry-run.
    pub dry_run: bool,
    /// Whether the build was activated.
    pub activated: bool,
    /// Number of closure/snapshot rows produced.
    pub row_count: u64,
    /// Deepest relation produced. A value at the hard cap suggests a cycle
    /// or pathological depth in the edge data.
    pub max_depth: u32,
    /// Request id of the caller.
    pub source_request_id: Option<String>,
}

/// Outcome of pruning superseded builds (dry-run or apply).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PruneResult {
    /// Tenant the prune was scoped to.
    pub tenant_id: TenantId,
    /// Hierarchy type the prune was scoped to.
    pub hierarchy: String,
    /// Which backend's registry was pruned.
    pub backend: BackendKind,
    /// Whether this was a dry-run.
    pub dry_run: bool,
    /// Number of builds deleted, or that would be deleted on dry-run (rows
    /// cascade).
    pub deleted_builds: u64,
}

/// A single ancestor/descendant relation, as returned by the facade.
///
/// Transient query result; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeepReadRelation {
    /// The related node.
    pub node_id: NodeId,
    /// Distance from the query node (0 = the node itself).
    pub depth: u32,
}

/// Direction of a deep-read relation query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationDirection {
    /// Walk towards the root.
    Ancestors,
    /// Walk towards the leaves.
    Descendants,
}

impl RelationDirection {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ancestors => "ancestors",
            Self::Descendants => "descendants",
        }
    }
}

/// One computed closure row: an (ancestor, descendant) pair at the depth of
/// one realizing path, carrying the valid-time intersection along that path.
/// A pair reachable through several windows or path lengths has one row per
/// distinct (depth, window) variant; readers filter by as-of coverage and
/// order by depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClosureRow {
    /// Ancestor node.
    pub ancestor_node_id: NodeId,
    /// Descendant node.
    pub descendant_node_id: NodeId,
    /// Length of the realizing path (0 for the reflexive pair).
    pub depth: u32,
    /// Dates on which every edge along the path holds.
    pub period: ValidPeriod,
}

/// One computed snapshot row: an (ancestor, descendant) pair at its minimum
/// depth, date-pinned by the build's as-of date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotRow {
    /// Ancestor node.
    pub ancestor_node_id: NodeId,
    /// Descendant node.
    pub descendant_node_id: NodeId,
    /// Path length between the pair (0 for the reflexive pair).
    pub depth: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("edges", BackendKind::Edges)]
    #[test_case("closure", BackendKind::Closure)]
    #[test_case("snapshot", BackendKind::Snapshot)]
    fn test_backend_kind_roundtrip(name: &str, kind: BackendKind) {
        assert_eq!(BackendKind::parse(name).unwrap(), kind);
        assert_eq!(kind.as_str(), name);
    }

    #[test]
    fn test_backend_kind_rejects_unknown() {
        assert!(BackendKind::parse("ltree").is_err());
    }

    #[test_case("building", BuildStatus::Building)]
    #[test_case("ready", BuildStatus::Ready)]
    #[test_case("failed", BuildStatus::Failed)]
    fn test_build_status_roundtrip(name: &str, status: BuildStatus) {
        assert_eq!(BuildStatus::parse(name).unwrap(), status);
        assert_eq!(status.as_str(), name);
    }
}
