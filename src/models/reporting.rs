//! Materialized reporting-node rows.

use super::{BuildId, NodeId, TenantId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A linked-object summary carried on a reporting row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkSummary {
    /// Linked object type.
    pub object_type: String,
    /// Linked object key.
    pub object_key: String,
    /// Relation type.
    pub link_type: String,
}

/// One flat, denormalized reporting row for a node, derived from an active
/// snapshot build. Full-overwrite semantics: rows for a (tenant, hierarchy,
/// as-of date) key are deleted and re-inserted as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportingNode {
    /// The node the row describes.
    pub org_node_id: NodeId,
    /// Stable business code.
    pub code: String,
    /// Display name at the as-of date.
    pub name: String,
    /// Lifecycle status at the as-of date.
    pub status: String,
    /// Immediate parent (second-to-last path element); `None` for roots.
    pub parent_node_id: Option<NodeId>,
    /// Distance from the root.
    pub depth: u32,
    /// Full root-to-node path as node ids.
    pub path_node_ids: Vec<NodeId>,
    /// Path as business codes, same order.
    pub path_codes: Vec<String>,
    /// Path as display names, same order.
    pub path_names: Vec<String>,
    /// Inherited security-group keys, ordered by (winning depth, key).
    /// Empty when the materialization excluded security groups.
    pub security_group_keys: Vec<String>,
    /// Linked-object summaries. Empty when the materialization excluded links.
    pub links: Vec<LinkSummary>,
}

/// Outcome of a reporting materialization (dry-run or apply).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportingBuildResult {
    /// Tenant the materialization was scoped to.
    pub tenant_id: TenantId,
    /// Hierarchy type the materialization was scoped to.
    pub hierarchy: String,
    /// The as-of date of the underlying snapshot.
    pub as_of_date: NaiveDate,
    /// The snapshot build the rows were derived from.
    pub snapshot_build_id: BuildId,
    /// Whether this was a dry-run.
    pub dry_run: bool,
    /// Whether security-group keys were resolved onto rows.
    pub included_security_groups: bool,
    /// Whether link summaries were attached to rows.
    pub included_links: bool,
    /// Number of rows written (or that would be written, on dry-run).
    pub row_count: u64,
}
