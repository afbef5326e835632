//! Reporting-node materialization.
//!
//! A batch job keyed by (tenant, hierarchy, as-of date) that denormalizes
//! one active snapshot build into a flat reporting table: one row per
//! reachable node with its code, name, status, parent, depth, full path and
//! optionally the inherited security-group keys and link summaries.
//!
//! Full overwrite, not incremental: prior rows for the key are deleted and
//! re-inserted in one transaction, so re-running is safe and idempotent for
//! a fixed build.

use crate::models::{
    BuildId, LinkSummary, NodeId, ReportingBuildResult, ReportingNode, SnapshotRow, TenantId,
};
use crate::storage::{HierarchyStore, KeyedMutex, deep_read_lock_key};
use crate::Result;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::instrument;

/// Materializes reporting-node rows from snapshot builds.
pub struct ReportingService {
    store: Arc<HierarchyStore>,
    locks: Arc<KeyedMutex>,
}

impl ReportingService {
    /// Creates a reporting service over the shared store and lock table.
    #[must_use]
    pub const fn new(store: Arc<HierarchyStore>, locks: Arc<KeyedMutex>) -> Self {
        Self { store, locks }
    }

    /// Materializes the reporting rows for a key from its active snapshot
    /// build.
    ///
    /// Dry-run (`apply = false`) reports the number of reachable nodes
    /// without writing.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::BuildNotReady`] when no active snapshot build
    /// exists for the exact as-of date, or propagates storage errors.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, as_of_date = %as_of_date))]
    pub fn materialize_reporting_nodes(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        as_of_date: NaiveDate,
        include_security_groups: bool,
        include_links: bool,
        apply: bool,
    ) -> Result<ReportingBuildResult> {
        let date = as_of_date.to_string();
        let key = deep_read_lock_key(&["reporting", &tenant_id.to_string(), hierarchy, &date]);

        self.locks.with_lock(&key, || {
            let build_id = self
                .store
                .active_snapshot_build_id(tenant_id, hierarchy, as_of_date)?;

            let mut result = ReportingBuildResult {
                tenant_id,
                hierarchy: hierarchy.to_string(),
                as_of_date,
                snapshot_build_id: build_id,
                dry_run: !apply,
                included_security_groups: include_security_groups,
                included_links: include_links,
                row_count: 0,
            };

            if !apply {
                result.row_count =
                    self.store
                        .snapshot_node_count(tenant_id, hierarchy, as_of_date, build_id)?;
                return Ok(result);
            }

            let rows = self.compose_rows(
                tenant_id,
                hierarchy,
                as_of_date,
                build_id,
                include_security_groups,
                include_links,
            )?;
            result.row_count = self.store.replace_reporting_rows(
                tenant_id,
                hierarchy,
                as_of_date,
                build_id,
                &rows,
            )?;
            metrics::counter!("orgdeep_reporting_materializations_total").increment(1);
            Ok(result)
        })
    }

    /// Assembles one reporting row per reachable node of the snapshot build.
    fn compose_rows(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        as_of_date: NaiveDate,
        build_id: BuildId,
        include_security_groups: bool,
        include_links: bool,
    ) -> Result<Vec<ReportingNode>> {
        let snapshot =
            self.store
                .snapshot_rows_for_build(tenant_id, hierarchy, as_of_date, build_id)?;

        // Ancestor sets per node. BTreeMap keeps node iteration stable.
        let mut ancestors: BTreeMap<NodeId, Vec<SnapshotRow>> = BTreeMap::new();
        for row in snapshot {
            ancestors.entry(row.descendant_node_id).or_default().push(row);
        }

        // Catalog data for every node with a live slice at the date. Nodes
        // (or ancestors) without one drop out, mirroring the inner joins of
        // the reporting query.
        let catalog: HashMap<NodeId, (String, String, String)> = self
            .store
            .nodes_with_slices_at(tenant_id, as_of_date)?
            .into_iter()
            .map(|(record, slice)| (record.node_id, (record.code, slice.name, slice.status)))
            .collect();

        let mappings = if include_security_groups {
            let all_nodes: Vec<NodeId> = ancestors.keys().copied().collect();
            self.store
                .mappings_for_nodes_at(tenant_id, &all_nodes, as_of_date)?
        } else {
            Vec::new()
        };

        let mut links_by_node: HashMap<NodeId, Vec<LinkSummary>> = HashMap::new();
        if include_links {
            for link in self.store.links_at(tenant_id, as_of_date)? {
                links_by_node
                    .entry(link.org_node_id)
                    .or_default()
                    .push(LinkSummary {
                        object_type: link.object_type,
                        object_key: link.object_key,
                        link_type: link.link_type,
                    });
            }
        }

        let mut out = Vec::with_capacity(ancestors.len());
        for (node_id, mut chain) in ancestors {
            if !catalog.contains_key(&node_id) {
                continue;
            }

            // Root first, the node itself (depth 0) last.
            chain.sort_by(|a, b| {
                b.depth
                    .cmp(&a.depth)
                    .then(a.ancestor_node_id.cmp(&b.ancestor_node_id))
            });

            let mut path_node_ids = Vec::with_capacity(chain.len());
            let mut path_codes = Vec::with_capacity(chain.len());
            let mut path_names = Vec::with_capacity(chain.len());
            for row in &chain {
                let Some((code, name, _)) = catalog.get(&row.ancestor_node_id) else {
                    continue;
                };
                path_node_ids.push(row.ancestor_node_id);
                path_codes.push(code.clone());
                path_names.push(name.clone());
            }

            let parent_node_id = if path_node_ids.len() >= 2 {
                path_node_ids.get(path_node_ids.len() - 2).copied()
            } else {
                None
            };
            let depth = path_node_ids.len().saturating_sub(1) as u32;

            let security_group_keys = if include_security_groups {
                winning_keys(node_id, &chain, &mappings)
            } else {
                Vec::new()
            };

            let Some((code, name, status)) = catalog.get(&node_id) else {
                continue;
            };
            out.push(ReportingNode {
                org_node_id: node_id,
                code: code.clone(),
                name: name.clone(),
                status: status.clone(),
                parent_node_id,
                depth,
                path_node_ids,
                path_codes,
                path_names,
                security_group_keys,
                links: links_by_node.remove(&node_id).unwrap_or_default(),
            });
        }

        out.sort_by(|a, b| (a.depth, &a.code).cmp(&(b.depth, &b.code)));
        Ok(out)
    }
}

/// Resolves the winning security-group keys for one node: per key, minimum
/// source depth wins; output ordered by (winning depth, key).
fn winning_keys(
    node_id: NodeId,
    chain: &[SnapshotRow],
    mappings: &[crate::models::SecurityGroupMapping],
) -> Vec<String> {
    let depths: HashMap<NodeId, u32> = chain
        .iter()
        .map(|r| (r.ancestor_node_id, r.depth))
        .collect();

    let mut best: HashMap<&str, (u32, NodeId)> = HashMap::new();
    for mapping in mappings {
        if mapping.org_node_id != node_id && !mapping.applies_to_subtree {
            continue;
        }
        let Some(&depth) = depths.get(&mapping.org_node_id) else {
            continue;
        };
        match best.get(mapping.security_group_key.as_str()) {
            Some(&(prev_depth, prev_node))
                if (prev_depth, prev_node) <= (depth, mapping.org_node_id) => {},
            _ => {
                best.insert(
                    mapping.security_group_key.as_str(),
                    (depth, mapping.org_node_id),
                );
            },
        }
    }

    let mut keys: Vec<(u32, String)> = best
        .into_iter()
        .map(|(key, (depth, _))| (depth, key.to_string()))
        .collect();
    keys.sort();
    keys.into_iter().map(|(_, key)| key).collect()
}
