//! Attribute and security-group resolution.
//!
//! Both resolutions walk a node's ancestor relations through the facade and
//! apply **closest-wins**: the value from the nearest ancestor that defines
//! it applies, with ties at equal depth broken by ancestor node id
//! ascending. For security groups the applicability rule is: a mapping at
//! ancestor `A` applies to descendant `D` when `A == D` or the mapping is
//! flagged `applies_to_subtree`.

use crate::models::{
    AttributeName, AttributeSources, BackendKind, InheritanceRule, NodeAttributes, NodeId,
    PermissionPreview, ResolvedAttributes, ResolvedSecurityGroup, SecurityGroupMapping, TenantId,
};
use crate::services::deep_read::DeepReadService;
use crate::storage::HierarchyStore;
use crate::{Error, Result};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

/// Default number of links returned by a permission preview.
const DEFAULT_LINK_LIMIT: usize = 200;
/// Upper bound on the link limit a caller can request.
const MAX_LINK_LIMIT: usize = 1000;

/// Resolves inherited attributes and security groups over ancestor relations.
pub struct ResolutionService {
    store: Arc<HierarchyStore>,
    deep_read: Arc<DeepReadService>,
}

impl ResolutionService {
    /// Creates a resolution service over the store and facade.
    #[must_use]
    pub const fn new(store: Arc<HierarchyStore>, deep_read: Arc<DeepReadService>) -> Self {
        Self { store, deep_read }
    }

    /// Resolves the security-group keys effective for a node at `as_of`.
    ///
    /// Among all applicable mappings for the same key, the one carried by
    /// the closest ancestor wins; the output is deduplicated by key and
    /// ordered by (winning depth, key).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`] if the node has no edge row covering
    /// `as_of`, or propagates facade/storage errors.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, node_id = %node_id))]
    pub fn resolve_security_groups(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
        backend: Option<BackendKind>,
    ) -> Result<Vec<ResolvedSecurityGroup>> {
        let ancestors = self.deep_read.list_ancestors_as_of(
            tenant_id,
            hierarchy,
            node_id,
            Some(as_of),
            backend,
        )?;

        let mut depths: HashMap<NodeId, u32> = HashMap::with_capacity(ancestors.len());
        let mut ancestor_ids: Vec<NodeId> = Vec::with_capacity(ancestors.len());
        for rel in &ancestors {
            // Relations arrive ordered depth ascending; an ancestor listed
            // at several depths keeps its minimum.
            depths.entry(rel.node_id).or_insert(rel.depth);
            ancestor_ids.push(rel.node_id);
        }

        let mappings = self
            .store
            .mappings_for_nodes_at(tenant_id, &ancestor_ids, as_of)?;
        Ok(best_by_key(node_id, &depths, &mappings))
    }

    /// Resolves a node's inherited attributes at `as_of` under the given
    /// rule set.
    ///
    /// For each rule, the value from the closest attribute-defining ancestor
    /// applies. The node's own slice participates at depth 0 when the rule
    /// allows overriding; otherwise resolution starts at the immediate
    /// parent.
    ///
    /// # Errors
    ///
    /// Same error contract as [`Self::resolve_security_groups`].
    #[instrument(skip(self, rules), fields(tenant_id = %tenant_id, node_id = %node_id))]
    pub fn resolve_attributes(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
        rules: &[InheritanceRule],
        backend: Option<BackendKind>,
    ) -> Result<ResolvedAttributes> {
        let ancestors = self.deep_read.list_ancestors_as_of(
            tenant_id,
            hierarchy,
            node_id,
            Some(as_of),
            backend,
        )?;

        let ancestor_ids: Vec<NodeId> = ancestors.iter().map(|r| r.node_id).collect();
        let slices = self
            .store
            .slices_for_nodes_at(tenant_id, &ancestor_ids, as_of)?;
        let attrs_by_node: HashMap<NodeId, NodeAttributes> = slices
            .into_iter()
            .map(|s| (s.node_id, s.attributes))
            .collect();

        let mut resolved = ResolvedAttributes::default();
        for rule in rules {
            // Ancestors arrive ordered (depth asc, node id asc), so the
            // first defining one is the winner.
            for rel in &ancestors {
                if rel.depth == 0 && !rule.can_override {
                    continue;
                }
                let Some(attrs) = attrs_by_node.get(&rel.node_id) else {
                    continue;
                };
                if apply_attribute(&mut resolved.values, rule.attribute, attrs) {
                    set_source(&mut resolved.sources, rule.attribute, rel.node_id);
                    break;
                }
            }
        }
        Ok(resolved)
    }

    /// Read-only preview of a node's effective permissions: resolved
    /// security groups and live links.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`] if the node has no edge row covering
    /// `as_of`, or propagates storage errors.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, node_id = %node_id))]
    pub fn permission_preview(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
        include_security_groups: bool,
        include_links: bool,
        limit_links: usize,
    ) -> Result<PermissionPreview> {
        if !self
            .deep_read
            .node_exists_at(tenant_id, hierarchy, node_id, Some(as_of))?
        {
            return Err(Error::NodeNotFound { node_id, as_of });
        }

        let limit = match limit_links {
            0 => DEFAULT_LINK_LIMIT,
            n => n.min(MAX_LINK_LIMIT),
        };

        let mut preview = PermissionPreview {
            tenant_id,
            org_node_id: node_id,
            as_of,
            security_groups: Vec::new(),
            links: Vec::new(),
            warnings: Vec::new(),
        };

        if include_security_groups {
            preview.security_groups =
                self.resolve_security_groups(tenant_id, hierarchy, node_id, as_of, None)?;
        }

        if include_links {
            let mut links = self
                .store
                .links_for_node_at(tenant_id, node_id, as_of, limit + 1)?;
            if links.len() > limit {
                preview.warnings.push("links_truncated".to_string());
                links.truncate(limit);
            }
            preview.links = links;
        }

        Ok(preview)
    }
}

/// Applies the closest-wins rule across mappings: per key, minimum depth
/// wins, ties at equal depth broken by ancestor node id ascending. Output is
/// ordered by (winning depth, key).
fn best_by_key(
    target: NodeId,
    depths: &HashMap<NodeId, u32>,
    mappings: &[SecurityGroupMapping],
) -> Vec<ResolvedSecurityGroup> {
    let mut best: HashMap<&str, ResolvedSecurityGroup> = HashMap::new();
    for mapping in mappings {
        if mapping.org_node_id != target && !mapping.applies_to_subtree {
            continue;
        }
        let Some(&depth) = depths.get(&mapping.org_node_id) else {
            continue;
        };
        let candidate = ResolvedSecurityGroup {
            security_group_key: mapping.security_group_key.clone(),
            applies_to_subtree: mapping.applies_to_subtree,
            source_node_id: mapping.org_node_id,
            source_depth: depth,
        };
        match best.get(mapping.security_group_key.as_str()) {
            Some(prev)
                if (prev.source_depth, prev.source_node_id)
                    <= (candidate.source_depth, candidate.source_node_id) => {},
            _ => {
                best.insert(mapping.security_group_key.as_str(), candidate);
            },
        }
    }

    let mut out: Vec<ResolvedSecurityGroup> = best.into_values().collect();
    out.sort_by(|a, b| {
        (a.source_depth, &a.security_group_key).cmp(&(b.source_depth, &b.security_group_key))
    });
    out
}

/// Copies one attribute from `from` into `into` if it is defined there.
/// Returns whether a value was applied.
fn apply_attribute(
    into: &mut NodeAttributes,
    attribute: AttributeName,
    from: &NodeAttributes,
) -> bool {
    match attribute {
        AttributeName::LegalEntityId => from.legal_entity_id.is_some() && {
            into.legal_entity_id = from.legal_entity_id;
            true
        },
        AttributeName::CompanyCode => from.company_code.is_some() && {
            into.company_code.clone_from(&from.company_code);
            true
        },
        AttributeName::LocationId => from.location_id.is_some() && {
            into.location_id = from.location_id;
            true
        },
        AttributeName::ManagerUserId => from.manager_user_id.is_some() && {
            into.manager_user_id = from.manager_user_id;
            true
        },
    }
}

/// Records which ancestor supplied an attribute.
fn set_source(sources: &mut AttributeSources, attribute: AttributeName, node_id: NodeId) {
    match attribute {
        AttributeName::LegalEntityId => sources.legal_entity_id = Some(node_id),
        AttributeName::CompanyCode => sources.company_code = Some(node_id),
        AttributeName::LocationId => sources.location_id = Some(node_id),
        AttributeName::ManagerUserId => sources.manager_user_id = Some(node_id),
    }
}
