//! Attribute/security-group resolution and reporting materialization tests.
//!
//! Covers the closest-wins rule (per key, minimum depth, node-id tie-break),
//! the subtree applicability flag, attribute inheritance with and without
//! overriding, permission previews, and the full-overwrite idempotence of
//! the reporting materializer.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::NaiveDate;
use orgdeep::OrgdeepConfig;
use orgdeep::models::{
    AttributeName, Edge, InheritanceRule, LinkSummary, NodeAttributes, NodeId, NodeRecord,
    NodeSlice, OrgLink, SecurityGroupMapping, TenantId, ValidPeriod,
};
use orgdeep::services::Engine;
use uuid::Uuid;

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn engine() -> Engine {
    Engine::in_memory(&OrgdeepConfig::default()).expect("in-memory engine")
}

fn mapping(node: NodeId, key: &str, subtree: bool) -> SecurityGroupMapping {
    SecurityGroupMapping {
        id: Uuid::new_v4(),
        org_node_id: node,
        security_group_key: key.to_string(),
        applies_to_subtree: subtree,
        period: ValidPeriod::open_from(d("2024-01-01")),
    }
}

fn link(node: NodeId, object_type: &str, object_key: &str) -> OrgLink {
    OrgLink {
        id: Uuid::new_v4(),
        org_node_id: node,
        object_type: object_type.to_string(),
        object_key: object_key.to_string(),
        link_type: "owns".to_string(),
        metadata: serde_json::json!({}),
        period: ValidPeriod::open_from(d("2024-01-01")),
    }
}

/// Seeds an A→B→C chain (all open from 2024-01-01) with catalog entries:
/// codes ROOT/DIV/TEAM, names Alpha/Beta/Gamma, company code on A and B,
/// legal entity on A only.
fn seed_catalog(engine: &Engine) -> (TenantId, NodeId, NodeId, NodeId, Uuid) {
    let tenant = TenantId::generate();
    let (a, b, c) = (NodeId::generate(), NodeId::generate(), NodeId::generate());
    let period = ValidPeriod::open_from(d("2024-01-01"));

    let root = Edge::root(tenant, "OrgUnit", a, period);
    let ab = Edge::child_of(&root, b, period);
    let bc = Edge::child_of(&ab, c, period);
    for edge in [&root, &ab, &bc] {
        engine.store.insert_edge(edge).unwrap();
    }

    let legal_entity = Uuid::new_v4();
    let catalog = [
        (a, "ROOT", "Alpha", Some("100"), Some(legal_entity)),
        (b, "DIV", "Beta", Some("200"), None),
        (c, "TEAM", "Gamma", None, None),
    ];
    for (node_id, code, name, company_code, le) in catalog {
        engine
            .store
            .upsert_node(tenant, &NodeRecord {
                node_id,
                code: code.to_string(),
            })
            .unwrap();
        engine
            .store
            .insert_node_slice(tenant, &NodeSlice {
                node_id,
                name: name.to_string(),
                status: "active".to_string(),
                attributes: NodeAttributes {
                    legal_entity_id: le,
                    company_code: company_code.map(ToString::to_string),
                    location_id: None,
                    manager_user_id: None,
                },
                period,
            })
            .unwrap();
    }

    (tenant, a, b, c, legal_entity)
}

#[test]
fn test_security_group_closest_ancestor_wins() {
    let engine = engine();
    let (tenant, a, b, c, _) = seed_catalog(&engine);

    // The same key granted at two levels: the mapping on B shadows the one
    // on A for everything under B.
    engine
        .store
        .insert_security_group_mapping(tenant, &mapping(a, "finance", true))
        .unwrap();
    engine
        .store
        .insert_security_group_mapping(tenant, &mapping(b, "finance", true))
        .unwrap();

    let resolved = engine
        .resolution
        .resolve_security_groups(tenant, "OrgUnit", c, d("2024-07-01"), None)
        .unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].security_group_key, "finance");
    assert_eq!(resolved[0].source_node_id, b);
    assert_eq!(resolved[0].source_depth, 1);
}

#[test]
fn test_security_group_subtree_flag_and_output_order() {
    let engine = engine();
    let (tenant, a, _, c, _) = seed_catalog(&engine);

    engine
        .store
        .insert_security_group_mapping(tenant, &mapping(a, "finance", true))
        .unwrap();
    // Non-subtree grants bind only their own node.
    engine
        .store
        .insert_security_group_mapping(tenant, &mapping(a, "root-admin", false))
        .unwrap();
    engine
        .store
        .insert_security_group_mapping(tenant, &mapping(c, "ops", false))
        .unwrap();

    let resolved = engine
        .resolution
        .resolve_security_groups(tenant, "OrgUnit", c, d("2024-07-01"), None)
        .unwrap();
    let keys: Vec<(&str, u32)> = resolved
        .iter()
        .map(|r| (r.security_group_key.as_str(), r.source_depth))
        .collect();
    // Ordered by (winning depth, key); root-admin never reaches C.
    assert_eq!(keys, vec![("ops", 0), ("finance", 2)]);

    // On A itself the non-subtree grant applies.
    let resolved = engine
        .resolution
        .resolve_security_groups(tenant, "OrgUnit", a, d("2024-07-01"), None)
        .unwrap();
    let keys: Vec<&str> = resolved
        .iter()
        .map(|r| r.security_group_key.as_str())
        .collect();
    assert_eq!(keys, vec!["finance", "root-admin"]);
}

#[test]
fn test_attribute_resolution_closest_wins() {
    let engine = engine();
    let (tenant, a, b, c, legal_entity) = seed_catalog(&engine);

    let resolved = engine
        .resolution
        .resolve_attributes(
            tenant,
            "OrgUnit",
            c,
            d("2024-07-01"),
            &InheritanceRule::defaults(),
            None,
        )
        .unwrap();

    // C defines nothing: company code comes from B (closest), the legal
    // entity from A (the only definer).
    assert_eq!(resolved.values.company_code.as_deref(), Some("200"));
    assert_eq!(resolved.sources.company_code, Some(b));
    assert_eq!(resolved.values.legal_entity_id, Some(legal_entity));
    assert_eq!(resolved.sources.legal_entity_id, Some(a));
    assert_eq!(resolved.values.location_id, None);
}

#[test]
fn test_attribute_resolution_without_override_starts_at_parent() {
    let engine = engine();
    let (tenant, a, b, _, _) = seed_catalog(&engine);

    let rule = [InheritanceRule {
        attribute: AttributeName::CompanyCode,
        can_override: true,
    }];
    let resolved = engine
        .resolution
        .resolve_attributes(tenant, "OrgUnit", b, d("2024-07-01"), &rule, None)
        .unwrap();
    // B's own value shadows A's when overriding is allowed...
    assert_eq!(resolved.values.company_code.as_deref(), Some("200"));
    assert_eq!(resolved.sources.company_code, Some(b));

    let rule = [InheritanceRule {
        attribute: AttributeName::CompanyCode,
        can_override: false,
    }];
    let resolved = engine
        .resolution
        .resolve_attributes(tenant, "OrgUnit", b, d("2024-07-01"), &rule, None)
        .unwrap();
    // ...otherwise resolution starts at the immediate parent.
    assert_eq!(resolved.values.company_code.as_deref(), Some("100"));
    assert_eq!(resolved.sources.company_code, Some(a));
}

#[test]
fn test_permission_preview_groups_links_and_truncation() {
    let engine = engine();
    let (tenant, a, _, c, _) = seed_catalog(&engine);

    engine
        .store
        .insert_security_group_mapping(tenant, &mapping(a, "finance", true))
        .unwrap();
    engine
        .store
        .insert_org_link(tenant, &link(c, "cost_center", "CC-200"))
        .unwrap();
    engine
        .store
        .insert_org_link(tenant, &link(c, "cost_center", "CC-100"))
        .unwrap();

    let preview = engine
        .resolution
        .permission_preview(tenant, "OrgUnit", c, d("2024-07-01"), true, true, 0)
        .unwrap();
    assert_eq!(preview.security_groups.len(), 1);
    assert_eq!(preview.security_groups[0].security_group_key, "finance");
    let keys: Vec<&str> = preview.links.iter().map(|l| l.object_key.as_str()).collect();
    assert_eq!(keys, vec!["CC-100", "CC-200"]);
    assert!(preview.warnings.is_empty());

    // A tight limit truncates and says so.
    let preview = engine
        .resolution
        .permission_preview(tenant, "OrgUnit", c, d("2024-07-01"), false, true, 1)
        .unwrap();
    assert_eq!(preview.links.len(), 1);
    assert_eq!(preview.warnings, vec!["links_truncated".to_string()]);
    assert!(preview.security_groups.is_empty());
}

#[test]
fn test_materializer_requires_active_snapshot() {
    let engine = engine();
    let (tenant, _, _, _, _) = seed_catalog(&engine);

    let err = engine
        .reporting
        .materialize_reporting_nodes(tenant, "OrgUnit", d("2024-07-01"), false, false, true)
        .unwrap_err();
    assert!(err.is_build_not_ready());
}

#[test]
fn test_materializer_dry_run_counts_without_writing() {
    let engine = engine();
    let (tenant, _, _, _, _) = seed_catalog(&engine);
    engine
        .builds
        .build_snapshot(tenant, "OrgUnit", d("2024-07-01"), true, None)
        .unwrap();

    let result = engine
        .reporting
        .materialize_reporting_nodes(tenant, "OrgUnit", d("2024-07-01"), false, false, false)
        .unwrap();
    assert!(result.dry_run);
    assert_eq!(result.row_count, 3);

    assert!(
        engine
            .store
            .reporting_nodes(tenant, "OrgUnit", d("2024-07-01"))
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_materializer_rows_and_idempotence() {
    let engine = engine();
    let (tenant, a, b, c, _) = seed_catalog(&engine);

    engine
        .store
        .insert_security_group_mapping(tenant, &mapping(b, "finance", true))
        .unwrap();
    engine
        .store
        .insert_org_link(tenant, &link(c, "cost_center", "CC-7"))
        .unwrap();
    engine
        .builds
        .build_snapshot(tenant, "OrgUnit", d("2024-07-01"), true, Some("req-mat"))
        .unwrap();

    let result = engine
        .reporting
        .materialize_reporting_nodes(tenant, "OrgUnit", d("2024-07-01"), true, true, true)
        .unwrap();
    assert!(!result.dry_run);
    assert_eq!(result.row_count, 3);

    let rows = engine
        .store
        .reporting_nodes(tenant, "OrgUnit", d("2024-07-01"))
        .unwrap();
    assert_eq!(rows.len(), 3);

    // Shallowest first: the root row carries itself as its whole path.
    assert_eq!(rows[0].org_node_id, a);
    assert_eq!(rows[0].code, "ROOT");
    assert_eq!(rows[0].parent_node_id, None);
    assert_eq!(rows[0].depth, 0);
    assert_eq!(rows[0].path_codes, vec!["ROOT".to_string()]);

    let team = &rows[2];
    assert_eq!(team.org_node_id, c);
    assert_eq!(team.name, "Gamma");
    assert_eq!(team.parent_node_id, Some(b));
    assert_eq!(team.depth, 2);
    assert_eq!(team.path_node_ids, vec![a, b, c]);
    assert_eq!(
        team.path_codes,
        vec!["ROOT".to_string(), "DIV".to_string(), "TEAM".to_string()]
    );
    assert_eq!(
        team.path_names,
        vec!["Alpha".to_string(), "Beta".to_string(), "Gamma".to_string()]
    );
    assert_eq!(team.security_group_keys, vec!["finance".to_string()]);
    assert_eq!(team.links, vec![LinkSummary {
        object_type: "cost_center".to_string(),
        object_key: "CC-7".to_string(),
        link_type: "owns".to_string(),
    }]);

    // Re-running is a full overwrite of the same row set.
    let rerun = engine
        .reporting
        .materialize_reporting_nodes(tenant, "OrgUnit", d("2024-07-01"), true, true, true)
        .unwrap();
    assert_eq!(rerun.row_count, 3);
    let rows_again = engine
        .store
        .reporting_nodes(tenant, "OrgUnit", d("2024-07-01"))
        .unwrap();
    assert_eq!(rows, rows_again);
}
