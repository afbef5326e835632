//! Deep-read query facade tests.
//!
//! Covers cross-backend consistency (the three backends agree on relation
//! sets once builds cover the date), reflexivity, the (depth, node id)
//! ordering contract, the existence/children probes, the distinguished
//! error kinds, and persistence across a store reopen.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::NaiveDate;
use orgdeep::models::{DeepReadRelation, Edge, NodeId, TenantId, ValidPeriod};
use orgdeep::services::Engine;
use orgdeep::{BackendKind, Error, OrgdeepConfig};
use tempfile::TempDir;
use uuid::Uuid;

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn engine() -> Engine {
    Engine::in_memory(&OrgdeepConfig::default()).expect("in-memory engine")
}

/// Seeds the A→B (2024-01-01, open) / B→C (2024-06-01, open) chain.
fn seed_chain(engine: &Engine) -> (TenantId, NodeId, NodeId, NodeId) {
    let tenant = TenantId::generate();
    let (a, b, c) = (NodeId::generate(), NodeId::generate(), NodeId::generate());
    let root = Edge::root(tenant, "OrgUnit", a, ValidPeriod::open_from(d("2024-01-01")));
    let ab = Edge::child_of(&root, b, ValidPeriod::open_from(d("2024-01-01")));
    let bc = Edge::child_of(&ab, c, ValidPeriod::open_from(d("2024-06-01")));
    for edge in [&root, &ab, &bc] {
        engine.store.insert_edge(edge).unwrap();
    }
    (tenant, a, b, c)
}

#[test]
fn test_edges_and_closure_backends_agree() {
    let engine = engine();
    let (tenant, a, b, c) = seed_chain(&engine);
    engine
        .builds
        .build_closure(tenant, "OrgUnit", true, Some("req-xbk"))
        .unwrap();

    // Both before and after the B→C edge starts, every node's relation
    // lists must match across backends.
    for date in [d("2024-02-01"), d("2024-07-01")] {
        for node in [a, b, c] {
            if !engine
                .deep_read
                .node_exists_at(tenant, "OrgUnit", node, Some(date))
                .unwrap()
            {
                continue;
            }
            let live = engine
                .deep_read
                .list_descendants_as_of(tenant, "OrgUnit", node, Some(date), Some(BackendKind::Edges))
                .unwrap();
            let built = engine
                .deep_read
                .list_descendants_as_of(tenant, "OrgUnit", node, Some(date), Some(BackendKind::Closure))
                .unwrap();
            assert_eq!(live, built, "descendants of {node} at {date}");

            let live = engine
                .deep_read
                .list_ancestors_as_of(tenant, "OrgUnit", node, Some(date), Some(BackendKind::Edges))
                .unwrap();
            let built = engine
                .deep_read
                .list_ancestors_as_of(tenant, "OrgUnit", node, Some(date), Some(BackendKind::Closure))
                .unwrap();
            assert_eq!(live, built, "ancestors of {node} at {date}");
        }
    }
}

#[test]
fn test_snapshot_backend_agrees_at_its_date() {
    let engine = engine();
    let (tenant, a, _, c) = seed_chain(&engine);
    engine
        .builds
        .build_closure(tenant, "OrgUnit", true, None)
        .unwrap();
    engine
        .builds
        .build_snapshot(tenant, "OrgUnit", d("2024-07-01"), true, None)
        .unwrap();

    for node in [a, c] {
        let edges = engine
            .deep_read
            .list_descendants_as_of(
                tenant,
                "OrgUnit",
                node,
                Some(d("2024-07-01")),
                Some(BackendKind::Edges),
            )
            .unwrap();
        let snapshot = engine
            .deep_read
            .list_descendants_as_of(
                tenant,
                "OrgUnit",
                node,
                Some(d("2024-07-01")),
                Some(BackendKind::Snapshot),
            )
            .unwrap();
        assert_eq!(edges, snapshot, "descendants of {node}");
    }
}

#[test]
fn test_reflexivity_across_backends() {
    let engine = engine();
    let (tenant, _, b, _) = seed_chain(&engine);
    engine
        .builds
        .build_closure(tenant, "OrgUnit", true, None)
        .unwrap();
    engine
        .builds
        .build_snapshot(tenant, "OrgUnit", d("2024-07-01"), true, None)
        .unwrap();

    for backend in [BackendKind::Edges, BackendKind::Closure, BackendKind::Snapshot] {
        let ancestors = engine
            .deep_read
            .list_ancestors_as_of(tenant, "OrgUnit", b, Some(d("2024-07-01")), Some(backend))
            .unwrap();
        assert_eq!(
            ancestors[0],
            DeepReadRelation { node_id: b, depth: 0 },
            "backend {backend}"
        );
        let descendants = engine
            .deep_read
            .list_descendants_as_of(tenant, "OrgUnit", b, Some(d("2024-07-01")), Some(backend))
            .unwrap();
        assert_eq!(descendants[0], DeepReadRelation { node_id: b, depth: 0 });
    }
}

#[test]
fn test_sibling_ordering_by_node_id() {
    let engine = engine();
    let tenant = TenantId::generate();
    let root_id = NodeId::new(Uuid::from_u128(1));
    let siblings = [
        NodeId::new(Uuid::from_u128(0x10)),
        NodeId::new(Uuid::from_u128(0x20)),
        NodeId::new(Uuid::from_u128(0x30)),
    ];

    let period = ValidPeriod::open_from(d("2024-01-01"));
    let root = Edge::root(tenant, "OrgUnit", root_id, period);
    engine.store.insert_edge(&root).unwrap();
    // Insert in shuffled order; the ordering contract must not depend on it.
    for node in [siblings[2], siblings[0], siblings[1]] {
        engine
            .store
            .insert_edge(&Edge::child_of(&root, node, period))
            .unwrap();
    }
    engine
        .builds
        .build_closure(tenant, "OrgUnit", true, None)
        .unwrap();

    for backend in [BackendKind::Edges, BackendKind::Closure] {
        let descendants = engine
            .deep_read
            .list_descendants_as_of(
                tenant,
                "OrgUnit",
                root_id,
                Some(d("2024-07-01")),
                Some(backend),
            )
            .unwrap();
        assert_eq!(
            descendants,
            vec![
                DeepReadRelation { node_id: root_id, depth: 0 },
                DeepReadRelation { node_id: siblings[0], depth: 1 },
                DeepReadRelation { node_id: siblings[1], depth: 1 },
                DeepReadRelation { node_id: siblings[2], depth: 1 },
            ],
            "backend {backend}"
        );
    }
}

#[test]
fn test_reparented_node_consistent_in_each_window() {
    let engine = engine();
    let tenant = TenantId::generate();
    let (a, c, x) = (NodeId::generate(), NodeId::generate(), NodeId::generate());
    let open = ValidPeriod::open_from(d("2024-01-01"));

    // X moves from under A to under C at mid-year: two disjoint edge
    // windows for the same child.
    let root_a = Edge::root(tenant, "OrgUnit", a, open);
    let root_c = Edge::root(tenant, "OrgUnit", c, open);
    let under_a = Edge::child_of(
        &root_a,
        x,
        ValidPeriod::between(d("2024-01-01"), d("2024-06-01")),
    );
    let under_c = Edge::child_of(&root_c, x, ValidPeriod::open_from(d("2024-06-01")));
    for edge in [&root_a, &root_c, &under_a, &under_c] {
        engine.store.insert_edge(edge).unwrap();
    }
    engine
        .builds
        .build_closure(tenant, "OrgUnit", true, Some("req-move"))
        .unwrap();

    // A date inside each window must see X reflexively at depth 0 and
    // under that window's parent, identically across backends.
    for (date, parent) in [(d("2024-03-01"), a), (d("2024-07-01"), c)] {
        let ancestors = engine
            .deep_read
            .list_ancestors_as_of(tenant, "OrgUnit", x, Some(date), Some(BackendKind::Closure))
            .unwrap();
        assert_eq!(
            ancestors,
            vec![
                DeepReadRelation { node_id: x, depth: 0 },
                DeepReadRelation { node_id: parent, depth: 1 },
            ],
            "ancestors of X at {date}"
        );
        let live = engine
            .deep_read
            .list_ancestors_as_of(tenant, "OrgUnit", x, Some(date), Some(BackendKind::Edges))
            .unwrap();
        assert_eq!(ancestors, live, "cross-backend ancestors of X at {date}");

        let descendants = engine
            .deep_read
            .list_descendants_as_of(tenant, "OrgUnit", x, Some(date), Some(BackendKind::Closure))
            .unwrap();
        assert_eq!(
            descendants,
            vec![DeepReadRelation { node_id: x, depth: 0 }],
            "descendants of X at {date}"
        );
    }

    // Each root only ever owns X during its own window.
    let march = engine
        .deep_read
        .list_descendants_as_of(
            tenant,
            "OrgUnit",
            c,
            Some(d("2024-03-01")),
            Some(BackendKind::Closure),
        )
        .unwrap();
    assert_eq!(march, vec![DeepReadRelation { node_id: c, depth: 0 }]);
    let july = engine
        .deep_read
        .list_descendants_as_of(
            tenant,
            "OrgUnit",
            a,
            Some(d("2024-07-01")),
            Some(BackendKind::Closure),
        )
        .unwrap();
    assert_eq!(july, vec![DeepReadRelation { node_id: a, depth: 0 }]);
}

#[test]
fn test_has_children_and_node_exists() {
    let engine = engine();
    let (tenant, a, b, c) = seed_chain(&engine);
    engine
        .builds
        .build_closure(tenant, "OrgUnit", true, None)
        .unwrap();

    for backend in [BackendKind::Edges, BackendKind::Closure] {
        assert!(
            engine
                .deep_read
                .has_children_at(tenant, "OrgUnit", a, Some(d("2024-07-01")), Some(backend))
                .unwrap()
        );
        // Leaf node.
        assert!(
            !engine
                .deep_read
                .has_children_at(tenant, "OrgUnit", c, Some(d("2024-07-01")), Some(backend))
                .unwrap()
        );
        // B has no live child before the B→C edge starts.
        assert!(
            !engine
                .deep_read
                .has_children_at(tenant, "OrgUnit", b, Some(d("2024-02-01")), Some(backend))
                .unwrap()
        );
    }

    // Existence is edge-based regardless of backend: C has no edge row
    // covering February.
    assert!(
        engine
            .deep_read
            .node_exists_at(tenant, "OrgUnit", b, Some(d("2024-02-01")))
            .unwrap()
    );
    assert!(
        !engine
            .deep_read
            .node_exists_at(tenant, "OrgUnit", c, Some(d("2024-02-01")))
            .unwrap()
    );
}

#[test]
fn test_unknown_node_is_node_not_found() {
    let engine = engine();
    let (tenant, _, _, _) = seed_chain(&engine);

    let err = engine
        .deep_read
        .list_ancestors_as_of(
            tenant,
            "OrgUnit",
            NodeId::generate(),
            Some(d("2024-07-01")),
            Some(BackendKind::Edges),
        )
        .unwrap_err();
    assert!(matches!(err, Error::NodeNotFound { .. }));
}

#[test]
fn test_closure_backend_without_build_is_not_ready() {
    let engine = engine();
    let (tenant, a, _, _) = seed_chain(&engine);

    let err = engine
        .deep_read
        .list_descendants_as_of(
            tenant,
            "OrgUnit",
            a,
            Some(d("2024-07-01")),
            Some(BackendKind::Closure),
        )
        .unwrap_err();
    assert!(err.is_build_not_ready());

    // The edges backend keeps answering; callers can fall back on the
    // distinguished error kind.
    let descendants = engine
        .deep_read
        .list_descendants_as_of(
            tenant,
            "OrgUnit",
            a,
            Some(d("2024-07-01")),
            Some(BackendKind::Edges),
        )
        .unwrap();
    assert_eq!(descendants.len(), 3);
}

#[test]
fn test_active_build_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = OrgdeepConfig {
        db_path: temp_dir.path().join("orgdeep.db"),
        ..OrgdeepConfig::default()
    };

    let tenant;
    let root;
    {
        let engine = Engine::open(&config).unwrap();
        let seeded = seed_chain(&engine);
        tenant = seeded.0;
        root = seeded.1;
        engine
            .builds
            .build_closure(tenant, "OrgUnit", true, Some("req-persist"))
            .unwrap();
    }

    let engine = Engine::open(&config).unwrap();
    let descendants = engine
        .deep_read
        .list_descendants_as_of(
            tenant,
            "OrgUnit",
            root,
            Some(d("2024-07-01")),
            Some(BackendKind::Closure),
        )
        .unwrap();
    assert_eq!(descendants.len(), 3);
}
