//! Build-registry lifecycle tests.
//!
//! Covers activation rollback via `previous_build_id`, pruning retention
//! (the active build always survives), activation conflicts, and the
//! single-active-build invariant under concurrent and arbitrary operation
//! sequences.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::NaiveDate;
use orgdeep::models::{
    BuildId, BuildRecord, BuildStatus, Edge, NodeId, TenantId, ValidPeriod,
};
use orgdeep::services::Engine;
use orgdeep::{BackendKind, OrgdeepConfig};
use proptest::prelude::*;
use std::sync::Arc;

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn engine() -> Engine {
    Engine::in_memory(&OrgdeepConfig::default()).expect("in-memory engine")
}

/// Seeds the A→B (2024-01-01, open) / B→C (2024-06-01, open) chain and
/// returns the edge of C so deeper nodes can be attached later.
fn seed_chain(engine: &Engine) -> (TenantId, NodeId, Edge) {
    let tenant = TenantId::generate();
    let (a, b, c) = (NodeId::generate(), NodeId::generate(), NodeId::generate());
    let root = Edge::root(tenant, "OrgUnit", a, ValidPeriod::open_from(d("2024-01-01")));
    let ab = Edge::child_of(&root, b, ValidPeriod::open_from(d("2024-01-01")));
    let bc = Edge::child_of(&ab, c, ValidPeriod::open_from(d("2024-06-01")));
    for edge in [&root, &ab, &bc] {
        engine.store.insert_edge(edge).unwrap();
    }
    (tenant, a, bc)
}

fn build(engine: &Engine, tenant: TenantId, request: &str) -> BuildId {
    engine
        .builds
        .build_closure(tenant, "OrgUnit", true, Some(request))
        .unwrap()
        .build_id
        .expect("build id on apply")
}

#[test]
fn test_rollback_restores_previous_build_rows() {
    let engine = engine();
    let (tenant, a, bc) = seed_chain(&engine);

    let b1 = build(&engine, tenant, "req-b1");
    let before = engine
        .deep_read
        .list_descendants_as_of(
            tenant,
            "OrgUnit",
            a,
            Some(d("2024-09-01")),
            Some(BackendKind::Closure),
        )
        .unwrap();

    // The hierarchy grows, and a second build picks the new edge up.
    let new_leaf = NodeId::generate();
    engine
        .store
        .insert_edge(&Edge::child_of(
            &bc,
            new_leaf,
            ValidPeriod::open_from(d("2024-08-01")),
        ))
        .unwrap();
    let b2 = build(&engine, tenant, "req-b2");

    let grown = engine
        .deep_read
        .list_descendants_as_of(
            tenant,
            "OrgUnit",
            a,
            Some(d("2024-09-01")),
            Some(BackendKind::Closure),
        )
        .unwrap();
    assert_eq!(grown.len(), before.len() + 1);

    // Rolling back is a normal activation of the older build.
    let previous = engine
        .registry
        .activate_closure_build(tenant, "OrgUnit", b1)
        .unwrap();
    assert_eq!(previous, Some(b2));

    let rolled_back = engine
        .deep_read
        .list_descendants_as_of(
            tenant,
            "OrgUnit",
            a,
            Some(d("2024-09-01")),
            Some(BackendKind::Closure),
        )
        .unwrap();
    assert_eq!(rolled_back, before);

    // previous_build_id always names the build being replaced.
    let previous = engine
        .registry
        .activate_closure_build(tenant, "OrgUnit", b2)
        .unwrap();
    assert_eq!(previous, Some(b1));
    let previous = engine
        .registry
        .activate_closure_build(tenant, "OrgUnit", b1)
        .unwrap();
    assert_eq!(previous, Some(b2));
}

#[test]
fn test_prune_retains_active_even_when_oldest() {
    let engine = engine();
    let (tenant, a, _) = seed_chain(&engine);

    let b1 = build(&engine, tenant, "req-1");
    let _b2 = build(&engine, tenant, "req-2");
    let _b3 = build(&engine, tenant, "req-3");

    // Make the oldest build the active one.
    engine
        .registry
        .activate_closure_build(tenant, "OrgUnit", b1)
        .unwrap();

    // Dry-run counts without deleting.
    let dry = engine
        .registry
        .prune_closure_builds(tenant, "OrgUnit", 1, false)
        .unwrap();
    assert!(dry.dry_run);
    assert_eq!(dry.deleted_builds, 2);
    assert_eq!(
        engine
            .registry
            .list_closure_builds(tenant, "OrgUnit")
            .unwrap()
            .len(),
        3
    );

    let result = engine
        .registry
        .prune_closure_builds(tenant, "OrgUnit", 1, true)
        .unwrap();
    assert_eq!(result.deleted_builds, 2);

    let remaining = engine.registry.list_closure_builds(tenant, "OrgUnit").unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].build_id, b1);
    assert!(remaining[0].is_active);

    // The surviving build still answers queries.
    let descendants = engine
        .deep_read
        .list_descendants_as_of(
            tenant,
            "OrgUnit",
            a,
            Some(d("2024-07-01")),
            Some(BackendKind::Closure),
        )
        .unwrap();
    assert_eq!(descendants.len(), 3);
}

#[test]
fn test_prune_keep_clamps_below_one() {
    let engine = engine();
    let (tenant, _, _) = seed_chain(&engine);
    let b1 = build(&engine, tenant, "req-1");
    let _b2 = build(&engine, tenant, "req-2");

    // keep = 0 behaves as keep = 1: the active build survives.
    let result = engine
        .registry
        .prune_closure_builds(tenant, "OrgUnit", 0, true)
        .unwrap();
    assert_eq!(result.deleted_builds, 1);

    let remaining = engine.registry.list_closure_builds(tenant, "OrgUnit").unwrap();
    assert_eq!(remaining.len(), 1);
    assert_ne!(remaining[0].build_id, b1);
}

#[test]
fn test_activation_conflict_leaves_active_build_untouched() {
    let engine = engine();
    let (tenant, _, _) = seed_chain(&engine);
    let b1 = build(&engine, tenant, "req-1");

    // An unknown build id conflicts...
    let err = engine
        .registry
        .activate_closure_build(tenant, "OrgUnit", BuildId::generate())
        .unwrap_err();
    assert!(err.is_conflict());

    // ...and so does a failed one.
    let failed = BuildId::generate();
    engine
        .store
        .insert_closure_build(&BuildRecord {
            tenant_id: tenant,
            hierarchy: "OrgUnit".to_string(),
            build_id: failed,
            as_of_date: None,
            status: BuildStatus::Building,
            is_active: false,
            built_at: 1,
            source_request_id: None,
            notes: None,
        })
        .unwrap();
    engine
        .store
        .mark_build_failed(tenant, "OrgUnit", None, failed, "aborted")
        .unwrap();
    let err = engine
        .registry
        .activate_closure_build(tenant, "OrgUnit", failed)
        .unwrap_err();
    assert!(err.is_conflict());

    // The previously active build kept its flag through both conflicts.
    let builds = engine.registry.list_closure_builds(tenant, "OrgUnit").unwrap();
    let active: Vec<_> = builds
        .iter()
        .filter(|b| b.is_active && b.status == BuildStatus::Ready)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].build_id, b1);
}

#[test]
fn test_concurrent_rebuilds_keep_one_active() {
    let engine = Arc::new(engine());
    let (tenant, _, _) = seed_chain(&engine);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                engine
                    .builds
                    .build_closure(tenant, "OrgUnit", true, Some(&format!("req-{i}")))
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let builds = engine.registry.list_closure_builds(tenant, "OrgUnit").unwrap();
    assert_eq!(builds.len(), 4);
    let active = builds
        .iter()
        .filter(|b| b.is_active && b.status == BuildStatus::Ready)
        .count();
    assert_eq!(active, 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Property: any sequence of build/activate/prune calls leaves at most
    /// one active+ready build per (tenant, hierarchy).
    #[test]
    fn prop_single_active_build_under_arbitrary_sequences(
        ops in proptest::collection::vec(0u8..4, 1..8)
    ) {
        let engine = engine();
        let (tenant, _, _) = seed_chain(&engine);
        let mut applied: Vec<BuildId> = Vec::new();

        for (i, op) in ops.iter().enumerate() {
            match op {
                0 => {
                    let result = engine
                        .builds
                        .build_closure(tenant, "OrgUnit", true, None)
                        .unwrap();
                    applied.push(result.build_id.unwrap());
                },
                1 => {
                    engine
                        .builds
                        .build_closure(tenant, "OrgUnit", false, None)
                        .unwrap();
                },
                2 => {
                    // May target a pruned build; the conflict must not
                    // disturb the invariant.
                    if let Some(&target) = applied.get(i % applied.len().max(1)) {
                        let _ = engine
                            .registry
                            .activate_closure_build(tenant, "OrgUnit", target);
                    }
                },
                _ => {
                    engine
                        .registry
                        .prune_closure_builds(tenant, "OrgUnit", 1 + i % 3, true)
                        .unwrap();
                },
            }

            let builds = engine
                .registry
                .list_closure_builds(tenant, "OrgUnit")
                .unwrap();
            let active = builds
                .iter()
                .filter(|b| b.is_active && b.status == BuildStatus::Ready)
                .count();
            prop_assert!(active <= 1, "op {op} left {active} active builds");
        }
    }
}
