//! Deep-read backend strategy: one trait, three implementations.
//!
//! # Available Implementations
//!
//! | Backend | Answers From | Trade-off |
//! |---------|--------------|-----------|
//! | [`EdgesBackend`] | Live edge rows via path containment | Always current; path query per call |
//! | [`ClosureBackend`] | Active closure build, interval-filtered | Fast; needs a build covering the date |
//! | [`SnapshotBackend`] | Active snapshot build for the exact date | Fastest; needs a build per date |
//!
//! All three resolve to the same [`DeepReadRelation`] shape with the same
//! ordering contract — (depth asc, node id asc) — so callers are
//! backend-agnostic. The build-backed implementations fail with the
//! distinguished [`crate::Error::BuildNotReady`] when no active+ready build
//! exists for the key.
//!
//! # Implementor Notes
//!
//! - Methods take `&self` so backends can be shared via `Arc<dyn DeepReadBackend>`
//! - `node_exists_at` answers from the edge store on every backend: a node
//!   exists when an edge row covers the date, regardless of what builds say
//! - `has_children_at` consults the backend's own depth-1 rows, so it agrees
//!   with what that backend's list operations would return

use crate::Result;
use crate::models::{BackendKind, DeepReadRelation, NodeId, RelationDirection, TenantId};
use crate::storage::sqlite::HierarchyStore;
use chrono::NaiveDate;
use std::sync::Arc;

/// Trait for deep-read query backends.
pub trait DeepReadBackend: Send + Sync {
    /// Which strategy this backend implements.
    fn kind(&self) -> BackendKind;

    /// Lists a node's ancestors at `as_of`, closest first, including the
    /// node itself at depth 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails, or [`crate::Error::BuildNotReady`]
    /// on build-backed backends without an active build.
    fn list_ancestors(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<Vec<DeepReadRelation>>;

    /// Lists a node's descendants at `as_of`, shallowest first, including
    /// the node itself at depth 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails, or [`crate::Error::BuildNotReady`]
    /// on build-backed backends without an active build.
    fn list_descendants(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<Vec<DeepReadRelation>>;

    /// Checks whether the node has at least one direct child at `as_of`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails, or [`crate::Error::BuildNotReady`]
    /// on build-backed backends without an active build.
    fn has_children_at(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<bool>;

    /// Checks whether the node has an edge row covering `as_of`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn node_exists_at(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<bool>;
}

/// Live edge traversal via materialized path containment.
pub struct EdgesBackend {
    store: Arc<HierarchyStore>,
}

impl EdgesBackend {
    /// Creates an edges backend over the store.
    #[must_use]
    pub const fn new(store: Arc<HierarchyStore>) -> Self {
        Self { store }
    }
}

impl DeepReadBackend for EdgesBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Edges
    }

    fn list_ancestors(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<Vec<DeepReadRelation>> {
        self.store
            .edge_relations(tenant_id, hierarchy, node_id, as_of, RelationDirection::Ancestors)
    }

    fn list_descendants(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<Vec<DeepReadRelation>> {
        self.store.edge_relations(
            tenant_id,
            hierarchy,
            node_id,
            as_of,
            RelationDirection::Descendants,
        )
    }

    fn has_children_at(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<bool> {
        self.store
            .edge_children_exist_at(tenant_id, hierarchy, node_id, as_of)
    }

    fn node_exists_at(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<bool> {
        self.store.node_exists_at(tenant_id, hierarchy, node_id, as_of)
    }
}

/// Reads from the active temporal-closure build, filtered by valid-time
/// coverage of the query date.
pub struct ClosureBackend {
    store: Arc<HierarchyStore>,
}

impl ClosureBackend {
    /// Creates a closure backend over the store.
    #[must_use]
    pub const fn new(store: Arc<HierarchyStore>) -> Self {
        Self { store }
    }
}

impl DeepReadBackend for ClosureBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Closure
    }

    fn list_ancestors(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<Vec<DeepReadRelation>> {
        let build_id = self.store.active_closure_build_id(tenant_id, hierarchy)?;
        self.store.closure_relations(
            tenant_id,
            hierarchy,
            build_id,
            node_id,
            as_of,
            RelationDirection::Ancestors,
        )
    }

    fn list_descendants(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<Vec<DeepReadRelation>> {
        let build_id = self.store.active_closure_build_id(tenant_id, hierarchy)?;
        self.store.closure_relations(
            tenant_id,
            hierarchy,
            build_id,
            node_id,
            as_of,
            RelationDirection::Descendants,
        )
    }

    fn has_children_at(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<bool> {
        let build_id = self.store.active_closure_build_id(tenant_id, hierarchy)?;
        self.store
            .closure_has_child_at(tenant_id, hierarchy, build_id, node_id, as_of)
    }

    fn node_exists_at(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<bool> {
        self.store.node_exists_at(tenant_id, hierarchy, node_id, as_of)
    }
}

/// Reads from the active snapshot build for the exact as-of date. No
/// runtime valid-time filtering: rows are already date-pinned.
pub struct SnapshotBackend {
    store: Arc<HierarchyStore>,
}

impl SnapshotBackend {
    /// Creates a snapshot backend over the store.
    #[must_use]
    pub const fn new(store: Arc<HierarchyStore>) -> Self {
        Self { store }
    }
}

impl DeepReadBackend for SnapshotBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Snapshot
    }

    fn list_ancestors(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<Vec<DeepReadRelation>> {
        let build_id = self
            .store
            .active_snapshot_build_id(tenant_id, hierarchy, as_of)?;
        self.store.snapshot_relations(
            tenant_id,
            hierarchy,
            as_of,
            build_id,
            node_id,
            RelationDirection::Ancestors,
        )
    }

    fn list_descendants(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<Vec<DeepReadRelation>> {
        let build_id = self
            .store
            .active_snapshot_build_id(tenant_id, hierarchy, as_of)?;
        self.store.snapshot_relations(
            tenant_id,
            hierarchy,
            as_of,
            build_id,
            node_id,
            RelationDirection::Descendants,
        )
    }

    fn has_children_at(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<bool> {
        let build_id = self
            .store
            .active_snapshot_build_id(tenant_id, hierarchy, as_of)?;
        self.store
            .snapshot_has_child(tenant_id, hierarchy, as_of, build_id, node_id)
    }

    fn node_exists_at(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<bool> {
        self.store.node_exists_at(tenant_id, hierarchy, node_id, as_of)
    }
}
