//! The deep-read query facade.
//!
//! One entry point over the three backends. Callers pick a backend per call
//! or fall back to the configured default; every backend resolves to the
//! same ordered relation shape, so switching backends never changes caller
//! code.
//!
//! An optional LRU cache sits in front of the relation queries. Entries are
//! keyed by the full query tuple and the whole cache is cleared on any
//! activation — an activation changes the answer for its key, and clearing
//! everything is cheap relative to a rebuild.

use crate::models::{BackendKind, DeepReadRelation, NodeId, RelationDirection, TenantId};
use crate::storage::{
    ClosureBackend, DeepReadBackend, EdgesBackend, HierarchyStore, SnapshotBackend,
};
use crate::{Error, Result};
use chrono::NaiveDate;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::instrument;

/// LRU cache for relation query results.
///
/// A capacity of zero disables caching entirely.
pub struct RelationCache {
    entries: Option<Mutex<LruCache<String, Vec<DeepReadRelation>>>>,
}

impl RelationCache {
    /// Creates a cache with the given capacity (0 disables it).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    /// Looks up a cached result.
    fn get(&self, key: &str) -> Option<Vec<DeepReadRelation>> {
        let entries = self.entries.as_ref()?;
        let mut cache = crate::storage::acquire_lock(entries);
        cache.get(key).cloned()
    }

    /// Stores a result.
    fn put(&self, key: String, value: Vec<DeepReadRelation>) {
        if let Some(entries) = self.entries.as_ref() {
            let mut cache = crate::storage::acquire_lock(entries);
            cache.put(key, value);
        }
    }

    /// Drops every entry. Called on any build activation.
    pub fn clear(&self) {
        if let Some(entries) = self.entries.as_ref() {
            let mut cache = crate::storage::acquire_lock(entries);
            cache.clear();
        }
    }
}

/// The backend-agnostic deep-read query facade.
pub struct DeepReadService {
    store: Arc<HierarchyStore>,
    edges: EdgesBackend,
    closure: ClosureBackend,
    snapshot: SnapshotBackend,
    cache: Arc<RelationCache>,
    default_backend: BackendKind,
}

impl DeepReadService {
    /// Creates the facade with all three backends over one store.
    #[must_use]
    pub fn new(
        store: Arc<HierarchyStore>,
        cache: Arc<RelationCache>,
        default_backend: BackendKind,
    ) -> Self {
        Self {
            edges: EdgesBackend::new(Arc::clone(&store)),
            closure: ClosureBackend::new(Arc::clone(&store)),
            snapshot: SnapshotBackend::new(Arc::clone(&store)),
            store,
            cache,
            default_backend,
        }
    }

    /// Resolves a backend kind to its implementation.
    fn backend(&self, kind: BackendKind) -> &dyn DeepReadBackend {
        match kind {
            BackendKind::Edges => &self.edges,
            BackendKind::Closure => &self.closure,
            BackendKind::Snapshot => &self.snapshot,
        }
    }

    /// The backend used when a call does not pick one.
    #[must_use]
    pub const fn default_backend(&self) -> BackendKind {
        self.default_backend
    }

    /// Lists a node's ancestors at `as_of` (default: today), ordered by
    /// (depth asc, node id asc), the node itself included at depth 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`] if no edge row covers `as_of`,
    /// [`Error::BuildNotReady`] on build-backed backends without an active
    /// build, or a storage error.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, node_id = %node_id))]
    pub fn list_ancestors_as_of(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: Option<NaiveDate>,
        backend: Option<BackendKind>,
    ) -> Result<Vec<DeepReadRelation>> {
        self.relations(
            tenant_id,
            hierarchy,
            node_id,
            as_of,
            backend,
            RelationDirection::Ancestors,
        )
    }

    /// Lists a node's descendants at `as_of` (default: today), ordered by
    /// (depth asc, node id asc), the node itself included at depth 0.
    ///
    /// # Errors
    ///
    /// Same error contract as [`Self::list_ancestors_as_of`].
    #[instrument(skip(self), fields(tenant_id = %tenant_id, node_id = %node_id))]
    pub fn list_descendants_as_of(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: Option<NaiveDate>,
        backend: Option<BackendKind>,
    ) -> Result<Vec<DeepReadRelation>> {
        self.relations(
            tenant_id,
            hierarchy,
            node_id,
            as_of,
            backend,
            RelationDirection::Descendants,
        )
    }

    fn relations(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: Option<NaiveDate>,
        backend: Option<BackendKind>,
        direction: RelationDirection,
    ) -> Result<Vec<DeepReadRelation>> {
        let as_of = resolve_as_of(as_of);
        let kind = backend.unwrap_or(self.default_backend);

        if !self.store.node_exists_at(tenant_id, hierarchy, node_id, as_of)? {
            return Err(Error::NodeNotFound { node_id, as_of });
        }

        let cache_key = format!(
            "{tenant_id}:{hierarchy}:{node_id}:{as_of}:{kind}:{}",
            direction.as_str()
        );
        if let Some(hit) = self.cache.get(&cache_key) {
            metrics::counter!("orgdeep_relation_cache_hits_total").increment(1);
            return Ok(hit);
        }

        let out = match direction {
            RelationDirection::Ancestors => {
                self.backend(kind)
                    .list_ancestors(tenant_id, hierarchy, node_id, as_of)?
            },
            RelationDirection::Descendants => {
                self.backend(kind)
                    .list_descendants(tenant_id, hierarchy, node_id, as_of)?
            },
        };
        self.cache.put(cache_key, out.clone());
        Ok(out)
    }

    /// Checks whether the node has at least one direct child at `as_of`
    /// (default: today), as seen by the chosen backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BuildNotReady`] on build-backed backends without an
    /// active build, or a storage error.
    pub fn has_children_at(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: Option<NaiveDate>,
        backend: Option<BackendKind>,
    ) -> Result<bool> {
        let as_of = resolve_as_of(as_of);
        let kind = backend.unwrap_or(self.default_backend);
        self.backend(kind)
            .has_children_at(tenant_id, hierarchy, node_id, as_of)
    }

    /// Checks whether the node has an edge row covering `as_of` (default:
    /// today). Backend-independent: builds have no say in node existence.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn node_exists_at(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: Option<NaiveDate>,
    ) -> Result<bool> {
        self.store
            .node_exists_at(tenant_id, hierarchy, node_id, resolve_as_of(as_of))
    }
}

/// Defaults a missing as-of date to today (UTC).
fn resolve_as_of(as_of: Option<NaiveDate>) -> NaiveDate {
    as_of.unwrap_or_else(|| chrono::Utc::now().date_naive())
}
