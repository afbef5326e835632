//! Build registry operations: activation and pruning.

use crate::models::{BackendKind, BuildId, BuildRecord, PruneResult, TenantId};
use crate::services::deep_read::RelationCache;
use crate::storage::{HierarchyStore, KeyedMutex, deep_read_lock_key};
use crate::Result;
use std::sync::Arc;
use tracing::instrument;

/// Activates and prunes builds in the registry.
pub struct RegistryService {
    store: Arc<HierarchyStore>,
    locks: Arc<KeyedMutex>,
    cache: Arc<RelationCache>,
}

impl RegistryService {
    /// Creates a registry service over the shared store and lock table.
    #[must_use]
    pub const fn new(
        store: Arc<HierarchyStore>,
        locks: Arc<KeyedMutex>,
        cache: Arc<RelationCache>,
    ) -> Self {
        Self {
            store,
            locks,
            cache,
        }
    }

    /// Activates a ready closure build, returning the build it replaced.
    ///
    /// Re-activating a previous build id is the rollback path; it is a
    /// normal activation. The swap (deactivate-all, activate-one) happens in
    /// one transaction under the writer lock, so readers see either the old
    /// or the new build, never zero or two active ones.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ActivationConflict`] if the target build is
    /// not `status=ready`.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, build_id = %build_id))]
    pub fn activate_closure_build(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        build_id: BuildId,
    ) -> Result<Option<BuildId>> {
        let key = deep_read_lock_key(&["closure", &tenant_id.to_string(), hierarchy]);
        let previous = self.locks.with_lock(&key, || {
            self.store
                .activate_build(tenant_id, hierarchy, None, build_id, true)
        })?;

        self.cache.clear();
        metrics::counter!("orgdeep_activations_total", "backend" => "closure").increment(1);
        Ok(previous)
    }

    /// Deletes closure builds beyond the retention count, cascading their
    /// rows. The currently active build is always retained regardless of
    /// recency; after it, the `keep_n - 1` next-most-recent survive.
    ///
    /// `keep_n` below 1 is clamped to 1. Dry-run (`apply = false`) reports
    /// how many builds would be deleted without touching the registry.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub fn prune_closure_builds(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        keep_n: usize,
        apply: bool,
    ) -> Result<PruneResult> {
        let keep_n = keep_n.max(1);
        let key = deep_read_lock_key(&["closure", &tenant_id.to_string(), hierarchy]);
        let deleted_builds = self.locks.with_lock(&key, || {
            self.store
                .prune_closure_builds(tenant_id, hierarchy, keep_n, apply)
        })?;

        Ok(PruneResult {
            tenant_id,
            hierarchy: hierarchy.to_string(),
            backend: BackendKind::Closure,
            dry_run: !apply,
            deleted_builds,
        })
    }

    /// Lists closure-registry rows, newest first.
    ///
    /// Operators use this to spot stale `building` rows left behind by
    /// aborted builds: the engine defines no timeout, so an age threshold is
    /// applied by whoever watches the output.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn list_closure_builds(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
    ) -> Result<Vec<BuildRecord>> {
        self.store.list_closure_builds(tenant_id, hierarchy)
    }

    /// Lists snapshot-registry rows, newest first.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn list_snapshot_builds(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
    ) -> Result<Vec<BuildRecord>> {
        self.store.list_snapshot_builds(tenant_id, hierarchy)
    }
}
