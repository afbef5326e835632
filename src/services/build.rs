//! Closure and snapshot build orchestration.
//!
//! A build runs synchronously within the caller's request: compute, insert,
//! activate. Writers for one (tenant, hierarchy[, as-of date]) key are
//! serialized by the advisory lock; the whole operation runs under it, so
//! row insertion fully commits before the activation swap and readers only
//! ever see the old build or the new one.
//!
//! Failure after the registry row is inserted marks the build `failed` with
//! the cause in `notes`; the previously active build keeps answering
//! queries, so read availability survives failed rebuilds. Dry-runs compute
//! counts under the same lock but never write.

use crate::closure::{
    MAX_TRAVERSAL_DEPTH, compute_closure, compute_snapshot, max_closure_depth, max_snapshot_depth,
};
use crate::models::{BackendKind, BuildId, BuildRecord, BuildResult, BuildStatus, TenantId};
use crate::services::deep_read::RelationCache;
use crate::storage::{HierarchyStore, KeyedMutex, deep_read_lock_key};
use crate::{Error, Result};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::instrument;

/// Builds closure and snapshot deep-read tables.
pub struct BuildService {
    store: Arc<HierarchyStore>,
    locks: Arc<KeyedMutex>,
    cache: Arc<RelationCache>,
}

impl BuildService {
    /// Creates a build service over the shared store and lock table.
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

    /// Builds (and on `apply`, activates) a temporal-closure table.
    ///
    /// Dry-run (`apply = false`) computes `row_count`/`max_depth` without
    /// persisting anything — used for pre-flight cost estimation.
    ///
    /// # Errors
    ///
    /// Propagates storage failures. A failure after the registry row was
    /// inserted leaves that row `failed` with the cause in `notes`; the
    /// previously active build stays active.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub fn build_closure(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        apply: bool,
        source_request_id: Option<&str>,
    ) -> Result<BuildResult> {
        validate_key(tenant_id, hierarchy)?;
        let key = deep_read_lock_key(&["closure", &tenant_id.to_string(), hierarchy]);

        self.locks.with_lock(&key, || {
            let edges = self.store.edges_for_hierarchy(tenant_id, hierarchy)?;
            let rows = compute_closure(&edges, MAX_TRAVERSAL_DEPTH);

            let mut result = BuildResult {
                tenant_id,
                hierarchy: hierarchy.to_string(),
                backend: BackendKind::Closure,
                build_id: None,
                as_of_date: None,
                dry_run: !apply,
                activated: false,
                row_count: rows.len() as u64,
                max_depth: max_closure_depth(&rows),
                source_request_id: source_request_id.map(ToString::to_string),
            };
            if !apply {
                return Ok(result);
            }

            let build_id = BuildId::generate();
            result.build_id = Some(build_id);
            self.store.insert_closure_build(&building_record(
                tenant_id,
                hierarchy,
                build_id,
                None,
                source_request_id,
            ))?;

            if let Err(e) =
                self.store
                    .insert_closure_rows(tenant_id, hierarchy, build_id, &rows)
            {
                self.record_failure(tenant_id, hierarchy, None, build_id, &e);
                return Err(e);
            }
            if let Err(e) = self
                .store
                .activate_build(tenant_id, hierarchy, None, build_id, false)
            {
                self.record_failure(tenant_id, hierarchy, None, build_id, &e);
                return Err(e);
            }

            result.activated = true;
            self.cache.clear();
            metrics::counter!("orgdeep_builds_total", "backend" => "closure").increment(1);
            Ok(result)
        })
    }

    /// Builds (and on `apply`, activates) a snapshot table frozen at
    /// `as_of_date`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures with the same failed-build semantics as
    /// [`Self::build_closure`].
    #[instrument(skip(self), fields(tenant_id = %tenant_id, as_of_date = %as_of_date))]
    pub fn build_snapshot(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        as_of_date: NaiveDate,
        apply: bool,
        source_request_id: Option<&str>,
    ) -> Result<BuildResult> {
        validate_key(tenant_id, hierarchy)?;
        let date = as_of_date.to_string();
        let key = deep_read_lock_key(&["snapshot", &tenant_id.to_string(), hierarchy, &date]);

        self.locks.with_lock(&key, || {
            let edges = self.store.edges_for_hierarchy(tenant_id, hierarchy)?;
            let rows = compute_snapshot(&edges, as_of_date, MAX_TRAVERSAL_DEPTH);

            let mut result = BuildResult {
                tenant_id,
                hierarchy: hierarchy.to_string(),
                backend: BackendKind::Snapshot,
                build_id: None,
                as_of_date: Some(as_of_date),
                dry_run: !apply,
                activated: false,
                row_count: rows.len() as u64,
                max_depth: max_snapshot_depth(&rows),
                source_request_id: source_request_id.map(ToString::to_string),
            };
            if !apply {
                return Ok(result);
            }

            let build_id = BuildId::generate();
            result.build_id = Some(build_id);
            self.store.insert_snapshot_build(&building_record(
                tenant_id,
                hierarchy,
                build_id,
                Some(as_of_date),
                source_request_id,
            ))?;

            if let Err(e) = self.store.insert_snapshot_rows(
                tenant_id,
                hierarchy,
                as_of_date,
                build_id,
                &rows,
            ) {
                self.record_failure(tenant_id, hierarchy, Some(as_of_date), build_id, &e);
                return Err(e);
            }
            if let Err(e) =
                self.store
                    .activate_build(tenant_id, hierarchy, Some(as_of_date), build_id, false)
            {
                self.record_failure(tenant_id, hierarchy, Some(as_of_date), build_id, &e);
                return Err(e);
            }

            result.activated = true;
            self.cache.clear();
            metrics::counter!("orgdeep_builds_total", "backend" => "snapshot").increment(1);
            Ok(result)
        })
    }

    /// Marks the build `failed` with the error text; the failure to mark is
    /// itself only logged, since the original error is what the caller needs.
    fn record_failure(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        as_of_date: Option<NaiveDate>,
        build_id: BuildId,
        cause: &Error,
    ) {
        metrics::counter!("orgdeep_build_failures_total").increment(1);
        if let Err(mark_err) = self.store.mark_build_failed(
            tenant_id,
            hierarchy,
            as_of_date,
            build_id,
            &cause.to_string(),
        ) {
            tracing::error!(
                build_id = %build_id,
                error = %mark_err,
                "failed to mark build as failed"
            );
        }
    }
}

/// Validates the build key inputs.
fn validate_key(tenant_id: TenantId, hierarchy: &str) -> Result<()> {
    if tenant_id.as_uuid().is_nil() {
        return Err(Error::InvalidInput("tenant_id is required".to_string()));
    }
    if hierarchy.trim().is_empty() {
        return Err(Error::InvalidInput("hierarchy is required".to_string()));
    }
    Ok(())
}

/// Assembles the initial `building` registry row.
fn building_record(
    tenant_id: TenantId,
    hierarchy: &str,
    build_id: BuildId,
    as_of_date: Option<NaiveDate>,
    source_request_id: Option<&str>,
) -> BuildRecord {
    BuildRecord {
        tenant_id,
        hierarchy: hierarchy.to_string(),
        build_id,
        as_of_date,
        status: BuildStatus::Building,
        is_active: false,
        built_at: chrono::Utc::now().timestamp(),
        source_request_id: source_request_id.map(ToString::to_string),
        notes: None,
    }
}
