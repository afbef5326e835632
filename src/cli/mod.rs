//! CLI command implementations.
//!
//! Thin wrappers over the engine services: parse ids and dates, run the
//! operation, and emit the result as JSON with a `duration_ms` field. All
//! engine semantics live in [`crate::services`]; nothing here holds state.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `closure build` | Build (and with `--apply`, activate) the temporal closure |
//! | `closure activate` | Activate a ready closure build (rollback = activate a previous id) |
//! | `closure prune` | Delete superseded closure builds, keeping the active one |
//! | `snapshot build` | Build a date-pinned snapshot |
//! | `reporting build` | Materialize reporting nodes from the active snapshot |
//! | `query ancestors`/`query descendants` | Deep-read relations through a chosen backend |
//! | `builds list` | Registry rows with status and age, for operators |

// CLI output goes to stdout by design.
#![allow(clippy::print_stdout)]

use crate::models::{BackendKind, BuildId, NodeId, TenantId};
use crate::services::Engine;
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::time::Instant;

/// Envelope for every CLI result.
#[derive(Debug, Serialize)]
struct CommandOutput<T: Serialize> {
    command: String,
    duration_ms: u128,
    result: T,
}

/// Serializes and prints a command result.
fn emit<T: Serialize>(command: &str, started: Instant, result: T) -> Result<()> {
    let out = CommandOutput {
        command: command.to_string(),
        duration_ms: started.elapsed().as_millis(),
        result,
    };
    let rendered = serde_json::to_string_pretty(&out)
        .map_err(|e| Error::operation("render_output", e))?;
    println!("{rendered}");
    Ok(())
}

/// Parses the `--as-of-date` flag.
fn parse_date(s: &str) -> Result<NaiveDate> {
    s.parse()
        .map_err(|e| Error::InvalidInput(format!("invalid date '{s}': {e}")))
}

/// Fills a missing request id so builds are always attributable.
fn resolve_request_id(request_id: Option<String>) -> String {
    request_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// `closure build`
pub fn closure_build(
    engine: &Engine,
    tenant: &str,
    hierarchy: &str,
    apply: bool,
    request_id: Option<String>,
) -> Result<()> {
    let tenant_id = TenantId::parse(tenant)?;
    let request_id = resolve_request_id(request_id);
    let started = Instant::now();
    let result = engine
        .builds
        .build_closure(tenant_id, hierarchy, apply, Some(&request_id))?;
    emit("closure build", started, result)
}

/// `snapshot build`
pub fn snapshot_build(
    engine: &Engine,
    tenant: &str,
    hierarchy: &str,
    as_of_date: &str,
    apply: bool,
    request_id: Option<String>,
) -> Result<()> {
    let tenant_id = TenantId::parse(tenant)?;
    let as_of = parse_date(as_of_date)?;
    let request_id = resolve_request_id(request_id);
    let started = Instant::now();
    let result =
        engine
            .builds
            .build_snapshot(tenant_id, hierarchy, as_of, apply, Some(&request_id))?;
    emit("snapshot build", started, result)
}

/// Result shape for `closure activate`.
#[derive(Debug, Serialize)]
struct ActivateOutput {
    tenant_id: TenantId,
    hierarchy: String,
    build_id: BuildId,
    previous_build_id: Option<BuildId>,
}

/// `closure activate`
pub fn closure_activate(
    engine: &Engine,
    tenant: &str,
    hierarchy: &str,
    build_id: &str,
) -> Result<()> {
    let tenant_id = TenantId::parse(tenant)?;
    let build_id = BuildId::parse(build_id)?;
    let started = Instant::now();
    let previous_build_id = engine
        .registry
        .activate_closure_build(tenant_id, hierarchy, build_id)?;
    emit(
        "closure activate",
        started,
        ActivateOutput {
            tenant_id,
            hierarchy: hierarchy.to_string(),
            build_id,
            previous_build_id,
        },
    )
}

/// `closure prune`
pub fn closure_prune(
    engine: &Engine,
    tenant: &str,
    hierarchy: &str,
    keep: usize,
    apply: bool,
) -> Result<()> {
    let tenant_id = TenantId::parse(tenant)?;
    let started = Instant::now();
    let result = engine
        .registry
        .prune_closure_builds(tenant_id, hierarchy, keep, apply)?;
    emit("closure prune", started, result)
}

/// `reporting build`
#[allow(clippy::fn_params_excessive_bools)]
pub fn reporting_build(
    engine: &Engine,
    tenant: &str,
    hierarchy: &str,
    as_of_date: &str,
    include_security_groups: bool,
    include_links: bool,
    apply: bool,
) -> Result<()> {
    let tenant_id = TenantId::parse(tenant)?;
    let as_of = parse_date(as_of_date)?;
    let started = Instant::now();
    let result = engine.reporting.materialize_reporting_nodes(
        tenant_id,
        hierarchy,
        as_of,
        include_security_groups,
        include_links,
        apply,
    )?;
    emit("reporting build", started, result)
}

/// Which relation list a query command asks for.
#[derive(Debug, Clone, Copy)]
pub enum QueryDirection {
    /// `query ancestors`
    Ancestors,
    /// `query descendants`
    Descendants,
}

/// `query ancestors` / `query descendants`
pub fn query_relations(
    engine: &Engine,
    direction: QueryDirection,
    tenant: &str,
    hierarchy: &str,
    node: &str,
    as_of_date: Option<&str>,
    backend: Option<&str>,
) -> Result<()> {
    let tenant_id = TenantId::parse(tenant)?;
    let node_id = NodeId::parse(node)?;
    let as_of = as_of_date.map(parse_date).transpose()?;
    let backend = backend.map(BackendKind::parse).transpose()?;

    let started = Instant::now();
    let (command, result) = match direction {
        QueryDirection::Ancestors => (
            "query ancestors",
            engine
                .deep_read
                .list_ancestors_as_of(tenant_id, hierarchy, node_id, as_of, backend)?,
        ),
        QueryDirection::Descendants => (
            "query descendants",
            engine
                .deep_read
                .list_descendants_as_of(tenant_id, hierarchy, node_id, as_of, backend)?,
        ),
    };
    emit(command, started, result)
}

/// One registry row as shown to operators, with its age.
#[derive(Debug, Serialize)]
struct BuildListEntry {
    build_id: BuildId,
    as_of_date: Option<NaiveDate>,
    status: String,
    is_active: bool,
    built_at: i64,
    age_seconds: i64,
    source_request_id: Option<String>,
    notes: Option<String>,
}

/// Result shape for `builds list`.
#[derive(Debug, Serialize)]
struct BuildListOutput {
    tenant_id: TenantId,
    hierarchy: String,
    closure: Vec<BuildListEntry>,
    snapshot: Vec<BuildListEntry>,
}

/// `builds list`
///
/// Shows registry rows with their age so operators can spot stale
/// `building` rows left behind by aborted builds.
pub fn builds_list(engine: &Engine, tenant: &str, hierarchy: &str) -> Result<()> {
    let tenant_id = TenantId::parse(tenant)?;
    let started = Instant::now();
    let now = chrono::Utc::now().timestamp();

    let entry = |record: crate::models::BuildRecord| BuildListEntry {
        build_id: record.build_id,
        as_of_date: record.as_of_date,
        status: record.status.to_string(),
        is_active: record.is_active,
        built_at: record.built_at,
        age_seconds: now - record.built_at,
        source_request_id: record.source_request_id,
        notes: record.notes,
    };

    let closure = engine
        .registry
        .list_closure_builds(tenant_id, hierarchy)?
        .into_iter()
        .map(entry)
        .collect();
    let snapshot = engine
        .registry
        .list_snapshot_builds(tenant_id, hierarchy)?
        .into_iter()
        .map(entry)
        .collect();

    emit(
        "builds list",
        started,
        BuildListOutput {
            tenant_id,
            hierarchy: hierarchy.to_string(),
            closure,
            snapshot,
        },
    )
}
