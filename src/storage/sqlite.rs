//! `SQLite` store for edges, build registries, materialized rows and the
//! node catalog.
//!
//! # Concurrency Model
//!
//! Uses a `Mutex<Connection>` for thread-safe access. WAL mode and
//! `busy_timeout` handle concurrent access gracefully. Build-registry writes
//! additionally run under the keyed advisory locks in
//! [`crate::storage::lock`]; plain reads never do.
//!
//! # Schema
//!
//! | Table | Contents |
//! |-------|----------|
//! | `nodes` / `node_slices` | Node catalog: code, temporal name/status/attributes |
//! | `edges` | Bitemporal parent/child relation with materialized paths |
//! | `closure_builds` / `closure_rows` | Temporal-closure registry and rows |
//! | `snapshot_builds` / `snapshot_rows` | Date-pinned snapshot registry and rows |
//! | `security_group_mappings` | Security-group grants per node |
//! | `org_links` | Linked objects per node |
//! | `reporting_nodes` | Flat denormalized reporting rows |
//!
//! Dates are stored as ISO-8601 TEXT (which compares correctly), uuids as
//! their hyphenated TEXT form (whose lexicographic order matches uuid
//! order).

// Allow cast_possible_truncation and cast_sign_loss for SQLite i64 to u32/u64
// conversions. Depths and row counts are inherently non-negative and small.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use crate::models::{
    BuildId, BuildRecord, BuildStatus, ClosureRow, DeepReadRelation, Edge, LinkSummary, NodeId,
    NodePath, NodeRecord, NodeSlice, OrgLink, RelationDirection, ReportingNode,
    SecurityGroupMapping, SnapshotRow, TenantId, ValidPeriod,
};
use crate::models::NodeAttributes;
use crate::storage::acquire_lock;
use crate::{Error, Result};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

/// `SQLite`-backed hierarchy store.
pub struct HierarchyStore {
    /// Connection to the `SQLite` database.
    conn: Mutex<Connection>,
    /// Path to the database (None for in-memory).
    db_path: Option<PathBuf>,
}

/// Wraps a row-level conversion failure so it propagates through rusqlite.
fn conversion_err(
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
}

/// Reads a uuid column stored as TEXT.
fn get_uuid(row: &Row<'_>, idx: &str) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(conversion_err)
}

/// Reads an optional uuid column stored as TEXT.
fn get_opt_uuid(row: &Row<'_>, idx: &str) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| Uuid::parse_str(&s).map_err(conversion_err)).transpose()
}

/// Reads a date column stored as ISO-8601 TEXT.
fn get_date(row: &Row<'_>, idx: &str) -> rusqlite::Result<NaiveDate> {
    let s: String = row.get(idx)?;
    s.parse().map_err(conversion_err)
}

/// Reads the valid-time window columns.
fn get_period(row: &Row<'_>) -> rusqlite::Result<ValidPeriod> {
    Ok(ValidPeriod {
        effective_date: get_date(row, "effective_date")?,
        end_date: get_date(row, "end_date")?,
    })
}

impl HierarchyStore {
    /// Opens (or creates) a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = Connection::open(&db_path)
            .map_err(|e| Error::operation("open_hierarchy_store", e))?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::operation("open_hierarchy_store_memory", e))?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Initializes the database schema.
    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);

        // Enable WAL mode for better concurrent read performance
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "busy_timeout", "5000");
        let _ = conn.pragma_update(None, "foreign_keys", "ON");

        let statements = [
            "CREATE TABLE IF NOT EXISTS nodes (
                tenant_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                code TEXT NOT NULL,
                PRIMARY KEY (tenant_id, node_id)
            )",
            "CREATE TABLE IF NOT EXISTS node_slices (
                tenant_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                legal_entity_id TEXT,
                company_code TEXT,
                location_id TEXT,
                manager_user_id INTEGER,
                effective_date TEXT NOT NULL,
                end_date TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS edges (
                tenant_id TEXT NOT NULL,
                hierarchy_type TEXT NOT NULL,
                parent_node_id TEXT,
                child_node_id TEXT NOT NULL,
                effective_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                depth INTEGER NOT NULL,
                path TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS closure_builds (
                tenant_id TEXT NOT NULL,
                hierarchy_type TEXT NOT NULL,
                build_id TEXT NOT NULL,
                status TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0,
                built_at INTEGER NOT NULL,
                source_request_id TEXT,
                notes TEXT,
                PRIMARY KEY (tenant_id, hierarchy_type, build_id)
            )",
            "CREATE TABLE IF NOT EXISTS closure_rows (
                tenant_id TEXT NOT NULL,
                hierarchy_type TEXT NOT NULL,
                build_id TEXT NOT NULL,
                ancestor_node_id TEXT NOT NULL,
                descendant_node_id TEXT NOT NULL,
                depth INTEGER NOT NULL,
                effective_date TEXT NOT NULL,
                end_date TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS snapshot_builds (
                tenant_id TEXT NOT NULL,
                hierarchy_type TEXT NOT NULL,
                as_of_date TEXT NOT NULL,
                build_id TEXT NOT NULL,
                status TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0,
                built_at INTEGER NOT NULL,
                source_request_id TEXT,
                notes TEXT,
                PRIMARY KEY (tenant_id, hierarchy_type, as_of_date, build_id)
            )",
            "CREATE TABLE IF NOT EXISTS snapshot_rows (
                tenant_id TEXT NOT NULL,
                hierarchy_type TEXT NOT NULL,
                as_of_date TEXT NOT NULL,
                build_id TEXT NOT NULL,
                ancestor_node_id TEXT NOT NULL,
                descendant_node_id TEXT NOT NULL,
                depth INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS security_group_mappings (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                org_node_id TEXT NOT NULL,
                security_group_key TEXT NOT NULL,
                applies_to_subtree INTEGER NOT NULL DEFAULT 0,
                effective_date TEXT NOT NULL,
                end_date TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS org_links (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                org_node_id TEXT NOT NULL,
                object_type TEXT NOT NULL,
                object_key TEXT NOT NULL,
                link_type TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                effective_date TEXT NOT NULL,
                end_date TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS reporting_nodes (
                tenant_id TEXT NOT NULL,
                hierarchy_type TEXT NOT NULL,
                as_of_date TEXT NOT NULL,
                build_id TEXT NOT NULL,
                org_node_id TEXT NOT NULL,
                code TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                parent_node_id TEXT,
                depth INTEGER NOT NULL,
                path_node_ids TEXT NOT NULL,
                path_codes TEXT NOT NULL,
                path_names TEXT NOT NULL,
                security_group_keys TEXT NOT NULL DEFAULT '[]',
                links TEXT NOT NULL DEFAULT '[]',
                PRIMARY KEY (tenant_id, hierarchy_type, as_of_date, build_id, org_node_id)
            )",
        ];

        for sql in statements {
            conn.execute(sql, [])
                .map_err(|e| Error::operation("create_schema", e))?;
        }

        Self::create_indexes(&conn);
        Ok(())
    }

    /// Creates indexes for optimized queries.
    fn create_indexes(conn: &Connection) {
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_edges_child ON edges(tenant_id, hierarchy_type, child_node_id, effective_date)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_edges_parent ON edges(tenant_id, hierarchy_type, parent_node_id)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_edges_path ON edges(tenant_id, hierarchy_type, path)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_closure_builds_active ON closure_builds(tenant_id, hierarchy_type, is_active)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_closure_rows_desc ON closure_rows(tenant_id, hierarchy_type, build_id, descendant_node_id)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_closure_rows_anc ON closure_rows(tenant_id, hierarchy_type, build_id, ancestor_node_id)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_snapshot_builds_active ON snapshot_builds(tenant_id, hierarchy_type, as_of_date, is_active)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_snapshot_rows_desc ON snapshot_rows(tenant_id, hierarchy_type, as_of_date, build_id, descendant_node_id)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_snapshot_rows_anc ON snapshot_rows(tenant_id, hierarchy_type, as_of_date, build_id, ancestor_node_id)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sg_mappings_node ON security_group_mappings(tenant_id, org_node_id)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_org_links_node ON org_links(tenant_id, org_node_id)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_node_slices_node ON node_slices(tenant_id, node_id, effective_date)",
            [],
        );
    }

    // ========================================================================
    // Node catalog
    // ========================================================================

    /// Inserts or updates a node's catalog entry.
    pub fn upsert_node(&self, tenant_id: TenantId, node: &NodeRecord) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT INTO nodes (tenant_id, node_id, code) VALUES (?1, ?2, ?3)
             ON CONFLICT(tenant_id, node_id) DO UPDATE SET code = excluded.code",
            params![tenant_id.to_string(), node.node_id.to_string(), node.code],
        )
        .map_err(|e| Error::operation("upsert_node", e))?;
        Ok(())
    }

    /// Inserts one temporal slice of a node's descriptive data.
    pub fn insert_node_slice(&self, tenant_id: TenantId, slice: &NodeSlice) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT INTO node_slices (
                tenant_id, node_id, name, status,
                legal_entity_id, company_code, location_id, manager_user_id,
                effective_date, end_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                tenant_id.to_string(),
                slice.node_id.to_string(),
                slice.name,
                slice.status,
                slice.attributes.legal_entity_id.map(|u| u.to_string()),
                slice.attributes.company_code,
                slice.attributes.location_id.map(|u| u.to_string()),
                slice.attributes.manager_user_id,
                slice.period.effective_date.to_string(),
                slice.period.end_date.to_string(),
            ],
        )
        .map_err(|e| Error::operation("insert_node_slice", e))?;
        Ok(())
    }

    /// Parses a node slice from a database row.
    fn parse_slice_row(row: &Row<'_>) -> rusqlite::Result<NodeSlice> {
        Ok(NodeSlice {
            node_id: NodeId::new(get_uuid(row, "node_id")?),
            name: row.get("name")?,
            status: row.get("status")?,
            attributes: NodeAttributes {
                legal_entity_id: get_opt_uuid(row, "legal_entity_id")?,
                company_code: row.get("company_code")?,
                location_id: get_opt_uuid(row, "location_id")?,
                manager_user_id: row.get("manager_user_id")?,
            },
            period: get_period(row)?,
        })
    }

    /// Returns the slice covering `as_of` for each of the given nodes.
    pub fn slices_for_nodes_at(
        &self,
        tenant_id: TenantId,
        node_ids: &[NodeId],
        as_of: NaiveDate,
    ) -> Result<Vec<NodeSlice>> {
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = acquire_lock(&self.conn);

        let placeholders: Vec<String> = (3..3 + node_ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT node_id, name, status, legal_entity_id, company_code, location_id,
                    manager_user_id, effective_date, end_date
             FROM node_slices
             WHERE tenant_id = ?1
               AND effective_date <= ?2 AND end_date > ?2
               AND node_id IN ({})",
            placeholders.join(", ")
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::operation("slices_for_nodes_at_prepare", e))?;

        let tenant = tenant_id.to_string();
        let date = as_of.to_string();
        let ids: Vec<String> = node_ids.iter().map(ToString::to_string).collect();
        let mut args: Vec<&dyn rusqlite::ToSql> = vec![&tenant, &date];
        for id in &ids {
            args.push(id);
        }

        stmt.query_map(args.as_slice(), Self::parse_slice_row)
            .map_err(|e| Error::operation("slices_for_nodes_at", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::operation("slices_for_nodes_at", e))
    }

    /// Returns every node with a slice covering `as_of`, joined with its code.
    pub fn nodes_with_slices_at(
        &self,
        tenant_id: TenantId,
        as_of: NaiveDate,
    ) -> Result<Vec<(NodeRecord, NodeSlice)>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT n.code, s.node_id, s.name, s.status, s.legal_entity_id,
                        s.company_code, s.location_id, s.manager_user_id,
                        s.effective_date, s.end_date
                 FROM nodes n
                 JOIN node_slices s
                   ON s.tenant_id = n.tenant_id AND s.node_id = n.node_id
                 WHERE n.tenant_id = ?1
                   AND s.effective_date <= ?2 AND s.end_date > ?2",
            )
            .map_err(|e| Error::operation("nodes_with_slices_at_prepare", e))?;

        stmt.query_map(
            params![tenant_id.to_string(), as_of.to_string()],
            |row| {
                let slice = Self::parse_slice_row(row)?;
                let record = NodeRecord {
                    node_id: slice.node_id,
                    code: row.get("code")?,
                };
                Ok((record, slice))
            },
        )
        .map_err(|e| Error::operation("nodes_with_slices_at", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::operation("nodes_with_slices_at", e))
    }

    // ========================================================================
    // Edge store
    // ========================================================================

    /// Inserts an edge row.
    ///
    /// The deep-read engine itself never calls this; it exists for loaders
    /// and fixtures standing in for the hierarchy-edit operations.
    pub fn insert_edge(&self, edge: &Edge) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT INTO edges (
                tenant_id, hierarchy_type, parent_node_id, child_node_id,
                effective_date, end_date, depth, path
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                edge.tenant_id.to_string(),
                edge.hierarchy,
                edge.parent_node_id.map(|n| n.to_string()),
                edge.child_node_id.to_string(),
                edge.period.effective_date.to_string(),
                edge.period.end_date.to_string(),
                edge.depth,
                edge.path.as_str(),
            ],
        )
        .map_err(|e| Error::operation("insert_edge", e))?;
        Ok(())
    }

    /// Parses an edge from a database row.
    fn parse_edge_row(row: &Row<'_>) -> rusqlite::Result<Edge> {
        let parent: Option<String> = row.get("parent_node_id")?;
        let parent_node_id = parent
            .map(|s| Uuid::parse_str(&s).map(NodeId::new).map_err(conversion_err))
            .transpose()?;
        let path: String = row.get("path")?;
        let depth: i64 = row.get("depth")?;
        Ok(Edge {
            tenant_id: TenantId::new(get_uuid(row, "tenant_id")?),
            hierarchy: row.get("hierarchy_type")?,
            parent_node_id,
            child_node_id: NodeId::new(get_uuid(row, "child_node_id")?),
            period: get_period(row)?,
            depth: depth as u32,
            path: NodePath::parse(&path).map_err(conversion_err)?,
        })
    }

    /// Returns every edge of a hierarchy, in deterministic closure-seed order.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub fn edges_for_hierarchy(&self, tenant_id: TenantId, hierarchy: &str) -> Result<Vec<Edge>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT tenant_id, hierarchy_type, parent_node_id, child_node_id,
                        effective_date, end_date, depth, path
                 FROM edges
                 WHERE tenant_id = ?1 AND hierarchy_type = ?2
                 ORDER BY parent_node_id, child_node_id, effective_date",
            )
            .map_err(|e| Error::operation("edges_for_hierarchy_prepare", e))?;

        stmt.query_map(
            params![tenant_id.to_string(), hierarchy],
            Self::parse_edge_row,
        )
        .map_err(|e| Error::operation("edges_for_hierarchy", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::operation("edges_for_hierarchy", e))
    }

    /// Returns the edge row covering `as_of` for a node, if any.
    pub fn edge_for_node_at(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<Option<Edge>> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT tenant_id, hierarchy_type, parent_node_id, child_node_id,
                    effective_date, end_date, depth, path
             FROM edges
             WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND child_node_id = ?3
               AND effective_date <= ?4 AND end_date > ?4
             ORDER BY effective_date DESC
             LIMIT 1",
            params![
                tenant_id.to_string(),
                hierarchy,
                node_id.to_string(),
                as_of.to_string()
            ],
            Self::parse_edge_row,
        )
        .optional()
        .map_err(|e| Error::operation("edge_for_node_at", e))
    }

    /// Checks whether a node has an edge row covering `as_of`.
    pub fn node_exists_at(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<bool> {
        Ok(self
            .edge_for_node_at(tenant_id, hierarchy, node_id, as_of)?
            .is_some())
    }

    /// Checks whether any live edge has the node as its parent at `as_of`.
    pub fn edge_children_exist_at(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT 1 FROM edges
             WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND parent_node_id = ?3
               AND effective_date <= ?4 AND end_date > ?4
             LIMIT 1",
            params![
                tenant_id.to_string(),
                hierarchy,
                node_id.to_string(),
                as_of.to_string()
            ],
            |_| Ok(()),
        )
        .optional()
        .map(|r| r.is_some())
        .map_err(|e| Error::operation("edge_children_exist_at", e))
    }

    /// Lists ancestors or descendants by path containment at `as_of`.
    ///
    /// Resolves the node's live edge row, then matches live edges whose path
    /// contains (ancestors) or is contained by (descendants) the node's
    /// path. Results are ordered by (relative depth asc, node id asc) and
    /// include the node itself at depth 0. A node without a live edge row
    /// yields an empty list.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, node_id = %node_id))]
    pub fn edge_relations(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        node_id: NodeId,
        as_of: NaiveDate,
        direction: RelationDirection,
    ) -> Result<Vec<DeepReadRelation>> {
        let Some(target) = self.edge_for_node_at(tenant_id, hierarchy, node_id, as_of)? else {
            return Ok(Vec::new());
        };

        let sql = match direction {
            RelationDirection::Ancestors => {
                "SELECT child_node_id, (?5 - depth) AS rel_depth
                 FROM edges
                 WHERE tenant_id = ?1 AND hierarchy_type = ?2
                   AND effective_date <= ?3 AND end_date > ?3
                   AND (?4 = path OR ?4 LIKE path || '.%')
                 ORDER BY rel_depth ASC, child_node_id ASC"
            },
            RelationDirection::Descendants => {
                "SELECT child_node_id, (depth - ?5) AS rel_depth
                 FROM edges
                 WHERE tenant_id = ?1 AND hierarchy_type = ?2
                   AND effective_date <= ?3 AND end_date > ?3
                   AND (path = ?4 OR path LIKE ?4 || '.%')
                 ORDER BY rel_depth ASC, child_node_id ASC"
            },
        };

        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::operation("edge_relations_prepare", e))?;

        stmt.query_map(
            params![
                tenant_id.to_string(),
                hierarchy,
                as_of.to_string(),
                target.path.as_str(),
                i64::from(target.depth),
            ],
            |row| {
                let depth: i64 = row.get("rel_depth")?;
                Ok(DeepReadRelation {
                    node_id: NodeId::new(get_uuid(row, "child_node_id")?),
                    depth: depth as u32,
                })
            },
        )
        .map_err(|e| Error::operation("edge_relations", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::operation("edge_relations", e))
    }

    // ========================================================================
    // Build registries
    // ========================================================================

    /// Parses a build record from a registry row.
    fn parse_build_row(row: &Row<'_>, with_as_of: bool) -> rusqlite::Result<BuildRecord> {
        let status: String = row.get("status")?;
        let as_of_date = if with_as_of {
            Some(get_date(row, "as_of_date")?)
        } else {
            None
        };
        Ok(BuildRecord {
            tenant_id: TenantId::new(get_uuid(row, "tenant_id")?),
            hierarchy: row.get("hierarchy_type")?,
            build_id: BuildId::new(get_uuid(row, "build_id")?),
            as_of_date,
            status: BuildStatus::parse(&status).map_err(conversion_err)?,
            is_active: row.get("is_active")?,
            built_at: row.get("built_at")?,
            source_request_id: row.get("source_request_id")?,
            notes: row.get("notes")?,
        })
    }

    /// Inserts a closure-registry row in `building` state.
    pub fn insert_closure_build(&self, record: &BuildRecord) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT INTO closure_builds (
                tenant_id, hierarchy_type, build_id, status, is_active,
                built_at, source_request_id, notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.tenant_id.to_string(),
                record.hierarchy,
                record.build_id.to_string(),
                record.status.as_str(),
                record.is_active,
                record.built_at,
                record.source_request_id,
                record.notes,
            ],
        )
        .map_err(|e| Error::operation("insert_closure_build", e))?;
        Ok(())
    }

    /// Inserts a snapshot-registry row in `building` state.
    pub fn insert_snapshot_build(&self, record: &BuildRecord) -> Result<()> {
        let Some(as_of) = record.as_of_date else {
            return Err(Error::InvalidInput(
                "snapshot build requires as_of_date".to_string(),
            ));
        };
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT INTO snapshot_builds (
                tenant_id, hierarchy_type, as_of_date, build_id, status, is_active,
                built_at, source_request_id, notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.tenant_id.to_string(),
                record.hierarchy,
                as_of.to_string(),
                record.build_id.to_string(),
                record.status.as_str(),
                record.is_active,
                record.built_at,
                record.source_request_id,
                record.notes,
            ],
        )
        .map_err(|e| Error::operation("insert_snapshot_build", e))?;
        Ok(())
    }

    /// Marks a build `failed`, recording the cause.
    pub fn mark_build_failed(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        as_of_date: Option<NaiveDate>,
        build_id: BuildId,
        notes: &str,
    ) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        let changed = match as_of_date {
            None => conn.execute(
                "UPDATE closure_builds
                 SET status = 'failed', notes = ?4, is_active = 0
                 WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND build_id = ?3",
                params![
                    tenant_id.to_string(),
                    hierarchy,
                    build_id.to_string(),
                    notes
                ],
            ),
            Some(as_of) => conn.execute(
                "UPDATE snapshot_builds
                 SET status = 'failed', notes = ?5, is_active = 0
                 WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND as_of_date = ?3
                   AND build_id = ?4",
                params![
                    tenant_id.to_string(),
                    hierarchy,
                    as_of.to_string(),
                    build_id.to_string(),
                    notes
                ],
            ),
        }
        .map_err(|e| Error::operation("mark_build_failed", e))?;

        if changed != 1 {
            return Err(Error::operation(
                "mark_build_failed",
                format!("expected 1 registry row, updated {changed}"),
            ));
        }
        Ok(())
    }

    /// Activates a build inside one transaction: deactivate-all, then
    /// activate-one. Returns the previously active build, if any.
    ///
    /// When `require_ready` is set the target must already be `ready`
    /// (explicit activation); otherwise the target is promoted from
    /// `building` to `ready` as part of the swap (end of a successful
    /// build).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ActivationConflict`] if the target row was not
    /// activatable; the transaction rolls back and the previous active
    /// build keeps answering queries.
    pub fn activate_build(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        as_of_date: Option<NaiveDate>,
        build_id: BuildId,
        require_ready: bool,
    ) -> Result<Option<BuildId>> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn
            .transaction()
            .map_err(|e| Error::operation("activate_build_begin", e))?;

        let tenant = tenant_id.to_string();
        let as_of = as_of_date.map(|d| d.to_string());

        let previous: Option<BuildId> = match &as_of {
            None => tx
                .query_row(
                    "SELECT build_id FROM closure_builds
                     WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND is_active = 1
                     ORDER BY built_at DESC, rowid DESC
                     LIMIT 1",
                    params![tenant, hierarchy],
                    |row| get_uuid(row, "build_id"),
                )
                .optional(),
            Some(date) => tx
                .query_row(
                    "SELECT build_id FROM snapshot_builds
                     WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND as_of_date = ?3
                       AND is_active = 1
                     ORDER BY built_at DESC, rowid DESC
                     LIMIT 1",
                    params![tenant, hierarchy, date],
                    |row| get_uuid(row, "build_id"),
                )
                .optional(),
        }
        .map_err(|e| Error::operation("activate_build_previous", e))?
        .map(BuildId::new);

        match &as_of {
            None => tx.execute(
                "UPDATE closure_builds SET is_active = 0
                 WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND is_active = 1",
                params![tenant, hierarchy],
            ),
            Some(date) => tx.execute(
                "UPDATE snapshot_builds SET is_active = 0
                 WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND as_of_date = ?3
                   AND is_active = 1",
                params![tenant, hierarchy, date],
            ),
        }
        .map_err(|e| Error::operation("activate_build_deactivate", e))?;

        let status_guard = if require_ready { "status = 'ready'" } else { "status != 'failed'" };
        let changed = match &as_of {
            None => tx.execute(
                &format!(
                    "UPDATE closure_builds SET status = 'ready', is_active = 1
                     WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND build_id = ?3
                       AND {status_guard}"
                ),
                params![tenant, hierarchy, build_id.to_string()],
            ),
            Some(date) => tx.execute(
                &format!(
                    "UPDATE snapshot_builds SET status = 'ready', is_active = 1
                     WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND as_of_date = ?3
                       AND build_id = ?4 AND {status_guard}"
                ),
                params![tenant, hierarchy, date, build_id.to_string()],
            ),
        }
        .map_err(|e| Error::operation("activate_build_activate", e))?;

        if changed != 1 {
            // Dropping the transaction rolls back the deactivation too.
            return Err(Error::ActivationConflict {
                tenant_id,
                hierarchy: hierarchy.to_string(),
                build_id,
            });
        }

        tx.commit()
            .map_err(|e| Error::operation("activate_build_commit", e))?;
        Ok(previous)
    }

    /// Returns the active+ready closure build for a key.
    ///
    /// # Errors
    ///
    /// Returns the distinguished [`Error::BuildNotReady`] when none exists.
    pub fn active_closure_build_id(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
    ) -> Result<BuildId> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT build_id FROM closure_builds
             WHERE tenant_id = ?1 AND hierarchy_type = ?2
               AND is_active = 1 AND status = 'ready'
             ORDER BY built_at DESC, rowid DESC
             LIMIT 1",
            params![tenant_id.to_string(), hierarchy],
            |row| get_uuid(row, "build_id"),
        )
        .optional()
        .map_err(|e| Error::operation("active_closure_build_id", e))?
        .map(BuildId::new)
        .ok_or_else(|| Error::BuildNotReady {
            backend: crate::models::BackendKind::Closure,
            tenant_id,
            hierarchy: hierarchy.to_string(),
            as_of_date: None,
        })
    }

    /// Returns the active+ready snapshot build for a key and exact date.
    ///
    /// # Errors
    ///
    /// Returns the distinguished [`Error::BuildNotReady`] when none exists.
    pub fn active_snapshot_build_id(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        as_of_date: NaiveDate,
    ) -> Result<BuildId> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT build_id FROM snapshot_builds
             WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND as_of_date = ?3
               AND is_active = 1 AND status = 'ready'
             ORDER BY built_at DESC, rowid DESC
             LIMIT 1",
            params![tenant_id.to_string(), hierarchy, as_of_date.to_string()],
            |row| get_uuid(row, "build_id"),
        )
        .optional()
        .map_err(|e| Error::operation("active_snapshot_build_id", e))?
        .map(BuildId::new)
        .ok_or_else(|| Error::BuildNotReady {
            backend: crate::models::BackendKind::Snapshot,
            tenant_id,
            hierarchy: hierarchy.to_string(),
            as_of_date: Some(as_of_date),
        })
    }

    /// Lists closure-registry rows, newest first.
    pub fn list_closure_builds(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
    ) -> Result<Vec<BuildRecord>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT tenant_id, hierarchy_type, build_id, status, is_active,
                        built_at, source_request_id, notes
                 FROM closure_builds
                 WHERE tenant_id = ?1 AND hierarchy_type = ?2
                 ORDER BY built_at DESC, rowid DESC",
            )
            .map_err(|e| Error::operation("list_closure_builds_prepare", e))?;

        stmt.query_map(params![tenant_id.to_string(), hierarchy], |row| {
            Self::parse_build_row(row, false)
        })
        .map_err(|e| Error::operation("list_closure_builds", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::operation("list_closure_builds", e))
    }

    /// Lists snapshot-registry rows, newest first.
    pub fn list_snapshot_builds(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
    ) -> Result<Vec<BuildRecord>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT tenant_id, hierarchy_type, as_of_date, build_id, status, is_active,
                        built_at, source_request_id, notes
                 FROM snapshot_builds
                 WHERE tenant_id = ?1 AND hierarchy_type = ?2
                 ORDER BY built_at DESC, rowid DESC",
            )
            .map_err(|e| Error::operation("list_snapshot_builds_prepare", e))?;

        stmt.query_map(params![tenant_id.to_string(), hierarchy], |row| {
            Self::parse_build_row(row, true)
        })
        .map_err(|e| Error::operation("list_snapshot_builds", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::operation("list_snapshot_builds", e))
    }

    /// Deletes closure builds beyond the retention count, cascading their
    /// rows. The keep list is ordered (active first, then newest), so the
    /// currently active build always survives. Returns the number of builds
    /// deleted.
    ///
    /// With `apply = false` the doomed builds are only counted, nothing is
    /// deleted.
    pub fn prune_closure_builds(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        keep: usize,
        apply: bool,
    ) -> Result<u64> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn
            .transaction()
            .map_err(|e| Error::operation("prune_closure_builds_begin", e))?;

        let tenant = tenant_id.to_string();
        let doomed: Vec<String> = {
            let mut stmt = tx
                .prepare(
                    "SELECT build_id FROM closure_builds
                     WHERE tenant_id = ?1 AND hierarchy_type = ?2
                     ORDER BY is_active DESC, built_at DESC, rowid DESC
                     LIMIT -1 OFFSET ?3",
                )
                .map_err(|e| Error::operation("prune_closure_builds_prepare", e))?;
            stmt.query_map(params![tenant, hierarchy, keep as i64], |row| {
                row.get::<_, String>("build_id")
            })
            .map_err(|e| Error::operation("prune_closure_builds_select", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::operation("prune_closure_builds_select", e))?
        };

        if !apply {
            return Ok(doomed.len() as u64);
        }

        for build in &doomed {
            tx.execute(
                "DELETE FROM closure_rows
                 WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND build_id = ?3",
                params![tenant, hierarchy, build],
            )
            .map_err(|e| Error::operation("prune_closure_builds_rows", e))?;
            tx.execute(
                "DELETE FROM closure_builds
                 WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND build_id = ?3",
                params![tenant, hierarchy, build],
            )
            .map_err(|e| Error::operation("prune_closure_builds_delete", e))?;
        }

        tx.commit()
            .map_err(|e| Error::operation("prune_closure_builds_commit", e))?;
        Ok(doomed.len() as u64)
    }

    // ========================================================================
    // Closure and snapshot rows
    // ========================================================================

    /// Bulk-inserts closure rows for one build inside a single transaction.
    #[instrument(skip(self, rows), fields(tenant_id = %tenant_id, build_id = %build_id, rows = rows.len()))]
    pub fn insert_closure_rows(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        build_id: BuildId,
        rows: &[ClosureRow],
    ) -> Result<u64> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn
            .transaction()
            .map_err(|e| Error::operation("insert_closure_rows_begin", e))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO closure_rows (
                        tenant_id, hierarchy_type, build_id,
                        ancestor_node_id, descendant_node_id, depth,
                        effective_date, end_date
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .map_err(|e| Error::operation("insert_closure_rows_prepare", e))?;
            for row in rows {
                stmt.execute(params![
                    tenant_id.to_string(),
                    hierarchy,
                    build_id.to_string(),
                    row.ancestor_node_id.to_string(),
                    row.descendant_node_id.to_string(),
                    row.depth,
                    row.period.effective_date.to_string(),
                    row.period.end_date.to_string(),
                ])
                .map_err(|e| Error::operation("insert_closure_rows", e))?;
            }
        }
        tx.commit()
            .map_err(|e| Error::operation("insert_closure_rows_commit", e))?;
        Ok(rows.len() as u64)
    }

    /// Bulk-inserts snapshot rows for one build inside a single transaction.
    #[instrument(skip(self, rows), fields(tenant_id = %tenant_id, build_id = %build_id, rows = rows.len()))]
    pub fn insert_snapshot_rows(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        as_of_date: NaiveDate,
        build_id: BuildId,
        rows: &[SnapshotRow],
    ) -> Result<u64> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn
            .transaction()
            .map_err(|e| Error::operation("insert_snapshot_rows_begin", e))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO snapshot_rows (
                        tenant_id, hierarchy_type, as_of_date, build_id,
                        ancestor_node_id, descendant_node_id, depth
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .map_err(|e| Error::operation("insert_snapshot_rows_prepare", e))?;
            for row in rows {
                stmt.execute(params![
                    tenant_id.to_string(),
                    hierarchy,
                    as_of_date.to_string(),
                    build_id.to_string(),
                    row.ancestor_node_id.to_string(),
                    row.descendant_node_id.to_string(),
                    row.depth,
                ])
                .map_err(|e| Error::operation("insert_snapshot_rows", e))?;
            }
        }
        tx.commit()
            .map_err(|e| Error::operation("insert_snapshot_rows_commit", e))?;
        Ok(rows.len() as u64)
    }

    /// Lists relations from a closure build, filtered by valid-time
    /// coverage of `as_of`, ordered by (depth asc, node id asc).
    pub fn closure_relations(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        build_id: BuildId,
        node_id: NodeId,
        as_of: NaiveDate,
        direction: RelationDirection,
    ) -> Result<Vec<DeepReadRelation>> {
        let (select_col, match_col) = match direction {
            RelationDirection::Ancestors => ("ancestor_node_id", "descendant_node_id"),
            RelationDirection::Descendants => ("descendant_node_id", "ancestor_node_id"),
        };
        let sql = format!(
            "SELECT {select_col} AS node_id, depth
             FROM closure_rows
             WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND build_id = ?3
               AND {match_col} = ?4
               AND effective_date <= ?5 AND end_date > ?5
             ORDER BY depth ASC, {select_col} ASC"
        );

        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::operation("closure_relations_prepare", e))?;

        stmt.query_map(
            params![
                tenant_id.to_string(),
                hierarchy,
                build_id.to_string(),
                node_id.to_string(),
                as_of.to_string(),
            ],
            |row| {
                let depth: i64 = row.get("depth")?;
                Ok(DeepReadRelation {
                    node_id: NodeId::new(get_uuid(row, "node_id")?),
                    depth: depth as u32,
                })
            },
        )
        .map_err(|e| Error::operation("closure_relations", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::operation("closure_relations", e))
    }

    /// Lists relations from a snapshot build, ordered by (depth asc, node id
    /// asc). No valid-time filter: rows are date-pinned.
    pub fn snapshot_relations(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        as_of_date: NaiveDate,
        build_id: BuildId,
        node_id: NodeId,
        direction: RelationDirection,
    ) -> Result<Vec<DeepReadRelation>> {
        let (select_col, match_col) = match direction {
            RelationDirection::Ancestors => ("ancestor_node_id", "descendant_node_id"),
            RelationDirection::Descendants => ("descendant_node_id", "ancestor_node_id"),
        };
        let sql = format!(
            "SELECT {select_col} AS node_id, depth
             FROM snapshot_rows
             WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND as_of_date = ?3
               AND build_id = ?4 AND {match_col} = ?5
             ORDER BY depth ASC, {select_col} ASC"
        );

        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::operation("snapshot_relations_prepare", e))?;

        stmt.query_map(
            params![
                tenant_id.to_string(),
                hierarchy,
                as_of_date.to_string(),
                build_id.to_string(),
                node_id.to_string(),
            ],
            |row| {
                let depth: i64 = row.get("depth")?;
                Ok(DeepReadRelation {
                    node_id: NodeId::new(get_uuid(row, "node_id")?),
                    depth: depth as u32,
                })
            },
        )
        .map_err(|e| Error::operation("snapshot_relations", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::operation("snapshot_relations", e))
    }

    /// Checks whether a closure build records a depth-1 descendant for the
    /// node, valid at `as_of`.
    pub fn closure_has_child_at(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        build_id: BuildId,
        node_id: NodeId,
        as_of: NaiveDate,
    ) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT 1 FROM closure_rows
             WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND build_id = ?3
               AND ancestor_node_id = ?4 AND depth = 1
               AND effective_date <= ?5 AND end_date > ?5
             LIMIT 1",
            params![
                tenant_id.to_string(),
                hierarchy,
                build_id.to_string(),
                node_id.to_string(),
                as_of.to_string(),
            ],
            |_| Ok(()),
        )
        .optional()
        .map(|r| r.is_some())
        .map_err(|e| Error::operation("closure_has_child_at", e))
    }

    /// Checks whether a snapshot build records a depth-1 descendant for the node.
    pub fn snapshot_has_child(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        as_of_date: NaiveDate,
        build_id: BuildId,
        node_id: NodeId,
    ) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT 1 FROM snapshot_rows
             WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND as_of_date = ?3
               AND build_id = ?4 AND ancestor_node_id = ?5 AND depth = 1
             LIMIT 1",
            params![
                tenant_id.to_string(),
                hierarchy,
                as_of_date.to_string(),
                build_id.to_string(),
                node_id.to_string(),
            ],
            |_| Ok(()),
        )
        .optional()
        .map(|r| r.is_some())
        .map_err(|e| Error::operation("snapshot_has_child", e))
    }

    /// Returns every row of one snapshot build.
    pub fn snapshot_rows_for_build(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        as_of_date: NaiveDate,
        build_id: BuildId,
    ) -> Result<Vec<SnapshotRow>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT ancestor_node_id, descendant_node_id, depth
                 FROM snapshot_rows
                 WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND as_of_date = ?3
                   AND build_id = ?4
                 ORDER BY descendant_node_id ASC, depth ASC",
            )
            .map_err(|e| Error::operation("snapshot_rows_for_build_prepare", e))?;

        stmt.query_map(
            params![
                tenant_id.to_string(),
                hierarchy,
                as_of_date.to_string(),
                build_id.to_string(),
            ],
            |row| {
                let depth: i64 = row.get("depth")?;
                Ok(SnapshotRow {
                    ancestor_node_id: NodeId::new(get_uuid(row, "ancestor_node_id")?),
                    descendant_node_id: NodeId::new(get_uuid(row, "descendant_node_id")?),
                    depth: depth as u32,
                })
            },
        )
        .map_err(|e| Error::operation("snapshot_rows_for_build", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::operation("snapshot_rows_for_build", e))
    }

    /// Counts the distinct reachable nodes in one snapshot build.
    pub fn snapshot_node_count(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        as_of_date: NaiveDate,
        build_id: BuildId,
    ) -> Result<u64> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT COUNT(DISTINCT descendant_node_id) FROM snapshot_rows
             WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND as_of_date = ?3
               AND build_id = ?4",
            params![
                tenant_id.to_string(),
                hierarchy,
                as_of_date.to_string(),
                build_id.to_string(),
            ],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u64)
        .map_err(|e| Error::operation("snapshot_node_count", e))
    }

    // ========================================================================
    // Security-group mappings and links
    // ========================================================================

    /// Inserts a security-group mapping row.
    pub fn insert_security_group_mapping(
        &self,
        tenant_id: TenantId,
        mapping: &SecurityGroupMapping,
    ) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT INTO security_group_mappings (
                id, tenant_id, org_node_id, security_group_key, applies_to_subtree,
                effective_date, end_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                mapping.id.to_string(),
                tenant_id.to_string(),
                mapping.org_node_id.to_string(),
                mapping.security_group_key,
                mapping.applies_to_subtree,
                mapping.period.effective_date.to_string(),
                mapping.period.end_date.to_string(),
            ],
        )
        .map_err(|e| Error::operation("insert_security_group_mapping", e))?;
        Ok(())
    }

    /// Returns the mappings attached to any of the given nodes, live at `as_of`.
    pub fn mappings_for_nodes_at(
        &self,
        tenant_id: TenantId,
        node_ids: &[NodeId],
        as_of: NaiveDate,
    ) -> Result<Vec<SecurityGroupMapping>> {
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = acquire_lock(&self.conn);

        let placeholders: Vec<String> = (3..3 + node_ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT id, org_node_id, security_group_key, applies_to_subtree,
                    effective_date, end_date
             FROM security_group_mappings
             WHERE tenant_id = ?1
               AND effective_date <= ?2 AND end_date > ?2
               AND org_node_id IN ({})
             ORDER BY effective_date DESC, id DESC",
            placeholders.join(", ")
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::operation("mappings_for_nodes_at_prepare", e))?;

        let tenant = tenant_id.to_string();
        let date = as_of.to_string();
        let ids: Vec<String> = node_ids.iter().map(ToString::to_string).collect();
        let mut args: Vec<&dyn rusqlite::ToSql> = vec![&tenant, &date];
        for id in &ids {
            args.push(id);
        }

        stmt.query_map(args.as_slice(), |row| {
            Ok(SecurityGroupMapping {
                id: get_uuid(row, "id")?,
                org_node_id: NodeId::new(get_uuid(row, "org_node_id")?),
                security_group_key: row.get("security_group_key")?,
                applies_to_subtree: row.get("applies_to_subtree")?,
                period: get_period(row)?,
            })
        })
        .map_err(|e| Error::operation("mappings_for_nodes_at", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::operation("mappings_for_nodes_at", e))
    }

    /// Inserts a linked-object row.
    pub fn insert_org_link(&self, tenant_id: TenantId, link: &OrgLink) -> Result<()> {
        let metadata = serde_json::to_string(&link.metadata)
            .map_err(|e| Error::operation("insert_org_link_metadata", e))?;
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT INTO org_links (
                id, tenant_id, org_node_id, object_type, object_key, link_type,
                metadata, effective_date, end_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                link.id.to_string(),
                tenant_id.to_string(),
                link.org_node_id.to_string(),
                link.object_type,
                link.object_key,
                link.link_type,
                metadata,
                link.period.effective_date.to_string(),
                link.period.end_date.to_string(),
            ],
        )
        .map_err(|e| Error::operation("insert_org_link", e))?;
        Ok(())
    }

    /// Parses a link from a database row.
    fn parse_link_row(row: &Row<'_>) -> rusqlite::Result<OrgLink> {
        let metadata: String = row.get("metadata")?;
        Ok(OrgLink {
            id: get_uuid(row, "id")?,
            org_node_id: NodeId::new(get_uuid(row, "org_node_id")?),
            object_type: row.get("object_type")?,
            object_key: row.get("object_key")?,
            link_type: row.get("link_type")?,
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
            period: get_period(row)?,
        })
    }

    /// Returns a node's live links at `as_of`, ordered for stable output.
    pub fn links_for_node_at(
        &self,
        tenant_id: TenantId,
        node_id: NodeId,
        as_of: NaiveDate,
        limit: usize,
    ) -> Result<Vec<OrgLink>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT id, org_node_id, object_type, object_key, link_type, metadata,
                        effective_date, end_date
                 FROM org_links
                 WHERE tenant_id = ?1 AND org_node_id = ?2
                   AND effective_date <= ?3 AND end_date > ?3
                 ORDER BY object_type ASC, object_key ASC, link_type ASC, id ASC
                 LIMIT ?4",
            )
            .map_err(|e| Error::operation("links_for_node_at_prepare", e))?;

        stmt.query_map(
            params![
                tenant_id.to_string(),
                node_id.to_string(),
                as_of.to_string(),
                limit.max(1) as i64,
            ],
            Self::parse_link_row,
        )
        .map_err(|e| Error::operation("links_for_node_at", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::operation("links_for_node_at", e))
    }

    /// Returns every live link for a tenant at `as_of`, ordered for stable
    /// per-node aggregation.
    pub fn links_at(&self, tenant_id: TenantId, as_of: NaiveDate) -> Result<Vec<OrgLink>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT id, org_node_id, object_type, object_key, link_type, metadata,
                        effective_date, end_date
                 FROM org_links
                 WHERE tenant_id = ?1
                   AND effective_date <= ?2 AND end_date > ?2
                 ORDER BY org_node_id ASC, object_type ASC, object_key ASC, link_type ASC, id ASC",
            )
            .map_err(|e| Error::operation("links_at_prepare", e))?;

        stmt.query_map(
            params![tenant_id.to_string(), as_of.to_string()],
            Self::parse_link_row,
        )
        .map_err(|e| Error::operation("links_at", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::operation("links_at", e))
    }

    // ========================================================================
    // Reporting nodes
    // ========================================================================

    /// Replaces the reporting rows for a (tenant, hierarchy, as-of date) key
    /// with the given set, inside one transaction. Full overwrite: safe to
    /// re-run, idempotent for a fixed row set.
    #[instrument(skip(self, rows), fields(tenant_id = %tenant_id, rows = rows.len()))]
    pub fn replace_reporting_rows(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        as_of_date: NaiveDate,
        build_id: BuildId,
        rows: &[ReportingNode],
    ) -> Result<u64> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn
            .transaction()
            .map_err(|e| Error::operation("replace_reporting_rows_begin", e))?;

        tx.execute(
            "DELETE FROM reporting_nodes
             WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND as_of_date = ?3",
            params![tenant_id.to_string(), hierarchy, as_of_date.to_string()],
        )
        .map_err(|e| Error::operation("replace_reporting_rows_delete", e))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO reporting_nodes (
                        tenant_id, hierarchy_type, as_of_date, build_id, org_node_id,
                        code, name, status, parent_node_id, depth,
                        path_node_ids, path_codes, path_names, security_group_keys, links
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                )
                .map_err(|e| Error::operation("replace_reporting_rows_prepare", e))?;
            for row in rows {
                let path_node_ids = serde_json::to_string(&row.path_node_ids)
                    .map_err(|e| Error::operation("replace_reporting_rows_encode", e))?;
                let path_codes = serde_json::to_string(&row.path_codes)
                    .map_err(|e| Error::operation("replace_reporting_rows_encode", e))?;
                let path_names = serde_json::to_string(&row.path_names)
                    .map_err(|e| Error::operation("replace_reporting_rows_encode", e))?;
                let security_group_keys = serde_json::to_string(&row.security_group_keys)
                    .map_err(|e| Error::operation("replace_reporting_rows_encode", e))?;
                let links = serde_json::to_string(&row.links)
                    .map_err(|e| Error::operation("replace_reporting_rows_encode", e))?;

                stmt.execute(params![
                    tenant_id.to_string(),
                    hierarchy,
                    as_of_date.to_string(),
                    build_id.to_string(),
                    row.org_node_id.to_string(),
                    row.code,
                    row.name,
                    row.status,
                    row.parent_node_id.map(|n| n.to_string()),
                    row.depth,
                    path_node_ids,
                    path_codes,
                    path_names,
                    security_group_keys,
                    links,
                ])
                .map_err(|e| Error::operation("replace_reporting_rows", e))?;
            }
        }

        tx.commit()
            .map_err(|e| Error::operation("replace_reporting_rows_commit", e))?;
        Ok(rows.len() as u64)
    }

    /// Returns the materialized reporting rows for a key, shallowest first.
    pub fn reporting_nodes(
        &self,
        tenant_id: TenantId,
        hierarchy: &str,
        as_of_date: NaiveDate,
    ) -> Result<Vec<ReportingNode>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT org_node_id, code, name, status, parent_node_id, depth,
                        path_node_ids, path_codes, path_names, security_group_keys, links
                 FROM reporting_nodes
                 WHERE tenant_id = ?1 AND hierarchy_type = ?2 AND as_of_date = ?3
                 ORDER BY depth ASC, code ASC",
            )
            .map_err(|e| Error::operation("reporting_nodes_prepare", e))?;

        stmt.query_map(
            params![tenant_id.to_string(), hierarchy, as_of_date.to_string()],
            |row| {
                let parent: Option<String> = row.get("parent_node_id")?;
                let parent_node_id = parent
                    .map(|s| Uuid::parse_str(&s).map(NodeId::new).map_err(conversion_err))
                    .transpose()?;
                let depth: i64 = row.get("depth")?;
                let path_node_ids: String = row.get("path_node_ids")?;
                let path_codes: String = row.get("path_codes")?;
                let path_names: String = row.get("path_names")?;
                let security_group_keys: String = row.get("security_group_keys")?;
                let links: String = row.get("links")?;
                Ok(ReportingNode {
                    org_node_id: NodeId::new(get_uuid(row, "org_node_id")?),
                    code: row.get("code")?,
                    name: row.get("name")?,
                    status: row.get("status")?,
                    parent_node_id,
                    depth: depth as u32,
                    path_node_ids: serde_json::from_str(&path_node_ids)
                        .map_err(conversion_err)?,
                    path_codes: serde_json::from_str(&path_codes).map_err(conversion_err)?,
                    path_names: serde_json::from_str(&path_names).map_err(conversion_err)?,
                    security_group_keys: serde_json::from_str(&security_group_keys)
                        .map_err(conversion_err)?,
                    links: serde_json::from_str::<Vec<LinkSummary>>(&links)
                        .map_err(conversion_err)?,
                })
            },
        )
        .map_err(|e| Error::operation("reporting_nodes", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::operation("reporting_nodes", e))
    }
}
