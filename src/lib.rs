//! # Orgdeep
//!
//! Bitemporal organizational-hierarchy deep-read engine.
//!
//! Orgdeep turns a bitemporal parent/child edge table into efficiently
//! queryable ancestor/descendant relations under three interchangeable
//! backends, with a build/activate/prune lifecycle that never leaves readers
//! without a consistent answer.
//!
//! ## Features
//!
//! - Single-binary distribution backed by embedded `SQLite`
//! - Three deep-read backends (live edge traversal, temporal closure, date
//!   snapshot) behind one facade
//! - Iterative transitive-closure builds with valid-time interval
//!   intersection and a hard depth cap
//! - Atomic build activation with rollback via `previous_build_id`
//! - Nearest-ancestor-wins attribute and security-group resolution
//! - Flat reporting-node materialization from a snapshot build
//!
//! ## Example
//!
//! ```rust,ignore
//! use orgdeep::{BackendKind, Engine, OrgdeepConfig};
//!
//! let engine = Engine::open(&OrgdeepConfig::default())?;
//! let result = engine.builds.build_closure(tenant, "OrgUnit", true, Some("req-1"))?;
//! let subtree = engine.deep_read.list_descendants_as_of(
//!     tenant, "OrgUnit", node, Some(as_of), Some(BackendKind::Closure))?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod cli;
pub mod closure;
pub mod config;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::OrgdeepConfig;
pub use models::{
    BackendKind, BuildId, BuildRecord, BuildResult, BuildStatus, DeepReadRelation, Edge, NodeId,
    NodePath, PruneResult, TenantId, ValidPeriod,
};
pub use services::{
    BuildService, DeepReadService, Engine, RegistryService, ReportingService, ResolutionService,
};
pub use storage::{DeepReadBackend, HierarchyStore, KeyedMutex};

/// Error type for orgdeep operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Missing required parameters, malformed ids/dates, invalid backend names |
/// | `OperationFailed` | `SQLite` operations fail, closure computation aborts, I/O errors |
/// | `BuildNotReady` | No active+ready build exists for the requested key (callers may fall back or trigger a build) |
/// | `ActivationConflict` | Activation target is not `ready`, or a concurrent activation changed the active build |
/// | `NodeNotFound` | The query node has no edge row covering the requested date |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - Required parameters are missing (e.g., nil tenant id)
    /// - A uuid or date string fails to parse
    /// - An unknown backend name is requested
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` statements fail to prepare or execute
    /// - A transaction cannot commit
    /// - Bulk row insertion aborts mid-build
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// No active+ready build exists for the requested key.
    ///
    /// This is the distinguished *not-ready* error kind: callers can match on
    /// it to fall back to the `edges` backend or trigger a build, rather than
    /// treating it as a storage failure.
    #[error(
        "no active ready {backend} build: tenant_id={tenant_id} hierarchy={hierarchy} as_of_date={as_of_date:?}"
    )]
    BuildNotReady {
        /// Backend whose build registry was consulted.
        backend: models::BackendKind,
        /// Tenant the lookup was scoped to.
        tenant_id: models::TenantId,
        /// Hierarchy type the lookup was scoped to.
        hierarchy: String,
        /// Snapshot as-of date, when the snapshot registry was consulted.
        as_of_date: Option<chrono::NaiveDate>,
    },

    /// Activation failed because the target build is not activatable.
    ///
    /// Raised when the target build does not exist, is not `status=ready`, or
    /// a concurrent writer already swapped the active build. Surfaced to the
    /// caller, never retried internally.
    #[error(
        "activation conflict: build not found or not ready (tenant_id={tenant_id} hierarchy={hierarchy} build_id={build_id})"
    )]
    ActivationConflict {
        /// Tenant the activation was scoped to.
        tenant_id: models::TenantId,
        /// Hierarchy type the activation was scoped to.
        hierarchy: String,
        /// The build that could not be activated.
        build_id: models::BuildId,
    },

    /// The query node has no edge row covering the requested date.
    #[error("node {node_id} not found at {as_of}")]
    NodeNotFound {
        /// The node that was looked up.
        node_id: models::NodeId,
        /// The valid-time date of the lookup.
        as_of: chrono::NaiveDate,
    },
}

impl Error {
    /// Returns `true` for the distinguished *build-not-ready* error kind.
    #[must_use]
    pub const fn is_build_not_ready(&self) -> bool {
        matches!(self, Self::BuildNotReady { .. })
    }

    /// Returns `true` for activation conflicts.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ActivationConflict { .. })
    }

    /// Wraps a storage-level failure with the operation that produced it.
    pub fn operation(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for orgdeep operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("tenant_id is required".to_string());
        assert_eq!(err.to_string(), "invalid input: tenant_id is required");

        let err = Error::operation("insert_edge", "disk full");
        assert_eq!(err.to_string(), "operation 'insert_edge' failed: disk full");
    }

    #[test]
    fn test_error_kind_helpers() {
        let err = Error::BuildNotReady {
            backend: models::BackendKind::Closure,
            tenant_id: models::TenantId::generate(),
            hierarchy: "OrgUnit".to_string(),
            as_of_date: None,
        };
        assert!(err.is_build_not_ready());
        assert!(!err.is_conflict());
    }
}
