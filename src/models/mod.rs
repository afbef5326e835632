//! Domain models for the deep-read engine.

mod build;
mod edge;
mod reporting;
mod resolve;
pub mod temporal;

pub use build::{
    BackendKind, BuildRecord, BuildResult, BuildStatus, ClosureRow, DeepReadRelation, PruneResult,
    RelationDirection, SnapshotRow,
};
pub use edge::{Edge, NodePath};
pub use reporting::{LinkSummary, ReportingBuildResult, ReportingNode};
pub use resolve::{
    AttributeName, AttributeSources, InheritanceRule, NodeAttributes, NodeRecord, NodeSlice,
    OrgLink, PermissionPreview, ResolvedAttributes, ResolvedSecurityGroup, SecurityGroupMapping,
};
pub use temporal::ValidPeriod;

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Wraps an existing uuid.
            #[must_use]
            pub const fn new(id: Uuid) -> Self {
                Self(id)
            }

            /// Generates a new random id.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parses an id from its string form.
            ///
            /// # Errors
            ///
            /// Returns [`Error::InvalidInput`] if the string is not a uuid.
            pub fn parse(s: &str) -> Result<Self> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| Error::InvalidInput(format!("invalid uuid '{s}': {e}")))
            }

            /// Returns the underlying uuid.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id! {
    /// Identifies a tenant. Every table in the engine is tenant-scoped.
    TenantId
}

uuid_id! {
    /// Identifies a node in a hierarchy.
    NodeId
}

uuid_id! {
    /// Identifies one immutable closure or snapshot build.
    BuildId
}
