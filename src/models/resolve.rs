//! Node catalog, security-group mappings, links and resolution shapes.

use super::temporal::ValidPeriod;
use super::{NodeId, TenantId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A catalog entry for one node: its stable code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// The node.
    pub node_id: NodeId,
    /// Stable business code, e.g. `FIN-EU`.
    pub code: String,
}

/// Inheritable node attributes carried on a slice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttributes {
    /// Owning legal entity.
    pub legal_entity_id: Option<Uuid>,
    /// Accounting company code.
    pub company_code: Option<String>,
    /// Physical location.
    pub location_id: Option<Uuid>,
    /// Responsible manager.
    pub manager_user_id: Option<i64>,
}

/// One temporal slice of a node's descriptive data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSlice {
    /// The node the slice describes.
    pub node_id: NodeId,
    /// Display name during the slice's window.
    pub name: String,
    /// Lifecycle status, e.g. `active`.
    pub status: String,
    /// Explicitly set attributes (unset values may be inherited).
    pub attributes: NodeAttributes,
    /// Valid-time window of the slice.
    pub period: ValidPeriod,
}

/// Attribute names participating in inheritance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeName {
    /// `legal_entity_id`
    LegalEntityId,
    /// `company_code`
    CompanyCode,
    /// `location_id`
    LocationId,
    /// `manager_user_id`
    ManagerUserId,
}

impl AttributeName {
    /// Returns the canonical snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LegalEntityId => "legal_entity_id",
            Self::CompanyCode => "company_code",
            Self::LocationId => "location_id",
            Self::ManagerUserId => "manager_user_id",
        }
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one attribute inherits down the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InheritanceRule {
    /// The attribute the rule governs.
    pub attribute: AttributeName,
    /// When `true`, a node's own value shadows ancestors; when `false`,
    /// resolution starts at the immediate parent.
    pub can_override: bool,
}

impl InheritanceRule {
    /// The default rule set: every whitelisted attribute, overridable.
    #[must_use]
    pub const fn defaults() -> [Self; 4] {
        [
            Self {
                attribute: AttributeName::LegalEntityId,
                can_override: true,
            },
            Self {
                attribute: AttributeName::CompanyCode,
                can_override: true,
            },
            Self {
                attribute: AttributeName::LocationId,
                can_override: true,
            },
            Self {
                attribute: AttributeName::ManagerUserId,
                can_override: true,
            },
        ]
    }
}

/// Which ancestor supplied each resolved attribute value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttributeSources {
    /// Source of `legal_entity_id`.
    pub legal_entity_id: Option<NodeId>,
    /// Source of `company_code`.
    pub company_code: Option<NodeId>,
    /// Source of `location_id`.
    pub location_id: Option<NodeId>,
    /// Source of `manager_user_id`.
    pub manager_user_id: Option<NodeId>,
}

/// Resolved attributes for one node with their winning sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedAttributes {
    /// The winning values.
    pub values: NodeAttributes,
    /// The ancestor that supplied each value.
    pub sources: AttributeSources,
}

/// One security-group mapping row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupMapping {
    /// Row id.
    pub id: Uuid,
    /// Node the mapping is attached to.
    pub org_node_id: NodeId,
    /// The security-group key granted.
    pub security_group_key: String,
    /// Whether the mapping also applies to every descendant.
    pub applies_to_subtree: bool,
    /// Valid-time window of the mapping.
    pub period: ValidPeriod,
}

/// One resolved security group: the winning mapping for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSecurityGroup {
    /// The security-group key.
    pub security_group_key: String,
    /// Whether the winning mapping applies to the subtree.
    pub applies_to_subtree: bool,
    /// Ancestor that carried the winning mapping.
    pub source_node_id: NodeId,
    /// Depth of that ancestor from the query node.
    pub source_depth: u32,
}

/// One linked-object row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgLink {
    /// Row id.
    pub id: Uuid,
    /// Node the link is attached to.
    pub org_node_id: NodeId,
    /// Linked object type, e.g. `cost_center`.
    pub object_type: String,
    /// Linked object key.
    pub object_key: String,
    /// Relation type, e.g. `owns`.
    pub link_type: String,
    /// Free-form metadata.
    pub metadata: serde_json::Value,
    /// Valid-time window of the link.
    pub period: ValidPeriod,
}

/// Read-only resolution preview for one node: its effective security groups
/// and live links at a date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermissionPreview {
    /// Tenant the preview was scoped to.
    pub tenant_id: TenantId,
    /// The previewed node.
    pub org_node_id: NodeId,
    /// The valid-time date of the preview.
    pub as_of: NaiveDate,
    /// Resolved security groups, ordered by (winning depth, key).
    pub security_groups: Vec<ResolvedSecurityGroup>,
    /// Live links on the node, ordered by (object type, object key, link type).
    pub links: Vec<OrgLink>,
    /// Soft warnings, e.g. `links_truncated`.
    pub warnings: Vec<String>,
}
