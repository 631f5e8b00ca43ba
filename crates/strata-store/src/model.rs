//! Typed document models and the traits that bind them to the store.
//!
//! [`DocumentModel`] is the seam between typed entities and the raw envelope:
//! it supplies the kind tag, the document ID, and the partition-key
//! derivation. The derivation must be a pure function of the entity's own
//! fields — the store calls it on both read and write paths and an
//! inconsistency silently produces "not found".
//!
//! [`SingletonDefault`] marks kinds that carry the one-default-per-partition
//! invariant; such documents must only be written through
//! [`DefaultSingletonGuard`](crate::default_guard::DefaultSingletonGuard).
//! Likewise, membership holders ([`Grants`]) must only be mutated through
//! [`OptimisticMutator`](crate::mutator::OptimisticMutator) — a direct
//! overwrite of the whole document can discard concurrent membership changes.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use strata_core::{BlueprintId, DocumentKind, PartitionKey, ProjectId, TenantId, UserId};

use crate::error::Result;

/// A typed entity that can be persisted as a document.
pub trait DocumentModel:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// The entity kind, which fixes the partition strategy.
    const KIND: DocumentKind;

    /// The document ID, unique within the partition.
    fn document_id(&self) -> String;

    /// Derives the partition key from the entity's own fields.
    fn partition_key(&self) -> PartitionKey;
}

/// An entity kind for which exactly one document per partition is flagged
/// as the default among its siblings.
pub trait SingletonDefault: DocumentModel {
    /// Persisted field name of the default flag, used in queries.
    const DEFAULT_FLAG: &'static str = "isDefault";

    /// Whether this document is flagged as its partition's default.
    fn is_default(&self) -> bool;

    /// Sets or clears the default flag.
    fn set_default(&mut self, is_default: bool);
}

/// Business-rule validation invoked before every create and upsert.
///
/// Owned by the validation subsystem; the store merely calls through. A
/// failed validation surfaces before any write is attempted.
pub trait DocumentValidator<D>: Send + Sync {
    /// Validates a document, returning a [`Validation`](crate::error::Error::Validation)
    /// error when it fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the document violates a schema or business rule.
    fn validate(&self, doc: &D) -> Result<()>;
}

/// A validator that accepts every document.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoValidation;

impl<D> DocumentValidator<D> for NoValidation {
    fn validate(&self, _doc: &D) -> Result<()> {
        Ok(())
    }
}

/// Tenant-wide project registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Unique project ID.
    pub id: ProjectId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Human-readable name.
    pub name: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl DocumentModel for Project {
    const KIND: DocumentKind = DocumentKind::Project;

    fn document_id(&self) -> String {
        self.id.to_string()
    }

    fn partition_key(&self) -> PartitionKey {
        PartitionKey::tenant(&self.tenant_id)
    }
}

/// Project-scoped template. Each project designates exactly one blueprint
/// as its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blueprint {
    /// Unique blueprint ID.
    pub id: BlueprintId,
    /// Owning project; determines the partition.
    pub project_id: ProjectId,
    /// Human-readable name.
    pub name: String,
    /// Whether this blueprint is the project's default.
    pub is_default: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl DocumentModel for Blueprint {
    const KIND: DocumentKind = DocumentKind::Blueprint;

    fn document_id(&self) -> String {
        self.id.to_string()
    }

    fn partition_key(&self) -> PartitionKey {
        PartitionKey::project(&self.project_id)
    }
}

impl SingletonDefault for Blueprint {
    fn is_default(&self) -> bool {
        self.is_default
    }

    fn set_default(&mut self, is_default: bool) {
        self.is_default = is_default;
    }
}

/// A user's role within a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    /// Full control of the project.
    Owner,
    /// Can create and modify project resources.
    Contributor,
    /// Read-only access.
    Reader,
}

/// A single membership record inside a grants document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    /// The project this membership refers to.
    pub project_id: ProjectId,
    /// The user's role in the project.
    pub role: Role,
    /// When the membership was granted.
    pub granted_at: DateTime<Utc>,
}

/// Per-user membership holder.
///
/// Owns the embedded, unordered collection of project memberships, keyed by
/// project ID — the map keying structurally enforces "at most one membership
/// per project per user". Mutated exclusively through the optimistic mutator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grants {
    /// The user this document belongs to; doubles as the document ID.
    pub user_id: UserId,
    /// Owning tenant; determines the partition.
    pub tenant_id: TenantId,
    /// Memberships keyed by the canonical string form of the project ID.
    pub memberships: BTreeMap<String, Membership>,
}

impl Grants {
    /// Creates an empty grants document for a user.
    #[must_use]
    pub fn new(user_id: UserId, tenant_id: TenantId) -> Self {
        Self {
            user_id,
            tenant_id,
            memberships: BTreeMap::new(),
        }
    }

    /// Adds or replaces a membership, keyed by its project ID.
    ///
    /// Returns true if the membership was newly added, false if an existing
    /// record for the same project was replaced.
    pub fn grant(&mut self, membership: Membership) -> bool {
        self.memberships
            .insert(membership.project_id.to_string(), membership)
            .is_none()
    }

    /// Removes the membership for a project, returning it if present.
    pub fn revoke(&mut self, project_id: &ProjectId) -> Option<Membership> {
        self.memberships.remove(&project_id.to_string())
    }

    /// Looks up the membership for a project.
    #[must_use]
    pub fn membership(&self, project_id: &ProjectId) -> Option<&Membership> {
        self.memberships.get(&project_id.to_string())
    }

    /// Returns the number of memberships.
    #[must_use]
    pub fn len(&self) -> usize {
        self.memberships.len()
    }

    /// Returns true if the user holds no memberships.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.memberships.is_empty()
    }
}

impl DocumentModel for Grants {
    const KIND: DocumentKind = DocumentKind::Grants;

    fn document_id(&self) -> String {
        self.user_id.to_string()
    }

    fn partition_key(&self) -> PartitionKey {
        PartitionKey::tenant(&self.tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn membership(project_id: ProjectId, role: Role) -> Membership {
        Membership {
            project_id,
            role,
            granted_at: Utc::now(),
        }
    }

    #[test]
    fn grants_hold_one_membership_per_project() {
        let mut grants = Grants::new(UserId::generate(), TenantId::new_unchecked("acme"));
        let project = ProjectId::generate();

        assert!(grants.grant(membership(project, Role::Reader)));
        // Re-granting the same project replaces, never duplicates.
        assert!(!grants.grant(membership(project, Role::Owner)));
        assert_eq!(grants.len(), 1);
        assert_eq!(grants.membership(&project).unwrap().role, Role::Owner);

        assert!(grants.revoke(&project).is_some());
        assert!(grants.revoke(&project).is_none());
        assert!(grants.is_empty());
    }

    #[test]
    fn partition_derivation_is_stable() {
        let blueprint = Blueprint {
            id: BlueprintId::generate(),
            project_id: ProjectId::generate(),
            name: "web-service".into(),
            is_default: false,
            created_at: Utc::now(),
        };
        assert_eq!(blueprint.partition_key(), blueprint.partition_key());
        assert_eq!(
            blueprint.partition_key(),
            PartitionKey::project(&blueprint.project_id)
        );
    }

    #[test]
    fn default_flag_field_matches_wire_form() {
        let blueprint = Blueprint {
            id: BlueprintId::generate(),
            project_id: ProjectId::generate(),
            name: "web-service".into(),
            is_default: true,
            created_at: Utc::now(),
        };
        let body = serde_json::to_value(&blueprint).unwrap();
        assert_eq!(
            body.get(<Blueprint as SingletonDefault>::DEFAULT_FLAG),
            Some(&serde_json::Value::Bool(true))
        );
    }
}
