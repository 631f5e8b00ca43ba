//! Partition keys with a deterministic canonical encoding.
//!
//! A partition is the unit of atomicity: batch commits are scoped to exactly
//! one partition, and every query runs against exactly one partition. The
//! canonical `scope=value` format provides operational ergonomics
//! (grep-friendly, self-documenting) and matches the layout conventions used
//! elsewhere in the platform.
//!
//! Partition-key derivation MUST be a pure function of an entity's kind and
//! its own fields, identical on the read and write paths. An inconsistent
//! derivation silently produces "not found". The derivation rules are part of
//! the persisted layout and are versioned with it: changing them after data
//! exists requires a migration.
//!
//! # Example
//!
//! ```rust
//! use strata_core::partition::PartitionKey;
//! use strata_core::tenant::TenantId;
//!
//! let tenant = TenantId::new("acme-corp").unwrap();
//! let key = PartitionKey::tenant(&tenant);
//! assert_eq!(key.as_str(), "tenant=acme-corp");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::id::ProjectId;
use crate::tenant::TenantId;

/// A logical partition key in canonical `scope=value` form.
///
/// Construct via the scope-specific constructors; the inner representation is
/// deterministic so the same logical partition always encodes to the same
/// string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Partition shared by all tenant-wide documents of a tenant.
    #[must_use]
    pub fn tenant(tenant: &TenantId) -> Self {
        Self(format!("tenant={tenant}"))
    }

    /// Partition owned by a single project.
    #[must_use]
    pub fn project(project: &ProjectId) -> Self {
        Self(format!("project={project}"))
    }

    /// Reconstructs a partition key from its canonical string form.
    ///
    /// Intended for keys read back from storage; no validation is performed.
    #[must_use]
    pub fn from_canonical(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PartitionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_partition_is_canonical() {
        let tenant = TenantId::new("acme-corp").unwrap();
        assert_eq!(PartitionKey::tenant(&tenant).as_str(), "tenant=acme-corp");
    }

    #[test]
    fn same_logical_partition_encodes_identically() {
        let project = ProjectId::generate();
        assert_eq!(
            PartitionKey::project(&project),
            PartitionKey::project(&project)
        );
    }

    #[test]
    fn different_scopes_never_collide() {
        let tenant = TenantId::new("abc").unwrap();
        let project = ProjectId::generate();
        assert_ne!(
            PartitionKey::tenant(&tenant).as_str(),
            PartitionKey::project(&project).as_str()
        );
    }
}
