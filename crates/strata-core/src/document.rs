//! The raw document envelope and entity-kind dispatch.
//!
//! Every persisted entity travels through the backend as a [`RawDocument`]:
//! JSON bytes plus the common envelope of `{id, partition, change_tag}`. The
//! change tag is an opaque version token assigned by the backend on every
//! write; it is the sole concurrency-control primitive in the layer
//! (compare-and-swap semantics, see [`crate::backend::WritePrecondition`]).
//!
//! [`DocumentKind`] is the closed set of entity kinds. The kind tag determines
//! the partition strategy at compile time via plain variant dispatch; there is
//! no runtime type inspection anywhere in the layer.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::partition::PartitionKey;

/// An opaque version token assigned by the backend on every write.
///
/// Tags are only ever compared for equality; their content carries no meaning
/// to callers. The in-memory backend uses numeric generations, a production
/// backend would surface its native `ETag` (or equivalent) unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeTag(String);

impl ChangeTag {
    /// Creates a change tag from a backend-native token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored document as the backend sees it: envelope plus JSON body.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Document ID, unique within its partition.
    pub id: String,
    /// The partition this document lives in.
    pub partition: PartitionKey,
    /// Canonical JSON body.
    pub body: Bytes,
    /// Version token assigned by the backend on the last write.
    pub change_tag: ChangeTag,
    /// Last modification timestamp.
    pub last_modified: DateTime<Utc>,
}

/// How a kind's documents map onto partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStrategy {
    /// All documents of the kind share the owning tenant's partition.
    TenantWide,
    /// Documents partition by the project that owns them.
    PerProject,
}

/// The closed set of entity kinds known to the layer.
///
/// The kind determines the partition strategy and which invariant wrappers
/// apply: `Blueprint` documents carry the singleton-default invariant,
/// `Grants` documents are membership holders mutated exclusively through the
/// optimistic mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DocumentKind {
    /// Tenant-wide project registration.
    Project,
    /// Project-scoped template; exactly one default per project.
    Blueprint,
    /// Per-user membership holder, tenant-wide partition.
    Grants,
    /// Project-scoped recurring schedule.
    Schedule,
}

impl DocumentKind {
    /// Returns the partition strategy for this kind.
    ///
    /// This mapping is part of the persisted layout; see the module docs of
    /// [`crate::partition`] for the versioning caveat.
    #[must_use]
    pub const fn partition_strategy(self) -> PartitionStrategy {
        match self {
            Self::Project | Self::Grants => PartitionStrategy::TenantWide,
            Self::Blueprint | Self::Schedule => PartitionStrategy::PerProject,
        }
    }

    /// Returns the kind tag as a static string, for logging and error context.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Blueprint => "blueprint",
            Self::Grants => "grants",
            Self::Schedule => "schedule",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_partition_strategies() {
        assert_eq!(
            DocumentKind::Project.partition_strategy(),
            PartitionStrategy::TenantWide
        );
        assert_eq!(
            DocumentKind::Grants.partition_strategy(),
            PartitionStrategy::TenantWide
        );
        assert_eq!(
            DocumentKind::Blueprint.partition_strategy(),
            PartitionStrategy::PerProject
        );
        assert_eq!(
            DocumentKind::Schedule.partition_strategy(),
            PartitionStrategy::PerProject
        );
    }

    #[test]
    fn change_tags_compare_by_value() {
        assert_eq!(ChangeTag::new("7"), ChangeTag::new("7"));
        assert_ne!(ChangeTag::new("7"), ChangeTag::new("8"));
    }
}
