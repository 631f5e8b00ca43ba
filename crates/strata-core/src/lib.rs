//! # strata-core
//!
//! Core primitives for the Strata document-store consistency layer.
//!
//! This crate provides the foundational types and traits used across all
//! Strata components:
//!
//! - **Tenant Context**: Multi-tenant isolation primitives
//! - **Identifiers**: Strongly-typed IDs for projects, blueprints, users, and schedules
//! - **Partition Keys**: Deterministic partition derivation, the unit of atomicity
//! - **Backend Contract**: Conditional reads/writes, idempotent deletes, atomic batches
//! - **Query Filters**: The structured predicate language backends translate
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `strata-core` is the **only** crate allowed to define shared primitives.
//! The consistency layer in `strata-store` builds exclusively on the
//! contracts defined here; backends are swappable behind
//! [`DocumentBackend`](backend::DocumentBackend).
//!
//! ## Example
//!
//! ```rust
//! use strata_core::prelude::*;
//!
//! let tenant = TenantId::new("acme-corp").unwrap();
//! let partition = PartitionKey::tenant(&tenant);
//! let project_id = ProjectId::generate();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod backend;
pub mod document;
pub mod error;
pub mod id;
pub mod memory;
pub mod observability;
pub mod partition;
pub mod query;
pub mod tenant;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use strata_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::backend::{
        BatchOp, ConditionalRead, DocumentBackend, DocumentStream, WriteOutcome, WritePrecondition,
    };
    pub use crate::document::{ChangeTag, DocumentKind, PartitionStrategy, RawDocument};
    pub use crate::error::{Error, Result};
    pub use crate::id::{BlueprintId, ProjectId, ScheduleId, UserId};
    pub use crate::memory::MemoryBackend;
    pub use crate::partition::PartitionKey;
    pub use crate::query::{FieldPath, Filter};
    pub use crate::tenant::TenantId;
}

// Re-export key types at crate root for ergonomics
pub use backend::{
    BatchOp, ConditionalRead, DocumentBackend, DocumentStream, WriteOutcome, WritePrecondition,
};
pub use document::{ChangeTag, DocumentKind, PartitionStrategy, RawDocument};
pub use error::{Error, Result};
pub use id::{BlueprintId, ProjectId, ScheduleId, UserId};
pub use memory::MemoryBackend;
pub use observability::{LogFormat, init_logging, store_span};
pub use partition::PartitionKey;
pub use query::{FieldPath, Filter};
pub use tenant::TenantId;
