//! # strata-store
//!
//! The Strata consistency layer: typed access to partitioned documents in a
//! multi-tenant store, upholding the cross-document invariants the backend
//! does not provide natively.
//!
//! This crate implements:
//!
//! - **[`DocumentStore`]**: typed CRUD/query access to one entity kind's
//!   documents, with validation before and notification after every write
//! - **[`ConditionalCache`]**: read-through caching that revalidates entries
//!   against the store's change tag instead of trusting them blindly
//! - **[`OptimisticMutator`]**: a bounded read-mutate-write retry loop for
//!   documents with concurrently edited embedded collections
//! - **[`DefaultSingletonGuard`]**: "exactly one default per partition"
//!   enforced through atomic multi-document batches
//! - **[`RecurrenceMatcher`]**: due-schedule selection with correct
//!   hour/day-boundary wraparound
//! - **[`SubscriptionNotifier`]**: best-effort post-write fan-out to
//!   registered listeners
//!
//! ## Consistency model
//!
//! Concurrency control is entirely optimistic: the layer holds no in-process
//! locks and serializes racing writers through change-tag-conditioned writes.
//! Multi-document operations commit through partition-scoped atomic batches;
//! the layer never produces partial writes. There are no cross-partition
//! transactions.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use strata_core::MemoryBackend;
//! use strata_store::StoreRegistry;
//!
//! let registry = StoreRegistry::builder(Arc::new(MemoryBackend::new())).build();
//! let _projects = registry.projects();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod default_guard;
pub mod error;
pub mod metrics;
pub mod model;
pub mod mutator;
pub mod notifier;
pub mod recurrence;
pub mod registry;
pub mod store;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use strata_store::prelude::*;
/// ```
pub mod prelude {
    pub use crate::cache::{CacheConfig, ConditionalCache};
    pub use crate::default_guard::DefaultSingletonGuard;
    pub use crate::error::{Error, Result};
    pub use crate::model::{
        Blueprint, DocumentModel, DocumentValidator, Grants, Membership, NoValidation, Project,
        Role, SingletonDefault,
    };
    pub use crate::mutator::{MutationOutcome, MutatorConfig, OptimisticMutator};
    pub use crate::notifier::{
        ChangeEvent, ChangeKind, ChangeListener, SubscriptionNotifier,
    };
    pub use crate::recurrence::{
        DayOfWeek, RecurrenceMatcher, Schedule, ScheduleValidator, TickInstant, due_filter,
    };
    pub use crate::registry::StoreRegistry;
    pub use crate::store::{Batch, CachedRead, DocumentStore, Versioned};
}

// Re-export main types at crate root
pub use cache::{CacheConfig, ConditionalCache};
pub use default_guard::DefaultSingletonGuard;
pub use error::{Error, Result};
pub use model::{
    Blueprint, DocumentModel, DocumentValidator, Grants, Membership, NoValidation, Project, Role,
    SingletonDefault,
};
pub use mutator::{MutationOutcome, MutatorConfig, OptimisticMutator};
pub use notifier::{ChangeEvent, ChangeKind, ChangeListener, RecordingListener, SubscriptionNotifier};
pub use recurrence::{
    DayOfWeek, RecurrenceMatcher, Schedule, ScheduleValidator, TickInstant, due_filter,
};
pub use registry::{StoreRegistry, StoreRegistryBuilder};
pub use store::{Batch, CachedRead, DocumentStore, Versioned};
