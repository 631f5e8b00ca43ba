//! Backend abstraction for partitioned document storage.
//!
//! This module defines the storage contract that all backends must implement:
//!
//! - Conditional reads and writes keyed on an opaque change tag
//! - Idempotent deletes that return the prior snapshot
//! - Lazy, restartable query streams scoped to one partition
//! - Atomic all-or-nothing batches scoped to one partition
//!
//! The change tag is opaque to support different backends: the in-memory
//! backend uses numeric generations, a document database would use its native
//! `ETag`/session token. This abstraction keeps store-specific assumptions
//! out of the consistency layer above.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::document::{ChangeTag, RawDocument};
use crate::error::Result;
use crate::partition::PartitionKey;
use crate::query::Filter;

/// Precondition for conditional writes (CAS operations).
#[derive(Debug, Clone)]
pub enum WritePrecondition {
    /// Write only if no document with the ID exists in the partition.
    MustNotExist,
    /// Write only if the stored document's change tag matches.
    TagMatches(ChangeTag),
    /// Write unconditionally (last writer wins).
    None,
}

/// Result of a conditional write.
///
/// A failed precondition is a normal result, never an error: callers decide
/// whether to surface it, retry, or absorb it.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    /// Write succeeded; carries the newly assigned change tag.
    Written {
        /// The change tag assigned by this write.
        tag: ChangeTag,
    },
    /// Precondition failed; carries the current tag if the document exists.
    PreconditionFailed {
        /// The stored document's current tag, or `None` if it does not exist.
        current: Option<ChangeTag>,
    },
}

impl WriteOutcome {
    /// Returns true if the write was applied.
    #[must_use]
    pub const fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// Result of a conditional read against a cached change tag.
#[derive(Debug, Clone)]
pub enum ConditionalRead {
    /// The stored tag matches; the caller's copy is current.
    NotModified,
    /// The document changed; carries the fresh copy.
    Changed(RawDocument),
    /// The document no longer exists.
    Missing,
}

/// A single operation inside an atomic batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Create or replace a document, subject to a precondition.
    Put {
        /// Document ID within the batch's partition.
        id: String,
        /// Canonical JSON body.
        body: Bytes,
        /// Precondition checked atomically with every other op in the batch.
        precondition: WritePrecondition,
    },
    /// Delete a document. Idempotent: deleting an absent ID is not a failure.
    Delete {
        /// Document ID within the batch's partition.
        id: String,
    },
}

/// A lazy, finite stream of raw documents.
///
/// Dropping the stream mid-iteration cancels the query; items already yielded
/// remain valid. Issuing the query again restarts it from the beginning.
pub type DocumentStream = BoxStream<'static, Result<RawDocument>>;

/// Storage contract for partitioned document backends.
///
/// ## Concurrency
///
/// Backends provide no locking. All concurrency control above this trait is
/// optimistic, built from [`WritePrecondition::TagMatches`] compare-and-swap
/// writes. Two writers racing on one document serialize through precondition
/// rejection and retry, not queuing.
///
/// ## Atomicity
///
/// [`commit`](Self::commit) is all-or-nothing within a single partition.
/// There are no cross-partition transactions.
#[async_trait]
pub trait DocumentBackend: Send + Sync + 'static {
    /// Reads a document.
    ///
    /// Returns `None` if no document with the ID exists in the partition.
    async fn get(&self, partition: &PartitionKey, id: &str) -> Result<Option<RawDocument>>;

    /// Reads a document only if it changed relative to the given tag.
    ///
    /// Lets callers skip re-fetching (and re-deserializing) unchanged
    /// documents.
    async fn get_if_changed(
        &self,
        partition: &PartitionKey,
        id: &str,
        tag: &ChangeTag,
    ) -> Result<ConditionalRead>;

    /// Writes a document subject to a precondition.
    ///
    /// Returns [`WriteOutcome::PreconditionFailed`] when the precondition does
    /// not hold; this is a normal result, not an error.
    async fn put(
        &self,
        partition: &PartitionKey,
        id: &str,
        body: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteOutcome>;

    /// Deletes a document, returning the prior snapshot.
    ///
    /// Idempotent: returns `Ok(None)` if the document was already absent,
    /// on the first call and on every call after.
    async fn delete(&self, partition: &PartitionKey, id: &str) -> Result<Option<RawDocument>>;

    /// Queries a partition with a structured filter.
    ///
    /// The filter is translated to the backend's native query syntax; the
    /// reference semantics are [`Filter::matches`]. The stream is finite and
    /// restartable.
    async fn query(&self, partition: &PartitionKey, filter: &Filter) -> Result<DocumentStream>;

    /// Commits a batch of operations atomically within one partition.
    ///
    /// All preconditions are checked against the same snapshot; if any fails,
    /// nothing is applied and [`Error::PreconditionFailed`] is returned.
    ///
    /// [`Error::PreconditionFailed`]: crate::error::Error::PreconditionFailed
    async fn commit(&self, partition: &PartitionKey, ops: Vec<BatchOp>) -> Result<()>;
}
