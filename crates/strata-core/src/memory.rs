//! In-memory backend implementation for testing.
//!
//! This module provides [`MemoryBackend`], a simple in-memory implementation
//! of the [`DocumentBackend`] trait suitable for testing and development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability, no cross-process coordination
//! - **Single-process only**: State is not shared across process boundaries
//! - **No persistence**: All state is lost when the process exits
//!
//! Change tags are numeric generations stored as strings, simulating the
//! version-token behavior of a real document store.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;

use crate::backend::{
    BatchOp, ConditionalRead, DocumentBackend, DocumentStream, WriteOutcome, WritePrecondition,
};
use crate::document::{ChangeTag, RawDocument};
use crate::error::{Error, Result};
use crate::partition::PartitionKey;
use crate::query::Filter;

#[derive(Debug, Clone)]
struct Stored {
    body: Bytes,
    /// Numeric generation stored as i64 internally, exposed as a string tag.
    generation: i64,
    last_modified: DateTime<Utc>,
}

impl Stored {
    fn tag(&self) -> ChangeTag {
        ChangeTag::new(self.generation.to_string())
    }

    fn raw(&self, partition: &PartitionKey, id: &str) -> RawDocument {
        RawDocument {
            id: id.to_string(),
            partition: partition.clone(),
            body: self.body.clone(),
            change_tag: self.tag(),
            last_modified: self.last_modified,
        }
    }
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// In-memory document backend for testing.
///
/// Thread-safe via `RwLock`. Documents are keyed by `(partition, id)`;
/// batches take the write lock once, so commits are atomic with respect to
/// every other operation.
///
/// ## Example
///
/// ```rust
/// use strata_core::memory::MemoryBackend;
///
/// let backend = MemoryBackend::new();
/// // Use backend in tests...
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackend {
    partitions: RwLock<HashMap<String, HashMap<String, Stored>>>,
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of documents currently stored in a partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn document_count(&self, partition: &PartitionKey) -> Result<usize> {
        let count = {
            let partitions = self.partitions.read().map_err(poison_err)?;
            partitions.get(partition.as_str()).map_or(0, HashMap::len)
        };
        Ok(count)
    }

    fn check_precondition(
        current: Option<&Stored>,
        precondition: &WritePrecondition,
    ) -> Option<WriteOutcome> {
        match precondition {
            WritePrecondition::MustNotExist => current.map(|stored| {
                WriteOutcome::PreconditionFailed {
                    current: Some(stored.tag()),
                }
            }),
            WritePrecondition::TagMatches(expected) => match current {
                Some(stored) if stored.tag() != *expected => {
                    Some(WriteOutcome::PreconditionFailed {
                        current: Some(stored.tag()),
                    })
                }
                None => Some(WriteOutcome::PreconditionFailed { current: None }),
                _ => None,
            },
            WritePrecondition::None => None,
        }
    }
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    async fn get(&self, partition: &PartitionKey, id: &str) -> Result<Option<RawDocument>> {
        let result = {
            let partitions = self.partitions.read().map_err(poison_err)?;
            partitions
                .get(partition.as_str())
                .and_then(|docs| docs.get(id))
                .map(|stored| stored.raw(partition, id))
        };
        Ok(result)
    }

    async fn get_if_changed(
        &self,
        partition: &PartitionKey,
        id: &str,
        tag: &ChangeTag,
    ) -> Result<ConditionalRead> {
        let result = {
            let partitions = self.partitions.read().map_err(poison_err)?;
            match partitions.get(partition.as_str()).and_then(|docs| docs.get(id)) {
                None => ConditionalRead::Missing,
                Some(stored) if stored.tag() == *tag => ConditionalRead::NotModified,
                Some(stored) => ConditionalRead::Changed(stored.raw(partition, id)),
            }
        };
        Ok(result)
    }

    async fn put(
        &self,
        partition: &PartitionKey,
        id: &str,
        body: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteOutcome> {
        let mut partitions = self.partitions.write().map_err(poison_err)?;
        let docs = partitions.entry(partition.as_str().to_string()).or_default();

        if let Some(failed) = Self::check_precondition(docs.get(id), &precondition) {
            drop(partitions);
            return Ok(failed);
        }

        let generation = docs.get(id).map_or(1, |stored| stored.generation + 1);
        docs.insert(
            id.to_string(),
            Stored {
                body,
                generation,
                last_modified: Utc::now(),
            },
        );
        drop(partitions);

        Ok(WriteOutcome::Written {
            tag: ChangeTag::new(generation.to_string()),
        })
    }

    async fn delete(&self, partition: &PartitionKey, id: &str) -> Result<Option<RawDocument>> {
        let prior = {
            let mut partitions = self.partitions.write().map_err(poison_err)?;
            partitions
                .get_mut(partition.as_str())
                .and_then(|docs| docs.remove(id))
                .map(|stored| stored.raw(partition, id))
        };
        Ok(prior)
    }

    async fn query(&self, partition: &PartitionKey, filter: &Filter) -> Result<DocumentStream> {
        // Filter evaluation happens under the lock; the stream itself is a
        // snapshot, so callers can cancel mid-iteration without holding it.
        let matches = {
            let partitions = self.partitions.read().map_err(poison_err)?;
            let mut matches = Vec::new();
            if let Some(docs) = partitions.get(partition.as_str()) {
                let mut entries: Vec<_> = docs.iter().collect();
                entries.sort_by(|(a, _), (b, _)| a.cmp(b));
                for (id, stored) in entries {
                    let body: serde_json::Value =
                        serde_json::from_slice(&stored.body).map_err(Error::serialization)?;
                    if filter.matches(&body) {
                        matches.push(stored.raw(partition, id));
                    }
                }
            }
            matches
        };

        Ok(stream::iter(matches.into_iter().map(Ok)).boxed())
    }

    async fn commit(&self, partition: &PartitionKey, ops: Vec<BatchOp>) -> Result<()> {
        let mut partitions = self.partitions.write().map_err(poison_err)?;
        let docs = partitions.entry(partition.as_str().to_string()).or_default();

        // Phase 1: validate every precondition against the same snapshot.
        for op in &ops {
            if let BatchOp::Put {
                id, precondition, ..
            } = op
            {
                if Self::check_precondition(docs.get(id), precondition).is_some() {
                    drop(partitions);
                    return Err(Error::precondition_failed(format!(
                        "batch precondition failed for '{id}'"
                    )));
                }
            }
        }

        // Phase 2: apply all operations.
        let now = Utc::now();
        for op in ops {
            match op {
                BatchOp::Put { id, body, .. } => {
                    let generation = docs.get(&id).map_or(1, |stored| stored.generation + 1);
                    docs.insert(
                        id,
                        Stored {
                            body,
                            generation,
                            last_modified: now,
                        },
                    );
                }
                BatchOp::Delete { id } => {
                    docs.remove(&id);
                }
            }
        }
        drop(partitions);

        Ok(())
    }
}
