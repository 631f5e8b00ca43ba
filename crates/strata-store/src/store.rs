//! Typed CRUD and query access to one logical collection of documents.
//!
//! [`DocumentStore`] is the only path other subsystems may use to touch the
//! backend. It is thin by design: serialization, partition derivation,
//! validation, and post-write notification live here; every cross-document
//! invariant lives in the wrappers built on top
//! ([`DefaultSingletonGuard`](crate::default_guard::DefaultSingletonGuard),
//! [`OptimisticMutator`](crate::mutator::OptimisticMutator)).
//!
//! ## Concurrency
//!
//! The store holds no locks. Concurrency control is entirely optimistic,
//! delegated to the backend's change-tag-conditioned writes; the only
//! suspension points are backend I/O.

use bytes::Bytes;
use futures::StreamExt;
use futures::TryStreamExt;
use futures::stream::BoxStream;
use std::marker::PhantomData;
use std::sync::Arc;

use strata_core::backend::{
    BatchOp, ConditionalRead, DocumentBackend, WriteOutcome, WritePrecondition,
};
use strata_core::{ChangeTag, Filter, PartitionKey, RawDocument};

use crate::error::{Error, Result};
use crate::model::{DocumentModel, DocumentValidator, NoValidation};
use crate::notifier::{ChangeEvent, ChangeKind, SubscriptionNotifier};

/// A typed document paired with the change tag assigned by its last write.
#[derive(Debug, Clone)]
pub struct Versioned<D> {
    /// The typed document.
    pub document: D,
    /// Version token for conditional follow-up writes.
    pub change_tag: ChangeTag,
}

/// Outcome of a tag-conditioned read, typed.
#[derive(Debug, Clone)]
pub enum CachedRead<D> {
    /// The stored tag matches; the caller's copy is current.
    NotModified,
    /// The document changed; carries the fresh copy.
    Changed(Versioned<D>),
    /// The document no longer exists.
    Missing,
}

/// Typed access to one entity kind's documents.
///
/// Cheap to clone; clones share the backend, validator, and notifier.
pub struct DocumentStore<D> {
    backend: Arc<dyn DocumentBackend>,
    validator: Arc<dyn DocumentValidator<D>>,
    notifier: SubscriptionNotifier,
    _marker: PhantomData<fn() -> D>,
}

impl<D> Clone for DocumentStore<D> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            validator: self.validator.clone(),
            notifier: self.notifier.clone(),
            _marker: PhantomData,
        }
    }
}

impl<D> std::fmt::Debug for DocumentStore<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore").finish_non_exhaustive()
    }
}

impl<D: DocumentModel> DocumentStore<D> {
    /// Creates a store over the given backend with no validation and no
    /// listeners.
    #[must_use]
    pub fn new(backend: Arc<dyn DocumentBackend>) -> Self {
        Self {
            backend,
            validator: Arc::new(NoValidation),
            notifier: SubscriptionNotifier::new(),
            _marker: PhantomData,
        }
    }

    /// Attaches a validator invoked before every create and upsert.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn DocumentValidator<D>>) -> Self {
        self.validator = validator;
        self
    }

    /// Attaches a notifier invoked after every successful mutation.
    #[must_use]
    pub fn with_notifier(mut self, notifier: SubscriptionNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Returns the notifier this store reports mutations to.
    #[must_use]
    pub fn notifier(&self) -> &SubscriptionNotifier {
        &self.notifier
    }

    fn encode(doc: &D) -> Result<Bytes> {
        let body = serde_json::to_vec(doc).map_err(|e| Error::Serialization {
            message: format!("failed to serialize {} document: {e}", D::KIND),
        })?;
        Ok(Bytes::from(body))
    }

    fn decode(raw: &RawDocument) -> Result<D> {
        serde_json::from_slice(&raw.body).map_err(|e| Error::Serialization {
            message: format!("failed to deserialize {} document '{}': {e}", D::KIND, raw.id),
        })
    }

    fn to_versioned(raw: RawDocument) -> Result<Versioned<D>> {
        let document = Self::decode(&raw)?;
        Ok(Versioned {
            document,
            change_tag: raw.change_tag,
        })
    }

    fn emit(&self, kind: ChangeKind, partition: PartitionKey, id: String, body: Option<Bytes>) {
        self.notifier.notify(&ChangeEvent {
            kind,
            document_kind: D::KIND,
            partition,
            id,
            body,
        });
    }

    /// Creates a new document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if a document with the same ID already
    /// exists in the partition, or [`Error::Validation`] if the document
    /// fails validation.
    #[tracing::instrument(skip(self, doc), fields(kind = %D::KIND))]
    pub async fn create(&self, doc: &D) -> Result<Versioned<D>> {
        self.validator.validate(doc)?;
        let partition = doc.partition_key();
        let id = doc.document_id();
        let body = Self::encode(doc)?;

        let outcome = self
            .backend
            .put(&partition, &id, body.clone(), WritePrecondition::MustNotExist)
            .await?;

        match outcome {
            WriteOutcome::Written { tag } => {
                self.emit(ChangeKind::Created, partition, id, Some(body));
                Ok(Versioned {
                    document: doc.clone(),
                    change_tag: tag,
                })
            }
            WriteOutcome::PreconditionFailed { .. } => Err(Error::conflict(format!(
                "{} '{id}' already exists in partition '{partition}'",
                D::KIND
            ))),
        }
    }

    /// Reads a document, or fails with [`Error::NotFound`].
    pub async fn read(&self, partition: &PartitionKey, id: &str) -> Result<Versioned<D>> {
        self.try_read(partition, id)
            .await?
            .ok_or_else(|| Error::not_found(D::KIND, id))
    }

    /// Reads a document, returning `None` if absent.
    pub async fn try_read(
        &self,
        partition: &PartitionKey,
        id: &str,
    ) -> Result<Option<Versioned<D>>> {
        match self.backend.get(partition, id).await? {
            Some(raw) => Ok(Some(Self::to_versioned(raw)?)),
            None => Ok(None),
        }
    }

    /// Reads a document only if it changed relative to the given tag.
    ///
    /// A `NotModified` result means the caller's copy is current and no body
    /// was deserialized.
    pub async fn read_if_changed(
        &self,
        partition: &PartitionKey,
        id: &str,
        tag: &ChangeTag,
    ) -> Result<CachedRead<D>> {
        match self.backend.get_if_changed(partition, id, tag).await? {
            ConditionalRead::NotModified => Ok(CachedRead::NotModified),
            ConditionalRead::Changed(raw) => Ok(CachedRead::Changed(Self::to_versioned(raw)?)),
            ConditionalRead::Missing => Ok(CachedRead::Missing),
        }
    }

    /// Creates or fully replaces a document, last writer wins.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the document fails validation.
    #[tracing::instrument(skip(self, doc), fields(kind = %D::KIND))]
    pub async fn upsert(&self, doc: &D) -> Result<Versioned<D>> {
        self.write(doc, WritePrecondition::None).await
    }

    /// Replaces a document only if its stored change tag still matches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionFailed`] if a concurrent writer updated
    /// the document first. The optimistic wrappers absorb this; other callers
    /// should treat it as a retryable race.
    #[tracing::instrument(skip(self, doc, tag), fields(kind = %D::KIND))]
    pub async fn upsert_if(&self, doc: &D, tag: &ChangeTag) -> Result<Versioned<D>> {
        self.write(doc, WritePrecondition::TagMatches(tag.clone()))
            .await
    }

    async fn write(&self, doc: &D, precondition: WritePrecondition) -> Result<Versioned<D>> {
        self.validator.validate(doc)?;
        let partition = doc.partition_key();
        let id = doc.document_id();
        let body = Self::encode(doc)?;

        let outcome = self
            .backend
            .put(&partition, &id, body.clone(), precondition)
            .await?;

        match outcome {
            WriteOutcome::Written { tag } => {
                self.emit(ChangeKind::Updated, partition, id, Some(body));
                Ok(Versioned {
                    document: doc.clone(),
                    change_tag: tag,
                })
            }
            WriteOutcome::PreconditionFailed { .. } => {
                Err(Error::PreconditionFailed {
                    message: format!(
                        "{} '{id}' was modified by a concurrent writer",
                        D::KIND
                    ),
                })
            }
        }
    }

    /// Deletes a document, returning the deleted snapshot.
    ///
    /// Idempotent: deleting an absent document returns `Ok(None)` and is
    /// never an error, on the first call and on every call after.
    #[tracing::instrument(skip(self), fields(kind = %D::KIND))]
    pub async fn delete(&self, partition: &PartitionKey, id: &str) -> Result<Option<D>> {
        match self.backend.delete(partition, id).await? {
            Some(raw) => {
                let document = Self::decode(&raw)?;
                self.emit(
                    ChangeKind::Deleted,
                    partition.clone(),
                    id.to_string(),
                    Some(raw.body),
                );
                Ok(Some(document))
            }
            None => Ok(None),
        }
    }

    /// Queries the partition with a structured filter.
    ///
    /// The stream is lazy, finite, and restartable; dropping it mid-iteration
    /// cancels the query and items already yielded remain valid.
    pub async fn query(
        &self,
        partition: &PartitionKey,
        filter: &Filter,
    ) -> Result<BoxStream<'static, Result<Versioned<D>>>> {
        let stream = self.backend.query(partition, filter).await?;
        Ok(stream
            .map(|item| item.map_err(Error::from).and_then(Self::to_versioned))
            .boxed())
    }

    /// Queries the partition and collects every match.
    pub async fn query_all(
        &self,
        partition: &PartitionKey,
        filter: &Filter,
    ) -> Result<Vec<Versioned<D>>> {
        self.query(partition, filter).await?.try_collect().await
    }

    /// Starts a transactional batch against one partition.
    ///
    /// All operations commit atomically through
    /// [`commit_batch`](Self::commit_batch); used by the default guard to
    /// keep multi-document invariants.
    #[must_use]
    pub fn batch(&self, partition: PartitionKey) -> Batch<D> {
        Batch {
            partition,
            ops: Vec::new(),
            events: Vec::new(),
            validator: self.validator.clone(),
            _marker: PhantomData,
        }
    }

    /// Commits a batch atomically: every operation applies, or none does.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionFailed`] if any tag-conditioned operation
    /// in the batch lost a race; nothing is applied in that case.
    #[tracing::instrument(skip(self, batch), fields(kind = %D::KIND, ops = batch.len()))]
    pub async fn commit_batch(&self, batch: Batch<D>) -> Result<()> {
        let Batch {
            partition,
            ops,
            events,
            ..
        } = batch;
        if ops.is_empty() {
            return Ok(());
        }

        self.backend.commit(&partition, ops).await?;

        for event in events {
            self.notifier.notify(&event);
        }
        Ok(())
    }
}

/// Builder for a transactional multi-document batch in one partition.
pub struct Batch<D> {
    partition: PartitionKey,
    ops: Vec<BatchOp>,
    events: Vec<ChangeEvent>,
    validator: Arc<dyn DocumentValidator<D>>,
    _marker: PhantomData<fn() -> D>,
}

impl<D: DocumentModel> Batch<D> {
    /// Adds an unconditional create-or-replace.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the document fails validation, or a
    /// serialization error if it cannot be encoded.
    pub fn upsert(&mut self, doc: &D) -> Result<&mut Self> {
        self.push_put(doc, WritePrecondition::None)
    }

    /// Adds a create that fails the whole batch if the ID already exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the document fails validation, or a
    /// serialization error if it cannot be encoded.
    pub fn create(&mut self, doc: &D) -> Result<&mut Self> {
        self.push_put(doc, WritePrecondition::MustNotExist)
    }

    /// Adds a replace conditioned on the document's current change tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the document fails validation, or a
    /// serialization error if it cannot be encoded.
    pub fn upsert_if(&mut self, doc: &D, tag: &ChangeTag) -> Result<&mut Self> {
        self.push_put(doc, WritePrecondition::TagMatches(tag.clone()))
    }

    /// Adds an idempotent delete.
    pub fn delete(&mut self, id: &str) -> &mut Self {
        self.ops.push(BatchOp::Delete { id: id.to_string() });
        self.events.push(ChangeEvent {
            kind: ChangeKind::Deleted,
            document_kind: D::KIND,
            partition: self.partition.clone(),
            id: id.to_string(),
            body: None,
        });
        self
    }

    fn push_put(&mut self, doc: &D, precondition: WritePrecondition) -> Result<&mut Self> {
        self.validator.validate(doc)?;
        let id = doc.document_id();
        let body = DocumentStore::<D>::encode(doc)?;
        let kind = match precondition {
            WritePrecondition::MustNotExist => ChangeKind::Created,
            _ => ChangeKind::Updated,
        };
        self.ops.push(BatchOp::Put {
            id: id.clone(),
            body: body.clone(),
            precondition,
        });
        self.events.push(ChangeEvent {
            kind,
            document_kind: D::KIND,
            partition: self.partition.clone(),
            id,
            body: Some(body),
        });
        Ok(self)
    }

    /// Returns the number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if no operations are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
