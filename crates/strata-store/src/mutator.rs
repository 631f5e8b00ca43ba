//! Optimistic read-mutate-write loop for concurrently edited documents.
//!
//! Membership holders are mutated exclusively through this loop: a direct
//! overwrite of the whole document can discard concurrent membership changes
//! made by other callers. The loop reads the current persisted copy, applies
//! the caller's mutation, and replaces conditioned on the change tag; losing
//! the race re-reads and retries.
//!
//! The retry loop is explicitly bounded. Exhaustion surfaces
//! [`Error::Exhausted`] instead of looping forever under pathological
//! contention; the bound and the backoff are tunable via [`MutatorConfig`].

use std::time::Duration;

use crate::error::{Error, Result};
use crate::metrics::record_replace_retry;
use crate::model::DocumentModel;
use crate::store::{DocumentStore, Versioned};

/// Tuning knobs for the optimistic retry loop.
#[derive(Debug, Clone, Copy)]
pub struct MutatorConfig {
    /// Maximum conditional-replace attempts before giving up.
    pub max_attempts: u32,
    /// Base backoff between attempts; attempt `n` sleeps `n * backoff_base`.
    pub backoff_base: Duration,
}

impl Default for MutatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            backoff_base: Duration::from_millis(10),
        }
    }
}

/// What a mutation closure decided to do with the current copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Persist the mutated copy.
    Apply,
    /// Leave the document as it is; nothing is written.
    NoOp,
}

/// Read-mutate-write wrapper over a [`DocumentStore`].
#[derive(Debug, Clone)]
pub struct OptimisticMutator<D> {
    store: DocumentStore<D>,
    config: MutatorConfig,
}

impl<D: DocumentModel> OptimisticMutator<D> {
    /// Creates a mutator with the default retry budget.
    #[must_use]
    pub fn new(store: DocumentStore<D>) -> Self {
        Self::with_config(store, MutatorConfig::default())
    }

    /// Creates a mutator with an explicit retry budget.
    #[must_use]
    pub fn with_config(store: DocumentStore<D>, config: MutatorConfig) -> Self {
        Self { store, config }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &DocumentStore<D> {
        &self.store
    }

    /// Applies a mutation to the persisted copy of `holder`'s document.
    ///
    /// The caller's in-memory `holder` carries no change tag, so the loop
    /// always starts from the persisted copy, creating one from `holder` if
    /// the document does not exist yet. The mutation closure runs against a
    /// fresh copy on every attempt and may return
    /// [`MutationOutcome::NoOp`] to skip the write entirely.
    ///
    /// Returns `Ok(None)` when the document was deleted by a concurrent
    /// writer: the logical operation is abandoned, there is nothing left to
    /// mutate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`] when every attempt lost its
    /// conditional-replace race. Precondition failures themselves are
    /// absorbed; callers never observe them.
    #[tracing::instrument(skip(self, holder, mutation), fields(kind = %D::KIND))]
    pub async fn mutate<F>(&self, holder: D, mut mutation: F) -> Result<Option<Versioned<D>>>
    where
        F: FnMut(&mut D) -> MutationOutcome + Send,
    {
        let partition = holder.partition_key();
        let id = holder.document_id();

        let mut current = match self.store.try_read(&partition, &id).await? {
            Some(versioned) => versioned,
            None => match self.store.create(&holder).await {
                Ok(versioned) => versioned,
                // Lost a create race: somebody else persisted the holder first.
                Err(Error::Conflict { .. }) => {
                    match self.store.try_read(&partition, &id).await? {
                        Some(versioned) => versioned,
                        // Created and deleted underneath us already.
                        None => return Ok(None),
                    }
                }
                Err(err) => return Err(err),
            },
        };

        for attempt in 1..=self.config.max_attempts {
            let mut candidate = current.document.clone();
            if mutation(&mut candidate) == MutationOutcome::NoOp {
                return Ok(Some(current));
            }

            match self.store.upsert_if(&candidate, &current.change_tag).await {
                Ok(versioned) => return Ok(Some(versioned)),
                Err(Error::PreconditionFailed { .. }) => {
                    record_replace_retry(D::KIND);
                    tracing::debug!(attempt, id = %id, "conditional replace lost a race, re-reading");

                    match self.store.try_read(&partition, &id).await? {
                        Some(latest) => current = latest,
                        // Deleted by a concurrent writer; abandon the mutation.
                        None => return Ok(None),
                    }

                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(self.config.backoff_base * attempt).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(Error::Exhausted {
            attempts: self.config.max_attempts,
        })
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Grants, Membership, Role};
    use chrono::Utc;
    use std::sync::Arc;
    use strata_core::{MemoryBackend, PartitionKey, ProjectId, TenantId, UserId};

    fn mutator() -> (OptimisticMutator<Grants>, Grants) {
        let backend = Arc::new(MemoryBackend::new());
        let store = DocumentStore::new(backend);
        let holder = Grants::new(UserId::generate(), TenantId::new_unchecked("acme"));
        (OptimisticMutator::new(store), holder)
    }

    fn membership(project_id: ProjectId) -> Membership {
        Membership {
            project_id,
            role: Role::Contributor,
            granted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn creates_the_holder_when_absent() -> Result<()> {
        let (mutator, holder) = mutator();
        let project = ProjectId::generate();

        let result = mutator
            .mutate(holder.clone(), |grants| {
                grants.grant(membership(project));
                MutationOutcome::Apply
            })
            .await?
            .expect("holder should exist after mutation");

        assert_eq!(result.document.len(), 1);
        assert!(result.document.membership(&project).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn noop_skips_the_write() -> Result<()> {
        let (mutator, holder) = mutator();

        let before = mutator.store().create(&holder).await?;
        let result = mutator
            .mutate(holder, |_| MutationOutcome::NoOp)
            .await?
            .expect("holder exists");

        // No write happened: the change tag is unchanged.
        assert_eq!(result.change_tag, before.change_tag);
        Ok(())
    }

    /// Backend wrapper that sabotages every tag-conditioned put, simulating a
    /// concurrent writer that always wins the race.
    struct SabotagingBackend {
        inner: MemoryBackend,
        mode: Sabotage,
    }

    #[derive(Clone, Copy)]
    enum Sabotage {
        /// Bump the document's generation before the conditional put lands.
        Overwrite,
        /// Delete the document before the conditional put lands.
        Vanish,
    }

    #[async_trait::async_trait]
    impl strata_core::DocumentBackend for SabotagingBackend {
        async fn get(
            &self,
            partition: &PartitionKey,
            id: &str,
        ) -> strata_core::Result<Option<strata_core::RawDocument>> {
            self.inner.get(partition, id).await
        }

        async fn get_if_changed(
            &self,
            partition: &PartitionKey,
            id: &str,
            tag: &strata_core::ChangeTag,
        ) -> strata_core::Result<strata_core::ConditionalRead> {
            self.inner.get_if_changed(partition, id, tag).await
        }

        async fn put(
            &self,
            partition: &PartitionKey,
            id: &str,
            body: bytes::Bytes,
            precondition: strata_core::WritePrecondition,
        ) -> strata_core::Result<strata_core::WriteOutcome> {
            if matches!(precondition, strata_core::WritePrecondition::TagMatches(_)) {
                match self.mode {
                    Sabotage::Overwrite => {
                        if let Some(raw) = self.inner.get(partition, id).await? {
                            self.inner
                                .put(
                                    partition,
                                    id,
                                    raw.body,
                                    strata_core::WritePrecondition::None,
                                )
                                .await?;
                        }
                    }
                    Sabotage::Vanish => {
                        self.inner.delete(partition, id).await?;
                    }
                }
            }
            self.inner.put(partition, id, body, precondition).await
        }

        async fn delete(
            &self,
            partition: &PartitionKey,
            id: &str,
        ) -> strata_core::Result<Option<strata_core::RawDocument>> {
            self.inner.delete(partition, id).await
        }

        async fn query(
            &self,
            partition: &PartitionKey,
            filter: &strata_core::Filter,
        ) -> strata_core::Result<strata_core::DocumentStream> {
            self.inner.query(partition, filter).await
        }

        async fn commit(
            &self,
            partition: &PartitionKey,
            ops: Vec<strata_core::BatchOp>,
        ) -> strata_core::Result<()> {
            self.inner.commit(partition, ops).await
        }
    }

    #[tokio::test]
    async fn returns_none_when_deleted_concurrently() -> Result<()> {
        let backend = Arc::new(SabotagingBackend {
            inner: MemoryBackend::new(),
            mode: Sabotage::Vanish,
        });
        let store: DocumentStore<Grants> = DocumentStore::new(backend);
        let holder = Grants::new(UserId::generate(), TenantId::new_unchecked("acme"));

        store.create(&holder).await?;
        let mutator = OptimisticMutator::new(store);

        let result = mutator
            .mutate(holder, |grants| {
                grants.grant(membership(ProjectId::generate()));
                MutationOutcome::Apply
            })
            .await?;

        assert!(result.is_none(), "a deleted holder abandons the mutation");
        Ok(())
    }

    #[tokio::test]
    async fn exhausts_under_permanent_contention() -> Result<()> {
        let backend = Arc::new(SabotagingBackend {
            inner: MemoryBackend::new(),
            mode: Sabotage::Overwrite,
        });
        let store: DocumentStore<Grants> = DocumentStore::new(backend);
        let holder = Grants::new(UserId::generate(), TenantId::new_unchecked("acme"));

        store.create(&holder).await?;

        let config = MutatorConfig {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
        };
        let mutator = OptimisticMutator::with_config(store, config);

        let result = mutator
            .mutate(holder, |grants| {
                grants.grant(membership(ProjectId::generate()));
                MutationOutcome::Apply
            })
            .await;

        assert!(matches!(result, Err(Error::Exhausted { attempts: 3 })));
        Ok(())
    }
}
