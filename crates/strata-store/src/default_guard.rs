//! Enforcement of the one-default-per-partition invariant.
//!
//! For singleton-default kinds, a partition with at least one document must
//! have exactly one flagged default. The guard upholds this across
//! create/update/list:
//!
//! - the first document written to a partition is forced default
//! - promoting a document demotes every other default in the same atomic
//!   batch, so readers never observe zero or two defaults
//! - demoting the sole default is rejected; the caller must promote a
//!   replacement first
//!
//! Duplicate defaults should be unreachable, but historical data and partial
//! failures outside the batch path can produce them. Listing repairs such
//! partitions opportunistically; the repair is also exposed as a separate
//! operation so its cost and correctness can be tested on their own.

use strata_core::{Filter, PartitionKey};

use crate::error::{Error, Result};
use crate::metrics::record_default_repair;
use crate::model::SingletonDefault;
use crate::store::{DocumentStore, Versioned};

/// Attempts before an upsert gives up on its read-check-commit race.
const MAX_ATTEMPTS: u32 = 4;

/// Invariant-preserving write/list wrapper for singleton-default kinds.
///
/// All writes of singleton-default documents must go through this guard;
/// writing them directly through the store can violate the invariant.
#[derive(Debug, Clone)]
pub struct DefaultSingletonGuard<D> {
    store: DocumentStore<D>,
}

impl<D: SingletonDefault> DefaultSingletonGuard<D> {
    /// Creates a guard over the given store.
    #[must_use]
    pub fn new(store: DocumentStore<D>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &DocumentStore<D> {
        &self.store
    }

    fn default_filter() -> Filter {
        Filter::eq(D::DEFAULT_FLAG, true)
    }

    /// Creates or replaces a document while keeping the partition's default
    /// invariant.
    ///
    /// The whole operation re-runs when its commit loses a race with a
    /// concurrent writer; precondition failures are absorbed, never
    /// surfaced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] when the write would leave the
    /// partition without a default, [`Error::Exhausted`] when every attempt
    /// lost its commit race, and [`Error::Validation`] when the document
    /// fails validation.
    #[tracing::instrument(skip(self, doc), fields(kind = %D::KIND))]
    pub async fn upsert_with_default_invariant(&self, doc: D) -> Result<Versioned<D>> {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.try_upsert(doc.clone()).await {
                Err(Error::PreconditionFailed { .. }) => {
                    tracing::debug!(attempt, "default-invariant commit lost a race, retrying");
                }
                other => return other,
            }
        }
        Err(Error::Exhausted {
            attempts: MAX_ATTEMPTS,
        })
    }

    async fn try_upsert(&self, mut doc: D) -> Result<Versioned<D>> {
        let partition = doc.partition_key();
        let id = doc.document_id();

        let defaults = self
            .store
            .query_all(&partition, &Self::default_filter())
            .await?;
        let holds_default = defaults
            .iter()
            .any(|v| v.document.document_id() == id);
        let siblings: Vec<&Versioned<D>> = defaults
            .iter()
            .filter(|v| v.document.document_id() != id)
            .collect();

        // A partition must never be left without a default once it has any
        // document of the kind: the first write claims the default slot.
        if defaults.is_empty() {
            doc.set_default(true);
        }

        if !doc.is_default() && holds_default && siblings.is_empty() {
            return Err(Error::invariant(format!(
                "cannot demote {} '{id}': it is the only default in partition '{partition}'; promote a replacement first",
                D::KIND
            )));
        }

        if doc.is_default() && !siblings.is_empty() {
            // Promote and demote in one transactional batch so no reader
            // observes two defaults (or none).
            let mut batch = self.store.batch(partition.clone());
            batch.upsert(&doc)?;
            for sibling in siblings {
                let mut demoted = sibling.document.clone();
                demoted.set_default(false);
                batch.upsert_if(&demoted, &sibling.change_tag)?;
            }
            self.store.commit_batch(batch).await?;
            return self.store.read(&partition, &id).await;
        }

        self.store.upsert(&doc).await
    }

    /// Deletes a document while keeping the partition's default invariant.
    ///
    /// Deleting the default while siblings remain would leave the partition
    /// without a default, so it is rejected; deleting the last document of
    /// the kind is allowed (an empty partition needs no default). Like the
    /// plain store delete, this is idempotent and returns the deleted
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] when the target is the default
    /// and other documents of the kind remain; the caller must promote a
    /// replacement first.
    #[tracing::instrument(skip(self), fields(kind = %D::KIND))]
    pub async fn delete_with_default_invariant(
        &self,
        partition: &PartitionKey,
        id: &str,
    ) -> Result<Option<D>> {
        let Some(target) = self.store.try_read(partition, id).await? else {
            return Ok(None);
        };

        if target.document.is_default() {
            let all = self.store.query_all(partition, &Filter::True).await?;
            let siblings = all
                .iter()
                .filter(|v| v.document.document_id() != id)
                .count();
            if siblings > 0 {
                return Err(Error::invariant(format!(
                    "cannot delete {} '{id}': it is the default in partition '{partition}' and {siblings} sibling(s) remain; promote a replacement first",
                    D::KIND
                )));
            }
        }

        self.store.delete(partition, id).await
    }

    /// Lists every document of the kind in a partition, repairing duplicate
    /// defaults on the way.
    ///
    /// When more than one default is found, all but the first-encountered one
    /// are demoted in a best-effort batch; a failed repair is logged and the
    /// listing is returned unrepaired rather than failing the read. Repaired
    /// entries keep their pre-repair change tags.
    pub async fn list_with_repair(&self, partition: &PartitionKey) -> Result<Vec<Versioned<D>>> {
        let mut all = self.store.query_all(partition, &Filter::True).await?;

        let default_positions: Vec<usize> = all
            .iter()
            .enumerate()
            .filter(|(_, v)| v.document.is_default())
            .map(|(position, _)| position)
            .collect();

        if default_positions.len() > 1 {
            let extras = &default_positions[1..];
            match self.demote(partition, extras.iter().map(|&i| &all[i])).await {
                Ok(demoted) => {
                    record_default_repair(D::KIND, demoted);
                    tracing::warn!(
                        kind = %D::KIND,
                        partition = %partition,
                        demoted,
                        "repaired duplicate default documents during listing"
                    );
                    for &position in extras {
                        all[position].document.set_default(false);
                    }
                }
                Err(error) => {
                    // Best effort only: the listing itself must not fail.
                    tracing::warn!(
                        kind = %D::KIND,
                        partition = %partition,
                        %error,
                        "duplicate-default repair failed; returning unrepaired listing"
                    );
                }
            }
        }

        Ok(all)
    }

    /// Demotes every default beyond the first in a partition.
    ///
    /// This is the repair `list_with_repair` applies opportunistically,
    /// exposed on its own so it can be invoked and tested directly. Returns
    /// the number of documents demoted.
    ///
    /// # Errors
    ///
    /// Unlike the opportunistic path, a failed repair batch propagates.
    #[tracing::instrument(skip(self), fields(kind = %D::KIND))]
    pub async fn repair_duplicate_defaults(&self, partition: &PartitionKey) -> Result<usize> {
        let defaults = self
            .store
            .query_all(partition, &Self::default_filter())
            .await?;
        if defaults.len() <= 1 {
            return Ok(0);
        }

        let demoted = self.demote(partition, defaults[1..].iter()).await?;
        record_default_repair(D::KIND, demoted);
        Ok(demoted)
    }

    async fn demote<'a>(
        &self,
        partition: &PartitionKey,
        victims: impl Iterator<Item = &'a Versioned<D>>,
    ) -> Result<usize> {
        let mut batch = self.store.batch(partition.clone());
        let mut count = 0;
        for victim in victims {
            let mut demoted = victim.document.clone();
            demoted.set_default(false);
            batch.upsert_if(&demoted, &victim.change_tag)?;
            count += 1;
        }
        self.store.commit_batch(batch).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Blueprint, DocumentModel};
    use chrono::Utc;
    use std::sync::Arc;
    use strata_core::{BlueprintId, MemoryBackend, ProjectId};

    fn blueprint(project_id: ProjectId, name: &str, is_default: bool) -> Blueprint {
        Blueprint {
            id: BlueprintId::generate(),
            project_id,
            name: name.into(),
            is_default,
            created_at: Utc::now(),
        }
    }

    fn guard() -> (DefaultSingletonGuard<Blueprint>, ProjectId, PartitionKey) {
        let backend = Arc::new(MemoryBackend::new());
        let store: DocumentStore<Blueprint> = DocumentStore::new(backend);
        let project = ProjectId::generate();
        let partition = PartitionKey::project(&project);
        (DefaultSingletonGuard::new(store), project, partition)
    }

    async fn count_defaults(
        guard: &DefaultSingletonGuard<Blueprint>,
        partition: &PartitionKey,
    ) -> usize {
        guard
            .store()
            .query_all(partition, &Filter::eq("isDefault", true))
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn first_document_is_forced_default() -> Result<()> {
        let (guard, project, partition) = guard();

        let created = guard
            .upsert_with_default_invariant(blueprint(project, "web", false))
            .await?;

        assert!(created.document.is_default, "first write claims the slot");
        assert_eq!(count_defaults(&guard, &partition).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn later_documents_stay_non_default() -> Result<()> {
        let (guard, project, partition) = guard();

        guard
            .upsert_with_default_invariant(blueprint(project, "web", false))
            .await?;
        let second = guard
            .upsert_with_default_invariant(blueprint(project, "batch", false))
            .await?;

        assert!(!second.document.is_default);
        assert_eq!(count_defaults(&guard, &partition).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn promotion_demotes_the_old_default_atomically() -> Result<()> {
        let (guard, project, partition) = guard();

        let old = guard
            .upsert_with_default_invariant(blueprint(project, "web", false))
            .await?;
        let new = guard
            .upsert_with_default_invariant(blueprint(project, "batch", true))
            .await?;

        assert!(new.document.is_default);
        assert_eq!(count_defaults(&guard, &partition).await, 1);

        let old_now = guard
            .store()
            .read(&partition, &old.document.document_id())
            .await?;
        assert!(!old_now.document.is_default, "old default was demoted");
        Ok(())
    }

    #[tokio::test]
    async fn demoting_the_sole_default_is_rejected() -> Result<()> {
        let (guard, project, partition) = guard();

        let created = guard
            .upsert_with_default_invariant(blueprint(project, "web", true))
            .await?;

        let mut demoted = created.document.clone();
        demoted.is_default = false;
        let result = guard.upsert_with_default_invariant(demoted).await;
        assert!(matches!(result, Err(Error::InvariantViolation { .. })));

        // The store is unchanged: the document is still the default.
        let current = guard
            .store()
            .read(&partition, &created.document.document_id())
            .await?;
        assert!(current.document.is_default);
        Ok(())
    }

    #[tokio::test]
    async fn updating_the_default_in_place_is_allowed() -> Result<()> {
        let (guard, project, partition) = guard();

        let created = guard
            .upsert_with_default_invariant(blueprint(project, "web", true))
            .await?;

        let mut renamed = created.document.clone();
        renamed.name = "web-v2".into();
        let updated = guard.upsert_with_default_invariant(renamed).await?;

        assert!(updated.document.is_default);
        assert_eq!(updated.document.name, "web-v2");
        assert_eq!(count_defaults(&guard, &partition).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn deleting_the_default_with_siblings_is_rejected() -> Result<()> {
        let (guard, project, partition) = guard();

        let default = guard
            .upsert_with_default_invariant(blueprint(project, "web", true))
            .await?;
        guard
            .upsert_with_default_invariant(blueprint(project, "batch", false))
            .await?;

        let result = guard
            .delete_with_default_invariant(&partition, &default.document.document_id())
            .await;
        assert!(matches!(result, Err(Error::InvariantViolation { .. })));
        assert_eq!(count_defaults(&guard, &partition).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn deleting_the_last_document_empties_the_partition() -> Result<()> {
        let (guard, project, partition) = guard();

        let only = guard
            .upsert_with_default_invariant(blueprint(project, "web", true))
            .await?;
        let id = only.document.document_id();

        let deleted = guard.delete_with_default_invariant(&partition, &id).await?;
        assert!(deleted.is_some());

        // Idempotent: a second delete is a quiet no-op.
        let deleted = guard.delete_with_default_invariant(&partition, &id).await?;
        assert!(deleted.is_none());
        assert_eq!(count_defaults(&guard, &partition).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn listing_repairs_duplicate_defaults() -> Result<()> {
        let (guard, project, partition) = guard();

        // Bypass the guard to fabricate the anomalous two-default state.
        guard.store().create(&blueprint(project, "a", true)).await?;
        guard.store().create(&blueprint(project, "b", true)).await?;
        guard.store().create(&blueprint(project, "c", false)).await?;

        let listed = guard.list_with_repair(&partition).await?;
        assert_eq!(listed.len(), 3);
        assert_eq!(
            listed.iter().filter(|v| v.document.is_default).count(),
            1,
            "the returned listing reflects the repair"
        );
        assert_eq!(count_defaults(&guard, &partition).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn explicit_repair_reports_demotions() -> Result<()> {
        let (guard, project, partition) = guard();

        guard.store().create(&blueprint(project, "a", true)).await?;
        guard.store().create(&blueprint(project, "b", true)).await?;
        guard.store().create(&blueprint(project, "c", true)).await?;

        assert_eq!(guard.repair_duplicate_defaults(&partition).await?, 2);
        assert_eq!(count_defaults(&guard, &partition).await, 1);

        // A healthy partition needs no repair.
        assert_eq!(guard.repair_duplicate_defaults(&partition).await?, 0);
        Ok(())
    }
}
