//! Failure injection tests for batch atomicity.
//!
//! These tests verify that invariant-preserving multi-document operations
//! either fully commit or leave the partition untouched, even when the
//! backend fails at the worst moment.
//!
//! # Invariants Tested
//!
//! 1. **No partial promotion**: If the promote+demote batch fails, the old
//!    default remains default and the new document is absent
//! 2. **Reads survive repair failures**: A listing whose opportunistic
//!    repair batch fails still returns, unrepaired
//! 3. **No partial state**: Readers never observe two defaults after a
//!    failed commit

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;

use strata_core::backend::{
    BatchOp, ConditionalRead, DocumentBackend, DocumentStream, WriteOutcome, WritePrecondition,
};
use strata_core::{
    BlueprintId, ChangeTag, Error as CoreError, Filter, MemoryBackend, PartitionKey, ProjectId,
    RawDocument, Result as CoreResult,
};

use strata_store::{
    Blueprint, DefaultSingletonGuard, DocumentModel, DocumentStore, Error, SingletonDefault,
};

// ============================================================================
// FailingBackend - Configurable failure injection
// ============================================================================

/// Backend wrapper that injects failures into batch commits.
///
/// Used for testing the all-or-nothing guarantees of the default guard.
struct FailingBackend {
    inner: MemoryBackend,
    /// If true, fail the next commit (single-shot).
    fail_next_commit: AtomicBool,
}

impl FailingBackend {
    fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            fail_next_commit: AtomicBool::new(false),
        }
    }

    /// Configure the backend to fail the next batch commit.
    fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentBackend for FailingBackend {
    async fn get(&self, partition: &PartitionKey, id: &str) -> CoreResult<Option<RawDocument>> {
        self.inner.get(partition, id).await
    }

    async fn get_if_changed(
        &self,
        partition: &PartitionKey,
        id: &str,
        tag: &ChangeTag,
    ) -> CoreResult<ConditionalRead> {
        self.inner.get_if_changed(partition, id, tag).await
    }

    async fn put(
        &self,
        partition: &PartitionKey,
        id: &str,
        body: Bytes,
        precondition: WritePrecondition,
    ) -> CoreResult<WriteOutcome> {
        self.inner.put(partition, id, body, precondition).await
    }

    async fn delete(&self, partition: &PartitionKey, id: &str) -> CoreResult<Option<RawDocument>> {
        self.inner.delete(partition, id).await
    }

    async fn query(&self, partition: &PartitionKey, filter: &Filter) -> CoreResult<DocumentStream> {
        self.inner.query(partition, filter).await
    }

    async fn commit(&self, partition: &PartitionKey, ops: Vec<BatchOp>) -> CoreResult<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(CoreError::storage("injected commit failure"));
        }
        self.inner.commit(partition, ops).await
    }
}

fn blueprint(project_id: ProjectId, name: &str, is_default: bool) -> Blueprint {
    Blueprint {
        id: BlueprintId::generate(),
        project_id,
        name: name.into(),
        is_default,
        created_at: Utc::now(),
    }
}

async fn defaults_in(
    store: &DocumentStore<Blueprint>,
    partition: &PartitionKey,
) -> Vec<Blueprint> {
    store
        .query_all(partition, &Filter::eq("isDefault", true))
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.document)
        .collect()
}

/// A failed promote+demote batch must leave the partition exactly as it was:
/// the old default stays default, the new document never appears.
#[tokio::test]
async fn test_failed_promotion_changes_nothing() {
    let backend = Arc::new(FailingBackend::new());
    let store: DocumentStore<Blueprint> = DocumentStore::new(backend.clone());
    let guard = DefaultSingletonGuard::new(store.clone());

    let project = ProjectId::generate();
    let partition = PartitionKey::project(&project);

    let old_default = guard
        .upsert_with_default_invariant(blueprint(project, "web", true))
        .await
        .unwrap();

    // The promotion batch fails at commit time.
    backend.fail_next_commit();
    let challenger = blueprint(project, "batch", true);
    let result = guard
        .upsert_with_default_invariant(challenger.clone())
        .await;
    assert!(matches!(result, Err(Error::Storage { .. })));

    // Old default untouched, challenger absent.
    let defaults = defaults_in(&store, &partition).await;
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].id, old_default.document.id);
    assert!(defaults[0].is_default());

    let challenger_read = store
        .try_read(&partition, &challenger.document_id())
        .await
        .unwrap();
    assert!(
        challenger_read.is_none(),
        "a failed batch must not leave the new document behind"
    );
}

/// After a failed promotion the guard still works: retrying the same
/// promotion succeeds once the backend recovers.
#[tokio::test]
async fn test_promotion_succeeds_after_transient_failure() {
    let backend = Arc::new(FailingBackend::new());
    let store: DocumentStore<Blueprint> = DocumentStore::new(backend.clone());
    let guard = DefaultSingletonGuard::new(store.clone());

    let project = ProjectId::generate();
    let partition = PartitionKey::project(&project);

    guard
        .upsert_with_default_invariant(blueprint(project, "web", true))
        .await
        .unwrap();

    backend.fail_next_commit();
    let challenger = blueprint(project, "batch", true);
    let _ = guard
        .upsert_with_default_invariant(challenger.clone())
        .await;

    // Backend recovered; the retry lands atomically.
    let promoted = guard
        .upsert_with_default_invariant(challenger)
        .await
        .unwrap();
    assert!(promoted.document.is_default());

    let defaults = defaults_in(&store, &partition).await;
    assert_eq!(defaults.len(), 1, "exactly one default after recovery");
    assert_eq!(defaults[0].id, promoted.document.id);
}

/// A listing whose opportunistic repair batch fails must still return the
/// (unrepaired) documents rather than surfacing the failure.
#[tokio::test]
async fn test_listing_survives_repair_failure() {
    let backend = Arc::new(FailingBackend::new());
    let store: DocumentStore<Blueprint> = DocumentStore::new(backend.clone());
    let guard = DefaultSingletonGuard::new(store.clone());

    let project = ProjectId::generate();
    let partition = PartitionKey::project(&project);

    // Fabricate the anomalous two-default state around the guard.
    store.create(&blueprint(project, "a", true)).await.unwrap();
    store.create(&blueprint(project, "b", true)).await.unwrap();

    backend.fail_next_commit();
    let listed = guard.list_with_repair(&partition).await.unwrap();

    assert_eq!(listed.len(), 2, "the read itself must not fail");
    assert_eq!(
        listed.iter().filter(|v| v.document.is_default()).count(),
        2,
        "a failed repair leaves the listing unrepaired"
    );

    // The store still holds both defaults; the next repair fixes them.
    assert_eq!(defaults_in(&store, &partition).await.len(), 2);
    assert_eq!(guard.repair_duplicate_defaults(&partition).await.unwrap(), 1);
    assert_eq!(defaults_in(&store, &partition).await.len(), 1);
}
