//! Explicitly constructed registry of per-kind store handles.
//!
//! The registry is built once at process startup from an injected backend
//! and handed to command handlers; there is no hidden global state and no
//! lazy type-keyed container cache. Every handle the rest of the system is
//! allowed to hold comes from here, which is also where the invariant
//! wrappers are wired in: blueprints are only reachable through the default
//! guard, grants only through the optimistic mutator.

use std::sync::Arc;

use strata_core::backend::DocumentBackend;

use crate::cache::{CacheConfig, ConditionalCache};
use crate::default_guard::DefaultSingletonGuard;
use crate::model::{Blueprint, DocumentValidator, Grants, Project};
use crate::mutator::{MutatorConfig, OptimisticMutator};
use crate::notifier::{ChangeListener, SubscriptionNotifier};
use crate::recurrence::{RecurrenceMatcher, Schedule, ScheduleValidator};
use crate::store::DocumentStore;

/// Process-wide registry of typed store handles.
///
/// Construct with [`StoreRegistry::builder`] during startup, then share by
/// reference (or clone the individual handles, which is cheap).
pub struct StoreRegistry {
    projects: DocumentStore<Project>,
    schedules: DocumentStore<Schedule>,
    blueprint_guard: DefaultSingletonGuard<Blueprint>,
    grants_mutator: OptimisticMutator<Grants>,
    project_cache: ConditionalCache<Project>,
    matcher: RecurrenceMatcher,
    notifier: SubscriptionNotifier,
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry").finish_non_exhaustive()
    }
}

impl StoreRegistry {
    /// Starts building a registry over the given backend.
    #[must_use]
    pub fn builder(backend: Arc<dyn DocumentBackend>) -> StoreRegistryBuilder {
        StoreRegistryBuilder {
            backend,
            notifier: SubscriptionNotifier::new(),
            mutator_config: MutatorConfig::default(),
            cache_config: CacheConfig::default(),
            schedule_validator: Arc::new(ScheduleValidator),
        }
    }

    /// Typed handle for project documents.
    #[must_use]
    pub fn projects(&self) -> &DocumentStore<Project> {
        &self.projects
    }

    /// Cached single-item reads of project documents.
    #[must_use]
    pub fn project_cache(&self) -> &ConditionalCache<Project> {
        &self.project_cache
    }

    /// Invariant-preserving access to blueprint documents.
    ///
    /// There is deliberately no plain blueprint store handle: writing
    /// blueprints around the guard can break the default invariant.
    #[must_use]
    pub fn blueprints(&self) -> &DefaultSingletonGuard<Blueprint> {
        &self.blueprint_guard
    }

    /// Race-safe access to grants documents.
    ///
    /// There is deliberately no plain grants store handle: overwriting a
    /// holder wholesale can drop concurrent membership changes.
    #[must_use]
    pub fn grants(&self) -> &OptimisticMutator<Grants> {
        &self.grants_mutator
    }

    /// Typed handle for schedule documents.
    #[must_use]
    pub fn schedules(&self) -> &DocumentStore<Schedule> {
        &self.schedules
    }

    /// Due-schedule matching for the periodic trigger.
    #[must_use]
    pub fn recurrence(&self) -> &RecurrenceMatcher {
        &self.matcher
    }

    /// The shared post-write notifier.
    #[must_use]
    pub fn notifier(&self) -> &SubscriptionNotifier {
        &self.notifier
    }
}

/// Builder for [`StoreRegistry`].
pub struct StoreRegistryBuilder {
    backend: Arc<dyn DocumentBackend>,
    notifier: SubscriptionNotifier,
    mutator_config: MutatorConfig,
    cache_config: CacheConfig,
    schedule_validator: Arc<dyn DocumentValidator<Schedule>>,
}

impl StoreRegistryBuilder {
    /// Registers a change listener; listeners fire in registration order.
    #[must_use]
    pub fn with_listener(self, listener: Arc<dyn ChangeListener>) -> Self {
        self.notifier.register(listener);
        self
    }

    /// Overrides the optimistic-mutator retry budget.
    #[must_use]
    pub fn with_mutator_config(mut self, config: MutatorConfig) -> Self {
        self.mutator_config = config;
        self
    }

    /// Overrides the conditional-cache tuning.
    #[must_use]
    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Replaces the schedule validator.
    #[must_use]
    pub fn with_schedule_validator(
        mut self,
        validator: Arc<dyn DocumentValidator<Schedule>>,
    ) -> Self {
        self.schedule_validator = validator;
        self
    }

    /// Builds the registry, wiring every handle to the shared backend and
    /// notifier.
    #[must_use]
    pub fn build(self) -> StoreRegistry {
        let projects: DocumentStore<Project> =
            DocumentStore::new(self.backend.clone()).with_notifier(self.notifier.clone());
        let blueprints: DocumentStore<Blueprint> =
            DocumentStore::new(self.backend.clone()).with_notifier(self.notifier.clone());
        let grants: DocumentStore<Grants> =
            DocumentStore::new(self.backend.clone()).with_notifier(self.notifier.clone());
        let schedules: DocumentStore<Schedule> = DocumentStore::new(self.backend)
            .with_validator(self.schedule_validator)
            .with_notifier(self.notifier.clone());

        StoreRegistry {
            project_cache: ConditionalCache::new(projects.clone(), self.cache_config),
            projects,
            blueprint_guard: DefaultSingletonGuard::new(blueprints),
            grants_mutator: OptimisticMutator::with_config(grants, self.mutator_config),
            matcher: RecurrenceMatcher::new(schedules.clone()),
            schedules,
            notifier: self.notifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocumentModel, Membership, Role};
    use crate::mutator::MutationOutcome;
    use crate::notifier::RecordingListener;
    use chrono::Utc;
    use strata_core::{MemoryBackend, ProjectId, TenantId, UserId};

    #[tokio::test]
    async fn registry_wires_every_handle_to_one_backend() -> crate::error::Result<()> {
        let backend = Arc::new(MemoryBackend::new());
        let recorder = Arc::new(RecordingListener::new());
        let registry = StoreRegistry::builder(backend)
            .with_listener(recorder.clone())
            .build();

        let tenant = TenantId::new_unchecked("acme");
        let project = Project {
            id: ProjectId::generate(),
            tenant_id: tenant.clone(),
            name: "data-platform".into(),
            created_at: Utc::now(),
        };
        registry.projects().create(&project).await?;

        // The cache reads through the same backend.
        let cached = registry
            .project_cache()
            .get_or_fetch(&project.partition_key(), &project.document_id())
            .await?;
        assert_eq!(cached, project);

        // The mutator shares the notifier with every other handle.
        let holder = Grants::new(UserId::generate(), tenant);
        registry
            .grants()
            .mutate(holder, |grants| {
                grants.grant(Membership {
                    project_id: ProjectId::generate(),
                    role: Role::Reader,
                    granted_at: Utc::now(),
                });
                MutationOutcome::Apply
            })
            .await?;

        assert!(
            recorder.events().len() >= 2,
            "writes through any handle reach the shared listeners"
        );
        Ok(())
    }

    #[tokio::test]
    async fn schedule_validation_is_wired_by_default() {
        let registry = StoreRegistry::builder(Arc::new(MemoryBackend::new())).build();

        let bad = Schedule {
            id: strata_core::ScheduleId::generate(),
            project_id: ProjectId::generate(),
            name: "out-of-range".into(),
            days_of_week: std::iter::once(crate::recurrence::DayOfWeek::Monday).collect(),
            utc_hour: 24,
            utc_minute: 0,
            enabled: true,
            recurring: true,
            created_at: Utc::now(),
        };

        let result = registry.schedules().create(&bad).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::Validation { .. })
        ));
    }
}
