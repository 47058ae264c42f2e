//! JobStore port - ジョブの正本（source of truth）
//!
//! Pure data access: the store never decides policy, it only guarantees that
//!
//! - every mutation of a single job record is atomic (`modify` is a
//!   compare-and-set: the closure sees the committed record, and nothing is
//!   written unless it returns `Ok`);
//! - dependency edges are inserted together with their cycle check, in the same
//!   critical section;
//! - a batch of jobs and their edges becomes visible all at once.
//!
//! `InMemoryJobStore` implements this with a single mutex. A networked store
//! would implement `modify` as read + conditional write on `Job::version`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{DependencyEdge, EngineError, Job, JobFilter, JobId, JobPatch, JobStatus};

/// A record mutation applied atomically by the store.
pub type Mutation = Box<dyn FnOnce(&mut Job) -> Result<(), EngineError> + Send>;

/// A check run against the committed record right before it is removed.
pub type Precondition = Box<dyn FnOnce(&Job) -> Result<(), EngineError> + Send>;

/// Number of jobs per status.
pub type StatusCounts = BTreeMap<JobStatus, usize>;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record. Fails if the id is taken.
    async fn insert(&self, job: Job) -> Result<Job, EngineError>;

    /// Insert jobs and wire edges in one step: all of it or none of it.
    async fn insert_batch(
        &self,
        jobs: Vec<Job>,
        edges: Vec<DependencyEdge>,
    ) -> Result<Vec<Job>, EngineError>;

    async fn get(&self, id: JobId) -> Result<Job, EngineError>;

    /// Matching jobs ordered by priority desc, created_at asc, id asc.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, EngineError>;

    /// Apply `mutation` to the current record and commit it if it succeeds.
    async fn modify(&self, id: JobId, mutation: Mutation) -> Result<Job, EngineError>;

    /// Remove a job and its outgoing edges. Fails with `HasDependents`
    /// while any job still depends on it, or with whatever `precondition`
    /// returns; both are evaluated atomically with the removal.
    async fn delete(&self, id: JobId, precondition: Precondition) -> Result<Job, EngineError>;

    /// Add `edge` unless it would close a cycle (`CyclicDependency`).
    async fn add_dependency(&self, edge: DependencyEdge) -> Result<(), EngineError>;

    /// Returns whether the edge existed.
    async fn remove_dependency(&self, edge: DependencyEdge) -> Result<bool, EngineError>;

    /// Transitive dependencies of `id`, dependencies first, `id` excluded.
    async fn dependency_closure(&self, id: JobId) -> Result<Vec<JobId>, EngineError>;

    /// Jobs that list `id` as a direct dependency.
    async fn dependents_of(&self, id: JobId) -> Result<Vec<JobId>, EngineError>;

    async fn counts(&self, group_id: Option<&str>) -> Result<StatusCounts, EngineError>;

    async fn update(
        &self,
        id: JobId,
        patch: JobPatch,
        now: DateTime<Utc>,
    ) -> Result<Job, EngineError> {
        self.modify(
            id,
            Box::new(move |job| {
                patch.apply(job, now);
                Ok(())
            }),
        )
        .await
    }
}
