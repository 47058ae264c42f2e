//! DependencyGraph - 依存関係とブロッカー
//!
//! Edges and their cycle check live in the store; this component answers the
//! readiness questions on top of them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::context::EngineContext;
use crate::domain::{
    AgentId, Blocker, BlockerId, BlockerKind, DependencyEdge, EngineError, Job, JobFilter, JobId,
    JobStatus,
};

/// Why a job can or cannot start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readiness {
    /// Direct dependencies that have not completed.
    pub pending_dependencies: Vec<JobId>,
    pub unresolved_blockers: Vec<BlockerId>,
}

impl Readiness {
    pub fn can_start(&self) -> bool {
        self.pending_dependencies.is_empty() && self.unresolved_blockers.is_empty()
    }
}

#[derive(Clone)]
pub struct DependencyGraph {
    ctx: Arc<EngineContext>,
}

impl DependencyGraph {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// `job_id` waits for `depends_on`. Rejected with `CyclicDependency` if
    /// `depends_on` already (transitively) waits for `job_id`.
    pub async fn add_dependency(
        &self,
        job_id: JobId,
        depends_on: JobId,
    ) -> Result<DependencyEdge, EngineError> {
        let edge = DependencyEdge::new(job_id, depends_on);
        self.ctx.store.add_dependency(edge).await?;
        info!(job_id = %job_id, depends_on = %depends_on, "dependency added");
        Ok(edge)
    }

    pub async fn remove_dependency(
        &self,
        job_id: JobId,
        depends_on: JobId,
    ) -> Result<bool, EngineError> {
        let removed = self
            .ctx
            .store
            .remove_dependency(DependencyEdge::new(job_id, depends_on))
            .await?;
        if removed {
            info!(job_id = %job_id, depends_on = %depends_on, "dependency removed");
        }
        Ok(removed)
    }

    pub async fn readiness(&self, job_id: JobId) -> Result<Readiness, EngineError> {
        let job = self.ctx.load(job_id).await?;
        self.readiness_of(&job, &BTreeMap::new()).await
    }

    /// Every direct dependency completed and every blocker resolved.
    pub async fn can_start(&self, job_id: JobId) -> Result<bool, EngineError> {
        Ok(self.readiness(job_id).await?.can_start())
    }

    /// Transitive dependencies, each listed after everything it depends on.
    pub async fn dependency_chain(&self, job_id: JobId) -> Result<Vec<Job>, EngineError> {
        let ids = self.ctx.store.dependency_closure(job_id).await?;
        let mut chain = Vec::with_capacity(ids.len());
        for id in ids {
            chain.push(self.ctx.store.get(id).await?);
        }
        Ok(chain)
    }

    /// Jobs of the group that a worker could pick up right now: effectively
    /// pending, past any retry backoff, and startable.
    pub async fn ready_to_start(&self, group_id: &str) -> Result<Vec<Job>, EngineError> {
        let now = self.ctx.now();
        let jobs = self.ctx.store.list(&JobFilter::new().group(group_id)).await?;
        for job in &jobs {
            job.check_integrity()?;
        }

        let statuses: BTreeMap<JobId, JobStatus> =
            jobs.iter().map(|job| (job.id, job.status)).collect();

        let mut ready = Vec::new();
        for job in jobs.iter().filter(|job| is_candidate(job, now)) {
            if self.readiness_of(job, &statuses).await?.can_start() {
                ready.push(job.clone());
            }
        }
        Ok(ready)
    }

    pub async fn raise_blocker(
        &self,
        job_id: JobId,
        kind: BlockerKind,
        description: &str,
        raised_by: &AgentId,
    ) -> Result<Blocker, EngineError> {
        let now = self.ctx.now();
        let blocker = Blocker::new(
            self.ctx.ids.generate_blocker_id(),
            job_id,
            kind,
            description,
            raised_by.clone(),
            now,
        );
        let raised = blocker.clone();
        self.ctx
            .store
            .modify(job_id, Box::new(move |job| job.raise_blocker(raised, now)))
            .await?;
        info!(job_id = %job_id, blocker_id = %blocker.id, raised_by = %raised_by, "blocker raised");
        Ok(blocker)
    }

    pub async fn resolve_blocker(
        &self,
        job_id: JobId,
        blocker_id: BlockerId,
        resolved_by: &AgentId,
    ) -> Result<Blocker, EngineError> {
        let now = self.ctx.now();
        let agent = resolved_by.clone();
        let job = self
            .ctx
            .store
            .modify(
                job_id,
                Box::new(move |job| job.resolve_blocker(blocker_id, &agent, now).map(|_| ())),
            )
            .await?;
        let blocker = job
            .blockers
            .iter()
            .find(|blocker| blocker.id == blocker_id)
            .cloned()
            .ok_or_else(|| EngineError::blocker_not_found(blocker_id))?;
        info!(job_id = %job_id, blocker_id = %blocker_id, status = %job.status, "blocker resolved");
        Ok(blocker)
    }

    /// Flag every unfinished direct dependent of a job that gave up.
    /// Returns the dependents that were blocked.
    pub(crate) async fn block_dependents_of(
        &self,
        failed: JobId,
        raised_by: &AgentId,
    ) -> Result<Vec<JobId>, EngineError> {
        let mut blocked = Vec::new();
        for dependent in self.ctx.store.dependents_of(failed).await? {
            let description = format!("dependency {failed} failed permanently");
            match self
                .raise_blocker(
                    dependent,
                    BlockerKind::FailedDependency { dependency: failed },
                    &description,
                    raised_by,
                )
                .await
            {
                Ok(_) => blocked.push(dependent),
                // Already finished; nothing to hold back.
                Err(EngineError::InvalidTransition { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(blocked)
    }

    /// Resolve the failed-dependency blockers a recovered job left on its dependents.
    pub(crate) async fn release_dependents_of(
        &self,
        recovered: JobId,
        resolved_by: &AgentId,
    ) -> Result<(), EngineError> {
        for dependent in self.ctx.store.dependents_of(recovered).await? {
            let job = self.ctx.store.get(dependent).await?;
            let stale = job.blockers.iter().filter(|blocker| {
                !blocker.resolved
                    && blocker.kind == BlockerKind::FailedDependency {
                        dependency: recovered,
                    }
            });
            for blocker in stale {
                if let Err(err) = self.resolve_blocker(dependent, blocker.id, resolved_by).await {
                    warn!(job_id = %dependent, blocker_id = %blocker.id, error = %err, "could not release blocker");
                }
            }
        }
        Ok(())
    }

    async fn readiness_of(
        &self,
        job: &Job,
        known: &BTreeMap<JobId, JobStatus>,
    ) -> Result<Readiness, EngineError> {
        let mut pending = BTreeSet::new();
        for &dep in &job.dependencies {
            let status = match known.get(&dep) {
                Some(status) => *status,
                None => self.ctx.store.get(dep).await?.status,
            };
            if status != JobStatus::Completed {
                pending.insert(dep);
            }
        }
        Ok(Readiness {
            pending_dependencies: pending.into_iter().collect(),
            unresolved_blockers: job.unresolved_blockers(),
        })
    }
}

fn is_candidate(job: &Job, now: DateTime<Utc>) -> bool {
    job.effective_status(now) == JobStatus::Pending && job.is_due(now)
}
