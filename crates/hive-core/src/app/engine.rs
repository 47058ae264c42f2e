//! Engine - エージェント向けのファサード
//!
//! Owns the four coordination components and the job lifecycle operations
//! that combine them (start, complete, fail, retry, plan import).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::context::EngineContext;
use super::dependency_graph::{DependencyGraph, Readiness};
use super::lock_manager::LockManager;
use super::market::BiddingMarket;
use super::pheromone_field::{PheromoneField, PheromoneMatch};
use super::retry::RetryPolicy;
use super::status::GroupStatus;
use crate::config::EngineConfig;
use crate::domain::{
    AcceptedBid, AgentId, Bid, BidId, Blocker, BlockerId, BlockerKind, DependencyEdge, EngineError,
    Job, JobFilter, JobId, JobPatch, JobSpec, JobStatus, LockInfo, LockStatus, PheromoneEntry,
    PheromoneReading, Plan, PlanImport,
};
use crate::ports::JobGenerator;

/// What happened to a job after a reported failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailureDisposition {
    /// Back to pending; schedulable again at `not_before`.
    Retrying {
        attempts: u32,
        not_before: Option<DateTime<Utc>>,
    },
    /// Retry budget spent. Unfinished direct dependents were blocked.
    Exhausted { blocked_dependents: Vec<JobId> },
}

#[derive(Clone)]
pub struct Engine {
    ctx: Arc<EngineContext>,
    locks: LockManager,
    market: BiddingMarket,
    pheromones: PheromoneField,
    graph: DependencyGraph,
    retry: RetryPolicy,
}

impl Engine {
    pub(crate) fn from_context(ctx: EngineContext) -> Self {
        let retry = RetryPolicy::from_config(&ctx.config.retry);
        let ctx = Arc::new(ctx);
        Self {
            locks: LockManager::new(Arc::clone(&ctx)),
            market: BiddingMarket::new(Arc::clone(&ctx)),
            pheromones: PheromoneField::new(Arc::clone(&ctx)),
            graph: DependencyGraph::new(Arc::clone(&ctx)),
            retry,
            ctx,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.ctx.now()
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn market(&self) -> &BiddingMarket {
        &self.market
    }

    pub fn pheromones(&self) -> &PheromoneField {
        &self.pheromones
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    // ---------------------------------------------------------------
    // Job records
    // ---------------------------------------------------------------

    pub async fn create_job(&self, spec: JobSpec) -> Result<Job, EngineError> {
        let now = self.ctx.now();
        let job = Job::new(
            self.ctx.ids.generate_job_id(),
            spec,
            self.retry.max_attempts,
            now,
        );
        let job = self.ctx.store.insert(job).await?;
        info!(job_id = %job.id, group_id = %job.group_id, title = %job.title, "job created");
        Ok(job)
    }

    /// Create every job of the plan and wire its edges in one atomic batch.
    /// Nothing becomes visible if any edge would close a cycle.
    pub async fn create_jobs_from_plan(&self, plan: Plan) -> Result<PlanImport, EngineError> {
        plan.validate()?;
        let now = self.ctx.now();

        let mut keys = BTreeMap::new();
        let mut jobs = Vec::with_capacity(plan.jobs.len());
        for planned in &plan.jobs {
            let id = self.ctx.ids.generate_job_id();
            keys.insert(planned.key.clone(), id);
            jobs.push(Job::new(
                id,
                planned.to_spec(&plan.group_id),
                self.retry.max_attempts,
                now,
            ));
        }

        let mut edges = Vec::new();
        for (job_key, dep_key) in plan.keyed_edges() {
            let (Some(&job_id), Some(&depends_on)) = (keys.get(&job_key), keys.get(&dep_key)) else {
                return Err(EngineError::InvalidPlan(format!(
                    "edge {job_key} -> {dep_key} references an unknown key"
                )));
            };
            edges.push(DependencyEdge::new(job_id, depends_on));
        }

        let jobs = self.ctx.store.insert_batch(jobs, edges.clone()).await?;
        info!(
            group_id = %plan.group_id,
            jobs = jobs.len(),
            edges = edges.len(),
            "plan imported"
        );
        Ok(PlanImport {
            jobs,
            dependency_edges: edges,
            keys,
        })
    }

    /// Ask a generator for a plan and import it.
    pub async fn import_plan_from(
        &self,
        generator: &dyn JobGenerator,
        source: &str,
    ) -> Result<PlanImport, EngineError> {
        let plan = generator.generate(source).await?;
        self.create_jobs_from_plan(plan).await
    }

    /// Fetch a job as it reads now (expired leases dropped); a record that
    /// breaks a structural invariant is reported as `Corrupted`.
    pub async fn get_job(&self, job_id: JobId) -> Result<Job, EngineError> {
        let job = self.ctx.load(job_id).await?;
        Ok(job.observed_at(self.ctx.now()))
    }

    /// Jobs matching `filter`. The status filter applies to the status as it
    /// reads now, so a job whose lease ran out is listed as pending.
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, EngineError> {
        let now = self.ctx.now();
        let stored = JobFilter {
            status: None,
            ..filter.clone()
        };
        let jobs = self.ctx.store.list(&stored).await?;
        Ok(jobs
            .into_iter()
            .map(|job| job.observed_at(now))
            .filter(|job| filter.matches(job))
            .collect())
    }

    pub async fn update_job(&self, job_id: JobId, patch: JobPatch) -> Result<Job, EngineError> {
        let job = self.ctx.store.update(job_id, patch, self.ctx.now()).await?;
        debug!(job_id = %job_id, version = job.version, "job updated");
        Ok(job)
    }

    /// Remove a job. Refused while other jobs depend on it or while a live
    /// lock is held on it.
    pub async fn delete_job(&self, job_id: JobId) -> Result<Job, EngineError> {
        let now = self.ctx.now();
        let job = self
            .ctx
            .store
            .delete(
                job_id,
                Box::new(move |job| match job.live_lock(now) {
                    Some(lock) => Err(EngineError::AlreadyLocked {
                        job_id: job.id,
                        holder: lock.agent_id.clone(),
                    }),
                    None => Ok(()),
                }),
            )
            .await?;
        info!(job_id = %job_id, "job deleted");
        Ok(job)
    }

    /// Cancel a job. Anyone may cancel an unlocked job; a locked or running
    /// job can only be cancelled by its lock holder.
    pub async fn cancel_job(
        &self,
        job_id: JobId,
        agent_id: Option<&AgentId>,
    ) -> Result<Job, EngineError> {
        let now = self.ctx.now();
        let agent = agent_id.cloned();
        let job = self
            .ctx
            .store
            .modify(job_id, Box::new(move |job| job.cancel(agent.as_ref(), now)))
            .await?;
        info!(job_id = %job_id, "job cancelled");
        Ok(job)
    }

    // ---------------------------------------------------------------
    // Execution lifecycle
    // ---------------------------------------------------------------

    /// Locked -> in_progress for the lock holder, once every dependency has
    /// completed and no blocker is open.
    pub async fn start_job(&self, job_id: JobId, agent_id: &AgentId) -> Result<Job, EngineError> {
        let snapshot = self.ctx.load(job_id).await?;
        let mut completed = BTreeSet::new();
        for &dep in &snapshot.dependencies {
            if self.ctx.store.get(dep).await?.status == JobStatus::Completed {
                completed.insert(dep);
            }
        }

        let now = self.ctx.now();
        let agent = agent_id.clone();
        let job = self
            .ctx
            .store
            .modify(
                job_id,
                Box::new(move |job| {
                    // Edges added since the snapshot count as unfinished.
                    let pending: Vec<JobId> = job
                        .dependencies
                        .iter()
                        .filter(|dep| !completed.contains(*dep))
                        .copied()
                        .collect();
                    job.start(&agent, &pending, now)
                }),
            )
            .await?;
        info!(job_id = %job_id, agent_id = %agent_id, attempt = job.attempts, "job started");
        Ok(job)
    }

    /// In_progress -> completed. Releases the lock, deposits the completion
    /// pheromone and lifts failed-dependency blockers this job had caused.
    pub async fn complete_job(&self, job_id: JobId, agent_id: &AgentId) -> Result<Job, EngineError> {
        let now = self.ctx.now();
        let agent = agent_id.clone();
        let signal = self.ctx.config.completion_pheromone.clone();
        let amount = self.ctx.config.completion_pheromone_amount;
        let decay_rate = self.ctx.config.default_decay_rate;
        let max = self.ctx.config.max_pheromone_intensity;

        let job = self
            .ctx
            .store
            .modify(
                job_id,
                Box::new(move |job| {
                    job.complete(&agent, now)?;
                    job.deposit_pheromone(&signal, amount, decay_rate, max, now)?;
                    Ok(())
                }),
            )
            .await?;
        info!(job_id = %job_id, agent_id = %agent_id, "job completed");

        self.graph.release_dependents_of(job_id, agent_id).await?;
        Ok(job)
    }

    /// In_progress -> failed, then straight back to pending (with backoff)
    /// while the retry budget lasts.
    pub async fn fail_job(
        &self,
        job_id: JobId,
        agent_id: &AgentId,
        error: &str,
    ) -> Result<FailureDisposition, EngineError> {
        let now = self.ctx.now();
        let agent = agent_id.clone();
        let message = error.to_string();
        let policy = self.retry.clone();

        let job = self
            .ctx
            .store
            .modify(
                job_id,
                Box::new(move |job| {
                    job.fail(&agent, message, now)?;
                    if job.retries_remaining() {
                        let delay = policy.next_delay(job.attempts);
                        job.requeue(Some(backoff_deadline(now, delay)), now)?;
                    }
                    Ok(())
                }),
            )
            .await?;

        if job.status != JobStatus::Failed {
            warn!(
                job_id = %job_id,
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                error,
                "job failed, retry scheduled"
            );
            return Ok(FailureDisposition::Retrying {
                attempts: job.attempts,
                not_before: job.not_before,
            });
        }

        warn!(job_id = %job_id, attempts = job.attempts, error, "job failed permanently");
        let blocked_dependents = self.graph.block_dependents_of(job_id, agent_id).await?;
        Ok(FailureDisposition::Exhausted { blocked_dependents })
    }

    /// Manually put a failed job back in the queue. Fails with
    /// `RetriesExhausted` unless `max_attempts` was raised first.
    pub async fn retry_job(&self, job_id: JobId) -> Result<Job, EngineError> {
        let now = self.ctx.now();
        let job = self
            .ctx
            .store
            .modify(job_id, Box::new(move |job| job.requeue(None, now)))
            .await?;
        info!(job_id = %job_id, "job requeued");
        Ok(job)
    }

    pub async fn group_status(&self, group_id: &str) -> Result<GroupStatus, EngineError> {
        let now = self.ctx.now();
        let mut counts = self.ctx.store.counts(Some(group_id)).await?;
        for held in [JobStatus::Locked, JobStatus::InProgress] {
            let lapsed = self
                .ctx
                .store
                .list(&JobFilter::new().group(group_id).status(held))
                .await?
                .iter()
                .filter(|job| job.live_lock(now).is_none())
                .count();
            if lapsed > 0 {
                *counts.entry(held).or_default() -= lapsed;
                *counts.entry(JobStatus::Pending).or_default() += lapsed;
            }
        }
        Ok(GroupStatus::from_counts(group_id, &counts))
    }

    // ---------------------------------------------------------------
    // Agent operations (delegating to the components)
    // ---------------------------------------------------------------

    pub async fn lock_job(
        &self,
        job_id: JobId,
        agent_id: &AgentId,
        agent_name: &str,
        ttl: Option<std::time::Duration>,
    ) -> Result<LockInfo, EngineError> {
        self.locks.acquire(job_id, agent_id, agent_name, ttl).await
    }

    pub async fn renew_lock(
        &self,
        job_id: JobId,
        agent_id: &AgentId,
        ttl: Option<std::time::Duration>,
    ) -> Result<LockInfo, EngineError> {
        self.locks.renew(job_id, agent_id, ttl).await
    }

    pub async fn unlock_job(&self, job_id: JobId, agent_id: &AgentId) -> Result<Job, EngineError> {
        self.locks.release(job_id, agent_id).await
    }

    pub async fn is_job_locked(&self, job_id: JobId) -> Result<LockStatus, EngineError> {
        self.locks.is_locked(job_id).await
    }

    pub async fn add_bid(
        &self,
        job_id: JobId,
        agent_id: &AgentId,
        agent_name: &str,
        amount: f64,
    ) -> Result<Bid, EngineError> {
        self.market.add_bid(job_id, agent_id, agent_name, amount).await
    }

    pub async fn accept_bid(&self, job_id: JobId, bid_id: BidId) -> Result<AcceptedBid, EngineError> {
        self.market.accept_bid(job_id, bid_id).await
    }

    pub async fn list_bids(&self, job_id: JobId) -> Result<Vec<Bid>, EngineError> {
        self.market.list_bids(job_id).await
    }

    pub async fn deposit_pheromone(
        &self,
        job_id: JobId,
        signal: &str,
        amount: f64,
        decay_rate: Option<f64>,
    ) -> Result<PheromoneEntry, EngineError> {
        self.pheromones.deposit(job_id, signal, amount, decay_rate).await
    }

    pub async fn get_pheromones(&self, job_id: JobId) -> Result<Vec<PheromoneReading>, EngineError> {
        self.pheromones.readings(job_id).await
    }

    pub async fn search_jobs_by_pheromone(
        &self,
        signal: &str,
        min_intensity: f64,
    ) -> Result<Vec<PheromoneMatch>, EngineError> {
        self.pheromones.search(signal, min_intensity).await
    }

    pub async fn add_dependency(
        &self,
        job_id: JobId,
        depends_on: JobId,
    ) -> Result<DependencyEdge, EngineError> {
        self.graph.add_dependency(job_id, depends_on).await
    }

    pub async fn remove_dependency(
        &self,
        job_id: JobId,
        depends_on: JobId,
    ) -> Result<bool, EngineError> {
        self.graph.remove_dependency(job_id, depends_on).await
    }

    pub async fn can_start(&self, job_id: JobId) -> Result<bool, EngineError> {
        self.graph.can_start(job_id).await
    }

    pub async fn readiness(&self, job_id: JobId) -> Result<Readiness, EngineError> {
        self.graph.readiness(job_id).await
    }

    pub async fn ready_to_start(&self, group_id: &str) -> Result<Vec<Job>, EngineError> {
        self.graph.ready_to_start(group_id).await
    }

    pub async fn dependency_chain(&self, job_id: JobId) -> Result<Vec<Job>, EngineError> {
        self.graph.dependency_chain(job_id).await
    }

    pub async fn raise_blocker(
        &self,
        job_id: JobId,
        description: &str,
        raised_by: &AgentId,
    ) -> Result<Blocker, EngineError> {
        self.graph
            .raise_blocker(job_id, BlockerKind::Manual, description, raised_by)
            .await
    }

    pub async fn resolve_blocker(
        &self,
        job_id: JobId,
        blocker_id: BlockerId,
        resolved_by: &AgentId,
    ) -> Result<Blocker, EngineError> {
        self.graph
            .resolve_blocker(job_id, blocker_id, resolved_by)
            .await
    }
}

fn backoff_deadline(now: DateTime<Utc>, delay: std::time::Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
