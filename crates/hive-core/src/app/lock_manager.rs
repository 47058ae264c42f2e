//! LockManager - リース付きジョブロック
//!
//! Every call is one `JobStore::modify`, so acquisition is a single
//! compare-and-set on the record no matter how many agents race for it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::context::EngineContext;
use crate::domain::{AgentId, EngineError, Job, JobId, LockInfo, LockStatus};

#[derive(Clone)]
pub struct LockManager {
    ctx: Arc<EngineContext>,
}

impl LockManager {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Take (or renew) the lease on a job. `ttl` defaults to `lock_ttl_secs`.
    pub async fn acquire(
        &self,
        job_id: JobId,
        agent_id: &AgentId,
        agent_name: &str,
        ttl: Option<Duration>,
    ) -> Result<LockInfo, EngineError> {
        let ttl = ttl.unwrap_or_else(|| self.ctx.config.lock_ttl());
        let now = self.ctx.now();
        let agent = agent_id.clone();
        let name = agent_name.to_string();

        let job = self
            .ctx
            .store
            .modify(
                job_id,
                Box::new(move |job| job.try_lock(&agent, &name, ttl, now).map(|_| ())),
            )
            .await?;

        info!(job_id = %job_id, agent_id = %agent_id, ttl_secs = ttl.as_secs(), "lock acquired");
        held_lock(&job)
    }

    /// Extend a lease the caller already holds. Unlike `acquire`, never takes
    /// over a free or expired slot.
    pub async fn renew(
        &self,
        job_id: JobId,
        agent_id: &AgentId,
        ttl: Option<Duration>,
    ) -> Result<LockInfo, EngineError> {
        let ttl = ttl.unwrap_or_else(|| self.ctx.config.lock_ttl());
        let now = self.ctx.now();
        let agent = agent_id.clone();

        let job = self
            .ctx
            .store
            .modify(
                job_id,
                Box::new(move |job| {
                    let name = job.ensure_holder(&agent, now)?.agent_name.clone();
                    job.try_lock(&agent, &name, ttl, now).map(|_| ())
                }),
            )
            .await?;

        debug!(job_id = %job_id, agent_id = %agent_id, "lock renewed");
        held_lock(&job)
    }

    pub async fn release(&self, job_id: JobId, agent_id: &AgentId) -> Result<Job, EngineError> {
        let now = self.ctx.now();
        let agent = agent_id.clone();
        let job = self
            .ctx
            .store
            .modify(job_id, Box::new(move |job| job.unlock(&agent, now)))
            .await?;
        info!(job_id = %job_id, agent_id = %agent_id, status = %job.status, "lock released");
        Ok(job)
    }

    /// Lazily evaluated: an expired lease reads as unlocked.
    pub async fn is_locked(&self, job_id: JobId) -> Result<LockStatus, EngineError> {
        let job = self.ctx.store.get(job_id).await?;
        Ok(LockStatus::from_job(&job, self.ctx.now()))
    }
}

fn held_lock(job: &Job) -> Result<LockInfo, EngineError> {
    job.lock.clone().ok_or_else(|| EngineError::Corrupted {
        job_id: job.id,
        detail: "lock missing right after acquisition".into(),
    })
}
