//! Errors - エラー型と分類
//!
//! Every variant except `Corrupted` is an ordinary, recoverable answer to the
//! calling agent. `Corrupted` means the store returned a record that violates an
//! invariant and needs an operator.

use thiserror::Error;

use super::ids::{AgentId, BidId, BlockerId, JobId};
use super::status::JobStatus;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("job {0} already exists")]
    AlreadyExists(JobId),

    #[error("job {job_id} is already locked by {holder}")]
    AlreadyLocked { job_id: JobId, holder: AgentId },

    #[error("agent {agent_id} does not hold the lock on job {job_id}")]
    NotOwner { job_id: JobId, agent_id: AgentId },

    #[error("invalid bid on job {job_id}: {reason}")]
    InvalidBid { job_id: JobId, reason: String },

    #[error("dependency {job_id} -> {depends_on} would create a cycle")]
    CyclicDependency { job_id: JobId, depends_on: JobId },

    #[error("job {job_id} still has dependents: {dependents:?}")]
    HasDependents {
        job_id: JobId,
        dependents: Vec<JobId>,
    },

    #[error("job {job_id} has unresolved blockers: {blockers:?}")]
    BlockerUnresolved {
        job_id: JobId,
        blockers: Vec<BlockerId>,
    },

    #[error("job {job_id} waits on unfinished dependencies: {pending:?}")]
    DependencyNotCompleted { job_id: JobId, pending: Vec<JobId> },

    #[error("job {job_id} exhausted its retries ({attempts}/{max_attempts})")]
    RetriesExhausted {
        job_id: JobId,
        attempts: u32,
        max_attempts: u32,
    },

    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("invalid pheromone deposit on job {job_id}: {reason}")]
    InvalidPheromone { job_id: JobId, reason: String },

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("job generator failed: {0}")]
    Generator(String),

    #[error("store corruption detected on job {job_id}: {detail}")]
    Corrupted { job_id: JobId, detail: String },
}

impl EngineError {
    pub fn job_not_found(id: JobId) -> Self {
        Self::NotFound {
            kind: "job",
            id: id.to_string(),
        }
    }

    pub fn bid_not_found(id: BidId) -> Self {
        Self::NotFound {
            kind: "bid",
            id: id.to_string(),
        }
    }

    pub fn blocker_not_found(id: BlockerId) -> Self {
        Self::NotFound {
            kind: "blocker",
            id: id.to_string(),
        }
    }

    /// Only store corruption stops the engine; everything else is an answer.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Corrupted { .. })
    }

    /// Lost a race for a job another agent owns.
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::AlreadyLocked { .. })
    }
}
