//! Job record and lifecycle.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bid::{Bid, BidState};
use super::blocker::Blocker;
use super::errors::EngineError;
use super::ids::{AgentId, JobId};
use super::lock::LockInfo;
use super::pheromone::PheromoneEntry;
use super::status::JobStatus;

/// Input for creating a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub group_id: String,
    pub title: String,

    #[serde(default)]
    pub description: String,

    /// Higher is more urgent.
    #[serde(default)]
    pub priority: i64,

    /// Free-form payload for the executor (tool hints, inputs, ...).
    #[serde(default)]
    pub metadata: serde_json::Value,

    /// Overrides the configured retry budget.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl JobSpec {
    pub fn new(group_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            title: title.into(),
            description: String::new(),
            priority: 0,
            metadata: serde_json::Value::Null,
            max_attempts: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// The authoritative job record.
///
/// Lock, bids, blockers and pheromones are embedded so a single record
/// mutation covers each of them atomically. Status only changes through
/// `transition`, which enforces the table in `JobStatus::can_transition_to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub group_id: String,
    pub title: String,
    pub description: String,
    pub status: JobStatus,
    pub priority: i64,
    pub dependencies: BTreeSet<JobId>,
    pub blockers: Vec<Blocker>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lock: Option<LockInfo>,
    pub bids: Vec<Bid>,
    pub pheromones: BTreeMap<String, PheromoneEntry>,
    pub metadata: serde_json::Value,

    /// Number of times execution was started.
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,

    /// Retry backoff: not schedulable before this instant.
    pub not_before: Option<DateTime<Utc>>,

    /// When the current lock holder started its run. Kept while a blocker
    /// interrupts the run, cleared once the lock changes hands.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// Bumped by the store on every committed mutation.
    pub version: u64,
}

impl Job {
    pub fn new(id: JobId, spec: JobSpec, default_max_attempts: u32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            group_id: spec.group_id,
            title: spec.title,
            description: spec.description,
            status: JobStatus::Pending,
            priority: spec.priority,
            dependencies: BTreeSet::new(),
            blockers: Vec::new(),
            created_at: now,
            updated_at: now,
            lock: None,
            bids: Vec::new(),
            pheromones: BTreeMap::new(),
            metadata: spec.metadata,
            attempts: 0,
            max_attempts: spec.max_attempts.unwrap_or(default_max_attempts),
            last_error: None,
            not_before: None,
            started_at: None,
            version: 0,
        }
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Validated status change.
    pub fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch(now);
        Ok(())
    }

    pub fn retries_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_none_or(|at| at <= now)
    }

    /// Locked -> InProgress for the lock holder.
    ///
    /// `pending_dependencies` are the direct dependencies the caller found not
    /// completed; completion is terminal, so the check cannot go stale.
    pub fn start(
        &mut self,
        agent_id: &AgentId,
        pending_dependencies: &[JobId],
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.ensure_holder(agent_id, now)?;
        if !pending_dependencies.is_empty() {
            return Err(EngineError::DependencyNotCompleted {
                job_id: self.id,
                pending: pending_dependencies.to_vec(),
            });
        }
        if self.has_unresolved_blockers() {
            return Err(EngineError::BlockerUnresolved {
                job_id: self.id,
                blockers: self.unresolved_blockers(),
            });
        }
        if self.status != JobStatus::Locked {
            return Err(EngineError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: JobStatus::InProgress,
            });
        }
        self.transition(JobStatus::InProgress, now)?;
        self.attempts += 1;
        self.not_before = None;
        self.started_at = Some(now);
        Ok(())
    }

    /// Whether the holder's run is underway, possibly interrupted by a blocker.
    pub fn is_running(&self) -> bool {
        match self.status {
            JobStatus::InProgress => true,
            JobStatus::Blocked => self.started_at.is_some(),
            _ => false,
        }
    }

    /// InProgress (or an interrupted run) -> Completed; the lock is released.
    pub fn complete(&mut self, agent_id: &AgentId, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.ensure_holder(agent_id, now)?;
        self.ensure_running(JobStatus::Completed)?;
        self.transition(JobStatus::Completed, now)?;
        self.lock = None;
        self.started_at = None;
        self.last_error = None;
        Ok(())
    }

    /// InProgress (or an interrupted run) -> Failed; the lock is released.
    pub fn fail(
        &mut self,
        agent_id: &AgentId,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.ensure_holder(agent_id, now)?;
        self.ensure_running(JobStatus::Failed)?;
        self.transition(JobStatus::Failed, now)?;
        self.lock = None;
        self.started_at = None;
        self.last_error = Some(error.into());
        Ok(())
    }

    fn ensure_running(&self, next: JobStatus) -> Result<(), EngineError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(EngineError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: next,
            })
        }
    }

    /// Failed -> Pending while the retry budget lasts; blocked instead while
    /// a blocker raised during the run is still open.
    pub fn requeue(
        &mut self,
        not_before: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if self.status == JobStatus::Failed && !self.retries_remaining() {
            return Err(EngineError::RetriesExhausted {
                job_id: self.id,
                attempts: self.attempts,
                max_attempts: self.max_attempts,
            });
        }
        let next = if self.has_unresolved_blockers() {
            JobStatus::Blocked
        } else {
            JobStatus::Pending
        };
        self.transition(next, now)?;
        self.not_before = not_before;
        for bid in &mut self.bids {
            if bid.state == BidState::Accepted {
                bid.state = BidState::Invalidated;
            }
        }
        Ok(())
    }

    /// Cancel the job.
    ///
    /// Pending or blocked jobs without a live lock can be cancelled by anyone;
    /// otherwise the caller must hold the live lock.
    pub fn cancel(&mut self, agent_id: Option<&AgentId>, now: DateTime<Utc>) -> Result<(), EngineError> {
        let status = self.effective_status(now);
        if status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                job_id: self.id,
                from: status,
                to: JobStatus::Cancelled,
            });
        }
        if let Some(holder) = self.live_lock(now).map(|lock| lock.agent_id.clone()) {
            match agent_id {
                Some(agent_id) if *agent_id == holder => {}
                _ => {
                    return Err(EngineError::NotOwner {
                        job_id: self.id,
                        agent_id: agent_id.cloned().unwrap_or_else(|| AgentId::new("anonymous")),
                    });
                }
            }
        }
        self.transition(JobStatus::Cancelled, now)?;
        self.lock = None;
        self.started_at = None;
        for bid in &mut self.bids {
            if bid.is_active() {
                bid.state = BidState::Invalidated;
            }
        }
        Ok(())
    }

    /// Structural invariants that must hold for any stored record regardless of time.
    ///
    /// A violation means the store handed back something the engine never writes.
    pub fn check_integrity(&self) -> Result<(), EngineError> {
        let corrupted = |detail: String| EngineError::Corrupted {
            job_id: self.id,
            detail,
        };

        if self.status.is_terminal() && self.lock.is_some() {
            return Err(corrupted(format!("{} job holds a lock", self.status)));
        }
        if self.status.requires_lock() && self.lock.is_none() {
            return Err(corrupted(format!("{} job has no lock", self.status)));
        }
        if self.status == JobStatus::InProgress && self.has_unresolved_blockers() {
            return Err(corrupted("running job has unresolved blockers".into()));
        }
        if self.dependencies.contains(&self.id) {
            return Err(corrupted("job depends on itself".into()));
        }
        let mut bidders = BTreeSet::new();
        for bid in self.bids.iter().filter(|bid| bid.is_active()) {
            if !bidders.insert(&bid.agent_id) {
                return Err(corrupted(format!(
                    "agent {} has more than one active bid",
                    bid.agent_id
                )));
            }
        }
        Ok(())
    }
}

/// Partial update. Status is deliberately absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub metadata: Option<serde_json::Value>,
    pub max_attempts: Option<u32>,
}

impl JobPatch {
    pub fn priority(priority: i64) -> Self {
        Self {
            priority: Some(priority),
            ..Self::default()
        }
    }

    pub fn apply(self, job: &mut Job, now: DateTime<Utc>) {
        if let Some(title) = self.title {
            job.title = title;
        }
        if let Some(description) = self.description {
            job.description = description;
        }
        if let Some(priority) = self.priority {
            job.priority = priority;
        }
        if let Some(metadata) = self.metadata {
            job.metadata = metadata;
        }
        if let Some(max_attempts) = self.max_attempts {
            job.max_attempts = max_attempts;
        }
        job.touch(now);
    }
}

/// AND-combined listing filter. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub group_id: Option<String>,
    pub priority: Option<i64>,
    pub min_priority: Option<i64>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn min_priority(mut self, min_priority: i64) -> Self {
        self.min_priority = Some(min_priority);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|status| job.status == status)
            && self
                .group_id
                .as_deref()
                .is_none_or(|group| job.group_id == group)
            && self.priority.is_none_or(|priority| job.priority == priority)
            && self.min_priority.is_none_or(|min| job.priority >= min)
    }
}
