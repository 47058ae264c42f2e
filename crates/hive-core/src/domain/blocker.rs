//! Blockers: named obstacles that keep a job from starting, independent of dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::EngineError;
use super::ids::{AgentId, BlockerId, JobId};
use super::job::Job;
use super::status::JobStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BlockerKind {
    /// Raised by an agent or operator.
    Manual,

    /// Raised automatically when an upstream job exhausted its retries.
    FailedDependency { dependency: JobId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blocker {
    pub id: BlockerId,
    pub job_id: JobId,
    pub kind: BlockerKind,
    pub description: String,
    pub raised_by: AgentId,
    pub raised_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_by: Option<AgentId>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Blocker {
    pub fn new(
        id: BlockerId,
        job_id: JobId,
        kind: BlockerKind,
        description: impl Into<String>,
        raised_by: AgentId,
        raised_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_id,
            kind,
            description: description.into(),
            raised_by,
            raised_at,
            resolved: false,
            resolved_by: None,
            resolved_at: None,
        }
    }
}

impl Job {
    pub fn unresolved_blockers(&self) -> Vec<BlockerId> {
        self.blockers
            .iter()
            .filter(|blocker| !blocker.resolved)
            .map(|blocker| blocker.id)
            .collect()
    }

    pub fn has_unresolved_blockers(&self) -> bool {
        self.blockers.iter().any(|blocker| !blocker.resolved)
    }

    /// Append a blocker. Active jobs move to blocked; a held lock is kept.
    pub fn raise_blocker(&mut self, blocker: Blocker, now: DateTime<Utc>) -> Result<(), EngineError> {
        if self.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: JobStatus::Blocked,
            });
        }
        if self.status != JobStatus::Blocked {
            self.transition(JobStatus::Blocked, now)?;
        }
        self.blockers.push(blocker);
        self.touch(now);
        Ok(())
    }

    /// Mark a blocker resolved. Resolving the last one releases the job:
    /// back to in_progress if the holder's run was interrupted, locked if a
    /// live lock is held, otherwise pending.
    pub fn resolve_blocker(
        &mut self,
        blocker_id: BlockerId,
        resolved_by: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<Blocker, EngineError> {
        let blocker = self
            .blockers
            .iter_mut()
            .find(|blocker| blocker.id == blocker_id)
            .ok_or_else(|| EngineError::blocker_not_found(blocker_id))?;

        if !blocker.resolved {
            blocker.resolved = true;
            blocker.resolved_by = Some(resolved_by.clone());
            blocker.resolved_at = Some(now);
        }
        let resolved = blocker.clone();

        if self.status == JobStatus::Blocked && !self.has_unresolved_blockers() {
            if self.live_lock(now).is_some() {
                let next = if self.started_at.is_some() {
                    JobStatus::InProgress
                } else {
                    JobStatus::Locked
                };
                self.transition(next, now)?;
            } else {
                self.lock = None;
                self.started_at = None;
                self.transition(JobStatus::Pending, now)?;
            }
        }
        self.touch(now);
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobSpec;
    use chrono::TimeZone;
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn job() -> Job {
        Job::new(JobId::generate(), JobSpec::new("g", "deploy"), 3, t0())
    }

    fn manual(job: &Job) -> Blocker {
        Blocker::new(
            BlockerId::generate(),
            job.id,
            BlockerKind::Manual,
            "waiting on credentials",
            AgentId::new("ops"),
            t0(),
        )
    }

    #[test]
    fn raise_and_resolve_round_trip_status() {
        let mut job = job();
        let first = manual(&job);
        let second = manual(&job);
        job.raise_blocker(first.clone(), t0()).unwrap();
        job.raise_blocker(second.clone(), t0()).unwrap();
        assert_eq!(job.status, JobStatus::Blocked);

        job.resolve_blocker(first.id, &AgentId::new("ops"), t0()).unwrap();
        assert_eq!(job.status, JobStatus::Blocked);

        job.resolve_blocker(second.id, &AgentId::new("ops"), t0()).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.unresolved_blockers().is_empty());
    }

    #[test]
    fn locked_job_keeps_its_lock_through_a_blocker() {
        let mut job = job();
        let agent = AgentId::new("a");
        job.try_lock(&agent, "A", Duration::from_secs(60), t0()).unwrap();
        let blocker = manual(&job);
        job.raise_blocker(blocker.clone(), t0()).unwrap();
        assert_eq!(job.status, JobStatus::Blocked);
        assert!(job.lock.is_some());

        job.resolve_blocker(blocker.id, &agent, t0()).unwrap();
        assert_eq!(job.status, JobStatus::Locked);
    }

    #[test]
    fn interrupted_run_resumes_or_reports_through_the_blocker() {
        let mut job = job();
        let agent = AgentId::new("a");
        job.try_lock(&agent, "A", Duration::from_secs(60), t0()).unwrap();
        job.start(&agent, &[], t0()).unwrap();

        let blocker = manual(&job);
        job.raise_blocker(blocker.clone(), t0()).unwrap();
        assert_eq!(job.status, JobStatus::Blocked);
        assert!(job.is_running());

        job.resolve_blocker(blocker.id, &agent, t0()).unwrap();
        assert_eq!(job.status, JobStatus::InProgress);

        job.raise_blocker(manual(&job), t0()).unwrap();
        job.complete(&agent, t0()).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.lock.is_none());
    }

    #[test]
    fn blocked_before_starting_cannot_be_completed() {
        let mut job = job();
        let agent = AgentId::new("a");
        job.try_lock(&agent, "A", Duration::from_secs(60), t0()).unwrap();
        job.raise_blocker(manual(&job), t0()).unwrap();

        let err = job.complete(&agent, t0()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: JobStatus::Blocked,
                to: JobStatus::Completed,
                ..
            }
        ));
    }

    #[test]
    fn failed_interrupted_run_requeues_as_blocked() {
        let mut job = job();
        let agent = AgentId::new("a");
        job.try_lock(&agent, "A", Duration::from_secs(60), t0()).unwrap();
        job.start(&agent, &[], t0()).unwrap();
        let blocker = manual(&job);
        job.raise_blocker(blocker.clone(), t0()).unwrap();

        job.fail(&agent, "boom", t0()).unwrap();
        job.requeue(None, t0()).unwrap();
        assert_eq!(job.status, JobStatus::Blocked);
        assert!(!job.is_running());

        job.resolve_blocker(blocker.id, &agent, t0()).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn unknown_blocker_is_not_found() {
        let mut job = job();
        let err = job
            .resolve_blocker(BlockerId::generate(), &AgentId::new("x"), t0())
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "blocker", .. }));
    }

    #[test]
    fn kind_serializes_with_tag() {
        let kind = BlockerKind::FailedDependency {
            dependency: JobId::generate(),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "failed-dependency");
    }
}
