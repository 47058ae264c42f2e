//! Leased locks.
//!
//! Expiry is a pure function of `acquired_at + ttl` and the caller's clock. Nothing
//! sweeps expired locks; they are ignored on read and overwritten on the next acquire.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::errors::EngineError;
use super::ids::{AgentId, JobId};
use super::job::Job;
use super::status::JobStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub job_id: JobId,
    pub agent_id: AgentId,
    pub agent_name: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl LockInfo {
    pub fn new(
        job_id: JobId,
        agent_id: AgentId,
        agent_name: impl Into<String>,
        acquired_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            job_id,
            agent_id,
            agent_name: agent_name.into(),
            acquired_at,
            ttl,
        }
    }

    /// `None` when the ttl is too large to represent, i.e. the lock never expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = TimeDelta::from_std(self.ttl).ok()?;
        self.acquired_at.checked_add_signed(ttl)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires_at) => now > expires_at,
            None => false,
        }
    }

    pub fn is_live_for(&self, agent_id: &AgentId, now: DateTime<Utc>) -> bool {
        &self.agent_id == agent_id && !self.is_expired(now)
    }
}

/// Answer of `is_locked`: the live lock, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockStatus {
    pub is_locked: bool,
    pub lock: Option<LockInfo>,
}

impl LockStatus {
    pub fn from_job(job: &Job, now: DateTime<Utc>) -> Self {
        let lock = job.live_lock(now).cloned();
        Self {
            is_locked: lock.is_some(),
            lock,
        }
    }
}

impl Job {
    /// The lock if it has not expired at `now`.
    pub fn live_lock(&self, now: DateTime<Utc>) -> Option<&LockInfo> {
        self.lock.as_ref().filter(|lock| !lock.is_expired(now))
    }

    /// Status as seen at `now`: a locked or running job whose lease ran out is pending again.
    pub fn effective_status(&self, now: DateTime<Utc>) -> JobStatus {
        if self.status.requires_lock() && self.live_lock(now).is_none() {
            JobStatus::Pending
        } else {
            self.status
        }
    }

    /// The record as read at `now`: an expired lease is dropped and a
    /// locked or running job under it reads as pending.
    pub fn observed_at(mut self, now: DateTime<Utc>) -> Self {
        if self.lock.as_ref().is_some_and(|lock| lock.is_expired(now)) {
            self.status = self.effective_status(now);
            self.lock = None;
            self.started_at = None;
        }
        self
    }

    /// Compare-and-set on the lock slot.
    ///
    /// Succeeds when the slot is empty, expired, or already held by `agent_id`
    /// (renewal). A pending job becomes locked; a blocked job stays blocked while
    /// holding the lock; a renewal keeps the current status.
    pub fn try_lock(
        &mut self,
        agent_id: &AgentId,
        agent_name: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<LockInfo, EngineError> {
        if self.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: JobStatus::Locked,
            });
        }

        let takeover_from = match &self.lock {
            Some(current) if current.agent_id != *agent_id => {
                if !current.is_expired(now) {
                    return Err(EngineError::AlreadyLocked {
                        job_id: self.id,
                        holder: current.agent_id.clone(),
                    });
                }
                Some(current.agent_id.clone())
            }
            _ => None,
        };

        if let Some(previous_holder) = takeover_from {
            if self.status.requires_lock() {
                warn!(
                    job_id = %self.id,
                    %previous_holder,
                    new_holder = %agent_id,
                    "reclaiming job from expired lease"
                );
                self.transition(JobStatus::Pending, now)?;
            }
        }

        if self
            .lock
            .as_ref()
            .is_none_or(|current| current.agent_id != *agent_id)
        {
            self.started_at = None;
        }
        let lock = LockInfo::new(self.id, agent_id.clone(), agent_name, now, ttl);
        self.lock = Some(lock.clone());
        if self.status == JobStatus::Pending {
            self.transition(JobStatus::Locked, now)?;
        }
        self.touch(now);
        Ok(lock)
    }

    /// Drop the lock held by `agent_id`. Locked/running jobs go back to pending.
    pub fn unlock(&mut self, agent_id: &AgentId, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.ensure_holder(agent_id, now)?;
        self.lock = None;
        self.started_at = None;
        if self.status.requires_lock() {
            self.transition(JobStatus::Pending, now)?;
        }
        self.touch(now);
        Ok(())
    }

    pub(crate) fn ensure_holder(
        &self,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<&LockInfo, EngineError> {
        self.live_lock(now)
            .filter(|lock| lock.agent_id == *agent_id)
            .ok_or_else(|| EngineError::NotOwner {
                job_id: self.id,
                agent_id: agent_id.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobSpec;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn job() -> Job {
        Job::new(JobId::generate(), JobSpec::new("g", "build"), 3, t0())
    }

    #[test]
    fn lock_expires_strictly_after_ttl() {
        let lock = LockInfo::new(
            JobId::generate(),
            AgentId::new("a"),
            "A",
            t0(),
            Duration::from_secs(1),
        );
        assert!(!lock.is_expired(t0() + TimeDelta::seconds(1)));
        assert!(lock.is_expired(t0() + TimeDelta::milliseconds(1001)));
    }

    #[test]
    fn huge_ttl_never_expires() {
        let lock = LockInfo::new(
            JobId::generate(),
            AgentId::new("a"),
            "A",
            t0(),
            Duration::from_secs(u64::MAX),
        );
        assert!(!lock.is_expired(t0() + TimeDelta::days(365 * 1000)));
    }

    #[test]
    fn second_agent_is_rejected_until_expiry() {
        let mut job = job();
        let ttl = Duration::from_secs(1);
        job.try_lock(&AgentId::new("a"), "A", ttl, t0()).unwrap();
        assert_eq!(job.status, JobStatus::Locked);

        let err = job
            .try_lock(&AgentId::new("b"), "B", ttl, t0() + TimeDelta::milliseconds(500))
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyLocked { .. }));

        let lock = job
            .try_lock(&AgentId::new("b"), "B", ttl, t0() + TimeDelta::seconds(2))
            .unwrap();
        assert_eq!(lock.agent_id, AgentId::new("b"));
        assert_eq!(job.status, JobStatus::Locked);
    }

    #[test]
    fn same_agent_renews() {
        let mut job = job();
        let a = AgentId::new("a");
        job.try_lock(&a, "A", Duration::from_secs(10), t0()).unwrap();
        let renewed = job
            .try_lock(&a, "A", Duration::from_secs(10), t0() + TimeDelta::seconds(5))
            .unwrap();
        assert_eq!(renewed.acquired_at, t0() + TimeDelta::seconds(5));
        assert_eq!(job.status, JobStatus::Locked);
    }

    #[test]
    fn expired_running_job_reads_as_pending() {
        let mut job = job();
        let a = AgentId::new("a");
        job.try_lock(&a, "A", Duration::from_secs(1), t0()).unwrap();
        job.start(&a, &[], t0()).unwrap();
        assert_eq!(job.effective_status(t0()), JobStatus::InProgress);
        assert_eq!(
            job.effective_status(t0() + TimeDelta::seconds(2)),
            JobStatus::Pending
        );
    }

    #[test]
    fn unlock_requires_live_ownership() {
        let mut job = job();
        let a = AgentId::new("a");
        job.try_lock(&a, "A", Duration::from_secs(1), t0()).unwrap();

        let err = job.unlock(&AgentId::new("b"), t0()).unwrap_err();
        assert!(matches!(err, EngineError::NotOwner { .. }));

        let err = job.unlock(&a, t0() + TimeDelta::seconds(2)).unwrap_err();
        assert!(matches!(err, EngineError::NotOwner { .. }));

        job.unlock(&a, t0()).unwrap();
        assert!(job.lock.is_none());
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn terminal_jobs_cannot_be_locked() {
        let mut job = job();
        job.cancel(None, t0()).unwrap();
        let err = job
            .try_lock(&AgentId::new("a"), "A", Duration::from_secs(1), t0())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }
}
