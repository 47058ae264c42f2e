//! Job status state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Job status (closed set).
///
/// State transitions:
/// - Pending -> Locked -> InProgress -> Completed
/// - InProgress -> Failed -> Pending (retry, while attempts remain)
/// - Pending | Locked | InProgress -> Blocked -> Pending | Locked (blockers resolved)
/// - Blocked -> InProgress | Completed | Failed (a run interrupted by a blocker; holder only)
/// - Failed -> Blocked (retry while a blocker is still open)
/// - Locked | InProgress -> Pending (lock released or lease expired)
/// - Pending | Locked | InProgress | Blocked -> Cancelled
///
/// Completed and Cancelled are terminal. Failed is terminal once retries are exhausted,
/// which the retry policy decides, not this table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Pending,

    /// Claimed by an agent, not yet started.
    Locked,

    /// Being executed by the lock holder.
    InProgress,

    /// Held back by at least one unresolved blocker.
    Blocked,

    Completed,

    Failed,

    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::Locked,
        JobStatus::InProgress,
        JobStatus::Blocked,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Is this a terminal state for scheduling purposes?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Does this status require a live lock?
    pub fn requires_lock(self) -> bool {
        matches!(self, JobStatus::Locked | JobStatus::InProgress)
    }

    /// Statuses in which agents may still bid for the job.
    pub fn accepts_bids(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Blocked)
    }

    /// The transition table.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match self {
            Pending => matches!(next, Locked | Blocked | Cancelled),
            Locked => matches!(next, Pending | InProgress | Blocked | Cancelled),
            InProgress => matches!(next, Pending | Blocked | Completed | Failed | Cancelled),
            Blocked => matches!(
                next,
                Pending | Locked | InProgress | Completed | Failed | Cancelled
            ),
            Failed => matches!(next, Pending | Blocked),
            Completed | Cancelled => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Locked => "locked",
            JobStatus::InProgress => "in_progress",
            JobStatus::Blocked => "blocked",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::claim(JobStatus::Pending, JobStatus::Locked)]
    #[case::start(JobStatus::Locked, JobStatus::InProgress)]
    #[case::finish(JobStatus::InProgress, JobStatus::Completed)]
    #[case::fail(JobStatus::InProgress, JobStatus::Failed)]
    #[case::retry(JobStatus::Failed, JobStatus::Pending)]
    #[case::release(JobStatus::Locked, JobStatus::Pending)]
    #[case::unblock(JobStatus::Blocked, JobStatus::Pending)]
    #[case::unblock_locked(JobStatus::Blocked, JobStatus::Locked)]
    #[case::cancel_pending(JobStatus::Pending, JobStatus::Cancelled)]
    #[case::resume_interrupted(JobStatus::Blocked, JobStatus::InProgress)]
    #[case::finish_interrupted(JobStatus::Blocked, JobStatus::Completed)]
    #[case::retry_into_blocker(JobStatus::Failed, JobStatus::Blocked)]
    fn legal_moves(#[case] from: JobStatus, #[case] to: JobStatus) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case::skip_work(JobStatus::Pending, JobStatus::Completed)]
    #[case::skip_lock(JobStatus::Pending, JobStatus::InProgress)]
    #[case::complete_unstarted(JobStatus::Locked, JobStatus::Completed)]
    #[case::revive_completed(JobStatus::Completed, JobStatus::Pending)]
    #[case::revive_cancelled(JobStatus::Cancelled, JobStatus::Pending)]
    #[case::failed_to_completed(JobStatus::Failed, JobStatus::Completed)]
    fn illegal_moves(#[case] from: JobStatus, #[case] to: JobStatus) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn terminal_states_go_nowhere_except_failed_retry() {
        for next in JobStatus::ALL {
            assert!(!JobStatus::Completed.can_transition_to(next));
            assert!(!JobStatus::Cancelled.can_transition_to(next));
        }
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn serializes_snake_case() {
        let s = serde_json::to_string(&JobStatus::InProgress).unwrap();
        assert_eq!(s, "\"in_progress\"");
        assert_eq!(JobStatus::InProgress.to_string(), "in_progress");
    }
}
