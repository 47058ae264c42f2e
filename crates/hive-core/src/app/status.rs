//! Status - グループ単位の集計ビュー

use serde::{Deserialize, Serialize};

use crate::domain::JobStatus;
use crate::ports::StatusCounts;

/// Per-status job counts for one group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStatus {
    pub group_id: String,
    pub pending: usize,
    pub locked: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl GroupStatus {
    pub fn from_counts(group_id: impl Into<String>, counts: &StatusCounts) -> Self {
        let count = |status: JobStatus| counts.get(&status).copied().unwrap_or(0);
        Self {
            group_id: group_id.into(),
            pending: count(JobStatus::Pending),
            locked: count(JobStatus::Locked),
            in_progress: count(JobStatus::InProgress),
            blocked: count(JobStatus::Blocked),
            completed: count(JobStatus::Completed),
            failed: count(JobStatus::Failed),
            cancelled: count(JobStatus::Cancelled),
        }
    }

    pub fn total(&self) -> usize {
        self.pending
            + self.locked
            + self.in_progress
            + self.blocked
            + self.completed
            + self.failed
            + self.cancelled
    }

    /// Nothing left that could still run.
    pub fn is_settled(&self) -> bool {
        self.pending + self.locked + self.in_progress == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_statuses_count_as_zero() {
        let mut counts = StatusCounts::new();
        counts.insert(JobStatus::Completed, 2);
        counts.insert(JobStatus::Blocked, 1);

        let status = GroupStatus::from_counts("g", &counts);
        assert_eq!(status.completed, 2);
        assert_eq!(status.blocked, 1);
        assert_eq!(status.pending, 0);
        assert_eq!(status.total(), 3);
        assert!(status.is_settled());
    }

    #[test]
    fn pending_work_is_not_settled() {
        let mut counts = StatusCounts::new();
        counts.insert(JobStatus::Pending, 1);
        assert!(!GroupStatus::from_counts("g", &counts).is_settled());
    }
}
