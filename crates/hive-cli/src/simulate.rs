//! Simulated executor: sleeps for a while, fails the titles it was told to.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use hive_core::domain::Job;
use hive_core::ports::{ExecutionError, JobExecutor};
use tracing::info;

pub struct SimulatedExecutor {
    work: Duration,
    failing: HashSet<String>,
}

impl SimulatedExecutor {
    pub fn new(work: Duration, failing: impl IntoIterator<Item = String>) -> Self {
        Self {
            work,
            failing: failing.into_iter().collect(),
        }
    }
}

#[async_trait]
impl JobExecutor for SimulatedExecutor {
    async fn execute(&self, job: Job) -> Result<(), ExecutionError> {
        info!(job_id = %job.id, title = %job.title, attempt = job.attempts, "working");
        tokio::time::sleep(self.work).await;
        if self.failing.contains(&job.title) {
            return Err(ExecutionError::new(format!("simulated failure in `{}`", job.title)));
        }
        Ok(())
    }
}
