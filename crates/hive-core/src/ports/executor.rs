//! JobExecutor port - ジョブを実際に実行する外部コラボレータ
//!
//! The engine never waits on execution while holding any lock: the processor
//! hands an owned `Job` snapshot to the executor and reports the outcome
//! afterwards.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Job;

/// Failure reported by an executor. Always treated as retryable by the processor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: Job) -> Result<(), ExecutionError>;
}
