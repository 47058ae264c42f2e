//! Fixtures shared by the app-level tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use super::builder::EngineBuilder;
use super::engine::Engine;
use crate::config::{EngineConfig, ProcessorConfig, RetryConfig};
use crate::domain::{AgentId, Job, JobSpec};
use crate::ports::{ExecutionError, FixedClock, JobExecutor};

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// Short leases, no backoff, fast polling.
pub(crate) fn test_config() -> EngineConfig {
    EngineConfig {
        lock_ttl_secs: 60,
        bid_lock_ttl_secs: 60,
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 0,
            multiplier: 2.0,
        },
        processor: ProcessorConfig {
            max_workers: 2,
            poll_interval_ms: 5,
        },
        ..EngineConfig::default()
    }
}

pub(crate) fn engine_with(config: EngineConfig) -> (Engine, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(t0()));
    let engine = EngineBuilder::new()
        .clock(clock.clone())
        .config(config)
        .build()
        .unwrap();
    (engine, clock)
}

pub(crate) fn engine() -> (Engine, Arc<FixedClock>) {
    engine_with(test_config())
}

pub(crate) fn agent(name: &str) -> AgentId {
    AgentId::new(name)
}

pub(crate) async fn job(engine: &Engine, title: &str) -> Job {
    engine.create_job(JobSpec::new("g", title)).await.unwrap()
}

/// Lock and start `job` for `agent`.
pub(crate) async fn run_as(engine: &Engine, job: &Job, agent: &AgentId) {
    engine
        .lock_job(job.id, agent, agent.as_str(), Some(Duration::from_secs(60)))
        .await
        .unwrap();
    engine.start_job(job.id, agent).await.unwrap();
}

/// Records every execution; fails a title as many times as scripted.
#[derive(Default)]
pub(crate) struct ScriptedExecutor {
    failures: Mutex<HashMap<String, u32>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub(crate) fn failing(title: &str, times: u32) -> Self {
        let executor = Self::default();
        executor
            .failures
            .lock()
            .unwrap()
            .insert(title.to_string(), times);
        executor
    }

    pub(crate) fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobExecutor for ScriptedExecutor {
    async fn execute(&self, job: Job) -> Result<(), ExecutionError> {
        self.executed.lock().unwrap().push(job.title.clone());
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&job.title) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(ExecutionError::new(format!("{} exploded", job.title)))
            }
            _ => Ok(()),
        }
    }
}
