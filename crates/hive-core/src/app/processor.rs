//! GroupProcessor - グループ単位のスケジューリングループ
//!
//! One loop per group. Each round it reads the ready set, orders it, and claims
//! jobs into free slots of a `JoinSet`. Executors run in their own tasks; the
//! loop only touches the engine, never waits on an executor while holding
//! anything, and keeps every in-flight lease alive with a heartbeat.
//!
//! - `run(shutdown)` は shutdown まで回り続ける（受信側が true を見るか、送信側が drop されたら停止）
//! - `run_until_idle()` は実行中・実行可能・バックオフ待ちのジョブが無くなったら返る
//! - 停止時は新規 dispatch をやめ、実行中のジョブの完了を待つ

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};
use ulid::Ulid;

use super::engine::{Engine, FailureDisposition};
use crate::domain::{AgentId, EngineError, Job, JobFilter, JobId, JobStatus};
use crate::ports::{ExecutionError, JobExecutor};

/// Tally of one processor run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorReport {
    pub dispatched: usize,
    pub completed: usize,
    /// Execution failures reported by the executor.
    pub failed: usize,
    /// Failures that were put back in the queue.
    pub retried: usize,
    /// Failures that spent the retry budget.
    pub exhausted: usize,
    /// Ready jobs another agent locked first.
    pub skipped_contention: usize,
}

type Finished = (JobId, Result<(), ExecutionError>);

pub struct GroupProcessor {
    engine: Engine,
    executor: Arc<dyn JobExecutor>,
    group_id: String,
    agent_id: AgentId,
    agent_name: String,
    max_workers: usize,
    poll_interval: Duration,
}

impl GroupProcessor {
    /// Dispatches under a fresh agent identity, so two processors on the same
    /// group compete through the lock like any other agents.
    pub fn new(engine: Engine, group_id: impl Into<String>, executor: Arc<dyn JobExecutor>) -> Self {
        let group_id = group_id.into();
        let max_workers = engine.config().processor.max_workers;
        let poll_interval = engine.config().poll_interval();
        Self {
            agent_id: AgentId::new(format!("{group_id}/processor-{}", Ulid::new())),
            agent_name: format!("{group_id} processor"),
            engine,
            executor,
            group_id,
            max_workers,
            poll_interval,
        }
    }

    pub fn with_agent(mut self, agent_id: AgentId, agent_name: impl Into<String>) -> Self {
        self.agent_id = agent_id;
        self.agent_name = agent_name.into();
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Schedule until `shutdown` turns true (or its sender is dropped), then
    /// wait for in-flight jobs.
    #[instrument(skip(self, shutdown), fields(group_id = %self.group_id))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<ProcessorReport, EngineError> {
        self.drive(Some(shutdown)).await
    }

    /// Schedule until nothing is running, nothing is ready and no job waits on
    /// a retry backoff.
    #[instrument(skip(self), fields(group_id = %self.group_id))]
    pub async fn run_until_idle(&self) -> Result<ProcessorReport, EngineError> {
        self.drive(None).await
    }

    async fn drive(
        &self,
        mut shutdown: Option<watch::Receiver<bool>>,
    ) -> Result<ProcessorReport, EngineError> {
        let mut report = ProcessorReport::default();
        let mut in_flight: JoinSet<Finished> = JoinSet::new();
        let mut stopping = false;

        info!(agent_id = %self.agent_id, max_workers = self.max_workers, "processor started");
        loop {
            if shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
                stopping = true;
            }

            let dispatched = if stopping {
                0
            } else {
                self.fill_slots(&mut in_flight, &mut report).await?
            };

            if in_flight.is_empty() {
                if stopping {
                    break;
                }
                if shutdown.is_none() && dispatched == 0 && !self.waiting_on_backoff().await? {
                    break;
                }
            }

            tokio::select! {
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    match joined {
                        Ok((job_id, outcome)) => self.settle(job_id, outcome, &mut report).await?,
                        Err(err) => warn!(error = %err, "worker task ended abnormally"),
                    }
                }
                stop = shutdown_requested(&mut shutdown), if !stopping => {
                    if stop {
                        info!(in_flight = in_flight.len(), "shutdown requested, draining");
                        stopping = true;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(?report, "processor stopped");
        Ok(report)
    }

    /// Claim ready jobs into free slots. Returns how many were dispatched.
    async fn fill_slots(
        &self,
        in_flight: &mut JoinSet<Finished>,
        report: &mut ProcessorReport,
    ) -> Result<usize, EngineError> {
        let free = self.max_workers.saturating_sub(in_flight.len());
        if free == 0 {
            return Ok(0);
        }

        let mut ready = match self.engine.ready_to_start(&self.group_id).await {
            Ok(ready) => ready,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(error = %err, "could not compute ready set");
                return Ok(0);
            }
        };
        let now = self.engine.now();
        ready.sort_by(|a, b| dispatch_order(a, b, now));

        let mut dispatched = 0;
        for job in ready {
            if dispatched == free {
                break;
            }
            match self.claim(job.id).await {
                Ok(job) => {
                    self.spawn(in_flight, job);
                    dispatched += 1;
                    report.dispatched += 1;
                }
                Err(err) if err.is_contention() => {
                    debug!(job_id = %job.id, error = %err, "skipping contended job");
                    report.skipped_contention += 1;
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!(job_id = %job.id, error = %err, "could not dispatch job"),
            }
        }
        Ok(dispatched)
    }

    /// Lock and start a job on behalf of this processor.
    async fn claim(&self, job_id: JobId) -> Result<Job, EngineError> {
        self.engine
            .lock_job(job_id, &self.agent_id, &self.agent_name, None)
            .await?;
        match self.engine.start_job(job_id, &self.agent_id).await {
            Ok(job) => Ok(job),
            Err(err) => {
                if let Err(unlock_err) = self.engine.unlock_job(job_id, &self.agent_id).await {
                    warn!(job_id = %job_id, error = %unlock_err, "could not release unstarted job");
                }
                Err(err)
            }
        }
    }

    fn spawn(&self, in_flight: &mut JoinSet<Finished>, job: Job) {
        let executor = Arc::clone(&self.executor);
        let engine = self.engine.clone();
        let agent_id = self.agent_id.clone();
        let ttl = engine.config().lock_ttl();
        let job_id = job.id;

        debug!(job_id = %job_id, title = %job.title, "dispatching job");
        in_flight.spawn(async move {
            // The executor gets its own task so a panic there is just a failure here.
            let mut execution = AbortOnDrop(tokio::spawn(async move { executor.execute(job).await }));
            let outcome = hold_lease(&engine, job_id, &agent_id, ttl, &mut execution.0).await;
            (job_id, outcome)
        });
    }

    async fn settle(
        &self,
        job_id: JobId,
        outcome: Result<(), ExecutionError>,
        report: &mut ProcessorReport,
    ) -> Result<(), EngineError> {
        let recorded = match outcome {
            Ok(()) => self
                .engine
                .complete_job(job_id, &self.agent_id)
                .await
                .map(|_| report.completed += 1),
            Err(failure) => {
                report.failed += 1;
                self.engine
                    .fail_job(job_id, &self.agent_id, &failure.message)
                    .await
                    .map(|disposition| match disposition {
                        FailureDisposition::Retrying { .. } => report.retried += 1,
                        FailureDisposition::Exhausted { .. } => report.exhausted += 1,
                    })
            }
        };

        match recorded {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                // Typically a lease lost mid-run; the job is someone else's now.
                warn!(job_id = %job_id, error = %err, "could not record job outcome");
                Ok(())
            }
        }
    }

    async fn waiting_on_backoff(&self) -> Result<bool, EngineError> {
        let now = self.engine.now();
        let pending = self
            .engine
            .list_jobs(
                &JobFilter::new()
                    .group(self.group_id.as_str())
                    .status(JobStatus::Pending),
            )
            .await?;
        Ok(pending.iter().any(|job| !job.is_due(now)))
    }
}

/// Dispatch order: priority desc, total pheromone intensity desc, oldest first.
pub fn dispatch_order(a: &Job, b: &Job, now: DateTime<Utc>) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.total_intensity(now).total_cmp(&a.total_intensity(now)))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Aborts the executor task when its slot is dropped, e.g. when the loop bails
/// out on a fatal error.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Wait for the executor, renewing the lease every `ttl / 2`.
async fn hold_lease(
    engine: &Engine,
    job_id: JobId,
    agent_id: &AgentId,
    ttl: Duration,
    execution: &mut JoinHandle<Result<(), ExecutionError>>,
) -> Result<(), ExecutionError> {
    let mut heartbeat = tokio::time::interval(ttl / 2);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            joined = &mut *execution => {
                return joined.unwrap_or_else(|err| {
                    Err(ExecutionError::new(format!("executor task failed: {err}")))
                });
            }
            _ = heartbeat.tick() => {
                if let Err(err) = engine.renew_lock(job_id, agent_id, Some(ttl)).await {
                    warn!(job_id = %job_id, error = %err, "lease renewal failed");
                }
            }
        }
    }
}

/// Resolves when the shutdown flag changes; `true` means stop. A dropped
/// sender counts as a stop request. Without a receiver it never resolves.
async fn shutdown_requested(shutdown: &mut Option<watch::Receiver<bool>>) -> bool {
    match shutdown {
        Some(rx) => match rx.changed().await {
            Ok(()) => *rx.borrow(),
            Err(_) => true,
        },
        None => std::future::pending().await,
    }
}
