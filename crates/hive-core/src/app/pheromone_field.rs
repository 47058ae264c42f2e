//! PheromoneField - 減衰するシグナル
//!
//! Deposits go through `JobStore::modify`, which serializes them per job (and
//! therefore per signal). Reads decay against the engine clock and take no lock.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::context::EngineContext;
use crate::domain::{EngineError, Job, JobFilter, JobId, PheromoneEntry, PheromoneReading};

/// A job found by signal search, with the signal's current intensity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PheromoneMatch {
    pub job: Job,
    pub intensity: f64,
}

#[derive(Clone)]
pub struct PheromoneField {
    ctx: Arc<EngineContext>,
}

impl PheromoneField {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Reinforce `signal` on a job. `decay_rate` defaults to `default_decay_rate`.
    pub async fn deposit(
        &self,
        job_id: JobId,
        signal: &str,
        amount: f64,
        decay_rate: Option<f64>,
    ) -> Result<PheromoneEntry, EngineError> {
        let decay_rate = decay_rate.unwrap_or(self.ctx.config.default_decay_rate);
        let max = self.ctx.config.max_pheromone_intensity;
        let now = self.ctx.now();
        let key = signal.to_string();

        let job = self
            .ctx
            .store
            .modify(
                job_id,
                Box::new(move |job| {
                    job.deposit_pheromone(&key, amount, decay_rate, max, now)
                        .map(|_| ())
                }),
            )
            .await?;

        let entry = job
            .pheromones
            .get(signal)
            .cloned()
            .ok_or_else(|| EngineError::Corrupted {
                job_id,
                detail: format!("pheromone `{signal}` missing after deposit"),
            })?;
        debug!(job_id = %job_id, signal, intensity = entry.initial_intensity, "pheromone deposited");
        Ok(entry)
    }

    /// Jobs whose `signal` currently reads at least `min_intensity`, strongest first.
    pub async fn search(
        &self,
        signal: &str,
        min_intensity: f64,
    ) -> Result<Vec<PheromoneMatch>, EngineError> {
        let now = self.ctx.now();
        let jobs = self.ctx.store.list(&JobFilter::new()).await?;

        let mut matches: Vec<PheromoneMatch> = jobs
            .into_iter()
            .filter_map(|job| {
                let intensity = job.pheromone_intensity(signal, now)?;
                (intensity >= min_intensity).then_some(PheromoneMatch { job, intensity })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.intensity
                .total_cmp(&a.intensity)
                .then_with(|| a.job.id.cmp(&b.job.id))
        });
        Ok(matches)
    }

    /// Every signal on the job, evaluated now.
    pub async fn readings(&self, job_id: JobId) -> Result<Vec<PheromoneReading>, EngineError> {
        let job = self.ctx.store.get(job_id).await?;
        Ok(job.pheromone_readings(self.ctx.now()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{engine, job};
    use crate::domain::EngineError;
    use std::time::Duration;

    #[tokio::test]
    async fn deposit_then_search_finds_the_job() {
        let (engine, _clock) = engine();
        let j = job(&engine, "hotfix").await;
        let other = job(&engine, "chore").await;

        engine
            .pheromones()
            .deposit(j.id, "urgent", 100.0, Some(0.01))
            .await
            .unwrap();
        engine
            .pheromones()
            .deposit(other.id, "urgent", 20.0, Some(0.01))
            .await
            .unwrap();

        let found = engine.pheromones().search("urgent", 90.0).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].job.id, j.id);
        assert!((found[0].intensity - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn intensity_decays_between_deposits() {
        let (engine, clock) = engine();
        let j = job(&engine, "hotfix").await;
        engine
            .pheromones()
            .deposit(j.id, "urgent", 100.0, Some(0.01))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(10));
        let found = engine.pheromones().search("urgent", 90.0).await.unwrap();
        let expected = 100.0 * (-0.1f64).exp();
        assert!((found[0].intensity - expected).abs() < 1e-9);

        clock.advance(Duration::from_secs(20));
        assert!(engine.pheromones().search("urgent", 90.0).await.unwrap().is_empty());

        let mut previous = f64::INFINITY;
        for _ in 0..10 {
            clock.advance(Duration::from_secs(30));
            let readings = engine.pheromones().readings(j.id).await.unwrap();
            assert!(readings[0].intensity <= previous);
            assert!(readings[0].intensity >= 0.0);
            previous = readings[0].intensity;
        }
    }

    #[tokio::test]
    async fn reinforcement_is_capped_at_the_maximum() {
        let (engine, _clock) = engine();
        let j = job(&engine, "hotfix").await;
        engine.pheromones().deposit(j.id, "trail", 80.0, None).await.unwrap();
        let entry = engine
            .pheromones()
            .deposit(j.id, "trail", 80.0, None)
            .await
            .unwrap();
        assert_eq!(entry.initial_intensity, 100.0);
        assert_eq!(entry.decay_rate, engine.config().default_decay_rate);
    }

    #[tokio::test]
    async fn signals_are_tracked_per_type() {
        let (engine, _clock) = engine();
        let j = job(&engine, "hotfix").await;
        engine.pheromones().deposit(j.id, "urgent", 10.0, None).await.unwrap();
        engine.pheromones().deposit(j.id, "easy", 5.0, None).await.unwrap();

        let readings = engine.pheromones().readings(j.id).await.unwrap();
        let signals: Vec<_> = readings.iter().map(|r| r.signal.as_str()).collect();
        assert_eq!(signals, vec!["easy", "urgent"]);
        assert!(engine.pheromones().search("missing", 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_deposits_are_rejected() {
        let (engine, _clock) = engine();
        let j = job(&engine, "hotfix").await;
        for (amount, rate) in [(0.0, 0.01), (-1.0, 0.01), (5.0, -0.5), (5.0, f64::NAN)] {
            let err = engine
                .pheromones()
                .deposit(j.id, "urgent", amount, Some(rate))
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::InvalidPheromone { .. }));
        }
        assert!(engine.pheromones().readings(j.id).await.unwrap().is_empty());
    }
}
