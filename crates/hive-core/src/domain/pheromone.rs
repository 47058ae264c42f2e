//! Pheromone signals: decaying intensities attached to jobs.
//!
//! intensity(t) = initial * exp(-decay_rate * seconds_since_deposit), never below 0.
//! Reads are pure functions of the stored entry and the caller's clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::EngineError;
use super::job::Job;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PheromoneEntry {
    pub signal: String,
    pub initial_intensity: f64,
    pub deposited_at: DateTime<Utc>,
    /// Per second.
    pub decay_rate: f64,
}

impl PheromoneEntry {
    pub fn intensity_at(&self, now: DateTime<Utc>) -> f64 {
        // A clock running behind the depositor reads the undecayed value.
        let elapsed_ms = (now - self.deposited_at).num_milliseconds().max(0);
        let elapsed_secs = elapsed_ms as f64 / 1000.0;
        let value = self.initial_intensity * (-self.decay_rate * elapsed_secs).exp();
        if value.is_finite() { value.max(0.0) } else { 0.0 }
    }

    pub fn reading(&self, now: DateTime<Utc>) -> PheromoneReading {
        PheromoneReading {
            signal: self.signal.clone(),
            intensity: self.intensity_at(now),
            deposited_at: self.deposited_at,
            decay_rate: self.decay_rate,
        }
    }
}

/// A pheromone entry evaluated at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PheromoneReading {
    pub signal: String,
    pub intensity: f64,
    pub deposited_at: DateTime<Utc>,
    pub decay_rate: f64,
}

impl Job {
    /// Reinforce (or create) the signal: the current decayed value plus `amount`,
    /// capped at `max_intensity`, restarting decay at `now`.
    pub fn deposit_pheromone(
        &mut self,
        signal: &str,
        amount: f64,
        decay_rate: f64,
        max_intensity: f64,
        now: DateTime<Utc>,
    ) -> Result<PheromoneEntry, EngineError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(EngineError::InvalidPheromone {
                job_id: self.id,
                reason: format!("amount must be positive, got {amount}"),
            });
        }
        if !decay_rate.is_finite() || decay_rate < 0.0 {
            return Err(EngineError::InvalidPheromone {
                job_id: self.id,
                reason: format!("decay rate must be >= 0, got {decay_rate}"),
            });
        }

        let current = self
            .pheromones
            .get(signal)
            .map(|entry| entry.intensity_at(now))
            .unwrap_or(0.0);

        let entry = PheromoneEntry {
            signal: signal.to_string(),
            initial_intensity: (current + amount).min(max_intensity),
            deposited_at: now,
            decay_rate,
        };
        self.pheromones.insert(signal.to_string(), entry.clone());
        self.touch(now);
        Ok(entry)
    }

    pub fn pheromone_intensity(&self, signal: &str, now: DateTime<Utc>) -> Option<f64> {
        self.pheromones
            .get(signal)
            .map(|entry| entry.intensity_at(now))
    }

    /// Sum over every signal type; the scheduler's tie-breaker after priority.
    pub fn total_intensity(&self, now: DateTime<Utc>) -> f64 {
        self.pheromones
            .values()
            .map(|entry| entry.intensity_at(now))
            .sum()
    }

    pub fn pheromone_readings(&self, now: DateTime<Utc>) -> Vec<PheromoneReading> {
        self.pheromones
            .values()
            .map(|entry| entry.reading(now))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobId, JobSpec};
    use chrono::{TimeDelta, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn job() -> Job {
        Job::new(JobId::generate(), JobSpec::new("g", "crawl"), 3, t0())
    }

    #[test]
    fn decays_exponentially() {
        let entry = PheromoneEntry {
            signal: "urgent".into(),
            initial_intensity: 100.0,
            deposited_at: t0(),
            decay_rate: 0.1,
        };
        let after_10s = entry.intensity_at(t0() + TimeDelta::seconds(10));
        assert!((after_10s - 100.0 * (-1.0f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn never_increases_between_deposits() {
        let entry = PheromoneEntry {
            signal: "s".into(),
            initial_intensity: 80.0,
            deposited_at: t0(),
            decay_rate: 0.05,
        };
        let mut previous = entry.intensity_at(t0());
        for step in 1..200 {
            let value = entry.intensity_at(t0() + TimeDelta::seconds(step));
            assert!(value <= previous);
            assert!(value >= 0.0);
            previous = value;
        }
    }

    #[test]
    fn clock_behind_deposit_reads_initial() {
        let entry = PheromoneEntry {
            signal: "s".into(),
            initial_intensity: 10.0,
            deposited_at: t0(),
            decay_rate: 1.0,
        };
        assert_eq!(entry.intensity_at(t0() - TimeDelta::seconds(30)), 10.0);
    }

    #[test]
    fn deposit_reinforces_and_caps() {
        let mut job = job();
        job.deposit_pheromone("hot", 60.0, 0.0, 100.0, t0()).unwrap();
        let entry = job.deposit_pheromone("hot", 60.0, 0.0, 100.0, t0()).unwrap();
        assert_eq!(entry.initial_intensity, 100.0);
        assert_eq!(job.pheromones.len(), 1);
    }

    #[test]
    fn deposit_rejects_negative_decay() {
        let mut job = job();
        let err = job
            .deposit_pheromone("hot", 1.0, -0.5, 100.0, t0())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidPheromone { .. }));
        assert!(job.pheromones.is_empty());
    }

    #[test]
    fn total_sums_all_signals() {
        let mut job = job();
        job.deposit_pheromone("a", 10.0, 0.0, 100.0, t0()).unwrap();
        job.deposit_pheromone("b", 5.0, 0.0, 100.0, t0()).unwrap();
        assert_eq!(job.total_intensity(t0()), 15.0);
    }
}
