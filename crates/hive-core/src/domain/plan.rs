//! Plans handed over by a job generator.
//!
//! A generator (typically LLM-backed) knows jobs only by local keys. The engine
//! assigns ids and wires the edges before any job becomes visible to scheduling.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::errors::EngineError;
use super::ids::JobId;
use super::job::{Job, JobSpec};

/// `job_id` cannot start before `depends_on` completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub job_id: JobId,
    pub depends_on: JobId,
}

impl DependencyEdge {
    pub fn new(job_id: JobId, depends_on: JobId) -> Self {
        Self { job_id, depends_on }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub group_id: String,
    pub jobs: Vec<PlannedJob>,

    /// Extra edges besides each job's own `depends_on` hints.
    #[serde(default)]
    pub edges: Vec<PlannedEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedJob {
    /// Plan-local name, unique within the plan.
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedEdge {
    pub job: String,
    pub depends_on: String,
}

impl PlannedJob {
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            description: String::new(),
            priority: 0,
            metadata: serde_json::Value::Null,
            max_attempts: None,
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, key: impl Into<String>) -> Self {
        self.depends_on.push(key.into());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn to_spec(&self, group_id: &str) -> JobSpec {
        JobSpec {
            group_id: group_id.to_string(),
            title: self.title.clone(),
            description: self.description.clone(),
            priority: self.priority,
            metadata: self.metadata.clone(),
            max_attempts: self.max_attempts,
        }
    }
}

impl Plan {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            jobs: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn job(mut self, job: PlannedJob) -> Self {
        self.jobs.push(job);
        self
    }

    /// Every edge as (job key, dependency key), deduplicated, in a stable order.
    pub fn keyed_edges(&self) -> Vec<(String, String)> {
        let mut edges = BTreeSet::new();
        for job in &self.jobs {
            for dep in &job.depends_on {
                edges.insert((job.key.clone(), dep.clone()));
            }
        }
        for edge in &self.edges {
            edges.insert((edge.job.clone(), edge.depends_on.clone()));
        }
        edges.into_iter().collect()
    }

    /// Key-level checks. Cycles are caught when the edges are wired.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.group_id.trim().is_empty() {
            return Err(EngineError::InvalidPlan("group_id is empty".into()));
        }
        let mut keys = BTreeSet::new();
        for job in &self.jobs {
            if !keys.insert(job.key.as_str()) {
                return Err(EngineError::InvalidPlan(format!(
                    "duplicate job key `{}`",
                    job.key
                )));
            }
        }
        for (job, dep) in self.keyed_edges() {
            for key in [&job, &dep] {
                if !keys.contains(key.as_str()) {
                    return Err(EngineError::InvalidPlan(format!(
                        "edge {job} -> {dep} references unknown key `{key}`"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// What `create_jobs_from_plan` hands back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanImport {
    pub jobs: Vec<Job>,
    pub dependency_edges: Vec<DependencyEdge>,
    /// Plan key -> assigned id.
    pub keys: BTreeMap<String, JobId>,
}
