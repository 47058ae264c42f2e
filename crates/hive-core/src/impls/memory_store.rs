//! In-memory job store.
//!
//! One `tokio::sync::Mutex` guards all state, which makes every operation
//! trivially atomic: per-record mutations, edge insertion with its cycle check,
//! and batch imports. No await happens while the guard is held except the
//! acquisition itself.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::graph::DependencyIndex;
use crate::domain::{DependencyEdge, EngineError, Job, JobFilter, JobId, JobStatus};
use crate::ports::{JobStore, Mutation, Precondition, StatusCounts};

#[derive(Default)]
struct StoreState {
    /// All job records (single source of truth).
    jobs: HashMap<JobId, Job>,

    /// Dependency edges plus reverse index.
    graph: DependencyIndex,

    /// Secondary index on (group_id, status).
    by_group_status: HashMap<(String, JobStatus), BTreeSet<JobId>>,
}

impl StoreState {
    fn job(&self, id: JobId) -> Result<&Job, EngineError> {
        self.jobs.get(&id).ok_or_else(|| EngineError::job_not_found(id))
    }

    fn index_insert(&mut self, job: &Job) {
        self.by_group_status
            .entry((job.group_id.clone(), job.status))
            .or_default()
            .insert(job.id);
    }

    fn index_remove(&mut self, group_id: &str, status: JobStatus, id: JobId) {
        let key = (group_id.to_string(), status);
        if let Some(ids) = self.by_group_status.get_mut(&key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_group_status.remove(&key);
            }
        }
    }

    /// Ids matching the indexed part of the filter; `None` means "scan everything".
    fn candidates(&self, filter: &JobFilter) -> Option<Vec<JobId>> {
        let group = filter.group_id.as_ref()?;
        let statuses: Vec<JobStatus> = match filter.status {
            Some(status) => vec![status],
            None => JobStatus::ALL.to_vec(),
        };
        let ids = statuses
            .into_iter()
            .filter_map(|status| self.by_group_status.get(&(group.clone(), status)))
            .flatten()
            .copied()
            .collect();
        Some(ids)
    }

    /// Copy the graph's view of `id`'s dependencies into the record.
    fn sync_dependencies(&mut self, id: JobId) {
        let deps: BTreeSet<JobId> = self.graph.dependencies_of(id).into_iter().collect();
        if let Some(job) = self.jobs.get_mut(&id) {
            if job.dependencies != deps {
                job.dependencies = deps;
                job.version += 1;
            }
        }
    }
}

/// In-memory `JobStore`.
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn listing_order(a: &Job, b: &Job) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<Job, EngineError> {
        let edges = job
            .dependencies
            .iter()
            .map(|&dep| DependencyEdge::new(job.id, dep))
            .collect();
        let mut inserted = self.insert_batch(vec![job], edges).await?;
        inserted
            .pop()
            .ok_or_else(|| EngineError::InvalidPlan("empty insert".into()))
    }

    async fn insert_batch(
        &self,
        jobs: Vec<Job>,
        edges: Vec<DependencyEdge>,
    ) -> Result<Vec<Job>, EngineError> {
        let mut state = self.state.lock().await;

        let mut incoming = BTreeSet::new();
        for job in &jobs {
            if state.jobs.contains_key(&job.id) || !incoming.insert(job.id) {
                return Err(EngineError::AlreadyExists(job.id));
            }
        }

        // Wire edges on a scratch copy so a rejected batch leaves no trace.
        let mut graph = state.graph.clone();
        for edge in &edges {
            for id in [edge.job_id, edge.depends_on] {
                if !incoming.contains(&id) && !state.jobs.contains_key(&id) {
                    return Err(EngineError::job_not_found(id));
                }
            }
            graph.add(*edge)?;
        }
        state.graph = graph;

        let mut touched_existing = BTreeSet::new();
        for edge in &edges {
            if !incoming.contains(&edge.job_id) {
                touched_existing.insert(edge.job_id);
            }
        }

        let mut inserted = Vec::with_capacity(jobs.len());
        for mut job in jobs {
            job.dependencies = state.graph.dependencies_of(job.id).into_iter().collect();
            job.version = 1;
            state.index_insert(&job);
            state.jobs.insert(job.id, job.clone());
            inserted.push(job);
        }
        for id in touched_existing {
            state.sync_dependencies(id);
        }

        debug!(jobs = inserted.len(), edges = edges.len(), "inserted batch");
        Ok(inserted)
    }

    async fn get(&self, id: JobId) -> Result<Job, EngineError> {
        let state = self.state.lock().await;
        state.job(id).cloned()
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, EngineError> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = match state.candidates(filter) {
            Some(ids) => ids
                .into_iter()
                .filter_map(|id| state.jobs.get(&id))
                .filter(|job| filter.matches(job))
                .cloned()
                .collect(),
            None => state
                .jobs
                .values()
                .filter(|job| filter.matches(job))
                .cloned()
                .collect(),
        };
        jobs.sort_by(listing_order);
        Ok(jobs)
    }

    async fn modify(&self, id: JobId, mutation: Mutation) -> Result<Job, EngineError> {
        let mut state = self.state.lock().await;
        let current = state.job(id)?;

        let mut next = current.clone();
        mutation(&mut next)?;

        // Identity, grouping of edges and versioning belong to the store.
        next.id = current.id;
        next.dependencies = current.dependencies.clone();
        next.created_at = current.created_at;
        next.version = current.version + 1;

        let (old_group, old_status) = (current.group_id.clone(), current.status);
        if old_group != next.group_id || old_status != next.status {
            state.index_remove(&old_group, old_status, id);
            state.index_insert(&next);
        }
        state.jobs.insert(id, next.clone());
        Ok(next)
    }

    async fn delete(&self, id: JobId, precondition: Precondition) -> Result<Job, EngineError> {
        let mut state = self.state.lock().await;
        let job = state.job(id)?;

        if state.graph.has_dependents(id) {
            return Err(EngineError::HasDependents {
                job_id: id,
                dependents: state.graph.dependents_of(id),
            });
        }
        precondition(job)?;

        let deps = state.graph.dependencies_of(id);
        state.graph.remove_job(id);
        let removed = state
            .jobs
            .remove(&id)
            .ok_or_else(|| EngineError::job_not_found(id))?;
        state.index_remove(&removed.group_id, removed.status, id);
        debug!(job_id = %id, released_edges = deps.len(), "deleted job");
        Ok(removed)
    }

    async fn add_dependency(&self, edge: DependencyEdge) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state.job(edge.job_id)?;
        state.job(edge.depends_on)?;
        if state.graph.add(edge)? {
            state.sync_dependencies(edge.job_id);
        }
        Ok(())
    }

    async fn remove_dependency(&self, edge: DependencyEdge) -> Result<bool, EngineError> {
        let mut state = self.state.lock().await;
        state.job(edge.job_id)?;
        let removed = state.graph.remove(edge);
        if removed {
            state.sync_dependencies(edge.job_id);
        }
        Ok(removed)
    }

    async fn dependency_closure(&self, id: JobId) -> Result<Vec<JobId>, EngineError> {
        let state = self.state.lock().await;
        state.job(id)?;
        Ok(state.graph.topological_closure(id))
    }

    async fn dependents_of(&self, id: JobId) -> Result<Vec<JobId>, EngineError> {
        let state = self.state.lock().await;
        state.job(id)?;
        Ok(state.graph.dependents_of(id))
    }

    async fn counts(&self, group_id: Option<&str>) -> Result<StatusCounts, EngineError> {
        let state = self.state.lock().await;
        let mut counts: StatusCounts = JobStatus::ALL.iter().map(|&s| (s, 0)).collect();
        for job in state.jobs.values() {
            if group_id.is_none_or(|group| job.group_id == group) {
                *counts.entry(job.status).or_default() += 1;
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
impl InMemoryJobStore {
    pub(crate) async fn edge_count(&self) -> usize {
        self.state.lock().await.graph.edge_count()
    }

    /// Group ids currently present, sorted.
    pub(crate) async fn groups(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let groups: BTreeSet<&str> = state
            .jobs
            .values()
            .map(|job| job.group_id.as_str())
            .collect();
        groups.into_iter().map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentId, JobSpec};
    use chrono::{DateTime, TimeZone, Utc};
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn job(group: &str, title: &str, priority: i64) -> Job {
        Job::new(
            JobId::generate(),
            JobSpec::new(group, title).with_priority(priority),
            3,
            t0(),
        )
    }

    fn no_check() -> Precondition {
        Box::new(|_| Ok(()))
    }

    #[tokio::test]
    async fn insert_get_and_list_in_priority_order() {
        let store = InMemoryJobStore::new();
        let low = store.insert(job("g", "low", 1)).await.unwrap();
        let high = store.insert(job("g", "high", 9)).await.unwrap();
        store.insert(job("other", "elsewhere", 5)).await.unwrap();

        assert_eq!(store.get(low.id).await.unwrap().title, "low");

        let listed = store.list(&JobFilter::new().group("g")).await.unwrap();
        let titles: Vec<_> = listed.iter().map(|j| j.title.as_str()).collect();
        assert_eq!(titles, vec!["high", "low"]);
        assert_eq!(listed[0].id, high.id);

        let all = store.list(&JobFilter::new()).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = InMemoryJobStore::new();
        let j = job("g", "a", 0);
        store.insert(j.clone()).await.unwrap();
        assert!(matches!(
            store.insert(j).await,
            Err(EngineError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn modify_commits_only_on_success() {
        let store = InMemoryJobStore::new();
        let j = store.insert(job("g", "a", 0)).await.unwrap();

        let err = store
            .modify(
                j.id,
                Box::new(|job| {
                    job.title = "changed".into();
                    Err(EngineError::InvalidPlan("nope".into()))
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidPlan(_)));
        let unchanged = store.get(j.id).await.unwrap();
        assert_eq!(unchanged.title, "a");
        assert_eq!(unchanged.version, 1);

        let changed = store
            .modify(
                j.id,
                Box::new(|job| {
                    job.title = "changed".into();
                    Ok(())
                }),
            )
            .await
            .unwrap();
        assert_eq!(changed.title, "changed");
        assert_eq!(changed.version, 2);
    }

    #[tokio::test]
    async fn status_index_follows_mutations() {
        let store = InMemoryJobStore::new();
        let j = store.insert(job("g", "a", 0)).await.unwrap();
        let agent = AgentId::new("a");
        store
            .modify(
                j.id,
                Box::new(move |job| {
                    job.try_lock(&agent, "A", Duration::from_secs(30), t0())
                        .map(|_| ())
                }),
            )
            .await
            .unwrap();

        let pending = JobFilter::new().group("g").status(JobStatus::Pending);
        let locked = JobFilter::new().group("g").status(JobStatus::Locked);
        assert!(store.list(&pending).await.unwrap().is_empty());
        assert_eq!(store.list(&locked).await.unwrap().len(), 1);

        let counts = store.counts(Some("g")).await.unwrap();
        assert_eq!(counts[&JobStatus::Locked], 1);
        assert_eq!(counts[&JobStatus::Pending], 0);
    }

    #[tokio::test]
    async fn delete_with_dependents_is_rejected() {
        let store = InMemoryJobStore::new();
        let a = store.insert(job("g", "a", 0)).await.unwrap();
        let b = store.insert(job("g", "b", 0)).await.unwrap();
        store
            .add_dependency(DependencyEdge::new(b.id, a.id))
            .await
            .unwrap();

        let err = store.delete(a.id, no_check()).await.unwrap_err();
        assert!(matches!(err, EngineError::HasDependents { ref dependents, .. } if dependents == &vec![b.id]));

        store.delete(b.id, no_check()).await.unwrap();
        assert_eq!(store.edge_count().await, 0);
        store.delete(a.id, no_check()).await.unwrap();
        assert!(matches!(
            store.get(a.id).await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn failing_precondition_keeps_the_job() {
        let store = InMemoryJobStore::new();
        let a = store.insert(job("g", "a", 0)).await.unwrap();
        let err = store
            .delete(
                a.id,
                Box::new(|job| {
                    Err(EngineError::AlreadyLocked {
                        job_id: job.id,
                        holder: AgentId::new("x"),
                    })
                }),
            )
            .await
            .unwrap_err();
        assert!(err.is_contention());
        assert!(store.get(a.id).await.is_ok());
    }

    #[tokio::test]
    async fn edges_are_mirrored_on_the_record() {
        let store = InMemoryJobStore::new();
        let a = store.insert(job("g", "a", 0)).await.unwrap();
        let b = store.insert(job("g", "b", 0)).await.unwrap();
        store
            .add_dependency(DependencyEdge::new(b.id, a.id))
            .await
            .unwrap();
        assert!(store.get(b.id).await.unwrap().dependencies.contains(&a.id));

        assert!(
            store
                .remove_dependency(DependencyEdge::new(b.id, a.id))
                .await
                .unwrap()
        );
        assert!(store.get(b.id).await.unwrap().dependencies.is_empty());
    }

    #[tokio::test]
    async fn batch_with_cycle_leaves_nothing_behind() {
        let store = InMemoryJobStore::new();
        let a = job("g", "a", 0);
        let b = job("g", "b", 0);
        let edges = vec![
            DependencyEdge::new(b.id, a.id),
            DependencyEdge::new(a.id, b.id),
        ];
        let err = store
            .insert_batch(vec![a.clone(), b.clone()], edges)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CyclicDependency { .. }));
        assert!(store.list(&JobFilter::new()).await.unwrap().is_empty());
        assert_eq!(store.edge_count().await, 0);
    }

    #[tokio::test]
    async fn batch_can_point_at_existing_jobs() {
        let store = InMemoryJobStore::new();
        let existing = store.insert(job("g", "existing", 0)).await.unwrap();
        let fresh = job("g", "fresh", 0);
        let inserted = store
            .insert_batch(
                vec![fresh.clone()],
                vec![DependencyEdge::new(fresh.id, existing.id)],
            )
            .await
            .unwrap();
        assert!(inserted[0].dependencies.contains(&existing.id));
        assert_eq!(store.dependents_of(existing.id).await.unwrap(), vec![fresh.id]);
        assert_eq!(store.groups().await, vec!["g".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_lock_attempts_produce_one_winner() {
        let store = Arc::new(InMemoryJobStore::new());
        let job_id = store.insert(job("g", "contested", 0)).await.unwrap().id;

        let mut handles = Vec::new();
        for n in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let agent = AgentId::new(format!("agent-{n}"));
                store
                    .modify(
                        job_id,
                        Box::new(move |job| {
                            job.try_lock(&agent, "racer", Duration::from_secs(30), t0())
                                .map(|_| ())
                        }),
                    )
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(err) => assert!(err.is_contention()),
            }
        }
        assert_eq!(winners, 1);
    }
}
