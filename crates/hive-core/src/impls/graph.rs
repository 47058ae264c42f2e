//! Dependency index: an adjacency list over job ids.
//!
//! Design:
//! - Forward edges: job -> jobs it depends on (waits for)
//! - Reverse edges: job -> jobs that depend on it (waiting jobs)
//! - Invariant: edges and reverse_edges are kept in sync
//! - Invariant: the graph is acyclic; `add` checks reachability before inserting

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{DependencyEdge, EngineError, JobId};

#[derive(Debug, Clone, Default)]
pub struct DependencyIndex {
    /// Forward edges: job -> jobs it depends on.
    edges: BTreeMap<JobId, BTreeSet<JobId>>,

    /// Reverse edges: job -> jobs waiting for it.
    reverse_edges: BTreeMap<JobId, BTreeSet<JobId>>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `edge` unless it would close a cycle.
    ///
    /// The edge job -> depends_on closes a cycle iff `job` is already reachable
    /// from `depends_on` (a self edge is the trivial case). On error the index
    /// is untouched. Returns false if the edge was already present.
    pub fn add(&mut self, edge: DependencyEdge) -> Result<bool, EngineError> {
        if self.contains(edge) {
            return Ok(false);
        }
        if self.reaches(edge.depends_on, edge.job_id) {
            return Err(EngineError::CyclicDependency {
                job_id: edge.job_id,
                depends_on: edge.depends_on,
            });
        }
        self.edges
            .entry(edge.job_id)
            .or_default()
            .insert(edge.depends_on);
        self.reverse_edges
            .entry(edge.depends_on)
            .or_default()
            .insert(edge.job_id);
        Ok(true)
    }

    pub fn remove(&mut self, edge: DependencyEdge) -> bool {
        let removed = remove_from(&mut self.edges, edge.job_id, edge.depends_on);
        remove_from(&mut self.reverse_edges, edge.depends_on, edge.job_id);
        removed
    }

    pub fn contains(&self, edge: DependencyEdge) -> bool {
        self.edges
            .get(&edge.job_id)
            .is_some_and(|deps| deps.contains(&edge.depends_on))
    }

    /// Drop a job and its outgoing edges. Callers check `dependents_of` first.
    pub fn remove_job(&mut self, job: JobId) {
        for dep in self.dependencies_of(job) {
            self.remove(DependencyEdge::new(job, dep));
        }
        self.edges.remove(&job);
    }

    pub fn dependencies_of(&self, job: JobId) -> Vec<JobId> {
        self.edges
            .get(&job)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn dependents_of(&self, job: JobId) -> Vec<JobId> {
        self.reverse_edges
            .get(&job)
            .map(|waiting| waiting.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn has_dependents(&self, job: JobId) -> bool {
        self.reverse_edges
            .get(&job)
            .is_some_and(|waiting| !waiting.is_empty())
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Is `to` reachable from `from` by following dependency edges?
    pub fn reaches(&self, from: JobId, to: JobId) -> bool {
        if from == to {
            return true;
        }
        let mut visited = BTreeSet::new();
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            for &dep in self.edges.get(&node).into_iter().flatten() {
                if dep == to {
                    return true;
                }
                stack.push(dep);
            }
        }
        false
    }

    /// Transitive dependencies of `job`, dependencies before dependents.
    /// `job` itself is not included.
    pub fn topological_closure(&self, job: JobId) -> Vec<JobId> {
        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        visited.insert(job);
        for dep in self.dependencies_of(job) {
            self.post_order(dep, &mut visited, &mut order);
        }
        order
    }

    fn post_order(&self, node: JobId, visited: &mut BTreeSet<JobId>, order: &mut Vec<JobId>) {
        if !visited.insert(node) {
            return;
        }
        for dep in self.dependencies_of(node) {
            self.post_order(dep, visited, order);
        }
        order.push(node);
    }

    /// Full-graph check (three-colour DFS). `add` keeps this `None`;
    /// it exists to verify that claim.
    pub fn detect_cycle(&self) -> Option<Vec<JobId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            Gray,
            Black,
        }

        fn visit(
            index: &DependencyIndex,
            node: JobId,
            colors: &mut BTreeMap<JobId, Color>,
            path: &mut Vec<JobId>,
        ) -> Option<Vec<JobId>> {
            colors.insert(node, Color::Gray);
            path.push(node);
            for dep in index.dependencies_of(node) {
                match colors.get(&dep) {
                    Some(Color::Gray) => {
                        let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                        let mut cycle = path[start..].to_vec();
                        cycle.push(dep);
                        return Some(cycle);
                    }
                    Some(Color::Black) => {}
                    None => {
                        if let Some(cycle) = visit(index, dep, colors, path) {
                            return Some(cycle);
                        }
                    }
                }
            }
            path.pop();
            colors.insert(node, Color::Black);
            None
        }

        let mut colors = BTreeMap::new();
        for &node in self.edges.keys() {
            if colors.contains_key(&node) {
                continue;
            }
            let mut path = Vec::new();
            if let Some(cycle) = visit(self, node, &mut colors, &mut path) {
                return Some(cycle);
            }
        }
        None
    }
}

fn remove_from(map: &mut BTreeMap<JobId, BTreeSet<JobId>>, key: JobId, value: JobId) -> bool {
    match map.entry(key) {
        Entry::Occupied(mut e) => {
            let removed = e.get_mut().remove(&value);
            if e.get().is_empty() {
                e.remove_entry();
            }
            removed
        }
        Entry::Vacant(_) => false,
    }
}
