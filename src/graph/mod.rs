//! In-memory dependency graph analysis over a task snapshot.
//!
//! A [`DependencyGraph`] is built from a slice of tasks and answers structural
//! questions: cycles, topological order, readiness, blast radius of a change.
//! It never touches storage; callers take a snapshot from the store and query
//! it. Input order is preserved everywhere, so the same snapshot always gives
//! the same answers.

mod cycle;
mod order;

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::model::{TaskRecord, TaskStatus};

/// Tasks affected if a given task slips or changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpactAnalysis {
    /// Tasks that depend on the target directly.
    pub directly_affected: Vec<String>,
    /// Tasks further downstream, direct dependents excluded.
    pub transitively_affected: Vec<String>,
}

/// Analysis view over a snapshot of tasks.
///
/// Edges point from a task to the tasks it depends on. Dependencies naming
/// ids outside the snapshot are kept; they count as never satisfied for
/// readiness and as chain leaves, but cannot form cycles.
pub struct DependencyGraph {
    tasks: HashMap<String, TaskRecord>,
    order: Vec<String>,
    edges: HashMap<String, Vec<String>>,
    reverse: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph from a snapshot. On duplicate ids the first record
    /// wins. Duplicate dependency entries within one task collapse to one
    /// edge.
    pub fn new(tasks: &[TaskRecord]) -> Self {
        let mut map: HashMap<String, TaskRecord> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut edges: HashMap<String, Vec<String>> = HashMap::new();

        for task in tasks {
            if map.contains_key(&task.id) {
                continue;
            }
            let mut deps: Vec<String> = Vec::new();
            for dep in &task.depends_on {
                if !deps.contains(dep) {
                    deps.push(dep.clone());
                }
            }
            order.push(task.id.clone());
            edges.insert(task.id.clone(), deps);
            map.insert(task.id.clone(), task.clone());
        }

        let mut reverse: HashMap<String, Vec<String>> = HashMap::new();
        for id in &order {
            for dep in &edges[id] {
                reverse.entry(dep.clone()).or_default().push(id.clone());
            }
        }

        Self {
            tasks: map,
            order,
            edges,
            reverse,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.get(task_id)
    }

    /// All distinct dependency cycles. Empty exactly when
    /// [`topological_sort`](Self::topological_sort) succeeds.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        cycle::find_cycles(&self.order, &self.edges)
    }

    /// Order tasks so every task comes after its dependencies. Fails on a
    /// cyclic graph, reporting one offending cycle.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        order::topological_sort(&self.order, &self.edges)
    }

    /// The longest dependency chain, start to finish. Empty for an empty
    /// graph; fails like [`topological_sort`](Self::topological_sort) on a
    /// cyclic one.
    pub fn critical_path(&self) -> Result<Vec<String>> {
        order::critical_path(&self.order, &self.edges)
    }

    /// Tasks that can be started now: status `todo` with every dependency
    /// done. Sorted by priority (urgent first), then by creation time.
    pub fn ready_tasks(&self) -> Vec<TaskRecord> {
        let mut ready: Vec<TaskRecord> = self
            .order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter(|t| t.status == TaskStatus::Todo && self.deps_satisfied(&t.id))
            .cloned()
            .collect();
        ready.sort_by_key(|t| (t.priority.rank(), t.created_at));
        ready
    }

    /// Tasks in `todo` that are waiting on at least one unfinished
    /// dependency. Sorted like [`ready_tasks`](Self::ready_tasks).
    pub fn blocked_tasks(&self) -> Vec<TaskRecord> {
        let mut blocked: Vec<TaskRecord> = self
            .order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter(|t| t.status == TaskStatus::Todo && !self.deps_satisfied(&t.id))
            .cloned()
            .collect();
        blocked.sort_by_key(|t| (t.priority.rank(), t.created_at));
        blocked
    }

    /// The unfinished dependencies of one task, in declaration order.
    /// Dependencies on ids outside the snapshot are always unfinished.
    pub fn blocking_tasks(&self, task_id: &str) -> Result<Vec<String>> {
        if !self.tasks.contains_key(task_id) {
            return Err(Error::TaskNotFound(task_id.to_string()));
        }
        let deps = self.edges.get(task_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(deps
            .iter()
            .filter(|dep| !self.is_done(dep))
            .cloned()
            .collect())
    }

    /// Who is affected if this task slips. Direct dependents are listed
    /// separately from the rest of the downstream closure; the task itself
    /// appears in neither.
    pub fn impact_analysis(&self, task_id: &str) -> Result<ImpactAnalysis> {
        if !self.tasks.contains_key(task_id) {
            return Err(Error::TaskNotFound(task_id.to_string()));
        }

        let direct = self.reverse.get(task_id).map(Vec::as_slice).unwrap_or(&[]);
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(task_id);
        for id in direct {
            visited.insert(id.as_str());
        }

        let mut queue: VecDeque<&str> = direct.iter().map(String::as_str).collect();
        let mut transitive: Vec<String> = Vec::new();
        while let Some(node) = queue.pop_front() {
            let dependents = self.reverse.get(node).map(Vec::as_slice).unwrap_or(&[]);
            for dependent in dependents {
                if visited.insert(dependent.as_str()) {
                    transitive.push(dependent.clone());
                    queue.push_back(dependent.as_str());
                }
            }
        }

        Ok(ImpactAnalysis {
            directly_affected: direct.to_vec(),
            transitively_affected: transitive,
        })
    }

    /// Every dependency chain rooted at the task, each at most `max_depth`
    /// ids long. A dependency already on the current chain is not followed
    /// again, so cyclic graphs terminate.
    pub fn dependency_chains(&self, task_id: &str, max_depth: usize) -> Result<Vec<Vec<String>>> {
        if !self.tasks.contains_key(task_id) {
            return Err(Error::TaskNotFound(task_id.to_string()));
        }
        let mut chains: Vec<Vec<String>> = Vec::new();
        let mut path = vec![task_id.to_string()];
        self.extend_chain(task_id, max_depth, &mut path, &mut chains);
        Ok(chains)
    }

    /// Check that `task_id -> depends_on_id` could be added: both tasks must
    /// exist here, the edge must be new, and it must not close a cycle.
    pub fn validate_dependency(&self, task_id: &str, depends_on_id: &str) -> Result<()> {
        if !self.tasks.contains_key(task_id) {
            return Err(Error::TaskNotFound(task_id.to_string()));
        }
        if !self.tasks.contains_key(depends_on_id) {
            return Err(Error::TaskNotFound(depends_on_id.to_string()));
        }
        if task_id == depends_on_id {
            return Err(Error::SelfDependency(task_id.to_string()));
        }
        let existing = self.edges.get(task_id).map(Vec::as_slice).unwrap_or(&[]);
        if existing.iter().any(|dep| dep == depends_on_id) {
            return Err(Error::DependencyExists {
                task_id: task_id.to_string(),
                depends_on_id: depends_on_id.to_string(),
            });
        }
        if let Some(cycle) = cycle::simulate_edge_cycle(&self.edges, task_id, depends_on_id) {
            return Err(Error::CyclicDependency { cycle });
        }
        Ok(())
    }

    fn deps_satisfied(&self, task_id: &str) -> bool {
        let deps = self.edges.get(task_id).map(Vec::as_slice).unwrap_or(&[]);
        deps.iter().all(|dep| self.is_done(dep))
    }

    fn is_done(&self, task_id: &str) -> bool {
        self.tasks
            .get(task_id)
            .map(|t| t.status == TaskStatus::Done)
            .unwrap_or(false)
    }

    fn extend_chain(
        &self,
        node: &str,
        max_depth: usize,
        path: &mut Vec<String>,
        chains: &mut Vec<Vec<String>>,
    ) {
        let deps = self.edges.get(node).map(Vec::as_slice).unwrap_or(&[]);
        if path.len() >= max_depth || deps.is_empty() {
            chains.push(path.clone());
            return;
        }
        let mut extended = false;
        for dep in deps {
            if path.iter().any(|p| p == dep) {
                continue;
            }
            path.push(dep.clone());
            self.extend_chain(dep, max_depth, path, chains);
            path.pop();
            extended = true;
        }
        if !extended {
            chains.push(path.clone());
        }
    }
}
