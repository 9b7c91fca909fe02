//! # Dependency Graph
//!
//! Directed acyclic graph of [`WorkItem`]s. Edges point from a dependency to its
//! dependents; a dependent never becomes ready before every dependency has
//! completed.
//!
//! ## Invariants
//!
//! - The graph is always acyclic. [`DependencyGraph::add_dependency`] checks
//!   reachability before inserting, so a rejected edge never touches the graph.
//! - Iteration follows insertion order, which keeps topological orders and
//!   parallel groups deterministic for equal inputs.
//! - The critical path is cached and the cache is dropped on every structural
//!   mutation.

use super::errors::{OrchestrationError, OrchestrationResult};
use super::work_item::{WorkItem, WorkItemStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::OnceLock;
use tracing::debug;

/// Structural summary produced by [`DependencyGraph::validate`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphValidation {
    pub is_dag: bool,
    pub node_count: usize,
    pub edge_count: usize,
    /// Items with neither dependencies nor dependents
    pub isolated: Vec<String>,
    pub critical_path: Vec<String>,
    pub level_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    order: Vec<String>,
    items: HashMap<String, WorkItem>,
    dependents: HashMap<String, BTreeSet<String>>,
    critical_path_cache: OnceLock<Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&WorkItem> {
        self.items.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut WorkItem> {
        self.items.get_mut(id)
    }

    /// Work items in insertion order
    pub fn work_items(&self) -> impl Iterator<Item = &WorkItem> {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    /// Insert a work item.
    ///
    /// Dependencies declared on the item must already be present. A new item
    /// has no dependents, so wiring its declared dependencies cannot close a
    /// cycle unless the item names itself.
    pub fn add_work_item(&mut self, item: WorkItem) -> OrchestrationResult<()> {
        if self.items.contains_key(&item.id) {
            return Err(OrchestrationError::DuplicateWorkItem { id: item.id });
        }
        if item.dependencies.contains(&item.id) {
            return Err(OrchestrationError::CycleDetected {
                dependent: item.id.clone(),
                dependency: item.id.clone(),
                cycle: vec![item.id.clone(), item.id],
            });
        }
        if let Some(missing) = item
            .dependencies
            .iter()
            .find(|dep| !self.items.contains_key(*dep))
        {
            return Err(OrchestrationError::WorkItemNotFound {
                id: missing.clone(),
            });
        }

        for dependency in &item.dependencies {
            self.dependents
                .entry(dependency.clone())
                .or_default()
                .insert(item.id.clone());
        }
        self.order.push(item.id.clone());
        self.items.insert(item.id.clone(), item);
        self.invalidate();
        Ok(())
    }

    /// Insert the edge `dependency -> dependent`.
    ///
    /// Existing edges are accepted as a no-op. An edge that would close a cycle
    /// is rejected with the cycle path, starting and ending at `dependency`.
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) -> OrchestrationResult<()> {
        for id in [dependent, dependency] {
            if !self.items.contains_key(id) {
                return Err(OrchestrationError::WorkItemNotFound { id: id.to_string() });
            }
        }

        let already_linked = self
            .items
            .get(dependent)
            .is_some_and(|item| item.dependencies.contains(dependency));
        if already_linked {
            return Ok(());
        }

        if let Some(path) = self.path_between(dependent, dependency) {
            let mut cycle = Vec::with_capacity(path.len() + 1);
            cycle.push(dependency.to_string());
            cycle.extend(path);
            debug!(
                dependent = %dependent,
                dependency = %dependency,
                cycle = ?cycle,
                "Rejected dependency that would create a cycle"
            );
            return Err(OrchestrationError::CycleDetected {
                dependent: dependent.to_string(),
                dependency: dependency.to_string(),
                cycle,
            });
        }

        if let Some(item) = self.items.get_mut(dependent) {
            item.dependencies.insert(dependency.to_string());
        }
        self.dependents
            .entry(dependency.to_string())
            .or_default()
            .insert(dependent.to_string());
        self.invalidate();
        Ok(())
    }

    /// Path `from -> ... -> to` following dependency edges, if one exists
    fn path_between(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let mut previous: HashMap<&str, &str> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::from([from]);
        let mut queue: VecDeque<&str> = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![current.to_string()];
                let mut cursor = current;
                while let Some(prev) = previous.get(cursor) {
                    path.push(prev.to_string());
                    cursor = *prev;
                }
                path.reverse();
                return Some(path);
            }
            for next in self.dependents.get(current).into_iter().flatten() {
                if visited.insert(next.as_str()) {
                    previous.insert(next.as_str(), current);
                    queue.push_back(next.as_str());
                }
            }
        }
        None
    }

    fn invalidate(&mut self) {
        self.critical_path_cache = OnceLock::new();
    }

    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.dependents
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All edges as `(dependency, dependent)` pairs, sorted
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut edges: Vec<(String, String)> = self
            .dependents
            .iter()
            .flat_map(|(dependency, dependents)| {
                dependents
                    .iter()
                    .map(move |dependent| (dependency.clone(), dependent.clone()))
            })
            .collect();
        edges.sort();
        edges
    }

    pub fn edge_count(&self) -> usize {
        self.dependents.values().map(BTreeSet::len).sum()
    }

    pub fn set_status(&mut self, id: &str, status: WorkItemStatus) -> OrchestrationResult<()> {
        let item = self
            .items
            .get_mut(id)
            .ok_or_else(|| OrchestrationError::WorkItemNotFound { id: id.to_string() })?;
        item.status = status;
        Ok(())
    }

    /// PENDING items whose dependencies are all COMPLETED, highest priority
    /// first and insertion order within a priority
    pub fn ready_work_items(&self) -> Vec<String> {
        let mut ready: Vec<(usize, &WorkItem)> = self
            .order
            .iter()
            .enumerate()
            .filter_map(|(position, id)| self.items.get(id).map(|item| (position, item)))
            .filter(|(_, item)| item.status == WorkItemStatus::Pending)
            .filter(|(_, item)| {
                item.dependencies.iter().all(|dep| {
                    self.items
                        .get(dep)
                        .is_some_and(|d| d.status == WorkItemStatus::Completed)
                })
            })
            .collect();
        ready.sort_by(|(pa, a), (pb, b)| b.priority.cmp(&a.priority).then(pa.cmp(pb)));
        ready.into_iter().map(|(_, item)| item.id.clone()).collect()
    }

    /// Topological order, ties broken by insertion order
    pub fn execution_order(&self) -> OrchestrationResult<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|id| {
                let degree = self.items.get(id).map_or(0, |item| item.dependencies.len());
                (id.as_str(), degree)
            })
            .collect();
        let position: HashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut available: BTreeSet<(usize, &str)> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| (position[id], *id))
            .collect();
        let mut result = Vec::with_capacity(self.order.len());

        while let Some(next) = available.pop_first() {
            let (_, id) = next;
            result.push(id.to_string());
            for dependent in self.dependents.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        available.insert((position[dependent.as_str()], dependent.as_str()));
                    }
                }
            }
        }

        if result.len() != self.order.len() {
            let done: HashSet<&str> = result.iter().map(String::as_str).collect();
            let remaining = self
                .order
                .iter()
                .filter(|id| !done.contains(id.as_str()))
                .cloned()
                .collect();
            return Err(OrchestrationError::NotADag { remaining });
        }
        Ok(result)
    }

    /// Longest chain by edge count, cached until the graph changes
    pub fn critical_path(&self) -> Vec<String> {
        self.critical_path_cache
            .get_or_init(|| self.compute_critical_path())
            .clone()
    }

    fn compute_critical_path(&self) -> Vec<String> {
        let Ok(order) = self.execution_order() else {
            return Vec::new();
        };

        let mut depth: HashMap<&str, usize> = HashMap::new();
        let mut predecessor: HashMap<&str, &str> = HashMap::new();
        let mut deepest: Option<(&str, usize)> = None;

        for id in &order {
            let item = &self.items[id];
            let mut best = 0;
            for dep in &item.dependencies {
                let candidate = depth.get(dep.as_str()).copied().unwrap_or(0) + 1;
                if candidate > best {
                    best = candidate;
                    predecessor.insert(id.as_str(), dep.as_str());
                }
            }
            depth.insert(id.as_str(), best);
            if deepest.map_or(true, |(_, d)| best > d) {
                deepest = Some((id.as_str(), best));
            }
        }

        let Some((mut cursor, _)) = deepest else {
            return Vec::new();
        };
        let mut path = vec![cursor.to_string()];
        while let Some(prev) = predecessor.get(cursor) {
            path.push(prev.to_string());
            cursor = *prev;
        }
        path.reverse();
        path
    }

    /// Levels by longest distance from a root; items in one level never depend
    /// on each other
    pub fn parallel_groups(&self) -> OrchestrationResult<Vec<Vec<String>>> {
        let order = self.execution_order()?;
        let mut level: HashMap<&str, usize> = HashMap::new();
        let mut groups: Vec<Vec<String>> = Vec::new();

        for id in &order {
            let item = &self.items[id];
            let item_level = item
                .dependencies
                .iter()
                .filter_map(|dep| level.get(dep.as_str()))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(id.as_str(), item_level);
            if groups.len() <= item_level {
                groups.resize_with(item_level + 1, Vec::new);
            }
            groups[item_level].push(id.clone());
        }
        Ok(groups)
    }

    /// Mark every transitive dependent of `id` that has not started as BLOCKED.
    /// Returns the newly blocked ids in traversal order.
    pub fn block_dependents(&mut self, id: &str) -> Vec<String> {
        let mut blocked = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = self.dependents_of(id).into();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(item) = self.items.get_mut(&current) {
                if item.status.is_schedulable() {
                    item.status = WorkItemStatus::Blocked;
                    blocked.push(current.clone());
                }
            }
            queue.extend(self.dependents_of(&current));
        }
        blocked
    }

    /// Items still PENDING or READY, which cannot progress once nothing is running
    pub fn unreachable_work_items(&self) -> Vec<String> {
        self.work_items()
            .filter(|item| item.status.is_schedulable())
            .map(|item| item.id.clone())
            .collect()
    }

    pub fn count_by_status(&self, status: WorkItemStatus) -> usize {
        self.items.values().filter(|item| item.status == status).count()
    }

    pub fn validate(&self) -> GraphValidation {
        let levels = self.parallel_groups();
        let isolated = self
            .work_items()
            .filter(|item| item.dependencies.is_empty())
            .filter(|item| self.dependents.get(&item.id).map_or(true, BTreeSet::is_empty))
            .map(|item| item.id.clone())
            .collect();

        GraphValidation {
            is_dag: levels.is_ok(),
            node_count: self.len(),
            edge_count: self.edge_count(),
            isolated,
            critical_path: self.critical_path(),
            level_count: levels.map(|groups| groups.len()).unwrap_or(0),
        }
    }
}
