//! Topological ordering and longest-chain analysis.

use std::collections::{HashMap, VecDeque};

use crate::error::{Error, Result};

use super::cycle::find_cycles;

/// Kahn's algorithm over the snapshot, dependencies first.
///
/// Only ids present in `order` participate; a dependency on an id outside the
/// snapshot is treated as already satisfied. The queue is seeded and drained
/// in input order, so equal graphs produce equal orderings. A graph that
/// cannot be fully ordered is cyclic, and the error carries one of its
/// cycles.
pub(crate) fn topological_sort(
    order: &[String],
    edges: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>> {
    let known: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for id in order {
        let deps = edges.get(id).map(Vec::as_slice).unwrap_or(&[]);
        let mut degree = 0;
        for dep in deps {
            if known.contains_key(dep.as_str()) {
                degree += 1;
                dependents.entry(dep.as_str()).or_default().push(id.as_str());
            }
        }
        in_degree.insert(id.as_str(), degree);
    }

    let mut queue: VecDeque<&str> = order
        .iter()
        .filter(|id| in_degree[id.as_str()] == 0)
        .map(|id| id.as_str())
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(order.len());
    while let Some(node) = queue.pop_front() {
        sorted.push(node.to_string());
        if let Some(next) = dependents.get(node) {
            for dependent in next {
                let degree = in_degree.get_mut(dependent).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    if sorted.len() < order.len() {
        let mut cycles = find_cycles(order, edges);
        let cycle = if cycles.is_empty() {
            Vec::new()
        } else {
            cycles.remove(0)
        };
        return Err(Error::CyclicDependency { cycle });
    }

    Ok(sorted)
}

/// Longest dependency chain, returned start to finish.
///
/// Chain length counts nodes, so an isolated task has length one. Ties are
/// broken toward earlier input positions at both the predecessor choice and
/// the endpoint, keeping the result deterministic. A cyclic graph has no
/// well-defined longest chain; the sort's cycle error passes through.
pub(crate) fn critical_path(
    order: &[String],
    edges: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>> {
    let sorted = topological_sort(order, edges)?;

    let mut dist: HashMap<&str, usize> = HashMap::new();
    let mut pred: HashMap<&str, &str> = HashMap::new();
    for id in &sorted {
        let mut best = 1;
        let deps = edges.get(id).map(Vec::as_slice).unwrap_or(&[]);
        for dep in deps {
            if let Some(&d) = dist.get(dep.as_str()) {
                if d + 1 > best {
                    best = d + 1;
                    pred.insert(id.as_str(), dep.as_str());
                }
            }
        }
        dist.insert(id.as_str(), best);
    }

    let mut end: Option<&str> = None;
    let mut end_dist = 0;
    for id in order {
        let d = dist.get(id.as_str()).copied().unwrap_or(0);
        if d > end_dist {
            end_dist = d;
            end = Some(id.as_str());
        }
    }

    let mut path: Vec<String> = Vec::with_capacity(end_dist);
    let mut cursor = end;
    while let Some(node) = cursor {
        path.push(node.to_string());
        cursor = pred.get(node).copied();
    }
    path.reverse();
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(pairs: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (task, dep) in pairs {
            map.entry(task.to_string()).or_default().push(dep.to_string());
        }
        map
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_sort_puts_dependencies_first() {
        let order = ids(&["c", "b", "a"]);
        let e = edges(&[("b", "a"), ("c", "b")]);
        let sorted = topological_sort(&order, &e).unwrap();
        assert_eq!(sorted, ids(&["a", "b", "c"]));
    }

    #[test]
    fn test_sort_preserves_input_order_for_independent_tasks() {
        let order = ids(&["z", "m", "a"]);
        let e = edges(&[]);
        let sorted = topological_sort(&order, &e).unwrap();
        assert_eq!(sorted, ids(&["z", "m", "a"]));
    }

    #[test]
    fn test_sort_ignores_unknown_dependencies() {
        let order = ids(&["a", "b"]);
        let e = edges(&[("a", "ghost"), ("b", "a")]);
        let sorted = topological_sort(&order, &e).unwrap();
        assert_eq!(sorted, ids(&["a", "b"]));
    }

    #[test]
    fn test_sort_fails_on_cycle_with_cycle_reported() {
        let order = ids(&["a", "b"]);
        let e = edges(&[("a", "b"), ("b", "a")]);
        let err = topological_sort(&order, &e).unwrap_err();
        match err {
            Error::CyclicDependency { cycle } => {
                assert_eq!(cycle, ids(&["a", "b", "a"]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_critical_path_follows_longest_chain() {
        let order = ids(&["a", "b", "c", "x"]);
        let e = edges(&[("b", "a"), ("c", "b")]);
        assert_eq!(critical_path(&order, &e).unwrap(), ids(&["a", "b", "c"]));
    }

    #[test]
    fn test_critical_path_diamond_prefers_first_listed_branch() {
        let order = ids(&["a", "b", "c", "d"]);
        let e = edges(&[("b", "a"), ("c", "a"), ("d", "b"), ("d", "c")]);
        assert_eq!(critical_path(&order, &e).unwrap(), ids(&["a", "b", "d"]));
    }

    #[test]
    fn test_critical_path_tie_breaks_by_input_order() {
        // Two chains of equal length; the one listed first wins.
        let order = ids(&["p", "q", "x", "y"]);
        let e = edges(&[("q", "p"), ("y", "x")]);
        assert_eq!(critical_path(&order, &e).unwrap(), ids(&["p", "q"]));
    }

    #[test]
    fn test_critical_path_fails_on_cycle() {
        let order = ids(&["a", "b"]);
        let e = edges(&[("a", "b"), ("b", "a")]);
        let err = critical_path(&order, &e).unwrap_err();
        assert!(matches!(err, Error::CyclicDependency { .. }));
    }

    #[test]
    fn test_critical_path_single_task() {
        let order = ids(&["only"]);
        let e = edges(&[]);
        assert_eq!(critical_path(&order, &e).unwrap(), ids(&["only"]));
    }

    #[test]
    fn test_critical_path_empty_graph() {
        assert!(critical_path(&[], &HashMap::new()).unwrap().is_empty());
    }
}
