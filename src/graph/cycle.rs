//! Cycle detection over the dependency snapshot.
//!
//! The traversal keeps an explicit frame stack instead of recursing, so call
//! depth stays bounded on large graphs.

use std::collections::{HashMap, HashSet};

/// Find every distinct cycle reachable in the graph.
///
/// Each cycle is returned as an ordered id sequence closing back to its
/// start, e.g. `[a, b, c, a]`. Distinctness is judged up to rotation, so a
/// cycle entered at different nodes is reported once.
pub(crate) fn find_cycles(
    order: &[String],
    edges: &HashMap<String, Vec<String>>,
) -> Vec<Vec<String>> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut cycles: Vec<Vec<String>> = Vec::new();
    let mut seen: HashSet<Vec<String>> = HashSet::new();

    for start in order {
        if visited.contains(start.as_str()) {
            continue;
        }
        visited.insert(start.as_str());

        // Frame: (node, index of the next child to explore).
        let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
        let mut path: Vec<&str> = vec![start.as_str()];
        let mut on_path: HashSet<&str> = HashSet::new();
        on_path.insert(start.as_str());

        loop {
            let (node, child_idx) = match stack.last_mut() {
                Some(frame) => {
                    let out = (frame.0, frame.1);
                    frame.1 += 1;
                    out
                }
                None => break,
            };

            let children = edges.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if child_idx >= children.len() {
                on_path.remove(node);
                path.pop();
                stack.pop();
                continue;
            }

            let child = children[child_idx].as_str();
            if on_path.contains(child) {
                let pos = path.iter().position(|n| *n == child).unwrap();
                let mut cycle: Vec<String> = path[pos..].iter().map(|n| n.to_string()).collect();
                cycle.push(child.to_string());
                if seen.insert(canonical_form(&cycle)) {
                    cycles.push(cycle);
                }
            } else if !visited.contains(child) {
                visited.insert(child);
                on_path.insert(child);
                path.push(child);
                stack.push((child, 0));
            }
        }
    }

    cycles
}

/// Check whether adding the edge `task_id -> dep_id` would close a cycle.
///
/// The edge means "task_id depends on dep_id", so simulating it and re-running
/// detection reduces to asking whether the existing graph already has a path
/// from `dep_id` back to `task_id`. Returns that cycle, stated from `task_id`
/// and closed back to it.
pub(crate) fn simulate_edge_cycle(
    edges: &HashMap<String, Vec<String>>,
    task_id: &str,
    dep_id: &str,
) -> Option<Vec<String>> {
    if task_id == dep_id {
        return Some(vec![task_id.to_string(), task_id.to_string()]);
    }

    // Iterative DFS for a path dep_id -> ... -> task_id.
    let mut stack: Vec<(&str, usize)> = vec![(dep_id, 0)];
    let mut path: Vec<&str> = vec![dep_id];
    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(dep_id);

    loop {
        let (node, child_idx) = match stack.last_mut() {
            Some(frame) => {
                let out = (frame.0, frame.1);
                frame.1 += 1;
                out
            }
            None => break,
        };

        let children = edges.get(node).map(Vec::as_slice).unwrap_or(&[]);
        if child_idx >= children.len() {
            path.pop();
            stack.pop();
            continue;
        }

        let child = children[child_idx].as_str();
        if child == task_id {
            let mut cycle = Vec::with_capacity(path.len() + 2);
            cycle.push(task_id.to_string());
            cycle.extend(path.iter().map(|n| n.to_string()));
            cycle.push(task_id.to_string());
            return Some(cycle);
        }
        if !visited.contains(child) {
            visited.insert(child);
            path.push(child);
            stack.push((child, 0));
        }
    }

    None
}

/// Rotate the open cycle (closing element dropped) so its smallest id comes
/// first. Used as a set key for deduplication.
fn canonical_form(cycle: &[String]) -> Vec<String> {
    let open = &cycle[..cycle.len() - 1];
    if open.is_empty() {
        return Vec::new();
    }
    let min_pos = open
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut rotated = Vec::with_capacity(open.len());
    rotated.extend_from_slice(&open[min_pos..]);
    rotated.extend_from_slice(&open[..min_pos]);
    rotated
}
