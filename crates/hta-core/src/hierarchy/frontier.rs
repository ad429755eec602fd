//! Frontier extraction: leaves, ancestry, and prerequisite ordering.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use super::{build_node_map, HierarchyIndex, MAX_HIERARCHY_DEPTH};
use crate::models::Node;

/// Nodes that are leaves of the current snapshot.
///
/// A node with `level` set is a leaf iff `level >= LEVEL_ACTION`; a node
/// without a level is a leaf iff nothing in the list names it as parent.
pub fn get_leaf_tasks(nodes: &[Node]) -> Vec<&Node> {
    let index = HierarchyIndex::new(nodes);
    nodes.iter().filter(|n| index.is_leaf(n)).collect()
}

/// Ancestors of `id`, root first.
///
/// Stops silently at the first parent reference that does not resolve,
/// at a revisited node, or after [`MAX_HIERARCHY_DEPTH`] hops. Unknown
/// ids yield an empty list.
pub fn get_ancestors<'a>(nodes: &'a [Node], id: &str) -> Vec<&'a Node> {
    let by_id = build_node_map(nodes);
    let Some(start) = by_id.get(id).copied() else {
        return Vec::new();
    };

    let mut ancestors = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(start.id.as_str());
    let mut current = start.parent_key();
    while let Some(parent_id) = current {
        if ancestors.len() >= MAX_HIERARCHY_DEPTH {
            break;
        }
        let Some(parent) = by_id.get(parent_id).copied() else {
            break;
        };
        if !visited.insert(parent.id.as_str()) {
            break;
        }
        ancestors.push(parent);
        current = parent.parent_key();
    }
    ancestors.reverse();
    ancestors
}

/// Every node below `id`, excluding `id` itself.
///
/// Iterative depth-first walk over the child map; each id is expanded at
/// most once, so a cycle below `id` cannot loop.
pub fn get_descendants<'a>(nodes: &'a [Node], id: &str) -> Vec<&'a Node> {
    let index = HierarchyIndex::new(nodes);
    let mut descendants = Vec::new();
    let mut expanded: HashSet<&str> = HashSet::new();
    expanded.insert(id);
    let mut stack: Vec<&Node> = index.children(Some(id)).to_vec();

    while let Some(node) = stack.pop() {
        if !expanded.insert(node.id.as_str()) {
            continue;
        }
        descendants.push(node);
        stack.extend(index.children(Some(node.id.as_str())).iter().copied());
    }
    descendants
}

/// Number of resolvable parent hops above `id`.
///
/// Roots, orphans, and unknown ids are at depth 0. The walk is capped at
/// [`MAX_HIERARCHY_DEPTH`] even if validation was skipped.
pub fn get_node_depth(nodes: &[Node], id: &str) -> usize {
    let index = HierarchyIndex::new(nodes);
    index.get(id).map(|node| index.depth(node)).unwrap_or(0)
}

/// Node id → prerequisite ids.
///
/// Nodes without prerequisites map to an empty list. Prerequisites that
/// name nodes outside the list are kept as-is; resolving them is the
/// consumer's job.
pub fn build_dependency_graph(nodes: &[Node]) -> HashMap<String, Vec<String>> {
    nodes
        .iter()
        .map(|n| (n.id.clone(), n.prerequisites.clone()))
        .collect()
}

/// Result of ordering nodes by their prerequisites.
#[derive(Debug, Clone, Default)]
pub struct DependencyOrder<'a> {
    /// Nodes whose known prerequisites all come earlier in this list.
    pub ordered: Vec<&'a Node>,
    /// Nodes that sit on, or depend on, a prerequisite cycle.
    pub blocked: Vec<&'a Node>,
}

/// Order nodes so that every node follows its known prerequisites.
///
/// Kahn's algorithm, breaking ties by input position so the result is
/// deterministic and otherwise follows the original list. Prerequisites
/// that are not in the list are ignored. Duplicate ids collapse to one
/// entry at the first position, carrying the last-seen node.
pub fn dependency_order(nodes: &[Node]) -> DependencyOrder<'_> {
    let by_id = build_node_map(nodes);

    let mut positions: Vec<&str> = Vec::new();
    let mut position_of: HashMap<&str, usize> = HashMap::new();
    for node in nodes {
        if !position_of.contains_key(node.id.as_str()) {
            position_of.insert(node.id.as_str(), positions.len());
            positions.push(node.id.as_str());
        }
    }

    let mut in_degree = vec![0usize; positions.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); positions.len()];
    for (pos, id) in positions.iter().enumerate() {
        let node = by_id[id];
        let mut seen: HashSet<&str> = HashSet::new();
        for prereq in &node.prerequisites {
            if !seen.insert(prereq.as_str()) {
                continue;
            }
            if let Some(&prereq_pos) = position_of.get(prereq.as_str()) {
                in_degree[pos] += 1;
                dependents[prereq_pos].push(pos);
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(pos, _)| Reverse(pos))
        .collect();

    let mut emitted = vec![false; positions.len()];
    let mut ordered = Vec::with_capacity(positions.len());
    while let Some(Reverse(pos)) = ready.pop() {
        emitted[pos] = true;
        ordered.push(by_id[positions[pos]]);
        for &dependent in &dependents[pos] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    let blocked = positions
        .iter()
        .enumerate()
        .filter(|(pos, _)| !emitted[*pos])
        .map(|(_, id)| by_id[id])
        .collect();

    DependencyOrder { ordered, blocked }
}

/// Incomplete leaves whose known prerequisites are all completed.
///
/// Returned in dependency order. Dangling prerequisite ids do not block a
/// task, and neither does a cycle made only of completed prerequisites.
pub fn actionable_tasks(nodes: &[Node]) -> Vec<&Node> {
    let index = HierarchyIndex::new(nodes);
    let order = dependency_order(nodes);

    let satisfied = |prereq: &String| match index.get(prereq) {
        Some(p) => p.completed,
        None => true,
    };

    order
        .ordered
        .into_iter()
        .chain(order.blocked)
        .filter(|n| !n.completed && index.is_leaf(n))
        .filter(|n| n.prerequisites.iter().all(satisfied))
        .collect()
}
