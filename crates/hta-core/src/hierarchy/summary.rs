use std::collections::HashSet;

use super::{validate_hierarchy, HierarchyIndex};
use crate::models::{HierarchyMetadata, Node, LEVEL_BRANCH};

/// Compute the `hierarchyMetadata` block stored alongside a snapshot.
///
/// `branches` lists distinct `branch` labels in first-seen order, falling
/// back to the titles of level-1 nodes when no node carries a label.
pub fn summarize(nodes: &[Node]) -> HierarchyMetadata {
    let index = HierarchyIndex::new(nodes);

    let mut branches = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for node in nodes {
        if let Some(branch) = node.branch.as_deref().filter(|b| !b.is_empty()) {
            if seen.insert(branch) {
                branches.push(branch.to_string());
            }
        }
    }
    if branches.is_empty() {
        branches = nodes
            .iter()
            .filter(|n| n.level == Some(LEVEL_BRANCH))
            .filter_map(|n| n.title.clone())
            .collect();
    }

    HierarchyMetadata {
        total_tasks: nodes.len(),
        completed_tasks: nodes.iter().filter(|n| n.completed).count(),
        leaf_tasks: nodes.iter().filter(|n| index.is_leaf(n)).count(),
        max_depth: nodes.iter().map(|n| index.depth(n)).max().unwrap_or(0),
        branches,
        integrity_findings: validate_hierarchy(nodes).findings.len(),
    }
}
