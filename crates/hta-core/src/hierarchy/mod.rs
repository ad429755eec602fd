//! Structural queries over a flat node list.
//!
//! Every function here takes a borrowed `&[Node]` snapshot, builds whatever
//! lookup maps it needs for that one call, and returns. Nothing is cached
//! between calls; callers issuing many queries against the same snapshot
//! should build a [`HierarchyIndex`] once and query it instead.
//!
//! Malformed trees never cause a panic or an error at this layer. Orphans,
//! cycles, and duplicate ids are reported by [`validate_hierarchy`] and are
//! otherwise tolerated: parent walks are bounded by [`MAX_HIERARCHY_DEPTH`]
//! and descendant walks track visited ids.

mod frontier;
mod summary;
mod validate;

pub use frontier::{
    actionable_tasks, build_dependency_graph, dependency_order, get_ancestors, get_descendants,
    get_leaf_tasks, get_node_depth, DependencyOrder,
};
pub use summary::summarize;
pub use validate::{validate_hierarchy, Finding, FindingKind, ValidationReport};

use std::collections::HashMap;

use serde_json::Value;

use crate::models::Node;

/// Structural ceiling on parent-link walks.
///
/// Cycle detection, depth calculation, and ancestor queries all stop after
/// this many hops so that an undetected cycle cannot hang a caller.
pub const MAX_HIERARCHY_DEPTH: usize = 100;

/// Parent key → direct children, in input order.
///
/// The `None` key holds the roots.
pub type ParentMap<'a> = HashMap<Option<&'a str>, Vec<&'a Node>>;

/// Group nodes under their parent key, preserving input order within
/// each child list.
pub fn build_parent_map(nodes: &[Node]) -> ParentMap<'_> {
    let mut map: ParentMap<'_> = HashMap::new();
    for node in nodes {
        map.entry(node.parent_key()).or_default().push(node);
    }
    map
}

/// Id → node. With duplicate ids the last occurrence wins.
pub fn build_node_map(nodes: &[Node]) -> HashMap<&str, &Node> {
    nodes.iter().map(|n| (n.id.as_str(), n)).collect()
}

/// Direct children of `parent_id`, or the roots when `parent_id` is `None`.
pub fn get_children<'a>(nodes: &'a [Node], parent_id: Option<&str>) -> Vec<&'a Node> {
    let parent_id = parent_id.filter(|p| !p.is_empty());
    build_parent_map(nodes)
        .into_iter()
        .find_map(|(key, children)| (key == parent_id).then_some(children))
        .unwrap_or_default()
}

/// Parse a raw JSON node list without failing on malformed entries.
///
/// Non-array input yields an empty list. Entries that are not objects or
/// lack a string `id` are skipped, as are entries whose known fields have
/// the wrong type.
pub fn parse_nodes(value: &Value) -> Vec<Node> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter(|item| item.get("id").map(Value::is_string).unwrap_or(false))
        .filter_map(|item| match serde_json::from_value::<Node>(item.clone()) {
            Ok(node) => Some(node),
            Err(e) => {
                tracing::debug!(error = %e, "skipping malformed node entry");
                None
            }
        })
        .collect()
}

/// Prebuilt lookup maps over one node snapshot.
///
/// Borrowing the snapshot keeps the index valid for exactly as long as the
/// nodes it was built from; a mutated list needs a fresh index.
pub struct HierarchyIndex<'a> {
    nodes: &'a [Node],
    by_id: HashMap<&'a str, &'a Node>,
    children: HashMap<&'a str, Vec<&'a Node>>,
    roots: Vec<&'a Node>,
}

impl<'a> HierarchyIndex<'a> {
    pub fn new(nodes: &'a [Node]) -> Self {
        let mut children: HashMap<&'a str, Vec<&'a Node>> = HashMap::new();
        let mut roots = Vec::new();
        for (key, group) in build_parent_map(nodes) {
            match key {
                Some(parent) => {
                    children.insert(parent, group);
                }
                None => roots = group,
            }
        }
        Self {
            nodes,
            by_id: build_node_map(nodes),
            children,
            roots,
        }
    }

    pub fn nodes(&self) -> &'a [Node] {
        self.nodes
    }

    pub fn get(&self, id: &str) -> Option<&'a Node> {
        self.by_id.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn children(&self, parent_id: Option<&str>) -> &[&'a Node] {
        match parent_id.filter(|p| !p.is_empty()) {
            Some(parent) => self.children.get(parent).map(Vec::as_slice).unwrap_or(&[]),
            None => &self.roots,
        }
    }

    pub fn roots(&self) -> &[&'a Node] {
        &self.roots
    }

    pub fn has_children(&self, id: &str) -> bool {
        !self.children(Some(id)).is_empty()
    }

    /// The parent node, if the parent reference resolves.
    pub fn parent(&self, node: &Node) -> Option<&'a Node> {
        node.parent_key().and_then(|p| self.get(p))
    }

    /// Resolvable parent hops above `node`, capped at [`MAX_HIERARCHY_DEPTH`].
    pub fn depth(&self, node: &Node) -> usize {
        let mut depth = 0;
        let mut current = self.parent(node);
        while let Some(parent) = current {
            if depth >= MAX_HIERARCHY_DEPTH {
                break;
            }
            depth += 1;
            current = self.parent(parent);
        }
        depth
    }

    pub fn is_leaf(&self, node: &Node) -> bool {
        match node.level {
            Some(level) => level >= crate::models::LEVEL_ACTION,
            None => !self.has_children(&node.id),
        }
    }
}
