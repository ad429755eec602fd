//! Integrity checks: orphans, parent-link cycles, duplicate ids.
//!
//! Validation is advisory. It reads the node list, reports what it finds,
//! and never prunes or rewrites anything; whether a flagged tree may be
//! saved is decided by the caller (see the store's validation policy).

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{build_node_map, MAX_HIERARCHY_DEPTH};
use crate::models::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// `parent_id` names a node that is not in the list.
    Orphan,
    /// Following `parent_id` links from the node revisits a node.
    Cycle,
    /// More than one node carries the same `id`.
    DuplicateId,
}

/// One structural problem, tagged so callers can branch on `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub node_id: String,
    pub detail: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    /// Findings rendered as plain messages, for logs and CLI output.
    pub fn errors(&self) -> Vec<String> {
        self.findings.iter().map(|f| f.detail.clone()).collect()
    }

    pub fn count(&self, kind: FindingKind) -> usize {
        self.findings.iter().filter(|f| f.kind == kind).count()
    }
}

/// Run every integrity check over `nodes`.
///
/// An empty list is valid. Each orphan yields exactly one finding; each
/// node whose parent walk revisits an id yields one cycle finding naming
/// that node as the origin. Walks stop after [`MAX_HIERARCHY_DEPTH`] hops
/// whether or not a cycle was seen, so this terminates on any input.
pub fn validate_hierarchy(nodes: &[Node]) -> ValidationReport {
    if nodes.is_empty() {
        return ValidationReport {
            valid: true,
            findings: Vec::new(),
        };
    }

    let by_id = build_node_map(nodes);
    let mut findings = Vec::new();

    let mut seen: HashSet<&str> = HashSet::new();
    let mut reported_dups: HashSet<&str> = HashSet::new();
    for node in nodes {
        if !seen.insert(node.id.as_str()) && reported_dups.insert(node.id.as_str()) {
            findings.push(Finding {
                kind: FindingKind::DuplicateId,
                node_id: node.id.clone(),
                detail: format!("Duplicate node id: {}", node.id),
            });
        }
    }

    for node in nodes {
        if let Some(parent) = node.parent_key() {
            if !by_id.contains_key(parent) {
                findings.push(Finding {
                    kind: FindingKind::Orphan,
                    node_id: node.id.clone(),
                    detail: format!(
                        "Orphaned node: {} references missing parent {}",
                        node.id, parent
                    ),
                });
            }
        }
    }

    for node in nodes {
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(node.id.as_str());
        let mut current = node.parent_key();
        let mut hops = 0;
        while let Some(parent_id) = current {
            if hops >= MAX_HIERARCHY_DEPTH {
                break;
            }
            if !visited.insert(parent_id) {
                findings.push(Finding {
                    kind: FindingKind::Cycle,
                    node_id: node.id.clone(),
                    detail: format!(
                        "Circular reference detected starting from node: {}",
                        node.id
                    ),
                });
                break;
            }
            current = by_id.get(parent_id).and_then(|p| p.parent_key());
            hops += 1;
        }
    }

    ValidationReport {
        valid: findings.is_empty(),
        findings,
    }
}
