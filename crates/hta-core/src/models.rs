//! Core data models for task hierarchies.
//!
//! These types represent the nodes, tree snapshots, and project records
//! that flow between the hierarchy engine and the path-scoped store.
//! Field names serialize in the camelCase shape callers already persist
//! (`frontierNodes`, `activePath`, ...); node parents are read from
//! `parent_id` or `parentId`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Level of a top-level goal node.
pub const LEVEL_GOAL: u32 = 0;
/// Level of a strategic branch.
pub const LEVEL_BRANCH: u32 = 1;
pub const LEVEL_TASK: u32 = 2;
pub const LEVEL_SUBTASK: u32 = 3;
/// Level at and above which a node is always an actionable leaf.
pub const LEVEL_ACTION: u32 = 4;

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A single goal, branch, task, or action in the hierarchy.
///
/// Only `id`, `parent_id`, `level`, `prerequisites`, and `completed` carry
/// meaning for the core. Everything else is caller-owned and is preserved
/// verbatim through `extra` on save and load.
///
/// `parentId` is read as the parent only when `parent_id` is absent or
/// empty. When both are present `parent_id` wins and `parentId` stays in
/// `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "NodeFields")]
pub struct Node {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    pub prerequisites: Vec<String>,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Wire form of [`Node`]; `parentId` lands in `extra` until resolved.
#[derive(Deserialize)]
struct NodeFields {
    id: String,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    level: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    prerequisites: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    completed: bool,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    priority: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<NodeFields> for Node {
    fn from(fields: NodeFields) -> Self {
        let NodeFields {
            id,
            mut parent_id,
            level,
            prerequisites,
            completed,
            title,
            description,
            branch,
            priority,
            mut extra,
        } = fields;

        if parent_id.as_deref().map_or(true, str::is_empty) {
            match extra.get(CAMEL_PARENT) {
                Some(Value::String(camel)) if !camel.is_empty() || parent_id.is_none() => {
                    parent_id = Some(camel.clone());
                    extra.remove(CAMEL_PARENT);
                }
                Some(Value::Null) if parent_id.is_none() => {
                    extra.remove(CAMEL_PARENT);
                }
                _ => {}
            }
        }

        Self {
            id,
            parent_id,
            level,
            prerequisites,
            completed,
            title,
            description,
            branch,
            priority,
            extra,
        }
    }
}

const CAMEL_PARENT: &str = "parentId";

impl Node {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            level: None,
            prerequisites: Vec::new(),
            completed: false,
            title: None,
            description: None,
            branch: None,
            priority: None,
            extra: Map::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_prerequisites<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prerequisites = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn completed(mut self) -> Self {
        self.completed = true;
        self
    }

    /// The parent this node hangs under, or `None` for a root.
    ///
    /// An empty-string `parent_id` is treated the same as an absent one.
    pub fn parent_key(&self) -> Option<&str> {
        self.parent_id.as_deref().filter(|p| !p.is_empty())
    }

    /// Text handed to the embedding model for this node.
    pub fn embedding_text(&self) -> String {
        match (self.title.as_deref(), self.description.as_deref()) {
            (Some(t), Some(d)) if !d.is_empty() => format!("{}\n\n{}", t, d),
            (Some(t), _) => t.to_string(),
            (None, Some(d)) => d.to_string(),
            (None, None) => self.id.clone(),
        }
    }
}

/// Summary of a snapshot's tree shape, recomputed on every save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyMetadata {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub leaf_tasks: usize,
    pub max_depth: usize,
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub integrity_findings: usize,
}

/// The persisted unit for one (project, path) pair.
///
/// Saves replace the whole snapshot; there is no patch form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub frontier_nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub strategic_branches: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchy_metadata: Option<HierarchyMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TreeSnapshot {
    pub fn new(goal: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            goal: Some(goal.into()),
            frontier_nodes: nodes,
            ..Default::default()
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.frontier_nodes
    }

    /// True when the snapshot holds no nodes and no goal.
    pub fn is_empty(&self) -> bool {
        self.frontier_nodes.is_empty() && self.goal.is_none()
    }

    /// Decode a stored body without rejecting malformed node lists.
    ///
    /// - `null`, `{}` and the empty string decode to an empty snapshot.
    /// - A bare JSON array is read as the node list of an otherwise empty
    ///   snapshot.
    /// - `frontierNodes` is parsed with [`parse_nodes`](crate::hierarchy::parse_nodes),
    ///   so entries without a string `id` are dropped instead of failing the load.
    pub fn from_json(body: &str) -> serde_json::Result<Self> {
        if body.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_str(body)?;
        match value {
            Value::Null => Ok(Self::default()),
            Value::Array(_) => Ok(Self {
                frontier_nodes: crate::hierarchy::parse_nodes(&value),
                ..Default::default()
            }),
            Value::Object(mut map) => {
                let nodes = map
                    .remove("frontierNodes")
                    .or_else(|| map.remove("frontier_nodes"))
                    .map(|v| crate::hierarchy::parse_nodes(&v))
                    .unwrap_or_default();
                let mut snapshot: TreeSnapshot = serde_json::from_value(Value::Object(map))?;
                snapshot.frontier_nodes = nodes;
                Ok(snapshot)
            }
            other => Err(serde::de::Error::custom(format!(
                "expected a snapshot object, found {}",
                json_kind(&other)
            ))),
        }
    }
}

/// Per-project record consulted whenever a caller omits the path name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
