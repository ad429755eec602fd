//! Embedding of hierarchy nodes for semantic task retrieval.
//!
//! Each node of a snapshot is embedded from its title and description and
//! stored under a vector id scoped to its project and path, so the same
//! node id on two paths never collides.

use serde_json::{json, Value};
use tracing::{debug, info};

use hta_core::embedding::EmbeddingProvider;
use hta_core::error::{HtaError, Result};
use hta_core::models::{Node, TreeSnapshot};
use hta_core::store::VectorMatch;

use crate::vector_adapter::VectorAdapter;

/// Vector id for `node_id` on (project, path).
pub fn vector_id(project_id: &str, path: &str, node_id: &str) -> String {
    format!("{}:{}:{}", project_id, path, node_id)
}

fn node_metadata(project_id: &str, path: &str, node: &Node) -> Value {
    json!({
        "project_id": project_id,
        "path": path,
        "node_id": node.id,
        "title": node.title,
        "level": node.level,
        "completed": node.completed,
    })
}

/// Embed every node of `snapshot` and upsert it. Returns the number indexed.
pub async fn index_snapshot(
    adapter: &VectorAdapter,
    provider: &dyn EmbeddingProvider,
    project_id: &str,
    path: &str,
    snapshot: &TreeSnapshot,
) -> Result<usize> {
    let nodes = snapshot.nodes();
    if nodes.is_empty() {
        return Ok(0);
    }

    let texts: Vec<String> = nodes.iter().map(Node::embedding_text).collect();
    let vectors = provider.embed(&texts).await?;
    if vectors.len() != nodes.len() {
        return Err(HtaError::Embedding {
            model: provider.model_name().to_string(),
            reason: format!("expected {} vectors, got {}", nodes.len(), vectors.len()),
        });
    }

    for (node, vector) in nodes.iter().zip(vectors.iter()) {
        let id = vector_id(project_id, path, &node.id);
        adapter
            .upsert(&id, vector, &node_metadata(project_id, path, node))
            .await?;
        debug!(id = %id, kind = vector.kind(), "indexed node");
    }

    info!(
        project_id,
        path,
        nodes = nodes.len(),
        model = provider.model_name(),
        "indexed snapshot"
    );
    Ok(nodes.len())
}

/// Nodes most similar to `text`, best first.
pub async fn similar_tasks(
    adapter: &VectorAdapter,
    provider: &dyn EmbeddingProvider,
    text: &str,
    k: usize,
    min_score: f64,
) -> Result<Vec<VectorMatch>> {
    let mut vectors = provider.embed(&[text.to_string()]).await?;
    let query = vectors.pop().ok_or_else(|| HtaError::Embedding {
        model: provider.model_name().to_string(),
        reason: "no vector returned for query".to_string(),
    })?;
    adapter.query(&query, k, min_score).await
}
