use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use hta_core::embedding::EmbeddingProvider;
use hta_core::error::Result;
use hta_core::models::{Node, TreeSnapshot};
use hta_core::store::memory::InMemoryVectorBackend;
use hta_core::store::{IntegrityReport, VectorBackend, VectorMatch};
use hta_core::vector::{BufferType, EmbeddingInput};
use hta_core::HtaError;
use hta_harness::indexing::{index_snapshot, similar_tasks, vector_id};
use hta_harness::sqlite_store::SqliteVectorBackend;
use hta_harness::vector_adapter::{VectorAdapter, VectorStoreStatus};
use hta_harness::{db, migrate};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn sqlite_backend(dims: usize) -> (TempDir, Arc<SqliteVectorBackend>) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("hta.sqlite"))
        .await
        .unwrap();
    migrate::apply(&pool).await.unwrap();
    (tmp, Arc::new(SqliteVectorBackend::new(pool, "hta_nodes", dims)))
}

fn ids(matches: &[VectorMatch]) -> Vec<&str> {
    matches.iter().map(|m| m.id.as_str()).collect()
}

#[tokio::test]
async fn test_plain_vector_round_trip() {
    let (_tmp, backend) = sqlite_backend(3).await;
    let adapter = VectorAdapter::new(backend, TIMEOUT);

    let v1 = EmbeddingInput::RawSequence(vec![0.1, 0.2, 0.3]);
    adapter.upsert("v1", &v1, &json!({"title": "a"})).await.unwrap();

    let hits = adapter.query(&v1, 1, 0.0).await.unwrap();
    assert_eq!(ids(&hits), vec!["v1"]);
    assert!((hits[0].score - 1.0).abs() < 1e-9);
    assert_eq!(hits[0].metadata, json!({"title": "a"}));
}

#[tokio::test]
async fn test_typed_buffer_is_normalized_on_upsert() {
    let (_tmp, backend) = sqlite_backend(3).await;
    let adapter = VectorAdapter::new(backend.clone(), TIMEOUT);

    let raw = [0.1f32, 0.2, 0.3];
    adapter
        .upsert("v1", &EmbeddingInput::from_f32(&raw), &json!({}))
        .await
        .unwrap();

    let widened: Vec<f64> = raw.iter().map(|x| *x as f64).collect();
    let hits = backend.query(&widened, 1, 0.0).await.unwrap();
    assert_eq!(ids(&hits), vec!["v1"]);
    assert!((hits[0].score - 1.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_nested_and_keyed_inputs_are_accepted() {
    let backend = Arc::new(InMemoryVectorBackend::new("hta_nodes", 3));
    let adapter = VectorAdapter::new(backend, TIMEOUT);

    adapter
        .upsert("nested", &EmbeddingInput::Nested(json!([[1.0], [0.0, 0.0]])), &json!({}))
        .await
        .unwrap();
    adapter
        .upsert("keyed", &EmbeddingInput::Nested(json!({"0": 0, "1": 1, "2": 0})), &json!({}))
        .await
        .unwrap();

    let query = EmbeddingInput::TypedBuffer {
        dtype: BufferType::F64,
        bytes: hta_core::embedding::vec_to_blob(&[0.0, 1.0, 0.0]),
    };
    let hits = adapter.query(&query, 2, 0.5).await.unwrap();
    assert_eq!(ids(&hits), vec!["keyed"]);
    assert_eq!(adapter.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_unconvertible_input_surfaces_format_mismatch() {
    let backend = Arc::new(InMemoryVectorBackend::new("hta_nodes", 2));
    let adapter = VectorAdapter::new(backend, TIMEOUT);

    let err = adapter
        .upsert("bad", &EmbeddingInput::Nested(json!([0.1, "x"])), &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, HtaError::FormatMismatch { .. }));
    assert_eq!(adapter.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_dimension_mismatch_is_not_retried() {
    let backend = Arc::new(InMemoryVectorBackend::new("hta_nodes", 3));
    let adapter = VectorAdapter::new(backend, TIMEOUT);

    let err = adapter
        .upsert("short", &EmbeddingInput::RawSequence(vec![0.1, 0.2]), &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HtaError::DimensionMismatch { expected: 3, actual: 2, .. }
    ));
}

#[tokio::test]
async fn test_ties_keep_insertion_order_and_replace_keeps_position() {
    let (_tmp, backend) = sqlite_backend(2).await;
    let adapter = VectorAdapter::new(backend, TIMEOUT);

    for id in ["first", "second", "third"] {
        adapter
            .upsert(id, &EmbeddingInput::RawSequence(vec![1.0, 1.0]), &json!({}))
            .await
            .unwrap();
    }
    adapter
        .upsert("first", &EmbeddingInput::RawSequence(vec![1.0, 1.0]), &json!({"v": 2}))
        .await
        .unwrap();

    let hits = adapter
        .query(&EmbeddingInput::RawSequence(vec![1.0, 1.0]), 10, 0.0)
        .await
        .unwrap();
    assert_eq!(ids(&hits), vec!["first", "second", "third"]);
    assert_eq!(hits[0].metadata, json!({"v": 2}));
}

#[tokio::test]
async fn test_min_score_and_k_bound_results() {
    let backend = Arc::new(InMemoryVectorBackend::new("hta_nodes", 2));
    let adapter = VectorAdapter::new(backend, TIMEOUT);
    let rows = [("x", [1.0, 0.0]), ("diag", [1.0, 1.0]), ("y", [0.0, 1.0])];
    for (id, v) in rows {
        adapter
            .upsert(id, &EmbeddingInput::RawSequence(v.to_vec()), &json!({}))
            .await
            .unwrap();
    }

    let query = EmbeddingInput::RawSequence(vec![1.0, 0.0]);
    assert_eq!(ids(&adapter.query(&query, 10, 0.5).await.unwrap()), vec!["x", "diag"]);
    assert_eq!(ids(&adapter.query(&query, 1, -1.0).await.unwrap()), vec!["x"]);
}

#[tokio::test]
async fn test_corruption_is_detected_sticky_and_recoverable() {
    let (_tmp, backend) = sqlite_backend(3).await;
    let adapter = VectorAdapter::new(backend.clone(), TIMEOUT);

    adapter
        .upsert("good", &EmbeddingInput::RawSequence(vec![0.1, 0.2, 0.3]), &json!({}))
        .await
        .unwrap();
    adapter
        .upsert("bad", &EmbeddingInput::RawSequence(vec![0.3, 0.2, 0.1]), &json!({}))
        .await
        .unwrap();

    let healthy = adapter.recovery_status().await;
    assert_eq!(healthy.vector_store_status, VectorStoreStatus::Ok);
    assert!(!healthy.corruption_detected);

    sqlx::query("UPDATE vectors SET embedding = x'010203' WHERE id = 'bad'")
        .execute(backend.pool())
        .await
        .unwrap();

    let status = adapter.recovery_status().await;
    assert_eq!(status.vector_store_status, VectorStoreStatus::Corrupted);
    assert!(status.corruption_detected);

    // unreadable rows never reach query results
    let hits = adapter
        .query(&EmbeddingInput::RawSequence(vec![0.1, 0.2, 0.3]), 10, -1.0)
        .await
        .unwrap();
    assert_eq!(ids(&hits), vec!["good"]);

    // sticky until recover
    sqlx::query("DELETE FROM vectors WHERE id = 'bad'")
        .execute(backend.pool())
        .await
        .unwrap();
    assert!(adapter.recovery_status().await.corruption_detected);

    let report = adapter.recover().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert!(report.removed.is_empty());

    let recovered = adapter.recovery_status().await;
    assert_eq!(recovered.vector_store_status, VectorStoreStatus::Ok);
    assert!(!recovered.corruption_detected);
}

#[tokio::test]
async fn test_non_blob_embedding_is_reported_and_removed() {
    let (_tmp, backend) = sqlite_backend(2).await;
    let adapter = VectorAdapter::new(backend.clone(), TIMEOUT);
    for id in ["good", "real", "json"] {
        adapter
            .upsert(id, &EmbeddingInput::RawSequence(vec![1.0, 0.0]), &json!({}))
            .await
            .unwrap();
    }

    sqlx::query("UPDATE vectors SET embedding = 1.5 WHERE id = 'real'")
        .execute(backend.pool())
        .await
        .unwrap();
    sqlx::query("UPDATE vectors SET embedding = '[1.0, 0.0]' WHERE id = 'json'")
        .execute(backend.pool())
        .await
        .unwrap();

    let status = adapter.recovery_status().await;
    assert_eq!(status.vector_store_status, VectorStoreStatus::Corrupted);
    assert!(status.corruption_detected);

    let hits = adapter
        .query(&EmbeddingInput::RawSequence(vec![1.0, 0.0]), 10, -1.0)
        .await
        .unwrap();
    assert_eq!(ids(&hits), vec!["good"]);

    let mut report = adapter.recover().await.unwrap();
    report.removed.sort();
    assert_eq!(report.removed, vec!["json", "real"]);
    assert_eq!(adapter.count().await.unwrap(), 1);
    assert_eq!(
        adapter.recovery_status().await.vector_store_status,
        VectorStoreStatus::Ok
    );
}

#[tokio::test]
async fn test_recover_removes_unreadable_vectors() {
    let backend = Arc::new(InMemoryVectorBackend::new("hta_nodes", 2));
    let adapter = VectorAdapter::new(backend.clone(), TIMEOUT);
    adapter
        .upsert("ok", &EmbeddingInput::RawSequence(vec![1.0, 0.0]), &json!({}))
        .await
        .unwrap();
    backend.insert_raw_blob("torn", vec![0; 12]).unwrap();

    assert_eq!(
        adapter.recovery_status().await.vector_store_status,
        VectorStoreStatus::Corrupted
    );
    let report = adapter.recover().await.unwrap();
    assert_eq!(report.removed, vec!["torn"]);
    assert_eq!(adapter.count().await.unwrap(), 1);
    assert_eq!(
        adapter.recovery_status().await.vector_store_status,
        VectorStoreStatus::Ok
    );
}

#[tokio::test]
async fn test_status_serializes_snake_case() {
    let backend = Arc::new(InMemoryVectorBackend::new("hta_nodes", 2));
    let adapter = VectorAdapter::new(backend, TIMEOUT);
    let status = serde_json::to_value(adapter.recovery_status().await).unwrap();
    assert_eq!(
        status,
        json!({"vector_store_status": "ok", "corruption_detected": false})
    );
}

/// Backend that rejects every upsert as a format mismatch and fails probes.
#[derive(Default)]
struct RejectingBackend {
    upserts: AtomicUsize,
    stall: Option<Duration>,
}

#[async_trait]
impl VectorBackend for RejectingBackend {
    fn collection(&self) -> &str {
        "rejecting"
    }

    fn dims(&self) -> usize {
        2
    }

    async fn upsert(&self, id: &str, _vector: &[f64], _metadata: &Value) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        Err(HtaError::FormatMismatch {
            id: id.to_string(),
            reason: "rejected".to_string(),
        })
    }

    async fn query(&self, _vector: &[f64], _k: usize, _min_score: f64) -> Result<Vec<VectorMatch>> {
        Ok(Vec::new())
    }

    async fn count(&self) -> Result<usize> {
        Ok(0)
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(vec!["rejecting".to_string()])
    }

    async fn heartbeat(&self) -> Result<()> {
        Err(HtaError::storage("heartbeat", "rejecting", "connection refused"))
    }

    async fn integrity_check(&self) -> Result<IntegrityReport> {
        Ok(IntegrityReport::default())
    }

    async fn remove(&self, _ids: &[String]) -> Result<usize> {
        Ok(0)
    }
}

#[tokio::test]
async fn test_format_mismatch_retried_exactly_once() {
    let backend = Arc::new(RejectingBackend::default());
    let adapter = VectorAdapter::new(backend.clone(), TIMEOUT);

    let err = adapter
        .upsert("v1", &EmbeddingInput::RawSequence(vec![0.1, 0.2]), &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, HtaError::FormatMismatch { .. }));
    assert_eq!(backend.upserts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_heartbeat_reports_degraded() {
    let adapter = VectorAdapter::new(Arc::new(RejectingBackend::default()), TIMEOUT);
    let status = adapter.recovery_status().await;
    assert_eq!(status.vector_store_status, VectorStoreStatus::Degraded);
    assert!(!status.corruption_detected);
}

#[tokio::test]
async fn test_slow_upsert_times_out() {
    let backend = Arc::new(RejectingBackend {
        stall: Some(Duration::from_secs(10)),
        ..Default::default()
    });
    let adapter = VectorAdapter::new(backend, TIMEOUT);
    let err = adapter
        .upsert_with_timeout(
            "v1",
            &EmbeddingInput::RawSequence(vec![0.1, 0.2]),
            &json!({}),
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HtaError::Timeout { timeout_ms: 20, .. }));
}

/// Embeds by keyword: "read" and "write" get their own axes.
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dims(&self) -> usize {
        3
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingInput>> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                let v = [
                    if t.contains("read") { 1.0f32 } else { 0.0 },
                    if t.contains("write") { 1.0 } else { 0.0 },
                    0.1,
                ];
                EmbeddingInput::from_f32(&v)
            })
            .collect())
    }
}

#[tokio::test]
async fn test_index_snapshot_and_find_similar_tasks() {
    let (_tmp, backend) = sqlite_backend(3).await;
    let adapter = VectorAdapter::new(backend, TIMEOUT);

    let snapshot = TreeSnapshot::new(
        "learn rust",
        vec![
            Node::new("g").with_title("Learn Rust").with_level(0),
            Node::new("r").with_parent("g").with_title("Read the book").with_level(4),
            Node::new("w").with_parent("g").with_title("Write a CLI").with_level(4),
        ],
    );
    let indexed = index_snapshot(&adapter, &KeywordEmbedder, "P1", "general", &snapshot)
        .await
        .unwrap();
    assert_eq!(indexed, 3);
    assert_eq!(adapter.count().await.unwrap(), 3);

    let hits = similar_tasks(&adapter, &KeywordEmbedder, "reading list", 1, 0.5)
        .await
        .unwrap();
    assert_eq!(ids(&hits), vec![vector_id("P1", "general", "r").as_str()]);
    assert_eq!(hits[0].metadata["node_id"], json!("r"));
    assert_eq!(hits[0].metadata["path"], json!("general"));
}

/// Backend that records how many upserts are in flight at once.
#[derive(Default)]
struct InFlightBackend {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl VectorBackend for InFlightBackend {
    fn collection(&self) -> &str {
        "in_flight"
    }

    fn dims(&self) -> usize {
        2
    }

    async fn upsert(&self, _id: &str, _vector: &[f64], _metadata: &Value) -> Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query(&self, _vector: &[f64], _k: usize, _min_score: f64) -> Result<Vec<VectorMatch>> {
        Ok(Vec::new())
    }

    async fn count(&self) -> Result<usize> {
        Ok(0)
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(vec!["in_flight".to_string()])
    }

    async fn heartbeat(&self) -> Result<()> {
        Ok(())
    }

    async fn integrity_check(&self) -> Result<IntegrityReport> {
        Ok(IntegrityReport::default())
    }

    async fn remove(&self, _ids: &[String]) -> Result<usize> {
        Ok(0)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_id_upserts_are_serialized() {
    let backend = Arc::new(InFlightBackend::default());
    let adapter = Arc::new(VectorAdapter::new(backend.clone(), TIMEOUT));

    let mut handles = Vec::new();
    for i in 0..8 {
        let adapter = adapter.clone();
        handles.push(tokio::spawn(async move {
            let vector = EmbeddingInput::RawSequence(vec![i as f64, 1.0]);
            adapter.upsert("shared", &vector, &json!({"i": i})).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert_eq!(backend.calls.load(Ordering::SeqCst), 8);
    assert_eq!(backend.peak.load(Ordering::SeqCst), 1);
}
