use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use hta_core::hierarchy::{get_children, get_leaf_tasks, validate_hierarchy, FindingKind};
use hta_core::models::{Node, TreeSnapshot};
use hta_core::store::memory::InMemoryStore;
use hta_core::store::{checksum, DocumentKey, DocumentStore, StoredDocument};
use hta_core::HtaError;
use hta_harness::path_store::{PathScopedStore, StoreOptions, ValidationPolicy};
use hta_harness::sqlite_store::SqliteDocumentStore;
use hta_harness::{db, migrate};

async fn sqlite_docs() -> (TempDir, Arc<SqliteDocumentStore>) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("data/hta.sqlite"))
        .await
        .unwrap();
    migrate::apply(&pool).await.unwrap();
    (tmp, Arc::new(SqliteDocumentStore::new(pool)))
}

fn tree() -> TreeSnapshot {
    TreeSnapshot::new(
        "learn rust",
        vec![Node::new("a"), Node::new("b").with_parent("a")],
    )
}

fn ids(nodes: &[&Node]) -> Vec<String> {
    nodes.iter().map(|n| n.id.clone()).collect()
}

#[tokio::test]
async fn test_saved_tree_answers_queries_after_reload() {
    let (_tmp, docs) = sqlite_docs().await;
    let store = PathScopedStore::new(docs);

    store.save("P1", Some("general"), &tree()).await.unwrap();
    let loaded = store.load("P1", Some("general")).await.unwrap().unwrap();

    assert_eq!(loaded.goal.as_deref(), Some("learn rust"));
    assert_eq!(ids(&get_leaf_tasks(loaded.nodes())), vec!["b"]);
    assert_eq!(ids(&get_children(loaded.nodes(), None)), vec!["a"]);
    assert!(validate_hierarchy(loaded.nodes()).valid);

    let meta = loaded.hierarchy_metadata.unwrap();
    assert_eq!(meta.total_tasks, 2);
    assert_eq!(meta.leaf_tasks, 1);
    assert!(loaded.created_at.is_some());
    assert!(loaded.last_updated.is_some());
}

#[tokio::test]
async fn test_round_trip_preserves_caller_fields() {
    let (_tmp, docs) = sqlite_docs().await;
    let store = PathScopedStore::new(docs);

    let mut snapshot = tree();
    snapshot.frontier_nodes[1]
        .extra
        .insert("estimatedDuration".into(), json!("45m"));
    snapshot.extra.insert("learningStyle".into(), json!({"pace": "slow"}));
    snapshot.strategic_branches = vec![json!({"title": "Foundations"})];

    store.save("P1", None, &snapshot).await.unwrap();
    let loaded = store.load("P1", None).await.unwrap().unwrap();

    assert_eq!(loaded.frontier_nodes, snapshot.frontier_nodes);
    assert_eq!(loaded.extra.get("learningStyle"), Some(&json!({"pace": "slow"})));
    assert_eq!(loaded.strategic_branches, snapshot.strategic_branches);
}

#[tokio::test]
async fn test_omitted_path_defaults_to_general() {
    let store = PathScopedStore::new(Arc::new(InMemoryStore::new()));

    store.save("P1", None, &tree()).await.unwrap();

    let explicit = store.load("P1", Some("general")).await.unwrap();
    let implicit = store.load("P1", None).await.unwrap();
    let blank = store.load("P1", Some("  ")).await.unwrap();
    assert!(explicit.is_some());
    assert_eq!(explicit, implicit);
    assert_eq!(explicit, blank);
}

#[tokio::test]
async fn test_omitted_path_follows_active_path() {
    let (_tmp, docs) = sqlite_docs().await;
    let store = PathScopedStore::new(docs);

    store
        .create_project("P1", Some("learn rust"), Some("career"))
        .await
        .unwrap();
    store.save("P1", None, &tree()).await.unwrap();

    let via_default = store.load("P1", None).await.unwrap();
    let via_name = store.load("P1", Some("career")).await.unwrap();
    assert_eq!(via_default, via_name);
    assert_eq!(via_default.unwrap().nodes().len(), 2);

    // typed and raw reads resolve the same path
    let raw_default = store.read_raw("P1", None).await.unwrap();
    let raw_named = store.read_raw("P1", Some("career")).await.unwrap();
    assert_eq!(raw_default, raw_named);

    assert!(store.load("P1", Some("general")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_switch_path_redirects_implicit_saves() {
    let store = PathScopedStore::new(Arc::new(InMemoryStore::new()));
    store.create_project("P1", None, None).await.unwrap();

    let config = store.switch_path("P1", "deep-dive").await.unwrap();
    assert_eq!(config.active_path.as_deref(), Some("deep-dive"));

    store.save("P1", None, &tree()).await.unwrap();
    assert_eq!(
        store.list_paths("P1").await.unwrap(),
        vec!["deep-dive", "general"]
    );

    let general = store.load("P1", Some("general")).await.unwrap().unwrap();
    assert!(general.nodes().is_empty());
    let deep = store.load("P1", Some("deep-dive")).await.unwrap().unwrap();
    assert_eq!(deep.nodes().len(), 2);
}

#[tokio::test]
async fn test_absent_and_empty_are_distinct() {
    let (_tmp, docs) = sqlite_docs().await;
    let store = PathScopedStore::new(docs.clone());

    assert!(store.load("P2", Some("general")).await.unwrap().is_none());
    assert!(store.read_raw("P2", Some("general")).await.unwrap().is_none());

    let key = DocumentKey::snapshot("P2", "general");
    docs.write_document(&key, "{}", &checksum("{}"), 0)
        .await
        .unwrap();
    let empty = store.load("P2", Some("general")).await.unwrap().unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_create_project_writes_config_and_empty_snapshot() {
    let store = PathScopedStore::new(Arc::new(InMemoryStore::new()));
    let config = store
        .create_project("P1", Some("ship it"), None)
        .await
        .unwrap();
    assert_eq!(config.active_path.as_deref(), Some("general"));

    let stored = store.load_project_config("P1").await.unwrap().unwrap();
    assert_eq!(stored.goal.as_deref(), Some("ship it"));

    let snapshot = store.load("P1", None).await.unwrap().unwrap();
    assert_eq!(snapshot.goal.as_deref(), Some("ship it"));
    assert!(snapshot.nodes().is_empty());

    let again = store.create_project("P1", None, None).await.unwrap_err();
    assert!(matches!(again, HtaError::WriteConflict { .. }));
}

#[tokio::test]
async fn test_save_replaces_whole_snapshot() {
    let store = PathScopedStore::new(Arc::new(InMemoryStore::new()));
    store.save("P1", None, &tree()).await.unwrap();

    let replacement = TreeSnapshot::new("other", vec![Node::new("z")]);
    let ack = store.save("P1", None, &replacement).await.unwrap();
    assert_eq!(ack.revision, 2);
    assert_eq!(ack.path, "general");

    let loaded = store.load("P1", None).await.unwrap().unwrap();
    assert_eq!(loaded.goal.as_deref(), Some("other"));
    assert_eq!(loaded.nodes().len(), 1);
}

#[tokio::test]
async fn test_concurrent_saves_to_one_path_are_serialized() {
    let (_tmp, docs) = sqlite_docs().await;
    let store = Arc::new(PathScopedStore::new(docs));

    let mut handles = Vec::new();
    for i in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let snapshot = TreeSnapshot::new(format!("goal {}", i), vec![Node::new(format!("n{}", i))]);
            store.save("P1", Some("general"), &snapshot).await
        }));
    }

    let mut revisions = Vec::new();
    for h in handles {
        revisions.push(h.await.unwrap().unwrap().revision);
    }
    revisions.sort();
    assert_eq!(revisions, (1..=10).collect::<Vec<i64>>());

    // whichever write landed last is whole
    let loaded = store.load("P1", Some("general")).await.unwrap().unwrap();
    let goal = loaded.goal.unwrap();
    let n = goal.trim_start_matches("goal ");
    assert_eq!(loaded.frontier_nodes[0].id, format!("n{}", n));
}

#[tokio::test]
async fn test_saves_to_different_paths_are_independent() {
    let store = Arc::new(PathScopedStore::new(Arc::new(InMemoryStore::new())));
    let mut handles = Vec::new();
    for path in ["a", "b", "c", "d"] {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.save("P1", Some(path), &tree()).await
        }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap().unwrap().revision, 1);
    }
    assert_eq!(store.list_paths("P1").await.unwrap(), vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn test_stale_revision_is_a_write_conflict() {
    let (_tmp, docs) = sqlite_docs().await;
    let key = DocumentKey::snapshot("P1", "general");

    assert_eq!(docs.write_document(&key, "{}", &checksum("{}"), 0).await.unwrap(), 1);
    let err = docs
        .write_document(&key, "[]", &checksum("[]"), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, HtaError::WriteConflict { expected: 0, found: 1, .. }));

    let doc = docs.read_document(&key).await.unwrap().unwrap();
    assert_eq!(doc.current.body, "{}");
    assert!(doc.previous.is_none());
}

#[tokio::test]
async fn test_advisory_validation_persists_with_findings() {
    let store = PathScopedStore::new(Arc::new(InMemoryStore::new()));
    let snapshot = TreeSnapshot::new("g", vec![Node::new("x").with_parent("missing")]);

    store.save("P1", None, &snapshot).await.unwrap();
    let loaded = store.load("P1", None).await.unwrap().unwrap();
    assert_eq!(loaded.hierarchy_metadata.unwrap().integrity_findings, 1);
}

#[tokio::test]
async fn test_strict_validation_rejects_and_keeps_prior() {
    let options = StoreOptions {
        validation: ValidationPolicy::Strict,
        ..Default::default()
    };
    let store = PathScopedStore::with_options(Arc::new(InMemoryStore::new()), options);
    store.save("P1", None, &tree()).await.unwrap();

    let cyclic = TreeSnapshot::new(
        "g",
        vec![Node::new("A").with_parent("B"), Node::new("B").with_parent("A")],
    );
    let err = store.save("P1", None, &cyclic).await.unwrap_err();
    match err {
        HtaError::InvalidHierarchy { findings, .. } => {
            assert!(findings.iter().all(|f| f.kind == FindingKind::Cycle));
            assert!(!findings.is_empty());
        }
        other => panic!("expected InvalidHierarchy, got {:?}", other),
    }

    let loaded = store.load("P1", None).await.unwrap().unwrap();
    assert_eq!(loaded.goal.as_deref(), Some("learn rust"));
}

#[tokio::test]
async fn test_damaged_current_revision_recovers_previous() {
    let (_tmp, docs) = sqlite_docs().await;
    let store = PathScopedStore::new(docs.clone());

    store.save("P1", None, &tree()).await.unwrap();
    store
        .save("P1", None, &TreeSnapshot::new("second", vec![]))
        .await
        .unwrap();

    // torn write: body changed without its checksum
    sqlx::query("UPDATE documents SET body = '{\"goal\":\"tor' WHERE project_id = 'P1' AND kind = 'hta'")
        .execute(docs.pool())
        .await
        .unwrap();

    let loaded = store.load("P1", None).await.unwrap().unwrap();
    assert_eq!(loaded.goal.as_deref(), Some("learn rust"));
    assert_eq!(loaded.nodes().len(), 2);

    // raw reads return exactly what is stored
    let raw = store.read_raw("P1", None).await.unwrap().unwrap();
    assert_eq!(raw, "{\"goal\":\"tor");
}

#[tokio::test]
async fn test_unrecoverable_document_reports_corruption() {
    let (_tmp, docs) = sqlite_docs().await;
    let store = PathScopedStore::new(docs.clone());
    store.save("P1", None, &tree()).await.unwrap();

    sqlx::query("UPDATE documents SET checksum = 'deadbeef' WHERE project_id = 'P1'")
        .execute(docs.pool())
        .await
        .unwrap();

    let err = store.load("P1", None).await.unwrap_err();
    assert!(matches!(err, HtaError::Corrupted { .. }));
}

#[tokio::test]
async fn test_save_project_config_round_trip() {
    let store = PathScopedStore::new(Arc::new(InMemoryStore::new()));
    assert!(store.load_project_config("P1").await.unwrap().is_none());

    let mut config = hta_core::models::ProjectConfig {
        active_path: Some("career".into()),
        goal: Some("switch jobs".into()),
        constraints: Some(json!({"hoursPerWeek": 5})),
        ..Default::default()
    };
    config.extra.insert("domain".into(), json!("software"));

    assert_eq!(store.save_project_config("P1", &config).await.unwrap(), 1);
    assert_eq!(store.save_project_config("P1", &config).await.unwrap(), 2);

    let loaded = store.load_project_config("P1").await.unwrap().unwrap();
    assert_eq!(loaded.active_path.as_deref(), Some("career"));
    assert_eq!(loaded.constraints, Some(json!({"hoursPerWeek": 5})));
    assert_eq!(loaded.extra.get("domain"), Some(&json!("software")));
    assert_eq!(store.resolve("P1", None).await.unwrap(), "career");
}

/// Document store that fails one chosen write and can stall reads.
#[derive(Default)]
struct FaultyStore {
    inner: InMemoryStore,
    writes: AtomicUsize,
    fail_write: Option<usize>,
    stall_reads: Option<Duration>,
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn read_document(&self, key: &DocumentKey) -> hta_core::Result<Option<StoredDocument>> {
        if let Some(stall) = self.stall_reads {
            tokio::time::sleep(stall).await;
        }
        self.inner.read_document(key).await
    }

    async fn write_document(
        &self,
        key: &DocumentKey,
        body: &str,
        checksum: &str,
        expected_revision: i64,
    ) -> hta_core::Result<i64> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_write == Some(n) {
            return Err(HtaError::storage("write_document", key, "disk full"));
        }
        self.inner
            .write_document(key, body, checksum, expected_revision)
            .await
    }

    async fn list_paths(&self, project_id: &str) -> hta_core::Result<Vec<String>> {
        self.inner.list_paths(project_id).await
    }
}

#[tokio::test]
async fn test_interrupted_create_project_can_be_retried() {
    let store = PathScopedStore::new(Arc::new(FaultyStore {
        fail_write: Some(2),
        ..Default::default()
    }));

    let err = store
        .create_project("P1", Some("ship it"), Some("career"))
        .await
        .unwrap_err();
    assert!(matches!(err, HtaError::Storage { .. }));
    assert!(store.load_project_config("P1").await.unwrap().is_none());

    let config = store
        .create_project("P1", Some("ship it"), Some("career"))
        .await
        .unwrap();
    assert_eq!(config.active_path.as_deref(), Some("career"));
    assert_eq!(store.resolve("P1", None).await.unwrap(), "career");
    assert!(store.load("P1", None).await.unwrap().unwrap().nodes().is_empty());

    let again = store.create_project("P1", None, None).await.unwrap_err();
    assert!(matches!(again, HtaError::WriteConflict { .. }));
}

#[tokio::test]
async fn test_slow_load_times_out_with_resolved_path() {
    let store = PathScopedStore::new(Arc::new(FaultyStore {
        stall_reads: Some(Duration::from_millis(50)),
        ..Default::default()
    }));

    // config lookup alone exceeds the budget
    let err = store
        .load_with_timeout("P1", None, Duration::from_millis(20))
        .await
        .unwrap_err();
    match err {
        HtaError::Timeout { operation, timeout_ms, .. } => {
            assert_eq!(operation, "load");
            assert_eq!(timeout_ms, 20);
        }
        other => panic!("expected timeout, got {:?}", other),
    }

    let err = store
        .load_with_timeout("P1", Some("general"), Duration::from_millis(20))
        .await
        .unwrap_err();
    match err {
        HtaError::Timeout { key, .. } => assert_eq!(key, "P1/general"),
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_raw_and_typed_reads_agree_after_switch() {
    let (_tmp, docs) = sqlite_docs().await;
    let store = PathScopedStore::new(docs);

    store.create_project("P1", None, None).await.unwrap();
    store.switch_path("P1", "deep-dive").await.unwrap();
    store.save("P1", None, &tree()).await.unwrap();

    let raw = store.read_raw("P1", None).await.unwrap().unwrap();
    assert_eq!(
        store.read_raw("P1", Some("deep-dive")).await.unwrap().as_deref(),
        Some(raw.as_str())
    );
    let from_raw = TreeSnapshot::from_json(&raw).unwrap();
    let loaded = store.load("P1", None).await.unwrap().unwrap();
    assert_eq!(from_raw, loaded);
    assert_eq!(loaded.nodes().len(), 2);
}

#[tokio::test]
async fn test_both_parent_spellings_survive_round_trip() {
    let (_tmp, docs) = sqlite_docs().await;
    let store = PathScopedStore::new(docs);

    let mut child = Node::new("b").with_parent("a");
    child.extra.insert("parentId".into(), json!("a"));
    let snapshot = TreeSnapshot::new("learn rust", vec![Node::new("a"), child]);

    store.save("P1", None, &snapshot).await.unwrap();
    let loaded = store.load("P1", None).await.unwrap().unwrap();

    assert_eq!(loaded.frontier_nodes, snapshot.frontier_nodes);
    assert_eq!(ids(&get_children(loaded.nodes(), Some("a"))), vec!["b"]);
}
