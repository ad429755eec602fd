//! Path-scoped persistence of task hierarchy snapshots.
//!
//! A project holds one [`ProjectConfig`] and any number of named paths,
//! each with its own [`TreeSnapshot`]. Every read and write of a snapshot
//! goes through [`PathScopedStore`], which:
//!
//! - resolves an omitted path name through [`resolve_path`]
//!   (`activePath`, then `"general"`);
//! - serializes writers per (project, path) with [`KeyedLocks`] and
//!   detects stale writers through the store's revision check;
//! - bounds every call with a timeout;
//! - stamps snapshots with [`HierarchyMetadata`](hta_core::models::HierarchyMetadata)
//!   and timestamps on save;
//! - verifies checksums on load, falling back to the previous revision
//!   when the current one is damaged.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hta_core::models::{Node, TreeSnapshot};
//! use hta_core::store::memory::InMemoryStore;
//! use hta_harness::path_store::PathScopedStore;
//!
//! # async fn run() -> hta_core::Result<()> {
//! let store = PathScopedStore::new(Arc::new(InMemoryStore::new()));
//! let snapshot = TreeSnapshot::new("learn rust", vec![Node::new("a")]);
//! store.save("P1", None, &snapshot).await?;
//! let loaded = store.load("P1", Some("general")).await?;
//! assert_eq!(loaded.map(|s| s.frontier_nodes.len()), Some(1));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use hta_core::error::{HtaError, Result};
use hta_core::hierarchy::{summarize, validate_hierarchy};
use hta_core::models::{ProjectConfig, TreeSnapshot};
use hta_core::store::{
    checksum, resolve_path, DocumentKey, DocumentStore, Revision, StoredDocument,
};

use crate::locks::{bounded, bounded_until, KeyedLocks};

/// What to do when a snapshot being saved has integrity findings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPolicy {
    /// Log the findings and persist anyway.
    #[default]
    Advisory,
    /// Reject the save with [`HtaError::InvalidHierarchy`].
    Strict,
}

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub timeout: Duration,
    pub validation: ValidationPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            validation: ValidationPolicy::Advisory,
        }
    }
}

/// Acknowledgement of a persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveAck {
    pub project_id: String,
    pub path: String,
    pub revision: i64,
    /// Correlates this save with its log events.
    pub save_id: String,
    pub saved_at: DateTime<Utc>,
}

pub struct PathScopedStore {
    docs: Arc<dyn DocumentStore>,
    locks: KeyedLocks<DocumentKey>,
    options: StoreOptions,
}

impl PathScopedStore {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self::with_options(docs, StoreOptions::default())
    }

    pub fn with_options(docs: Arc<dyn DocumentStore>, options: StoreOptions) -> Self {
        Self {
            docs,
            locks: KeyedLocks::new(),
            options,
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// The path name a request for `path` in `project_id` applies to.
    pub async fn resolve(&self, project_id: &str, path: Option<&str>) -> Result<String> {
        if let Some(explicit) = path.map(str::trim).filter(|p| !p.is_empty()) {
            return Ok(explicit.to_string());
        }
        let config = self.read_config(project_id).await?;
        let resolved = resolve_path(None, config.as_ref());
        debug!(project_id, path = %resolved, "resolved implicit path");
        Ok(resolved)
    }

    // ---- snapshots ----

    /// Persist `snapshot` as the full content of (project, path).
    pub async fn save(
        &self,
        project_id: &str,
        path: Option<&str>,
        snapshot: &TreeSnapshot,
    ) -> Result<SaveAck> {
        self.save_with_timeout(project_id, path, snapshot, self.options.timeout)
            .await
    }

    pub async fn save_with_timeout(
        &self,
        project_id: &str,
        path: Option<&str>,
        snapshot: &TreeSnapshot,
        timeout: Duration,
    ) -> Result<SaveAck> {
        let deadline = Instant::now() + timeout;
        let path = self.resolve_until("save", project_id, path, deadline, timeout).await?;
        let label = format!("{}/{}", project_id, path);
        bounded_until(
            "save",
            &label,
            deadline,
            timeout,
            self.save_inner(project_id, &path, snapshot),
        )
        .await
    }

    async fn save_inner(
        &self,
        project_id: &str,
        path: &str,
        snapshot: &TreeSnapshot,
    ) -> Result<SaveAck> {
        let key = DocumentKey::snapshot(project_id, path);

        let report = validate_hierarchy(snapshot.nodes());
        if !report.valid {
            for finding in &report.findings {
                warn!(key = %key, finding = %finding, "hierarchy integrity finding");
            }
            if self.options.validation == ValidationPolicy::Strict {
                return Err(HtaError::InvalidHierarchy {
                    key: key.to_string(),
                    findings: report.findings,
                });
            }
        }

        let now = Utc::now();
        let mut stored = snapshot.clone();
        stored.hierarchy_metadata = Some(summarize(snapshot.nodes()));
        stored.created_at.get_or_insert(now);
        stored.last_updated = Some(now);
        let body = encode(&key, &stored)?;

        let _guard = self.locks.lock(&key).await;
        let expected = self.stored_revision(&key).await?;
        let revision = self
            .docs
            .write_document(&key, &body, &checksum(&body), expected)
            .await?;

        let save_id = uuid::Uuid::new_v4().to_string();
        info!(
            key = %key,
            revision,
            nodes = stored.frontier_nodes.len(),
            save_id = %save_id,
            "saved snapshot"
        );
        Ok(SaveAck {
            project_id: project_id.to_string(),
            path: path.to_string(),
            revision,
            save_id,
            saved_at: now,
        })
    }

    /// Load the snapshot for (project, path).
    ///
    /// `Ok(None)` when nothing was ever saved there. A stored but empty
    /// document loads as an empty snapshot.
    pub async fn load(&self, project_id: &str, path: Option<&str>) -> Result<Option<TreeSnapshot>> {
        self.load_with_timeout(project_id, path, self.options.timeout)
            .await
    }

    pub async fn load_with_timeout(
        &self,
        project_id: &str,
        path: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<TreeSnapshot>> {
        let deadline = Instant::now() + timeout;
        let path = self.resolve_until("load", project_id, path, deadline, timeout).await?;
        let key = DocumentKey::snapshot(project_id, &path);
        let label = format!("{}/{}", project_id, path);
        bounded_until("load", &label, deadline, timeout, async {
            match self.docs.read_document(&key).await? {
                Some(doc) => decode_document(&key, doc, TreeSnapshot::from_json).map(Some),
                None => {
                    debug!(key = %key, "no snapshot stored");
                    Ok(None)
                }
            }
        })
        .await
    }

    /// The stored body for (project, path) exactly as persisted.
    ///
    /// Resolves an omitted path the same way [`load`](Self::load) does.
    pub async fn read_raw(&self, project_id: &str, path: Option<&str>) -> Result<Option<String>> {
        let timeout = self.options.timeout;
        let deadline = Instant::now() + timeout;
        let path = self.resolve_until("read_raw", project_id, path, deadline, timeout).await?;
        let key = DocumentKey::snapshot(project_id, &path);
        let label = format!("{}/{}", project_id, path);
        bounded_until("read_raw", &label, deadline, timeout, async {
            Ok(self.docs.read_document(&key).await?.map(|d| d.current.body))
        })
        .await
    }

    pub async fn list_paths(&self, project_id: &str) -> Result<Vec<String>> {
        bounded("list_paths", project_id, self.options.timeout, self.docs.list_paths(project_id))
            .await
    }

    // ---- project config ----

    /// Create a project: its config and an empty snapshot on the active path.
    ///
    /// The snapshot is written first and the config last, since the config
    /// is what marks the project as existing. A create that fails part way
    /// can be retried. Fails with [`HtaError::WriteConflict`] if the project
    /// already exists.
    pub async fn create_project(
        &self,
        project_id: &str,
        goal: Option<&str>,
        active_path: Option<&str>,
    ) -> Result<ProjectConfig> {
        bounded("create_project", project_id, self.options.timeout, async {
            let config_key = DocumentKey::config(project_id);
            let _config_guard = self.locks.lock(&config_key).await;
            let existing = self.stored_revision(&config_key).await?;
            if existing != 0 {
                return Err(HtaError::WriteConflict {
                    key: config_key.to_string(),
                    expected: 0,
                    found: existing,
                });
            }

            let now = Utc::now();
            let config = ProjectConfig {
                active_path: Some(resolve_path(active_path, None)),
                goal: goal.map(str::to_string),
                created_at: Some(now),
                last_updated: Some(now),
                ..Default::default()
            };

            let path = resolve_path(None, Some(&config));
            let key = DocumentKey::snapshot(project_id, &path);
            {
                let _guard = self.locks.lock(&key).await;
                if self.stored_revision(&key).await? == 0 {
                    let snapshot = TreeSnapshot {
                        goal: config.goal.clone(),
                        hierarchy_metadata: Some(summarize(&[])),
                        created_at: Some(now),
                        last_updated: Some(now),
                        ..Default::default()
                    };
                    let body = encode(&key, &snapshot)?;
                    self.docs
                        .write_document(&key, &body, &checksum(&body), 0)
                        .await?;
                }
            }

            let body = encode(&config_key, &config)?;
            self.docs
                .write_document(&config_key, &body, &checksum(&body), 0)
                .await?;

            info!(project_id, path = %path, "created project");
            Ok(config)
        })
        .await
    }

    pub async fn load_project_config(&self, project_id: &str) -> Result<Option<ProjectConfig>> {
        bounded("load_project_config", project_id, self.options.timeout, self.read_config(project_id))
            .await
    }

    /// Replace the project config. Returns the new revision.
    pub async fn save_project_config(&self, project_id: &str, config: &ProjectConfig) -> Result<i64> {
        bounded("save_project_config", project_id, self.options.timeout, async {
            let key = DocumentKey::config(project_id);
            let _guard = self.locks.lock(&key).await;
            let mut stored = config.clone();
            stored.last_updated = Some(Utc::now());
            self.write_config(&key, &stored).await
        })
        .await
    }

    /// Make `path` the project's active path.
    ///
    /// Creates a bare config if the project has none. Snapshots are not
    /// touched; the new path may not have one yet.
    pub async fn switch_path(&self, project_id: &str, path: &str) -> Result<ProjectConfig> {
        bounded("switch_path", project_id, self.options.timeout, async {
            let key = DocumentKey::config(project_id);
            let _guard = self.locks.lock(&key).await;
            let now = Utc::now();
            let mut config = self.read_config(project_id).await?.unwrap_or_else(|| ProjectConfig {
                created_at: Some(now),
                ..Default::default()
            });
            let previous = config.active_path.replace(resolve_path(Some(path), None));
            config.last_updated = Some(now);
            self.write_config(&key, &config).await?;
            info!(
                project_id,
                from = previous.as_deref().unwrap_or("-"),
                to = config.active_path.as_deref().unwrap_or("-"),
                "switched active path"
            );
            Ok(config)
        })
        .await
    }

    // ---- internals ----

    /// Resolve `path` against the call's deadline, so later steps can be
    /// labelled with the path actually used.
    async fn resolve_until(
        &self,
        operation: &str,
        project_id: &str,
        path: Option<&str>,
        deadline: Instant,
        budget: Duration,
    ) -> Result<String> {
        let label = format!("{}/{}", project_id, path.unwrap_or("<active>"));
        bounded_until(operation, &label, deadline, budget, self.resolve(project_id, path)).await
    }

    async fn read_config(&self, project_id: &str) -> Result<Option<ProjectConfig>> {
        let key = DocumentKey::config(project_id);
        match self.docs.read_document(&key).await? {
            Some(doc) => decode_document(&key, doc, parse_config).map(Some),
            None => Ok(None),
        }
    }

    /// Caller holds the config key lock.
    async fn write_config(&self, key: &DocumentKey, config: &ProjectConfig) -> Result<i64> {
        let body = encode(key, config)?;
        let expected = self.stored_revision(key).await?;
        self.docs
            .write_document(key, &body, &checksum(&body), expected)
            .await
    }

    async fn stored_revision(&self, key: &DocumentKey) -> Result<i64> {
        Ok(self
            .docs
            .read_document(key)
            .await?
            .map(|d| d.current.revision)
            .unwrap_or(0))
    }
}

fn encode<T: Serialize>(key: &DocumentKey, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| HtaError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn parse_config(body: &str) -> serde_json::Result<ProjectConfig> {
    if body.trim().is_empty() {
        return Ok(ProjectConfig::default());
    }
    match serde_json::from_str::<Option<ProjectConfig>>(body)? {
        Some(config) => Ok(config),
        None => Ok(ProjectConfig::default()),
    }
}

fn decode_revision<T>(
    revision: &Revision,
    parse: fn(&str) -> serde_json::Result<T>,
) -> std::result::Result<T, String> {
    if !revision.is_intact() {
        return Err(format!("checksum mismatch at revision {}", revision.revision));
    }
    parse(&revision.body)
        .map_err(|e| format!("unreadable body at revision {}: {}", revision.revision, e))
}

/// Decode the current revision, falling back to the previous one.
fn decode_document<T>(
    key: &DocumentKey,
    doc: StoredDocument,
    parse: fn(&str) -> serde_json::Result<T>,
) -> Result<T> {
    let current_err = match decode_revision(&doc.current, parse) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };
    warn!(key = %key, error = %current_err, "current revision is damaged");

    match doc.previous.as_ref().map(|prev| (prev.revision, decode_revision(prev, parse))) {
        Some((revision, Ok(value))) => {
            warn!(key = %key, revision, "recovered from previous revision");
            Ok(value)
        }
        Some((_, Err(prev_err))) => Err(HtaError::Corrupted {
            key: key.to_string(),
            details: format!("{}; {}", current_err, prev_err),
        }),
        None => Err(HtaError::Corrupted {
            key: key.to_string(),
            details: current_err,
        }),
    }
}
