//! Storage abstractions for HTA Harness.
//!
//! Two boundaries live here:
//!
//! - [`DocumentStore`]: named documents under a (project, path, kind) key,
//!   with revision numbers, checksums, and one retained previous revision.
//! - [`VectorBackend`]: fixed-dimension vectors keyed by external id, with
//!   similarity query, liveness, and integrity probes.
//!
//! Both are async (via `async-trait`) so native backends can do real I/O
//! while the in-memory implementations in [`memory`] return ready futures.
//! Implementations must be `Send + Sync`.
//!
//! Path resolution for callers that omit a path name is centralized in
//! [`resolve_path`]; every entry point that reads or writes a path-scoped
//! document goes through it.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::models::ProjectConfig;

/// Path used when neither the caller nor the project config names one.
pub const DEFAULT_PATH: &str = "general";

/// Pick the path name a request applies to.
///
/// Order: the requested name if non-blank, else the config's
/// `activePath` if non-blank, else [`DEFAULT_PATH`].
pub fn resolve_path(requested: Option<&str>, config: Option<&ProjectConfig>) -> String {
    requested
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .or_else(|| {
            config
                .and_then(|c| c.active_path.as_deref())
                .map(str::trim)
                .filter(|p| !p.is_empty())
        })
        .unwrap_or(DEFAULT_PATH)
        .to_string()
}

/// SHA-256 hex digest of a stored body.
pub fn checksum(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// A [`TreeSnapshot`](crate::models::TreeSnapshot), one per path.
    Hta,
    /// The [`ProjectConfig`], one per project.
    Config,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Hta => "hta",
            DocumentKind::Config => "config",
        }
    }
}

/// Storage key. Project-scoped kinds use an empty `path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub project_id: String,
    pub path: String,
    pub kind: DocumentKind,
}

impl DocumentKey {
    pub fn snapshot(project_id: &str, path: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            path: path.to_string(),
            kind: DocumentKind::Hta,
        }
    }

    pub fn config(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            path: String::new(),
            kind: DocumentKind::Config,
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}/{}", self.project_id, self.kind.as_str())
        } else {
            write!(f, "{}/{}/{}", self.project_id, self.path, self.kind.as_str())
        }
    }
}

/// One stored version of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    /// Starts at 1 and increases by one per successful write.
    pub revision: i64,
    pub body: String,
    /// [`checksum`] of `body` as computed at write time.
    pub checksum: String,
    /// Unix seconds.
    pub updated_at: i64,
}

impl Revision {
    pub fn is_intact(&self) -> bool {
        checksum(&self.body) == self.checksum
    }
}

/// Current revision plus the one it replaced, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub current: Revision,
    pub previous: Option<Revision>,
}

/// Durable document storage.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`read_document`](DocumentStore::read_document) | Fetch current and previous revision |
/// | [`write_document`](DocumentStore::write_document) | Replace the document, checking the revision |
/// | [`list_paths`](DocumentStore::list_paths) | Path names with a snapshot for a project |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// `Ok(None)` when nothing has ever been written under `key`.
    async fn read_document(&self, key: &DocumentKey) -> Result<Option<StoredDocument>>;

    /// Atomically replace the document under `key`.
    ///
    /// Succeeds only if the stored revision equals `expected_revision`
    /// (0 for "not yet written"); otherwise fails with
    /// [`HtaError::WriteConflict`](crate::HtaError::WriteConflict) and
    /// leaves storage untouched. The replaced revision becomes `previous`.
    /// Returns the new revision number.
    async fn write_document(
        &self,
        key: &DocumentKey,
        body: &str,
        checksum: &str,
        expected_revision: i64,
    ) -> Result<i64>;

    /// Sorted names of paths holding an HTA snapshot for `project_id`.
    async fn list_paths(&self, project_id: &str) -> Result<Vec<String>>;
}

/// One ranked vector query hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f64,
    pub metadata: Value,
}

/// Result of scanning a backend for unreadable vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub total: usize,
    /// Ids whose stored bytes do not decode to a vector of the backend's
    /// dimensionality.
    pub unreadable: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.unreadable.is_empty()
    }
}

/// Vector storage and similarity search.
///
/// Vectors crossing this boundary are plain `f64` slices of exactly
/// [`dims`](VectorBackend::dims) elements; anything else is rejected with
/// [`HtaError::DimensionMismatch`](crate::HtaError::DimensionMismatch) or
/// [`HtaError::FormatMismatch`](crate::HtaError::FormatMismatch).
#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn collection(&self) -> &str;

    fn dims(&self) -> usize;

    /// Insert or replace. A replaced vector keeps its insertion position.
    async fn upsert(&self, id: &str, vector: &[f64], metadata: &Value) -> Result<()>;

    /// Top `k` by cosine similarity, descending, keeping only scores
    /// `>= min_score`. Ties keep insertion order.
    async fn query(&self, vector: &[f64], k: usize, min_score: f64) -> Result<Vec<VectorMatch>>;

    async fn count(&self) -> Result<usize>;

    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Cheap liveness probe.
    async fn heartbeat(&self) -> Result<()>;

    async fn integrity_check(&self) -> Result<IntegrityReport>;

    /// Delete the given ids; returns how many existed.
    async fn remove(&self, ids: &[String]) -> Result<usize>;
}

/// Score and rank stored vectors against `query`.
///
/// `rows` must be in insertion order; the sort is stable so equal scores
/// keep that order. Rows whose vector has the wrong length are skipped.
pub fn rank_candidates<I>(query: &[f64], rows: I, k: usize, min_score: f64) -> Vec<VectorMatch>
where
    I: IntoIterator<Item = (String, Vec<f64>, Value)>,
{
    if k == 0 {
        return Vec::new();
    }
    let mut matches: Vec<VectorMatch> = rows
        .into_iter()
        .filter(|(_, vector, _)| vector.len() == query.len())
        .map(|(id, vector, metadata)| VectorMatch {
            score: cosine_similarity(query, &vector),
            id,
            metadata,
        })
        .filter(|m| m.score >= min_score)
        .collect();
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches.truncate(k);
    matches
}
