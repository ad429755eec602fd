//! Vector upsert/query with format normalization and corruption tracking.
//!
//! [`VectorAdapter`] sits between callers holding raw embedding output and
//! a [`VectorBackend`] that accepts only plain `f64` arrays. An upsert is
//! first offered to the backend as-is; on a format mismatch the input is
//! run through [`normalize`] and retried exactly once.
//!
//! Upserts to the same id are serialized. All backend calls are bounded by
//! the adapter's timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use hta_core::error::{HtaError, Result};
use hta_core::store::{VectorBackend, VectorMatch};
use hta_core::vector::{normalize, EmbeddingInput, NumericVector};

use crate::locks::{bounded, KeyedLocks};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorStoreStatus {
    Ok,
    /// Backend unreachable or failing its probes.
    Degraded,
    /// Backend reachable but holding unreadable vectors.
    Corrupted,
}

/// Health snapshot returned by [`VectorAdapter::recovery_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryStatus {
    pub vector_store_status: VectorStoreStatus,
    pub corruption_detected: bool,
}

/// Outcome of [`VectorAdapter::recover`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryReport {
    pub scanned: usize,
    pub removed: Vec<String>,
}

pub struct VectorAdapter {
    backend: Arc<dyn VectorBackend>,
    locks: KeyedLocks<String>,
    timeout: Duration,
    corruption: AtomicBool,
}

impl VectorAdapter {
    pub fn new(backend: Arc<dyn VectorBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            locks: KeyedLocks::new(),
            timeout,
            corruption: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> &Arc<dyn VectorBackend> {
        &self.backend
    }

    pub fn dims(&self) -> usize {
        self.backend.dims()
    }

    /// Insert or replace the vector for `id`.
    pub async fn upsert(&self, id: &str, vector: &EmbeddingInput, metadata: &Value) -> Result<()> {
        self.upsert_with_timeout(id, vector, metadata, self.timeout)
            .await
    }

    pub async fn upsert_with_timeout(
        &self,
        id: &str,
        vector: &EmbeddingInput,
        metadata: &Value,
        timeout: Duration,
    ) -> Result<()> {
        bounded("upsert", id, timeout, async {
            let _guard = self.locks.lock(&id.to_string()).await;

            let first = match vector.as_plain() {
                Some(plain) => self.backend.upsert(id, plain, metadata).await,
                None => Err(HtaError::FormatMismatch {
                    id: id.to_string(),
                    reason: format!("{} is not a plain array", vector.kind()),
                }),
            };
            match first {
                Err(e) if e.is_format_mismatch() => {
                    debug!(id, error = %e, "normalizing vector and retrying upsert");
                    let normalized = to_numeric(id, vector)?;
                    self.backend
                        .upsert(id, normalized.as_slice(), metadata)
                        .await
                }
                other => other,
            }
        })
        .await
    }

    /// Top `k` matches for `vector` with score `>= min_score`.
    pub async fn query(
        &self,
        vector: &EmbeddingInput,
        k: usize,
        min_score: f64,
    ) -> Result<Vec<VectorMatch>> {
        let query = to_numeric("<query>", vector)?;
        bounded(
            "query",
            self.backend.collection(),
            self.timeout,
            self.backend.query(query.as_slice(), k, min_score),
        )
        .await
    }

    pub async fn count(&self) -> Result<usize> {
        bounded("count", self.backend.collection(), self.timeout, self.backend.count()).await
    }

    pub async fn list_collections(&self) -> Result<Vec<String>> {
        bounded(
            "list_collections",
            self.backend.collection(),
            self.timeout,
            self.backend.list_collections(),
        )
        .await
    }

    /// Probe the backend. Never fails; problems are reported in the status.
    ///
    /// Once unreadable vectors have been seen, `corruption_detected` stays
    /// set until [`recover`](Self::recover) succeeds.
    pub async fn recovery_status(&self) -> RecoveryStatus {
        let collection = self.backend.collection();

        if let Err(e) = bounded("heartbeat", collection, self.timeout, self.backend.heartbeat()).await {
            warn!(collection, error = %e, "vector store heartbeat failed");
            return self.status(VectorStoreStatus::Degraded);
        }

        match bounded(
            "integrity_check",
            collection,
            self.timeout,
            self.backend.integrity_check(),
        )
        .await
        {
            Ok(report) if !report.is_clean() => {
                error!(
                    collection,
                    unreadable = report.unreadable.len(),
                    total = report.total,
                    "vector store corruption detected"
                );
                self.corruption.store(true, Ordering::SeqCst);
                self.status(VectorStoreStatus::Corrupted)
            }
            Ok(_) if self.corruption.load(Ordering::SeqCst) => {
                self.status(VectorStoreStatus::Corrupted)
            }
            Ok(_) => self.status(VectorStoreStatus::Ok),
            Err(e) => {
                warn!(collection, error = %e, "vector store integrity check failed");
                self.status(VectorStoreStatus::Degraded)
            }
        }
    }

    /// Drop unreadable vectors and clear the corruption flag.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let collection = self.backend.collection();
        let report = bounded(
            "integrity_check",
            collection,
            self.timeout,
            self.backend.integrity_check(),
        )
        .await?;

        if !report.unreadable.is_empty() {
            let removed = bounded(
                "remove",
                collection,
                self.timeout,
                self.backend.remove(&report.unreadable),
            )
            .await?;
            warn!(collection, removed, "removed unreadable vectors");
        }

        self.corruption.store(false, Ordering::SeqCst);
        info!(collection, scanned = report.total, "vector store recovered");
        Ok(RecoveryReport {
            scanned: report.total,
            removed: report.unreadable,
        })
    }

    fn status(&self, vector_store_status: VectorStoreStatus) -> RecoveryStatus {
        RecoveryStatus {
            vector_store_status,
            corruption_detected: self.corruption.load(Ordering::SeqCst),
        }
    }
}

fn to_numeric(id: &str, vector: &EmbeddingInput) -> Result<NumericVector> {
    normalize(vector).map_err(|e| HtaError::FormatMismatch {
        id: id.to_string(),
        reason: e.to_string(),
    })
}
