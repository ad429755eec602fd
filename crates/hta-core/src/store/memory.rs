//! In-memory [`DocumentStore`] and [`VectorBackend`] implementations.
//!
//! Both use `std::sync::RwLock` for thread safety and never hold a guard
//! across an `.await`. Vector search is brute-force cosine similarity over
//! all stored vectors. Vectors are kept as encoded BLOBs, the same bytes a
//! native backend would persist, so integrity checks behave identically.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{HtaError, Result};

use super::{
    rank_candidates, DocumentKey, DocumentKind, DocumentStore, IntegrityReport, Revision,
    StoredDocument, VectorBackend, VectorMatch,
};

fn read_lock<'a, T>(lock: &'a RwLock<T>, operation: &str, key: &str) -> Result<RwLockReadGuard<'a, T>> {
    lock.read()
        .map_err(|e| HtaError::storage(operation, key, e))
}

fn write_lock<'a, T>(lock: &'a RwLock<T>, operation: &str, key: &str) -> Result<RwLockWriteGuard<'a, T>> {
    lock.write()
        .map_err(|e| HtaError::storage(operation, key, e))
}

/// In-memory document store for tests and embedded use.
#[derive(Default)]
pub struct InMemoryStore {
    docs: RwLock<HashMap<DocumentKey, StoredDocument>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored document as-is, bypassing revision checks.
    ///
    /// Used to simulate torn writes and on-disk corruption.
    pub fn put_raw(&self, key: DocumentKey, document: StoredDocument) -> Result<()> {
        let mut docs = write_lock(&self.docs, "put_raw", &key.to_string())?;
        docs.insert(key, document);
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn read_document(&self, key: &DocumentKey) -> Result<Option<StoredDocument>> {
        let docs = read_lock(&self.docs, "read_document", &key.to_string())?;
        Ok(docs.get(key).cloned())
    }

    async fn write_document(
        &self,
        key: &DocumentKey,
        body: &str,
        checksum: &str,
        expected_revision: i64,
    ) -> Result<i64> {
        let mut docs = write_lock(&self.docs, "write_document", &key.to_string())?;
        let found = docs.get(key).map(|d| d.current.revision).unwrap_or(0);
        if found != expected_revision {
            return Err(HtaError::WriteConflict {
                key: key.to_string(),
                expected: expected_revision,
                found,
            });
        }

        let current = Revision {
            revision: found + 1,
            body: body.to_string(),
            checksum: checksum.to_string(),
            updated_at: chrono::Utc::now().timestamp(),
        };
        let previous = docs.remove(key).map(|d| d.current);
        docs.insert(key.clone(), StoredDocument { current, previous });
        Ok(found + 1)
    }

    async fn list_paths(&self, project_id: &str) -> Result<Vec<String>> {
        let docs = read_lock(&self.docs, "list_paths", project_id)?;
        let mut paths: Vec<String> = docs
            .keys()
            .filter(|k| k.project_id == project_id && k.kind == DocumentKind::Hta)
            .map(|k| k.path.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }
}

struct StoredVector {
    id: String,
    blob: Vec<u8>,
    metadata: Value,
}

/// In-memory vector backend with a fixed collection name and dimensionality.
pub struct InMemoryVectorBackend {
    collection: String,
    dims: usize,
    vectors: RwLock<Vec<StoredVector>>,
}

impl InMemoryVectorBackend {
    pub fn new(collection: impl Into<String>, dims: usize) -> Self {
        Self {
            collection: collection.into(),
            dims,
            vectors: RwLock::new(Vec::new()),
        }
    }

    /// Store raw bytes under `id` without validation.
    ///
    /// Used to simulate a corrupted vector row.
    pub fn insert_raw_blob(&self, id: &str, blob: Vec<u8>) -> Result<()> {
        let mut vectors = write_lock(&self.vectors, "insert_raw_blob", id)?;
        vectors.retain(|v| v.id != id);
        vectors.push(StoredVector {
            id: id.to_string(),
            blob,
            metadata: Value::Null,
        });
        Ok(())
    }

    fn decode(&self, blob: &[u8]) -> Option<Vec<f64>> {
        blob_to_vec(blob).filter(|v| v.len() == self.dims)
    }
}

#[async_trait]
impl VectorBackend for InMemoryVectorBackend {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert(&self, id: &str, vector: &[f64], metadata: &Value) -> Result<()> {
        if vector.len() != self.dims {
            return Err(HtaError::DimensionMismatch {
                id: id.to_string(),
                expected: self.dims,
                actual: vector.len(),
            });
        }
        if let Some(index) = vector.iter().position(|v| !v.is_finite()) {
            return Err(HtaError::FormatMismatch {
                id: id.to_string(),
                reason: format!("non-finite value at index {}", index),
            });
        }

        let blob = vec_to_blob(vector);
        let mut vectors = write_lock(&self.vectors, "upsert", id)?;
        match vectors.iter_mut().find(|v| v.id == id) {
            Some(existing) => {
                existing.blob = blob;
                existing.metadata = metadata.clone();
            }
            None => vectors.push(StoredVector {
                id: id.to_string(),
                blob,
                metadata: metadata.clone(),
            }),
        }
        Ok(())
    }

    async fn query(&self, vector: &[f64], k: usize, min_score: f64) -> Result<Vec<VectorMatch>> {
        if vector.len() != self.dims {
            return Err(HtaError::DimensionMismatch {
                id: "<query>".to_string(),
                expected: self.dims,
                actual: vector.len(),
            });
        }
        let vectors = read_lock(&self.vectors, "query", &self.collection)?;
        let rows = vectors.iter().filter_map(|v| {
            self.decode(&v.blob)
                .map(|decoded| (v.id.clone(), decoded, v.metadata.clone()))
        });
        Ok(rank_candidates(vector, rows, k, min_score))
    }

    async fn count(&self) -> Result<usize> {
        Ok(read_lock(&self.vectors, "count", &self.collection)?.len())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(vec![self.collection.clone()])
    }

    async fn heartbeat(&self) -> Result<()> {
        read_lock(&self.vectors, "heartbeat", &self.collection).map(|_| ())
    }

    async fn integrity_check(&self) -> Result<IntegrityReport> {
        let vectors = read_lock(&self.vectors, "integrity_check", &self.collection)?;
        Ok(IntegrityReport {
            total: vectors.len(),
            unreadable: vectors
                .iter()
                .filter(|v| self.decode(&v.blob).is_none())
                .map(|v| v.id.clone())
                .collect(),
        })
    }

    async fn remove(&self, ids: &[String]) -> Result<usize> {
        let mut vectors = write_lock(&self.vectors, "remove", &self.collection)?;
        let before = vectors.len();
        vectors.retain(|v| !ids.contains(&v.id));
        Ok(before - vectors.len())
    }
}
