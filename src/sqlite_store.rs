//! SQLite-backed [`DocumentStore`] and [`VectorBackend`] implementations.
//!
//! Revision checks are folded into the write statements themselves
//! (`INSERT ... ON CONFLICT DO NOTHING` for the first write, a
//! revision-guarded `UPDATE` afterwards), so a write either lands whole or
//! not at all and a stale writer is detected without a read-then-write
//! transaction.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use hta_core::embedding::{blob_to_vec, vec_to_blob};
use hta_core::error::{HtaError, Result};
use hta_core::store::{
    rank_candidates, DocumentKey, DocumentStore, IntegrityReport, Revision, StoredDocument,
    VectorBackend, VectorMatch,
};

/// SQLite implementation of [`DocumentStore`] over the `documents` table.
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn current_revision(&self, key: &DocumentKey) -> Result<i64> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT revision FROM documents WHERE project_id = ? AND path_name = ? AND kind = ?",
        )
        .bind(&key.project_id)
        .bind(&key.path)
        .bind(key.kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HtaError::storage("read_revision", key, e))?;
        Ok(found.unwrap_or(0))
    }
}

/// Text column that decodes to an empty string when another writer stored
/// a different type, so checksum verification rejects it.
fn text_or_empty(row: &SqliteRow, column: &str) -> String {
    row.try_get::<String, _>(column).unwrap_or_else(|e| {
        warn!(column, error = %e, "undecodable document column");
        String::new()
    })
}

fn previous_revision(row: &SqliteRow) -> Option<Revision> {
    let revision: Option<i64> = row.try_get::<Option<i64>, _>("prev_revision").ok().flatten();
    let body: Option<String> = row.try_get::<Option<String>, _>("prev_body").ok().flatten();
    let checksum: Option<String> = row.try_get::<Option<String>, _>("prev_checksum").ok().flatten();
    let updated_at: Option<i64> = row.try_get::<Option<i64>, _>("prev_updated_at").ok().flatten();
    match (revision, body, checksum) {
        (Some(revision), Some(body), Some(checksum)) => Some(Revision {
            revision,
            body,
            checksum,
            updated_at: updated_at.unwrap_or(0),
        }),
        _ => None,
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn read_document(&self, key: &DocumentKey) -> Result<Option<StoredDocument>> {
        let row = sqlx::query(
            r#"
            SELECT body, checksum, revision, updated_at,
                   prev_body, prev_checksum, prev_revision, prev_updated_at
            FROM documents
            WHERE project_id = ? AND path_name = ? AND kind = ?
            "#,
        )
        .bind(&key.project_id)
        .bind(&key.path)
        .bind(key.kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HtaError::storage("read_document", key, e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let revision: i64 = row
            .try_get("revision")
            .map_err(|e| HtaError::storage("read_document", key, e))?;
        Ok(Some(StoredDocument {
            current: Revision {
                revision,
                body: text_or_empty(&row, "body"),
                checksum: text_or_empty(&row, "checksum"),
                updated_at: row.try_get("updated_at").unwrap_or(0),
            },
            previous: previous_revision(&row),
        }))
    }

    async fn write_document(
        &self,
        key: &DocumentKey,
        body: &str,
        checksum: &str,
        expected_revision: i64,
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let next = expected_revision + 1;

        let result = if expected_revision == 0 {
            sqlx::query(
                r#"
                INSERT INTO documents (project_id, path_name, kind, body, checksum, revision, updated_at)
                VALUES (?, ?, ?, ?, ?, 1, ?)
                ON CONFLICT(project_id, path_name, kind) DO NOTHING
                "#,
            )
            .bind(&key.project_id)
            .bind(&key.path)
            .bind(key.kind.as_str())
            .bind(body)
            .bind(checksum)
            .bind(now)
            .execute(&self.pool)
            .await
        } else {
            // Right-hand sides see the pre-update row, so the old body
            // rotates into the prev_* columns in the same statement.
            sqlx::query(
                r#"
                UPDATE documents SET
                    prev_body = body,
                    prev_checksum = checksum,
                    prev_revision = revision,
                    prev_updated_at = updated_at,
                    body = ?,
                    checksum = ?,
                    revision = ?,
                    updated_at = ?
                WHERE project_id = ? AND path_name = ? AND kind = ? AND revision = ?
                "#,
            )
            .bind(body)
            .bind(checksum)
            .bind(next)
            .bind(now)
            .bind(&key.project_id)
            .bind(&key.path)
            .bind(key.kind.as_str())
            .bind(expected_revision)
            .execute(&self.pool)
            .await
        }
        .map_err(|e| HtaError::storage("write_document", key, e))?;

        if result.rows_affected() == 0 {
            let found = self.current_revision(key).await?;
            return Err(HtaError::WriteConflict {
                key: key.to_string(),
                expected: expected_revision,
                found,
            });
        }
        Ok(next)
    }

    async fn list_paths(&self, project_id: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT path_name FROM documents WHERE project_id = ? AND kind = 'hta' ORDER BY path_name",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HtaError::storage("list_paths", project_id, e))
    }
}

/// SQLite implementation of [`VectorBackend`] over the `vectors` table,
/// scoped to one collection.
///
/// Similarity is brute-force over the collection, the same way the
/// in-memory backend scores.
pub struct SqliteVectorBackend {
    pool: SqlitePool,
    collection: String,
    dims: usize,
}

impl SqliteVectorBackend {
    pub fn new(pool: SqlitePool, collection: impl Into<String>, dims: usize) -> Self {
        Self {
            pool,
            collection: collection.into(),
            dims,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Decode a row's embedding, or `None` when it is not a BLOB of
    /// `dims` little-endian `f64`s.
    fn decode(&self, row: &SqliteRow) -> Option<Vec<f64>> {
        let blob: Vec<u8> = row.try_get("embedding").ok()?;
        blob_to_vec(&blob).filter(|v| v.len() == self.dims)
    }

    async fn rows(&self, operation: &str) -> Result<Vec<SqliteRow>> {
        sqlx::query(
            "SELECT id, embedding, metadata_json FROM vectors WHERE collection = ? ORDER BY rowid",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HtaError::storage(operation, &self.collection, e))
    }
}

#[async_trait]
impl VectorBackend for SqliteVectorBackend {
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

        let metadata_json = serde_json::to_string(metadata).map_err(|e| HtaError::Serialization {
            key: id.to_string(),
            reason: e.to_string(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO vectors (collection, id, embedding, dims, metadata_json, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(collection, id) DO UPDATE SET
                embedding = excluded.embedding,
                dims = excluded.dims,
                metadata_json = excluded.metadata_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.collection)
        .bind(id)
        .bind(vec_to_blob(vector))
        .bind(self.dims as i64)
        .bind(metadata_json)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| HtaError::storage("upsert", id, e))?;

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

        let rows = self.rows("query").await?;
        let candidates = rows.iter().filter_map(|row| {
            let id: String = row.try_get("id").ok()?;
            let decoded = self.decode(row)?;
            let metadata = row
                .try_get::<String, _>("metadata_json")
                .ok()
                .and_then(|json| serde_json::from_str(&json).ok())
                .unwrap_or(Value::Null);
            Some((id, decoded, metadata))
        });
        Ok(rank_candidates(vector, candidates, k, min_score))
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| HtaError::storage("count", &self.collection, e))?;
        Ok(count as usize)
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut collections: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT collection FROM vectors ORDER BY collection")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| HtaError::storage("list_collections", &self.collection, e))?;
        if !collections.contains(&self.collection) {
            collections.push(self.collection.clone());
            collections.sort();
        }
        Ok(collections)
    }

    async fn heartbeat(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| HtaError::storage("heartbeat", &self.collection, e))?;
        Ok(())
    }

    async fn integrity_check(&self) -> Result<IntegrityReport> {
        let rows = self.rows("integrity_check").await?;
        let unreadable = rows
            .iter()
            .filter(|row| self.decode(row).is_none())
            .filter_map(|row| row.try_get::<String, _>("id").ok())
            .collect();
        Ok(IntegrityReport {
            total: rows.len(),
            unreadable,
        })
    }

    async fn remove(&self, ids: &[String]) -> Result<usize> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| HtaError::storage("remove", &self.collection, e))?;

        let mut removed = 0u64;
        for id in ids {
            let result = sqlx::query("DELETE FROM vectors WHERE collection = ? AND id = ?")
                .bind(&self.collection)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| HtaError::storage("remove", id, e))?;
            removed += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| HtaError::storage("remove", &self.collection, e))?;
        Ok(removed as usize)
    }
}
