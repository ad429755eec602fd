//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait implemented by whatever model
//! turns node text into vectors, plus pure helpers for vector
//! serialization and similarity. The model itself lives outside this
//! workspace; tests use small deterministic providers.

use async_trait::async_trait;

use crate::error::Result;
use crate::vector::EmbeddingInput;

/// Trait for embedding providers.
///
/// Implementations return one vector per input text, in input order, each
/// of length [`dims`](EmbeddingProvider::dims). Vectors come back in
/// whatever representation the model produces; the vector adapter
/// normalizes them before they reach a backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"all-MiniLM-L6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    ///
    /// Failures are reported as [`HtaError::Embedding`](crate::HtaError::Embedding).
    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingInput>>;
}

/// Encode a vector as a BLOB (little-endian f64 bytes).
///
/// Each `f64` is stored as 8 bytes, producing a BLOB of `vec.len() × 8`
/// bytes. Storing full `f64` keeps the round trip exact.
///
/// # Example
///
/// ```rust
/// use hta_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let v = vec![0.1f64, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 24);
/// assert_eq!(blob_to_vec(&blob), Some(v));
/// ```
pub fn vec_to_blob(vec: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 8);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a vector.
///
/// Returns `None` when the length is not a multiple of 8, which is how a
/// truncated or foreign-format row shows up.
pub fn blob_to_vec(blob: &[u8]) -> Option<Vec<f64>> {
    if blob.len() % 8 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                f64::from_le_bytes(buf)
            })
            .collect(),
    )
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different
/// lengths.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 0.0;
    }

    dot / denom
}
