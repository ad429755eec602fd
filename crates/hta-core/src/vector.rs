//! Embedding representations and their normalization.
//!
//! Embedding models hand back vectors in several shapes: plain number
//! sequences, raw typed buffers (little-endian `f32`/`f64` bytes), or JSON
//! that is nested or keyed by index the way a serialized typed array is.
//! Vector backends accept exactly one shape, a flat finite `f64` array.
//! [`normalize`] is the single conversion between the two.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::json_kind;

/// Element width of a [`EmbeddingInput::TypedBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferType {
    F32,
    F64,
}

impl BufferType {
    pub fn width(self) -> usize {
        match self {
            BufferType::F32 => 4,
            BufferType::F64 => 8,
        }
    }
}

/// A vector as produced by an embedding model, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingInput {
    /// Already the backend's plain shape.
    RawSequence(Vec<f64>),
    /// Little-endian packed floats.
    TypedBuffer { dtype: BufferType, bytes: Vec<u8> },
    /// Arbitrary JSON: nested arrays, or objects keyed `"0"`, `"1"`, ...
    Nested(Value),
}

impl EmbeddingInput {
    /// The plain array, if this input needs no conversion.
    pub fn as_plain(&self) -> Option<&[f64]> {
        match self {
            EmbeddingInput::RawSequence(values) => Some(values),
            _ => None,
        }
    }

    /// Pack `f32` values into a typed buffer.
    pub fn from_f32(values: &[f32]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        EmbeddingInput::TypedBuffer {
            dtype: BufferType::F32,
            bytes,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EmbeddingInput::RawSequence(_) => "raw sequence",
            EmbeddingInput::TypedBuffer { .. } => "typed buffer",
            EmbeddingInput::Nested(_) => "nested value",
        }
    }
}

impl From<Vec<f64>> for EmbeddingInput {
    fn from(values: Vec<f64>) -> Self {
        EmbeddingInput::RawSequence(values)
    }
}

impl From<Vec<f32>> for EmbeddingInput {
    fn from(values: Vec<f32>) -> Self {
        EmbeddingInput::from_f32(&values)
    }
}

impl From<Value> for EmbeddingInput {
    fn from(value: Value) -> Self {
        EmbeddingInput::Nested(value)
    }
}

impl From<NumericVector> for EmbeddingInput {
    fn from(vector: NumericVector) -> Self {
        EmbeddingInput::RawSequence(vector.0)
    }
}

/// A normalized vector: non-empty, finite, flat `f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NumericVector(Vec<f64>);

impl NumericVector {
    /// The backend's plain array shape. Exact values, exact length.
    pub fn to_plain_array(&self) -> Vec<f64> {
        self.0.clone()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

/// Why an input could not be normalized.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VectorFormatError {
    #[error("vector is empty")]
    Empty,

    #[error("{dtype:?} buffer of {len} bytes is not a multiple of {width}")]
    MisalignedBuffer {
        dtype: BufferType,
        len: usize,
        width: usize,
    },

    #[error("non-numeric {found} at {path}")]
    NonNumeric { path: String, found: &'static str },

    #[error("non-finite value at index {index}")]
    NonFinite { index: usize },

    #[error("index-keyed object is missing key {missing}")]
    SparseIndex { missing: usize },
}

/// Convert any [`EmbeddingInput`] into a [`NumericVector`].
///
/// Deterministic and lossless: `f32` widens to `f64` exactly, JSON numbers
/// are read as `f64`, nested arrays flatten depth-first. Idempotent, since
/// a normalized vector re-enters as a `RawSequence` and passes through
/// unchanged.
pub fn normalize(input: &EmbeddingInput) -> Result<NumericVector, VectorFormatError> {
    let values = match input {
        EmbeddingInput::RawSequence(values) => values.clone(),
        EmbeddingInput::TypedBuffer { dtype, bytes } => decode_buffer(*dtype, bytes)?,
        EmbeddingInput::Nested(value) => {
            let mut out = Vec::new();
            flatten_json(value, "$", &mut out)?;
            out
        }
    };

    if values.is_empty() {
        return Err(VectorFormatError::Empty);
    }
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(VectorFormatError::NonFinite { index });
    }
    Ok(NumericVector(values))
}

fn decode_buffer(dtype: BufferType, bytes: &[u8]) -> Result<Vec<f64>, VectorFormatError> {
    let width = dtype.width();
    if bytes.len() % width != 0 {
        return Err(VectorFormatError::MisalignedBuffer {
            dtype,
            len: bytes.len(),
            width,
        });
    }
    let values = match dtype {
        BufferType::F32 => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
        BufferType::F64 => bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect(),
    };
    Ok(values)
}

fn flatten_json(value: &Value, path: &str, out: &mut Vec<f64>) -> Result<(), VectorFormatError> {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(v) => {
                out.push(v);
                Ok(())
            }
            None => Err(VectorFormatError::NonNumeric {
                path: path.to_string(),
                found: "number",
            }),
        },
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_json(item, &format!("{}[{}]", path, i), out)?;
            }
            Ok(())
        }
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.parse::<usize>().is_ok()) => {
            for i in 0..map.len() {
                let item = map
                    .get(&i.to_string())
                    .ok_or(VectorFormatError::SparseIndex { missing: i })?;
                flatten_json(item, &format!("{}[{}]", path, i), out)?;
            }
            Ok(())
        }
        other => Err(VectorFormatError::NonNumeric {
            path: path.to_string(),
            found: json_kind(other),
        }),
    }
}
