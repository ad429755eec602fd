//! # HTA Harness Core
//!
//! Shared, I/O-free logic for HTA Harness: task hierarchy models, integrity
//! validation, frontier extraction, the document/vector store traits, and
//! embedding normalization.
//!
//! This crate contains no tokio, sqlx, or filesystem dependencies. Every
//! hierarchy query takes a borrowed node slice and returns borrowed or
//! owned results without retaining the input, so any number of readers can
//! call into it concurrently.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | `Node`, `TreeSnapshot`, `ProjectConfig`, `HierarchyMetadata` |
//! | [`hierarchy`] | Parent maps, validation, frontier and dependency queries |
//! | [`vector`] | Tagged embedding inputs normalized to plain `f64` arrays |
//! | [`embedding`] | Embedding provider trait, BLOB codec, cosine similarity |
//! | [`store`] | Document and vector backend traits, path resolution, in-memory backends |
//! | [`error`] | `HtaError` taxonomy shared by every boundary |

pub mod embedding;
pub mod error;
pub mod hierarchy;
pub mod models;
pub mod store;
pub mod vector;

pub use error::{HtaError, Result};
