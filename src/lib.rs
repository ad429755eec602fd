//! # HTA Harness
//!
//! Persistent hierarchical task trees (HTA) with path-scoped snapshots and
//! semantic task retrieval.
//!
//! A project owns one config record and any number of named *paths*, each
//! holding a full snapshot of its task tree. The hierarchy engine in
//! [`hta_core`] validates and queries those trees; this crate persists them
//! to SQLite, embeds their nodes into a vector index, and exposes both
//! through the `hta` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────┐   ┌──────────────┐
//! │  hta-core    │──▶│ PathScopedStore │──▶│ SQLite docs  │
//! │ validate/    │   │ resolve, lock,  │   │ rev+checksum │
//! │ frontier     │   │ recover         │   └──────────────┘
//! └──────┬───────┘   └─────────────────┘
//!        │           ┌─────────────────┐   ┌──────────────┐
//!        └──────────▶│  VectorAdapter  │──▶│ SQLite vecs  │
//!                    │ normalize/retry │   │  f64 BLOBs   │
//!                    └─────────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hta init
//! hta create P1 --goal "Learn Rust"
//! hta save P1 --file tree.json
//! hta frontier P1
//! hta switch P1 deep-dive
//! hta status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite document store and vector backend |
//! | [`locks`] | Per-key async locks and timeouts |
//! | [`path_store`] | Path-scoped snapshot persistence |
//! | [`vector_adapter`] | Vector normalization, upsert/query, health |
//! | [`indexing`] | Node embedding and similar-task lookup |
//! | [`commands`] | `hta` subcommand implementations |

pub mod commands;
pub mod config;
pub mod db;
pub mod indexing;
pub mod locks;
pub mod logging;
pub mod migrate;
pub mod path_store;
pub mod sqlite_store;
pub mod vector_adapter;
