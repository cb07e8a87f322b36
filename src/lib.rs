//! # kex-mem
//!
//! The indexing and retrieval core of a local, file-backed note store.
//!
//! A directory of markdown notes is turned into a searchable corpus: a SQLite
//! FTS5 index for keyword search, an optional vector index for semantic
//! search, and a change tracker so repeated index passes only touch what
//! changed. Queries combine both signals with weighted Reciprocal Rank
//! Fusion.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌─────────────────────────┐
//! │ Collector │──▶│ Indexer  │──▶│ SQLite                  │
//! │ (walkdir) │   │          │   │ notes_fts  file_meta    │
//! └───────────┘   └────┬─────┘   │ note_vectors index_meta │
//!                      │         └───────────┬─────────────┘
//!                      ▼                     │
//!                ┌──────────┐          ┌─────▼──────┐
//!                │ Embedder │─────────▶│ QueryEngine│ (RRF)
//!                └──────────┘          └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and project discovery |
//! | [`collector`] | Document enumeration, title/body extraction |
//! | [`tracker`] | Change detection over `file_meta` |
//! | [`lexical`] | FTS5 index and ranked keyword queries |
//! | [`vector`] | Vector storage and k-NN search |
//! | [`embedding`] | Local and remote embedding providers |
//! | [`store`] | Store bootstrap and paired document writes |
//! | [`indexer`] | Full, incremental and single-document indexing |
//! | [`query`] | Search orchestration and rank fusion |
//! | [`stats`] | Index statistics |
//! | [`migrate`] | Schema migrations |
//! | [`error`] | Errors callers match on |

pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod lexical;
pub mod migrate;
pub mod models;
pub mod query;
pub mod stats;
pub mod store;
pub mod tracker;
pub mod vector;
