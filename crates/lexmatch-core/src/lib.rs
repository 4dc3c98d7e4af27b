// Public fallible APIs in this crate share one concrete error contract (`LexMatchError`).
#![allow(
    clippy::missing_errors_doc,
    reason = "crate-wide fallible API uses one explicit error type; per-item boilerplate would duplicate contract"
)]

pub mod client;
pub mod config;
pub(crate) mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub(crate) mod jsonl;
pub mod models;
pub mod projection;
pub mod retrieval;
pub mod scoring;
pub mod state;
pub mod store;
pub mod sync;
pub(crate) mod sync_policy;

pub use client::MatchingCore;
pub use config::AppConfig;
pub use error::{LexMatchError, Result};
pub use index::{MemorySearchIndex, QdrantSearchIndex, SearchIndex};
pub use store::{ProfileStore, SqliteProfileStore};
pub use sync::{IndexSynchronizer, SyncWorkers};
