use std::sync::Arc;

use crate::config::{IndexBackend, IndexConfig};
use crate::error::Result;
use crate::models::{IndexedDocument, SearchDocument, SearchFilter, SearchHit, SearchQuery};

mod memory;
mod qdrant;

#[cfg(test)]
pub(crate) mod testing;

pub use memory::MemorySearchIndex;
pub use qdrant::{PROFILE_VECTOR_NAME, QdrantSearchIndex};

/// Derived, rebuildable view of profiles used for candidate retrieval.
///
/// Writes are idempotent: indexing the same document twice, or deleting an
/// absent id, leaves the index unchanged.
pub trait SearchIndex: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Creates whatever the backend needs before the first read or write.
    fn ensure_ready(&self) -> Result<()>;

    fn index(&self, doc: &SearchDocument) -> Result<()>;

    fn delete(&self, id: &str) -> Result<()>;

    fn bulk_index(&self, docs: &[SearchDocument]) -> Result<()>;

    /// With a query vector, hits are ordered by similarity descending then
    /// id; without one, by id.
    fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>>;

    fn count(&self, filter: &SearchFilter) -> Result<u64>;

    fn get(&self, id: &str) -> Result<Option<IndexedDocument>>;
}

/// Builds the configured backend. Nothing is contacted until `ensure_ready`.
pub fn build_index(config: &IndexConfig, embedding_dim: usize) -> Result<Arc<dyn SearchIndex>> {
    match config.backend {
        IndexBackend::Memory => Ok(Arc::new(MemorySearchIndex::new())),
        IndexBackend::Qdrant => Ok(Arc::new(QdrantSearchIndex::new(config, embedding_dim)?)),
    }
}
