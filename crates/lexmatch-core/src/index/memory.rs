use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::embedding::cosine_similarity;
use crate::error::{LexMatchError, Result};
use crate::models::{IndexedDocument, SearchDocument, SearchFilter, SearchHit, SearchQuery};

use super::SearchIndex;

/// In-process index. Used when no external index is configured and in tests.
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    docs: RwLock<HashMap<String, IndexedDocument>>,
}

impl MemorySearchIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.read().map_or(0, |docs| docs.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SearchIndex for MemorySearchIndex {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    fn index(&self, doc: &SearchDocument) -> Result<()> {
        self.bulk_index(std::slice::from_ref(doc))
    }

    fn delete(&self, id: &str) -> Result<()> {
        let mut docs = self
            .docs
            .write()
            .map_err(|_| LexMatchError::mutex_poisoned("memory index"))?;
        docs.remove(id);
        Ok(())
    }

    fn bulk_index(&self, batch: &[SearchDocument]) -> Result<()> {
        let mut docs = self
            .docs
            .write()
            .map_err(|_| LexMatchError::mutex_poisoned("memory index"))?;
        for doc in batch {
            docs.insert(
                doc.id.clone(),
                IndexedDocument {
                    fingerprint: doc.fingerprint(),
                    doc: doc.clone(),
                },
            );
        }
        Ok(())
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let docs = self
            .docs
            .read()
            .map_err(|_| LexMatchError::mutex_poisoned("memory index"))?;
        let matching = docs
            .values()
            .map(|indexed| &indexed.doc)
            .filter(|doc| query.filter.matches(doc));

        let (mut hits, mut unranked): (Vec<SearchHit>, Vec<SearchHit>) = matching
            .map(|doc| {
                let similarity = query.vector.as_ref().and_then(|vector| {
                    doc.embedding
                        .as_ref()
                        .filter(|embedding| embedding.len() == vector.len())
                        .map(|embedding| cosine_similarity(vector, embedding))
                });
                SearchHit {
                    doc: doc.clone(),
                    similarity,
                }
            })
            .partition(|hit| hit.similarity.is_some());
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.doc.id.cmp(&b.doc.id))
        });
        // Documents without a comparable vector fill any shortfall, by id.
        unranked.sort_by(|a, b| a.doc.id.cmp(&b.doc.id));
        hits.extend(unranked);
        hits.truncate(query.limit);
        Ok(hits)
    }

    fn count(&self, filter: &SearchFilter) -> Result<u64> {
        let docs = self
            .docs
            .read()
            .map_err(|_| LexMatchError::mutex_poisoned("memory index"))?;
        Ok(docs.values().filter(|indexed| filter.matches(&indexed.doc)).count() as u64)
    }

    fn get(&self, id: &str) -> Result<Option<IndexedDocument>> {
        let docs = self
            .docs
            .read()
            .map_err(|_| LexMatchError::mutex_poisoned("memory index"))?;
        Ok(docs.get(id).cloned())
    }
}
