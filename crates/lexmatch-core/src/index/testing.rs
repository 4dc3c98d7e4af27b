use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::error::{LexMatchError, Result};
use crate::models::{IndexedDocument, SearchDocument, SearchFilter, SearchHit, SearchQuery};

use super::{MemorySearchIndex, SearchIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    Unavailable,
    Timeout,
    Rejected,
}

impl Fault {
    fn error(self) -> LexMatchError {
        match self {
            Self::Unavailable => LexMatchError::IndexUnavailable("injected outage".to_string()),
            Self::Timeout => LexMatchError::Timeout("injected timeout".to_string()),
            Self::Rejected => LexMatchError::Internal("injected rejection".to_string()),
        }
    }
}

/// Memory index that fails on demand.
///
/// `fail_writes(n)` makes the next `n` writes fail; `set_down(true)` fails
/// every call until cleared.
#[derive(Debug)]
pub(crate) struct FaultyIndex {
    inner: MemorySearchIndex,
    fault: Mutex<Fault>,
    down: AtomicBool,
    failing_writes: AtomicU32,
    pub(crate) write_attempts: AtomicU32,
}

impl FaultyIndex {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemorySearchIndex::new(),
            fault: Mutex::new(Fault::Unavailable),
            down: AtomicBool::new(false),
            failing_writes: AtomicU32::new(0),
            write_attempts: AtomicU32::new(0),
        }
    }

    pub(crate) fn set_fault(&self, fault: Fault) {
        if let Ok(mut current) = self.fault.lock() {
            *current = fault;
        }
    }

    pub(crate) fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub(crate) fn fail_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub(crate) fn inner(&self) -> &MemorySearchIndex {
        &self.inner
    }

    fn current_error(&self) -> LexMatchError {
        self.fault
            .lock()
            .map_or(Fault::Unavailable, |fault| *fault)
            .error()
    }

    fn check_read(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(self.current_error());
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_read()?;
        let consumed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if consumed.is_ok() {
            return Err(self.current_error());
        }
        Ok(())
    }
}

impl SearchIndex for FaultyIndex {
    fn backend(&self) -> &'static str {
        "faulty"
    }

    fn ensure_ready(&self) -> Result<()> {
        self.check_read()
    }

    fn index(&self, doc: &SearchDocument) -> Result<()> {
        self.check_write()?;
        self.inner.index(doc)
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.check_write()?;
        self.inner.delete(id)
    }

    fn bulk_index(&self, docs: &[SearchDocument]) -> Result<()> {
        self.check_write()?;
        self.inner.bulk_index(docs)
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        self.check_read()?;
        self.inner.search(query)
    }

    fn count(&self, filter: &SearchFilter) -> Result<u64> {
        self.check_read()?;
        self.inner.count(filter)
    }

    fn get(&self, id: &str) -> Result<Option<IndexedDocument>> {
        self.check_read()?;
        self.inner.get(id)
    }
}
