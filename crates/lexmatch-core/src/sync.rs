use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use tracing::warn;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::index::SearchIndex;
use crate::models::{Profile, ProfileFilter, SearchDocument, SyncStatus};
use crate::projection::Project;
use crate::state::SyncStateStore;
use crate::store::ProfileStore;
use crate::sync_policy::{retry_backoff, should_retry};

mod incremental;
mod listener;
mod resync;
mod verify;
mod workers;


pub use workers::SyncWorkers;

/// Keeps the search index converged on the profile store.
///
/// Cheap to clone; every clone shares the same store, index and sync state.
/// All entry points take a shutdown receiver: a message or a disconnected
/// sender stops the run at the next safe point.
#[derive(Clone)]
pub struct IndexSynchronizer {
    store: Arc<dyn ProfileStore>,
    index: Arc<dyn SearchIndex>,
    state: SyncStateStore,
    config: SyncConfig,
    embedding_dim: usize,
}

impl std::fmt::Debug for IndexSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexSynchronizer")
            .field("index", &self.index.backend())
            .field("config", &self.config)
            .field("embedding_dim", &self.embedding_dim)
            .finish_non_exhaustive()
    }
}

impl IndexSynchronizer {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        index: Arc<dyn SearchIndex>,
        state: SyncStateStore,
        config: SyncConfig,
        embedding_dim: usize,
    ) -> Self {
        Self {
            store,
            index,
            state,
            config,
            embedding_dim,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> &SyncStateStore {
        &self.state
    }

    pub fn status(&self, dead_letter_limit: usize) -> Result<SyncStatus> {
        let latest = self.state.latest_verify_run()?;
        Ok(SyncStatus {
            cursor: self.state.load_cursor()?,
            feed_head: self.store.head_position()?,
            consistent: latest.as_ref().is_some_and(|run| run.consistent),
            last_verified_at: latest.as_ref().map(|run| run.finished_at),
            discrepancies: latest.map(|run| run.discrepancies).unwrap_or_default(),
            dead_letters: self.state.list_dead_letters(dead_letter_limit)?,
        })
    }

    fn project(&self, profiles: &[Profile]) -> Vec<SearchDocument> {
        profiles
            .iter()
            .map(|profile| profile.project(self.embedding_dim))
            .collect()
    }

    /// Re-indexes every profile matching `filter`, paging by id so that
    /// concurrent purges never shift an unvisited profile out of the scan.
    /// Returns `(batches, indexed, interrupted)`.
    fn reindex_matching(
        &self,
        filter: &ProfileFilter,
        shutdown: &Receiver<()>,
        retries: &mut u32,
    ) -> Result<(usize, usize, bool)> {
        let batch_size = self.config.resync_batch_size.max(1);
        let mut last_id: Option<String> = None;
        let mut batches = 0usize;
        let mut indexed = 0usize;
        loop {
            if shutdown_requested(shutdown) {
                return Ok((batches, indexed, true));
            }
            let page = self.store.find_after(filter, last_id.as_deref(), batch_size)?;
            if page.is_empty() {
                break;
            }
            let docs = self.project(&page);
            if !self.bulk_index_with_retry(&docs, shutdown, retries)? {
                return Ok((batches, indexed, true));
            }
            batches += 1;
            indexed += docs.len();
            last_id = page.last().map(|profile| profile.id.clone());
            if page.len() < batch_size {
                break;
            }
        }
        Ok((batches, indexed, false))
    }

    /// Returns `Ok(false)` when shutdown arrived during a backoff.
    fn bulk_index_with_retry(
        &self,
        docs: &[SearchDocument],
        shutdown: &Receiver<()>,
        retries: &mut u32,
    ) -> Result<bool> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.index.bulk_index(docs) {
                Ok(()) => return Ok(true),
                Err(err) if err.is_transient() && should_retry(attempt, self.config.max_attempts) => {
                    *retries += 1;
                    let delay = retry_backoff(&self.config, attempt, docs.len() as u64);
                    warn!(
                        attempt,
                        batch = docs.len(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "bulk index failed; retrying"
                    );
                    if wait_for_shutdown(shutdown, delay) {
                        return Ok(false);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

pub(crate) fn shutdown_requested(shutdown: &Receiver<()>) -> bool {
    matches!(shutdown.try_recv(), Ok(()) | Err(TryRecvError::Disconnected))
}

/// Sleeps for `delay` unless shutdown arrives first. Returns `true` on shutdown.
pub(crate) fn wait_for_shutdown(shutdown: &Receiver<()>, delay: Duration) -> bool {
    match shutdown.recv_timeout(delay) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        Err(RecvTimeoutError::Timeout) => false,
    }
}
