use std::time::Instant;

use crossbeam_channel::{Receiver, never};
use serde::Serialize;

use crate::error::Result;
use crate::models::{FeedReport, FullResyncReport, IncrementalSyncReport, SyncStatus, VerifyReport};
use crate::store::ProfileStore;
use crate::sync::SyncWorkers;

use super::MatchingCore;

const OP_FULL: &str = "sync.full";
const OP_INCREMENTAL: &str = "sync.incremental";
const OP_VERIFY: &str = "sync.verify";
const OP_FEED: &str = "sync.feed";

/// Dead letters returned by `get_sync_status`.
const STATUS_DEAD_LETTER_LIMIT: usize = 100;

impl MatchingCore {
    /// Operator-triggered resync. Runs to completion on the calling thread.
    pub fn trigger_full_resync(&self) -> Result<FullResyncReport> {
        self.logged(OP_FULL, || self.sync.full_resync(&never()))
    }

    pub fn run_incremental_sync(&self) -> Result<IncrementalSyncReport> {
        self.logged(OP_INCREMENTAL, || self.sync.incremental_sync(&never()))
    }

    pub fn verify_consistency(&self) -> Result<VerifyReport> {
        self.logged(OP_VERIFY, || self.sync.verify_consistency())
    }

    /// Applies every pending change-feed event and returns.
    pub fn drain_change_feed(&self) -> Result<FeedReport> {
        self.logged(OP_FEED, || self.sync.drain_change_feed(&never()))
    }

    /// Like [`MatchingCore::drain_change_feed`], stopping early on `shutdown`.
    pub fn drain_change_feed_until(&self, shutdown: &Receiver<()>) -> Result<FeedReport> {
        self.sync.drain_change_feed(shutdown)
    }

    pub fn get_sync_status(&self) -> Result<SyncStatus> {
        self.sync.status(STATUS_DEAD_LETTER_LIMIT)
    }

    /// Removes the given dead letters, or all when `ids` is empty.
    pub fn clear_dead_letters(&self, ids: &[i64]) -> Result<u64> {
        self.sync.state().clear_dead_letters(ids)
    }

    pub fn list_verify_runs(&self, limit: usize) -> Result<Vec<VerifyReport>> {
        self.sync.state().list_verify_runs(limit)
    }

    /// Trims the change log to its newest `keep_latest` entries.
    pub fn prune_change_log(&self, keep_latest: usize) -> Result<u64> {
        self.store.prune_change_log(keep_latest)
    }

    /// Starts the background sync threads. Dropping the handle stops them.
    pub fn start_sync_workers(&self) -> Result<SyncWorkers> {
        SyncWorkers::start(self.sync.clone())
    }

    fn logged<T: Serialize>(&self, operation: &str, run: impl FnOnce() -> Result<T>) -> Result<T> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        match run() {
            Ok(report) => {
                let details = serde_json::to_value(&report).ok();
                self.log_request_status(request_id, operation, "ok", started, details);
                Ok(report)
            }
            Err(err) => {
                self.log_request_error(request_id, operation, started, &err, None);
                Err(err)
            }
        }
    }
}
