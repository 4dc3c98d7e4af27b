use chrono::Utc;
use crossbeam_channel::Receiver;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{FullResyncReport, ProfileFilter};
use crate::state::SyncTimestamp;

use super::IndexSynchronizer;

impl IndexSynchronizer {
    /// Re-projects and re-indexes every stored profile in store order.
    ///
    /// Never deletes from the index; orphans are left for the verifier to
    /// report. `last_full_sync` only moves when the run completes.
    pub fn full_resync(&self, shutdown: &Receiver<()>) -> Result<FullResyncReport> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(run_id = %run_id, "full resync started");

        let mut retries = 0u32;
        let (batches, indexed, interrupted) =
            self.reindex_matching(&ProfileFilter::all(), shutdown, &mut retries)?;
        let finished_at = Utc::now();
        if !interrupted {
            self.state
                .set_timestamp(SyncTimestamp::LastFullSync, finished_at)?;
        }

        info!(
            run_id = %run_id,
            batches,
            indexed,
            retries,
            interrupted,
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "full resync finished"
        );
        Ok(FullResyncReport {
            run_id,
            started_at,
            finished_at,
            batches,
            indexed,
            retries,
            interrupted,
        })
    }
}
